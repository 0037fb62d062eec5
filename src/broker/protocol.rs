//! Events entering the broker's owning sequence.
//!
//! Public operations and asynchronous continuations (loader outcomes, fetch
//! results, multiplexer reports) all arrive as one event type on one channel,
//! so "check then create" on the instance table never interleaves.

use std::sync::Arc;

use tokio::sync::oneshot;
use url::Url;
use uuid::Uuid;

use crate::channel::{ServiceProviderClient, ServiceProviderServer, ShellEndpoint};
use crate::error::BrokerResult;
use crate::fetch::UrlResponse;
use crate::loader::ApplicationLoader;

pub(crate) enum BrokerEvent {
    Connect {
        application_url: Url,
        requestor_url: Url,
        services: Option<ServiceProviderServer>,
        exposed_services: Option<ServiceProviderClient>,
        /// Resolved on delivery (Ok) or failure. Requests forwarded by a
        /// hosted application carry no reply.
        reply: Option<oneshot::Sender<BrokerResult<()>>>,
    },
    RegisterExternalApplication {
        url: Url,
        shell: ShellEndpoint,
        reply: oneshot::Sender<BrokerResult<()>>,
    },
    SetLoaderForUrl {
        loader: Arc<dyn ApplicationLoader>,
        url: Url,
    },
    SetLoaderForScheme {
        loader: Arc<dyn ApplicationLoader>,
        scheme: String,
    },
    SetDefaultLoader {
        loader: Arc<dyn ApplicationLoader>,
    },
    SetArgsForUrl {
        args: Vec<String>,
        url: Url,
    },
    SetContentHandler {
        mime_type: String,
        handler_url: Url,
    },
    TerminateShellConnections,
    InstanceReady {
        instance_id: Uuid,
    },
    InstanceError {
        instance_id: Uuid,
    },
    FetchComplete {
        instance_id: Uuid,
        result: BrokerResult<UrlResponse>,
    },
}
