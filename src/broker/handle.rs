use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use url::Url;

use crate::broker::actor::BrokerActor;
use crate::broker::protocol::BrokerEvent;
use crate::channel::{
    service_provider, MessagePipe, ServiceProviderClient, ServiceProviderServer, ShellEndpoint,
};
use crate::delegate::{BrokerDelegate, DefaultDelegate};
use crate::error::{BrokerError, BrokerResult};
use crate::fetch::ContentFetcher;
use crate::loader::ApplicationLoader;

/// Handle to a running broker. Cheap to clone; every operation re-enters the
/// broker's single owning task through its event channel.
#[derive(Clone)]
pub struct Broker {
    event_tx: mpsc::UnboundedSender<BrokerEvent>,
}

/// Configures and spawns a broker.
///
/// The broker is an explicit value owned by the embedding environment:
/// created at process start, dropped (or terminated) at shutdown.
#[derive(Default)]
pub struct BrokerBuilder {
    delegate: Option<Arc<dyn BrokerDelegate>>,
    fetcher: Option<Arc<dyn ContentFetcher>>,
}

impl BrokerBuilder {
    pub fn delegate(mut self, delegate: Arc<dyn BrokerDelegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    pub fn content_fetcher(mut self, fetcher: Arc<dyn ContentFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Spawns the broker task and returns its handle.
    pub fn spawn(self) -> Broker {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let actor = BrokerActor::new(
            self.delegate.unwrap_or_else(|| Arc::new(DefaultDelegate)),
            self.fetcher,
            event_tx.clone(),
            event_rx,
        );
        tokio::spawn(async move {
            actor.run().await;
        });
        Broker { event_tx }
    }
}

impl Broker {
    pub fn builder() -> BrokerBuilder {
        BrokerBuilder::default()
    }

    pub fn is_closed(&self) -> bool {
        self.event_tx.is_closed()
    }

    /// Connects a client to the application named by `application_url`,
    /// loading it first if necessary. Resolves once the connection has been
    /// delivered, or with the failure that prevented it.
    pub async fn connect_to_application(
        &self,
        application_url: Url,
        requestor_url: Url,
        services: Option<ServiceProviderServer>,
        exposed_services: Option<ServiceProviderClient>,
    ) -> BrokerResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(BrokerEvent::Connect {
            application_url,
            requestor_url,
            services,
            exposed_services,
            reply: Some(reply_tx),
        })?;
        reply_rx
            .await
            .map_err(|_| BrokerError::Internal("broker dropped reply".to_string()))?
    }

    /// Connects to one named service on the application: builds the provider
    /// pair, issues the connection, and opens a single pipe.
    pub async fn connect_to_service(
        &self,
        application_url: Url,
        requestor_url: Url,
        interface_name: &str,
    ) -> BrokerResult<MessagePipe> {
        let (client, server) = service_provider();
        self.connect_to_application(application_url, requestor_url, Some(server), None)
            .await?;
        Ok(client.connect_to_service(interface_name))
    }

    /// Binds an externally produced channel end directly as the running
    /// instance for `url`, without invoking a loader.
    pub async fn register_external_application(
        &self,
        url: Url,
        shell: ShellEndpoint,
    ) -> BrokerResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(BrokerEvent::RegisterExternalApplication {
            url,
            shell,
            reply: reply_tx,
        })?;
        reply_rx
            .await
            .map_err(|_| BrokerError::Internal("broker dropped reply".to_string()))?
    }

    pub fn set_loader_for_url(
        &self,
        loader: Arc<dyn ApplicationLoader>,
        url: Url,
    ) -> BrokerResult<()> {
        self.send(BrokerEvent::SetLoaderForUrl { loader, url })
    }

    pub fn set_loader_for_scheme(
        &self,
        loader: Arc<dyn ApplicationLoader>,
        scheme: &str,
    ) -> BrokerResult<()> {
        self.send(BrokerEvent::SetLoaderForScheme {
            loader,
            scheme: scheme.to_string(),
        })
    }

    pub fn set_default_loader(&self, loader: Arc<dyn ApplicationLoader>) -> BrokerResult<()> {
        self.send(BrokerEvent::SetDefaultLoader { loader })
    }

    pub fn set_args_for_url(&self, args: Vec<String>, url: Url) -> BrokerResult<()> {
        self.send(BrokerEvent::SetArgsForUrl { args, url })
    }

    pub fn set_content_handler(&self, mime_type: &str, handler_url: Url) -> BrokerResult<()> {
        self.send(BrokerEvent::SetContentHandler {
            mime_type: mime_type.to_string(),
            handler_url,
        })
    }

    /// Drops every broker-side channel end. Connected applications observe
    /// their channels closing and get a chance to shut down.
    pub fn terminate_shell_connections(&self) -> BrokerResult<()> {
        self.send(BrokerEvent::TerminateShellConnections)
    }

    fn send(&self, event: BrokerEvent) -> BrokerResult<()> {
        self.event_tx
            .send(event)
            .map_err(|_| BrokerError::Internal("broker stopped".to_string()))
    }
}
