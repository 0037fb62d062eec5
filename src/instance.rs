//! One live, URL-identified application and its connection queue.

use std::collections::VecDeque;

use tokio::sync::{mpsc, oneshot};
use url::Url;
use uuid::Uuid;

use crate::channel::{
    ApplicationEndpoint, ApplicationMessage, ServiceProviderClient, ServiceProviderServer,
};
use crate::error::{BrokerError, BrokerResult};
use crate::fetch::UrlResponse;

/// Work queued against an instance that has not signalled ready yet.
pub(crate) enum PendingDelivery {
    /// A client's ask to exchange services with this application.
    Connection {
        requestor_url: Url,
        services: Option<ServiceProviderServer>,
        exposed_services: Option<ServiceProviderClient>,
        reply: Option<oneshot::Sender<BrokerResult<()>>>,
    },
    /// Content-handler duty destined for a handler instance. Dropping an
    /// undelivered item drops the contained application end, which the
    /// content's own multiplexer observes as an error.
    Content {
        response: UrlResponse,
        application: ApplicationEndpoint,
    },
}

/// Table entry for the single running instance of one canonical URL.
pub(crate) struct RunningInstance {
    pub id: Uuid,
    pub url: Url,
    pub app_tx: mpsc::UnboundedSender<ApplicationMessage>,
    /// Application end, held until a loader or content handler consumes it.
    pub application: Option<ApplicationEndpoint>,
    pub pending: VecDeque<PendingDelivery>,
    pub ready: bool,
}

impl RunningInstance {
    pub fn new(
        id: Uuid,
        url: Url,
        app_tx: mpsc::UnboundedSender<ApplicationMessage>,
        application: Option<ApplicationEndpoint>,
    ) -> Self {
        Self {
            id,
            url,
            app_tx,
            application,
            pending: VecDeque::new(),
            ready: false,
        }
    }

    /// Delivers immediately when ready, otherwise queues in arrival order.
    pub fn enqueue_or_deliver(&mut self, delivery: PendingDelivery) {
        if self.ready {
            self.deliver(delivery);
        } else {
            self.pending.push_back(delivery);
        }
    }

    /// Forwards one delivery through the application channel.
    ///
    /// Sending to an application whose channel already closed resolves the
    /// reply with `ConnectionError`; a requestor that dropped its own service
    /// endpoints still gets `Ok`, since delivery to a closed endpoint is a
    /// no-op rather than an error.
    pub fn deliver(&self, delivery: PendingDelivery) {
        match delivery {
            PendingDelivery::Connection {
                requestor_url,
                services,
                exposed_services,
                reply,
            } => {
                let sent = self
                    .app_tx
                    .send(ApplicationMessage::AcceptConnection {
                        requestor_url,
                        resolved_url: self.url.clone(),
                        services,
                        exposed_services,
                    })
                    .is_ok();
                if let Some(reply) = reply {
                    let _ = reply.send(if sent {
                        Ok(())
                    } else {
                        Err(BrokerError::ConnectionError(self.url.clone()))
                    });
                }
            }
            PendingDelivery::Content {
                response,
                application,
            } => {
                let _ = self.app_tx.send(ApplicationMessage::RunContent {
                    response,
                    application,
                });
            }
        }
    }

    /// Drains the queue in FIFO order; each item is delivered exactly once.
    pub fn drain_pending(&mut self) {
        while let Some(delivery) = self.pending.pop_front() {
            self.deliver(delivery);
        }
    }

    /// Fails every queued delivery with `error`, dropping its endpoints.
    pub fn fail_pending(&mut self, error: &BrokerError) {
        while let Some(delivery) = self.pending.pop_front() {
            if let PendingDelivery::Connection {
                reply: Some(reply), ..
            } = delivery
            {
                let _ = reply.send(Err(error.clone()));
            }
        }
    }
}
