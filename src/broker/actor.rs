
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use url::Url;
use uuid::Uuid;

use crate::args::ArgsTable;
use crate::channel::{
    application_channel, ApplicationMessage, ServiceProviderClient, ServiceProviderServer,
    ShellEndpoint,
};
use crate::content_handler::{ContentHandlerConnection, ContentHandlerRegistry};
use crate::delegate::BrokerDelegate;
use crate::error::{BrokerError, BrokerResult};
use crate::fetch::{ContentFetcher, UrlResponse};
use crate::instance::{PendingDelivery, RunningInstance};
use crate::loader::{ApplicationLoader, LoaderRegistry};
use crate::shell::spawn_shell_multiplexer;

use super::protocol::BrokerEvent;

pub(crate) struct BrokerActor {
    delegate: Arc<dyn BrokerDelegate>,
    fetcher: Option<Arc<dyn ContentFetcher>>,
    loaders: LoaderRegistry,
    args: ArgsTable,
    handler_registry: ContentHandlerRegistry,
    instances: HashMap<Url, RunningInstance>,
    /// Reverse index from instance id to table key. Entries are removed at
    /// teardown, so events carrying a stale id find nothing and are dropped.
    instance_urls: HashMap<Uuid, Url>,
    content_handlers: HashMap<Url, ContentHandlerConnection>,
    event_tx: mpsc::UnboundedSender<BrokerEvent>,
    event_rx: mpsc::UnboundedReceiver<BrokerEvent>,
}

impl BrokerActor {
    pub(crate) fn new(
        delegate: Arc<dyn BrokerDelegate>,
        fetcher: Option<Arc<dyn ContentFetcher>>,
        event_tx: mpsc::UnboundedSender<BrokerEvent>,
        event_rx: mpsc::UnboundedReceiver<BrokerEvent>,
    ) -> Self {
        Self {
            delegate,
            fetcher,
            loaders: LoaderRegistry::new(),
            args: ArgsTable::new(),
            handler_registry: ContentHandlerRegistry::new(),
            instances: HashMap::new(),
            instance_urls: HashMap::new(),
            content_handlers: HashMap::new(),
            event_tx,
            event_rx,
        }
    }

    pub(crate) async fn run(mut self) {
        while let Some(event) = self.event_rx.recv().await {
            self.handle_event(event);
        }
    }

    fn handle_event(&mut self, event: BrokerEvent) {
        match event {
            BrokerEvent::Connect {
                application_url,
                requestor_url,
                services,
                exposed_services,
                reply,
            } => self.handle_connect(
                application_url,
                requestor_url,
                services,
                exposed_services,
                reply,
            ),
            BrokerEvent::RegisterExternalApplication { url, shell, reply } => {
                self.handle_register_external(url, shell, reply)
            }
            BrokerEvent::SetLoaderForUrl { loader, url } => {
                self.loaders.set_loader_for_url(loader, url)
            }
            BrokerEvent::SetLoaderForScheme { loader, scheme } => {
                self.loaders.set_loader_for_scheme(loader, scheme)
            }
            BrokerEvent::SetDefaultLoader { loader } => self.loaders.set_default_loader(loader),
            BrokerEvent::SetArgsForUrl { args, url } => self.args.set_args_for_url(args, url),
            BrokerEvent::SetContentHandler {
                mime_type,
                handler_url,
            } => self.handler_registry.set_handler(mime_type, handler_url),
            BrokerEvent::TerminateShellConnections => self.handle_terminate(),
            BrokerEvent::InstanceReady { instance_id } => self.handle_instance_ready(instance_id),
            BrokerEvent::InstanceError { instance_id } => self.handle_instance_error(instance_id),
            BrokerEvent::FetchComplete {
                instance_id,
                result,
            } => self.handle_fetch_complete(instance_id, result),
        }
    }

    fn handle_connect(
        &mut self,
        application_url: Url,
        requestor_url: Url,
        services: Option<ServiceProviderServer>,
        exposed_services: Option<ServiceProviderClient>,
        reply: Option<oneshot::Sender<BrokerResult<()>>>,
    ) {
        let resolved = self.delegate.resolve_url(&application_url);
        let delivery = PendingDelivery::Connection {
            requestor_url,
            services,
            exposed_services,
            reply,
        };

        if let Some(instance) = self.instances.get_mut(&resolved) {
            instance.enqueue_or_deliver(delivery);
            return;
        }
        self.start_instance(resolved, delivery);
    }

    /// Creates the single instance for `url` and hands it to whichever path
    /// serves it: an exact/scheme loader, the fetch + content-handler path,
    /// or the default loader. With none of those the request fails and no
    /// instance remains.
    fn start_instance(&mut self, url: Url, first: PendingDelivery) {
        // Probe without the default loader so it cannot mask the
        // content-handler path.
        if let Some(loader) = self.loaders.get_loader(&url, false) {
            self.insert_instance(&url, first);
            self.hand_to_loader(&url, loader);
            return;
        }

        if let Some(fetcher) = self.fetcher.clone() {
            let instance_id = self.insert_instance(&url, first);
            let event_tx = self.event_tx.clone();
            tokio::spawn(async move {
                let result = fetcher.fetch(&url).await;
                let _ = event_tx.send(BrokerEvent::FetchComplete {
                    instance_id,
                    result,
                });
            });
            return;
        }

        if let Some(loader) = self.loaders.get_loader(&url, true) {
            self.insert_instance(&url, first);
            self.hand_to_loader(&url, loader);
            return;
        }

        tracing::debug!(url = %url, "no loader or content for url");
        fail_delivery(first, BrokerError::ResolutionFailure(url));
    }

    /// Table insertion: one channel pair, one multiplexer task, `Initialize`
    /// sent up front with the URL's registered arguments.
    fn insert_instance(&mut self, url: &Url, first: PendingDelivery) -> Uuid {
        let (shell, application) = application_channel();
        let ShellEndpoint { app_tx, shell_rx } = shell;
        let id = Uuid::now_v7();

        let _ = app_tx.send(ApplicationMessage::Initialize {
            url: url.clone(),
            args: self.args.args_for_url(url),
        });

        let mut instance = RunningInstance::new(id, url.clone(), app_tx, Some(application));
        instance.pending.push_back(first);

        spawn_shell_multiplexer(id, url.clone(), shell_rx, self.event_tx.clone());
        self.instances.insert(url.clone(), instance);
        self.instance_urls.insert(id, url.clone());
        id
    }

    fn hand_to_loader(&mut self, url: &Url, loader: Arc<dyn ApplicationLoader>) {
        let Some(application) = self
            .instances
            .get_mut(url)
            .and_then(|instance| instance.application.take())
        else {
            return;
        };
        tracing::debug!(url = %url, "invoking loader");
        let load_url = url.clone();
        tokio::spawn(async move {
            loader.load(load_url, application).await;
        });
    }

    fn handle_register_external(
        &mut self,
        url: Url,
        shell: ShellEndpoint,
        reply: oneshot::Sender<BrokerResult<()>>,
    ) {
        let resolved = self.delegate.resolve_url(&url);
        if self.instances.contains_key(&resolved) {
            let _ = reply.send(Err(BrokerError::InvalidInput(format!(
                "application already running: {resolved}"
            ))));
            return;
        }

        let ShellEndpoint { app_tx, shell_rx } = shell;
        let id = Uuid::now_v7();
        let mut instance = RunningInstance::new(id, resolved.clone(), app_tx, None);
        // External processes register after finishing their own startup.
        instance.ready = true;

        spawn_shell_multiplexer(id, resolved.clone(), shell_rx, self.event_tx.clone());
        self.instances.insert(resolved.clone(), instance);
        self.instance_urls.insert(id, resolved.clone());
        tracing::debug!(url = %resolved, "external application registered");
        let _ = reply.send(Ok(()));
    }

    fn handle_instance_ready(&mut self, instance_id: Uuid) {
        let Some(url) = self.instance_urls.get(&instance_id) else {
            return;
        };
        let Some(instance) = self.instances.get_mut(url) else {
            return;
        };
        if instance.ready {
            return;
        }
        tracing::debug!(url = %instance.url, "application ready");
        instance.ready = true;
        instance.drain_pending();
    }

    fn handle_instance_error(&mut self, instance_id: Uuid) {
        let Some(url) = self.instance_urls.get(&instance_id).cloned() else {
            return;
        };
        let ready = self
            .instances
            .get(&url)
            .map(|instance| instance.ready)
            .unwrap_or(false);
        let error = if ready {
            BrokerError::ConnectionError(url)
        } else {
            BrokerError::LoadFailure(url)
        };
        self.teardown_instance(instance_id, error);
    }

    fn handle_fetch_complete(&mut self, instance_id: Uuid, result: BrokerResult<UrlResponse>) {
        let Some(url) = self.instance_urls.get(&instance_id).cloned() else {
            return;
        };

        match result {
            Ok(response) => {
                if let Some(handler_url) =
                    self.handler_registry.handler_for(&response.mime_type).cloned()
                {
                    self.load_with_content_handler(&url, handler_url, response);
                } else if let Some(loader) = self.loaders.get_loader(&url, true) {
                    self.hand_to_loader(&url, loader);
                } else {
                    self.teardown_instance(
                        instance_id,
                        BrokerError::ContentHandlerFailure(format!(
                            "no content handler for {}",
                            response.mime_type
                        )),
                    );
                }
            }
            Err(error) => {
                if let Some(loader) = self.loaders.get_loader(&url, true) {
                    self.hand_to_loader(&url, loader);
                } else {
                    tracing::debug!(url = %url, error = %error, "fetch failed and no default loader");
                    self.teardown_instance(instance_id, BrokerError::ResolutionFailure(url));
                }
            }
        }
    }

    /// Routes a fetched response through the content handler registered for
    /// its type, reusing the handler's connection when one exists.
    fn load_with_content_handler(
        &mut self,
        content_url: &Url,
        handler_url: Url,
        response: UrlResponse,
    ) {
        let resolved_handler = self.delegate.resolve_url(&handler_url);
        let Some(application) = self
            .instances
            .get_mut(content_url)
            .and_then(|instance| instance.application.take())
        else {
            return;
        };
        let delivery = PendingDelivery::Content {
            response,
            application,
        };

        if let Some(instance) = self.instances.get_mut(&resolved_handler) {
            let instance_id = instance.id;
            instance.enqueue_or_deliver(delivery);
            self.content_handlers
                .entry(resolved_handler.clone())
                .or_insert_with(|| ContentHandlerConnection {
                    handler_url: resolved_handler.clone(),
                    instance_id,
                });
            return;
        }

        self.start_instance(resolved_handler.clone(), delivery);
        match self.instances.get(&resolved_handler) {
            Some(instance) => {
                let instance_id = instance.id;
                self.content_handlers.insert(
                    resolved_handler.clone(),
                    ContentHandlerConnection {
                        handler_url: resolved_handler,
                        instance_id,
                    },
                );
            }
            None => {
                // The handler URL itself resolved to nothing; the dropped
                // delivery already closed the content application's channel.
                tracing::warn!(handler_url = %resolved_handler, "content handler did not start");
            }
        }
    }

    /// Removes the instance, fails its queue, and invalidates any handler
    /// cache entry bound to it. Terminal: a later request for the same URL
    /// starts from scratch.
    fn teardown_instance(&mut self, instance_id: Uuid, error: BrokerError) {
        let Some(url) = self.instance_urls.remove(&instance_id) else {
            return;
        };
        let Some(mut instance) = self.instances.remove(&url) else {
            return;
        };

        // Content-handler failures surface as load failures on the original
        // request.
        let reply_error = match &error {
            BrokerError::ContentHandlerFailure(_) => BrokerError::LoadFailure(url.clone()),
            other => other.clone(),
        };
        instance.fail_pending(&reply_error);
        self.content_handlers.retain(|_, connection| {
            if connection.instance_id == instance_id {
                tracing::debug!(handler_url = %connection.handler_url, "content handler connection invalidated");
                false
            } else {
                true
            }
        });

        match &error {
            BrokerError::ResolutionFailure(_) => {}
            _ => self.delegate.on_application_error(&url),
        }
        tracing::warn!(url = %url, error = %error, "application instance torn down");
    }

    fn handle_terminate(&mut self) {
        tracing::debug!(count = self.instances.len(), "terminating shell connections");
        self.instances.clear();
        self.instance_urls.clear();
        self.content_handlers.clear();
    }

    #[cfg(test)]
    pub(crate) fn has_instance_for_url(&self, url: &Url) -> bool {
        self.instances.contains_key(url)
    }
}

fn fail_delivery(delivery: PendingDelivery, error: BrokerError) {
    if let PendingDelivery::Connection {
        reply: Some(reply), ..
    } = delivery
    {
        let _ = reply.send(Err(error));
    }
}
