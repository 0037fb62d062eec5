//! In-process channel primitives the broker routes between applications.
//!
//! Three layers, each a pair of endpoints: a [`MessagePipe`] carries opaque
//! JSON values between two parties; a service-provider pair exchanges named
//! [`ServiceRequest`]s, each opening a fresh pipe; an application channel is
//! the two-way link between the broker and one hosted application. The broker
//! never inspects pipe contents beyond routing.

use tokio::sync::mpsc;
use url::Url;

use crate::fetch::UrlResponse;

/// One end of a bidirectional pipe of opaque JSON messages.
#[derive(Debug)]
pub struct MessagePipe {
    tx: mpsc::UnboundedSender<serde_json::Value>,
    rx: mpsc::UnboundedReceiver<serde_json::Value>,
}

impl MessagePipe {
    /// Sends a message to the peer. Returns false if the peer end is gone.
    pub fn send(&self, message: serde_json::Value) -> bool {
        self.tx.send(message).is_ok()
    }

    /// Receives the next message, or `None` once the peer end is dropped.
    pub async fn recv(&mut self) -> Option<serde_json::Value> {
        self.rx.recv().await
    }
}

/// Creates a connected pair of pipe endpoints.
pub fn message_pipe() -> (MessagePipe, MessagePipe) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    (
        MessagePipe { tx: a_tx, rx: a_rx },
        MessagePipe { tx: b_tx, rx: b_rx },
    )
}

/// A request to connect to one named service, carrying the peer's pipe end.
#[derive(Debug)]
pub struct ServiceRequest {
    pub interface_name: String,
    pub pipe: MessagePipe,
}

/// Client end of a service provider: opens pipes to named services.
#[derive(Debug)]
pub struct ServiceProviderClient {
    tx: mpsc::UnboundedSender<ServiceRequest>,
}

impl ServiceProviderClient {
    /// Opens a pipe to the named service. The returned end stays usable even
    /// if the provider is gone; messages sent into it are then dropped when
    /// the peer end is.
    pub fn connect_to_service(&self, interface_name: &str) -> MessagePipe {
        let (local, remote) = message_pipe();
        let _ = self.tx.send(ServiceRequest {
            interface_name: interface_name.to_string(),
            pipe: remote,
        });
        local
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Server end of a service provider: receives connection requests to serve.
#[derive(Debug)]
pub struct ServiceProviderServer {
    rx: mpsc::UnboundedReceiver<ServiceRequest>,
}

impl ServiceProviderServer {
    /// Next inbound service request, or `None` once the client end is dropped.
    pub async fn next_request(&mut self) -> Option<ServiceRequest> {
        self.rx.recv().await
    }
}

/// Creates a connected service-provider pair.
pub fn service_provider() -> (ServiceProviderClient, ServiceProviderServer) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ServiceProviderClient { tx },
        ServiceProviderServer { rx },
    )
}

/// Messages delivered by the broker to a hosted application.
#[derive(Debug)]
pub enum ApplicationMessage {
    /// Sent once, before any connection, with the startup arguments
    /// registered for the application's URL.
    Initialize { url: Url, args: Vec<String> },
    /// A client asked to exchange services with this application.
    AcceptConnection {
        requestor_url: Url,
        resolved_url: Url,
        services: Option<ServiceProviderServer>,
        exposed_services: Option<ServiceProviderClient>,
    },
    /// Content-handler duty: drive `application` as if this application had
    /// loaded it, interpreting the fetched response.
    RunContent {
        response: UrlResponse,
        application: ApplicationEndpoint,
    },
}

/// Messages an application sends back to its shell.
#[derive(Debug)]
pub enum ShellMessage {
    /// Initial configuration is complete; queued connections may be drained.
    Ready,
    /// The hosted application asks to reach another application by URL.
    ConnectToApplication {
        url: Url,
        services: Option<ServiceProviderServer>,
        exposed_services: Option<ServiceProviderClient>,
    },
}

/// The application's handle back into its shell.
#[derive(Debug, Clone)]
pub struct ShellClient {
    tx: mpsc::UnboundedSender<ShellMessage>,
}

impl ShellClient {
    /// Signals that initial configuration is complete.
    pub fn ready(&self) {
        let _ = self.tx.send(ShellMessage::Ready);
    }

    /// Requests a connection to another application through the broker.
    pub fn connect_to_application(
        &self,
        url: Url,
        services: Option<ServiceProviderServer>,
        exposed_services: Option<ServiceProviderClient>,
    ) {
        let _ = self.tx.send(ShellMessage::ConnectToApplication {
            url,
            services,
            exposed_services,
        });
    }
}

/// The end of an application channel handed to a loader.
#[derive(Debug)]
pub struct ApplicationEndpoint {
    pub messages: mpsc::UnboundedReceiver<ApplicationMessage>,
    pub shell: ShellClient,
}

/// The broker-side end of an application channel.
#[derive(Debug)]
pub struct ShellEndpoint {
    pub(crate) app_tx: mpsc::UnboundedSender<ApplicationMessage>,
    pub(crate) shell_rx: mpsc::UnboundedReceiver<ShellMessage>,
}

/// Creates a connected application channel pair.
pub fn application_channel() -> (ShellEndpoint, ApplicationEndpoint) {
    let (app_tx, messages) = mpsc::unbounded_channel();
    let (shell_tx, shell_rx) = mpsc::unbounded_channel();
    (
        ShellEndpoint { app_tx, shell_rx },
        ApplicationEndpoint {
            messages,
            shell: ShellClient { tx: shell_tx },
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn message_pipe_carries_values_both_ways() {
        let (mut a, mut b) = message_pipe();
        assert!(a.send(json!({"ping": 1})));
        assert!(b.send(json!({"pong": 2})));

        assert_eq!(b.recv().await.expect("recv")["ping"], 1);
        assert_eq!(a.recv().await.expect("recv")["pong"], 2);
    }

    #[tokio::test]
    async fn dropped_pipe_end_closes_peer() {
        let (a, mut b) = message_pipe();
        drop(a);
        assert!(b.recv().await.is_none());
    }

    #[tokio::test]
    async fn service_provider_routes_named_requests() {
        let (client, mut server) = service_provider();
        let mut pipe = client.connect_to_service("echo");

        let request = server.next_request().await.expect("request");
        assert_eq!(request.interface_name, "echo");

        assert!(request.pipe.send(json!("hello")));
        assert_eq!(pipe.recv().await.expect("recv"), json!("hello"));
    }

    #[tokio::test]
    async fn connect_to_service_after_server_drop_is_a_noop() {
        let (client, server) = service_provider();
        drop(server);

        let mut pipe = client.connect_to_service("echo");
        assert!(client.is_closed());
        // The unrouted pipe's peer end was dropped with the request.
        assert!(pipe.recv().await.is_none());
    }

    #[tokio::test]
    async fn application_channel_links_shell_and_application() {
        let (shell, mut application) = application_channel();

        shell
            .app_tx
            .send(ApplicationMessage::Initialize {
                url: Url::parse("test:app").expect("url"),
                args: vec!["--flag".to_string()],
            })
            .expect("send");
        application.shell.ready();

        let message = application.messages.recv().await.expect("message");
        assert!(matches!(
            message,
            ApplicationMessage::Initialize { args, .. } if args == ["--flag"]
        ));

        let mut shell = shell;
        let signal = shell.shell_rx.recv().await.expect("signal");
        assert!(matches!(signal, ShellMessage::Ready));
    }
}
