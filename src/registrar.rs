//! Unix-socket registrar for externally launched applications.
//!
//! Processes the broker did not load can still join the instance table: they
//! connect to the registrar's socket, register a URL, and from then on act as
//! the running instance for it. The wire format is newline-delimited JSON,
//! one request or event per line. The socket's lifetime is the registration's
//! lifetime: when the peer disconnects, the broker observes the channel
//! closing and tears the instance down.
//!
//! The socket carries registration, readiness, and connection notifications.
//! Service pipes themselves are in-process values and do not cross it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{unix::OwnedWriteHalf, UnixListener, UnixStream};
use url::Url;

use crate::broker::Broker;
use crate::channel::{application_channel, ApplicationEndpoint, ApplicationMessage};
use crate::error::{BrokerError, BrokerResult};
use crate::utils::time::now_rfc3339;

#[derive(Debug, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
enum RegistrarRequest {
    /// Claim `url` and become its running instance.
    Register {
        url: Url,
        #[serde(default)]
        args: Vec<String>,
    },
    /// Signal readiness. External registrations start out ready, so this is
    /// accepted for symmetry with loaded applications.
    Ready,
    /// Ask the broker for a connection to another application.
    ConnectToApplication { url: Url },
}

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum RegistrarEvent {
    Registered {
        url: Url,
        args: Vec<String>,
        registered_at: String,
    },
    /// A client connected to the registered application.
    Connection {
        requestor_url: Url,
        resolved_url: Url,
    },
    Error {
        message: String,
    },
}

/// Listens on a unix socket and registers connecting processes with the
/// broker. Dropping the registrar stops accepting; live registrations keep
/// their connections.
pub struct ExternalApplicationRegistrar {
    path: PathBuf,
    accept_task: tokio::task::JoinHandle<()>,
}

impl ExternalApplicationRegistrar {
    /// Binds the socket at `path` and starts accepting registrations.
    pub fn bind(path: &Path, broker: Broker) -> BrokerResult<Self> {
        let listener = UnixListener::bind(path).map_err(|error| {
            BrokerError::Internal(format!(
                "failed to bind registrar socket {}: {error}",
                path.display()
            ))
        })?;
        tracing::debug!(path = %path.display(), "registrar listening");

        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        let broker = broker.clone();
                        tokio::spawn(async move {
                            serve_connection(stream, broker).await;
                        });
                    }
                    Err(error) => {
                        tracing::warn!(error = %error, "registrar accept failed");
                        return;
                    }
                }
            }
        });

        Ok(Self {
            path: path.to_path_buf(),
            accept_task,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ExternalApplicationRegistrar {
    fn drop(&mut self) {
        self.accept_task.abort();
        let _ = std::fs::remove_file(&self.path);
    }
}

/// One registration connection: requests in, events out, until EOF.
async fn serve_connection(stream: UnixStream, broker: Broker) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    // Set by a successful register request. Dropped with the connection,
    // which is what signals the instance error to the broker.
    let mut application: Option<ApplicationEndpoint> = None;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) | Err(_) => return,
                };
                if line.trim().is_empty() {
                    continue;
                }
                let event = match serde_json::from_str(&line) {
                    Ok(request) => handle_request(request, &broker, &mut application).await,
                    Err(error) => Some(RegistrarEvent::Error {
                        message: format!("malformed request: {error}"),
                    }),
                };
                if let Some(event) = event {
                    if write_event(&mut write_half, &event).await.is_err() {
                        return;
                    }
                }
            }
            message = next_message(&mut application) => {
                let Some(message) = message else {
                    // Broker side dropped the channel (teardown or terminate).
                    return;
                };
                if let Some(event) = event_for_message(message) {
                    if write_event(&mut write_half, &event).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

async fn handle_request(
    request: RegistrarRequest,
    broker: &Broker,
    application: &mut Option<ApplicationEndpoint>,
) -> Option<RegistrarEvent> {
    match request {
        RegistrarRequest::Register { url, args } => {
            if application.is_some() {
                return Some(RegistrarEvent::Error {
                    message: "connection already registered".to_string(),
                });
            }
            let (shell, endpoint) = application_channel();
            if !args.is_empty() {
                if let Err(error) = broker.set_args_for_url(args.clone(), url.clone()) {
                    return Some(RegistrarEvent::Error {
                        message: error.to_string(),
                    });
                }
            }
            match broker.register_external_application(url.clone(), shell).await {
                Ok(()) => {
                    tracing::debug!(url = %url, "external application registered over socket");
                    *application = Some(endpoint);
                    Some(RegistrarEvent::Registered {
                        url,
                        args,
                        registered_at: now_rfc3339(),
                    })
                }
                Err(error) => Some(RegistrarEvent::Error {
                    message: error.to_string(),
                }),
            }
        }
        RegistrarRequest::Ready => match application {
            Some(endpoint) => {
                endpoint.shell.ready();
                None
            }
            None => Some(RegistrarEvent::Error {
                message: "not registered".to_string(),
            }),
        },
        RegistrarRequest::ConnectToApplication { url } => match application {
            Some(endpoint) => {
                endpoint.shell.connect_to_application(url, None, None);
                None
            }
            None => Some(RegistrarEvent::Error {
                message: "not registered".to_string(),
            }),
        },
    }
}

/// Next broker-side message once registered; never resolves before that.
async fn next_message(
    application: &mut Option<ApplicationEndpoint>,
) -> Option<ApplicationMessage> {
    match application {
        Some(endpoint) => endpoint.messages.recv().await,
        None => std::future::pending().await,
    }
}

fn event_for_message(message: ApplicationMessage) -> Option<RegistrarEvent> {
    match message {
        ApplicationMessage::AcceptConnection {
            requestor_url,
            resolved_url,
            ..
        } => Some(RegistrarEvent::Connection {
            requestor_url,
            resolved_url,
        }),
        // External registrations configure themselves before connecting, and
        // the socket carries no content-handler duty.
        ApplicationMessage::Initialize { .. } | ApplicationMessage::RunContent { .. } => None,
    }
}

async fn write_event(
    write_half: &mut OwnedWriteHalf,
    event: &RegistrarEvent,
) -> std::io::Result<()> {
    let mut line = serde_json::to_string(event).map_err(std::io::Error::other)?;
    line.push('\n');
    write_half.write_all(line.as_bytes()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::unix::OwnedReadHalf;

    async fn read_event(lines: &mut tokio::io::Lines<BufReader<OwnedReadHalf>>) -> serde_json::Value {
        let line = lines
            .next_line()
            .await
            .expect("read")
            .expect("line");
        serde_json::from_str(&line).expect("json")
    }

    async fn connect_client(
        path: &Path,
    ) -> (
        tokio::io::Lines<BufReader<OwnedReadHalf>>,
        OwnedWriteHalf,
    ) {
        let stream = UnixStream::connect(path).await.expect("connect");
        let (read_half, write_half) = stream.into_split();
        (BufReader::new(read_half).lines(), write_half)
    }

    async fn send_line(write_half: &mut OwnedWriteHalf, value: serde_json::Value) {
        let mut line = value.to_string();
        line.push('\n');
        write_half.write_all(line.as_bytes()).await.expect("write");
    }

    fn url(value: &str) -> Url {
        Url::parse(value).expect("url")
    }

    #[tokio::test]
    async fn registered_process_receives_connection_events() {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket = dir.path().join("registrar.sock");
        let broker = Broker::builder().spawn();
        let _registrar =
            ExternalApplicationRegistrar::bind(&socket, broker.clone()).expect("bind");

        let (mut lines, mut write_half) = connect_client(&socket).await;
        send_line(
            &mut write_half,
            serde_json::json!({
                "method": "register",
                "url": "test:external",
                "args": ["--mode=server"],
            }),
        )
        .await;

        let event = read_event(&mut lines).await;
        assert_eq!(event["event"], "registered");
        assert_eq!(event["url"], "test:external");
        assert_eq!(event["args"][0], "--mode=server");
        assert!(event["registered_at"].is_string());

        broker
            .connect_to_application(url("test:external"), url("test:requestor"), None, None)
            .await
            .expect("connect");

        let event = read_event(&mut lines).await;
        assert_eq!(event["event"], "connection");
        assert_eq!(event["requestor_url"], "test:requestor");
        assert_eq!(event["resolved_url"], "test:external");
    }

    #[tokio::test]
    async fn duplicate_url_registration_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket = dir.path().join("registrar.sock");
        let broker = Broker::builder().spawn();
        let _registrar = ExternalApplicationRegistrar::bind(&socket, broker).expect("bind");

        let (mut first_lines, mut first_write) = connect_client(&socket).await;
        send_line(
            &mut first_write,
            serde_json::json!({"method": "register", "url": "test:external"}),
        )
        .await;
        assert_eq!(read_event(&mut first_lines).await["event"], "registered");

        let (mut second_lines, mut second_write) = connect_client(&socket).await;
        send_line(
            &mut second_write,
            serde_json::json!({"method": "register", "url": "test:external"}),
        )
        .await;
        let event = read_event(&mut second_lines).await;
        assert_eq!(event["event"], "error");
        assert!(event["message"]
            .as_str()
            .expect("message")
            .contains("already running"));
    }

    #[tokio::test]
    async fn requests_before_registration_are_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket = dir.path().join("registrar.sock");
        let broker = Broker::builder().spawn();
        let _registrar = ExternalApplicationRegistrar::bind(&socket, broker).expect("bind");

        let (mut lines, mut write_half) = connect_client(&socket).await;
        send_line(
            &mut write_half,
            serde_json::json!({"method": "connect_to_application", "url": "test:other"}),
        )
        .await;

        let event = read_event(&mut lines).await;
        assert_eq!(event["event"], "error");
        assert_eq!(event["message"], "not registered");
    }

    #[tokio::test]
    async fn malformed_lines_report_errors_without_closing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket = dir.path().join("registrar.sock");
        let broker = Broker::builder().spawn();
        let _registrar = ExternalApplicationRegistrar::bind(&socket, broker).expect("bind");

        let (mut lines, mut write_half) = connect_client(&socket).await;
        send_line(&mut write_half, serde_json::json!({"method": "launch"})).await;
        let event = read_event(&mut lines).await;
        assert_eq!(event["event"], "error");

        // The connection is still usable.
        send_line(
            &mut write_half,
            serde_json::json!({"method": "register", "url": "test:external"}),
        )
        .await;
        assert_eq!(read_event(&mut lines).await["event"], "registered");
    }

    #[tokio::test]
    async fn disconnect_tears_down_the_registration() {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket = dir.path().join("registrar.sock");
        let broker = Broker::builder().spawn();
        let _registrar =
            ExternalApplicationRegistrar::bind(&socket, broker.clone()).expect("bind");

        let (mut lines, mut write_half) = connect_client(&socket).await;
        send_line(
            &mut write_half,
            serde_json::json!({"method": "register", "url": "test:external"}),
        )
        .await;
        assert_eq!(read_event(&mut lines).await["event"], "registered");

        drop(write_half);
        drop(lines);

        // Teardown is asynchronous; the URL is free again once a new
        // registration for it succeeds.
        let mut reclaimed = false;
        for _ in 0..50 {
            let (shell, _endpoint) = application_channel();
            if broker
                .register_external_application(url("test:external"), shell)
                .await
                .is_ok()
            {
                reclaimed = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(reclaimed, "registration was never torn down");
    }
}
