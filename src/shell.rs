//! Per-instance shell multiplexer.
//!
//! One task per running instance, bound to the broker-side end of its
//! application channel. Inbound `ConnectToApplication` requests are routed
//! back into the broker so hosted applications can reach other applications;
//! channel closure is reported as an instance error. Events carry the
//! instance id so the broker can discard anything from a torn-down instance.

use tokio::sync::mpsc;
use url::Url;
use uuid::Uuid;

use crate::broker::protocol::BrokerEvent;
use crate::channel::ShellMessage;

pub(crate) fn spawn_shell_multiplexer(
    instance_id: Uuid,
    instance_url: Url,
    mut shell_rx: mpsc::UnboundedReceiver<ShellMessage>,
    event_tx: mpsc::UnboundedSender<BrokerEvent>,
) {
    tokio::spawn(async move {
        while let Some(message) = shell_rx.recv().await {
            let event = match message {
                ShellMessage::Ready => BrokerEvent::InstanceReady { instance_id },
                ShellMessage::ConnectToApplication {
                    url,
                    services,
                    exposed_services,
                } => BrokerEvent::Connect {
                    application_url: url,
                    requestor_url: instance_url.clone(),
                    services,
                    exposed_services,
                    reply: None,
                },
            };
            if event_tx.send(event).is_err() {
                return;
            }
        }

        tracing::debug!(url = %instance_url, "application channel closed");
        let _ = event_tx.send(BrokerEvent::InstanceError { instance_id });
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::application_channel;

    #[tokio::test]
    async fn ready_and_connect_reenter_the_broker_sequence() {
        let (shell, application) = application_channel();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let id = Uuid::now_v7();
        let url = Url::parse("test:app").expect("url");

        spawn_shell_multiplexer(id, url.clone(), shell.shell_rx, event_tx);

        application.shell.ready();
        application.shell.connect_to_application(
            Url::parse("test:other").expect("url"),
            None,
            None,
        );

        assert!(matches!(
            event_rx.recv().await.expect("event"),
            BrokerEvent::InstanceReady { instance_id } if instance_id == id
        ));
        assert!(matches!(
            event_rx.recv().await.expect("event"),
            BrokerEvent::Connect { application_url, requestor_url, .. }
                if application_url.as_str() == "test:other" && requestor_url == url
        ));
    }

    #[tokio::test]
    async fn closed_channel_reports_instance_error() {
        let (shell, application) = application_channel();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let id = Uuid::now_v7();

        spawn_shell_multiplexer(
            id,
            Url::parse("test:app").expect("url"),
            shell.shell_rx,
            event_tx,
        );
        drop(application);

        assert!(matches!(
            event_rx.recv().await.expect("event"),
            BrokerEvent::InstanceError { instance_id } if instance_id == id
        ));
    }
}
