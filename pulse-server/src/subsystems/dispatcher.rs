//! Fire-and-forget delivery of transition notifications.
//!
//! `notify` never waits on the network: it builds the payload and hands it to
//! a tracked task. `shutdown` stops accepting work and drains what is left.

use std::sync::Mutex;
use std::time::Duration;

use pulse_core::config::NotificationConfig;
use pulse_core::notification::{build_payload, NotificationData};
use pulse_core::webhook::{DeliveryError, WebhookClient};
use pulse_core::NotificationDestination;
use thiserror::Error;
use tokio_util::task::TaskTracker;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("failed to build notification payload: {0}")]
    Payload(#[from] serde_json::Error),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ShutdownError {
    #[error("shutdown timed out, some notifications may not have completed")]
    Timeout,
}

pub struct NotificationDispatcher {
    /// `None` when notifications are disabled.
    client: Option<WebhookClient>,
    /// Held while spawning so `shutdown` cannot slip in between the check and the hand-off.
    closed: Mutex<bool>,
    tracker: TaskTracker,
    delivery_timeout: Duration,
}

impl NotificationDispatcher {
    pub fn new(
        destination: NotificationDestination,
        request_timeout: Duration,
        delivery_timeout: Duration,
    ) -> Result<Self, DeliveryError> {
        let client = match destination {
            NotificationDestination::Disabled => None,
            NotificationDestination::Webhook(url) => Some(WebhookClient::new(url, request_timeout)?),
        };
        Ok(Self {
            client,
            closed: Mutex::new(false),
            tracker: TaskTracker::new(),
            delivery_timeout,
        })
    }

    pub fn from_config(config: &NotificationConfig) -> Result<Self, DeliveryError> {
        Self::new(
            config.destination(),
            Duration::from_secs(config.request_timeout_seconds),
            Duration::from_secs(config.delivery_timeout_seconds),
        )
    }

    pub fn disabled() -> Self {
        Self {
            client: None,
            closed: Mutex::new(false),
            tracker: TaskTracker::new(),
            delivery_timeout: Duration::ZERO,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    /// Deliveries spawned and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Queue a delivery and return at once. A no-op when disabled or shut down.
    ///
    /// Must be called from within a tokio runtime.
    pub fn notify(&self, data: &NotificationData) -> Result<(), NotifyError> {
        let Some(client) = &self.client else {
            return Ok(());
        };

        let closed = self.closed.lock().unwrap_or_else(|e| e.into_inner());
        if *closed {
            tracing::debug!(agent_id = %data.agent_id, "Dispatcher closed, dropping notification");
            return Ok(());
        }

        let payload = build_payload(data)?;
        let client = client.clone();
        let deadline = self.delivery_timeout;
        let agent_id = data.agent_id.clone();
        let session_topic = data.session_topic.clone();

        self.tracker.spawn(async move {
            match tokio::time::timeout(deadline, client.send(&payload)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    tracing::error!(%agent_id, %session_topic, error = %e, "Notification delivery failed");
                }
                Err(_) => {
                    tracing::error!(
                        %agent_id,
                        %session_topic,
                        error = %DeliveryError::Timeout(deadline),
                        "Notification delivery failed"
                    );
                }
            }
        });

        drop(closed);
        Ok(())
    }

    /// Stop accepting notifications and wait up to `timeout` for in-flight ones.
    ///
    /// Only the first call drains; later calls return `Ok` at once. Deliveries
    /// still running at the timeout are left alone, not cancelled.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), ShutdownError> {
        {
            let mut closed = self.closed.lock().unwrap_or_else(|e| e.into_inner());
            if *closed {
                return Ok(());
            }
            *closed = true;
        }
        self.tracker.close();

        let pending = self.tracker.len();
        if pending > 0 {
            tracing::info!(pending, "Waiting for in-flight notifications");
        }

        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => Ok(()),
            Err(_) => {
                tracing::warn!(
                    remaining = self.tracker.len(),
                    ?timeout,
                    "Dispatcher shutdown timed out"
                );
                Err(ShutdownError::Timeout)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pulse_core::Status;
    use std::time::Instant;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample() -> NotificationData {
        NotificationData {
            agent_id: "agent-1".to_string(),
            agent_name: "Agent One".to_string(),
            session_topic: "deploy".to_string(),
            from_status: Status::Running,
            to_status: Status::Failed,
            timestamp: Utc::now(),
            message: Some("exit code 1".to_string()),
            content: None,
            duration: chrono::Duration::seconds(42),
        }
    }

    fn dispatcher_for(server: &MockServer) -> NotificationDispatcher {
        NotificationDispatcher::new(
            NotificationDestination::Webhook(format!("{}/hook", server.uri())),
            Duration::from_secs(5),
            Duration::from_secs(30),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_disabled_is_noop() {
        let dispatcher = NotificationDispatcher::new(
            NotificationDestination::Disabled,
            Duration::from_secs(5),
            Duration::from_secs(30),
        )
        .unwrap();

        assert!(!dispatcher.is_enabled());
        dispatcher.notify(&sample()).unwrap();
        assert_eq!(dispatcher.in_flight(), 0);
        assert!(dispatcher.shutdown(Duration::from_millis(10)).await.is_ok());
    }

    #[tokio::test]
    async fn test_notify_returns_before_delivery_completes() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .expect(1)
            .mount(&mock_server)
            .await;

        let dispatcher = dispatcher_for(&mock_server);
        let started = Instant::now();
        dispatcher.notify(&sample()).unwrap();
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(dispatcher.in_flight(), 1);

        dispatcher.shutdown(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_deliveries() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300)))
            .expect(2)
            .mount(&mock_server)
            .await;

        let dispatcher = dispatcher_for(&mock_server);
        dispatcher.notify(&sample()).unwrap();
        dispatcher.notify(&sample()).unwrap();

        let started = Instant::now();
        dispatcher.shutdown(Duration::from_secs(5)).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(250));
        assert_eq!(dispatcher.in_flight(), 0);
        assert_eq!(mock_server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_timeout_reports_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&mock_server)
            .await;

        let dispatcher = dispatcher_for(&mock_server);
        dispatcher.notify(&sample()).unwrap();

        let result = dispatcher.shutdown(Duration::from_millis(100)).await;
        assert_eq!(result, Err(ShutdownError::Timeout));
        assert_eq!(
            result.unwrap_err().to_string(),
            "shutdown timed out, some notifications may not have completed"
        );
    }

    #[tokio::test]
    async fn test_shutdown_twice_is_ok() {
        let mock_server = MockServer::start().await;
        let dispatcher = dispatcher_for(&mock_server);

        assert!(dispatcher.shutdown(Duration::from_secs(1)).await.is_ok());
        assert!(dispatcher.shutdown(Duration::from_secs(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_after_timed_out_drain_returns_at_once() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&mock_server)
            .await;

        let dispatcher = dispatcher_for(&mock_server);
        dispatcher.notify(&sample()).unwrap();

        assert_eq!(
            dispatcher.shutdown(Duration::from_millis(100)).await,
            Err(ShutdownError::Timeout)
        );

        let started = Instant::now();
        assert_eq!(dispatcher.shutdown(Duration::from_millis(500)).await, Ok(()));
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_notify_after_shutdown_is_dropped() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&mock_server)
            .await;

        let dispatcher = dispatcher_for(&mock_server);
        dispatcher.shutdown(Duration::from_secs(1)).await.unwrap();

        dispatcher.notify(&sample()).unwrap();
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_failing_receiver_gets_three_attempts_caller_sees_ok() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&mock_server)
            .await;

        let dispatcher = dispatcher_for(&mock_server);
        assert!(dispatcher.notify(&sample()).is_ok());
        dispatcher.shutdown(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_delivery_deadline_cuts_off_retries() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let dispatcher = NotificationDispatcher::new(
            NotificationDestination::Webhook(format!("{}/hook", mock_server.uri())),
            Duration::from_secs(5),
            Duration::from_millis(50),
        )
        .unwrap();
        dispatcher.notify(&sample()).unwrap();
        dispatcher.shutdown(Duration::from_secs(1)).await.unwrap();

        assert_eq!(mock_server.received_requests().await.unwrap().len(), 1);
    }
}
