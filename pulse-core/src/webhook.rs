//! Outbound webhook delivery with bounded exponential-backoff retry.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use thiserror::Error;
use tokio_retry::Retry;

/// Total attempts, including the first one.
pub const MAX_ATTEMPTS: usize = 3;

pub const BASE_BACKOFF: Duration = Duration::from_millis(100);

pub const BACKOFF_FACTOR: u32 = 2;

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webhook responded with status {code}: {body}")]
    Status { code: u16, body: String },

    #[error("max retries exceeded after {attempts} attempts: {last}")]
    RetryExhausted { attempts: usize, last: String },

    #[error("delivery deadline of {0:?} elapsed")]
    Timeout(Duration),
}

/// Delays slept between consecutive attempts: 100ms, 200ms, ...
///
/// No jitter: receivers and tests rely on the fixed schedule.
pub fn backoff_schedule() -> impl Iterator<Item = Duration> {
    (0..MAX_ATTEMPTS.saturating_sub(1) as u32).map(|n| BASE_BACKOFF * BACKOFF_FACTOR.pow(n))
}

#[derive(Debug, Clone)]
pub struct WebhookClient {
    client: Client,
    url: String,
}

impl WebhookClient {
    /// `request_timeout` bounds a single attempt, not the whole retry sequence.
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, DeliveryError> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// POST `payload` until a 2xx arrives or [`MAX_ATTEMPTS`] are spent.
    ///
    /// Returns the number of attempts used on success. Dropping the returned
    /// future (e.g. from an enclosing `tokio::time::timeout`) aborts an
    /// in-progress backoff sleep immediately.
    pub async fn send(&self, payload: &[u8]) -> Result<usize, DeliveryError> {
        let attempts = AtomicUsize::new(0);

        let result = Retry::spawn(backoff_schedule(), || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            self.send_once(payload, attempt)
        })
        .await;

        let used = attempts.load(Ordering::SeqCst);
        match result {
            Ok(()) => {
                tracing::info!(url = %self.url, attempt = used, "Webhook notification delivered");
                Ok(used)
            }
            Err(e) => {
                tracing::error!(
                    url = %self.url,
                    attempts = used,
                    error = %e,
                    "Webhook notification failed, giving up"
                );
                Err(DeliveryError::RetryExhausted {
                    attempts: used,
                    last: e.to_string(),
                })
            }
        }
    }

    async fn send_once(&self, payload: &[u8], attempt: usize) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(payload.to_vec())
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(attempt, max = MAX_ATTEMPTS, error = %e, "Webhook request failed");
                DeliveryError::Http(e)
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        tracing::warn!(
            attempt,
            max = MAX_ATTEMPTS,
            code = status.as_u16(),
            body = %body,
            "Webhook responded with non-success status"
        );
        Err(DeliveryError::Status {
            code: status.as_u16(),
            body,
        })
    }
}
