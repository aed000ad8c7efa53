//! Best-effort notifications on STOP and RESUME.

use std::time::Duration;

use serde_json::json;
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("endpoint returned status {0}")]
    Rejected(u16),
}

/// What happened to a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// No endpoint is configured.
    Skipped,
}

pub trait Notifier {
    fn notify(&self, message: &str) -> Result<Delivery, NotifyError>;
}

/// Posts `{"text": message}` to a chat webhook.
pub struct WebhookNotifier {
    url: Option<String>,
    timeout: Duration,
}

impl WebhookNotifier {
    pub fn new(url: Option<String>, timeout: Duration) -> Self {
        Self { url, timeout }
    }
}

impl Notifier for WebhookNotifier {
    #[instrument(skip_all)]
    fn notify(&self, message: &str) -> Result<Delivery, NotifyError> {
        let Some(url) = self.url.as_deref() else {
            debug!("webhook url not configured, skipping notification");
            return Ok(Delivery::Skipped);
        };
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|err| NotifyError::SendFailed(err.to_string()))?;
        let response = client
            .post(url)
            .json(&json!({ "text": message }))
            .send()
            .map_err(|err| NotifyError::SendFailed(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Rejected(status.as_u16()));
        }
        debug!(status = %status, "notification sent");
        Ok(Delivery::Sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_endpoint_is_a_silent_skip() {
        let notifier = WebhookNotifier::new(None, Duration::from_secs(1));
        assert_eq!(notifier.notify("hello").expect("skip"), Delivery::Skipped);
    }

    #[test]
    fn unreachable_endpoint_is_send_failure() {
        // Port 9 on loopback: nothing listens, the connection is refused.
        let notifier = WebhookNotifier::new(
            Some("http://127.0.0.1:9/hook".to_string()),
            Duration::from_secs(2),
        );
        assert!(matches!(
            notifier.notify("hello"),
            Err(NotifyError::SendFailed(_))
        ));
    }
}
