use super::{PublishError, Publisher};
use serde_json::Value;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Publishes envelopes to an out-of-process gateway by POSTing them to
/// `<base_url>/topics/<topic>`.
#[derive(Debug, Clone)]
pub struct WebhookPublisher {
    base_url: String,
    timeout: Duration,
}

impl WebhookPublisher {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn endpoint(&self, topic: &str) -> String {
        format!(
            "{}/topics/{}",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(topic)
        )
    }
}

impl Publisher for WebhookPublisher {
    fn publish(&self, topic: &str, payload: &Value) -> Result<(), PublishError> {
        ureq::post(&self.endpoint(topic))
            .timeout(self.timeout)
            .send_json(payload.clone())
            .map_err(|err| PublishError::Transport {
                topic: topic.to_string(),
                reason: err.to_string(),
            })?;
        Ok(())
    }
}
