use crate::status::TrackerError;
use serde_json::Value;

pub mod emitter;
pub mod envelope;
pub mod hub;
pub mod ingest;
pub mod webhook;
pub mod websocket;

pub use emitter::{Broadcaster, EmitRequest, RetryPolicy};
pub use envelope::{EnvelopeStatus, UpdateEnvelope};
pub use hub::{Subscription, TopicHub};
pub use ingest::{IngestError, PublishRequest};
pub use webhook::WebhookPublisher;
pub use websocket::{parse_subscribe_frame, WebSocketHub, WebSocketServerHandle};

pub const DEFAULT_TOPIC_PREFIX: &str = "hypothesis_";

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("publish to `{topic}` failed: {reason}")]
    Transport { topic: String, reason: String },
    #[error("topic registry lock poisoned")]
    Poisoned,
}

#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error("failed to encode update envelope: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("giving up on topic `{topic}` after {attempts} attempts: {source}")]
    PublishFailed {
        topic: String,
        attempts: u32,
        #[source]
        source: PublishError,
    },
}

/// Publish side of a publish/subscribe transport. Subscribers join topics
/// independently of the publisher.
pub trait Publisher: Send + Sync {
    fn publish(&self, topic: &str, payload: &Value) -> Result<(), PublishError>;
}

pub fn topic_for(prefix: &str, instance_id: &str) -> String {
    format!("{prefix}{instance_id}")
}
