use super::{PublishError, Publisher};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug)]
struct Subscriber {
    id: u64,
    sender: Sender<Value>,
}

#[derive(Debug, Default)]
struct HubState {
    topics: HashMap<String, Vec<Subscriber>>,
}

/// In-process topic fan-out. Cloning shares the same topic registry.
#[derive(Debug, Clone, Default)]
pub struct TopicHub {
    state: Arc<Mutex<HubState>>,
    next_id: Arc<AtomicU64>,
}

/// Receiving end of one topic membership. Dropping it leaves the topic the
/// next time something is published there.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    topic: String,
    receiver: Receiver<Value>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn try_recv(&self) -> Result<Value, TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<Value, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

impl TopicHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, topic: &str) -> Result<Subscription, PublishError> {
        let (sender, receiver) = mpsc::channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock()?
            .topics
            .entry(topic.to_string())
            .or_default()
            .push(Subscriber { id, sender });
        Ok(Subscription {
            id,
            topic: topic.to_string(),
            receiver,
        })
    }

    pub fn unsubscribe(&self, subscription: &Subscription) -> Result<(), PublishError> {
        let mut state = self.lock()?;
        if let Some(subscribers) = state.topics.get_mut(subscription.topic()) {
            subscribers.retain(|subscriber| subscriber.id != subscription.id());
            if subscribers.is_empty() {
                state.topics.remove(subscription.topic());
            }
        }
        Ok(())
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.lock()
            .map(|state| state.topics.get(topic).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, HubState>, PublishError> {
        self.state.lock().map_err(|_| PublishError::Poisoned)
    }
}

impl Publisher for TopicHub {
    /// Delivers to every live subscriber; an empty topic is not an error.
    fn publish(&self, topic: &str, payload: &Value) -> Result<(), PublishError> {
        let mut state = self.lock()?;
        if let Some(subscribers) = state.topics.get_mut(topic) {
            subscribers.retain(|subscriber| subscriber.sender.send(payload.clone()).is_ok());
            if subscribers.is_empty() {
                state.topics.remove(topic);
            }
        }
        Ok(())
    }
}
