//! Fire-and-forget mirroring of controller state to a message bus.

#[cfg(feature = "mqtt")]
pub mod mqtt;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

#[cfg(feature = "mqtt")]
pub use mqtt::MqttPublisher;

pub const STATE_TOPIC: &str = "state";
pub const STATUS_TOPIC: &str = "status";

/// Topic carrying one device's runtime view, relative to the bus prefix.
pub fn device_topic(name: &str) -> String {
    let slug: String = name
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    format!("devices/{slug}/state")
}

/// Publishing never fails the caller; implementations log and drop.
#[async_trait]
pub trait StatePublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: &Value);
}

/// Used when no bus is configured.
#[derive(Debug, Default)]
pub struct NullPublisher;

#[async_trait]
impl StatePublisher for NullPublisher {
    async fn publish(&self, _topic: &str, _payload: &Value) {}
}

/// Keeps every message in memory.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    messages: Mutex<Vec<(String, Value)>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn messages(&self) -> Vec<(String, Value)> {
        self.messages.lock().await.clone()
    }

    pub async fn last_on(&self, topic: &str) -> Option<Value> {
        self.messages
            .lock()
            .await
            .iter()
            .rev()
            .find(|(t, _)| t == topic)
            .map(|(_, v)| v.clone())
    }
}

#[async_trait]
impl StatePublisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: &Value) {
        self.messages.lock().await.push((topic.to_string(), payload.clone()));
    }
}
