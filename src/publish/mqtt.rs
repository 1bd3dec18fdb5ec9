use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Packet, QoS};
use serde_json::Value;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::{StatePublisher, STATUS_TOPIC};
use crate::config::MqttConfig;

/// Retained state messages under `<topic_prefix>/`, with online/offline availability.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
    prefix: String,
}

impl MqttPublisher {
    /// Connect and drive the event loop on a background task.
    pub fn start(cfg: &MqttConfig) -> (Self, JoinHandle<()>) {
        let prefix = cfg.topic_prefix.trim_end_matches('/').to_string();
        let mut opts = MqttOptions::new(&cfg.client_id, &cfg.host, cfg.port);
        opts.set_keep_alive(Duration::from_secs(30));
        if let (Some(user), Some(pass)) = (&cfg.username, &cfg.password) {
            opts.set_credentials(user, pass);
        }
        opts.set_last_will(LastWill::new(
            format!("{prefix}/{STATUS_TOPIC}"),
            b"offline".to_vec(),
            QoS::AtLeastOnce,
            true,
        ));

        let (client, eventloop) = AsyncClient::new(opts, 20);
        let publisher = Self::from_client(client, prefix);
        let handle = tokio::spawn(drive(eventloop, publisher.clone()));
        info!(host = %cfg.host, port = cfg.port, "mqtt publisher started");
        (publisher, handle)
    }

    pub fn from_client(client: AsyncClient, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
        }
    }

    pub fn topic(&self, relative: &str) -> String {
        format!("{}/{}", self.prefix, relative)
    }

    async fn announce(&self, status: &'static str) {
        if let Err(e) = self
            .client
            .publish(self.topic(STATUS_TOPIC), QoS::AtLeastOnce, true, status.as_bytes().to_vec())
            .await
        {
            warn!(status, "mqtt availability publish failed: {e}");
        }
    }

    /// Best-effort offline announcement before shutdown.
    pub async fn shutdown(&self) {
        self.announce("offline").await;
        let _ = self.client.disconnect().await;
    }
}

async fn drive(mut eventloop: EventLoop, publisher: MqttPublisher) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("mqtt connected");
                publisher.announce("online").await;
            }
            Ok(Event::Incoming(Packet::Disconnect)) => warn!("mqtt disconnected"),
            Ok(_) => {}
            Err(e) => {
                error!("mqtt connection error: {e}");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }
}

#[async_trait]
impl StatePublisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: &Value) {
        let bytes = match serde_json::to_vec(payload) {
            Ok(b) => b,
            Err(e) => {
                warn!(topic, "mqtt payload not serializable: {e}");
                return;
            }
        };
        if let Err(e) = self
            .client
            .publish(self.topic(topic), QoS::AtLeastOnce, true, bytes)
            .await
        {
            warn!(topic, "mqtt publish failed: {e}");
        }
    }
}
