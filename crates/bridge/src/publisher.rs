use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use flametech_core::discovery::DiscoveryConfig;
use flametech_core::topics::{self, PAYLOAD_OFFLINE, PAYLOAD_ONLINE};
use flametech_core::{DeviceState, ThermostatSnapshot};
use flametech_mqtt::MqttService;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::metrics::Metrics;

/// Outbound side of the local bus. Publishing is retained and last-value-wins,
/// so failures are logged and never bubble up.
#[async_trait]
pub trait StatePublisher: Send + Sync {
    async fn publish_state(&self, state: &DeviceState, thermostat: &ThermostatSnapshot);
    async fn publish_heartbeat(&self, at: DateTime<Utc>);
}

pub struct MqttPublisher {
    mqtt: MqttService,
    root: String,
    metrics: Arc<Metrics>,
}

impl MqttPublisher {
    pub fn new(mqtt: MqttService, root: impl Into<String>, metrics: Arc<Metrics>) -> Self {
        Self { mqtt, root: root.into(), metrics }
    }

    async fn send(&self, topic: &str, payload: impl Into<Vec<u8>>) {
        match self.mqtt.publish_retained(topic, payload).await {
            Ok(()) => self.metrics.mqtt_tx_total.inc(),
            Err(e) => warn!(?e, topic, "MQTT publish failed"),
        }
    }

    async fn send_json<T: Serialize>(&self, topic: &str, value: &T) {
        match serde_json::to_vec(value) {
            Ok(body) => self.send(topic, body).await,
            Err(e) => warn!(?e, topic, "Failed to serialize payload"),
        }
    }

    /// Discovery documents plus `online`; run on every bus (re)connect.
    pub async fn announce(&self, discovery: &DiscoveryConfig) {
        let docs = discovery.documents();
        for doc in &docs {
            self.send_json(&doc.topic, &doc.payload).await;
        }
        self.send(&topics::availability_topic(&self.root), PAYLOAD_ONLINE).await;
        info!(documents = docs.len(), "Published discovery and availability");
    }

    pub async fn mark_offline(&self) {
        self.send(&topics::availability_topic(&self.root), PAYLOAD_OFFLINE).await;
    }
}

#[async_trait]
impl StatePublisher for MqttPublisher {
    async fn publish_state(&self, state: &DeviceState, thermostat: &ThermostatSnapshot) {
        self.send_json(&topics::state_topic(&self.root), state).await;
        self.send_json(&topics::thermostat_state_topic(&self.root), thermostat).await;
        debug!(mode = ?state.mode, ambient = state.ambient_temp_f, target = thermostat.target_temp_f, "Published state");
    }

    async fn publish_heartbeat(&self, at: DateTime<Utc>) {
        let ts = at.to_rfc3339_opts(SecondsFormat::Secs, true);
        self.send(&topics::heartbeat_topic(&self.root), ts).await;
    }
}
