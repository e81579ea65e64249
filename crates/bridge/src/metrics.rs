use std::sync::Arc;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, TextEncoder};

pub struct Metrics {
    pub mqtt_connected: IntGauge,
    pub mqtt_rx_total: IntCounter,
    pub mqtt_tx_total: IntCounter,
    pub intents_total: IntCounterVec,        // labels: kind, outcome
    pub commands_dispatched_total: IntCounter,
    pub poll_failures_total: IntCounterVec,  // label: kind
    pub last_poll_success: IntGauge,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        let mqtt_connected = IntGauge::new("flametech_mqtt_connected", "MQTT connection status (1 connected, 0 otherwise)").unwrap();
        let mqtt_rx_total = IntCounter::new("flametech_mqtt_messages_received_total", "Total MQTT messages received").unwrap();
        let mqtt_tx_total = IntCounter::new("flametech_mqtt_messages_published_total", "Total MQTT messages published").unwrap();
        let intents_total = IntCounterVec::new(
            Opts::new("flametech_intents_total", "Inbound intents by kind and outcome"),
            &["kind", "outcome"],
        ).unwrap();
        let commands_dispatched_total = IntCounter::new("flametech_commands_dispatched_total", "Command strings sent to the cloud shadow").unwrap();
        let poll_failures_total = IntCounterVec::new(
            Opts::new("flametech_poll_failures_total", "Failed poll cycles by error kind"),
            &["kind"],
        ).unwrap();
        let last_poll_success = IntGauge::new("flametech_last_poll_success", "Epoch seconds of the last successful poll").unwrap();

        let registry = prometheus::default_registry();
        let _ = registry.register(Box::new(mqtt_connected.clone()));
        let _ = registry.register(Box::new(mqtt_rx_total.clone()));
        let _ = registry.register(Box::new(mqtt_tx_total.clone()));
        let _ = registry.register(Box::new(intents_total.clone()));
        let _ = registry.register(Box::new(commands_dispatched_total.clone()));
        let _ = registry.register(Box::new(poll_failures_total.clone()));
        let _ = registry.register(Box::new(last_poll_success.clone()));

        Arc::new(Self {
            mqtt_connected,
            mqtt_rx_total,
            mqtt_tx_total,
            intents_total,
            commands_dispatched_total,
            poll_failures_total,
            last_poll_success,
        })
    }

    pub fn record_intent(&self, kind: &str, outcome: &str) {
        self.intents_total.with_label_values(&[kind, outcome]).inc();
    }

    pub fn has_polled(&self) -> bool {
        self.last_poll_success.get() > 0
    }
}

/// Text exposition of the default registry.
pub fn render() -> (String, Vec<u8>) {
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buf) {
        tracing::warn!(?e, "Failed to encode metrics");
    }
    (encoder.format_type().to_string(), buf)
}
