use std::sync::Arc;
use std::time::Instant;

use flametech_core::discovery::DiscoveryConfig;
use flametech_core::{CommandTopic, Intent, IntentSource};
use flametech_mqtt::{MqttEvent, MqttService};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::controller::{self, Outcome, Reconciler};
use crate::metrics::Metrics;
use crate::publisher::MqttPublisher;

/// A bus intent stamped with the moment it came off the wire.
#[derive(Debug, Clone, Copy)]
pub struct Inbound {
    pub intent: Intent,
    pub received_at: Instant,
}

/// Maps a raw bus message onto an intent, if it is one of ours and usable.
pub fn parse_command(root: &str, topic: &str, payload: &[u8]) -> Option<Intent> {
    let kind = CommandTopic::from_topic(root, topic)?;
    let text = String::from_utf8_lossy(payload);
    let intent = Intent::from_bus(kind, &text);
    if intent.is_none() {
        warn!(topic, payload = %text, "Ignoring unusable command payload");
    }
    intent
}

/// Consumes bus events. Connection changes are handled inline; commands are
/// queued so a slow intent never stalls this loop.
pub async fn consumer_loop(
    mqtt: MqttService,
    publisher: Arc<MqttPublisher>,
    reconciler: Arc<Reconciler>,
    discovery: DiscoveryConfig,
    intents: mpsc::Sender<Inbound>,
    metrics: Arc<Metrics>,
) {
    let mut rx = mqtt.events();
    loop {
        match rx.recv().await {
            Ok(MqttEvent::Connected) => {
                metrics.mqtt_connected.set(1);
                reconciler.mark_bus_connected();
                publisher.announce(&discovery).await;
            }
            Ok(MqttEvent::Disconnected) => metrics.mqtt_connected.set(0),
            Ok(MqttEvent::Publish { topic, payload, retained }) => {
                metrics.mqtt_rx_total.inc();
                let received_at = controller::now();
                let Some(intent) = parse_command(&discovery.root, &topic, &payload) else {
                    continue;
                };
                debug!(topic, retained, ?intent, "Queued bus intent");
                if let Err(e) = intents.try_send(Inbound { intent, received_at }) {
                    warn!(?e, kind = intent.kind(), "Intent queue full; dropping");
                    metrics.record_intent(intent.kind(), "dropped");
                }
            }
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Bus consumer lagged"),
            Err(RecvError::Closed) => {
                info!("Bus event channel closed");
                return;
            }
        }
    }
}

/// The serialized command path for bus intents. Failures end up in the log only.
pub async fn intent_worker(mut intents: mpsc::Receiver<Inbound>, reconciler: Arc<Reconciler>, metrics: Arc<Metrics>) {
    while let Some(Inbound { intent, received_at }) = intents.recv().await {
        match reconciler.handle(intent, IntentSource::Bus, received_at).await {
            Ok(outcome) => {
                match &outcome {
                    Outcome::Applied { commands, .. } => {
                        metrics.commands_dispatched_total.inc_by(commands.len() as u64);
                    }
                    Outcome::Interrupted { commands, error, .. } => {
                        metrics.commands_dispatched_total.inc_by(commands.len() as u64);
                        error!(error = %error, kind = intent.kind(), sent = commands.len(), "Bus intent interrupted");
                    }
                    Outcome::Discarded(_) => {}
                }
                metrics.record_intent(intent.kind(), outcome.label());
            }
            Err(e) => {
                error!(error = %e, kind = intent.kind(), "Bus intent failed");
                metrics.record_intent(intent.kind(), e.kind());
            }
        }
    }
}
