use std::sync::{Arc, Mutex as StdMutex, atomic::{AtomicBool, Ordering}};
use std::time::Duration;
use std::collections::HashMap;

use flametech_core::Backoff;
use rumqttc::{AsyncClient, ClientError, Event, EventLoop, Incoming, LastWill as WillMessage, MqttOptions, Outgoing, QoS};
use tokio::sync::{broadcast, RwLock, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::MqttConfig;

#[derive(Debug, Clone)]
pub enum MqttEvent {
    Connected,
    Disconnected,
    Publish { topic: String, payload: Vec<u8>, retained: bool },
}

/// Shared handle to the bus connection. Clones talk to the same client.
#[derive(Clone)]
pub struct MqttService {
    client: Arc<Mutex<AsyncClient>>,
    ready: Arc<AtomicBool>,
    events_tx: broadcast::Sender<MqttEvent>,
    // Opened before the loop starts so the first consumer also sees the first ConnAck.
    first_events: Arc<StdMutex<Option<broadcast::Receiver<MqttEvent>>>>,
    subscriptions: Arc<RwLock<HashMap<String, QoS>>>,
    _loop_handle: Arc<JoinHandle<()>>,
}

impl MqttService {
    /// Spawns the connection loop; must be called inside a tokio runtime.
    pub fn connect(config: MqttConfig) -> Self {
        let (client, eventloop) = build_client(&config);
        let ready = Arc::new(AtomicBool::new(false));
        let (tx, first_rx) = broadcast::channel(256);
        let subscriptions = Arc::new(RwLock::new(HashMap::new()));
        let client_shared = Arc::new(Mutex::new(client));

        let loop_handle = tokio::spawn(run_eventloop(
            eventloop,
            client_shared.clone(),
            ready.clone(),
            tx.clone(),
            subscriptions.clone(),
            config,
        ));

        Self {
            client: client_shared,
            ready,
            events_tx: tx,
            first_events: Arc::new(StdMutex::new(Some(first_rx))),
            subscriptions,
            _loop_handle: Arc::new(loop_handle),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    /// The first caller gets every event since [`MqttService::connect`];
    /// later callers only see events from now on.
    pub fn events(&self) -> broadcast::Receiver<MqttEvent> {
        let mut first = self.first_events.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        first.take().unwrap_or_else(|| self.events_tx.subscribe())
    }

    pub async fn publish<T: Into<Vec<u8>>>(&self, topic: &str, qos: QoS, retain: bool, payload: T) -> Result<(), ClientError> {
        let client = self.client.lock().await;
        client.publish(topic, qos, retain, payload).await
    }

    /// Every topic the bridge produces is retained, last value wins.
    pub async fn publish_retained<T: Into<Vec<u8>>>(&self, topic: &str, payload: T) -> Result<(), ClientError> {
        self.publish(topic, QoS::AtLeastOnce, true, payload).await
    }

    /// Subscribes now and again after every reconnect.
    pub async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), ClientError> {
        let client = self.client.lock().await;
        let result = client.subscribe(topic, qos).await;
        if result.is_ok() {
            self.subscriptions.write().await.insert(topic.to_string(), qos);
        }
        result
    }

    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.ready.store(false, Ordering::Relaxed);
        let client = self.client.lock().await;
        client.disconnect().await
    }
}

fn build_client(config: &MqttConfig) -> (AsyncClient, EventLoop) {
    let mut opts = MqttOptions::new(&config.client_id, &config.host, config.port);
    opts.set_keep_alive(Duration::from_secs(config.keep_alive_secs as u64));
    opts.set_clean_session(config.clean_session);
    if let (Some(u), Some(p)) = (&config.username, &config.password) {
        opts.set_credentials(u.clone(), p.clone());
    }
    if let Some(will) = &config.last_will {
        opts.set_last_will(WillMessage::new(will.topic.clone(), will.payload.clone(), QoS::AtLeastOnce, true));
    }
    opts.set_request_channel_capacity(64);
    AsyncClient::new(opts, 64)
}

async fn run_eventloop(
    mut eventloop: EventLoop,
    client_shared: Arc<Mutex<AsyncClient>>,
    ready: Arc<AtomicBool>,
    events_tx: broadcast::Sender<MqttEvent>,
    subscriptions: Arc<RwLock<HashMap<String, QoS>>>,
    config: MqttConfig,
) {
    let mut backoff = Backoff::default();
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                info!(host = %config.host, port = config.port, "MQTT connected");
                ready.store(true, Ordering::Relaxed);
                backoff.reset();

                // Restore tracked subscriptions before anyone reacts to Connected
                {
                    let subs = subscriptions.read().await;
                    let client = client_shared.lock().await;
                    for (topic, qos) in subs.iter() {
                        debug!(topic, "Restoring subscription");
                        if let Err(err) = client.subscribe(topic, *qos).await {
                            warn!(?err, topic, "Failed to restore subscription");
                        }
                    }
                }
                let _ = events_tx.send(MqttEvent::Connected);
            }
            Ok(Event::Incoming(Incoming::Publish(p))) => {
                let _ = events_tx.send(MqttEvent::Publish {
                    topic: p.topic.to_string(),
                    payload: p.payload.to_vec(),
                    retained: p.retain,
                });
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                warn!("MQTT disconnect requested");
                ready.store(false, Ordering::Relaxed);
                let _ = events_tx.send(MqttEvent::Disconnected);
                return;
            }
            Ok(other) => {
                debug!(?other, "MQTT event");
            }
            Err(e) => {
                let wait = backoff.next_delay();
                error!(error = ?e, wait_secs = wait.as_secs_f32(), "MQTT error; will attempt reconnect");
                if ready.swap(false, Ordering::Relaxed) {
                    let _ = events_tx.send(MqttEvent::Disconnected);
                }
                sleep(wait).await;

                // Fresh client and eventloop; the next poll dials the broker again
                let (new_client, new_eventloop) = build_client(&config);
                eventloop = new_eventloop;
                *client_shared.lock().await = new_client;
                info!("MQTT client rebuilt, attempting reconnection");
            }
        }
    }
}
