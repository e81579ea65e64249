use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use flametech_core::topics::{availability_topic, command_wildcard, PAYLOAD_OFFLINE};
use flametech_mqtt::{MqttConfig, MqttService};
use rumqttc::QoS;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod api;
mod bus;
mod cloud;
mod config;
mod controller;
mod metrics;
mod poller;
mod publisher;
#[cfg(test)]
mod testing;

use crate::cloud::CloudClient;
use crate::config::{BridgeConfig, CloudConfig};
use crate::controller::{Reconciler, Timing};
use crate::metrics::Metrics;
use crate::publisher::MqttPublisher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    init_tracing();

    let bridge_cfg = BridgeConfig::from_env();
    let cloud_cfg = CloudConfig::from_env();
    let discovery = bridge_cfg.discovery();

    let mqtt_cfg = MqttConfig::from_env()
        .with_last_will(availability_topic(&bridge_cfg.topic_root), PAYLOAD_OFFLINE);
    info!(host = %mqtt_cfg.host, port = mqtt_cfg.port, "Configuring MQTT client");
    let mqtt = MqttService::connect(mqtt_cfg);

    let commands = command_wildcard(&bridge_cfg.topic_root);
    if let Err(e) = mqtt.subscribe(&commands, QoS::AtLeastOnce).await {
        warn!(?e, topic = %commands, "Failed to subscribe to command topics");
    }

    let metrics = Metrics::new();
    let cloud = Arc::new(CloudClient::new(cloud_cfg).context("building cloud client")?);
    let publisher = Arc::new(MqttPublisher::new(mqtt.clone(), bridge_cfg.topic_root.clone(), metrics.clone()));
    let timing = Timing { windows: bridge_cfg.windows, settle_delay: bridge_cfg.settle_delay };
    let reconciler = Arc::new(Reconciler::new(cloud.clone(), publisher.clone(), timing));

    let (intents_tx, intents_rx) = mpsc::channel(32);
    tokio::spawn(bus::consumer_loop(
        mqtt.clone(),
        publisher.clone(),
        reconciler.clone(),
        discovery,
        intents_tx,
        metrics.clone(),
    ));
    tokio::spawn(bus::intent_worker(intents_rx, reconciler.clone(), metrics.clone()));
    tokio::spawn(poller::run(cloud, reconciler.clone(), metrics.clone(), bridge_cfg.poll_interval));

    let app = api::router(api::AppState { reconciler, mqtt: mqtt.clone(), metrics });

    info!(addr = %bridge_cfg.http_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(bridge_cfg.http_addr)
        .await
        .with_context(|| format!("binding {}", bridge_cfg.http_addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")?;

    info!("Shutting down");
    publisher.mark_offline().await;
    if let Err(e) = mqtt.disconnect().await {
        warn!(?e, "MQTT disconnect failed");
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,hyper=info,rumqttc=warn"))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(?e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!(?e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
