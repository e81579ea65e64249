use std::sync::Arc;
use std::time::Duration;

use flametech_core::Backoff;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::cloud::CloudClient;
use crate::controller::Reconciler;
use crate::metrics::Metrics;

/// Logs in with capped backoff until the cloud accepts us. Later expiries are
/// handled lazily by the client itself.
pub async fn establish_session(cloud: &CloudClient) {
    let mut backoff = Backoff::default();
    loop {
        match cloud.ensure_session().await {
            Ok(_) => return,
            Err(e) => {
                let wait = backoff.next_delay();
                warn!(error = %e, wait_secs = wait.as_secs_f32(), "Cloud login failed; retrying");
                sleep(wait).await;
            }
        }
    }
}

/// One cycle: heartbeat first, then fetch and publish. Failures are counted and
/// logged, never propagated.
pub async fn poll_once(reconciler: &Reconciler, metrics: &Metrics) -> bool {
    reconciler.heartbeat().await;
    match reconciler.refresh().await {
        Ok(state) => {
            metrics.last_poll_success.set(chrono::Utc::now().timestamp());
            debug!(command_id = state.command_id, mode = ?state.mode, ambient = state.ambient_temp_f, "Poll ok");
            true
        }
        Err(e) => {
            metrics.poll_failures_total.with_label_values(&[e.kind()]).inc();
            warn!(error = %e, "Poll cycle failed; skipping publish");
            false
        }
    }
}

/// Logs in on the side and starts ticking right away, so heartbeats keep
/// flowing while the cloud is still unreachable.
pub async fn run(cloud: Arc<CloudClient>, reconciler: Arc<Reconciler>, metrics: Arc<Metrics>, every: Duration) {
    tokio::spawn(async move { establish_session(&cloud).await });
    poll_loop(&reconciler, &metrics, every).await;
}

pub async fn poll_loop(reconciler: &Reconciler, metrics: &Metrics, every: Duration) {
    info!(interval_secs = every.as_secs(), "Starting shadow poller");
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        poll_once(reconciler, metrics).await;
    }
}
