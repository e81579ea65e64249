use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use flametech_core::{
    interpret, synthesize, BridgeError, CommandMode, DeviceState, DiscardReason, Intent, IntentSource, Mutation,
    ReconciliationContext, Step, ThermostatMode, ThermostatSnapshot, Windows,
};
use serde::Serialize;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::cloud::ShadowTransport;
use crate::publisher::StatePublisher;

type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub windows: Windows,
    /// Pause between lighting the flame and sending the Smart command.
    pub settle_delay: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self { windows: Windows::default(), settle_delay: Duration::from_secs(3) }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SentCommand {
    pub id: u64,
    pub command: String,
}

#[derive(Debug, Clone)]
pub enum Outcome {
    Applied {
        commands: Vec<SentCommand>,
        /// State after the follow-up poll; `None` if that poll failed.
        state: Option<DeviceState>,
    },
    /// Part of the plan went out before a dispatch failed.
    Interrupted {
        commands: Vec<SentCommand>,
        error: BridgeError,
        state: Option<DeviceState>,
    },
    Discarded(DiscardReason),
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Applied { .. } => "applied",
            Outcome::Interrupted { error, .. } => error.kind(),
            Outcome::Discarded(reason) => reason.as_str(),
        }
    }
}

/// Virtual time under tokio's test clock, wall time otherwise. Callers stamp
/// inbound intents with this on arrival.
pub fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// Turns intents into dispatched commands and keeps the published state honest
/// while the cloud catches up.
pub struct Reconciler {
    transport: Arc<dyn ShadowTransport>,
    publisher: Arc<dyn StatePublisher>,
    context: Mutex<ReconciliationContext>,
    // One intent runs to completion before the next starts.
    command_path: tokio::sync::Mutex<()>,
    timing: Timing,
}

impl Reconciler {
    pub fn new(transport: Arc<dyn ShadowTransport>, publisher: Arc<dyn StatePublisher>, timing: Timing) -> Self {
        Self {
            transport,
            publisher,
            context: Mutex::new(ReconciliationContext::default()),
            command_path: tokio::sync::Mutex::new(()),
            timing,
        }
    }

    fn context(&self) -> MutexGuard<'_, ReconciliationContext> {
        // A poisoned lock still holds usable data.
        self.context.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn mark_bus_connected(&self) {
        self.context().mark_bus_connected(now());
    }

    /// Runs one intent end to end: guard, fetch, synthesize, dispatch, re-poll.
    /// The guards judge the intent by `received_at`, not by when its turn comes.
    pub async fn handle(&self, intent: Intent, source: IntentSource, received_at: Instant) -> Result<Outcome> {
        let _turn = self.command_path.lock().await;

        if let Err(reason) = self.context().admit(&intent, received_at, &self.timing.windows) {
            info!(kind = intent.kind(), ?source, reason = reason.as_str(), "Discarding intent");
            return Ok(Outcome::Discarded(reason));
        }

        let current = self.fetch_state().await?;
        let mutation = match intent {
            Intent::Power(on) => Mutation::Power(on),
            Intent::ThermostatMode(ThermostatMode::Off) => Mutation::Power(false),
            Intent::ThermostatMode(ThermostatMode::Heat) => {
                Mutation::Target(self.context().heat_entry_target(current.ambient_temp_f))
            }
            Intent::Temperature(target) => Mutation::Target(target),
            Intent::Fan(level) => Mutation::Fan(level),
            Intent::Flame(level) => Mutation::Flame(level),
            Intent::Split(on) => Mutation::Split(on),
            Intent::Ember(on) => Mutation::Ember(on),
            Intent::Overhead(level) => Mutation::Overhead(level),
        };
        let plan = synthesize(&current, mutation);
        info!(kind = intent.kind(), ?source, ?mutation, steps = plan.len(), "Handling intent");

        let (sent, failure) = match self.execute(current.command_id, &plan).await {
            (sent, Some(e)) if sent.is_empty() => return Err(e),
            other => other,
        };

        {
            let mut ctx = self.context();
            let at = now();
            if intent.is_mode_change() {
                ctx.record_mode_change(at);
            }
            let smart_target = plan
                .iter()
                .filter_map(Step::command)
                .take(sent.len())
                .find(|cmd| cmd.mode == CommandMode::Smart)
                .map(|cmd| cmd.target_temp_f);
            if let Some(target) = smart_target {
                ctx.record_user_target(target, at);
            }
        }

        // The device may have changed even if the plan stopped short.
        let state = match self.refresh().await {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(error = %e, "Re-poll after dispatch failed");
                None
            }
        };
        Ok(match failure {
            None => Outcome::Applied { commands: sent, state },
            Some(error) => {
                warn!(error = %error, sent = sent.len(), "Dispatch plan interrupted");
                Outcome::Interrupted { commands: sent, error, state }
            }
        })
    }

    // Steps run in order; a failed dispatch aborts the rest of the plan and is
    // returned next to whatever already went out.
    async fn execute(&self, last_id: u64, plan: &[Step]) -> (Vec<SentCommand>, Option<BridgeError>) {
        let mut next_id = last_id;
        let mut sent = Vec::new();
        for step in plan {
            match step {
                Step::Send(cmd) => {
                    next_id += 1;
                    let command = cmd.encode();
                    if let Err(e) = self.transport.dispatch(next_id, &command).await {
                        return (sent, Some(e));
                    }
                    info!(id = next_id, %command, "Dispatched command");
                    sent.push(SentCommand { id: next_id, command });
                }
                Step::Settle => sleep(self.timing.settle_delay).await,
            }
        }
        (sent, None)
    }

    async fn fetch_state(&self) -> Result<DeviceState> {
        let doc = self.transport.fetch().await?;
        interpret(&doc, &mut self.context())
    }

    /// Fetches, interprets and publishes. The published target prefers a recent
    /// user request over a device value that has not caught up yet.
    pub async fn refresh(&self) -> Result<DeviceState> {
        let mut state = self.fetch_state().await?;
        let thermostat = {
            let mut ctx = self.context();
            let device_target = match state.command_mode {
                CommandMode::Smart => state.target_temp_f,
                CommandMode::Simple => ctx.last_known_target_f(),
            };
            let target = ctx.reconcile_target(device_target, now(), &self.timing.windows);
            if target != device_target {
                state.target_temp_f = target;
            }
            ThermostatSnapshot::new(&state, target)
        };
        self.publisher.publish_state(&state, &thermostat).await;
        Ok(state)
    }

    pub async fn heartbeat(&self) {
        self.publisher.publish_heartbeat(Utc::now()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeCloud, RecordingPublisher};
    use flametech_core::decode;

    fn reconciler(cloud: &Arc<FakeCloud>) -> (Reconciler, Arc<RecordingPublisher>) {
        let publisher = Arc::new(RecordingPublisher::default());
        let rec = Reconciler::new(cloud.clone(), publisher.clone(), Timing::default());
        (rec, publisher)
    }

    fn smart_targets(cloud: &FakeCloud) -> Vec<u8> {
        cloud
            .sent()
            .iter()
            .map(|(_, c)| decode(c))
            .filter(|c| c.mode == CommandMode::Smart)
            .map(|c| c.target_temp_f)
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn heat_entry_uses_default_target_over_cool_room() {
        let cloud = FakeCloud::new("2:0:1:128:0", 68.0, true);
        let (rec, _) = reconciler(&cloud);

        let outcome = rec.handle(Intent::ThermostatMode(ThermostatMode::Heat), IntentSource::Api, now()).await.unwrap();

        assert!(matches!(outcome, Outcome::Applied { .. }));
        let sent = cloud.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(decode(&sent[0].1).mode, CommandMode::Simple);
        assert!(decode(&sent[0].1).is_on);
        assert_eq!(smart_targets(&cloud), vec![72]);
    }

    #[tokio::test(start_paused = true)]
    async fn heat_entry_bumps_remembered_target_above_ambient() {
        let cloud = FakeCloud::new("2:2:1:65:129:0", 70.0, true);
        let (rec, _) = reconciler(&cloud);

        rec.handle(Intent::ThermostatMode(ThermostatMode::Heat), IntentSource::Api, now()).await.unwrap();

        assert_eq!(smart_targets(&cloud), vec![72]);
    }

    #[tokio::test(start_paused = true)]
    async fn two_phase_dispatch_waits_for_settle_and_uses_consecutive_ids() {
        let cloud = FakeCloud::new("2:0:1:129:37", 66.5, true);
        let (rec, _) = reconciler(&cloud);

        let started = tokio::time::Instant::now();
        rec.handle(Intent::Temperature(74), IntentSource::Api, now()).await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(3));
        let sent = cloud.sent();
        assert_eq!(sent.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![101, 102]);
        assert_eq!(sent[1].1, "2:2:1:74:129:37");
    }

    #[tokio::test(start_paused = true)]
    async fn target_below_ambient_only_turns_off() {
        let cloud = FakeCloud::new("2:0:1:129:37", 71.0, true);
        let (rec, _) = reconciler(&cloud);

        rec.handle(Intent::Temperature(70), IntentSource::Api, now()).await.unwrap();

        let sent = cloud.sent();
        assert_eq!(sent.len(), 1);
        let off = decode(&sent[0].1);
        assert_eq!(off.mode, CommandMode::Simple);
        assert!(!off.is_on);
        assert_eq!((off.fan_level, off.flame_level), (2, 5));
    }

    #[tokio::test(start_paused = true)]
    async fn fan_change_keeps_the_rest_of_the_command() {
        let cloud = FakeCloud::new("2:2:1:75:177:237", 64.0, true);
        let (rec, publisher) = reconciler(&cloud);

        rec.handle(Intent::Fan(2), IntentSource::Api, now()).await.unwrap();

        assert_eq!(cloud.sent(), vec![(101, "2:2:1:75:177:173".to_string())]);
        let (state, _) = publisher.last();
        assert_eq!(state.fan, 2);
        assert_eq!(state.flame, 5);
        assert!(state.ember && state.split);
    }

    #[tokio::test(start_paused = true)]
    async fn temperature_right_after_mode_change_is_discarded() {
        let cloud = FakeCloud::new("2:0:1:128:0", 65.0, true);
        let (rec, _) = reconciler(&cloud);

        rec.handle(Intent::Power(true), IntentSource::Api, now()).await.unwrap();
        let before = cloud.sent().len();

        tokio::time::advance(Duration::from_secs(2)).await;
        let outcome = rec.handle(Intent::Temperature(75), IntentSource::Bus, now()).await.unwrap();
        assert!(matches!(outcome, Outcome::Discarded(DiscardReason::ModeSettle)));
        assert_eq!(cloud.sent().len(), before);

        tokio::time::advance(Duration::from_secs(4)).await;
        let outcome = rec.handle(Intent::Temperature(75), IntentSource::Bus, now()).await.unwrap();
        assert!(matches!(outcome, Outcome::Applied { .. }));
        assert_eq!(smart_targets(&cloud), vec![75]);
    }

    #[tokio::test(start_paused = true)]
    async fn intents_ignored_during_startup_grace() {
        let cloud = FakeCloud::new("2:0:1:128:0", 65.0, true);
        let (rec, _) = reconciler(&cloud);
        rec.mark_bus_connected();

        let outcome = rec.handle(Intent::Flame(3), IntentSource::Bus, now()).await.unwrap();
        assert!(matches!(outcome, Outcome::Discarded(DiscardReason::StartupGrace)));
        let outcome = rec.handle(Intent::Flame(3), IntentSource::Api, now()).await.unwrap();
        assert!(matches!(outcome, Outcome::Discarded(DiscardReason::StartupGrace)));
        assert!(cloud.sent().is_empty());

        tokio::time::advance(Duration::from_secs(5)).await;
        rec.handle(Intent::Flame(3), IntentSource::Bus, now()).await.unwrap();
        assert_eq!(cloud.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn intent_queued_behind_settle_is_judged_by_arrival() {
        let cloud = FakeCloud::new("2:0:1:129:16", 66.0, true);
        let publisher = Arc::new(RecordingPublisher::default());
        let timing = Timing { settle_delay: Duration::from_secs(6), ..Timing::default() };
        let rec = Arc::new(Reconciler::new(cloud.clone(), publisher, timing));

        let heat = tokio::spawn({
            let rec = rec.clone();
            async move { rec.handle(Intent::Temperature(74), IntentSource::Api, now()).await }
        });
        // first phase is out, the handler now sits in its settle delay
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(cloud.sent().len(), 1);

        rec.mark_bus_connected();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let redelivered = now();

        let outcome = rec.handle(Intent::Flame(6), IntentSource::Bus, redelivered).await.unwrap();
        assert!(matches!(outcome, Outcome::Discarded(DiscardReason::StartupGrace)));
        assert!(matches!(heat.await.unwrap().unwrap(), Outcome::Applied { .. }));
        assert_eq!(cloud.sent().iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![101, 102]);
    }

    #[tokio::test(start_paused = true)]
    async fn interrupted_plan_still_republishes_state() {
        let cloud = FakeCloud::new("2:0:1:128:0", 66.0, true);
        *cloud.accept_dispatches.lock().unwrap() = Some(1);
        let (rec, publisher) = reconciler(&cloud);

        let outcome = rec.handle(Intent::Temperature(74), IntentSource::Api, now()).await.unwrap();

        let Outcome::Interrupted { commands, error, state: Some(state) } = outcome else {
            panic!("expected interrupted outcome with state");
        };
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].id, 101);
        assert_eq!(error.kind(), "transport_unavailable");
        assert!(state.is_on);
        assert_eq!(state.command_id, 101);
        assert_eq!(publisher.last().0.command_id, 101);
        assert!(smart_targets(&cloud).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_first_dispatch_is_an_error() {
        let cloud = FakeCloud::new("2:0:1:128:0", 66.0, true);
        *cloud.accept_dispatches.lock().unwrap() = Some(0);
        let (rec, publisher) = reconciler(&cloud);

        let err = rec.handle(Intent::Fan(3), IntentSource::Api, now()).await.unwrap_err();
        assert_eq!(err.kind(), "transport_unavailable");
        assert!(publisher.states.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn lagging_cloud_does_not_bounce_published_target() {
        let cloud = FakeCloud::new("2:0:1:129:0", 66.0, false);
        let (rec, publisher) = reconciler(&cloud);

        let outcome = rec.handle(Intent::Temperature(76), IntentSource::Api, now()).await.unwrap();
        let Outcome::Applied { state: Some(state), .. } = outcome else {
            panic!("expected applied outcome with state");
        };
        assert_eq!(state.target_temp_f, 76);
        assert_eq!(publisher.last().1.target_temp_f, 76);

        tokio::time::advance(Duration::from_secs(31)).await;
        rec.refresh().await.unwrap();
        assert_eq!(publisher.last().1.target_temp_f, 72);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_failure_surfaces_and_sends_nothing() {
        let cloud = FakeCloud::new("2:0:1:128:0", 65.0, true);
        *cloud.fail_fetch.lock().unwrap() = true;
        let (rec, publisher) = reconciler(&cloud);

        let err = rec.handle(Intent::Power(true), IntentSource::Api, now()).await.unwrap_err();
        assert_eq!(err.kind(), "transport_unavailable");
        assert!(cloud.sent().is_empty());
        assert!(publisher.states.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_goes_through_publisher() {
        let cloud = FakeCloud::new("2:0:1:128:0", 65.0, true);
        let (rec, publisher) = reconciler(&cloud);
        rec.heartbeat().await;
        assert_eq!(*publisher.heartbeats.lock().unwrap(), 1);
    }
}
