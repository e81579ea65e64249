use std::time::{Duration, Instant};

use crate::codec::{CommandMode, DeviceCommand};
use crate::intent::Intent;

pub const DEFAULT_TARGET_F: u8 = 72;
/// Remembered targets below this are ignored on heat entry.
pub const MIN_HEAT_TARGET_F: u8 = 60;
/// Margin added over ambient when the chosen heat target would not fire.
pub const HEAT_ENTRY_MARGIN_F: f64 = 2.0;

/// Time windows that guard the command path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Windows {
    /// Intents are dropped for this long after a bus (re)connect.
    pub startup_grace: Duration,
    /// Temperature intents are dropped for this long after a mode change.
    pub mode_settle: Duration,
    /// A user target overrides the reported one for at most this long.
    pub pending_target: Duration,
}

impl Default for Windows {
    fn default() -> Self {
        Self {
            startup_grace: Duration::from_secs(5),
            mode_settle: Duration::from_secs(5),
            pending_target: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    StartupGrace,
    ModeSettle,
}

impl DiscardReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscardReason::StartupGrace => "startup_grace",
            DiscardReason::ModeSettle => "mode_settle",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTarget {
    pub value: u8,
    pub at: Instant,
}

/// Cross-request memory of the bridge. Owned by the controller and only
/// touched on its serialized path.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationContext {
    last_known_target_f: Option<u8>,
    pending_user_target: Option<PendingTarget>,
    last_mode_change: Option<Instant>,
    bus_connected_at: Option<Instant>,
}

impl ReconciliationContext {
    pub fn observe_command(&mut self, cmd: &DeviceCommand) {
        if cmd.mode == CommandMode::Smart {
            self.last_known_target_f = Some(cmd.target_temp_f);
        }
    }

    pub fn last_known_target_f(&self) -> u8 {
        self.last_known_target_f.unwrap_or(DEFAULT_TARGET_F)
    }

    pub fn pending_user_target(&self) -> Option<PendingTarget> {
        self.pending_user_target
    }

    pub fn last_mode_change(&self) -> Option<Instant> {
        self.last_mode_change
    }

    pub fn mark_bus_connected(&mut self, now: Instant) {
        self.bus_connected_at = Some(now);
    }

    pub fn record_mode_change(&mut self, now: Instant) {
        self.last_mode_change = Some(now);
    }

    pub fn record_user_target(&mut self, value: u8, now: Instant) {
        self.pending_user_target = Some(PendingTarget { value, at: now });
    }

    /// Decides whether an inbound intent may run at all.
    pub fn admit(&self, intent: &Intent, now: Instant, windows: &Windows) -> Result<(), DiscardReason> {
        if within(self.bus_connected_at, now, windows.startup_grace) {
            return Err(DiscardReason::StartupGrace);
        }
        if matches!(intent, Intent::Temperature(_)) && within(self.last_mode_change, now, windows.mode_settle) {
            return Err(DiscardReason::ModeSettle);
        }
        Ok(())
    }

    /// Target to send when heat mode is entered without an explicit temperature.
    pub fn heat_entry_target(&self, ambient_f: f64) -> u8 {
        let remembered = self
            .last_known_target_f
            .filter(|t| *t >= MIN_HEAT_TARGET_F)
            .unwrap_or(DEFAULT_TARGET_F);
        if f64::from(remembered) > ambient_f {
            return remembered;
        }
        (ambient_f + HEAT_ENTRY_MARGIN_F).ceil().clamp(0.0, u8::MAX as f64) as u8
    }

    /// Target to publish: a recent user request wins over a device value that
    /// has not caught up yet. Expired or satisfied requests are forgotten.
    pub fn reconcile_target(&mut self, device_target_f: u8, now: Instant, windows: &Windows) -> u8 {
        let Some(pending) = self.pending_user_target else {
            return device_target_f;
        };
        if !within(Some(pending.at), now, windows.pending_target) || pending.value == device_target_f {
            self.pending_user_target = None;
            return device_target_f;
        }
        pending.value
    }
}

fn within(since: Option<Instant>, now: Instant, window: Duration) -> bool {
    since.is_some_and(|at| now.saturating_duration_since(at) < window)
}
