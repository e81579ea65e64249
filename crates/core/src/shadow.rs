use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::{decode, CommandMode, DeviceCommand};
use crate::context::ReconciliationContext;
use crate::error::{BridgeError, Result};
use crate::intent::ThermostatMode;

/// Remote state document: `desired` carries the last dispatched command list,
/// `reported` carries the hub's sensor and status readings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShadowDocument {
    #[serde(default)]
    pub desired: Value,
    #[serde(default)]
    pub reported: Value,
}

impl ShadowDocument {
    /// Accepts either `{ "state": { desired, reported } }` or a bare `{ desired, reported }`.
    pub fn from_json(body: Value) -> Result<Self> {
        let inner = match body {
            Value::Object(mut map) => match map.remove("state") {
                Some(state @ Value::Object(_)) => state,
                Some(_) => return Err(BridgeError::DataUnavailable("shadow state is not an object".into())),
                None => Value::Object(map),
            },
            _ => return Err(BridgeError::DataUnavailable("shadow body is not an object".into())),
        };
        serde_json::from_value(inner).map_err(|e| BridgeError::DataUnavailable(format!("shadow shape: {e}")))
    }

    /// First command string of the desired command list, if any.
    pub fn command_string(&self) -> Option<&str> {
        self.desired.pointer("/CMD_LST/CMD_steps/0/C").and_then(Value::as_str)
    }

    pub fn command_id(&self) -> u64 {
        self.desired
            .pointer("/CMD_LST/CMD_ID")
            .or_else(|| self.desired.get("CMD_ID"))
            .and_then(as_f64)
            .map(|id| id.max(0.0) as u64)
            .unwrap_or(0)
    }

    pub fn reported_number(&self, key: &str) -> Option<f64> {
        self.reported.get(key).and_then(as_f64)
    }
}

// Numbers sometimes arrive as strings from the cloud side.
fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    Off,
    Simple,
    Thermostat,
}

/// Raw `ST1..ST5` readings; absent ones are skipped on publish.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusReadings {
    #[serde(rename = "ST1", skip_serializing_if = "Option::is_none")]
    pub st1: Option<f64>,
    #[serde(rename = "ST2", skip_serializing_if = "Option::is_none")]
    pub st2: Option<f64>,
    #[serde(rename = "ST3", skip_serializing_if = "Option::is_none")]
    pub st3: Option<f64>,
    #[serde(rename = "ST4", skip_serializing_if = "Option::is_none")]
    pub st4: Option<f64>,
    #[serde(rename = "ST5", skip_serializing_if = "Option::is_none")]
    pub st5: Option<f64>,
}

/// Normalised view of the fireplace, rebuilt from scratch on every poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub is_on: bool,
    pub flame_on: bool,
    pub thermostat_active: bool,
    pub mode: OperatingMode,
    pub ambient_temp_f: f64,
    pub target_temp_f: u8,
    pub fan: u8,
    pub flame: u8,
    pub ember: bool,
    pub split: bool,
    pub overhead: u8,
    pub command_id: u64,
    pub command_mode: CommandMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_command: Option<String>,
    #[serde(flatten)]
    pub readings: StatusReadings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware: Option<String>,
}

impl DeviceState {
    /// The command currently held by the hub, as far as this state knows it.
    pub fn current_command(&self) -> DeviceCommand {
        DeviceCommand {
            mode: self.command_mode,
            is_on: self.flame_on,
            target_temp_f: self.target_temp_f,
            overhead_level: self.overhead,
            fan_level: self.fan,
            flame_level: self.flame,
            ember_on: self.ember,
            split_flow: self.split,
        }
    }
}

pub fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Derives a [`DeviceState`] from a shadow document. Records the target of any
/// Smart command into `ctx` so it survives later polls that lack one.
pub fn interpret(doc: &ShadowDocument, ctx: &mut ReconciliationContext) -> Result<DeviceState> {
    let ambient = doc
        .reported_number("AT")
        .filter(|at| at.is_finite())
        .ok_or_else(|| BridgeError::DataUnavailable("reported.AT missing".into()))?;

    let raw_command = doc.command_string().map(str::to_owned);
    let command = raw_command.as_deref().map(decode).unwrap_or(DeviceCommand::UNKNOWN);
    ctx.observe_command(&command);

    let readings = StatusReadings {
        st1: doc.reported_number("ST1"),
        st2: doc.reported_number("ST2"),
        st3: doc.reported_number("ST3"),
        st4: doc.reported_number("ST4"),
        st5: doc.reported_number("ST5"),
    };
    let thermostat_active = readings.st1.is_some_and(|st1| st1 > 0.0);
    let flame_on = command.is_on;
    let mode = if thermostat_active {
        OperatingMode::Thermostat
    } else if flame_on {
        OperatingMode::Simple
    } else {
        OperatingMode::Off
    };
    let firmware = doc.reported.get("fw").and_then(|fw| match fw {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });

    Ok(DeviceState {
        is_on: flame_on || thermostat_active,
        flame_on,
        thermostat_active,
        mode,
        ambient_temp_f: round_tenth(ambient),
        target_temp_f: command.target_temp_f,
        fan: command.fan_level,
        flame: command.flame_level,
        ember: command.ember_on,
        split: command.split_flow,
        overhead: command.overhead_level,
        command_id: doc.command_id(),
        command_mode: command.mode,
        raw_command,
        readings,
        firmware,
    })
}

/// Climate-style snapshot published alongside the full state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThermostatSnapshot {
    pub mode: ThermostatMode,
    pub target_temp_f: u8,
    pub current_temp_f: f64,
}

impl ThermostatSnapshot {
    pub fn new(state: &DeviceState, target_temp_f: u8) -> Self {
        let smart_running = state.command_mode == CommandMode::Smart && state.flame_on;
        let mode = if state.mode == OperatingMode::Thermostat || smart_running {
            ThermostatMode::Heat
        } else {
            ThermostatMode::Off
        };
        Self { mode, target_temp_f, current_temp_f: state.ambient_temp_f }
    }
}
