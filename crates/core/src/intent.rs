use serde::{Deserialize, Serialize};

use crate::synth::{parse_level, parse_switch, parse_temperature};
use crate::topics::CommandTopic;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThermostatMode {
    Off,
    Heat,
}

impl ThermostatMode {
    pub fn parse(payload: &str) -> Option<Self> {
        match payload.trim().to_ascii_lowercase().as_str() {
            "off" => Some(ThermostatMode::Off),
            "heat" => Some(ThermostatMode::Heat),
            _ => None,
        }
    }
}

/// A single user request, from the bus or the HTTP API.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Intent {
    Power(bool),
    ThermostatMode(ThermostatMode),
    /// Target in whole degrees F.
    Temperature(u8),
    Fan(u8),
    Flame(u8),
    Split(bool),
    Ember(bool),
    Overhead(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentSource {
    Bus,
    Api,
}

impl Intent {
    /// Builds an intent from a raw bus payload; `None` when the payload is unusable.
    pub fn from_bus(kind: CommandTopic, payload: &str) -> Option<Intent> {
        Some(match kind {
            CommandTopic::Power => Intent::Power(parse_switch(payload)),
            CommandTopic::ThermostatMode => Intent::ThermostatMode(ThermostatMode::parse(payload)?),
            CommandTopic::ThermostatTemperature => Intent::Temperature(parse_temperature(payload)?),
            CommandTopic::Fan => Intent::Fan(parse_level(payload)?),
            CommandTopic::Flame => Intent::Flame(parse_level(payload)?),
            CommandTopic::Split => Intent::Split(parse_switch(payload)),
            CommandTopic::Ember => Intent::Ember(parse_switch(payload)),
            CommandTopic::Overhead => Intent::Overhead(parse_level(payload)?),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Intent::Power(_) => "power",
            Intent::ThermostatMode(_) => "thermostat_mode",
            Intent::Temperature(_) => "temperature",
            Intent::Fan(_) => "fan",
            Intent::Flame(_) => "flame",
            Intent::Split(_) => "split",
            Intent::Ember(_) => "ember",
            Intent::Overhead(_) => "overhead",
        }
    }

    /// Mode transitions open the settle window for follow-on temperature echoes.
    pub fn is_mode_change(&self) -> bool {
        matches!(self, Intent::Power(_) | Intent::ThermostatMode(_))
    }
}
