// Bus topic layout. Everything hangs off a configurable root, "flametech" by default.

pub const DEFAULT_ROOT: &str = "flametech";

pub const PAYLOAD_ONLINE: &str = "online";
pub const PAYLOAD_OFFLINE: &str = "offline";

// Produced topics (all retained)
pub fn state_topic(root: &str) -> String { format!("{}/state", root) }
pub fn thermostat_state_topic(root: &str) -> String { format!("{}/thermostat/state", root) }
pub fn availability_topic(root: &str) -> String { format!("{}/availability", root) }
pub fn heartbeat_topic(root: &str) -> String { format!("{}/last_seen", root) }

// Consumed topics
pub fn command_root(root: &str) -> String { format!("{}/cmd", root) }
pub fn command_topic(root: &str, kind: CommandTopic) -> String { format!("{}/{}", command_root(root), kind.suffix()) }
pub fn command_wildcard(root: &str) -> String { format!("{}/+", command_root(root)) }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandTopic {
    Power,
    ThermostatMode,
    ThermostatTemperature,
    Fan,
    Flame,
    Split,
    Ember,
    Overhead,
}

impl CommandTopic {
    pub const ALL: [CommandTopic; 8] = [
        CommandTopic::Power,
        CommandTopic::ThermostatMode,
        CommandTopic::ThermostatTemperature,
        CommandTopic::Fan,
        CommandTopic::Flame,
        CommandTopic::Split,
        CommandTopic::Ember,
        CommandTopic::Overhead,
    ];

    pub fn suffix(self) -> &'static str {
        match self {
            CommandTopic::Power => "power",
            CommandTopic::ThermostatMode => "thermostat_mode",
            CommandTopic::ThermostatTemperature => "thermostat_temp",
            CommandTopic::Fan => "fan",
            CommandTopic::Flame => "flame",
            CommandTopic::Split => "split",
            CommandTopic::Ember => "ember",
            CommandTopic::Overhead => "overhead",
        }
    }

    /// Expects `<root>/cmd/<suffix>`.
    pub fn from_topic(root: &str, topic: &str) -> Option<CommandTopic> {
        let rest = topic.strip_prefix(root)?.strip_prefix("/cmd/")?;
        CommandTopic::ALL.into_iter().find(|kind| kind.suffix() == rest)
    }
}
