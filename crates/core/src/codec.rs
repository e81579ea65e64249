use serde::{Deserialize, Serialize};

// Wire layout of the colon-delimited command string understood by the hub.
//
//   Simple: 2:0:1:<control>:<fan_flame>
//   Smart:  2:2:1:<target_f>:<control>:<fan_flame>
//
// control:   bit7 marker (always set), bits4-6 overhead, bit0 on/off
// fan_flame: bit7 split flow, bits4-6 fan, bit3 ember, bits0-2 flame

pub const MAX_OVERHEAD: u8 = 5;
pub const MAX_FAN: u8 = 6;
pub const MAX_FLAME: u8 = 6;

const CONTROL_MARKER: u8 = 0b1000_0000;
const SIMPLE_PREFIX: &str = "2:0:1";
const SMART_PREFIX: &str = "2:2:1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandMode {
    Simple,
    Smart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCommand {
    pub mode: CommandMode,
    pub is_on: bool,
    /// Only meaningful in `Smart` mode; `Simple` always carries 0.
    pub target_temp_f: u8,
    pub overhead_level: u8, // 0..=5
    pub fan_level: u8,      // 0..=6
    pub flame_level: u8,    // 0..=6
    pub ember_on: bool,
    pub split_flow: bool,
}

impl DeviceCommand {
    /// Inert value produced for any string that does not decode.
    pub const UNKNOWN: DeviceCommand = DeviceCommand {
        mode: CommandMode::Simple,
        is_on: false,
        target_temp_f: 0,
        overhead_level: 0,
        fan_level: 0,
        flame_level: 0,
        ember_on: false,
        split_flow: false,
    };

    /// Pulls every level into its valid range and zeroes the target outside Smart mode.
    pub fn normalized(mut self) -> Self {
        self.overhead_level = self.overhead_level.min(MAX_OVERHEAD);
        self.fan_level = self.fan_level.min(MAX_FAN);
        self.flame_level = self.flame_level.min(MAX_FLAME);
        if self.mode == CommandMode::Simple {
            self.target_temp_f = 0;
        }
        self
    }

    pub fn encode(&self) -> String {
        encode(self)
    }
}

pub fn control_byte(cmd: &DeviceCommand) -> u8 {
    let overhead = cmd.overhead_level.min(MAX_OVERHEAD);
    CONTROL_MARKER | (overhead << 4) | u8::from(cmd.is_on)
}

pub fn fan_flame_byte(cmd: &DeviceCommand) -> u8 {
    let fan = cmd.fan_level.min(MAX_FAN);
    let flame = cmd.flame_level.min(MAX_FLAME);
    (u8::from(cmd.split_flow) << 7) | (fan << 4) | (u8::from(cmd.ember_on) << 3) | flame
}

/// Levels above their range are clamped rather than masked so they can never
/// spill into a neighbouring field.
pub fn encode(cmd: &DeviceCommand) -> String {
    let control = control_byte(cmd);
    let fan_flame = fan_flame_byte(cmd);
    match cmd.mode {
        CommandMode::Simple => format!("{SIMPLE_PREFIX}:{control}:{fan_flame}"),
        CommandMode::Smart => format!("{SMART_PREFIX}:{}:{control}:{fan_flame}", cmd.target_temp_f),
    }
}

/// Total over any input: malformed strings and wrong arity give [`DeviceCommand::UNKNOWN`].
pub fn decode(raw: &str) -> DeviceCommand {
    try_decode(raw).unwrap_or(DeviceCommand::UNKNOWN)
}

fn try_decode(raw: &str) -> Option<DeviceCommand> {
    let fields: Vec<&str> = raw.trim().split(':').collect();
    let (mode, target, control, fan_flame) = match fields.as_slice() {
        [_, _, _, control, fan_flame] => (CommandMode::Simple, 0, *control, *fan_flame),
        [_, _, _, target, control, fan_flame] => {
            (CommandMode::Smart, target.trim().parse::<u8>().ok()?, *control, *fan_flame)
        }
        _ => return None,
    };
    // header fields must still be numeric
    for header in &fields[..3] {
        header.trim().parse::<u8>().ok()?;
    }
    let control = control.trim().parse::<u8>().ok()?;
    let fan_flame = fan_flame.trim().parse::<u8>().ok()?;

    Some(DeviceCommand {
        mode,
        is_on: control & 0x01 != 0,
        target_temp_f: target,
        overhead_level: (control >> 4) & 0x07,
        fan_level: (fan_flame >> 4) & 0x07,
        flame_level: fan_flame & 0x07,
        ember_on: fan_flame & 0x08 != 0,
        split_flow: fan_flame & 0x80 != 0,
    })
}
