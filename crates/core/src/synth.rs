use crate::codec::{CommandMode, DeviceCommand, MAX_FAN, MAX_FLAME, MAX_OVERHEAD};
use crate::shadow::DeviceState;

/// Payloads treated as "on" for boolean topics. Anything else is "off".
pub const TRUTHY_PAYLOADS: [&str; 4] = ["ON", "on", "1", "true"];

pub fn parse_switch(payload: &str) -> bool {
    TRUTHY_PAYLOADS.contains(&payload.trim())
}

/// Numeric level from a bus payload ("4", "4.0"). Negative values floor at 0;
/// range clamping happens at synthesis.
pub fn parse_level(payload: &str) -> Option<u8> {
    let value: f64 = payload.trim().parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(value.round().clamp(0.0, u8::MAX as f64) as u8)
}

pub fn parse_temperature(payload: &str) -> Option<u8> {
    parse_level(payload)
}

/// One requested change applied on top of the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Power(bool),
    Target(u8),
    Fan(u8),
    Flame(u8),
    Overhead(u8),
    Ember(bool),
    Split(bool),
}

/// A step of a dispatch plan: send a command, or wait for the hub to take the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Send(DeviceCommand),
    Settle,
}

impl Step {
    pub fn command(&self) -> Option<&DeviceCommand> {
        match self {
            Step::Send(cmd) => Some(cmd),
            Step::Settle => None,
        }
    }
}

/// Builds the dispatch plan for `mutation`, copying every untouched field from `current`.
pub fn synthesize(current: &DeviceState, mutation: Mutation) -> Vec<Step> {
    let base = current.current_command();
    let next = match mutation {
        Mutation::Target(target) => return target_plan(base, current.ambient_temp_f, target),
        Mutation::Power(on) => DeviceCommand { mode: CommandMode::Simple, is_on: on, ..base },
        Mutation::Fan(level) => DeviceCommand { fan_level: level.min(MAX_FAN), ..base },
        Mutation::Flame(level) => DeviceCommand { flame_level: level.min(MAX_FLAME), ..base },
        Mutation::Overhead(level) => DeviceCommand { overhead_level: level.min(MAX_OVERHEAD), ..base },
        Mutation::Ember(on) => DeviceCommand { ember_on: on, ..base },
        Mutation::Split(on) => DeviceCommand { split_flow: on, ..base },
    };
    vec![Step::Send(next.normalized())]
}

// The hub has no "heat to below ambient": such a target just turns it off.
// Otherwise the flame must be lit in Simple mode before the Smart command lands,
// or the hub silently drops it.
fn target_plan(base: DeviceCommand, ambient_f: f64, target: u8) -> Vec<Step> {
    if f64::from(target) <= ambient_f {
        let off = DeviceCommand { mode: CommandMode::Simple, is_on: false, ..base };
        return vec![Step::Send(off.normalized())];
    }
    let light = DeviceCommand { mode: CommandMode::Simple, is_on: true, ..base };
    let smart = DeviceCommand { mode: CommandMode::Smart, is_on: true, target_temp_f: target, ..base };
    vec![Step::Send(light.normalized()), Step::Settle, Step::Send(smart.normalized())]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shadow::{OperatingMode, StatusReadings};

    fn state() -> DeviceState {
        DeviceState {
            is_on: true,
            flame_on: true,
            thermostat_active: false,
            mode: OperatingMode::Simple,
            ambient_temp_f: 68.4,
            target_temp_f: 0,
            fan: 2,
            flame: 4,
            ember: true,
            split: false,
            overhead: 3,
            command_id: 10,
            command_mode: CommandMode::Simple,
            raw_command: None,
            readings: StatusReadings::default(),
            firmware: None,
        }
    }

    fn smart_state() -> DeviceState {
        DeviceState {
            mode: OperatingMode::Thermostat,
            thermostat_active: true,
            target_temp_f: 74,
            command_mode: CommandMode::Smart,
            split: true,
            ..state()
        }
    }

    fn single(steps: Vec<Step>) -> DeviceCommand {
        assert_eq!(steps.len(), 1, "{steps:?}");
        *steps[0].command().unwrap()
    }

    #[test]
    fn fan_change_preserves_every_other_field() {
        for current in [state(), smart_state()] {
            let cmd = single(synthesize(&current, Mutation::Fan(5)));
            let expected = DeviceCommand { fan_level: 5, ..current.current_command() };
            assert_eq!(cmd, expected);
        }
    }

    #[test]
    fn each_single_field_mutation_touches_only_its_field() {
        let current = smart_state();
        let before = current.current_command();

        assert_eq!(single(synthesize(&current, Mutation::Flame(1))), DeviceCommand { flame_level: 1, ..before });
        assert_eq!(single(synthesize(&current, Mutation::Overhead(0))), DeviceCommand { overhead_level: 0, ..before });
        assert_eq!(single(synthesize(&current, Mutation::Ember(false))), DeviceCommand { ember_on: false, ..before });
        assert_eq!(single(synthesize(&current, Mutation::Split(false))), DeviceCommand { split_flow: false, ..before });
    }

    #[test]
    fn levels_are_clamped_to_range() {
        let current = state();
        assert_eq!(single(synthesize(&current, Mutation::Fan(40))).fan_level, MAX_FAN);
        assert_eq!(single(synthesize(&current, Mutation::Flame(7))).flame_level, MAX_FLAME);
        assert_eq!(single(synthesize(&current, Mutation::Overhead(6))).overhead_level, MAX_OVERHEAD);
    }

    #[test]
    fn power_off_drops_to_simple_and_keeps_levels() {
        let cmd = single(synthesize(&smart_state(), Mutation::Power(false)));
        assert_eq!(cmd.mode, CommandMode::Simple);
        assert!(!cmd.is_on);
        assert_eq!(cmd.target_temp_f, 0);
        assert_eq!((cmd.fan_level, cmd.flame_level, cmd.overhead_level), (2, 4, 3));
        assert!(cmd.ember_on && cmd.split_flow);
    }

    #[test]
    fn target_at_or_below_ambient_turns_off() {
        for target in [60, 68] {
            let cmd = single(synthesize(&state(), Mutation::Target(target)));
            assert_eq!(cmd.mode, CommandMode::Simple);
            assert!(!cmd.is_on);
        }
    }

    #[test]
    fn target_above_ambient_lights_then_goes_smart() {
        let steps = synthesize(&state(), Mutation::Target(69));
        assert_eq!(steps.len(), 3);

        let light = steps[0].command().unwrap();
        assert_eq!(light.mode, CommandMode::Simple);
        assert!(light.is_on);
        assert_eq!(steps[1], Step::Settle);

        let smart = steps[2].command().unwrap();
        assert_eq!(smart.mode, CommandMode::Smart);
        assert!(smart.is_on);
        assert_eq!(smart.target_temp_f, 69);
        assert_eq!((smart.fan_level, smart.flame_level, smart.overhead_level), (2, 4, 3));
    }

    #[test]
    fn switch_payloads_use_allow_list() {
        for on in ["ON", "on", "1", "true", " ON "] {
            assert!(parse_switch(on), "{on:?}");
        }
        for off in ["OFF", "off", "0", "false", "True", "yes", ""] {
            assert!(!parse_switch(off), "{off:?}");
        }
    }

    #[test]
    fn level_payloads_round_and_floor() {
        assert_eq!(parse_level("3"), Some(3));
        assert_eq!(parse_level("2.6"), Some(3));
        assert_eq!(parse_level("-1"), Some(0));
        assert_eq!(parse_level("NaN"), None);
        assert_eq!(parse_level("fast"), None);
    }
}
