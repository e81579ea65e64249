use serde_json::{json, Value};

use crate::codec::{MAX_FAN, MAX_FLAME};
use crate::topics::{self, CommandTopic, PAYLOAD_OFFLINE, PAYLOAD_ONLINE};

pub const DEFAULT_PREFIX: &str = "homeassistant";
pub const DEFAULT_DEVICE_ID: &str = "flametech_hub";

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub prefix: String,
    pub root: String,
    pub device_id: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            root: topics::DEFAULT_ROOT.to_string(),
            device_id: DEFAULT_DEVICE_ID.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryDocument {
    pub topic: String,
    pub payload: Value,
}

impl DiscoveryConfig {
    fn device_block(&self) -> Value {
        json!({
            "identifiers": [self.device_id],
            "name": "FlameTech Fireplace",
            "manufacturer": "FlameTech",
            "model": "Hub",
        })
    }

    fn document(&self, component: &str, object_id: &str, mut body: Value) -> DiscoveryDocument {
        if let Some(map) = body.as_object_mut() {
            map.insert("uniq_id".into(), json!(format!("{}_{}", self.device_id, object_id)));
            map.insert("dev".into(), self.device_block());
            map.insert("avty_t".into(), json!(topics::availability_topic(&self.root)));
            map.insert("pl_avail".into(), json!(PAYLOAD_ONLINE));
            map.insert("pl_not_avail".into(), json!(PAYLOAD_OFFLINE));
        }
        DiscoveryDocument {
            topic: format!("{}/{}/{}/{}/config", self.prefix, component, self.device_id, object_id),
            payload: body,
        }
    }

    fn cmd(&self, kind: CommandTopic) -> String {
        topics::command_topic(&self.root, kind)
    }

    /// One static document per facet; only topic names vary.
    pub fn documents(&self) -> Vec<DiscoveryDocument> {
        let state = topics::state_topic(&self.root);
        let thermostat = topics::thermostat_state_topic(&self.root);

        vec![
            self.document("switch", "power", json!({
                "name": "Fireplace",
                "cmd_t": self.cmd(CommandTopic::Power),
                "stat_t": state,
                "val_tpl": "{{ 'ON' if value_json.flame_on else 'OFF' }}",
                "pl_on": "ON",
                "pl_off": "OFF",
                "icon": "mdi:fireplace",
            })),
            self.document("climate", "thermostat", json!({
                "name": "Fireplace Thermostat",
                "modes": ["off", "heat"],
                "mode_cmd_t": self.cmd(CommandTopic::ThermostatMode),
                "mode_stat_t": thermostat,
                "mode_stat_tpl": "{{ value_json.mode }}",
                "temp_cmd_t": self.cmd(CommandTopic::ThermostatTemperature),
                "temp_stat_t": thermostat,
                "temp_stat_tpl": "{{ value_json.target_temp_f }}",
                "curr_temp_t": thermostat,
                "curr_temp_tpl": "{{ value_json.current_temp_f }}",
                "temp_unit": "F",
                "min_temp": 60,
                "max_temp": 90,
                "precision": 1.0,
            })),
            self.document("sensor", "ambient", json!({
                "name": "Fireplace Ambient Temp",
                "stat_t": state,
                "val_tpl": "{{ value_json.ambient_temp_f }}",
                "unit_of_meas": "°F",
                "dev_cla": "temperature",
            })),
            self.document("sensor", "last_seen", json!({
                "name": "Fireplace Last Seen",
                "stat_t": topics::heartbeat_topic(&self.root),
                "dev_cla": "timestamp",
                "icon": "mdi:clock-check",
            })),
            self.document("number", "fan", json!({
                "name": "Fireplace Fan",
                "cmd_t": self.cmd(CommandTopic::Fan),
                "stat_t": state,
                "val_tpl": "{{ value_json.fan }}",
                "min": 0,
                "max": MAX_FAN,
                "step": 1,
                "icon": "mdi:fan",
            })),
            self.document("number", "flame", json!({
                "name": "Fireplace Flame",
                "cmd_t": self.cmd(CommandTopic::Flame),
                "stat_t": state,
                "val_tpl": "{{ value_json.flame }}",
                "min": 0,
                "max": MAX_FLAME,
                "step": 1,
                "icon": "mdi:fire",
            })),
            self.document("switch", "split", json!({
                "name": "Fireplace Split Flow",
                "cmd_t": self.cmd(CommandTopic::Split),
                "stat_t": state,
                "val_tpl": "{{ 'ON' if value_json.split else 'OFF' }}",
                "pl_on": "ON",
                "pl_off": "OFF",
            })),
            self.document("switch", "ember", json!({
                "name": "Fireplace Ember Bed",
                "cmd_t": self.cmd(CommandTopic::Ember),
                "stat_t": state,
                "val_tpl": "{{ 'ON' if value_json.ember else 'OFF' }}",
                "pl_on": "ON",
                "pl_off": "OFF",
            })),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_document_per_facet_with_unique_topics() {
        let docs = DiscoveryConfig::default().documents();
        assert_eq!(docs.len(), 8);
        let mut topics: Vec<_> = docs.iter().map(|d| d.topic.as_str()).collect();
        topics.sort();
        topics.dedup();
        assert_eq!(topics.len(), 8);
        assert!(topics.contains(&"homeassistant/climate/flametech_hub/thermostat/config"));
    }

    #[test]
    fn documents_share_device_and_availability() {
        for doc in DiscoveryConfig::default().documents() {
            assert_eq!(doc.payload["dev"]["identifiers"][0], "flametech_hub");
            assert_eq!(doc.payload["avty_t"], "flametech/availability");
            assert!(doc.payload["uniq_id"].as_str().unwrap().starts_with("flametech_hub_"));
        }
    }

    #[test]
    fn command_topics_follow_root() {
        let cfg = DiscoveryConfig { root: "den/fire".into(), ..DiscoveryConfig::default() };
        let docs = cfg.documents();
        assert_eq!(docs[4].payload["cmd_t"], "den/fire/cmd/fan");
    }
}
