use hostname::get as get_hostname;
use std::env;

/// Retained message the broker publishes for us if the connection drops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: String,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u16,
    pub clean_session: bool,
    pub last_will: Option<LastWill>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            client_id: default_client_id(),
            username: None,
            password: None,
            keep_alive_secs: 60,
            clean_session: true,
            last_will: None,
        }
    }
}

impl MqttConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`MqttConfig::from_env`] but reads through `lookup`; empty or
    /// unparsable values keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = MqttConfig::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(v) = non_empty("MQTT_BROKER_HOST") {
            cfg.host = v;
        }
        if let Some(p) = non_empty("MQTT_BROKER_PORT").and_then(|v| v.parse::<u16>().ok()) {
            cfg.port = p;
        }
        if let Some(v) = non_empty("MQTT_CLIENT_ID") {
            cfg.client_id = v;
        }
        cfg.username = non_empty("MQTT_USERNAME");
        cfg.password = non_empty("MQTT_PASSWORD");
        if let Some(s) = non_empty("MQTT_KEEP_ALIVE_SECS").and_then(|v| v.parse::<u16>().ok()) {
            cfg.keep_alive_secs = s;
        }

        cfg
    }

    pub fn with_last_will(mut self, topic: impl Into<String>, payload: impl Into<String>) -> Self {
        self.last_will = Some(LastWill { topic: topic.into(), payload: payload.into() });
        self
    }
}

fn default_client_id() -> String {
    let host = get_hostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string());
    format!("flametech-{}-{}", host, std::process::id())
}
