use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use flametech_core::discovery::{DiscoveryConfig, DEFAULT_DEVICE_ID, DEFAULT_PREFIX};
use flametech_core::topics::DEFAULT_ROOT;
use flametech_core::Windows;

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub http_addr: SocketAddr,
    pub topic_root: String,
    pub discovery_prefix: String,
    pub device_id: String,
    pub poll_interval: Duration,
    pub settle_delay: Duration,
    pub windows: Windows,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            topic_root: DEFAULT_ROOT.to_string(),
            discovery_prefix: DEFAULT_PREFIX.to_string(),
            device_id: DEFAULT_DEVICE_ID.to_string(),
            poll_interval: Duration::from_secs(30),
            settle_delay: Duration::from_secs(3),
            windows: Windows::default(),
        }
    }
}

impl BridgeConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = BridgeConfig::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let secs = |key: &str| non_empty(key).and_then(|v| v.trim().parse::<u64>().ok()).map(Duration::from_secs);

        if let Some(addr) = non_empty("FLAMETECH_HTTP_ADDR").and_then(|v| v.parse().ok()) {
            cfg.http_addr = addr;
        }
        if let Some(v) = non_empty("FLAMETECH_TOPIC_ROOT") {
            cfg.topic_root = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = non_empty("FLAMETECH_DISCOVERY_PREFIX") {
            cfg.discovery_prefix = v;
        }
        if let Some(v) = non_empty("FLAMETECH_DEVICE_ID") {
            cfg.device_id = v;
        }
        if let Some(d) = secs("FLAMETECH_POLL_SECS").filter(|d| !d.is_zero()) {
            cfg.poll_interval = d;
        }
        if let Some(d) = secs("FLAMETECH_SETTLE_SECS") {
            cfg.settle_delay = d;
        }
        if let Some(d) = secs("FLAMETECH_STARTUP_GRACE_SECS") {
            cfg.windows.startup_grace = d;
        }
        if let Some(d) = secs("FLAMETECH_MODE_SETTLE_SECS") {
            cfg.windows.mode_settle = d;
        }
        if let Some(d) = secs("FLAMETECH_PENDING_TARGET_SECS") {
            cfg.windows.pending_target = d;
        }
        cfg
    }

    pub fn discovery(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            prefix: self.discovery_prefix.clone(),
            root: self.topic_root.clone(),
            device_id: self.device_id.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CloudConfig {
    pub api_base: String,
    pub auth_url: String,
    pub thing_name: String,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
}

impl CloudConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).unwrap_or_default();
        let api_base = get("FLAMETECH_API_BASE").trim_end_matches('/').to_string();
        let auth_url = lookup("FLAMETECH_AUTH_URL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| format!("{}/auth/login", api_base));
        let timeout = lookup("FLAMETECH_HTTP_TIMEOUT_SECS")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(20));
        Self {
            api_base,
            auth_url,
            thing_name: get("FLAMETECH_THING_NAME"),
            username: get("FLAMETECH_USERNAME"),
            password: get("FLAMETECH_PASSWORD"),
            timeout,
        }
    }

    pub fn shadow_url(&self) -> String {
        format!("{}/things/{}/shadow", self.api_base, self.thing_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup<'a>(vars: &'a HashMap<&'static str, &'static str>) -> impl Fn(&str) -> Option<String> + 'a {
        move |k: &str| vars.get(k).map(|v| v.to_string())
    }

    #[test]
    fn bridge_defaults_match_protocol_timings() {
        let cfg = BridgeConfig::from_lookup(|_| None);
        assert_eq!(cfg.poll_interval, Duration::from_secs(30));
        assert_eq!(cfg.settle_delay, Duration::from_secs(3));
        assert_eq!(cfg.windows.startup_grace, Duration::from_secs(5));
        assert_eq!(cfg.windows.mode_settle, Duration::from_secs(5));
        assert_eq!(cfg.windows.pending_target, Duration::from_secs(30));
        assert_eq!(cfg.topic_root, "flametech");
    }

    #[test]
    fn bridge_overrides_and_fallbacks() {
        let vars = HashMap::from([
            ("FLAMETECH_TOPIC_ROOT", "home/fireplace/"),
            ("FLAMETECH_POLL_SECS", "0"),
            ("FLAMETECH_SETTLE_SECS", "4"),
            ("FLAMETECH_HTTP_ADDR", "bogus"),
        ]);
        let cfg = BridgeConfig::from_lookup(lookup(&vars));
        assert_eq!(cfg.topic_root, "home/fireplace");
        assert_eq!(cfg.poll_interval, Duration::from_secs(30));
        assert_eq!(cfg.settle_delay, Duration::from_secs(4));
        assert_eq!(cfg.http_addr.port(), 8080);
        assert_eq!(cfg.discovery().root, "home/fireplace");
    }

    #[test]
    fn cloud_urls_derive_from_base() {
        let vars = HashMap::from([
            ("FLAMETECH_API_BASE", "https://cloud.example/v1/"),
            ("FLAMETECH_THING_NAME", "hub-42"),
        ]);
        let cfg = CloudConfig::from_lookup(lookup(&vars));
        assert_eq!(cfg.auth_url, "https://cloud.example/v1/auth/login");
        assert_eq!(cfg.shadow_url(), "https://cloud.example/v1/things/hub-42/shadow");
        assert_eq!(cfg.timeout, Duration::from_secs(20));
    }
}
