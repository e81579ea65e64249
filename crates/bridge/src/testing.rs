//! In-memory collaborators for exercising the controller without a cloud or broker.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flametech_core::{BridgeError, DeviceState, ShadowDocument, ThermostatSnapshot};
use serde_json::json;

use crate::cloud::ShadowTransport;
use crate::publisher::StatePublisher;

type Result<T> = std::result::Result<T, BridgeError>;

/// In-memory shadow. When `apply_dispatches` is set, dispatched commands
/// show up in the next fetch, like a cloud that keeps up.
pub struct FakeCloud {
    pub doc: Mutex<ShadowDocument>,
    pub dispatched: Mutex<Vec<(u64, String)>>,
    pub apply_dispatches: bool,
    pub fail_fetch: Mutex<bool>,
    /// Dispatches after this many accepted ones fail.
    pub accept_dispatches: Mutex<Option<usize>>,
}

impl FakeCloud {
    pub fn new(command: &str, ambient: f64, apply_dispatches: bool) -> Arc<Self> {
        let doc = ShadowDocument::from_json(json!({
            "desired": { "CMD_LST": { "CMD_ID": 100, "CMD_steps": [ { "C": command } ] } },
            "reported": { "AT": ambient, "ST1": 0 }
        }))
        .unwrap();
        Arc::new(Self {
            doc: Mutex::new(doc),
            dispatched: Mutex::new(Vec::new()),
            apply_dispatches,
            fail_fetch: Mutex::new(false),
            accept_dispatches: Mutex::new(None),
        })
    }

    pub fn sent(&self) -> Vec<(u64, String)> {
        self.dispatched.lock().unwrap().clone()
    }
}

#[async_trait]
impl ShadowTransport for FakeCloud {
    async fn fetch(&self) -> Result<ShadowDocument> {
        if *self.fail_fetch.lock().unwrap() {
            return Err(BridgeError::TransportUnavailable("offline".into()));
        }
        Ok(self.doc.lock().unwrap().clone())
    }

    async fn dispatch(&self, command_id: u64, command: &str) -> Result<()> {
        if let Some(limit) = *self.accept_dispatches.lock().unwrap() {
            if self.dispatched.lock().unwrap().len() >= limit {
                return Err(BridgeError::TransportUnavailable("dispatch rejected".into()));
            }
        }
        self.dispatched.lock().unwrap().push((command_id, command.to_string()));
        if self.apply_dispatches {
            let mut doc = self.doc.lock().unwrap();
            doc.desired = json!({ "CMD_LST": { "CMD_ID": command_id, "CMD_steps": [ { "C": command } ] } });
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    pub states: Mutex<Vec<(DeviceState, ThermostatSnapshot)>>,
    pub heartbeats: Mutex<usize>,
}

impl RecordingPublisher {
    pub fn last(&self) -> (DeviceState, ThermostatSnapshot) {
        self.states.lock().unwrap().last().cloned().expect("nothing published")
    }
}

#[async_trait]
impl StatePublisher for RecordingPublisher {
    async fn publish_state(&self, state: &DeviceState, thermostat: &ThermostatSnapshot) {
        self.states.lock().unwrap().push((state.clone(), thermostat.clone()));
    }

    async fn publish_heartbeat(&self, _at: DateTime<Utc>) {
        *self.heartbeats.lock().unwrap() += 1;
    }
}
