pub mod config;
pub mod client;

pub use config::{LastWill, MqttConfig};
pub use client::{MqttEvent, MqttService};
