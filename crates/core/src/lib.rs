pub mod backoff;
pub mod codec;
pub mod context;
pub mod discovery;
pub mod error;
pub mod intent;
pub mod shadow;
pub mod synth;
pub mod topics;

pub use backoff::Backoff;
pub use codec::{decode, encode, CommandMode, DeviceCommand};
pub use context::{DiscardReason, ReconciliationContext, Windows};
pub use error::BridgeError;
pub use intent::{Intent, IntentSource, ThermostatMode};
pub use shadow::{interpret, DeviceState, OperatingMode, ShadowDocument, ThermostatSnapshot};
pub use synth::{synthesize, Mutation, Step};
pub use topics::*;
