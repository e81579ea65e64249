use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BridgeError {
    /// Remote fetch or dispatch failed; retried on the next cycle.
    #[error("cloud transport unavailable: {0}")]
    TransportUnavailable(String),
    #[error("cloud rejected credentials: {0}")]
    Unauthorized(String),
    /// Shadow document was missing required fields or malformed.
    #[error("shadow data unavailable: {0}")]
    DataUnavailable(String),
}

impl BridgeError {
    /// Short machine-readable kind, used in API failure payloads and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::TransportUnavailable(_) => "transport_unavailable",
            BridgeError::Unauthorized(_) => "unauthorized",
            BridgeError::DataUnavailable(_) => "data_unavailable",
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
