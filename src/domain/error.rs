use crate::infrastructure::bluetooth::BluetoothError;
use thiserror::Error;

/// Errors reported back to the bridge caller
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Immediate Alert service could not be added")]
    ServiceNotAdded(#[source] BluetoothError),

    #[error("Advertising could not be started: {0}")]
    Advertising(#[source] BluetoothError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PluginError {
    /// Stable key placed in the `error` field of a bridge result
    pub fn error_key(&self) -> &'static str {
        match self {
            Self::InvalidAction(_) => "invalidAction",
            Self::InvalidArguments(_) => "invalidArguments",
            Self::ServiceNotAdded(_) => "startServer",
            Self::Advertising(_) => "startAdvertising",
            Self::Other(_) => "internal",
        }
    }
}
