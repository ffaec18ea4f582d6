//! Peripheral backend abstraction
//!
//! A backend owns the platform's peripheral role: it hosts GATT services,
//! advertises them and reports remote activity as [`PeripheralEvent`]s on the
//! channel it was created with.

use crate::domain::models::AuthorizationStatus;
use crate::infrastructure::bluetooth::protocol::ServiceDefinition;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BluetoothError {
    #[error("Bluetooth unavailable: {0}")]
    Unavailable(String),

    #[error("Service rejected: {0}")]
    ServiceRejected(String),

    #[error("Advertising failed: {0}")]
    Advertising(String),

    #[cfg(windows)]
    #[error("Windows Bluetooth error: {0}")]
    Windows(#[from] windows::core::Error),
}

/// Result of asking the backend to host a service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAddOutcome {
    Added,
    /// The GATT database already holds a service with this UUID
    AlreadyProvided,
}

#[allow(async_fn_in_trait)]
pub trait PeripheralBackend {
    /// Whether the radio is powered and the peripheral role usable.
    ///
    /// Backends report later power changes as `PeripheralEvent::StateChanged`.
    async fn is_powered(&mut self) -> bool;

    async fn add_service(
        &mut self,
        service: &ServiceDefinition,
    ) -> Result<ServiceAddOutcome, BluetoothError>;

    async fn start_advertising(
        &mut self,
        local_name: &str,
        service_uuids: &[String],
    ) -> Result<(), BluetoothError>;

    async fn stop_advertising(&mut self) -> Result<(), BluetoothError>;

    fn is_advertising(&self) -> bool;

    async fn authorization_status(&self) -> AuthorizationStatus;
}
