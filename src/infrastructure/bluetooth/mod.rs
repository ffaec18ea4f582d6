//! Bluetooth Module
//!
//! Provides the BLE peripheral (GATT server) role.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    GattServerPlugin                      │
//! │      (owns the backend, consumes PeripheralEvents)       │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │ PeripheralBackend
//!         ┌─────────────┴─────────────┐
//!         ▼                           ▼
//! ┌───────────────┐           ┌──────────────┐
//! │ WinRtPeripheral│          │   Loopback   │
//! │ - GattService │           │ - in-memory  │
//! │   Provider    │           │   GATT db    │
//! └───────────────┘           └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Immediate Alert Service definitions and UUID helpers
//! - [`backend`] - Backend trait and errors
//! - [`loopback`] - In-process peripheral
//! - `winrt` - Windows peripheral (Windows only)

pub mod backend;
pub mod loopback;
pub mod protocol;
#[cfg(windows)]
pub mod winrt;

pub use backend::{BluetoothError, PeripheralBackend, ServiceAddOutcome};
pub use loopback::{LoopbackHandle, LoopbackPeripheral};
#[cfg(windows)]
pub use winrt::WinRtPeripheral;
