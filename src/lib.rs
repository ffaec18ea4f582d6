//! BLE Immediate Alert Service server with a JSON command bridge.
//!
//! The [`plugin::GattServerPlugin`] hosts the Immediate Alert Service on the
//! platform's peripheral role, turns alert-level writes into debounced alarms
//! and answers commands coming from a hybrid-app runtime over the [`bridge`].

pub mod bridge;
pub mod domain;
pub mod infrastructure;
pub mod plugin;
