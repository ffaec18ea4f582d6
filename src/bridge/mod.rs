//! Command bridge between the JavaScript runtime and the plugin.
//!
//! Newline-delimited JSON over a local socket (named pipe on Windows).

pub mod client;
pub mod command;
pub mod server;

pub use client::BridgeClient;
pub use command::{action, BridgeCommand, PluginResult, ResultStatus};
pub use server::BridgeServer;
