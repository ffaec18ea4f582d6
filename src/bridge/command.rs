//! Bridge wire types
//!
//! Each line on the bridge socket is one JSON object: commands flow from the
//! JavaScript runtime to the plugin, results flow back.

use crate::domain::error::PluginError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Name the JavaScript side uses to address this plugin
pub const PLUGIN_SERVICE_NAME: &str = "GattServerPlugin";

/// Actions understood by the plugin
pub mod action {
    pub const START_SERVER: &str = "startServer";
    pub const ALARM: &str = "alarm";
    pub const STOP_ALARM: &str = "stopAlarm";
    pub const REGISTER_NOTIFICATIONS: &str = "registerNotifications";
    pub const GET_ALARM_SETTINGS: &str = "getAlarmSettings";
    pub const SET_ALARM_SETTINGS: &str = "setAlarmSettings";
    pub const IS_BLUETOOTH_SHARING_AUTHORIZED: &str = "isBluetoothSharingAuthorized";
    pub const SET_APPLICATION_BADGE_NUMBER: &str = "setApplicationBadgeNumber";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeCommand {
    pub callback_id: String,
    #[serde(default = "default_service")]
    pub service: String,
    pub action: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

fn default_service() -> String {
    PLUGIN_SERVICE_NAME.to_string()
}

impl BridgeCommand {
    pub fn new(callback_id: &str, action: &str, args: Vec<Value>) -> Self {
        Self {
            callback_id: callback_id.to_string(),
            service: PLUGIN_SERVICE_NAME.to_string(),
            action: action.to_string(),
            args,
        }
    }

    /// First argument, the options object by convention
    pub fn first_arg(&self) -> Option<&Value> {
        self.args.first().filter(|v| !v.is_null())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResultStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginResult {
    pub callback_id: String,
    pub status: ResultStatus,
    /// Keep the JavaScript callback registered for further results
    pub keep_callback: bool,
    pub message: Value,
}

impl PluginResult {
    /// Success result `{ "status": <status>, ..fields }`
    pub fn ok(callback_id: &str, status: &str, fields: Value) -> Self {
        let mut message = Map::new();
        message.insert("status".to_string(), Value::String(status.to_string()));
        if let Value::Object(extra) = fields {
            message.extend(extra);
        }
        Self {
            callback_id: callback_id.to_string(),
            status: ResultStatus::Ok,
            keep_callback: false,
            message: Value::Object(message),
        }
    }

    /// Error result `{ "error": <key>, "message": <text> }`
    pub fn error(callback_id: &str, error: &str, message: impl Into<String>) -> Self {
        Self {
            callback_id: callback_id.to_string(),
            status: ResultStatus::Error,
            keep_callback: false,
            message: json!({ "error": error, "message": message.into() }),
        }
    }

    pub fn from_error(callback_id: &str, err: &PluginError) -> Self {
        Self::error(callback_id, err.error_key(), err.to_string())
    }

    pub fn keep(mut self) -> Self {
        self.keep_callback = true;
        self
    }

    pub fn status_text(&self) -> Option<&str> {
        self.message.get("status").and_then(Value::as_str)
    }

    pub fn error_text(&self) -> Option<&str> {
        self.message.get("error").and_then(Value::as_str)
    }
}

/// Parse one line received from the bridge.
///
/// Lines that are not a valid command yield the error result to send back.
pub fn parse_command(line: &str) -> Result<BridgeCommand, PluginResult> {
    let command: BridgeCommand = serde_json::from_str(line.trim())
        .map_err(|e| PluginResult::error("", "invalidCommand", e.to_string()))?;

    if command.service != PLUGIN_SERVICE_NAME {
        return Err(PluginResult::error(
            &command.callback_id,
            "invalidService",
            format!("Unknown service: {}", command.service),
        ));
    }
    Ok(command)
}

pub fn encode_result(result: &PluginResult) -> serde_json::Result<String> {
    Ok(serde_json::to_string(result)? + "\n")
}
