use serde::{Deserialize, Serialize};

/// Immediate Alert Service alert levels (Alert Level characteristic, 0x2A06)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AlertLevel {
    /// No alert, resets an active alarm
    NoAlert,
    Mild,
    High,
}

impl AlertLevel {
    pub fn as_byte(self) -> u8 {
        match self {
            Self::NoAlert => 0x00,
            Self::Mild => 0x01,
            Self::High => 0x02,
        }
    }

    pub fn is_alarm(self) -> bool {
        !matches!(self, Self::NoAlert)
    }
}

impl TryFrom<u8> for AlertLevel {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::NoAlert),
            0x01 => Ok(Self::Mild),
            0x02 => Ok(Self::High),
            other => Err(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Whether the app may use Bluetooth sharing (peripheral role)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthorizationStatus {
    NotDetermined,
    Restricted,
    Denied,
    Authorized,
}

/// Events reported by the peripheral backend, the equivalent of the
/// platform's peripheral-manager delegate callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeripheralEvent {
    StateChanged {
        powered: bool,
    },
    ServiceAdded {
        service: String,
        error: Option<String>,
    },
    AdvertisingStarted {
        error: Option<String>,
    },
    WriteRequest {
        device: String,
        characteristic: String,
        value: Vec<u8>,
    },
    ConnectionStateChanged {
        device: String,
        state: ConnectionState,
        /// Non-zero when the platform reported the change with an error
        status: u8,
    },
}

/// Identifier of a notification currently shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotificationId(pub u64);

/// Content of an alarm notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmNotification {
    pub title: String,
    pub body: String,
    pub device: String,
    pub level: AlertLevel,
}

impl AlarmNotification {
    pub fn for_alarm(device: &str, level: AlertLevel) -> Self {
        let severity = match level {
            AlertLevel::High => "High",
            AlertLevel::Mild => "Mild",
            AlertLevel::NoAlert => "No",
        };
        Self {
            title: format!("{} alert", severity),
            body: format!("Alert raised by device {}", device),
            device: device.to_string(),
            level,
        }
    }
}
