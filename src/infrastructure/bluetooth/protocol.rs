//! Immediate Alert Service protocol
//!
//! Standard Bluetooth SIG service and characteristic definitions hosted by
//! the GATT server, plus UUID helpers shared by the backends.

use crate::domain::models::AlertLevel;
use anyhow::Result;
use std::fmt;

/// Immediate Alert Service UUID (0x1802)
pub const IMMEDIATE_ALERT_SERVICE_UUID: &str = "00001802-0000-1000-8000-00805f9b34fb";

/// Alert Level characteristic UUID (0x2A06)
pub const ALERT_LEVEL_CHAR_UUID: &str = "00002a06-0000-1000-8000-00805f9b34fb";

/// Link Loss Service UUID (0x1803)
pub const LINK_LOSS_SERVICE_UUID: &str = "00001803-0000-1000-8000-00805f9b34fb";

/// Alert level the characteristic holds before any client writes to it
pub const INITIAL_ALERT_LEVEL: AlertLevel = AlertLevel::High;

/// A 128-bit Bluetooth UUID split into its GUID fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BleUuid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl BleUuid {
    /// Expand a 16-bit SIG assigned number onto the Bluetooth base UUID
    pub const fn from_short(short: u16) -> Self {
        Self {
            data1: short as u32,
            data2: 0x0000,
            data3: 0x1000,
            data4: [0x80, 0x00, 0x00, 0x80, 0x5f, 0x9b, 0x34, 0xfb],
        }
    }
}

impl fmt::Display for BleUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d4 = &self.data4;
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            self.data1, self.data2, self.data3, d4[0], d4[1], d4[2], d4[3], d4[4], d4[5], d4[6],
            d4[7]
        )
    }
}

#[cfg(windows)]
impl From<BleUuid> for windows::core::GUID {
    fn from(uuid: BleUuid) -> Self {
        windows::core::GUID {
            data1: uuid.data1,
            data2: uuid.data2,
            data3: uuid.data3,
            data4: uuid.data4,
        }
    }
}

/// Parse UUID string to BleUuid
pub fn parse_uuid(uuid_str: &str) -> Result<BleUuid> {
    let uuid_str = uuid_str.replace('-', "");
    if uuid_str.len() != 32 || !uuid_str.is_ascii() {
        anyhow::bail!("Invalid UUID format: {}", uuid_str);
    }

    let d1 = u32::from_str_radix(&uuid_str[0..8], 16)?;
    let d2 = u16::from_str_radix(&uuid_str[8..12], 16)?;
    let d3 = u16::from_str_radix(&uuid_str[12..16], 16)?;

    let mut d4 = [0u8; 8];
    for (i, byte) in d4.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&uuid_str[16 + i * 2..18 + i * 2], 16)?;
    }

    Ok(BleUuid {
        data1: d1,
        data2: d2,
        data3: d3,
        data4: d4,
    })
}

/// Compare two UUID strings regardless of case and hyphenation
pub fn uuid_eq(a: &str, b: &str) -> bool {
    match (parse_uuid(a), parse_uuid(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Decode the value of an Alert Level write.
///
/// Only the first byte is significant.
pub fn parse_alert_level(value: &[u8]) -> Result<AlertLevel> {
    let byte = *value
        .first()
        .ok_or_else(|| anyhow::anyhow!("Empty alert level value"))?;
    AlertLevel::try_from(byte).map_err(|b| anyhow::anyhow!("Unknown alert level: {:#04x}", b))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicProperties {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicDefinition {
    pub uuid: String,
    pub properties: CharacteristicProperties,
    pub initial_value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDefinition {
    pub uuid: String,
    pub primary: bool,
    pub characteristics: Vec<CharacteristicDefinition>,
}

impl ServiceDefinition {
    /// Immediate Alert Service with its single Alert Level characteristic
    pub fn immediate_alert() -> Self {
        Self {
            uuid: IMMEDIATE_ALERT_SERVICE_UUID.to_string(),
            primary: true,
            characteristics: vec![CharacteristicDefinition {
                uuid: ALERT_LEVEL_CHAR_UUID.to_string(),
                properties: CharacteristicProperties {
                    read: false,
                    write: true,
                    write_without_response: true,
                },
                initial_value: vec![INITIAL_ALERT_LEVEL.as_byte()],
            }],
        }
    }
}
