//! RF hardware keys.
//!
//! Only a handful of input keycodes control radios. Everything else the
//! adapter forwards is noise and gets dropped before the event bus.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::device::DeviceType;

/// Linux input keycodes (from `linux/input-event-codes.h`).
pub const KEY_BLUETOOTH: u32 = 237;
pub const KEY_WLAN: u32 = 238;
pub const KEY_UWB: u32 = 239;
pub const KEY_WIMAX: u32 = 246;
pub const KEY_RFKILL: u32 = 247;

/// A radio-control key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RfKey {
    Bluetooth,
    Wlan,
    Uwb,
    Wimax,
    /// The generic "airplane mode" key, affects every radio.
    Rfkill,
}

impl RfKey {
    /// Maps a raw keycode, returning `None` for non-RF keys.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            KEY_BLUETOOTH => Some(Self::Bluetooth),
            KEY_WLAN => Some(Self::Wlan),
            KEY_UWB => Some(Self::Uwb),
            KEY_WIMAX => Some(Self::Wimax),
            KEY_RFKILL => Some(Self::Rfkill),
            _ => None,
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            Self::Bluetooth => KEY_BLUETOOTH,
            Self::Wlan => KEY_WLAN,
            Self::Uwb => KEY_UWB,
            Self::Wimax => KEY_WIMAX,
            Self::Rfkill => KEY_RFKILL,
        }
    }

    /// Device type toggled by this key.
    pub fn device_type(&self) -> DeviceType {
        match self {
            Self::Bluetooth => DeviceType::Bluetooth,
            Self::Wlan => DeviceType::Wlan,
            Self::Uwb => DeviceType::Uwb,
            Self::Wimax => DeviceType::Wimax,
            Self::Rfkill => DeviceType::All,
        }
    }
}

impl fmt::Display for RfKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Bluetooth => "KEY_BLUETOOTH",
            Self::Wlan => "KEY_WLAN",
            Self::Uwb => "KEY_UWB",
            Self::Wimax => "KEY_WIMAX",
            Self::Rfkill => "KEY_RFKILL",
        };
        f.write_str(s)
    }
}
