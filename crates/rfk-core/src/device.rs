//! Radio device entities and value objects.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::DomainError;

// ============================================================================
// Device Type
// ============================================================================

/// Class of radio a device belongs to.
///
/// Numeric values follow the Linux rfkill type numbering.
/// `All` is a pseudo-type used for registry-wide queries and is never
/// the type of a real device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceType {
    All,
    Wlan,
    Bluetooth,
    Uwb,
    Wimax,
    Wwan,
    Gps,
    Fm,
}

impl DeviceType {
    /// Every real device type, in rfkill order (excludes `All`).
    pub const REAL: [DeviceType; 7] = [
        Self::Wlan,
        Self::Bluetooth,
        Self::Uwb,
        Self::Wimax,
        Self::Wwan,
        Self::Gps,
        Self::Fm,
    ];

    /// Returns the rfkill numeric value.
    pub fn as_raw(&self) -> u8 {
        match self {
            Self::All => 0,
            Self::Wlan => 1,
            Self::Bluetooth => 2,
            Self::Uwb => 3,
            Self::Wimax => 4,
            Self::Wwan => 5,
            Self::Gps => 6,
            Self::Fm => 7,
        }
    }

    /// Converts an rfkill numeric value.
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::All),
            1 => Some(Self::Wlan),
            2 => Some(Self::Bluetooth),
            3 => Some(Self::Uwb),
            4 => Some(Self::Wimax),
            5 => Some(Self::Wwan),
            6 => Some(Self::Gps),
            7 => Some(Self::Fm),
            _ => None,
        }
    }

    /// Returns the wire name ("WLAN", "BLUETOOTH", ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "ALL",
            Self::Wlan => "WLAN",
            Self::Bluetooth => "BLUETOOTH",
            Self::Uwb => "UWB",
            Self::Wimax => "WIMAX",
            Self::Wwan => "WWAN",
            Self::Gps => "GPS",
            Self::Fm => "FM",
        }
    }

    /// Returns true for the `All` pseudo-type.
    #[must_use]
    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    /// Returns true if a device of type `other` is selected by this type.
    ///
    /// `All` selects every device.
    #[must_use]
    pub fn selects(&self, other: DeviceType) -> bool {
        self.is_all() || *self == other
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ALL" => Ok(Self::All),
            "WLAN" | "WIFI" => Ok(Self::Wlan),
            "BLUETOOTH" => Ok(Self::Bluetooth),
            "UWB" => Ok(Self::Uwb),
            "WIMAX" => Ok(Self::Wimax),
            "WWAN" => Ok(Self::Wwan),
            "GPS" => Ok(Self::Gps),
            "FM" => Ok(Self::Fm),
            _ => Err(DomainError::UnknownDeviceType(s.to_string())),
        }
    }
}

// ============================================================================
// Object Path
// ============================================================================

/// Prefix of every device object path.
pub const DEVICE_PATH_PREFIX: &str = "/org/freedesktop/URfkill/devices/";

/// Stable identifier of a device within the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectPath(String);

impl ObjectPath {
    /// Creates an object path from an arbitrary string.
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Computes the object path for a device index.
    pub fn for_index(index: u32) -> Self {
        Self(format!("{DEVICE_PATH_PREFIX}{index}"))
    }

    /// Extracts the device index, if this path follows the device layout.
    pub fn index(&self) -> Option<u32> {
        self.0
            .strip_prefix(DEVICE_PATH_PREFIX)
            .and_then(|s| s.parse().ok())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectPath {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ObjectPath {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for ObjectPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Killswitch State
// ============================================================================

/// Block state of a device or of a whole device type.
///
/// Ordering matters: aggregation takes the maximum, so a hard block
/// dominates a soft block which dominates unblocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KillswitchState {
    NoAdapter,
    Unblocked,
    SoftBlocked,
    HardBlocked,
}

impl KillswitchState {
    /// Derives the state from soft/hard block bits.
    pub fn from_blocks(soft: bool, hard: bool) -> Self {
        if hard {
            Self::HardBlocked
        } else if soft {
            Self::SoftBlocked
        } else {
            Self::Unblocked
        }
    }

    /// Numeric encoding of the state, `-1` for no adapter.
    pub fn as_raw(&self) -> i32 {
        match self {
            Self::NoAdapter => -1,
            Self::Unblocked => 0,
            Self::SoftBlocked => 1,
            Self::HardBlocked => 2,
        }
    }

    /// Combines platform and non-platform states for one device type.
    ///
    /// An unblocked platform switch defers to the other devices when any
    /// exist; any other platform state wins.
    pub fn aggregate(platform: Self, non_platform: Self) -> Self {
        if platform == Self::Unblocked && non_platform != Self::NoAdapter {
            non_platform
        } else {
            platform
        }
    }

    /// Computes the aggregate state over a set of devices.
    pub fn for_devices<'a>(devices: impl IntoIterator<Item = &'a Device>) -> Self {
        let mut platform = Self::NoAdapter;
        let mut non_platform = Self::NoAdapter;
        let mut platform_seen = false;

        for device in devices {
            let state = device.state();
            if device.platform {
                platform_seen = true;
                platform = platform.max(state);
            } else {
                non_platform = non_platform.max(state);
            }
        }

        if platform_seen {
            Self::aggregate(platform, non_platform)
        } else {
            non_platform
        }
    }
}

impl fmt::Display for KillswitchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoAdapter => "no adapter",
            Self::Unblocked => "unblocked",
            Self::SoftBlocked => "soft blocked",
            Self::HardBlocked => "hard blocked",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Device
// ============================================================================

/// Snapshot of a radio device as exposed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub object_path: ObjectPath,
    pub index: u32,
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    pub name: String,
    /// Software block.
    pub soft: bool,
    /// Hardware block, only ever set from adapter reports.
    pub hard: bool,
    /// Platform (firmware) level switch.
    pub platform: bool,
}

impl Device {
    /// Creates a device at `index` with its object path derived from it.
    pub fn new(index: u32, device_type: DeviceType, name: impl Into<String>) -> Self {
        Self {
            object_path: ObjectPath::for_index(index),
            index,
            device_type,
            name: name.into(),
            soft: false,
            hard: false,
            platform: false,
        }
    }

    /// Builder-style setter for the block bits.
    #[must_use]
    pub fn with_blocks(mut self, soft: bool, hard: bool, platform: bool) -> Self {
        self.soft = soft;
        self.hard = hard;
        self.platform = platform;
        self
    }

    /// Current block state of this device.
    pub fn state(&self) -> KillswitchState {
        KillswitchState::from_blocks(self.soft, self.hard)
    }

    /// True if either soft or hard blocked.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.soft || self.hard
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_type_raw_roundtrip() {
        for raw in 0..=7u8 {
            let t = DeviceType::from_raw(raw).unwrap();
            assert_eq!(t.as_raw(), raw);
        }
        assert!(DeviceType::from_raw(8).is_none());
    }

    #[test]
    fn test_device_type_parse() {
        assert_eq!("wlan".parse::<DeviceType>().unwrap(), DeviceType::Wlan);
        assert_eq!("BLUETOOTH".parse::<DeviceType>().unwrap(), DeviceType::Bluetooth);
        assert!("toaster".parse::<DeviceType>().is_err());
    }

    #[test]
    fn test_device_type_serde_uppercase() {
        let json = serde_json::to_string(&DeviceType::Wimax).unwrap();
        assert_eq!(json, "\"WIMAX\"");
        let parsed: DeviceType = serde_json::from_str("\"GPS\"").unwrap();
        assert_eq!(parsed, DeviceType::Gps);
    }

    #[test]
    fn test_all_selects_everything() {
        assert!(DeviceType::All.selects(DeviceType::Fm));
        assert!(DeviceType::Wlan.selects(DeviceType::Wlan));
        assert!(!DeviceType::Wlan.selects(DeviceType::Bluetooth));
    }

    #[test]
    fn test_object_path_for_index() {
        let path = ObjectPath::for_index(3);
        assert_eq!(path.as_str(), "/org/freedesktop/URfkill/devices/3");
        assert_eq!(path.index(), Some(3));
        assert_eq!(ObjectPath::new("/elsewhere").index(), None);
    }

    #[test]
    fn test_device_state() {
        let d = Device::new(0, DeviceType::Wlan, "phy0");
        assert_eq!(d.state(), KillswitchState::Unblocked);
        assert_eq!(d.clone().with_blocks(true, false, false).state(), KillswitchState::SoftBlocked);
        assert_eq!(d.with_blocks(true, true, false).state(), KillswitchState::HardBlocked);
    }

    #[test]
    fn test_device_wire_shape() {
        let d = Device::new(0, DeviceType::Wlan, "wlan0");
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["type"], "WLAN");
        assert_eq!(json["object_path"], "/org/freedesktop/URfkill/devices/0");
        assert_eq!(json["index"], 0);
        assert_eq!(json["soft"], false);
    }

    #[test]
    fn test_aggregate_no_devices() {
        let none: Vec<Device> = Vec::new();
        assert_eq!(KillswitchState::for_devices(&none), KillswitchState::NoAdapter);
    }

    #[test]
    fn test_aggregate_takes_maximum() {
        let devices = vec![
            Device::new(0, DeviceType::Wlan, "a"),
            Device::new(1, DeviceType::Wlan, "b").with_blocks(true, false, false),
        ];
        assert_eq!(KillswitchState::for_devices(&devices), KillswitchState::SoftBlocked);
    }

    #[test]
    fn test_aggregate_platform_rules() {
        // Unblocked platform switch defers to the regular devices
        let devices = vec![
            Device::new(0, DeviceType::Wlan, "platform").with_blocks(false, false, true),
            Device::new(1, DeviceType::Wlan, "phy0").with_blocks(true, false, false),
        ];
        assert_eq!(KillswitchState::for_devices(&devices), KillswitchState::SoftBlocked);

        // Blocked platform switch wins
        let devices = vec![
            Device::new(0, DeviceType::Wlan, "platform").with_blocks(false, true, true),
            Device::new(1, DeviceType::Wlan, "phy0"),
        ];
        assert_eq!(KillswitchState::for_devices(&devices), KillswitchState::HardBlocked);

        // Platform switch alone
        let devices = vec![Device::new(0, DeviceType::Wlan, "platform").with_blocks(false, false, true)];
        assert_eq!(KillswitchState::for_devices(&devices), KillswitchState::Unblocked);
    }
}
