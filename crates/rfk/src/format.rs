//! Text output for the monitor.

use std::fmt::Write as _;
use std::str::FromStr;

use rfk_core::{Device, DeviceType, DomainError, ObjectPath, RfKey, DEVICE_PATH_PREFIX};

use crate::client::ClientEvent;

/// Multi-line description of a device, one field per line.
pub fn format_device(device: &Device) -> String {
    let mut out = String::new();
    // Writing to a String cannot fail
    let _ = writeln!(out, "   Object Path: {}", device.object_path);
    let _ = writeln!(out, "   Index: {}", device.index);
    let _ = writeln!(out, "   Type: {}", device.device_type);
    let _ = writeln!(out, "   Name: {}", device.name);
    let _ = writeln!(out, "   Soft: {}", device.soft);
    let _ = writeln!(out, "   Hard: {}", device.hard);
    let _ = write!(out, "   Platform: {}", device.platform);
    out
}

/// Heading plus body for a notification.
pub fn format_event(event: &ClientEvent) -> String {
    match event {
        ClientEvent::DeviceAdded(device) => format!("Device added\n{}", format_device(device)),
        ClientEvent::DeviceRemoved(device) => format!("Device removed\n{}", format_device(device)),
        ClientEvent::DeviceChanged(device) => format!("Device changed\n{}", format_device(device)),
        ClientEvent::KeyPressed(keycode) => match RfKey::from_code(*keycode) {
            Some(key) => format!("*** key {keycode} ({key}) is pressed ***"),
            None => format!("*** key {keycode} is pressed ***"),
        },
        ClientEvent::KillswitchChanged { device_type, state } => {
            format!("Killswitch {device_type} is now {state}")
        }
    }
}

/// What a block/unblock command acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Every device of a type (`ALL` for every device)
    Type(DeviceType),
    /// One device
    Device(ObjectPath),
}

impl FromStr for Target {
    type Err = DomainError;

    /// Accepts an object path, a bare device index, or a type name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.starts_with(DEVICE_PATH_PREFIX) {
            return Ok(Self::Device(ObjectPath::new(s)));
        }
        if let Ok(index) = s.parse::<u32>() {
            return Ok(Self::Device(ObjectPath::for_index(index)));
        }
        s.parse::<DeviceType>().map(Self::Type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_device_fields() {
        let device = Device::new(3, DeviceType::Bluetooth, "hci0").with_blocks(true, false, false);
        let text = format_device(&device);
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 7);
        assert_eq!(lines[0], "   Object Path: /org/freedesktop/URfkill/devices/3");
        assert_eq!(lines[1], "   Index: 3");
        assert_eq!(lines[2], "   Type: BLUETOOTH");
        assert_eq!(lines[4], "   Soft: true");
        assert_eq!(lines[6], "   Platform: false");
    }

    #[test]
    fn test_format_key_event() {
        let text = format_event(&ClientEvent::KeyPressed(238));
        assert!(text.contains("key 238"));

        let text = format_event(&ClientEvent::KeyPressed(30));
        assert_eq!(text, "*** key 30 is pressed ***");
    }

    #[test]
    fn test_format_killswitch_event() {
        let text = format_event(&ClientEvent::KillswitchChanged {
            device_type: DeviceType::Wwan,
            state: rfk_core::KillswitchState::SoftBlocked,
        });
        assert_eq!(text, "Killswitch WWAN is now soft blocked");
    }

    #[test]
    fn test_target_parsing() {
        assert_eq!("wlan".parse::<Target>().unwrap(), Target::Type(DeviceType::Wlan));
        assert_eq!("ALL".parse::<Target>().unwrap(), Target::Type(DeviceType::All));
        assert_eq!(
            "2".parse::<Target>().unwrap(),
            Target::Device(ObjectPath::for_index(2))
        );
        assert_eq!(
            "/org/freedesktop/URfkill/devices/5".parse::<Target>().unwrap(),
            Target::Device(ObjectPath::for_index(5))
        );
        assert!("toaster".parse::<Target>().is_err());
    }
}
