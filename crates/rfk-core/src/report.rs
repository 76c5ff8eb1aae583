//! Hardware adapter reports.
//!
//! A report is the only way device state enters the registry: the
//! adapter observes the kernel (or a modem stack) and describes what
//! changed. Reports are validated here before the registry sees them.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::device::{Device, DeviceType, ObjectPath};
use crate::error::{DomainError, DomainResult};

/// What happened to the reported device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReportOp {
    Added,
    Changed,
    Removed,
}

impl fmt::Display for ReportOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Added => "ADDED",
            Self::Changed => "CHANGED",
            Self::Removed => "REMOVED",
        };
        f.write_str(s)
    }
}

/// A single kill-switch transition observed by the hardware adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareReport {
    /// Path of an already-known device. When absent, CHANGED and
    /// REMOVED reports are resolved by `(device_type, name)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_path: Option<ObjectPath>,
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    pub name: String,
    #[serde(default)]
    pub soft: bool,
    #[serde(default)]
    pub hard: bool,
    #[serde(default)]
    pub platform: bool,
    pub op: ReportOp,
}

impl HardwareReport {
    /// Creates a report with all block bits cleared.
    pub fn new(op: ReportOp, device_type: DeviceType, name: impl Into<String>) -> Self {
        Self {
            object_path: None,
            device_type,
            name: name.into(),
            soft: false,
            hard: false,
            platform: false,
            op,
        }
    }

    pub fn added(device_type: DeviceType, name: impl Into<String>) -> Self {
        Self::new(ReportOp::Added, device_type, name)
    }

    pub fn changed(device_type: DeviceType, name: impl Into<String>) -> Self {
        Self::new(ReportOp::Changed, device_type, name)
    }

    pub fn removed(device_type: DeviceType, name: impl Into<String>) -> Self {
        Self::new(ReportOp::Removed, device_type, name)
    }

    #[must_use]
    pub fn with_path(mut self, path: ObjectPath) -> Self {
        self.object_path = Some(path);
        self
    }

    #[must_use]
    pub fn soft(mut self, soft: bool) -> Self {
        self.soft = soft;
        self
    }

    #[must_use]
    pub fn hard(mut self, hard: bool) -> Self {
        self.hard = hard;
        self
    }

    #[must_use]
    pub fn platform(mut self, platform: bool) -> Self {
        self.platform = platform;
        self
    }

    /// Checks the report can describe a real device.
    ///
    /// # Errors
    ///
    /// - `AllTypeReport` if the type is the `ALL` pseudo-type
    /// - `MissingDeviceName` if an ADDED report has an empty name
    pub fn validate(&self) -> DomainResult<()> {
        if self.device_type.is_all() {
            return Err(DomainError::AllTypeReport);
        }
        if self.op == ReportOp::Added && self.name.trim().is_empty() {
            return Err(DomainError::MissingDeviceName);
        }
        Ok(())
    }
}

/// Outbound request for the hardware adapter to apply.
///
/// The daemon never touches hardware itself; it asks the attached
/// adapter to change the soft block of one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum HardwareCommand {
    SetSoftBlock {
        object_path: ObjectPath,
        index: u32,
        #[serde(rename = "type")]
        device_type: DeviceType,
        name: String,
        soft: bool,
    },
}

impl HardwareCommand {
    /// Asks the adapter to put `device` into its recorded soft-block state.
    pub fn set_soft_block(device: &Device) -> Self {
        Self::SetSoftBlock {
            object_path: device.object_path.clone(),
            index: device.index,
            device_type: device.device_type,
            name: device.name.clone(),
            soft: device.soft,
        }
    }

    /// Object path of the device the command targets.
    pub fn object_path(&self) -> &ObjectPath {
        match self {
            Self::SetSoftBlock { object_path, .. } => object_path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let report = HardwareReport::changed(DeviceType::Wlan, "wlan0").hard(true);
        assert_eq!(report.op, ReportOp::Changed);
        assert!(report.hard);
        assert!(!report.soft);
        assert!(report.object_path.is_none());
    }

    #[test]
    fn test_validate_rejects_all_type() {
        let report = HardwareReport::added(DeviceType::All, "everything");
        assert_eq!(report.validate(), Err(DomainError::AllTypeReport));
    }

    #[test]
    fn test_validate_rejects_unnamed_add() {
        assert_eq!(
            HardwareReport::added(DeviceType::Fm, "  ").validate(),
            Err(DomainError::MissingDeviceName)
        );
        // Removal by path does not need a name
        let report = HardwareReport::removed(DeviceType::Fm, "").with_path(ObjectPath::for_index(1));
        assert!(report.validate().is_ok());
    }

    #[test]
    fn test_deserialize_defaults_block_bits() {
        let json = r#"{"type":"BLUETOOTH","name":"hci0","op":"ADDED"}"#;
        let report: HardwareReport = serde_json::from_str(json).unwrap();
        assert_eq!(report.device_type, DeviceType::Bluetooth);
        assert!(!report.soft && !report.hard && !report.platform);
    }

    #[test]
    fn test_set_soft_block_command_wire_shape() {
        let device = Device::new(2, DeviceType::Bluetooth, "hci0").with_blocks(true, false, false);
        let cmd = HardwareCommand::set_soft_block(&device);
        assert_eq!(cmd.object_path(), &ObjectPath::for_index(2));

        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["command"], "set_soft_block");
        assert_eq!(json["type"], "BLUETOOTH");
        assert_eq!(json["soft"], true);
    }
}
