//! Parsing kernel-shaped rfkill events sent by hardware adapters.
//!
//! Adapters that sit directly on `/dev/rfkill` can forward each
//! `struct rfkill_event` as JSON without translating it first. This
//! module turns those into [`HardwareReport`]s.

use std::collections::HashMap;

use rfk_core::{DeviceType, HardwareReport, ObjectPath, ReportOp};
use serde::Deserialize;

/// `RFKILL_OP_ADD`
pub const RFKILL_OP_ADD: u8 = 0;
/// `RFKILL_OP_DEL`
pub const RFKILL_OP_DEL: u8 = 1;
/// `RFKILL_OP_CHANGE`
pub const RFKILL_OP_CHANGE: u8 = 2;
/// `RFKILL_OP_CHANGE_ALL`
pub const RFKILL_OP_CHANGE_ALL: u8 = 3;

/// Raw rfkill event as read from the kernel, plus the device name the
/// adapter looked up in sysfs.
///
/// Block bits are `u8` like the kernel struct; anything non-zero is set.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRfkillEvent {
    /// Kernel rfkill index (not the registry index)
    pub idx: u32,
    #[serde(rename = "type")]
    pub rf_type: u8,
    pub op: u8,
    #[serde(default)]
    pub soft: u8,
    #[serde(default)]
    pub hard: u8,
    /// Name from `/sys/class/rfkill/rfkill<idx>/name`
    #[serde(default)]
    pub name: Option<String>,
    /// Whether the switch belongs to a platform driver
    #[serde(default)]
    pub platform: Option<bool>,
}

impl RawRfkillEvent {
    /// Maps the kernel op to a report op.
    ///
    /// `CHANGE_ALL` is a request, not an observation, so it maps to `None`.
    pub fn report_op(&self) -> Option<ReportOp> {
        match self.op {
            RFKILL_OP_ADD => Some(ReportOp::Added),
            RFKILL_OP_DEL => Some(ReportOp::Removed),
            RFKILL_OP_CHANGE => Some(ReportOp::Changed),
            _ => None,
        }
    }

    /// Name used to identify the device: the sysfs name, or
    /// `rfkill<idx>` when the adapter could not read one.
    pub fn device_name(&self) -> String {
        match &self.name {
            Some(name) if !name.trim().is_empty() => name.clone(),
            _ => format!("rfkill{}", self.idx),
        }
    }

    /// Converts to a hardware report.
    ///
    /// Returns `None` for unknown types, the ALL pseudo-type and ops that
    /// do not describe a single device.
    pub fn to_report(&self) -> Option<HardwareReport> {
        let op = self.report_op()?;
        let device_type = DeviceType::from_raw(self.rf_type)?;
        if device_type.is_all() {
            return None;
        }

        Some(
            HardwareReport::new(op, device_type, self.device_name())
                .soft(self.soft != 0)
                .hard(self.hard != 0)
                .platform(self.platform.unwrap_or(false)),
        )
    }
}

/// Kernel rfkill index to registry object path, per adapter.
///
/// Kernel CHANGE and DEL events carry the index but the adapter may not
/// be able to read the sysfs name any more, so later events are matched
/// by the path learnt when the device was added.
#[derive(Debug, Default)]
pub struct KernelIndexMap {
    paths: HashMap<u32, ObjectPath>,
}

impl KernelIndexMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Converts `raw` into a report, pinned to the known path of its
    /// kernel index for CHANGE and DEL.
    pub fn report_for(&self, raw: &RawRfkillEvent) -> Option<HardwareReport> {
        let report = raw.to_report()?;
        if report.op == ReportOp::Added {
            return Some(report);
        }
        Some(match self.paths.get(&raw.idx) {
            Some(path) => report.with_path(path.clone()),
            None => report,
        })
    }

    pub fn learn(&mut self, idx: u32, path: ObjectPath) {
        self.paths.insert(idx, path);
    }

    pub fn forget(&mut self, idx: u32) -> Option<ObjectPath> {
        self.paths.remove(&idx)
    }

    pub fn path(&self, idx: u32) -> Option<&ObjectPath> {
        self.paths.get(&idx)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}
