//! Device table - the registry's view of every kill switch.
//!
//! Devices are keyed by their registry index. Indices are assigned on
//! ADDED, start at 0 and are never reused, so iteration order is
//! insertion order.

use std::collections::BTreeMap;

use rfk_core::{Device, DeviceType, HardwareReport, KillswitchState, ObjectPath, ReportOp};
use tracing::debug;

use super::commands::{IgnoredReport, RegistryError};

/// Maximum number of devices the registry tracks at once.
pub const MAX_DEVICES: usize = 256;

/// A state transition produced by applying an adapter report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceDelta {
    Added(Device),
    Changed(Device),
    Removed(Device),
}

impl DeviceDelta {
    pub fn device(&self) -> &Device {
        match self {
            Self::Added(d) | Self::Changed(d) | Self::Removed(d) => d,
        }
    }
}

#[derive(Debug, Clone)]
struct DeviceEntry {
    device: Device,
    /// Soft-block value requested while inhibited, applied on resync.
    pending_soft: Option<bool>,
}

/// Ordered table of known devices.
#[derive(Debug, Default)]
pub struct DeviceTable {
    entries: BTreeMap<u32, DeviceEntry>,
    next_index: u32,
}

impl DeviceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of every device in index order.
    pub fn enumerate(&self) -> Vec<Device> {
        self.entries.values().map(|e| e.device.clone()).collect()
    }

    pub fn get(&self, path: &ObjectPath) -> Option<&Device> {
        self.index_of_path(path)
            .and_then(|idx| self.entries.get(&idx))
            .map(|e| &e.device)
    }

    /// Paths of every device selected by `device_type`, in index order.
    pub fn paths_of_type(&self, device_type: DeviceType) -> Vec<ObjectPath> {
        self.entries
            .values()
            .filter(|e| device_type.selects(e.device.device_type))
            .map(|e| e.device.object_path.clone())
            .collect()
    }

    /// Devices selected by `device_type`, in index order.
    pub fn devices_of_type(&self, device_type: DeviceType) -> impl Iterator<Item = &Device> {
        self.entries
            .values()
            .map(|e| &e.device)
            .filter(move |d| device_type.selects(d.device_type))
    }

    /// Aggregate state of a type. `ALL` is answered as WLAN.
    pub fn killswitch_state(&self, device_type: DeviceType) -> KillswitchState {
        let device_type = if device_type.is_all() {
            DeviceType::Wlan
        } else {
            device_type
        };
        KillswitchState::for_devices(self.devices_of_type(device_type))
    }

    /// Applies one adapter report.
    ///
    /// Returns `Ok(None)` when the report is valid but changes nothing.
    /// An ADDED report for an already known `(type, name)` is treated as
    /// CHANGED.
    ///
    /// # Errors
    ///
    /// Returns the reason the report was ignored; the table is unchanged.
    pub fn apply_report(
        &mut self,
        report: &HardwareReport,
    ) -> Result<Option<DeviceDelta>, IgnoredReport> {
        report.validate().map_err(IgnoredReport::Invalid)?;

        let existing = self.resolve(report);

        match (report.op, existing) {
            (ReportOp::Added, None) => self.insert(report).map(Some),
            (ReportOp::Added | ReportOp::Changed, Some(idx)) => Ok(self.update(idx, report)),
            (ReportOp::Changed | ReportOp::Removed, None) => Err(IgnoredReport::UnknownDevice),
            (ReportOp::Removed, Some(idx)) => Ok(self
                .entries
                .remove(&idx)
                .map(|entry| DeviceDelta::Removed(entry.device))),
        }
    }

    /// Sets the soft-block of a device right away.
    ///
    /// Clears any pending value for the device. Returns the device and
    /// whether its soft flag changed.
    ///
    /// # Errors
    ///
    /// - `RegistryError::DeviceNotFound` if no device has this path
    pub fn set_soft(
        &mut self,
        path: &ObjectPath,
        soft: bool,
    ) -> Result<(Device, bool), RegistryError> {
        let entry = self.entry_mut(path)?;
        entry.pending_soft = None;
        let changed = entry.device.soft != soft;
        entry.device.soft = soft;
        Ok((entry.device.clone(), changed))
    }

    /// Records a soft-block request to apply once inhibition ends.
    ///
    /// The stored device is untouched; the returned snapshot carries the
    /// requested value.
    ///
    /// # Errors
    ///
    /// - `RegistryError::DeviceNotFound` if no device has this path
    pub fn defer_soft(&mut self, path: &ObjectPath, soft: bool) -> Result<Device, RegistryError> {
        let entry = self.entry_mut(path)?;
        entry.pending_soft = Some(soft);
        let mut snapshot = entry.device.clone();
        snapshot.soft = soft;
        Ok(snapshot)
    }

    /// Drains pending soft-block requests in index order.
    pub fn take_pending(&mut self) -> Vec<(ObjectPath, bool)> {
        self.entries
            .values_mut()
            .filter_map(|e| {
                e.pending_soft
                    .take()
                    .map(|soft| (e.device.object_path.clone(), soft))
            })
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.pending_soft.is_some())
            .count()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn index_of_path(&self, path: &ObjectPath) -> Option<u32> {
        path.index()
            .filter(|idx| {
                self.entries
                    .get(idx)
                    .is_some_and(|e| &e.device.object_path == path)
            })
    }

    fn entry_mut(&mut self, path: &ObjectPath) -> Result<&mut DeviceEntry, RegistryError> {
        let idx = self
            .index_of_path(path)
            .ok_or_else(|| RegistryError::DeviceNotFound(path.clone()))?;
        self.entries
            .get_mut(&idx)
            .ok_or_else(|| RegistryError::DeviceNotFound(path.clone()))
    }

    /// Path first, then `(type, name)`.
    fn resolve(&self, report: &HardwareReport) -> Option<u32> {
        if let Some(path) = &report.object_path {
            return self.index_of_path(path);
        }
        self.entries
            .iter()
            .find(|(_, e)| e.device.device_type == report.device_type && e.device.name == report.name)
            .map(|(idx, _)| *idx)
    }

    fn insert(&mut self, report: &HardwareReport) -> Result<DeviceDelta, IgnoredReport> {
        if self.entries.len() >= MAX_DEVICES {
            return Err(IgnoredReport::RegistryFull { max: MAX_DEVICES });
        }

        let index = self.next_index;
        self.next_index = self.next_index.saturating_add(1);

        let device = Device::new(index, report.device_type, report.name.clone()).with_blocks(
            report.soft,
            report.hard,
            report.platform,
        );
        debug!(
            object_path = %device.object_path,
            device_type = %device.device_type,
            name = %device.name,
            "Device added"
        );

        self.entries.insert(
            index,
            DeviceEntry {
                device: device.clone(),
                pending_soft: None,
            },
        );
        Ok(DeviceDelta::Added(device))
    }

    fn update(&mut self, idx: u32, report: &HardwareReport) -> Option<DeviceDelta> {
        let entry = self.entries.get_mut(&idx)?;
        let device = &mut entry.device;

        if device.soft == report.soft
            && device.hard == report.hard
            && device.platform == report.platform
        {
            return None;
        }

        device.soft = report.soft;
        device.hard = report.hard;
        device.platform = report.platform;
        Some(DeviceDelta::Changed(device.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(table: &mut DeviceTable, device_type: DeviceType, name: &str) -> Device {
        match table.apply_report(&HardwareReport::added(device_type, name)) {
            Ok(Some(DeviceDelta::Added(d))) => d,
            other => panic!("expected Added, got {other:?}"),
        }
    }

    #[test]
    fn test_added_assigns_increasing_indices() {
        let mut table = DeviceTable::new();
        let a = add(&mut table, DeviceType::Wlan, "phy0");
        let b = add(&mut table, DeviceType::Bluetooth, "hci0");

        assert_eq!(a.index, 0);
        assert_eq!(b.index, 1);
        assert_eq!(a.object_path, ObjectPath::for_index(0));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_indices_are_not_reused_after_removal() {
        let mut table = DeviceTable::new();
        add(&mut table, DeviceType::Wlan, "phy0");
        table
            .apply_report(&HardwareReport::removed(DeviceType::Wlan, "phy0"))
            .unwrap();

        let again = add(&mut table, DeviceType::Wlan, "phy0");
        assert_eq!(again.index, 1);
    }

    #[test]
    fn test_duplicate_added_is_a_change() {
        let mut table = DeviceTable::new();
        add(&mut table, DeviceType::Wlan, "phy0");

        let delta = table
            .apply_report(&HardwareReport::added(DeviceType::Wlan, "phy0").soft(true))
            .unwrap();
        assert!(matches!(delta, Some(DeviceDelta::Changed(ref d)) if d.soft && d.index == 0));
        assert_eq!(table.len(), 1);

        // Same state again: nothing to report
        let delta = table
            .apply_report(&HardwareReport::added(DeviceType::Wlan, "phy0").soft(true))
            .unwrap();
        assert!(delta.is_none());
    }

    #[test]
    fn test_changed_is_idempotent() {
        let mut table = DeviceTable::new();
        add(&mut table, DeviceType::Wlan, "phy0");

        let report = HardwareReport::changed(DeviceType::Wlan, "phy0").hard(true);
        assert!(table.apply_report(&report).unwrap().is_some());
        assert!(table.apply_report(&report).unwrap().is_none());
    }

    #[test]
    fn test_changed_resolves_by_path() {
        let mut table = DeviceTable::new();
        add(&mut table, DeviceType::Wlan, "phy0");

        let report = HardwareReport::changed(DeviceType::Wlan, "renamed")
            .with_path(ObjectPath::for_index(0))
            .soft(true);
        let delta = table.apply_report(&report).unwrap().unwrap();
        assert_eq!(delta.device().name, "phy0");
        assert!(delta.device().soft);
    }

    #[test]
    fn test_unknown_device_reports_are_ignored() {
        let mut table = DeviceTable::new();
        let err = table
            .apply_report(&HardwareReport::changed(DeviceType::Wlan, "ghost"))
            .unwrap_err();
        assert_eq!(err, IgnoredReport::UnknownDevice);

        let err = table
            .apply_report(&HardwareReport::removed(DeviceType::Wlan, "ghost"))
            .unwrap_err();
        assert_eq!(err, IgnoredReport::UnknownDevice);
        assert!(table.is_empty());
    }

    #[test]
    fn test_all_typed_report_is_rejected() {
        let mut table = DeviceTable::new();
        let err = table
            .apply_report(&HardwareReport::added(DeviceType::All, "everything"))
            .unwrap_err();
        assert!(matches!(err, IgnoredReport::Invalid(_)));
    }

    #[test]
    fn test_removed_returns_last_snapshot() {
        let mut table = DeviceTable::new();
        add(&mut table, DeviceType::Gps, "gps0");
        table
            .apply_report(&HardwareReport::changed(DeviceType::Gps, "gps0").hard(true))
            .unwrap();

        let delta = table
            .apply_report(&HardwareReport::removed(DeviceType::Gps, "gps0"))
            .unwrap()
            .unwrap();
        assert!(matches!(delta, DeviceDelta::Removed(ref d) if d.hard));
        assert!(table.get(&ObjectPath::for_index(0)).is_none());
    }

    #[test]
    fn test_registry_full() {
        let mut table = DeviceTable::new();
        for i in 0..MAX_DEVICES {
            add(&mut table, DeviceType::Wwan, &format!("wwan{i}"));
        }
        let err = table
            .apply_report(&HardwareReport::added(DeviceType::Wwan, "one-too-many"))
            .unwrap_err();
        assert_eq!(err, IgnoredReport::RegistryFull { max: MAX_DEVICES });
    }

    #[test]
    fn test_set_soft_reports_change() {
        let mut table = DeviceTable::new();
        let dev = add(&mut table, DeviceType::Bluetooth, "hci0");

        let (device, changed) = table.set_soft(&dev.object_path, true).unwrap();
        assert!(changed && device.soft);

        let (_, changed) = table.set_soft(&dev.object_path, true).unwrap();
        assert!(!changed);
    }

    #[test]
    fn test_set_soft_unknown_path() {
        let mut table = DeviceTable::new();
        let err = table.set_soft(&ObjectPath::for_index(3), true).unwrap_err();
        assert!(matches!(err, RegistryError::DeviceNotFound(_)));

        let err = table.set_soft(&ObjectPath::new("/not/a/device"), true).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_deferred_soft_is_held_until_drained() {
        let mut table = DeviceTable::new();
        let a = add(&mut table, DeviceType::Wlan, "phy0");
        let b = add(&mut table, DeviceType::Wlan, "phy1");

        // Later request wins, stored value untouched
        let snapshot = table.defer_soft(&b.object_path, true).unwrap();
        assert!(snapshot.soft);
        table.defer_soft(&a.object_path, true).unwrap();
        table.defer_soft(&a.object_path, false).unwrap();
        assert!(!table.get(&b.object_path).unwrap().soft);
        assert_eq!(table.pending_count(), 2);

        let pending = table.take_pending();
        assert_eq!(
            pending,
            vec![(a.object_path.clone(), false), (b.object_path.clone(), true)]
        );
        assert_eq!(table.pending_count(), 0);
        assert!(table.take_pending().is_empty());
    }

    #[test]
    fn test_pending_dropped_with_device() {
        let mut table = DeviceTable::new();
        let a = add(&mut table, DeviceType::Wlan, "phy0");
        table.defer_soft(&a.object_path, true).unwrap();
        table
            .apply_report(&HardwareReport::removed(DeviceType::Wlan, "phy0"))
            .unwrap();
        assert!(table.take_pending().is_empty());
    }

    #[test]
    fn test_killswitch_state_for_type() {
        let mut table = DeviceTable::new();
        assert_eq!(table.killswitch_state(DeviceType::Wlan), KillswitchState::NoAdapter);

        add(&mut table, DeviceType::Wlan, "phy0");
        add(&mut table, DeviceType::Bluetooth, "hci0");
        table
            .apply_report(&HardwareReport::changed(DeviceType::Bluetooth, "hci0").soft(true))
            .unwrap();

        assert_eq!(table.killswitch_state(DeviceType::Wlan), KillswitchState::Unblocked);
        assert_eq!(
            table.killswitch_state(DeviceType::Bluetooth),
            KillswitchState::SoftBlocked
        );
        // ALL answers for WLAN
        assert_eq!(table.killswitch_state(DeviceType::All), KillswitchState::Unblocked);
        assert_eq!(table.killswitch_state(DeviceType::Fm), KillswitchState::NoAdapter);
    }

    #[test]
    fn test_paths_of_type_all_selects_everything() {
        let mut table = DeviceTable::new();
        add(&mut table, DeviceType::Wlan, "phy0");
        add(&mut table, DeviceType::Bluetooth, "hci0");

        assert_eq!(table.paths_of_type(DeviceType::All).len(), 2);
        assert_eq!(
            table.paths_of_type(DeviceType::Bluetooth),
            vec![ObjectPath::for_index(1)]
        );
    }
}
