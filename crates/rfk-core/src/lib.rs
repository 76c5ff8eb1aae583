//! RFK Core - Shared types for radio kill-switch management
//!
//! This crate provides the core domain types shared between
//! the daemon (rfkd) and its clients (rfk).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod device;
pub mod error;
pub mod inhibit;
pub mod key;
pub mod report;

// Re-exports for convenience
pub use device::{Device, DeviceType, KillswitchState, ObjectPath, DEVICE_PATH_PREFIX};
pub use error::{DomainError, DomainResult};
pub use inhibit::InhibitCookie;
pub use key::{RfKey, KEY_BLUETOOTH, KEY_RFKILL, KEY_UWB, KEY_WIMAX, KEY_WLAN};
pub use report::{HardwareCommand, HardwareReport, ReportOp};
