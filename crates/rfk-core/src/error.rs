//! Errors for values that cannot describe a device.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Unknown device type '{0}' (expected ALL, WLAN, BLUETOOTH, UWB, WIMAX, WWAN, GPS or FM)")]
    UnknownDeviceType(String),

    /// `ALL` selects devices, it never is one
    #[error("Report for the ALL pseudo-type")]
    AllTypeReport,

    #[error("ADDED report without a device name")]
    MissingDeviceName,
}

pub type DomainResult<T> = Result<T, DomainError>;
