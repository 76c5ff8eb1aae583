//! Registry actor commands, errors, and events.
//!
//! This module defines the message types for communicating with the `RegistryActor`:
//! - `RegistryCommand`: Commands sent to the actor
//! - `RegistryError`: Errors that can occur during registry operations
//! - `DeviceEvent`: Events fanned out to every connected session
//!
//! All types are designed for async message passing and follow the panic-free policy.

use std::fmt;

use rfk_core::{
    Device, DeviceType, DomainError, HardwareReport, InhibitCookie, KillswitchState, ObjectPath,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use super::devices::DeviceDelta;

// ============================================================================
// Session Identity
// ============================================================================

/// Identity of a connected client session.
///
/// Assigned by the actor on connect, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Each command uses a oneshot channel for the response, enabling
/// request-response patterns in async code without blocking.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Register a new client session and enroll it on the event bus.
    Connect {
        /// Channel to send the new session's id and event queue
        respond_to: oneshot::Sender<(SessionId, mpsc::Receiver<DeviceEvent>)>,
    },

    /// Tear down a client session, releasing its inhibit leases.
    ///
    /// Responds `false` if the session was already gone.
    Disconnect {
        session: SessionId,
        respond_to: oneshot::Sender<bool>,
    },

    /// Snapshot of every device, ordered by index.
    Enumerate {
        respond_to: oneshot::Sender<Vec<Device>>,
    },

    /// Apply a report from the hardware adapter.
    ///
    /// Responds with the resulting delta, or `None` when the report was
    /// ignored or changed nothing.
    ApplyHardwareEvent {
        report: HardwareReport,
        respond_to: oneshot::Sender<Option<DeviceDelta>>,
    },

    /// An input key was pressed.
    ///
    /// Responds `true` if the keycode is an RF key and was published.
    KeyPressed {
        keycode: u32,
        respond_to: oneshot::Sender<bool>,
    },

    /// Client request to change one device's soft block.
    ///
    /// # Errors
    /// - `RegistryError::DeviceNotFound` if no device has this path
    RequestSoftBlock {
        object_path: ObjectPath,
        block: bool,
        respond_to: oneshot::Sender<Result<Device, RegistryError>>,
    },

    /// Client request to change the soft block of every device of a type.
    RequestTypeBlock {
        device_type: DeviceType,
        block: bool,
        respond_to: oneshot::Sender<Vec<Device>>,
    },

    /// Enter or leave flight mode.
    ///
    /// Responds with every device whose requested soft block changed.
    FlightMode {
        block: bool,
        respond_to: oneshot::Sender<Vec<Device>>,
    },

    /// Aggregate killswitch state of a device type.
    GetKillswitchState {
        device_type: DeviceType,
        respond_to: oneshot::Sender<KillswitchState>,
    },

    /// Take an inhibit lease for a session.
    ///
    /// # Errors
    /// - `RegistryError::UnknownSession` if the session is not connected
    Inhibit {
        session: SessionId,
        reason: String,
        respond_to: oneshot::Sender<Result<InhibitCookie, RegistryError>>,
    },

    /// Release an inhibit lease.
    ///
    /// # Errors
    /// - `RegistryError::LeaseNotFound` if the cookie is unknown
    /// - `RegistryError::Unauthorized` if another session owns the lease
    Uninhibit {
        session: SessionId,
        cookie: InhibitCookie,
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// Current inhibition status.
    GetInhibitStatus {
        respond_to: oneshot::Sender<InhibitStatus>,
    },

    /// Number of connected sessions.
    GetSessionCount {
        respond_to: oneshot::Sender<usize>,
    },
}

/// Snapshot of the inhibit arbiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InhibitStatus {
    pub inhibited: bool,
    pub leases: usize,
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors that can occur during registry operations.
///
/// Uses `thiserror` for ergonomic error handling and Display implementations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// No device has the requested object path.
    #[error("device not found: {0}")]
    DeviceNotFound(ObjectPath),

    /// No lease has the requested cookie.
    #[error("inhibit lease not found: {0}")]
    LeaseNotFound(InhibitCookie),

    /// The lease exists but belongs to another session.
    #[error("inhibit lease {cookie} is not held by {session}")]
    Unauthorized {
        cookie: InhibitCookie,
        session: SessionId,
    },

    /// The session is not (or no longer) connected.
    #[error("unknown session: {0}")]
    UnknownSession(SessionId),

    /// The response channel was closed before receiving a response.
    ///
    /// This typically indicates the actor was shut down.
    #[error("response channel closed")]
    ChannelClosed,
}

impl RegistryError {
    /// True for the not-found family (unknown path or cookie).
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::DeviceNotFound(_) | Self::LeaseNotFound(_))
    }
}

/// Why an adapter report was absorbed without changing the registry.
///
/// Never surfaced to clients; only logged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IgnoredReport {
    /// CHANGED/REMOVED for a device the registry does not know.
    #[error("unknown device")]
    UnknownDevice,

    /// The report failed validation.
    #[error("invalid report: {0}")]
    Invalid(DomainError),

    /// ADDED while the registry is at capacity.
    #[error("registry full (max: {max} devices)")]
    RegistryFull { max: usize },
}

// ============================================================================
// Device Events
// ============================================================================

/// Events published by the registry to every session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Added(Device),
    /// Carries the last-known snapshot of the removed device.
    Removed(Device),
    Changed(Device),
    KeyPressed(u32),
    /// The aggregate state of a real device type moved.
    KillswitchChanged {
        device_type: DeviceType,
        state: KillswitchState,
    },
}

impl From<DeviceDelta> for DeviceEvent {
    fn from(delta: DeviceDelta) -> Self {
        match delta {
            DeviceDelta::Added(d) => Self::Added(d),
            DeviceDelta::Changed(d) => Self::Changed(d),
            DeviceDelta::Removed(d) => Self::Removed(d),
        }
    }
}

/// Reason a session was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Client disconnected (or its connection closed).
    Explicit,

    /// The session's delivery queue overflowed.
    Overflow,

    /// The session's event receiver was dropped without disconnecting.
    ReceiverDropped,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Explicit => write!(f, "client disconnected"),
            Self::Overflow => write!(f, "delivery queue overflow"),
            Self::ReceiverDropped => write!(f, "event receiver dropped"),
        }
    }
}
