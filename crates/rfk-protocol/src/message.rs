//! Protocol message types for daemon communication.

use crate::version::ProtocolVersion;
use rfk_core::{
    Device, DeviceType, HardwareCommand, HardwareReport, InhibitCookie, KillswitchState,
    ObjectPath,
};
use serde::{Deserialize, Serialize};

/// Message types that can be sent by clients and adapters to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageType {
    /// Client handshake/connection request
    Connect {
        /// Client identifier (optional)
        #[serde(skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },

    /// Request the current device list
    EnumerateDevices,

    /// Request the daemon version string
    GetDaemonVersion,

    /// Take an inhibit lease
    Inhibit {
        /// Informational reason shown in diagnostics
        reason: String,
    },

    /// Release an inhibit lease held by this connection
    Uninhibit { cookie: InhibitCookie },

    /// Query whether any inhibit lease is outstanding
    IsInhibited,

    /// Set the soft block of one device
    SetBlock {
        object_path: ObjectPath,
        block: bool,
    },

    /// Set the soft block of every device of a type (ALL = every device)
    SetBlockType {
        device_type: DeviceType,
        block: bool,
    },

    /// Enter (`block = true`) or leave flight mode
    FlightMode { block: bool },

    /// Query the aggregate killswitch state of a type
    GetKillswitchState { device_type: DeviceType },

    /// Device report from a hardware adapter
    HardwareReport { report: HardwareReport },

    /// Kernel-shaped rfkill event from a hardware adapter (to be parsed)
    RfkillEvent { data: serde_json::Value },

    /// RF key press from a hardware adapter
    KeyPressed { keycode: u32 },

    /// Register this connection as the hardware adapter
    AttachAdapter,

    /// Ping to check connection
    Ping {
        /// Sequence number for matching pong response
        seq: u64,
    },

    /// Client disconnecting gracefully
    Disconnect,
}

/// Messages sent from clients to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Protocol version
    pub protocol_version: ProtocolVersion,

    /// Message payload
    #[serde(flatten)]
    pub message: MessageType,
}

impl ClientMessage {
    /// Creates a new client message with current protocol version.
    pub fn new(message: MessageType) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            message,
        }
    }

    pub fn connect(client_id: Option<String>) -> Self {
        Self::new(MessageType::Connect { client_id })
    }

    pub fn enumerate_devices() -> Self {
        Self::new(MessageType::EnumerateDevices)
    }

    pub fn get_daemon_version() -> Self {
        Self::new(MessageType::GetDaemonVersion)
    }

    pub fn inhibit(reason: impl Into<String>) -> Self {
        Self::new(MessageType::Inhibit {
            reason: reason.into(),
        })
    }

    pub fn uninhibit(cookie: InhibitCookie) -> Self {
        Self::new(MessageType::Uninhibit { cookie })
    }

    pub fn is_inhibited() -> Self {
        Self::new(MessageType::IsInhibited)
    }

    pub fn set_block(object_path: ObjectPath, block: bool) -> Self {
        Self::new(MessageType::SetBlock { object_path, block })
    }

    pub fn set_block_type(device_type: DeviceType, block: bool) -> Self {
        Self::new(MessageType::SetBlockType { device_type, block })
    }

    pub fn flight_mode(block: bool) -> Self {
        Self::new(MessageType::FlightMode { block })
    }

    pub fn get_killswitch_state(device_type: DeviceType) -> Self {
        Self::new(MessageType::GetKillswitchState { device_type })
    }

    pub fn hardware_report(report: HardwareReport) -> Self {
        Self::new(MessageType::HardwareReport { report })
    }

    pub fn rfkill_event(data: serde_json::Value) -> Self {
        Self::new(MessageType::RfkillEvent { data })
    }

    pub fn key_pressed(keycode: u32) -> Self {
        Self::new(MessageType::KeyPressed { keycode })
    }

    pub fn attach_adapter() -> Self {
        Self::new(MessageType::AttachAdapter)
    }

    pub fn ping(seq: u64) -> Self {
        Self::new(MessageType::Ping { seq })
    }

    pub fn disconnect() -> Self {
        Self::new(MessageType::Disconnect)
    }
}

/// Stable error codes carried in `DaemonMessage::Error`.
pub mod error_code {
    pub const NOT_FOUND: &str = "not_found";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const UNKNOWN_SESSION: &str = "unknown_session";
    pub const CHANNEL_CLOSED: &str = "channel_closed";
    pub const PARSE_ERROR: &str = "parse_error";
    pub const INVALID_REQUEST: &str = "invalid_request";
}

/// Messages sent from daemon to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonMessage {
    /// Connection accepted
    Connected {
        /// Daemon's protocol version
        protocol_version: ProtocolVersion,
        /// Assigned client ID
        client_id: String,
    },

    /// Connection rejected (version mismatch, too many clients)
    Rejected {
        reason: String,
        /// Daemon's protocol version (for client to upgrade)
        protocol_version: ProtocolVersion,
    },

    /// Response to `EnumerateDevices`, ordered by index
    DeviceList { devices: Vec<Device> },

    /// Response to `GetDaemonVersion`
    DaemonVersion { version: String },

    /// Response to `Inhibit`
    Inhibited { cookie: InhibitCookie },

    /// Response to `Uninhibit`
    Uninhibited { cookie: InhibitCookie },

    /// Response to `IsInhibited`
    InhibitState { inhibited: bool, leases: usize },

    /// Response to `SetBlock` / `SetBlockType`.
    ///
    /// Devices carry the requested soft value even when the change was
    /// deferred because an inhibit lease is outstanding.
    BlockResult { devices: Vec<Device> },

    /// Response to `FlightMode`, with every device it was applied to
    FlightModeResult { enabled: bool, devices: Vec<Device> },

    /// Response to `GetKillswitchState`
    KillswitchState {
        device_type: DeviceType,
        state: KillswitchState,
    },

    /// Response to `AttachAdapter`
    AdapterAttached,

    /// Hardware command for an attached adapter
    HardwareCommand { command: HardwareCommand },

    /// A device appeared
    DeviceAdded { device: Device },

    /// A device disappeared (last known state)
    DeviceRemoved { device: Device },

    /// A device's block state changed
    DeviceChanged { device: Device },

    /// An RF key was pressed
    KeyPressed { keycode: u32 },

    /// The aggregate state of a device type changed
    KillswitchStateChanged {
        device_type: DeviceType,
        state: KillswitchState,
    },

    /// Pong response to ping
    Pong { seq: u64 },

    /// Error response
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl DaemonMessage {
    pub fn connected(client_id: String) -> Self {
        Self::Connected {
            protocol_version: ProtocolVersion::CURRENT,
            client_id,
        }
    }

    pub fn rejected(reason: &str) -> Self {
        Self::Rejected {
            reason: reason.to_string(),
            protocol_version: ProtocolVersion::CURRENT,
        }
    }

    pub fn device_list(devices: Vec<Device>) -> Self {
        Self::DeviceList { devices }
    }

    pub fn daemon_version(version: impl Into<String>) -> Self {
        Self::DaemonVersion {
            version: version.into(),
        }
    }

    pub fn pong(seq: u64) -> Self {
        Self::Pong { seq }
    }

    pub fn error(message: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: None,
        }
    }

    pub fn error_with_code(message: &str, code: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: Some(code.to_string()),
        }
    }

    /// True for unsolicited notifications (as opposed to RPC responses).
    #[must_use]
    pub fn is_notification(&self) -> bool {
        matches!(
            self,
            Self::DeviceAdded { .. }
                | Self::DeviceRemoved { .. }
                | Self::DeviceChanged { .. }
                | Self::KeyPressed { .. }
                | Self::KillswitchStateChanged { .. }
                | Self::HardwareCommand { .. }
        )
    }
}
