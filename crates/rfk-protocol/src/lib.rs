//! RFK Protocol - Wire protocol for daemon communication
//!
//! This crate provides message types and parsing for communication
//! between hardware adapters and the daemon, and between the daemon
//! and its clients. Messages are newline-delimited JSON.

pub mod message;
pub mod parse;
pub mod version;

pub use message::{error_code, ClientMessage, DaemonMessage, MessageType};
pub use parse::{KernelIndexMap, RawRfkillEvent};
pub use version::{ProtocolVersion, VersionError};

/// Default socket path for the daemon.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/rfkd.sock";

/// Environment variable naming the daemon socket.
pub const SOCKET_ENV_VAR: &str = "RFKD_SOCKET";
