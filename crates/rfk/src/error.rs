//! Error types for the rfk client.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::io;
use thiserror::Error;

// ============================================================================
// Client Error Type
// ============================================================================

/// Errors talking to the daemon.
///
/// Connection errors suggest checking that `rfkd` is running; protocol
/// errors usually mean the client and daemon are different versions.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Could not reach the daemon socket.
    #[error("Failed to connect to daemon: {0}")]
    DaemonConnection(String),

    /// Client and daemon speak incompatible protocol versions.
    #[error("Protocol version mismatch (client: {client_version}, daemon: {daemon_version})")]
    VersionMismatch {
        client_version: String,
        daemon_version: String,
    },

    /// The daemon refused the handshake (for example, too many clients).
    #[error("Connection rejected: {0}")]
    Rejected(String),

    /// The daemon answered a request with an error.
    #[error("Daemon error: {message}")]
    Daemon {
        message: String,
        /// Stable error code, see `rfk_protocol::error_code`
        code: Option<String>,
    },

    /// The daemon sent something that does not answer the request.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// The daemon closed the connection.
    #[error("Daemon closed the connection")]
    Disconnected,

    /// I/O error passthrough.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON parse error passthrough.
    #[error("Failed to parse message: {0}")]
    ParseError(#[from] serde_json::Error),
}

impl ClientError {
    /// Stable error code of a daemon-side failure.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Daemon { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

/// Convenience Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

// ============================================================================
// Tests
// ============================================================================
