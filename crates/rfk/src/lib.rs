//! RFK Client - talking to the rfkd daemon
//!
//! `DaemonClient` speaks the newline-delimited JSON protocol over the
//! daemon's Unix socket. The `rfk` monitor binary is built on it; any
//! other tool that wants device state or inhibit leases can use it too.
//!
//! ```rust,ignore
//! let mut client = DaemonClient::connect("/tmp/rfkd.sock", None).await?;
//! let cookie = client.inhibit("maintenance").await?;
//! while let Some(event) = client.next_event().await? {
//!     println!("{}", format_event(&event));
//! }
//! ```

pub mod client;
pub mod error;
pub mod format;

pub use client::{ClientEvent, ConnectOptions, DaemonClient, DEFAULT_SOCKET_PATH, SOCKET_ENV_VAR};
pub use error::{ClientError, Result};
pub use format::{format_device, format_event, Target};
