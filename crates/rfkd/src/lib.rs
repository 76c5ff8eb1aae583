//! rfkd - radio kill-switch daemon library
//!
//! Everything the `rfkd` binary runs, usable in-process for tests and
//! embedding:
//!
//! - [`registry`]: the actor that owns every device, inhibit lease and
//!   session queue, plus the handle used to talk to it
//! - [`session`]: connect/disconnect lifecycle and client RPC routing
//! - [`server`]: the Unix socket transport clients and adapters use
//! - [`config`]: `config.toml` loading and validation
//!
//! # Data flow
//!
//! ```text
//! adapter ── report ──▶ RegistryActor ── DeviceEvent ──▶ session queue ──▶ client
//!    ▲                      │
//!    └── HardwareCommand ───┘ (broadcast)
//! ```
//!
//! All state changes are serialized through the actor's command channel,
//! so every session observes events in the same order.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//!   outside tests
//! - A closed channel surfaces as `RegistryError::ChannelClosed`

pub mod config;
pub mod registry;
pub mod server;
pub mod session;
