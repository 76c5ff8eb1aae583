//! Device registry using Actor pattern.
//!
//! The registry is the central state manager for every kill switch, every
//! inhibit lease and every connected session. It receives commands via a
//! tokio mpsc channel and is the single source of truth for device state.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌──────────────────┐
//! │ Hardware adapter│────▶│  RegistryActor  │────▶│ EventBus queues  │
//! └─────────────────┘     └─────────────────┘     └──────────────────┘
//!         ▲                       │                       │
//!         │   HardwareCommand     │   DeviceTable         │   DeviceEvent
//!         │   (broadcast)         │   InhibitArbiter      │   (per session)
//!         └───────────────────────┘                       ▼
//!                                                  Connected clients
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use tokio::sync::{broadcast, mpsc};

mod actor;
mod arbiter;
mod bus;
mod commands;
mod devices;
mod handle;

pub use actor::RegistryActor;
pub use arbiter::{InhibitArbiter, Lease, Release};
pub use bus::{EventBus, PublishOutcome, DEFAULT_QUEUE_DEPTH};
pub use commands::{
    DeviceEvent, DisconnectReason, IgnoredReport, InhibitStatus, RegistryCommand, RegistryError,
    SessionId,
};
pub use devices::{DeviceDelta, DeviceTable, MAX_DEVICES};
pub use handle::RegistryHandle;

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 100;

/// Holds the commands of two ALL blocks over a full device table.
const HARDWARE_BUFFER: usize = MAX_DEVICES * 2;

/// Tunables for the registry actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryOptions {
    /// Capacity of each session's delivery queue.
    pub queue_depth: usize,
    /// RF keys toggle the matching device type.
    pub key_control: bool,
    /// Newly added non-platform devices are re-asserted to hardware.
    pub force_sync: bool,
    /// The generic RF key toggles flight mode instead of every device.
    pub master_key: bool,
    /// Leaving flight mode always unblocks WWAN.
    pub strict_flight_mode: bool,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            queue_depth: DEFAULT_QUEUE_DEPTH,
            key_control: true,
            force_sync: false,
            master_key: false,
            strict_flight_mode: false,
        }
    }
}

/// Spawn the registry actor and return a handle for interaction.
///
/// This function:
/// 1. Creates command and hardware channels
/// 2. Spawns the RegistryActor on a tokio task
/// 3. Returns a RegistryHandle for client use
///
/// # Panics
///
/// This function does NOT panic. All operations are safe.
///
/// # Example
///
/// ```no_run
/// use rfkd::registry::{spawn_registry, RegistryOptions};
///
/// #[tokio::main]
/// async fn main() {
///     let handle = spawn_registry(RegistryOptions::default());
///
///     // Use handle to interact with registry
///     let devices = handle.enumerate().await;
/// }
/// ```
pub fn spawn_registry(options: RegistryOptions) -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (hardware_tx, _) = broadcast::channel(HARDWARE_BUFFER);

    let actor = RegistryActor::new(cmd_rx, hardware_tx.clone(), options);
    tokio::spawn(actor.run());

    RegistryHandle::new(cmd_tx, hardware_tx)
}
