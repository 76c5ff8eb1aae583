//! Async front end to the registry task.
//!
//! Every call is one command plus one oneshot reply. A send or receive
//! failure means the task is gone and surfaces as
//! `RegistryError::ChannelClosed`.

use rfk_core::{
    Device, DeviceType, HardwareCommand, HardwareReport, InhibitCookie, KillswitchState,
    ObjectPath,
};
use tokio::sync::{broadcast, mpsc, oneshot};

use super::commands::{DeviceEvent, InhibitStatus, RegistryCommand, RegistryError, SessionId};
use super::devices::DeviceDelta;

// ============================================================================
// Registry Handle
// ============================================================================

/// Clonable handle to the registry task.
///
/// Every method can also fail with `RegistryError::ChannelClosed`; the
/// `# Errors` sections list only the other cases.
///
/// # Usage
///
/// ```ignore
/// let handle = registry_handle.clone();
///
/// let (session, mut events) = handle.connect().await?;
/// let devices = handle.enumerate().await?;
/// while let Some(event) = events.recv().await {
///     // Handle event
/// }
/// ```
#[derive(Clone)]
pub struct RegistryHandle {
    sender: mpsc::Sender<RegistryCommand>,

    /// Adapters subscribe here for soft-block changes
    hardware_sender: broadcast::Sender<HardwareCommand>,
}

impl RegistryHandle {
    pub fn new(
        sender: mpsc::Sender<RegistryCommand>,
        hardware_sender: broadcast::Sender<HardwareCommand>,
    ) -> Self {
        Self {
            sender,
            hardware_sender,
        }
    }

    /// Sends a command built around a fresh oneshot and awaits the reply.
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RegistryCommand,
    ) -> Result<T, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(build(tx))
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)
    }

    /// Register a new session and receive its event queue.
    pub async fn connect(
        &self,
    ) -> Result<(SessionId, mpsc::Receiver<DeviceEvent>), RegistryError> {
        self.request(|respond_to| RegistryCommand::Connect { respond_to })
            .await
    }

    /// Tear down a session. Returns false if it was already gone.
    pub async fn disconnect(&self, session: SessionId) -> Result<bool, RegistryError> {
        self.request(|respond_to| RegistryCommand::Disconnect {
            session,
            respond_to,
        })
        .await
    }

    /// Get every device, ordered by index.
    pub async fn enumerate(&self) -> Result<Vec<Device>, RegistryError> {
        self.request(|respond_to| RegistryCommand::Enumerate { respond_to })
            .await
    }

    /// Apply an adapter report.
    ///
    /// Returns the resulting delta, or `None` if the report was ignored
    /// or changed nothing.
    pub async fn apply_hardware_event(
        &self,
        report: HardwareReport,
    ) -> Result<Option<DeviceDelta>, RegistryError> {
        self.request(|respond_to| RegistryCommand::ApplyHardwareEvent { report, respond_to })
            .await
    }

    /// Report an input key press. Returns true for RF keys.
    pub async fn key_pressed(&self, keycode: u32) -> Result<bool, RegistryError> {
        self.request(|respond_to| RegistryCommand::KeyPressed {
            keycode,
            respond_to,
        })
        .await
    }

    /// Request a soft-block change for one device.
    ///
    /// While inhibited the request is held back and the returned device
    /// carries the requested value.
    ///
    /// # Errors
    ///
    /// - `RegistryError::DeviceNotFound` if no device has this path
    pub async fn request_soft_block(
        &self,
        object_path: ObjectPath,
        block: bool,
    ) -> Result<Device, RegistryError> {
        self.request(|respond_to| RegistryCommand::RequestSoftBlock {
            object_path,
            block,
            respond_to,
        })
        .await?
    }

    /// Request a soft-block change for every device of a type.
    pub async fn request_type_block(
        &self,
        device_type: DeviceType,
        block: bool,
    ) -> Result<Vec<Device>, RegistryError> {
        self.request(|respond_to| RegistryCommand::RequestTypeBlock {
            device_type,
            block,
            respond_to,
        })
        .await
    }

    /// Enter (`true`) or leave flight mode.
    ///
    /// Returns every device the change was applied to.
    pub async fn flight_mode(&self, block: bool) -> Result<Vec<Device>, RegistryError> {
        self.request(|respond_to| RegistryCommand::FlightMode { block, respond_to })
            .await
    }

    /// Aggregate killswitch state of a type.
    pub async fn killswitch_state(
        &self,
        device_type: DeviceType,
    ) -> Result<KillswitchState, RegistryError> {
        self.request(|respond_to| RegistryCommand::GetKillswitchState {
            device_type,
            respond_to,
        })
        .await
    }

    /// Take an inhibit lease on behalf of a session.
    ///
    /// # Errors
    ///
    /// - `RegistryError::UnknownSession` if the session is not connected
    pub async fn inhibit(
        &self,
        session: SessionId,
        reason: impl Into<String>,
    ) -> Result<InhibitCookie, RegistryError> {
        let reason = reason.into();
        self.request(|respond_to| RegistryCommand::Inhibit {
            session,
            reason,
            respond_to,
        })
        .await?
    }

    /// Release an inhibit lease.
    ///
    /// # Errors
    ///
    /// - `RegistryError::LeaseNotFound` if the cookie is unknown
    /// - `RegistryError::Unauthorized` if another session holds the lease
    pub async fn uninhibit(
        &self,
        session: SessionId,
        cookie: InhibitCookie,
    ) -> Result<(), RegistryError> {
        self.request(|respond_to| RegistryCommand::Uninhibit {
            session,
            cookie,
            respond_to,
        })
        .await?
    }

    /// Current inhibition status.
    pub async fn inhibit_status(&self) -> Result<InhibitStatus, RegistryError> {
        self.request(|respond_to| RegistryCommand::GetInhibitStatus { respond_to })
            .await
    }

    /// Number of connected sessions.
    pub async fn session_count(&self) -> Result<usize, RegistryError> {
        self.request(|respond_to| RegistryCommand::GetSessionCount { respond_to })
            .await
    }

    /// Subscribe to hardware commands.
    ///
    /// Hardware adapters receive every soft-block change they must apply.
    pub fn subscribe_hardware(&self) -> broadcast::Receiver<HardwareCommand> {
        self.hardware_sender.subscribe()
    }

    /// False once the registry task has exited.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}
