//! Client session manager.
//!
//! Sits between transports and the registry: creates and tears down
//! sessions, routes client RPCs to the registry and packages the results
//! as protocol messages. It holds no state of its own beyond the registry
//! handle, so it is cheap to clone into every connection.

use rfk_core::{DeviceType, InhibitCookie, ObjectPath};
use rfk_protocol::{error_code, DaemonMessage, MessageType};
use tokio::sync::mpsc;
use tracing::debug;

use crate::registry::{DeviceEvent, RegistryError, RegistryHandle, SessionId};

/// Version string reported by `GetDaemonVersion`.
pub const DAEMON_VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// Client Session
// ============================================================================

/// A connected client: its identity and its event queue.
#[derive(Debug)]
pub struct ClientSession {
    id: SessionId,
    events: mpsc::Receiver<DeviceEvent>,
}

impl ClientSession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Waits for the next published event.
    ///
    /// Returns `None` once the session has been torn down and every
    /// queued event was consumed.
    pub async fn next_event(&mut self) -> Option<DeviceEvent> {
        self.events.recv().await
    }

    /// Splits the session for a delivery worker.
    pub fn into_parts(self) -> (SessionId, mpsc::Receiver<DeviceEvent>) {
        (self.id, self.events)
    }
}

// ============================================================================
// Client RPCs
// ============================================================================

/// Requests a client can make over its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    EnumerateDevices,
    GetDaemonVersion,
    Inhibit { reason: String },
    Uninhibit { cookie: InhibitCookie },
    IsInhibited,
    SetBlock { object_path: ObjectPath, block: bool },
    SetBlockType { device_type: DeviceType, block: bool },
    FlightMode { block: bool },
    GetKillswitchState { device_type: DeviceType },
}

impl ClientRequest {
    /// Extracts the RPC from a protocol message.
    ///
    /// Returns `None` for handshake, adapter and housekeeping messages.
    pub fn from_message(message: &MessageType) -> Option<Self> {
        let request = match message {
            MessageType::EnumerateDevices => Self::EnumerateDevices,
            MessageType::GetDaemonVersion => Self::GetDaemonVersion,
            MessageType::Inhibit { reason } => Self::Inhibit {
                reason: reason.clone(),
            },
            MessageType::Uninhibit { cookie } => Self::Uninhibit { cookie: *cookie },
            MessageType::IsInhibited => Self::IsInhibited,
            MessageType::SetBlock { object_path, block } => Self::SetBlock {
                object_path: object_path.clone(),
                block: *block,
            },
            MessageType::SetBlockType { device_type, block } => Self::SetBlockType {
                device_type: *device_type,
                block: *block,
            },
            MessageType::FlightMode { block } => Self::FlightMode { block: *block },
            MessageType::GetKillswitchState { device_type } => Self::GetKillswitchState {
                device_type: *device_type,
            },
            _ => return None,
        };
        Some(request)
    }
}

// ============================================================================
// Session Manager
// ============================================================================

#[derive(Clone)]
pub struct SessionManager {
    registry: RegistryHandle,
}

impl SessionManager {
    pub fn new(registry: RegistryHandle) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    /// Registers a new session and enrolls it on the event bus.
    ///
    /// # Errors
    ///
    /// - `RegistryError::ChannelClosed` if the registry has shut down
    pub async fn on_connect(&self) -> Result<ClientSession, RegistryError> {
        let (id, events) = self.registry.connect().await?;
        Ok(ClientSession { id, events })
    }

    /// Tears a session down, releasing its leases.
    ///
    /// Idempotent: unknown or already departed sessions are a no-op.
    /// Returns true if this call removed the session.
    pub async fn on_disconnect(&self, session: SessionId) -> bool {
        match self.registry.disconnect(session).await {
            Ok(removed) => removed,
            Err(e) => {
                debug!(session = %session, error = %e, "Disconnect after registry shutdown");
                false
            }
        }
    }

    pub fn daemon_version(&self) -> &'static str {
        DAEMON_VERSION
    }

    /// Executes one client RPC and builds the response message.
    ///
    /// Failures become `error` messages carrying a stable code.
    pub async fn handle_request(&self, session: SessionId, request: ClientRequest) -> DaemonMessage {
        let result = match request {
            ClientRequest::EnumerateDevices => self
                .registry
                .enumerate()
                .await
                .map(DaemonMessage::device_list),
            ClientRequest::GetDaemonVersion => {
                Ok(DaemonMessage::daemon_version(self.daemon_version()))
            }
            ClientRequest::Inhibit { reason } => self
                .registry
                .inhibit(session, reason)
                .await
                .map(|cookie| DaemonMessage::Inhibited { cookie }),
            ClientRequest::Uninhibit { cookie } => self
                .registry
                .uninhibit(session, cookie)
                .await
                .map(|()| DaemonMessage::Uninhibited { cookie }),
            ClientRequest::IsInhibited => {
                self.registry
                    .inhibit_status()
                    .await
                    .map(|status| DaemonMessage::InhibitState {
                        inhibited: status.inhibited,
                        leases: status.leases,
                    })
            }
            ClientRequest::SetBlock { object_path, block } => self
                .registry
                .request_soft_block(object_path, block)
                .await
                .map(|device| DaemonMessage::BlockResult {
                    devices: vec![device],
                }),
            ClientRequest::SetBlockType { device_type, block } => self
                .registry
                .request_type_block(device_type, block)
                .await
                .map(|devices| DaemonMessage::BlockResult { devices }),
            ClientRequest::FlightMode { block } => self
                .registry
                .flight_mode(block)
                .await
                .map(|devices| DaemonMessage::FlightModeResult {
                    enabled: block,
                    devices,
                }),
            ClientRequest::GetKillswitchState { device_type } => self
                .registry
                .killswitch_state(device_type)
                .await
                .map(|state| DaemonMessage::KillswitchState { device_type, state }),
        };

        result.unwrap_or_else(|e| error_response(&e))
    }
}

/// Maps a registry failure to a protocol error message.
pub fn error_response(error: &RegistryError) -> DaemonMessage {
    let code = match error {
        RegistryError::DeviceNotFound(_) | RegistryError::LeaseNotFound(_) => {
            error_code::NOT_FOUND
        }
        RegistryError::Unauthorized { .. } => error_code::UNAUTHORIZED,
        RegistryError::UnknownSession(_) => error_code::UNKNOWN_SESSION,
        RegistryError::ChannelClosed => error_code::CHANNEL_CLOSED,
    };
    DaemonMessage::error_with_code(&error.to_string(), code)
}

/// Converts a registry event to its notification message.
pub fn event_message(event: &DeviceEvent) -> DaemonMessage {
    match event {
        DeviceEvent::Added(device) => DaemonMessage::DeviceAdded {
            device: device.clone(),
        },
        DeviceEvent::Removed(device) => DaemonMessage::DeviceRemoved {
            device: device.clone(),
        },
        DeviceEvent::Changed(device) => DaemonMessage::DeviceChanged {
            device: device.clone(),
        },
        DeviceEvent::KeyPressed(keycode) => DaemonMessage::KeyPressed { keycode: *keycode },
        DeviceEvent::KillswitchChanged { device_type, state } => {
            DaemonMessage::KillswitchStateChanged {
                device_type: *device_type,
                state: *state,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{spawn_registry, RegistryOptions};
    use rfk_core::{Device, HardwareReport, KillswitchState};

    fn manager() -> SessionManager {
        SessionManager::new(spawn_registry(RegistryOptions::default()))
    }

    fn error_code_of(message: &DaemonMessage) -> Option<&str> {
        match message {
            DaemonMessage::Error { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    #[test]
    fn test_request_from_message() {
        assert_eq!(
            ClientRequest::from_message(&MessageType::EnumerateDevices),
            Some(ClientRequest::EnumerateDevices)
        );
        assert_eq!(
            ClientRequest::from_message(&MessageType::SetBlockType {
                device_type: DeviceType::Bluetooth,
                block: true
            }),
            Some(ClientRequest::SetBlockType {
                device_type: DeviceType::Bluetooth,
                block: true
            })
        );
        assert_eq!(
            ClientRequest::from_message(&MessageType::FlightMode { block: false }),
            Some(ClientRequest::FlightMode { block: false })
        );
        assert!(ClientRequest::from_message(&MessageType::AttachAdapter).is_none());
        assert!(ClientRequest::from_message(&MessageType::KeyPressed { keycode: 238 }).is_none());
        assert!(ClientRequest::from_message(&MessageType::Ping { seq: 1 }).is_none());
    }

    #[test]
    fn test_event_message_mapping() {
        let device = Device::new(1, DeviceType::Wlan, "phy0");
        assert!(matches!(
            event_message(&DeviceEvent::Changed(device.clone())),
            DaemonMessage::DeviceChanged { device: ref d } if *d == device
        ));
        assert!(matches!(
            event_message(&DeviceEvent::KeyPressed(247)),
            DaemonMessage::KeyPressed { keycode: 247 }
        ));
        assert!(matches!(
            event_message(&DeviceEvent::KillswitchChanged {
                device_type: DeviceType::Bluetooth,
                state: KillswitchState::HardBlocked,
            }),
            DaemonMessage::KillswitchStateChanged {
                device_type: DeviceType::Bluetooth,
                state: KillswitchState::HardBlocked,
            }
        ));
    }

    #[test]
    fn test_error_codes() {
        let msg = error_response(&RegistryError::DeviceNotFound(ObjectPath::for_index(1)));
        assert_eq!(error_code_of(&msg), Some(error_code::NOT_FOUND));

        let msg = error_response(&RegistryError::Unauthorized {
            cookie: InhibitCookie::new(1),
            session: SessionId::new(1),
        });
        assert_eq!(error_code_of(&msg), Some(error_code::UNAUTHORIZED));

        let msg = error_response(&RegistryError::ChannelClosed);
        assert_eq!(error_code_of(&msg), Some(error_code::CHANNEL_CLOSED));
    }

    #[tokio::test]
    async fn test_daemon_version() {
        let manager = manager();
        let session = manager.on_connect().await.unwrap();

        let response = manager
            .handle_request(session.id(), ClientRequest::GetDaemonVersion)
            .await;
        assert!(matches!(
            response,
            DaemonMessage::DaemonVersion { ref version } if version == DAEMON_VERSION
        ));
    }

    #[tokio::test]
    async fn test_inhibit_round_trip() {
        let manager = manager();
        let session = manager.on_connect().await.unwrap();

        let response = manager
            .handle_request(
                session.id(),
                ClientRequest::Inhibit {
                    reason: "presentation".to_string(),
                },
            )
            .await;
        let DaemonMessage::Inhibited { cookie } = response else {
            panic!("expected Inhibited, got {response:?}");
        };

        let response = manager
            .handle_request(session.id(), ClientRequest::IsInhibited)
            .await;
        assert!(matches!(
            response,
            DaemonMessage::InhibitState {
                inhibited: true,
                leases: 1
            }
        ));

        let response = manager
            .handle_request(session.id(), ClientRequest::Uninhibit { cookie })
            .await;
        assert!(matches!(response, DaemonMessage::Uninhibited { .. }));

        let response = manager
            .handle_request(session.id(), ClientRequest::Uninhibit { cookie })
            .await;
        assert_eq!(error_code_of(&response), Some(error_code::NOT_FOUND));
    }

    #[tokio::test]
    async fn test_set_block_unknown_path() {
        let manager = manager();
        let session = manager.on_connect().await.unwrap();

        let response = manager
            .handle_request(
                session.id(),
                ClientRequest::SetBlock {
                    object_path: ObjectPath::for_index(8),
                    block: true,
                },
            )
            .await;
        assert_eq!(error_code_of(&response), Some(error_code::NOT_FOUND));
    }

    #[tokio::test]
    async fn test_session_receives_events() {
        let manager = manager();
        let mut session = manager.on_connect().await.unwrap();

        manager
            .registry()
            .apply_hardware_event(HardwareReport::added(DeviceType::Wlan, "phy0"))
            .await
            .unwrap();

        let event = session.next_event().await.unwrap();
        assert!(matches!(event, DeviceEvent::Added(ref d) if d.name == "phy0"));

        let response = manager
            .handle_request(
                session.id(),
                ClientRequest::GetKillswitchState {
                    device_type: DeviceType::Wlan,
                },
            )
            .await;
        assert!(matches!(
            response,
            DaemonMessage::KillswitchState {
                state: KillswitchState::Unblocked,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_flight_mode_request() {
        let manager = manager();
        let session = manager.on_connect().await.unwrap();
        manager
            .registry()
            .apply_hardware_event(HardwareReport::added(DeviceType::Wlan, "phy0"))
            .await
            .unwrap();

        let response = manager
            .handle_request(session.id(), ClientRequest::FlightMode { block: true })
            .await;
        let DaemonMessage::FlightModeResult { enabled, devices } = response else {
            panic!("expected FlightModeResult, got {response:?}");
        };
        assert!(enabled);
        assert_eq!(devices.len(), 1);
        assert!(devices[0].soft);
    }

    #[tokio::test]
    async fn test_on_disconnect_is_idempotent() {
        let manager = manager();
        let mut session = manager.on_connect().await.unwrap();
        let id = session.id();

        assert!(manager.on_disconnect(id).await);
        assert!(!manager.on_disconnect(id).await);
        assert!(!manager.on_disconnect(SessionId::new(999)).await);

        // Queue closes after teardown
        assert!(session.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_inhibit_after_disconnect_is_unknown_session() {
        let manager = manager();
        let session = manager.on_connect().await.unwrap();
        manager.on_disconnect(session.id()).await;

        let response = manager
            .handle_request(
                session.id(),
                ClientRequest::Inhibit {
                    reason: String::new(),
                },
            )
            .await;
        assert_eq!(error_code_of(&response), Some(error_code::UNKNOWN_SESSION));
    }
}
