//! Daemon connection client.
//!
//! This module provides the `DaemonClient` which handles:
//! - Connection to the daemon via Unix socket, with exponential backoff
//! - The protocol handshake
//! - Request/response RPCs, buffering notifications that arrive in between
//! - Reading device and key notifications
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;

use rfk_core::{Device, DeviceType, InhibitCookie, KillswitchState, ObjectPath};
use rfk_protocol::{ClientMessage, DaemonMessage, ProtocolVersion};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{ClientError, Result};

// ============================================================================
// Configuration
// ============================================================================

pub use rfk_protocol::{DEFAULT_SOCKET_PATH, SOCKET_ENV_VAR};

/// Connection behavior for [`DaemonClient::connect_with_retry`].
///
/// # Example
///
/// ```rust
/// use rfk_client::client::ConnectOptions;
/// use std::time::Duration;
///
/// let options = ConnectOptions {
///     socket_path: std::path::PathBuf::from("/run/rfkd.sock"),
///     retry_initial_delay: Duration::from_millis(100),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Path to the Unix socket where the daemon listens.
    pub socket_path: PathBuf,

    /// Identifier announced in the handshake.
    pub client_id: Option<String>,

    /// Initial delay before first retry after connection failure.
    pub retry_initial_delay: Duration,

    /// Maximum delay between retry attempts.
    pub retry_max_delay: Duration,

    /// Multiplier for exponential backoff.
    pub retry_multiplier: f64,

    /// Attempts before giving up; `0` retries forever.
    pub max_attempts: u32,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            client_id: None,
            retry_initial_delay: Duration::from_millis(250),
            retry_max_delay: Duration::from_secs(5),
            retry_multiplier: 2.0,
            max_attempts: 1,
        }
    }
}

// ============================================================================
// Events
// ============================================================================

/// Notification pushed by the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    DeviceAdded(Device),
    DeviceRemoved(Device),
    DeviceChanged(Device),
    KeyPressed(u32),
    KillswitchChanged {
        device_type: DeviceType,
        state: KillswitchState,
    },
}

impl ClientEvent {
    /// Extracts the event from a notification message.
    ///
    /// Returns `None` for responses and adapter-only traffic.
    pub fn from_message(message: DaemonMessage) -> Option<Self> {
        match message {
            DaemonMessage::DeviceAdded { device } => Some(Self::DeviceAdded(device)),
            DaemonMessage::DeviceRemoved { device } => Some(Self::DeviceRemoved(device)),
            DaemonMessage::DeviceChanged { device } => Some(Self::DeviceChanged(device)),
            DaemonMessage::KeyPressed { keycode } => Some(Self::KeyPressed(keycode)),
            DaemonMessage::KillswitchStateChanged { device_type, state } => {
                Some(Self::KillswitchChanged { device_type, state })
            }
            _ => None,
        }
    }
}

// ============================================================================
// Daemon Client
// ============================================================================

/// Connected client of the rfkd daemon.
///
/// Requests are strictly sequential: each RPC writes one message and
/// reads until the first non-notification reply. Notifications read in
/// the meantime are queued and returned by [`next_event`](Self::next_event)
/// in arrival order.
pub struct DaemonClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    client_id: String,
    pending: VecDeque<ClientEvent>,
}

impl DaemonClient {
    /// Connects and performs the handshake.
    ///
    /// # Errors
    ///
    /// - `ClientError::DaemonConnection` if the socket cannot be reached
    /// - `ClientError::VersionMismatch` / `ClientError::Rejected` if the
    ///   daemon refuses the handshake
    pub async fn connect(socket_path: impl Into<PathBuf>, client_id: Option<String>) -> Result<Self> {
        let socket_path = socket_path.into();
        let stream = UnixStream::connect(&socket_path).await.map_err(|e| {
            ClientError::DaemonConnection(format!("{}: {e}", socket_path.display()))
        })?;
        Self::handshake(stream, client_id).await
    }

    /// Connects with exponential backoff.
    ///
    /// Only connection failures are retried; a refused handshake is
    /// returned immediately.
    ///
    /// # Errors
    ///
    /// Returns the last connection error once `max_attempts` is reached.
    pub async fn connect_with_retry(options: &ConnectOptions) -> Result<Self> {
        let mut delay = options.retry_initial_delay;
        let mut attempt = 0u32;

        loop {
            attempt = attempt.saturating_add(1);

            debug!(
                attempt,
                socket_path = %options.socket_path.display(),
                "Attempting to connect to daemon"
            );

            match Self::connect(options.socket_path.clone(), options.client_id.clone()).await {
                Ok(client) => return Ok(client),
                Err(ClientError::DaemonConnection(reason)) => {
                    if options.max_attempts != 0 && attempt >= options.max_attempts {
                        return Err(ClientError::DaemonConnection(reason));
                    }
                    if attempt == 1 {
                        warn!(
                            socket_path = %options.socket_path.display(),
                            "Daemon not reachable, will retry"
                        );
                    }
                }
                Err(e) => return Err(e),
            }

            sleep(delay).await;
            let next_delay_ms = (delay.as_millis() as f64 * options.retry_multiplier) as u64;
            delay = Duration::from_millis(next_delay_ms).min(options.retry_max_delay);
        }
    }

    async fn handshake(stream: UnixStream, client_id: Option<String>) -> Result<Self> {
        let (reader, writer) = stream.into_split();
        let mut client = Self {
            reader: BufReader::new(reader),
            writer,
            client_id: String::new(),
            pending: VecDeque::new(),
        };

        client.send(&ClientMessage::connect(client_id)).await?;

        match client.read_message().await? {
            DaemonMessage::Connected {
                protocol_version,
                client_id,
            } => {
                if !ProtocolVersion::CURRENT.is_compatible_with(&protocol_version) {
                    return Err(ClientError::VersionMismatch {
                        client_version: ProtocolVersion::CURRENT.to_string(),
                        daemon_version: protocol_version.to_string(),
                    });
                }
                info!(client_id, protocol_version = %protocol_version, "Handshake complete");
                client.client_id = client_id;
                Ok(client)
            }
            DaemonMessage::Rejected {
                reason,
                protocol_version,
            } => {
                if ProtocolVersion::CURRENT.is_compatible_with(&protocol_version) {
                    Err(ClientError::Rejected(reason))
                } else {
                    Err(ClientError::VersionMismatch {
                        client_version: ProtocolVersion::CURRENT.to_string(),
                        daemon_version: protocol_version.to_string(),
                    })
                }
            }
            other => Err(ClientError::ProtocolError(format!(
                "Unexpected response to connect: {other:?}"
            ))),
        }
    }

    /// Identifier the daemon assigned to this connection.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    // ========================================================================
    // RPCs
    // ========================================================================

    /// Daemon version string.
    pub async fn daemon_version(&mut self) -> Result<String> {
        match self.request(ClientMessage::get_daemon_version()).await? {
            DaemonMessage::DaemonVersion { version } => Ok(version),
            other => Err(unexpected("get_daemon_version", &other)),
        }
    }

    /// Every known device, ordered by index.
    pub async fn enumerate_devices(&mut self) -> Result<Vec<Device>> {
        match self.request(ClientMessage::enumerate_devices()).await? {
            DaemonMessage::DeviceList { devices } => Ok(devices),
            other => Err(unexpected("enumerate_devices", &other)),
        }
    }

    /// Takes an inhibit lease, held until released or this client disconnects.
    pub async fn inhibit(&mut self, reason: &str) -> Result<InhibitCookie> {
        match self.request(ClientMessage::inhibit(reason)).await? {
            DaemonMessage::Inhibited { cookie } => Ok(cookie),
            other => Err(unexpected("inhibit", &other)),
        }
    }

    pub async fn uninhibit(&mut self, cookie: InhibitCookie) -> Result<()> {
        match self.request(ClientMessage::uninhibit(cookie)).await? {
            DaemonMessage::Uninhibited { .. } => Ok(()),
            other => Err(unexpected("uninhibit", &other)),
        }
    }

    /// Whether any lease is outstanding, and how many.
    pub async fn is_inhibited(&mut self) -> Result<(bool, usize)> {
        match self.request(ClientMessage::is_inhibited()).await? {
            DaemonMessage::InhibitState { inhibited, leases } => Ok((inhibited, leases)),
            other => Err(unexpected("is_inhibited", &other)),
        }
    }

    /// Sets the soft block of one device.
    pub async fn set_block(&mut self, object_path: ObjectPath, block: bool) -> Result<Vec<Device>> {
        match self.request(ClientMessage::set_block(object_path, block)).await? {
            DaemonMessage::BlockResult { devices } => Ok(devices),
            other => Err(unexpected("set_block", &other)),
        }
    }

    /// Sets the soft block of every device of a type.
    pub async fn set_block_type(
        &mut self,
        device_type: DeviceType,
        block: bool,
    ) -> Result<Vec<Device>> {
        match self
            .request(ClientMessage::set_block_type(device_type, block))
            .await?
        {
            DaemonMessage::BlockResult { devices } => Ok(devices),
            other => Err(unexpected("set_block_type", &other)),
        }
    }

    /// Enters or leaves flight mode. Returns the devices it touched.
    pub async fn flight_mode(&mut self, block: bool) -> Result<Vec<Device>> {
        match self.request(ClientMessage::flight_mode(block)).await? {
            DaemonMessage::FlightModeResult { devices, .. } => Ok(devices),
            other => Err(unexpected("flight_mode", &other)),
        }
    }

    pub async fn killswitch_state(&mut self, device_type: DeviceType) -> Result<KillswitchState> {
        match self
            .request(ClientMessage::get_killswitch_state(device_type))
            .await?
        {
            DaemonMessage::KillswitchState { state, .. } => Ok(state),
            other => Err(unexpected("get_killswitch_state", &other)),
        }
    }

    pub async fn ping(&mut self, seq: u64) -> Result<()> {
        match self.request(ClientMessage::ping(seq)).await? {
            DaemonMessage::Pong { seq: got } if got == seq => Ok(()),
            other => Err(unexpected("ping", &other)),
        }
    }

    /// Waits for the next notification.
    ///
    /// Returns `Ok(None)` when the daemon closes the connection.
    pub async fn next_event(&mut self) -> Result<Option<ClientEvent>> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }

        loop {
            let message = match self.read_message().await {
                Ok(message) => message,
                Err(ClientError::Disconnected) => return Ok(None),
                Err(e) => return Err(e),
            };
            match ClientEvent::from_message(message) {
                Some(event) => return Ok(Some(event)),
                None => debug!("Ignoring non-event message while waiting for events"),
            }
        }
    }

    /// Says goodbye. The daemon releases this client's leases.
    pub async fn disconnect(mut self) -> Result<()> {
        self.send(&ClientMessage::disconnect()).await
    }

    // ========================================================================
    // Wire
    // ========================================================================

    /// Sends a request and reads until its response, queueing notifications.
    ///
    /// An `error` reply becomes `ClientError::Daemon`.
    async fn request(&mut self, message: ClientMessage) -> Result<DaemonMessage> {
        self.send(&message).await?;

        loop {
            let reply = self.read_message().await?;
            if reply.is_notification() {
                if let Some(event) = ClientEvent::from_message(reply) {
                    self.pending.push_back(event);
                }
                continue;
            }

            return match reply {
                DaemonMessage::Error { message, code } => Err(ClientError::Daemon { message, code }),
                reply => Ok(reply),
            };
        }
    }

    async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        let json = serde_json::to_string(message)?;
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        debug!(message_type = ?message.message, "Sent message to daemon");
        Ok(())
    }

    async fn read_message(&mut self) -> Result<DaemonMessage> {
        let mut line = String::new();
        let bytes_read = self.reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            return Err(ClientError::Disconnected);
        }
        Ok(serde_json::from_str(line.trim())?)
    }
}

fn unexpected(request: &str, reply: &DaemonMessage) -> ClientError {
    ClientError::ProtocolError(format!("Unexpected response to {request}: {reply:?}"))
}
