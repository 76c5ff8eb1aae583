//! One socket peer: handshake, request loop, event delivery.
//!
//! After `connect` the peer owns a registry session. RPC replies are
//! written by the request loop; notifications are written by a delivery
//! worker draining the session queue, and hardware commands by a
//! forwarder once the peer sends `attach_adapter`. All three share one
//! writer, so each line is written whole.
//!
//! Hardware reports, rfkill events and key presses are accepted only
//! from a peer that attached as adapter.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Any connection failure ends in `shutdown`, which always releases
//!   the session

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use rfk_core::{Device, HardwareCommand, HardwareReport, ReportOp};
use rfk_protocol::{
    error_code, ClientMessage, DaemonMessage, KernelIndexMap, MessageType, ProtocolVersion,
    RawRfkillEvent,
};

use crate::registry::{DeviceDelta, RegistryError, RegistryHandle, SessionId};
use crate::session::{error_response, event_message, ClientRequest, ClientSession, SessionManager};

/// Writer shared between the request loop and background workers
pub type SharedWriter = Arc<Mutex<BufWriter<OwnedWriteHalf>>>;

/// Longest accepted line, newline excluded
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Idle peers are dropped after this long without a message
const READ_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// A peer that stops reading for this long is dropped
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// What the request loop does after a message.
enum Flow {
    Continue,
    Close,
}

/// Serves one accepted stream until either side closes it.
pub struct ConnectionHandler {
    reader: BufReader<OwnedReadHalf>,
    writer: SharedWriter,
    sessions: SessionManager,

    /// Set once the handshake succeeds
    session: Option<SessionId>,

    /// Announced by the peer, or `client-<n>`
    client_id: Option<String>,

    connection_number: u64,

    /// Cancelled by server shutdown, queue closure or write failure
    cancel: CancellationToken,

    /// Delivery and adapter forwarding tasks
    workers: Vec<JoinHandle<()>>,

    adapter_attached: bool,

    /// Registry paths of the kernel rfkill indices this adapter reported
    kernel_paths: KernelIndexMap,

    /// Set when the connection must be refused at handshake
    reject_reason: Option<String>,
}

impl ConnectionHandler {
    /// `cancel` should be a child of the server's shutdown token.
    pub fn new(
        reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
        sessions: SessionManager,
        connection_number: u64,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer: Arc::new(Mutex::new(BufWriter::new(writer))),
            sessions,
            session: None,
            client_id: None,
            connection_number,
            cancel,
            workers: Vec::new(),
            adapter_attached: false,
            kernel_paths: KernelIndexMap::new(),
            reject_reason: None,
        }
    }

    /// Refuses the handshake with `reason`.
    #[must_use]
    pub fn reject_with(mut self, reason: impl Into<String>) -> Self {
        self.reject_reason = Some(reason.into());
        self
    }

    /// Serves the connection to completion.
    ///
    /// Returns the client id, or `None` if the handshake never completed.
    pub async fn run(mut self) -> Option<String> {
        debug!(connection = self.connection_number, "Accepted connection");

        let session = match self.handle_handshake().await {
            Ok(session) => session,
            Err(e) => {
                warn!(
                    connection = self.connection_number,
                    error = %e,
                    "Handshake failed"
                );
                return None;
            }
        };

        let session_id = session.id();
        self.session = Some(session_id);
        self.spawn_delivery(session);

        info!(
            client_id = ?self.client_id,
            session = %session_id,
            "Client connected"
        );

        if let Err(e) = self.process_messages().await {
            debug!(
                client_id = ?self.client_id,
                error = %e,
                "Connection closed"
            );
        }

        self.shutdown(session_id).await;

        info!(client_id = ?self.client_id, "Client disconnected");
        self.client_id
    }

    /// First message must be a compatible `connect`; answers `connected`
    /// and opens a session, or answers `rejected`/`error` and fails.
    async fn handle_handshake(&mut self) -> Result<ClientSession, ConnectionError> {
        let msg = match timeout(READ_TIMEOUT, self.read_message()).await {
            Ok(result) => result?,
            Err(_) => return Err(ConnectionError::Timeout),
        };

        if let Err(e) = ProtocolVersion::CURRENT.check_peer(&msg.protocol_version) {
            warn!(
                client_version = %msg.protocol_version,
                server_version = %ProtocolVersion::CURRENT,
                "Protocol version mismatch"
            );
            self.send_message(&DaemonMessage::rejected(&e.to_string()))
                .await?;

            return Err(ConnectionError::VersionMismatch {
                client: msg.protocol_version,
                server: ProtocolVersion::CURRENT,
            });
        }

        let client_id = match msg.message {
            MessageType::Connect { client_id } => client_id,
            other => {
                self.send_message(&DaemonMessage::error_with_code(
                    "Expected Connect message for handshake",
                    error_code::INVALID_REQUEST,
                ))
                .await?;

                return Err(ConnectionError::UnexpectedMessage(format!("{other:?}")));
            }
        };

        if let Some(reason) = self.reject_reason.take() {
            self.send_message(&DaemonMessage::rejected(&reason)).await?;
            return Err(ConnectionError::Rejected(reason));
        }

        let session = self.sessions.on_connect().await?;

        let assigned_id = client_id.unwrap_or_else(|| format!("client-{}", self.connection_number));
        self.client_id = Some(assigned_id.clone());

        if let Err(e) = self.send_message(&DaemonMessage::connected(assigned_id)).await {
            self.sessions.on_disconnect(session.id()).await;
            return Err(e);
        }

        Ok(session)
    }

    /// Serves requests until EOF, cancellation or a transport failure.
    /// Malformed lines and failed requests get an error reply only.
    async fn process_messages(&mut self) -> Result<(), ConnectionError> {
        let cancel = self.cancel.clone();

        loop {
            let read = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(client_id = ?self.client_id, "Connection cancelled");
                    return Ok(());
                }
                read = timeout(READ_TIMEOUT, self.read_message()) => read,
            };

            let msg = match read {
                Ok(Ok(msg)) => msg,
                Ok(Err(ConnectionError::Eof)) => {
                    debug!(client_id = ?self.client_id, "Client sent EOF");
                    return Ok(());
                }
                Ok(Err(ConnectionError::ParseError(reason))) => {
                    debug!(client_id = ?self.client_id, error = %reason, "Malformed message");
                    self.send_message(&DaemonMessage::error_with_code(
                        &format!("Parse error: {reason}"),
                        error_code::PARSE_ERROR,
                    ))
                    .await?;
                    continue;
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    debug!(client_id = ?self.client_id, "Connection timed out");
                    return Err(ConnectionError::Timeout);
                }
            };

            match self.handle_message(msg).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Close) => return Ok(()),
                Err(e @ (ConnectionError::Io(_) | ConnectionError::WriteTimeout)) => return Err(e),
                Err(e) => {
                    warn!(
                        client_id = ?self.client_id,
                        error = %e,
                        "Error handling message"
                    );
                    // The request failed, the connection did not
                    self.send_message(&e.to_response()).await?;
                }
            }
        }
    }

    /// Dispatches one request after the handshake.
    async fn handle_message(&mut self, msg: ClientMessage) -> Result<Flow, ConnectionError> {
        let session = self.session.ok_or(ConnectionError::NotConnected)?;

        match msg.message {
            MessageType::Connect { .. } => {
                self.send_message(&DaemonMessage::error_with_code(
                    "Already connected",
                    error_code::INVALID_REQUEST,
                ))
                .await?;
            }

            MessageType::Disconnect => {
                debug!(client_id = ?self.client_id, "Client requested disconnect");
                return Ok(Flow::Close);
            }

            MessageType::Ping { seq } => {
                self.send_message(&DaemonMessage::pong(seq)).await?;
            }

            MessageType::AttachAdapter => {
                self.attach_adapter();
                self.send_message(&DaemonMessage::AdapterAttached).await?;
            }

            MessageType::HardwareReport { report } => {
                self.require_adapter("hardware_report")?;
                self.handle_hardware_report(report).await?;
            }

            MessageType::RfkillEvent { data } => {
                self.require_adapter("rfkill_event")?;
                self.handle_rfkill_event(data).await?;
            }

            MessageType::KeyPressed { keycode } => {
                self.require_adapter("key_pressed")?;
                self.sessions.registry().key_pressed(keycode).await?;
            }

            other => match ClientRequest::from_message(&other) {
                Some(request) => {
                    let response = self.sessions.handle_request(session, request).await;
                    self.send_message(&response).await?;
                }
                None => {
                    return Err(ConnectionError::UnexpectedMessage(format!("{other:?}")));
                }
            },
        }

        Ok(Flow::Continue)
    }

    fn require_adapter(&self, message: &'static str) -> Result<(), ConnectionError> {
        if self.adapter_attached {
            Ok(())
        } else {
            Err(ConnectionError::AdapterRequired(message))
        }
    }

    /// Applies a structured report from an adapter. No reply on success.
    async fn handle_hardware_report(
        &mut self,
        report: HardwareReport,
    ) -> Result<Option<DeviceDelta>, ConnectionError> {
        debug!(
            client_id = ?self.client_id,
            op = %report.op,
            device_type = %report.device_type,
            name = %report.name,
            "Received hardware report"
        );
        Ok(self.sessions.registry().apply_hardware_event(report).await?)
    }

    /// Parses a kernel-shaped rfkill event and applies it.
    ///
    /// CHANGE and DEL are matched by the path learnt on ADD for the same
    /// kernel index, so they apply even without a device name.
    async fn handle_rfkill_event(&mut self, data: serde_json::Value) -> Result<(), ConnectionError> {
        let raw: RawRfkillEvent =
            serde_json::from_value(data).map_err(|e| ConnectionError::ParseError(e.to_string()))?;

        let Some(report) = self.kernel_paths.report_for(&raw) else {
            debug!(
                idx = raw.idx,
                rf_type = raw.rf_type,
                op = raw.op,
                "rfkill event does not describe a device, ignoring"
            );
            return Ok(());
        };

        let op = report.op;
        let (device_type, name) = (report.device_type, report.name.clone());
        let delta = self.handle_hardware_report(report).await?;

        match op {
            ReportOp::Added => {
                let path = match delta {
                    Some(delta) => Some(delta.device().object_path.clone()),
                    // Re-announced without changes
                    None => self
                        .sessions
                        .registry()
                        .enumerate()
                        .await?
                        .into_iter()
                        .find(|d| d.device_type == device_type && d.name == name)
                        .map(|d| d.object_path),
                };
                if let Some(path) = path {
                    debug!(idx = raw.idx, object_path = %path, "Learnt kernel rfkill index");
                    self.kernel_paths.learn(raw.idx, path);
                }
            }
            ReportOp::Removed => {
                self.kernel_paths.forget(raw.idx);
            }
            ReportOp::Changed => {}
        }
        Ok(())
    }

    /// Starts forwarding hardware commands to this connection.
    fn attach_adapter(&mut self) {
        if self.adapter_attached {
            debug!(client_id = ?self.client_id, "Adapter already attached");
            return;
        }
        self.adapter_attached = true;

        let registry = self.sessions.registry().clone();
        let mut commands = registry.subscribe_hardware();
        let writer = Arc::clone(&self.writer);
        let cancel = self.cancel.clone();
        let client_id = self.client_id.clone();

        info!(client_id = ?client_id, "Hardware adapter attached");

        self.workers.push(tokio::spawn(async move {
            loop {
                let command = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    command = commands.recv() => command,
                };

                match command {
                    Ok(command) => {
                        let msg = DaemonMessage::HardwareCommand { command };
                        if let Err(e) = write_message(&writer, &msg).await {
                            debug!(client_id = ?client_id, error = %e, "Hardware command delivery failed");
                            cancel.cancel();
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(
                            client_id = ?client_id,
                            skipped = n,
                            "Adapter lagged, resending desired state"
                        );
                        if let Err(e) = resend_desired_state(&registry, &writer).await {
                            debug!(client_id = ?client_id, error = %e, "Desired state resend failed");
                            cancel.cancel();
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Hardware command channel closed");
                        break;
                    }
                }
            }
        }));
    }

    /// Spawns the worker that drains the session's event queue.
    ///
    /// If the registry drops the session (queue overflow) the queue closes
    /// and the connection is cancelled.
    fn spawn_delivery(&mut self, session: ClientSession) {
        let (session_id, mut events) = session.into_parts();
        let writer = Arc::clone(&self.writer);
        let cancel = self.cancel.clone();

        self.workers.push(tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    event = events.recv() => event,
                };

                let Some(event) = event else {
                    warn!(session = %session_id, "Event queue closed, closing connection");
                    cancel.cancel();
                    break;
                };

                if let Err(e) = write_message(&writer, &event_message(&event)).await {
                    debug!(session = %session_id, error = %e, "Event delivery failed");
                    cancel.cancel();
                    break;
                }
            }
        }));
    }

    /// Stops workers, then tears the session down.
    async fn shutdown(&mut self, session: SessionId) {
        self.cancel.cancel();
        for worker in self.workers.drain(..) {
            let _ = worker.await;
        }
        self.sessions.on_disconnect(session).await;
    }

    /// Next line from the peer, parsed.
    async fn read_message(&mut self) -> Result<ClientMessage, ConnectionError> {
        let mut line = String::new();

        let mut limited = (&mut self.reader).take(MAX_MESSAGE_SIZE as u64 + 1);
        let bytes_read = limited
            .read_line(&mut line)
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        if bytes_read == 0 {
            return Err(ConnectionError::Eof);
        }

        if line.len() > MAX_MESSAGE_SIZE {
            return Err(ConnectionError::MessageTooLarge {
                size: line.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        let msg: ClientMessage = serde_json::from_str(&line)
            .map_err(|e| ConnectionError::ParseError(e.to_string()))?;

        debug!(
            client_id = ?self.client_id,
            message_type = ?std::mem::discriminant(&msg.message),
            "Received message"
        );

        Ok(msg)
    }

    async fn send_message(&self, msg: &DaemonMessage) -> Result<(), ConnectionError> {
        write_message(&self.writer, msg).await
    }
}

/// One `set_soft_block` per device, restating the registry's soft state.
pub fn desired_state_commands(devices: &[Device]) -> Vec<HardwareCommand> {
    devices.iter().map(HardwareCommand::set_soft_block).collect()
}

/// Replaces skipped hardware commands with a full snapshot.
async fn resend_desired_state(
    registry: &RegistryHandle,
    writer: &SharedWriter,
) -> Result<(), ConnectionError> {
    let devices = registry.enumerate().await?;
    for command in desired_state_commands(&devices) {
        write_message(writer, &DaemonMessage::HardwareCommand { command }).await?;
    }
    Ok(())
}

/// Writes one newline-terminated message, bounded by the write timeout.
pub async fn write_message(writer: &SharedWriter, msg: &DaemonMessage) -> Result<(), ConnectionError> {
    let json =
        serde_json::to_string(msg).map_err(|e| ConnectionError::ParseError(e.to_string()))?;

    let mut writer = writer.lock().await;

    match timeout(WRITE_TIMEOUT, async {
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok::<(), std::io::Error>(())
    })
    .await
    {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ConnectionError::Io(e.to_string())),
        Err(_) => Err(ConnectionError::WriteTimeout),
    }
}

/// Why a request or the connection as a whole failed.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Protocol version mismatch: client {client}, server {server}")]
    VersionMismatch {
        client: ProtocolVersion,
        server: ProtocolVersion,
    },

    #[error("Connection rejected: {0}")]
    Rejected(String),

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Message before handshake")]
    NotConnected,

    #[error("{0} requires attach_adapter")]
    AdapterRequired(&'static str),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection closed")]
    Eof,

    #[error("Read timeout")]
    Timeout,

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl ConnectionError {
    /// Error message sent back for a request that failed.
    pub fn to_response(&self) -> DaemonMessage {
        match self {
            Self::Registry(e) => error_response(e),
            Self::AdapterRequired(_) => {
                DaemonMessage::error_with_code(&self.to_string(), error_code::UNAUTHORIZED)
            }
            Self::ParseError(_) => {
                DaemonMessage::error_with_code(&self.to_string(), error_code::PARSE_ERROR)
            }
            _ => DaemonMessage::error_with_code(&self.to_string(), error_code::INVALID_REQUEST),
        }
    }
}
