//! Unix socket transport for rfkd.
//!
//! One listener, one `ConnectionHandler` task per accepted stream. Clients
//! and hardware adapters share the socket; an adapter is simply a client
//! that sent `attach_adapter`. Connections beyond `max_clients` still get
//! a handshake reply, but it is `rejected`.
//!
//! ```text
//!   UnixListener ──accept──▶ ConnectionHandler ──▶ SessionManager ──▶ RegistryHandle
//!                                 ▲
//!                                 └── delivery worker drains the session queue
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Accept and per-connection failures are logged, never fatal

mod connection;

pub use connection::{write_message, ConnectionError, ConnectionHandler, SharedWriter, MAX_MESSAGE_SIZE};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{DaemonConfig, DEFAULT_MAX_CLIENTS};
use crate::registry::RegistryHandle;
use crate::session::SessionManager;

/// Unix socket server for the rfkd daemon.
pub struct DaemonServer {
    socket_path: PathBuf,
    sessions: SessionManager,
    /// Cancelling stops accepting and closes every connection
    cancel_token: CancellationToken,
    /// Monotonic, used for default client ids
    connection_counter: AtomicU64,
    /// Handlers still running, rejected ones included
    active_connections: Arc<AtomicUsize>,
    max_clients: usize,
}

impl DaemonServer {
    /// Creates a server that will bind `socket_path` when run.
    pub fn new(
        socket_path: impl Into<PathBuf>,
        registry: RegistryHandle,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            socket_path: socket_path.into(),
            sessions: SessionManager::new(registry),
            cancel_token,
            connection_counter: AtomicU64::new(0),
            active_connections: Arc::new(AtomicUsize::new(0)),
            max_clients: DEFAULT_MAX_CLIENTS,
        }
    }

    /// Creates a server from daemon configuration.
    pub fn from_config(
        config: &DaemonConfig,
        registry: RegistryHandle,
        cancel_token: CancellationToken,
    ) -> Self {
        Self::new(config.socket_path.clone(), registry, cancel_token)
            .with_max_clients(config.max_clients)
    }

    #[must_use]
    pub fn with_max_clients(mut self, max_clients: usize) -> Self {
        self.max_clients = max_clients.max(1);
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Returns the number of connections being served.
    pub fn connection_count(&self) -> usize {
        self.active_connections.load(Ordering::SeqCst)
    }

    /// Accepts connections until the cancellation token fires, then
    /// removes the socket file.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::SocketSetup` if the socket cannot be bound.
    /// Accept failures are logged and do not stop the server.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = self.bind()?;

        info!(
            socket = %self.socket_path.display(),
            max_clients = self.max_clients,
            "Daemon server listening"
        );

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        let number = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                        self.handle_connection(stream, number);
                    }
                    Err(e) => error!(error = %e, "Failed to accept connection"),
                },
            }
        }

        self.cleanup();
        Ok(())
    }

    /// Replaces any stale socket file and binds a fresh listener.
    fn bind(&self) -> Result<UnixListener, ServerError> {
        let setup_error = |e: std::io::Error| ServerError::SocketSetup {
            path: self.socket_path.clone(),
            error: e.to_string(),
        };

        if self.socket_path.exists() {
            debug!(socket = %self.socket_path.display(), "Removing stale socket");
            std::fs::remove_file(&self.socket_path).map_err(setup_error)?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent).map_err(setup_error)?;
        }

        UnixListener::bind(&self.socket_path).map_err(setup_error)
    }

    /// Handles a new connection by spawning a handler task.
    fn handle_connection(&self, stream: tokio::net::UnixStream, connection_number: u64) {
        let (reader, writer) = stream.into_split();
        let active = self.active_connections.fetch_add(1, Ordering::SeqCst) + 1;

        let mut handler = ConnectionHandler::new(
            reader,
            writer,
            self.sessions.clone(),
            connection_number,
            self.cancel_token.child_token(),
        );

        if active > self.max_clients {
            warn!(
                connection = connection_number,
                active,
                max = self.max_clients,
                "Too many clients, rejecting connection"
            );
            let reason = ServerError::TooManyClients {
                max: self.max_clients,
            };
            handler = handler.reject_with(reason.to_string());
        }

        let active_connections = Arc::clone(&self.active_connections);
        tokio::spawn(async move {
            let client_id = handler.run().await;
            active_connections.fetch_sub(1, Ordering::SeqCst);
            debug!(client_id = ?client_id, "Connection slot released");
        });
    }

    fn cleanup(&self) {
        match std::fs::remove_file(&self.socket_path) {
            Ok(()) => info!(socket = %self.socket_path.display(), "Socket removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                socket = %self.socket_path.display(),
                error = %e,
                "Failed to remove socket file"
            ),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Cannot bind socket {path}: {error}")]
    SocketSetup { path: PathBuf, error: String },

    #[error("Too many clients (max: {max})")]
    TooManyClients { max: usize },
}
