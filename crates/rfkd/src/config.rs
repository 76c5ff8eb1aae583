//! Daemon configuration.
//!
//! Read from `$XDG_CONFIG_HOME/rfkd/config.toml` or an explicit path.
//! Every field has a default, so an empty or missing file is valid.
//!
//! ```toml
//! socket_path = "/tmp/rfkd.sock"
//! queue_depth = 64
//! max_clients = 32
//! key_control = true
//! force_sync = false
//! master_key = false
//! strict_flight_mode = false
//! ```
//!
//! `queue_depth` bounds the notifications a client may have in flight.
//! Blocking ALL publishes one CHANGED per device plus one killswitch
//! notification per type, so a depth below the device count drops every
//! client that does not drain its queue while the block is applied.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::registry::{RegistryOptions, DEFAULT_QUEUE_DEPTH, MAX_DEVICES};

pub use rfk_protocol::{DEFAULT_SOCKET_PATH, SOCKET_ENV_VAR};

/// Default limit on concurrent connections.
pub const DEFAULT_MAX_CLIENTS: usize = 32;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to find config directory")]
    NoConfigDir,

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Unix socket the daemon listens on
    pub socket_path: PathBuf,

    /// Capacity of each client's event queue.
    ///
    /// A client more than this many notifications behind is dropped. A
    /// type block emits one notification per device, so with more
    /// devices than this a block of ALL can drop idle clients.
    pub queue_depth: usize,

    /// Maximum concurrent connections
    pub max_clients: usize,

    /// RF keys toggle the matching device type
    pub key_control: bool,

    /// Re-assert soft state onto newly added devices
    pub force_sync: bool,

    /// The generic RF key toggles flight mode
    pub master_key: bool,

    /// Leaving flight mode always unblocks WWAN
    pub strict_flight_mode: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            queue_depth: DEFAULT_QUEUE_DEPTH,
            max_clients: DEFAULT_MAX_CLIENTS,
            key_control: true,
            force_sync: false,
            master_key: false,
            strict_flight_mode: false,
        }
    }
}

impl DaemonConfig {
    /// Get the config file path
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join("rfkd").join("config.toml"))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load config from `path`, or from the default location.
    ///
    /// An explicit path must exist. A missing default file yields the
    /// defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::load_file(path)?,
            None => {
                let path = Self::config_path()?;
                if path.exists() {
                    Self::load_file(&path)?
                } else {
                    debug!(path = %path.display(), "No config file, using defaults");
                    Self::default()
                }
            }
        };

        config.validate()?;
        if let Some(warning) = config.queue_depth_warning() {
            warn!(queue_depth = config.queue_depth, "{warning}");
        }
        Ok(config)
    }

    fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents)?;
        info!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: DaemonConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Replace the socket path when an override is given.
    #[must_use]
    pub fn with_socket_override(mut self, socket: Option<String>) -> Self {
        if let Some(socket) = socket.filter(|s| !s.trim().is_empty()) {
            self.socket_path = PathBuf::from(socket);
        }
        self
    }

    /// Apply `RFKD_SOCKET` from the environment.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_socket_override(std::env::var(SOCKET_ENV_VAR).ok())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_depth == 0 {
            return Err(ConfigError::ValidationError(
                "queue_depth must be at least 1".into(),
            ));
        }

        if self.max_clients == 0 {
            return Err(ConfigError::ValidationError(
                "max_clients must be at least 1".into(),
            ));
        }

        if self.socket_path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "socket_path must not be empty".into(),
            ));
        }

        Ok(())
    }

    /// Explains the overflow risk when `queue_depth` is smaller than
    /// the number of devices the registry can hold.
    pub fn queue_depth_warning(&self) -> Option<String> {
        (self.queue_depth < MAX_DEVICES).then(|| {
            format!(
                "queue_depth {} is below the device limit {}; blocking ALL on a large \
                 system drops clients that do not keep up",
                self.queue_depth, MAX_DEVICES
            )
        })
    }

    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            queue_depth: self.queue_depth,
            key_control: self.key_control,
            force_sync: self.force_sync,
            master_key: self.master_key,
            strict_flight_mode: self.strict_flight_mode,
        }
    }
}
