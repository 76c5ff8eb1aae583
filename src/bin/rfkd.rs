//! RFK Daemon - radio kill-switch registry and event server
//!
//! This binary runs the device registry and the Unix socket server that
//! hardware adapters and clients connect to.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground)
//! rfkd start
//!
//! # Start the daemon (background/daemonized) with an explicit config
//! rfkd start -d --config /etc/rfkd/config.toml
//!
//! # Stop the daemon
//! rfkd stop
//!
//! # Check daemon status
//! rfkd status
//! ```

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rfkd::config::DaemonConfig;
use rfkd::registry::spawn_registry;
use rfkd::server::DaemonServer;

/// How long `rfkd stop` waits for the process to exit.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// rfkd - radio kill-switch daemon
#[derive(Parser, Debug)]
#[command(name = "rfkd", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,

        /// Config file (default: $XDG_CONFIG_HOME/rfkd/config.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status {
        /// Config file used to locate the socket
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("rfkd")
}

/// `state_dir/rfkd.pid`, holding the PID of a running daemon.
struct PidFile {
    path: PathBuf,
}

impl PidFile {
    fn new() -> Self {
        Self {
            path: state_dir().join("rfkd.pid"),
        }
    }

    fn read(&self) -> Option<u32> {
        fs::read_to_string(&self.path).ok()?.trim().parse().ok()
    }

    fn write(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create state directory")?;
        }
        fs::write(&self.path, process::id().to_string()).context("Failed to write PID file")
    }

    fn remove(&self) {
        let _ = fs::remove_file(&self.path);
    }

    /// PID of the running daemon. A stale file is removed.
    fn running(&self) -> Option<u32> {
        let pid = self.read()?;
        if is_process_running(pid) {
            Some(pid)
        } else {
            self.remove();
            None
        }
    }
}

fn is_process_running(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

fn send_sigterm(pid: u32) -> Result<()> {
    let pid = i32::try_from(pid).context("PID out of range")?;
    // SAFETY: kill(2) has no memory-safety preconditions
    if unsafe { libc::kill(pid, libc::SIGTERM) } != 0 {
        bail!("Failed to send SIGTERM to process {pid}");
    }
    Ok(())
}

/// Polls until `pid` exits or `timeout` passes.
fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if !is_process_running(pid) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    !is_process_running(pid)
}

fn load_config(path: Option<&Path>) -> Result<DaemonConfig> {
    let config = DaemonConfig::load(path).context("Failed to load configuration")?;
    Ok(config.with_env_overrides())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let pid_file = PidFile::new();

    match args.command.unwrap_or(Command::Start {
        daemon: false,
        config: None,
    }) {
        Command::Start { daemon, config } => {
            if let Some(pid) = pid_file.running() {
                eprintln!("rfkd is already running (PID {pid}); run 'rfkd stop' first.");
                process::exit(1);
            }

            // Relative paths must resolve before daemonizing changes directory
            let config = load_config(config.as_deref())?;

            if daemon {
                daemonize()?;
            }

            pid_file.write()?;
            let result = run_daemon(config);
            pid_file.remove();
            result
        }
        Command::Stop => {
            let Some(pid) = pid_file.running() else {
                println!("rfkd is not running.");
                return Ok(());
            };

            println!("Stopping rfkd (PID {pid})...");
            send_sigterm(pid)?;

            if wait_for_exit(pid, STOP_TIMEOUT) {
                println!("rfkd stopped.");
                Ok(())
            } else {
                eprintln!("rfkd did not stop within {}s.", STOP_TIMEOUT.as_secs());
                process::exit(1);
            }
        }
        Command::Status { config } => {
            let Some(pid) = pid_file.running() else {
                println!("rfkd is not running.");
                process::exit(1);
            };

            println!("rfkd is running (PID {pid})");
            let config = load_config(config.as_deref())?;
            if config.socket_path.exists() {
                println!("Socket: {}", config.socket_path.display());
            }
            Ok(())
        }
    }
}

/// Forks into the background with stdout/stderr sent to `state_dir/rfkd.log`.
fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = state_dir().join("rfkd.log");

    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = stdout
        .try_clone()
        .context("Failed to create log file for stderr")?;

    Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .context("Failed to daemonize")?;

    Ok(())
}

#[tokio::main]
async fn run_daemon(config: DaemonConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("rfkd=info".parse()?)
                .add_directive("rfk_core=info".parse()?)
                .add_directive("rfk_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "rfkd starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let options = config.registry_options();
    let registry = spawn_registry(options);
    info!(
        queue_depth = options.queue_depth,
        key_control = options.key_control,
        force_sync = options.force_sync,
        "Device registry started"
    );

    let server = DaemonServer::from_config(&config, registry, cancel_token);

    info!(socket = %config.socket_path.display(), "Starting server");

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("rfkd stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }

    Ok(())
}
