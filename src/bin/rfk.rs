//! rfk - radio kill-switch monitor and control client
//!
//! Connects to `rfkd`, prints the daemon version and devices, takes an
//! inhibit lease and prints every notification until interrupted.
//!
//! # Usage
//!
//! ```text
//! rfk                        # monitor (default)
//! rfk --no-inhibit monitor   # monitor without holding a lease
//! rfk list                   # print devices and exit
//! rfk version                # print daemon version
//! rfk block wlan             # soft-block every WLAN device
//! rfk unblock 3              # unblock device index 3
//! rfk flight-mode on          # block every radio, remembering prior blocks
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use rfk_client::{
    format_device, format_event, ConnectOptions, DaemonClient, Target, SOCKET_ENV_VAR,
};

// ============================================================================
// CLI Arguments
// ============================================================================

/// rfk - radio kill-switch monitor
#[derive(Parser, Debug)]
#[command(name = "rfk")]
#[command(about = "Watch and control radio kill switches through rfkd")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Daemon socket (default: $RFKD_SOCKET or /tmp/rfkd.sock)
    #[arg(long, short = 's', global = true)]
    socket: Option<PathBuf>,

    /// Do not take an inhibit lease while monitoring
    #[arg(long, global = true)]
    no_inhibit: bool,

    /// Reason recorded with the inhibit lease
    #[arg(long, global = true, default_value = "rfk monitor")]
    reason: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every device and exit
    List,
    /// Print the daemon version and exit
    Version,
    /// Soft-block a device type (wlan, bluetooth, all, ...), index or object path
    Block { target: String },
    /// Remove the soft block from a device type, index or object path
    Unblock { target: String },
    /// Enter or leave flight mode
    FlightMode {
        #[arg(value_parser = ["on", "off"])]
        state: String,
    },
    /// Print devices and follow notifications (default)
    Monitor,
}

fn socket_path(arg: Option<PathBuf>) -> PathBuf {
    arg.or_else(|| std::env::var(SOCKET_ENV_VAR).ok().map(PathBuf::from))
        .unwrap_or_else(|| ConnectOptions::default().socket_path)
}

// ============================================================================
// Commands
// ============================================================================

fn print_devices(devices: &[rfk_core::Device]) {
    for device in devices {
        println!("{}\n", format_device(device));
    }
}

async fn set_block(client: &mut DaemonClient, target: &str, block: bool) -> Result<()> {
    let target: Target = target
        .parse()
        .with_context(|| format!("Invalid target '{target}'"))?;

    let devices = match target {
        Target::Type(device_type) => client.set_block_type(device_type, block).await?,
        Target::Device(path) => client.set_block(path, block).await?,
    };

    if devices.is_empty() {
        println!("No matching devices.");
    }
    print_devices(&devices);
    Ok(())
}

async fn monitor(client: &mut DaemonClient, inhibit: Option<&str>) -> Result<()> {
    println!("Daemon Version: {}\n", client.daemon_version().await?);
    print_devices(&client.enumerate_devices().await?);

    let cookie = match inhibit {
        Some(reason) => {
            let cookie = client.inhibit(reason).await?;
            println!("Inhibit lease {cookie} held ({reason})\n");
            Some(cookie)
        }
        None => None,
    };

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            event = client.next_event() => match event? {
                Some(event) => println!("\n{}", format_event(&event)),
                None => {
                    println!("Daemon went away.");
                    return Ok(());
                }
            },
        }
    }

    if let Some(cookie) = cookie {
        client.uninhibit(cookie).await?;
        debug!(cookie = %cookie, "Inhibit lease released");
    }
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Diagnostics go to stderr so stdout stays clean for the listing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("rfk_client=warn".parse()?)
                .add_directive("rfk=warn".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let options = ConnectOptions {
        socket_path: socket_path(args.socket),
        client_id: Some(format!("rfk-{}", std::process::id())),
        ..ConnectOptions::default()
    };

    let mut client = DaemonClient::connect_with_retry(&options)
        .await
        .with_context(|| {
            format!(
                "Is rfkd running? (socket: {})",
                options.socket_path.display()
            )
        })?;

    match args.command.unwrap_or(Command::Monitor) {
        Command::List => print_devices(&client.enumerate_devices().await?),
        Command::Version => println!("{}", client.daemon_version().await?),
        Command::Block { target } => set_block(&mut client, &target, true).await?,
        Command::Unblock { target } => set_block(&mut client, &target, false).await?,
        Command::FlightMode { state } => {
            let devices = client.flight_mode(state == "on").await?;
            println!("Flight mode {state} ({} devices)", devices.len());
        }
        Command::Monitor => {
            let inhibit = (!args.no_inhibit).then_some(args.reason.as_str());
            monitor(&mut client, inhibit).await?;
        }
    }

    client.disconnect().await?;
    Ok(())
}
