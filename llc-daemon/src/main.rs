//! LL-Connect-Wireless Daemon (llconnectd)
//!
//! Drives the fans behind an LL-Connect wireless hub from CPU and GPU
//! temperatures, and serves live status to local clients over a Unix socket.
//!
//! # Lifecycle
//! - Both hub devices must open at startup, otherwise the daemon exits
//! - The control loop and the status server run side by side
//! - Sustained hub failure ends the control loop and the process exits non-zero
//! - SIGINT/SIGTERM remove the socket and exit cleanly

mod control_loop;
mod server;
mod state;

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use llc_core::constants::{codec::PAGES_PER_QUERY, paths};
use llc_core::{decode_page, HubTransport, JsonSettingsStore, SystemTemperatures, UsbHub};

use crate::control_loop::ControlLoop;
use crate::state::SharedState;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Fan control daemon for LL-Connect wireless fan hubs
#[derive(Parser, Debug)]
#[command(name = "llconnectd", version, about)]
struct Args {
    /// Status socket path [default: /run/user/<uid>/ll-connect-wireless.sock]
    #[arg(short, long, env = "LLC_SOCKET")]
    socket: Option<PathBuf>,

    /// Settings file [default: $XDG_CONFIG_HOME/ll-connect-wireless/config.json]
    #[arg(short, long, env = "LLC_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter (trace, debug, info, warn, error or an EnvFilter directive)
    #[arg(long, env = "LLC_LOG", default_value = "info")]
    log_level: String,

    /// Wait before the first control tick, in milliseconds
    #[arg(long, default_value_t = 0)]
    startup_delay_ms: u64,
}

// ============================================================================
// Logging
// ============================================================================

/// Log to the systemd journal when available, stdout otherwise
fn init_logging(log_level: &str) -> &'static str {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let filter = || EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if std::path::Path::new("/run/systemd/journal/socket").exists() {
        match tracing_journald::layer() {
            Ok(journald) => {
                tracing_subscriber::registry()
                    .with(journald)
                    .with(filter())
                    .init();
                return "systemd journal";
            }
            Err(e) => {
                eprintln!("Failed to create journald layer: {}, falling back to stdout", e);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(filter())
        .init();
    "stdout"
}

// ============================================================================
// Startup
// ============================================================================

fn current_uid() -> u32 {
    // SAFETY: getuid has no preconditions and cannot fail
    unsafe { libc::getuid() }
}

/// One discovery query so the log shows what the hub sees
async fn log_discovered_fans(hub: &mut UsbHub) {
    let discovered = match hub.fetch_page(PAGES_PER_QUERY).await {
        Ok(page) => decode_page(&page),
        Err(e) => Err(e),
    };

    match discovered {
        Ok(fans) if fans.is_empty() => warn!("Hub reports no fan groups yet"),
        Ok(fans) => {
            info!(count = fans.len(), "Detected fan groups");
            for fan in &fans {
                info!(
                    mac = %fan.mac,
                    fans = fan.fan_count,
                    channel = fan.channel,
                    rx_type = fan.rx_type,
                    bound = fan.is_bound,
                    "Fan group"
                );
            }
        }
        Err(e) => warn!(error = %e, "Initial fan discovery failed"),
    }
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable, waiting for SIGINT only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let socket_path = args
        .socket
        .unwrap_or_else(|| paths::default_socket_path(current_uid()));
    let store = match args.config {
        Some(path) => JsonSettingsStore::new(path),
        None => JsonSettingsStore::default_location()?,
    };
    info!(config = %store.path().display(), socket = %socket_path.display(), "STARTUP: paths resolved");

    let state = Arc::new(SharedState::new(Arc::new(store)));

    let mut hub = UsbHub::open().context("Failed to open the fan hub (is the receiver plugged in?)")?;
    log_discovered_fans(&mut hub).await;

    let listener = server::bind_socket(&socket_path)
        .with_context(|| format!("Failed to bind status socket {}", socket_path.display()))?;

    let control = ControlLoop::new(hub, SystemTemperatures::default(), Arc::clone(&state));
    let delay_ms = args.startup_delay_ms;
    let control = async move {
        if delay_ms > 0 {
            info!(delay_ms, "Delaying fan control start");
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        control.run().await
    };

    let result = tokio::select! {
        result = control => result.context("Fan control stopped"),
        result = server::serve(listener, state) => result.context("Status server stopped"),
        _ = shutdown_signal() => {
            info!("SIGNAL: shutdown requested");
            Ok(())
        }
    };

    server::remove_socket(&socket_path);
    result
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();
    let sink = init_logging(&args.log_level);

    info!("STARTUP: llconnectd {} starting", VERSION);
    info!("STARTUP: Logging to {}", sink);

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        std::process::exit(1);
    }

    info!("SHUTDOWN: llconnectd stopped");
}
