//! # livebridge
//!
//! Bridge binary: loads settings, connects to the broker and runs the
//! dispatch loop, watchdog and sweeper until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use livebridge_logging::{LogFormat, init_subscriber, with_startup_logging};
use livebridge_runtime::{BridgeEvent, LiveBridge, ShutdownCoordinator};
use livebridge_settings::{
    BridgeSettings, get_settings, init_settings, load_settings_from_path, settings_path,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Live-session bridge.
#[derive(Parser, Debug)]
#[command(name = "livebridge", about = "Bridge chat commands to a live broadcast controller")]
struct Cli {
    /// Settings file (defaults to `~/.livebridge/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Broker host.
    #[arg(long)]
    host: Option<String>,

    /// Broker port.
    #[arg(long)]
    port: Option<u16>,

    /// Topic domain prefix, e.g. `/live`.
    #[arg(long)]
    domain: Option<String>,

    /// Log level (overridden by `RUST_LOG`).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    /// Load, override and validate settings.
    fn settings(&self) -> Result<BridgeSettings> {
        let path = self.config.clone().unwrap_or_else(settings_path);
        let mut settings = load_settings_from_path(&path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?;
        self.apply(&mut settings);
        settings.validate().context("invalid settings")?;
        Ok(settings)
    }

    fn apply(&self, settings: &mut BridgeSettings) {
        if let Some(host) = &self.host {
            settings.broker.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.broker.port = port;
        }
        if let Some(domain) = &self.domain {
            settings.rpc.domain.clone_from(domain);
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.json_logs {
            settings.logging.format = LogFormat::Json;
        }
    }
}

/// Stand-in for the chat and ledger layers: log what the bridge reports.
async fn log_events(mut events: broadcast::Receiver<BridgeEvent>, cancel: CancellationToken) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => return,
            event = events.recv() => event,
        };
        match event {
            Ok(BridgeEvent::SessionStopped { digest, forced }) => {
                info!(duration = %digest.formatted_duration(), forced, "session ended");
            }
            Ok(event) => info!(event = event.label(), "bridge event"),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "event log fell behind"),
            Err(RecvError::Closed) => return,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The configured subscriber depends on the settings, so warnings raised
    // while loading them go through a scoped one.
    let settings = with_startup_logging(|| cli.settings())?;
    let _ = init_settings(settings);
    let settings = get_settings();

    init_subscriber(&settings.logging.level, settings.logging.format);

    let shutdown = ShutdownCoordinator::new();
    let (bridge, mut handles) =
        LiveBridge::start(settings, shutdown.token()).context("failed to start bridge")?;
    handles.push(tokio::spawn(log_events(bridge.subscribe(), shutdown.token())));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutdown requested");

    let aborted = shutdown.graceful_shutdown(handles, None).await;
    if aborted > 0 {
        warn!(aborted, "some tasks did not stop in time");
    }
    Ok(())
}
