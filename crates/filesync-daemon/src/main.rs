//! filesync daemon - Background mirroring service
//!
//! This binary runs as a user or system service and:
//! - Loads the YAML configuration
//! - Starts one sync loop per active configuration
//! - Logs every status change reported by the loops
//! - Shuts down gracefully on SIGTERM/SIGINT
//!
//! # Architecture
//!
//! All loops share one `SyncRegistry`, which owns the source-path
//! coordinator. The daemon waits on a `CancellationToken` that is
//! triggered by a signal, then stops every loop and exits.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use filesync_core::config::{Config, LoggingConfig};
use filesync_core::domain::{ConfigId, StatusEvent, SyncState};
use filesync_sync::SyncRegistry;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// How often the daemon logs a summary of all loops
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(300);

// ============================================================================
// Command line
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "filesyncd", version, about = "One-directional folder mirroring daemon")]
struct Args {
    /// Use alternate config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

// ============================================================================
// DaemonService
// ============================================================================

/// Owns the registry and runs until shutdown
struct DaemonService {
    config: Config,
    registry: Arc<SyncRegistry>,
    shutdown: CancellationToken,
}

impl DaemonService {
    fn new(config: Config, shutdown: CancellationToken) -> Self {
        let registry = Arc::new(SyncRegistry::new(&config.engine));
        Self {
            config,
            registry,
            shutdown,
        }
    }

    /// Starts every active configuration and blocks until shutdown
    async fn run(&self) -> Result<()> {
        let logger = tokio::spawn(log_events(
            self.registry.subscribe(),
            self.shutdown.clone(),
        ));

        let mut started = 0;
        for sync in self.config.active_syncs() {
            match self.registry.start(sync.clone()) {
                Ok(()) => started += 1,
                Err(e) => error!(id = %sync.id, name = %sync.name, error = %e, "Failed to start sync"),
            }
        }
        if started == 0 {
            warn!("No active sync configurations; waiting for shutdown");
        } else {
            info!(started, "Sync loops running");
        }

        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        // The first tick fires immediately
        heartbeat.tick().await;
        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    let system = self.registry.system_status();
                    info!(
                        state = ?system.state,
                        active = system.active_count,
                        total = system.total_configs,
                        "Heartbeat"
                    );
                }
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.registry.stop_all().await;
        if let Err(e) = logger.await {
            warn!(error = %e, "Status logger ended abnormally");
        }
        Ok(())
    }
}

// ============================================================================
// Status logging
// ============================================================================

/// Remembers the last state per configuration so only changes log at info
#[derive(Debug, Default)]
struct StateTracker {
    last: HashMap<ConfigId, SyncState>,
}

impl StateTracker {
    /// Returns true if the event carries a state different from the last one seen
    fn observe(&mut self, event: &StatusEvent) -> bool {
        self.last.insert(event.config_id, event.status.state) != Some(event.status.state)
    }
}

async fn log_events(
    mut events: tokio::sync::broadcast::Receiver<StatusEvent>,
    shutdown: CancellationToken,
) {
    let mut tracker = StateTracker::default();
    loop {
        let event = tokio::select! {
            received = events.recv() => received,
            _ = shutdown.cancelled() => break,
        };
        match event {
            Ok(event) => {
                let status = &event.status;
                if tracker.observe(&event) {
                    info!(
                        id = %event.config_id,
                        state = %status.state,
                        details = %status.details,
                        "Sync state changed"
                    );
                } else {
                    debug!(
                        id = %event.config_id,
                        file = status.current_file.as_deref().unwrap_or(""),
                        progress = status.progress_percent,
                        "Sync progress"
                    );
                }
            }
            Err(RecvError::Lagged(missed)) => {
                debug!(missed, "Status logger lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

// ============================================================================
// Tracing
// ============================================================================

/// Installs the global subscriber
///
/// `RUST_LOG` wins over the configured level. When `logging.file` is set
/// the output is also written there; the returned guard flushes it on drop.
fn init_tracing(logging: &LoggingConfig, level: Option<&str>) -> Result<Option<WorkerGuard>> {
    let level = level.unwrap_or(logging.level.as_str());
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match &logging.file {
        Some(path) => {
            let (dir, name) = split_log_path(path)?;
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_target(true))
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .init();
            Ok(None)
        }
    }
}

fn split_log_path(path: &Path) -> Result<(PathBuf, PathBuf)> {
    let name = path
        .file_name()
        .with_context(|| format!("Log file path has no file name: {}", path.display()))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, PathBuf::from(name)))
}

// ============================================================================
// Configuration
// ============================================================================

/// Loads `path`, or the defaults when the file does not exist
fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    Config::load(path).with_context(|| format!("Failed to load {}", path.display()))
}

// ============================================================================
// Graceful shutdown signal handler
// ============================================================================

/// Waits for SIGTERM or SIGINT and triggers the cancellation token
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

// ============================================================================
// Main entry point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config_path = args.config.clone().unwrap_or_else(Config::default_path);
    let config = load_config(&config_path)?;
    let problems = config.validate();

    if args.check {
        if problems.is_empty() {
            println!("{}: OK ({} sync configuration(s))", config_path.display(), config.syncs.len());
            return Ok(());
        }
        for problem in &problems {
            eprintln!("{problem}");
        }
        anyhow::bail!("{} configuration problem(s) found", problems.len());
    }

    let _log_guard = init_tracing(&config.logging, args.log_level.as_deref())?;
    info!(config_path = %config_path.display(), "filesync daemon starting (filesyncd)");

    if !problems.is_empty() {
        for problem in &problems {
            error!(%problem, "Invalid configuration");
        }
        anyhow::bail!("Refusing to start with an invalid configuration");
    }

    let shutdown_token = CancellationToken::new();
    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let service = DaemonService::new(config, shutdown_token);
    let result = service.run().await;

    match &result {
        Ok(()) => info!("filesync daemon shut down gracefully"),
        Err(e) => error!(error = %e, "filesync daemon exiting with error"),
    }

    result
}

// ============================================================================
// Tests
// ============================================================================
