//! Daemon lifecycle: single-instance marker, watcher, maintenance and shutdown

use crate::error::{DaemonError, Result};
use crate::pid::PidLock;
use librato_importer::{FileHandler, LibraryWatcher, WatcherConfig};
use librato_state::StateStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const DAY: Duration = Duration::from_secs(24 * 60 * 60);
const HOUR: Duration = Duration::from_secs(60 * 60);

/// Supervisor lifecycle; `Stopped` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Created,
    Started,
    Running,
    ShuttingDown,
    Stopped,
}

/// Everything the supervisor needs beyond the ledger and the file handler
#[derive(Debug, Clone)]
pub struct DaemonOptions {
    pub watch_dir: PathBuf,
    pub pid_file: PathBuf,
    pub watcher: WatcherConfig,
    /// Process files already in the inbox before entering the run loop
    pub scan_on_startup: bool,
    /// Ledger records older than this are pruned by maintenance
    pub retention: Duration,
    pub maintenance_interval: Duration,
    pub stats_interval: Duration,
}

impl DaemonOptions {
    pub fn new(watch_dir: impl Into<PathBuf>, pid_file: impl Into<PathBuf>) -> Self {
        Self {
            watch_dir: watch_dir.into(),
            pid_file: pid_file.into(),
            watcher: WatcherConfig::default(),
            scan_on_startup: true,
            retention: 30 * DAY,
            maintenance_interval: DAY,
            stats_interval: HOUR,
        }
    }
}

/// SIGTERM and SIGINT streams
///
/// Install these before any slow startup work; a signal delivered before
/// installation would kill the process with the default action.
pub struct ShutdownSignals {
    terminate: Signal,
    interrupt: Signal,
}

impl ShutdownSignals {
    pub fn install() -> Result<Self> {
        Ok(Self {
            terminate: signal(SignalKind::terminate()).map_err(DaemonError::Signal)?,
            interrupt: signal(SignalKind::interrupt()).map_err(DaemonError::Signal)?,
        })
    }
}

/// Runs the watcher until a signal or a shutdown request arrives
pub struct DaemonSupervisor {
    options: DaemonOptions,
    state: Arc<StateStore>,
    watcher: LibraryWatcher,
    phase: DaemonState,
    pid_lock: Option<PidLock>,
    signals: Option<ShutdownSignals>,
    shutdown: CancellationToken,
    started_at: Instant,
}

impl DaemonSupervisor {
    /// Build a supervisor around signal handlers installed by the caller
    pub fn new(
        options: DaemonOptions,
        state: Arc<StateStore>,
        handler: Arc<dyn FileHandler>,
        signals: ShutdownSignals,
    ) -> Self {
        let watcher = LibraryWatcher::new(&options.watch_dir, options.watcher.clone(), handler);

        Self {
            options,
            state,
            watcher,
            phase: DaemonState::Created,
            pid_lock: None,
            signals: Some(signals),
            shutdown: CancellationToken::new(),
            started_at: Instant::now(),
        }
    }

    pub fn phase(&self) -> DaemonState {
        self.phase
    }

    pub fn watcher(&self) -> &LibraryWatcher {
        &self.watcher
    }

    pub fn watch_dir(&self) -> &Path {
        &self.options.watch_dir
    }

    /// Token that makes [`run`](Self::run) shut down when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Claim the PID marker, start watching and run the startup scan
    ///
    /// On failure nothing is left behind and the supervisor is `Stopped`.
    pub async fn start(&mut self) -> Result<()> {
        self.expect_phase(&[DaemonState::Created], "start")?;
        info!("Starting librato daemon");

        let pid_lock = match PidLock::acquire(&self.options.pid_file) {
            Ok(lock) => lock,
            Err(e) => {
                self.phase = DaemonState::Stopped;
                return Err(e);
            }
        };

        if let Err(e) = self.watcher.start().await {
            self.phase = DaemonState::Stopped;
            if let Err(release_err) = pid_lock.release() {
                warn!("Failed to remove PID file: {}", release_err);
            }
            return Err(e.into());
        }

        self.pid_lock = Some(pid_lock);
        self.phase = DaemonState::Started;

        if self.options.scan_on_startup {
            match self.watcher.scan_existing().await {
                Ok(count) => info!("Startup scan handled {} files", count),
                Err(e) => error!("Startup scan failed: {}", e),
            }
        }

        info!(
            "Daemon started, watching {}",
            self.options.watch_dir.display()
        );
        Ok(())
    }

    /// Serve until SIGTERM, SIGINT or the shutdown token, then shut down
    pub async fn run(&mut self) -> Result<()> {
        self.expect_phase(&[DaemonState::Started], "run")?;
        let Some(mut signals) = self.signals.take() else {
            return Err(DaemonError::InvalidTransition {
                state: self.phase,
                action: "run",
            });
        };
        self.phase = DaemonState::Running;
        info!("Daemon running");
        let shutdown = self.shutdown.clone();

        let now = tokio::time::Instant::now();
        let mut maintenance = tokio::time::interval_at(
            now + self.options.maintenance_interval,
            self.options.maintenance_interval,
        );
        let mut stats = tokio::time::interval_at(
            now + self.options.stats_interval,
            self.options.stats_interval,
        );

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }
                _ = signals.terminate.recv() => {
                    info!("Received SIGTERM, shutting down");
                    break;
                }
                _ = signals.interrupt.recv() => {
                    info!("Received SIGINT, shutting down");
                    break;
                }
                _ = maintenance.tick() => self.run_maintenance().await,
                _ = stats.tick() => self.log_stats().await,
            }
        }

        self.shutdown().await
    }

    /// Stop the watcher, persist the ledger and remove the PID marker
    ///
    /// Every step runs even if an earlier one fails.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.expect_phase(&[DaemonState::Started, DaemonState::Running], "shut down")?;
        self.phase = DaemonState::ShuttingDown;
        info!("Shutting down daemon");

        self.watcher.stop().await;

        if let Err(e) = self.state.save().await {
            error!("Failed to save state on shutdown: {}", e);
        }

        if let Some(lock) = self.pid_lock.take() {
            if let Err(e) = lock.release() {
                warn!("Failed to remove PID file: {}", e);
            }
        }

        self.phase = DaemonState::Stopped;
        info!("Daemon stopped after {:?}", self.started_at.elapsed());
        Ok(())
    }

    async fn run_maintenance(&self) {
        info!("Running periodic maintenance");
        let removed = self.state.cleanup(self.options.retention).await;
        info!("Pruned {} ledger records", removed);

        if let Err(e) = self.state.save().await {
            error!("Failed to save state after maintenance: {}", e);
        }
    }

    async fn log_stats(&self) {
        let stats = self.state.stats().await;
        info!(
            processed = stats.total_processed,
            success = stats.total_success,
            failed = stats.total_failed,
            pending = self.watcher.pending_count().await,
            uptime_secs = self.started_at.elapsed().as_secs(),
            "Daemon stats"
        );
    }

    fn expect_phase(&self, allowed: &[DaemonState], action: &'static str) -> Result<()> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(DaemonError::InvalidTransition {
                state: self.phase,
                action,
            })
        }
    }
}
