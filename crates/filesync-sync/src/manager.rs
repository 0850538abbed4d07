//! Per-configuration run loop
//!
//! A [`FileSyncManager`] owns one [`SyncConfig`] and, once started, one
//! tokio task that repeats a sync pass every `interval_secs`:
//!
//! ```text
//!  IDLE ──► WAITING_FOR_SOURCE_LOCK ──► SCANNING ──► COPYING* ──► CLEANING ──► IDLE
//!                  │                        │            │            │
//!                  │ stop                   └── failure ─┴────────────┴──► ERROR
//!                  ▼
//!               STOPPED  (reachable from every state on stop)
//! ```
//!
//! Every state change and every per-file update replaces the status
//! snapshot in a `watch` channel and is published to the [`IStatusSink`].
//! Failures never leave the loop: a failed pass ends in `ERROR` and the
//! next interval starts over.
//!
//! Cancellation is observed while waiting for the source lock, during the
//! stability delay, between candidates and during the interval sleep. A
//! copy already in progress runs to completion.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use filesync_core::config::EngineConfig;
use filesync_core::domain::{
    ConfigId, DomainError, StatusEvent, SyncConfig, SyncState, SyncStatus,
};
use filesync_core::ports::IStatusSink;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::coordinator::SourceCopyCoordinator;
use crate::copier::{Copier, CopyOutcome};
use crate::history::SyncHistory;
use crate::retention::RetentionManager;
use crate::scanner::{CandidateFile, Scanner};
use crate::stability::{Stability, StabilityGate};
use crate::{SyncError, HISTORY_DIR};

// ============================================================================
// ManagerSettings
// ============================================================================

/// Engine knobs shared by every manager in the process
#[derive(Debug, Clone, Copy)]
pub struct ManagerSettings {
    /// Gate deciding when a file has settled
    pub stability: StabilityGate,
    /// Per-file failures tolerated in one pass before it ends in `ERROR`;
    /// 0 disables the limit
    pub max_transient_failures: u32,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self::from_engine(&EngineConfig::default())
    }
}

impl ManagerSettings {
    pub fn from_engine(engine: &EngineConfig) -> Self {
        Self {
            stability: StabilityGate::new(engine.stability_samples, engine.stability_delay()),
            max_transient_failures: engine.max_transient_failures,
        }
    }
}

// ============================================================================
// FileSyncManager
// ============================================================================

struct RunningTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Drives the sync loop of one configuration
pub struct FileSyncManager {
    config: Arc<SyncConfig>,
    coordinator: Arc<SourceCopyCoordinator>,
    settings: ManagerSettings,
    sink: Arc<dyn IStatusSink>,
    status: Arc<watch::Sender<SyncStatus>>,
    task: Mutex<Option<RunningTask>>,
}

impl std::fmt::Debug for FileSyncManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSyncManager")
            .field("id", &self.config.id)
            .field("name", &self.config.name)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl FileSyncManager {
    /// Creates a stopped manager for `config`
    pub fn new(
        config: SyncConfig,
        coordinator: Arc<SourceCopyCoordinator>,
        settings: ManagerSettings,
        sink: Arc<dyn IStatusSink>,
    ) -> Self {
        let (status, _) = watch::channel(SyncStatus::new());
        Self {
            config: Arc::new(config),
            coordinator,
            settings,
            sink,
            status: Arc::new(status),
            task: Mutex::new(None),
        }
    }

    pub fn id(&self) -> ConfigId {
        self.config.id
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Spawns the run loop on the current tokio runtime
    ///
    /// # Errors
    /// - [`SyncError::AlreadyRunning`] if the loop is already active
    /// - [`SyncError::DomainError`] if the configuration is invalid
    pub fn start(&self) -> Result<(), SyncError> {
        let mut task = self.task_slot();
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return Err(SyncError::AlreadyRunning(self.config.id));
        }
        self.config.validate()?;

        self.status.send_modify(|status| {
            if status.state == SyncState::Stopped {
                let _ = status.transition(SyncState::Idle, "Restarting");
            }
        });

        let cancel = CancellationToken::new();
        let worker = Worker {
            config: Arc::clone(&self.config),
            coordinator: Arc::clone(&self.coordinator),
            settings: self.settings,
            sink: Arc::clone(&self.sink),
            status: Arc::clone(&self.status),
            cancel: cancel.clone(),
            copier: Copier::new(),
            retention: RetentionManager::new(),
        };
        let span = info_span!("sync", id = %self.config.id, name = %self.config.name);
        let handle = tokio::spawn(worker.run().instrument(span));

        *task = Some(RunningTask { cancel, handle });
        Ok(())
    }

    /// Asks the loop to stop; returns immediately
    ///
    /// Safe to call any number of times, running or not.
    pub fn stop(&self) {
        if let Some(task) = self.task_slot().as_ref() {
            task.cancel.cancel();
        }
    }

    /// Stops the loop and waits until its task has finished
    pub async fn stop_and_wait(&self) {
        let task = self.task_slot().take();
        if let Some(task) = task {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                error!(id = %self.config.id, error = %e, "Sync task ended abnormally");
            }
        }
    }

    /// True while the loop task is alive
    pub fn is_running(&self) -> bool {
        self.task_slot()
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    /// Latest status snapshot
    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    /// Receiver that observes every status replacement
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    fn task_slot(&self) -> MutexGuard<'_, Option<RunningTask>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for FileSyncManager {
    fn drop(&mut self) {
        if let Some(task) = self.task_slot().as_ref() {
            task.cancel.cancel();
        }
    }
}

// ============================================================================
// Worker
// ============================================================================

/// Counters for one completed pass
#[derive(Debug, Default, Clone, Copy)]
struct PassSummary {
    total: usize,
    copied: u32,
    skipped: u32,
    unstable: u32,
    errors: u32,
}

/// Why a pass did not complete
enum PassEnd {
    Cancelled,
    Failed(SyncError),
}

impl From<SyncError> for PassEnd {
    fn from(err: SyncError) -> Self {
        PassEnd::Failed(err)
    }
}

impl From<DomainError> for PassEnd {
    fn from(err: DomainError) -> Self {
        PassEnd::Failed(err.into())
    }
}

/// State owned by the spawned loop task
struct Worker {
    config: Arc<SyncConfig>,
    coordinator: Arc<SourceCopyCoordinator>,
    settings: ManagerSettings,
    sink: Arc<dyn IStatusSink>,
    status: Arc<watch::Sender<SyncStatus>>,
    cancel: CancellationToken,
    copier: Copier,
    retention: RetentionManager,
}

impl Worker {
    async fn run(self) {
        let interval = Duration::from_secs(self.config.interval_secs);
        info!(
            source = %self.config.source_path.display(),
            replica = %self.config.replica_path.display(),
            interval_secs = self.config.interval_secs,
            "Sync loop started"
        );

        loop {
            self.transition(SyncState::WaitingForSourceLock, "Waiting for source lock");

            let lease = self
                .coordinator
                .acquire(&self.config.source_path, self.config.id, &self.cancel)
                .await;
            let Some(lease) = lease else {
                break;
            };

            let outcome = self.run_pass().await;
            drop(lease);

            match outcome {
                Ok(summary) => self.finish_pass(summary),
                Err(PassEnd::Cancelled) => break,
                Err(PassEnd::Failed(err)) => self.fail_pass(&err),
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.cancel.cancelled() => break,
            }
        }

        self.transition_with(SyncState::Stopped, "Stopped", false);
        info!("Sync loop stopped");
    }

    async fn run_pass(&self) -> Result<PassSummary, PassEnd> {
        let source = &self.config.source_path;
        let replica = &self.config.replica_path;

        self.apply(|status| {
            status.transition(SyncState::Scanning, format!("Scanning {}", source.display()))?;
            status.begin_pass();
            Ok(())
        });

        let scanner = Scanner::new(source, self.config.effective_pattern())?;
        scanner.check_root()?;
        tokio::fs::create_dir_all(replica)
            .await
            .map_err(SyncError::from)?;
        let scanner = scanner.exclude(replica);
        let patterns = scanner.patterns().clone();

        let candidates = tokio::task::spawn_blocking(move || scanner.collect_sorted())
            .await
            .map_err(|e| SyncError::IoError(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

        let total = candidates.len();
        info!(total, pattern = patterns.as_str(), "Pass started");

        let mut history = SyncHistory::load(replica).await;
        let mut summary = PassSummary {
            total,
            ..PassSummary::default()
        };
        let threshold = self.settings.max_transient_failures;

        for (index, candidate) in candidates.iter().enumerate() {
            if self.cancel.is_cancelled() {
                self.save_history(&mut history).await;
                return Err(PassEnd::Cancelled);
            }

            let rel = candidate.display_path();
            self.apply(|status| {
                status.transition(SyncState::Copying, format!("Copying {rel}"))?;
                status.set_current_file(rel.clone());
                Ok(())
            });

            if history.is_current(&rel, candidate.modified) {
                debug!(file = %rel, "Unchanged since last copy");
                summary.skipped += 1;
                self.report_progress(index + 1, total, &summary);
                continue;
            }

            let checked_at = Utc::now();
            match self.settings.stability.check(&candidate.source_path, &self.cancel).await {
                Stability::Stable(fingerprint) => {
                    let settled = CandidateFile {
                        size: fingerprint.size,
                        modified: fingerprint.modified,
                        ..candidate.clone()
                    };
                    match self.copier.copy(&settled, replica).await {
                        Ok(CopyOutcome::Copied { .. }) => {
                            history.record(rel.clone(), checked_at);
                            summary.copied += 1;
                        }
                        Ok(CopyOutcome::AlreadySynced) => {
                            history.record(rel.clone(), checked_at);
                            summary.skipped += 1;
                        }
                        Err(err) => {
                            warn!(file = %rel, error = %err, "Copy failed");
                            summary.errors += 1;
                        }
                    }
                }
                Stability::Changed => {
                    info!(file = %rel, "File is still being written, skipping this pass");
                    summary.unstable += 1;
                }
                Stability::Vanished => {
                    debug!(file = %rel, "File disappeared before copy");
                }
                Stability::Cancelled => {
                    self.save_history(&mut history).await;
                    return Err(PassEnd::Cancelled);
                }
            }

            self.report_progress(index + 1, total, &summary);

            if threshold > 0 && summary.errors > threshold {
                self.save_history(&mut history).await;
                return Err(SyncError::TooManyFailures {
                    failures: summary.errors,
                    threshold,
                }
                .into());
            }
        }

        self.transition(SyncState::Cleaning, "Applying retention");
        let policy = self.config.retention_policy();
        if let Err(err) = self.retention.cleanup(replica, &patterns, policy).await {
            warn!(error = %err, "Retention cleanup failed");
        }
        self.save_history(&mut history).await;

        Ok(summary)
    }

    fn finish_pass(&self, summary: PassSummary) {
        let details = format!(
            "Synced {} file(s): {} copied, {} up to date, {} still changing, {} error(s)",
            summary.total, summary.copied, summary.skipped, summary.unstable, summary.errors
        );
        info!(
            total = summary.total,
            copied = summary.copied,
            skipped = summary.skipped,
            unstable = summary.unstable,
            errors = summary.errors,
            "Pass completed"
        );
        self.apply(|status| {
            status.transition(SyncState::Idle, details)?;
            status.complete_pass(Utc::now());
            Ok(())
        });
    }

    fn fail_pass(&self, err: &SyncError) {
        if err.is_config_error() {
            error!(error = %err, "Configuration error, retrying next interval");
        } else {
            error!(error = %err, "Pass failed");
        }
        self.apply(|status| {
            status.transition(SyncState::Error, err.to_string())?;
            status.current_file = None;
            Ok(())
        });
    }

    fn report_progress(&self, done: usize, total: usize, summary: &PassSummary) {
        self.apply(|status| {
            status.set_progress(done, total);
            status.files_copied = summary.copied;
            status.files_skipped = summary.skipped;
            status.files_unstable = summary.unstable;
            status.errors = summary.errors;
            Ok(())
        });
    }

    async fn save_history(&self, history: &mut SyncHistory) {
        if let Err(err) = history.save().await {
            warn!(
                path = %self.config.replica_path.join(HISTORY_DIR).display(),
                error = %err,
                "Could not save sync history"
            );
        }
    }

    fn transition(&self, target: SyncState, details: &str) {
        self.transition_with(target, details, true);
    }

    fn transition_with(&self, target: SyncState, details: &str, running: bool) {
        self.apply_with(|status| status.transition(target, details), running);
    }

    fn apply<F>(&self, update: F)
    where
        F: FnOnce(&mut SyncStatus) -> Result<(), DomainError>,
    {
        self.apply_with(update, true);
    }

    /// Replaces the snapshot and publishes it
    fn apply_with<F>(&self, update: F, running: bool)
    where
        F: FnOnce(&mut SyncStatus) -> Result<(), DomainError>,
    {
        let mut rejected = None;
        self.status.send_modify(|status| {
            if let Err(err) = update(status) {
                rejected = Some(err);
            }
        });
        if let Some(err) = rejected {
            warn!(error = %err, "Status update rejected");
            return;
        }

        let status = self.status.borrow().clone();
        self.sink.publish(StatusEvent {
            config_id: self.config.id,
            running,
            status,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex as StdMutex;

    use filesync_core::domain::{RetentionMode, SyncConfig};
    use filesync_core::ports::NullStatusSink;
    use tempfile::TempDir;

    use super::*;

    fn fast_settings() -> ManagerSettings {
        ManagerSettings {
            stability: StabilityGate::new(2, Duration::from_millis(10)),
            max_transient_failures: 5,
        }
    }

    fn coordinator() -> Arc<SourceCopyCoordinator> {
        Arc::new(SourceCopyCoordinator::new(Duration::from_millis(50)))
    }

    fn config(id: u64, source: &Path, replica: &Path) -> SyncConfig {
        SyncConfig::new(ConfigId::new(id), format!("cfg-{id}"), source, replica).with_interval(1)
    }

    fn manager(config: SyncConfig) -> FileSyncManager {
        FileSyncManager::new(
            config,
            coordinator(),
            fast_settings(),
            Arc::new(NullStatusSink),
        )
    }

    async fn wait_for<F>(manager: &FileSyncManager, predicate: F) -> SyncStatus
    where
        F: FnMut(&SyncStatus) -> bool,
    {
        let mut rx = manager.subscribe();
        let status = tokio::time::timeout(Duration::from_secs(10), rx.wait_for(predicate))
            .await
            .expect("status not reached in time")
            .expect("status channel closed");
        status.clone()
    }

    #[derive(Default)]
    struct RecordingSink(StdMutex<Vec<StatusEvent>>);

    impl IStatusSink for RecordingSink {
        fn publish(&self, event: StatusEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[test]
    fn test_settings_from_engine() {
        let engine = EngineConfig {
            stability_samples: 3,
            stability_delay_ms: 250,
            lock_poll_interval_ms: 100,
            max_transient_failures: 7,
        };
        let settings = ManagerSettings::from_engine(&engine);
        assert_eq!(settings.stability.samples(), 3);
        assert_eq!(settings.stability.delay(), Duration::from_millis(250));
        assert_eq!(settings.max_transient_failures, 7);
    }

    #[tokio::test]
    async fn test_pass_copies_matching_files() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::create_dir_all(src.path().join("db")).unwrap();
        fs::write(src.path().join("db/nightly.bak"), b"backup").unwrap();
        fs::write(src.path().join("readme.txt"), b"ignored").unwrap();

        let mgr = manager(config(1, src.path(), dst.path()).with_pattern("*.bak"));
        mgr.start().unwrap();

        let status = wait_for(&mgr, |s| s.state == SyncState::Idle && s.last_sync_time.is_some()).await;
        assert_eq!(status.progress_percent, 100);
        assert_eq!(status.files_copied, 1);
        assert_eq!(status.current_file, None);

        assert_eq!(fs::read(dst.path().join("db/nightly.bak")).unwrap(), b"backup");
        assert!(!dst.path().join("readme.txt").exists());
        assert!(dst.path().join(".history/sync_history.json").exists());

        mgr.stop_and_wait().await;
        assert_eq!(mgr.status().state, SyncState::Stopped);
        assert!(!mgr.is_running());
    }

    #[tokio::test]
    async fn test_start_twice_is_already_running() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let mgr = manager(config(2, src.path(), dst.path()));

        mgr.start().unwrap();
        assert!(matches!(mgr.start(), Err(SyncError::AlreadyRunning(id)) if id == ConfigId::new(2)));
        mgr.stop_and_wait().await;
    }

    #[tokio::test]
    async fn test_missing_source_enters_error_and_keeps_running() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(config(3, &dir.path().join("absent"), &dir.path().join("replica")));
        mgr.start().unwrap();

        let status = wait_for(&mgr, |s| s.state == SyncState::Error).await;
        assert!(status.details.contains("Source unavailable"), "{}", status.details);
        assert!(mgr.is_running());

        // The next interval retries once the source appears.
        fs::create_dir_all(dir.path().join("absent")).unwrap();
        wait_for(&mgr, |s| s.state == SyncState::Idle && s.last_sync_time.is_some()).await;
        mgr.stop_and_wait().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_restartable() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let mgr = manager(config(4, src.path(), dst.path()));

        mgr.stop();
        mgr.start().unwrap();
        wait_for(&mgr, |s| s.last_sync_time.is_some()).await;
        mgr.stop();
        mgr.stop();
        mgr.stop_and_wait().await;
        assert_eq!(mgr.status().state, SyncState::Stopped);

        mgr.start().unwrap();
        wait_for(&mgr, |s| s.state == SyncState::Idle).await;
        mgr.stop_and_wait().await;
        assert_eq!(mgr.status().state, SyncState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_while_waiting_for_lock() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let coord = coordinator();
        let blocker = coord
            .acquire(src.path(), ConfigId::new(99), &CancellationToken::new())
            .await
            .unwrap();

        let mgr = FileSyncManager::new(
            config(5, src.path(), dst.path()),
            Arc::clone(&coord),
            fast_settings(),
            Arc::new(NullStatusSink),
        );
        mgr.start().unwrap();
        wait_for(&mgr, |s| s.state == SyncState::WaitingForSourceLock).await;

        tokio::time::timeout(Duration::from_secs(1), mgr.stop_and_wait())
            .await
            .expect("stop must not wait for the holder");
        assert_eq!(mgr.status().state, SyncState::Stopped);
        assert_eq!(coord.holder(src.path()), Some(ConfigId::new(99)));
        assert_eq!(coord.waiters(src.path()), 0);
        drop(blocker);
    }

    #[tokio::test]
    async fn test_retention_runs_after_copy() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        for i in 0..4 {
            fs::write(dst.path().join(format!("old{i}.bak")), b"x").unwrap();
            let past = std::time::SystemTime::now() - Duration::from_secs(3600 * (i + 1));
            fs::File::options()
                .write(true)
                .open(dst.path().join(format!("old{i}.bak")))
                .unwrap()
                .set_modified(past)
                .unwrap();
        }
        fs::write(src.path().join("fresh.bak"), b"new").unwrap();

        let mgr = manager(
            config(6, src.path(), dst.path()).with_retention(RetentionMode::Count, 2),
        );
        mgr.start().unwrap();
        wait_for(&mgr, |s| s.last_sync_time.is_some()).await;
        mgr.stop_and_wait().await;

        assert!(dst.path().join("fresh.bak").exists());
        assert!(dst.path().join("old0.bak").exists());
        for i in 1..4 {
            assert!(!dst.path().join(format!("old{i}.bak")).exists(), "old{i}.bak");
        }
    }

    fn set_age(path: &Path, age: Duration) {
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(std::time::SystemTime::now() - age)
            .unwrap();
    }

    #[tokio::test]
    async fn test_pruned_file_is_not_copied_again() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::write(src.path().join("old.bak"), b"archived").unwrap();
        set_age(&src.path().join("old.bak"), Duration::from_secs(70 * 86_400));

        let mgr = manager(
            config(8, src.path(), dst.path()).with_retention(RetentionMode::Days, 60),
        );
        mgr.start().unwrap();

        let first = wait_for(&mgr, |s| s.last_sync_time.is_some()).await;
        assert_eq!(first.files_copied, 1);
        assert!(!dst.path().join("old.bak").exists());
        let first_at = first.last_sync_time.unwrap();

        let second = wait_for(&mgr, |s| s.last_sync_time.is_some_and(|t| t > first_at)).await;
        mgr.stop_and_wait().await;
        assert_eq!(second.files_copied, 0);
        assert_eq!(second.files_skipped, 1);
        assert!(!dst.path().join("old.bak").exists());
    }

    #[tokio::test]
    async fn test_changed_file_is_copied_again() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::write(src.path().join("data.csv"), b"v1").unwrap();

        let mgr = manager(config(9, src.path(), dst.path()));
        mgr.start().unwrap();
        let first = wait_for(&mgr, |s| s.last_sync_time.is_some()).await;
        assert_eq!(first.files_copied, 1);
        let first_at = first.last_sync_time.unwrap();

        fs::write(src.path().join("data.csv"), b"version two").unwrap();
        let second = wait_for(&mgr, |s| s.last_sync_time.is_some_and(|t| t > first_at)).await;
        mgr.stop_and_wait().await;
        assert_eq!(second.files_copied, 1);
        assert_eq!(fs::read(dst.path().join("data.csv")).unwrap(), b"version two");
    }

    #[tokio::test]
    async fn test_copy_failure_is_counted_and_pass_continues() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::create_dir_all(src.path().join("blocked")).unwrap();
        fs::write(src.path().join("blocked/a.bak"), b"a").unwrap();
        fs::write(src.path().join("ok.bak"), b"ok").unwrap();
        // A file where the replica needs a directory fails the copy.
        fs::write(dst.path().join("blocked"), b"in the way").unwrap();

        let mgr = manager(config(10, src.path(), dst.path()));
        mgr.start().unwrap();
        let status = wait_for(&mgr, |s| s.last_sync_time.is_some()).await;
        mgr.stop_and_wait().await;

        assert_eq!(status.state, SyncState::Idle);
        assert_eq!(status.errors, 1);
        assert_eq!(status.files_copied, 1);
        assert!(dst.path().join("ok.bak").exists());
    }

    #[tokio::test]
    async fn test_too_many_failures_ends_pass_in_error_and_retries() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::create_dir_all(src.path().join("blocked")).unwrap();
        for name in ["a.bak", "b.bak", "c.bak"] {
            fs::write(src.path().join("blocked").join(name), name).unwrap();
        }
        fs::write(src.path().join("z.bak"), b"z").unwrap();
        fs::write(dst.path().join("blocked"), b"in the way").unwrap();
        fs::write(dst.path().join("stale.bak"), b"old").unwrap();
        set_age(&dst.path().join("stale.bak"), Duration::from_secs(90 * 86_400));

        let settings = ManagerSettings {
            max_transient_failures: 2,
            ..fast_settings()
        };
        let mgr = FileSyncManager::new(
            config(11, src.path(), dst.path()).with_retention(RetentionMode::Days, 30),
            coordinator(),
            settings,
            Arc::new(NullStatusSink),
        );
        mgr.start().unwrap();

        let failed = wait_for(&mgr, |s| s.state == SyncState::Error).await;
        assert_eq!(failed.errors, 3);
        assert_eq!(
            failed.details,
            "3 file operation(s) failed in this pass (threshold 2)"
        );
        assert_eq!(failed.last_sync_time, None);
        assert!(mgr.is_running());
        // The pass was abandoned before the last candidate and before cleanup.
        assert!(!dst.path().join("z.bak").exists());
        assert!(dst.path().join("stale.bak").exists());

        fs::remove_file(dst.path().join("blocked")).unwrap();
        let recovered = wait_for(&mgr, |s| s.last_sync_time.is_some()).await;
        mgr.stop_and_wait().await;

        assert_eq!(recovered.errors, 0);
        assert_eq!(recovered.files_copied, 4);
        assert!(dst.path().join("blocked/c.bak").exists());
        assert!(dst.path().join("z.bak").exists());
        assert!(!dst.path().join("stale.bak").exists());
    }

    #[tokio::test]
    async fn test_events_published_for_transitions() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::write(src.path().join("a.txt"), b"a").unwrap();
        let sink = Arc::new(RecordingSink::default());

        let mgr = FileSyncManager::new(
            config(7, src.path(), dst.path()),
            coordinator(),
            fast_settings(),
            Arc::clone(&sink) as Arc<dyn IStatusSink>,
        );
        mgr.start().unwrap();
        wait_for(&mgr, |s| s.last_sync_time.is_some()).await;
        mgr.stop_and_wait().await;

        let events = sink.0.lock().unwrap();
        let states: Vec<SyncState> = events.iter().map(|e| e.status.state).collect();
        assert_eq!(states[0], SyncState::WaitingForSourceLock);
        assert!(states.contains(&SyncState::Scanning));
        assert!(states.contains(&SyncState::Copying));
        assert!(states.contains(&SyncState::Cleaning));
        let last = events.last().unwrap();
        assert_eq!(last.status.state, SyncState::Stopped);
        assert!(!last.running);
        assert!(events.iter().all(|e| e.config_id == ConfigId::new(7)));
    }
}
