//! Registry of sync managers
//!
//! The orchestrator owns one [`SyncRegistry`]. It holds the process-wide
//! [`SourceCopyCoordinator`], the status broadcaster and one
//! [`FileSyncManager`] per configuration id. Stopped managers stay
//! registered so their last status remains visible.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use filesync_core::config::EngineConfig;
use filesync_core::domain::{ConfigId, StatusEvent, SyncConfig, SyncStatus, SystemStatus};
use tokio::sync::broadcast;
use tracing::info;

use crate::broadcast::BroadcastStatusSink;
use crate::coordinator::SourceCopyCoordinator;
use crate::manager::{FileSyncManager, ManagerSettings};
use crate::SyncError;

/// Owns every [`FileSyncManager`] in the process
#[derive(Debug)]
pub struct SyncRegistry {
    coordinator: Arc<SourceCopyCoordinator>,
    settings: ManagerSettings,
    events: BroadcastStatusSink,
    managers: Mutex<HashMap<ConfigId, Arc<FileSyncManager>>>,
}

impl SyncRegistry {
    pub fn new(engine: &EngineConfig) -> Self {
        Self {
            coordinator: Arc::new(SourceCopyCoordinator::new(engine.lock_poll_interval())),
            settings: ManagerSettings::from_engine(engine),
            events: BroadcastStatusSink::default(),
            managers: Mutex::new(HashMap::new()),
        }
    }

    /// Starts a manager for `config`
    ///
    /// A stopped manager registered under the same id is replaced.
    ///
    /// # Errors
    /// [`SyncError::AlreadyRunning`] if a manager for the id is running,
    /// or any error from [`FileSyncManager::start`].
    pub fn start(&self, config: SyncConfig) -> Result<(), SyncError> {
        let mut managers = self.lock();
        let id = config.id;
        if managers.get(&id).is_some_and(|m| m.is_running()) {
            return Err(SyncError::AlreadyRunning(id));
        }

        let manager = Arc::new(FileSyncManager::new(
            config,
            Arc::clone(&self.coordinator),
            self.settings,
            Arc::new(self.events.clone()),
        ));
        manager.start()?;
        info!(%id, name = %manager.config().name, "Sync started");
        managers.insert(id, manager);
        Ok(())
    }

    /// Stops the manager for `id` and waits for its loop to end
    ///
    /// Returns false if no manager is registered under `id`.
    pub async fn stop(&self, id: ConfigId) -> bool {
        let manager = self.lock().get(&id).cloned();
        match manager {
            Some(manager) => {
                manager.stop_and_wait().await;
                info!(%id, "Sync stopped");
                true
            }
            None => false,
        }
    }

    /// Stops every manager and waits for all of them
    pub async fn stop_all(&self) {
        let managers: Vec<Arc<FileSyncManager>> = self.lock().values().cloned().collect();
        for manager in &managers {
            manager.stop();
        }
        for manager in managers {
            manager.stop_and_wait().await;
        }
    }

    /// Running flag and latest status for `id`
    pub fn status(&self, id: ConfigId) -> Option<(bool, SyncStatus)> {
        self.lock()
            .get(&id)
            .map(|manager| (manager.is_running(), manager.status()))
    }

    /// Ids of the managers whose loop is alive, ascending
    pub fn running_ids(&self) -> Vec<ConfigId> {
        let mut ids: Vec<ConfigId> = self
            .lock()
            .iter()
            .filter(|(_, manager)| manager.is_running())
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    pub fn system_status(&self) -> SystemStatus {
        let managers = self.lock();
        let active = managers.values().filter(|m| m.is_running()).count();
        SystemStatus::from_counts(active, managers.len())
    }

    /// Events from every manager, current and future
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.events.subscribe()
    }

    pub fn coordinator(&self) -> &Arc<SourceCopyCoordinator> {
        &self.coordinator
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConfigId, Arc<FileSyncManager>>> {
        self.managers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
