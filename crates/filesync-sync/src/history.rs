//! Per-replica copy history
//!
//! Each replica root keeps `.history/sync_history.json`, a JSON object
//! mapping source-relative paths to the RFC 3339 time they were last
//! copied. The manager records every copy and saves once per pass.
//!
//! A source file whose modification time is not newer than its entry is
//! not copied again, even after retention removed it from the replica.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::{SyncError, HISTORY_DIR, TEMP_SUFFIX};

/// File name of the history document inside [`HISTORY_DIR`]
pub const HISTORY_FILE: &str = "sync_history.json";

/// Copy history of one replica
#[derive(Debug, Clone)]
pub struct SyncHistory {
    path: PathBuf,
    entries: BTreeMap<String, DateTime<Utc>>,
    dirty: bool,
}

impl SyncHistory {
    /// Loads the history stored under `replica_root`
    ///
    /// A missing file yields an empty history. A corrupt or unreadable one
    /// is logged and also treated as empty; the next save overwrites it.
    pub async fn load(replica_root: &Path) -> Self {
        let path = replica_root.join(HISTORY_DIR).join(HISTORY_FILE);
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Ignoring corrupt sync history");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot read sync history");
                BTreeMap::new()
            }
        };

        Self {
            path,
            entries,
            dirty: false,
        }
    }

    /// Notes that `relative_path` was copied at `at`
    pub fn record(&mut self, relative_path: impl Into<String>, at: DateTime<Utc>) {
        self.entries.insert(relative_path.into(), at);
        self.dirty = true;
    }

    /// When `relative_path` was last copied
    pub fn last_copied(&self, relative_path: &str) -> Option<DateTime<Utc>> {
        self.entries.get(relative_path).copied()
    }

    /// True if the version modified at `modified` was already copied
    pub fn is_current(&self, relative_path: &str, modified: SystemTime) -> bool {
        self.last_copied(relative_path)
            .is_some_and(|copied| DateTime::<Utc>::from(modified) <= copied)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Location of the history document
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the history if anything was recorded since the last save
    ///
    /// # Errors
    /// Returns [`SyncError::IoError`] if the file cannot be written.
    pub async fn save(&mut self) -> Result<(), SyncError> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_vec_pretty(&self.entries)
            .map_err(|e| SyncError::IoError(std::io::Error::new(ErrorKind::InvalidData, e)))?;

        let tmp_path = {
            let mut p = self.path.as_os_str().to_owned();
            p.push(TEMP_SUFFIX);
            PathBuf::from(p)
        };
        tokio::fs::write(&tmp_path, &json).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;

        debug!(path = %self.path.display(), entries = self.entries.len(), "Saved sync history");
        self.dirty = false;
        Ok(())
    }
}
