//! Replica retention
//!
//! After each pass the replica is pruned according to the configuration's
//! [`RetentionPolicy`]:
//!
//! - `Days(n)`: files last modified more than `n` days ago are deleted.
//! - `Count(n)`: only the `n` most recently modified files are kept; ties
//!   are broken by path so the outcome is deterministic.
//!
//! Only files matching the configuration's pattern are considered. The
//! `.history` directory and in-flight temp files are never touched.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use filesync_core::domain::RetentionPolicy;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::pattern::PatternSet;
use crate::{SyncError, HISTORY_DIR, TEMP_SUFFIX};

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// A file found in the replica tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaFile {
    /// Absolute path
    pub path: PathBuf,
    /// Last modification time
    pub modified: SystemTime,
}

/// Outcome of one cleanup run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionReport {
    /// Files considered for deletion
    pub examined: usize,
    /// Files deleted
    pub deleted: usize,
    /// Files that could not be deleted
    pub failed: usize,
}

/// Applies retention policies to replica trees
#[derive(Debug, Clone, Default)]
pub struct RetentionManager;

impl RetentionManager {
    pub fn new() -> Self {
        Self
    }

    /// Deletes the replica files that fall outside `policy`
    ///
    /// A failure to delete one file is logged and counted; the remaining
    /// files are still processed.
    ///
    /// # Errors
    /// Only enumeration of the replica root itself can fail.
    #[instrument(skip(self, patterns), fields(root = %replica_root.display(), %policy))]
    pub async fn cleanup(
        &self,
        replica_root: &Path,
        patterns: &PatternSet,
        policy: RetentionPolicy,
    ) -> Result<RetentionReport, SyncError> {
        if !policy.is_enabled() {
            debug!("Retention disabled");
            return Ok(RetentionReport::default());
        }

        let root = replica_root.to_path_buf();
        let patterns = patterns.clone();
        let files = tokio::task::spawn_blocking(move || list_replica_files(&root, &patterns))
            .await
            .map_err(|e| SyncError::IoError(std::io::Error::new(ErrorKind::Other, e)))??;

        let doomed = plan(&files, policy, SystemTime::now());
        let mut report = RetentionReport {
            examined: files.len(),
            ..RetentionReport::default()
        };

        for path in doomed {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    debug!(path = %path.display(), "Deleted by retention");
                    report.deleted += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!(path = %path.display(), "Already gone");
                }
                Err(e) => {
                    let err = SyncError::Delete {
                        path: path.clone(),
                        source: e,
                    };
                    warn!(error = %err, "Retention could not delete file");
                    report.failed += 1;
                }
            }
        }

        if report.deleted > 0 || report.failed > 0 {
            info!(
                examined = report.examined,
                deleted = report.deleted,
                failed = report.failed,
                "Retention cleanup finished"
            );
        }
        Ok(report)
    }
}

/// Selects the files `policy` would delete at time `now`
pub fn plan(files: &[ReplicaFile], policy: RetentionPolicy, now: SystemTime) -> Vec<PathBuf> {
    match policy {
        RetentionPolicy::Disabled => Vec::new(),
        RetentionPolicy::Days(days) => {
            let age = Duration::from_secs(u64::from(days) * SECS_PER_DAY);
            let Some(cutoff) = now.checked_sub(age) else {
                return Vec::new();
            };
            files
                .iter()
                .filter(|f| f.modified < cutoff)
                .map(|f| f.path.clone())
                .collect()
        }
        RetentionPolicy::Count(keep) => {
            let mut ordered: Vec<&ReplicaFile> = files.iter().collect();
            ordered.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.path.cmp(&b.path)));
            ordered
                .into_iter()
                .skip(keep as usize)
                .map(|f| f.path.clone())
                .collect()
        }
    }
}

fn list_replica_files(root: &Path, patterns: &PatternSet) -> Result<Vec<ReplicaFile>, SyncError> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }
    let history = root.join(HISTORY_DIR);

    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.path() != history.as_path());

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(path = ?e.path(), error = %e, "Skipping unreadable replica entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name.ends_with(TEMP_SUFFIX) || !patterns.matches(&name) {
            continue;
        }
        let modified = entry
            .metadata()
            .map_err(std::io::Error::from)
            .and_then(|m| m.modified());
        match modified {
            Ok(modified) => files.push(ReplicaFile {
                path: entry.into_path(),
                modified,
            }),
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "Cannot stat replica file");
            }
        }
    }
    Ok(files)
}
