//! Replica writer
//!
//! Copies one settled source file into the replica tree.
//!
//! ## Design Decisions
//!
//! - **Skip when synced**: an existing replica with the same size and
//!   modification time is left alone.
//! - **Atomic writes**: data goes to `<name>.filesync-tmp` in the target
//!   directory and is renamed into place, so readers of the replica never
//!   see a half-written file.
//! - **Preserved mtime**: the temp file gets the source's modification time
//!   before the rename; the next pass uses it for the skip check.

use std::fs::{self, File};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use crate::scanner::CandidateFile;
use crate::{SyncError, TEMP_SUFFIX};

/// What [`Copier::copy`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    /// The file was written to the replica
    Copied {
        /// Bytes written
        bytes: u64,
        /// Whether an older replica file was replaced
        replaced: bool,
    },
    /// The replica already had the same size and modification time
    AlreadySynced,
}

/// Copies candidates into a replica tree
#[derive(Debug, Clone, Default)]
pub struct Copier;

impl Copier {
    /// Create a new `Copier`.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Mirrors `candidate` into `replica_root`
    ///
    /// The replica keeps the candidate's path relative to the source root.
    ///
    /// # Errors
    /// Returns [`SyncError::CopyIo`], [`SyncError::PermissionDenied`] or
    /// [`SyncError::DiskFull`] if reading the source or writing the replica
    /// fails. Any partially written temp file is removed.
    #[instrument(skip(self, candidate, replica_root), fields(file = %candidate.display_path()))]
    pub async fn copy(
        &self,
        candidate: &CandidateFile,
        replica_root: &Path,
    ) -> Result<CopyOutcome, SyncError> {
        let target = candidate.replica_path(replica_root);

        let replaced = match tokio::fs::metadata(&target).await {
            Ok(existing) if existing.is_file() => {
                let same_time = existing
                    .modified()
                    .map(|t| t == candidate.modified)
                    .unwrap_or(false);
                if existing.len() == candidate.size && same_time {
                    debug!("replica already up to date");
                    return Ok(CopyOutcome::AlreadySynced);
                }
                if existing.len() != candidate.size {
                    warn!(
                        replica_size = %format_size(existing.len()),
                        source_size = %format_size(candidate.size),
                        "Replica differs in size, re-copying"
                    );
                }
                true
            }
            Ok(_) => false,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => return Err(SyncError::from_copy(target, e)),
        };

        info!(
            size = %format_size(candidate.size),
            target = %target.display(),
            "Copying file"
        );

        let source = candidate.source_path.clone();
        let destination = target.clone();
        let bytes = tokio::task::spawn_blocking(move || copy_atomic(&source, &destination))
            .await
            .map_err(|join| io::Error::new(ErrorKind::Other, join))
            .and_then(|result| result)
            .map_err(|e| SyncError::from_copy(candidate.source_path.clone(), e))?;

        debug!(bytes, "copy complete");
        Ok(CopyOutcome::Copied { bytes, replaced })
    }
}

/// Path of the in-flight file for `target`
pub fn temp_path(target: &Path) -> PathBuf {
    let mut p = target.as_os_str().to_owned();
    p.push(TEMP_SUFFIX);
    PathBuf::from(p)
}

fn copy_atomic(source: &Path, target: &Path) -> io::Result<u64> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = temp_path(target);
    let result = write_then_rename(source, &tmp_path, target);
    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

fn write_then_rename(source: &Path, tmp_path: &Path, target: &Path) -> io::Result<u64> {
    let mut src = File::open(source)?;
    let src_meta = src.metadata()?;
    let modified = src_meta.modified()?;

    let mut dst = File::create(tmp_path)?;
    let bytes = io::copy(&mut src, &mut dst)?;
    dst.sync_all()?;
    dst.set_modified(modified)?;
    drop(dst);

    // Permissions are best effort, a read-only replica is still a replica.
    if let Err(e) = fs::set_permissions(tmp_path, src_meta.permissions()) {
        debug!(error = %e, "could not copy permissions");
    }

    fs::rename(tmp_path, target)?;
    Ok(bytes)
}

/// Human readable byte count, e.g. `1.5 MB`
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    for unit in &UNITS[..UNITS.len() - 1] {
        if value < 1024.0 {
            return format!("{value:.1} {unit}");
        }
        value /= 1024.0;
    }
    format!("{value:.1} {}", UNITS[UNITS.len() - 1])
}
