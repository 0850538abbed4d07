//! filesync Sync - One-directional mirroring engine
//!
//! Provides:
//! - Per-configuration run loops with cooperative cancellation
//! - A process-wide gate serializing scans of the same source path
//! - Settle-then-copy of matching files with atomic replacement
//! - Age- and count-based retention of replica files
//!
//! ## Modules
//!
//! - [`coordinator`] - FIFO mutual exclusion keyed by normalized source path
//! - [`pattern`] - Case-insensitive, comma-separated glob patterns
//! - [`scanner`] - Lazy enumeration of candidate files under a source root
//! - [`stability`] - Detects files that are still being written
//! - [`copier`] - Atomic temp-file + rename copy preserving modification time
//! - [`retention`] - Deletes replica files that fall outside the retention policy
//! - [`history`] - Per-replica record of copied files
//! - [`manager`] - The run loop of a single configuration
//! - [`registry`] - Lifecycle of every manager in the process
//! - [`broadcast`] - `IStatusSink` backed by a tokio broadcast channel

pub mod broadcast;
pub mod coordinator;
pub mod copier;
pub mod history;
pub mod manager;
pub mod pattern;
pub mod registry;
pub mod retention;
pub mod scanner;
pub mod stability;

use std::io;
use std::path::PathBuf;

use filesync_core::domain::{ConfigId, DomainError};
use thiserror::Error;

pub use broadcast::BroadcastStatusSink;
pub use coordinator::{SourceCopyCoordinator, SourceLease};
pub use copier::{CopyOutcome, Copier};
pub use manager::{FileSyncManager, ManagerSettings};
pub use registry::SyncRegistry;
pub use retention::{RetentionManager, RetentionReport};
pub use scanner::{CandidateFile, Scanner};
pub use stability::{Stability, StabilityGate};

/// Suffix of the in-flight files the copier writes before renaming
pub const TEMP_SUFFIX: &str = ".filesync-tmp";

/// Directory inside a replica root that holds engine bookkeeping
pub const HISTORY_DIR: &str = ".history";

/// Errors that can occur during synchronization operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// The source root is missing or is not a directory
    #[error("Source unavailable: {0}")]
    SourceUnavailable(PathBuf),

    /// The configured pattern could not be compiled
    #[error("Invalid pattern '{pattern}': {message}")]
    InvalidPattern {
        /// The offending pattern
        pattern: String,
        /// Compiler message
        message: String,
    },

    /// Reading the source or writing the replica failed for one file
    #[error("Copy failed for {path}: {source}")]
    CopyIo {
        /// Source file being copied
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Insufficient filesystem permissions
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// No available disk space to complete the operation
    #[error("Disk full while writing {0}")]
    DiskFull(PathBuf),

    /// A replica file could not be deleted
    #[error("Failed to delete {path}: {source}")]
    Delete {
        /// Replica file
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// A manager for the configuration is already running
    #[error("Sync configuration {0} is already running")]
    AlreadyRunning(ConfigId),

    /// Too many per-file failures within one pass
    #[error("{failures} file operation(s) failed in this pass (threshold {threshold})")]
    TooManyFailures {
        /// Failures counted so far
        failures: u32,
        /// Configured threshold
        threshold: u32,
    },

    /// An I/O error outside of a single-file copy
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    /// A domain-level error propagated from filesync-core
    #[error("Domain error: {0}")]
    DomainError(#[from] DomainError),
}

impl SyncError {
    /// Classifies a failed copy by its I/O error kind
    pub fn from_copy(path: PathBuf, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::PermissionDenied => SyncError::PermissionDenied(path),
            _ if is_disk_full(&source) => SyncError::DiskFull(path),
            _ => SyncError::CopyIo { path, source },
        }
    }

    /// True for errors caused by the configuration rather than by one file
    ///
    /// These fail the whole pass; the loop retries on the next interval in
    /// case the path reappears.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::SourceUnavailable(_)
                | SyncError::InvalidPattern { .. }
                | SyncError::DomainError(DomainError::ValidationFailed(_))
        )
    }

    /// True for per-file failures that a pass survives
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::CopyIo { .. }
                | SyncError::PermissionDenied(_)
                | SyncError::DiskFull(_)
                | SyncError::Delete { .. }
        )
    }
}

/// ENOSPC on unix; ERROR_HANDLE_DISK_FULL / ERROR_DISK_FULL on windows
fn is_disk_full(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(libc::ENOSPC)
    }
    #[cfg(not(unix))]
    {
        matches!(err.raw_os_error(), Some(39) | Some(112))
    }
}
