//! SyncConfig value object
//!
//! A `SyncConfig` is handed to the engine by the external configuration
//! store and stays immutable for the lifetime of one run. Editing a
//! configuration means stopping the manager and starting it again with
//! the new value.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::ConfigId;

/// Pattern used when a configuration leaves the pattern blank
pub const DEFAULT_PATTERN: &str = "*";

/// Default seconds between passes
pub const DEFAULT_INTERVAL_SECS: u64 = 10;

/// Default retention window in days
pub const DEFAULT_RETENTION_DAYS: u32 = 60;

// ============================================================================
// Retention
// ============================================================================

/// How `retention_value` is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionMode {
    /// Delete replica files older than `retention_value` days
    #[default]
    Days,
    /// Keep only the `retention_value` most recently modified replica files
    Count,
}

impl fmt::Display for RetentionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetentionMode::Days => write!(f, "days"),
            RetentionMode::Count => write!(f, "count"),
        }
    }
}

impl FromStr for RetentionMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "days" => Ok(RetentionMode::Days),
            "count" => Ok(RetentionMode::Count),
            other => Err(DomainError::InvalidRetentionMode(other.to_string())),
        }
    }
}

/// Resolved retention rule applied to a replica tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Retention is switched off; nothing is deleted
    Disabled,
    /// Delete files whose modification time is older than `now - days`
    Days(u32),
    /// Keep the newest `n` files, delete the rest
    Count(u32),
}

impl RetentionPolicy {
    /// Returns true if this policy can delete anything
    pub fn is_enabled(&self) -> bool {
        !matches!(self, RetentionPolicy::Disabled)
    }
}

impl fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetentionPolicy::Disabled => write!(f, "disabled"),
            RetentionPolicy::Days(days) => write!(f, "{days} day(s)"),
            RetentionPolicy::Count(count) => write!(f, "newest {count} file(s)"),
        }
    }
}

// ============================================================================
// SyncConfig
// ============================================================================

/// One source → replica mirroring job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Identifier assigned by the configuration store
    pub id: ConfigId,
    /// Human readable name, used in logs
    pub name: String,
    /// Directory tree to mirror from
    pub source_path: PathBuf,
    /// Directory tree to mirror into
    pub replica_path: PathBuf,
    /// Glob pattern(s) matched against file names; comma separated
    #[serde(default = "default_pattern")]
    pub pattern: String,
    /// Seconds to sleep between passes
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    /// Interpretation of `retention_value`
    #[serde(default)]
    pub retention_mode: RetentionMode,
    /// Days or file count, depending on `retention_mode`; 0 disables retention
    #[serde(default = "default_retention_value")]
    pub retention_value: u32,
    /// Whether the orchestrator should run this configuration
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_pattern() -> String {
    DEFAULT_PATTERN.to_string()
}

fn default_interval() -> u64 {
    DEFAULT_INTERVAL_SECS
}

fn default_retention_value() -> u32 {
    DEFAULT_RETENTION_DAYS
}

fn default_active() -> bool {
    true
}

impl SyncConfig {
    /// Creates a configuration with default pattern, interval and retention
    pub fn new(
        id: ConfigId,
        name: impl Into<String>,
        source_path: impl Into<PathBuf>,
        replica_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            source_path: source_path.into(),
            replica_path: replica_path.into(),
            pattern: default_pattern(),
            interval_secs: DEFAULT_INTERVAL_SECS,
            retention_mode: RetentionMode::Days,
            retention_value: DEFAULT_RETENTION_DAYS,
            active: true,
        }
    }

    /// Sets the file name pattern
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }

    /// Sets the pass interval in seconds
    pub fn with_interval(mut self, interval_secs: u64) -> Self {
        self.interval_secs = interval_secs;
        self
    }

    /// Sets the retention mode and value
    pub fn with_retention(mut self, mode: RetentionMode, value: u32) -> Self {
        self.retention_mode = mode;
        self.retention_value = value;
        self
    }

    /// Resolves the retention fields into a [`RetentionPolicy`]
    pub fn retention_policy(&self) -> RetentionPolicy {
        match (self.retention_mode, self.retention_value) {
            (_, 0) => RetentionPolicy::Disabled,
            (RetentionMode::Days, days) => RetentionPolicy::Days(days),
            (RetentionMode::Count, count) => RetentionPolicy::Count(count),
        }
    }

    /// The pattern to use, falling back to [`DEFAULT_PATTERN`] when blank
    pub fn effective_pattern(&self) -> &str {
        let trimmed = self.pattern.trim();
        if trimmed.is_empty() {
            DEFAULT_PATTERN
        } else {
            trimmed
        }
    }

    /// Checks the invariants that do not depend on the filesystem
    ///
    /// A missing source directory is *not* reported here: it is a runtime
    /// configuration error surfaced by the run loop, which keeps retrying
    /// in case the path reappears.
    pub fn validate(&self) -> Result<(), DomainError> {
        let mut problems = Vec::new();

        if self.name.trim().is_empty() {
            problems.push("name must not be empty".to_string());
        }
        if self.source_path.as_os_str().is_empty() {
            problems.push("source_path must not be empty".to_string());
        }
        if self.replica_path.as_os_str().is_empty() {
            problems.push("replica_path must not be empty".to_string());
        }
        if self.interval_secs == 0 {
            problems.push("interval_secs must be greater than 0".to_string());
        }
        if !self.source_path.as_os_str().is_empty()
            && same_or_ancestor(&self.replica_path, &self.source_path)
        {
            problems.push("replica_path must not contain source_path".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(DomainError::ValidationFailed(format!(
                "config {}: {}",
                self.id,
                problems.join("; ")
            )))
        }
    }
}

/// True if `ancestor` equals `path` or is one of its parents (lexically)
fn same_or_ancestor(ancestor: &Path, path: &Path) -> bool {
    !ancestor.as_os_str().is_empty() && path.starts_with(ancestor)
}
