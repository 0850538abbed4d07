//! The filesync configuration file
//!
//! One YAML document holds engine tuning, logging and the list of sync
//! jobs. Every section has defaults, so an empty file is valid.
//! [`ConfigBuilder`] assembles the same structure in code (tests, embedding).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::SyncConfig;

/// Environment variable that overrides [`Config::default_path`].
pub const CONFIG_PATH_ENV: &str = "FILESYNC_CONFIG";

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for filesync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
    /// Sync jobs, as exported by the configuration store.
    pub syncs: Vec<SyncConfig>,
}

/// Tuning shared by every manager in the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of (size, mtime) observations a file must agree on before copying.
    pub stability_samples: u32,
    /// Milliseconds between two stability observations.
    pub stability_delay_ms: u64,
    /// Milliseconds between re-checks while waiting for a source lock.
    pub lock_poll_interval_ms: u64,
    /// Per-file failures tolerated within one pass; one more turns the pass into an error.
    pub max_transient_failures: u32,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Optional log file; logs go to stdout only when unset.
    pub file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Parses the YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Like [`Config::load`], but any read or parse failure yields the defaults.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Where the daemon looks for its configuration
    ///
    /// `$FILESYNC_CONFIG` when set, otherwise
    /// `$XDG_CONFIG_HOME/filesync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("filesync")
            .join("config.yaml")
    }

    /// The sync jobs flagged as active.
    pub fn active_syncs(&self) -> impl Iterator<Item = &SyncConfig> {
        self.syncs.iter().filter(|s| s.active)
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stability_samples: 2,
            stability_delay_ms: 1000,
            lock_poll_interval_ms: 1000,
            max_transient_failures: 5,
        }
    }
}

impl EngineConfig {
    /// Delay between stability observations.
    pub fn stability_delay(&self) -> Duration {
        Duration::from_millis(self.stability_delay_ms)
    }

    /// Poll granularity of the source-lock wait.
    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_interval_ms)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// One problem reported by [`Config::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"engine.stability_samples"`.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Collects every problem in the file rather than stopping at the first
    ///
    /// Each sync job is also checked with [`SyncConfig::validate`].
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- engine ---
        if self.engine.stability_samples < 1 {
            errors.push(ValidationError {
                field: "engine.stability_samples".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.engine.lock_poll_interval_ms == 0 {
            errors.push(ValidationError {
                field: "engine.lock_poll_interval_ms".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.engine.max_transient_failures == 0 {
            errors.push(ValidationError {
                field: "engine.max_transient_failures".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        // --- syncs ---
        let mut seen = HashSet::new();
        for (index, sync) in self.syncs.iter().enumerate() {
            if !seen.insert(sync.id) {
                errors.push(ValidationError {
                    field: format!("syncs[{index}].id"),
                    message: format!("duplicate id {}", sync.id),
                });
            }
            if let Err(e) = sync.validate() {
                errors.push(ValidationError {
                    field: format!("syncs[{index}]"),
                    message: e.to_string(),
                });
            }
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Assembles a [`Config`] in code, starting from the defaults
///
/// # Example
///
/// ```rust,no_run
/// use filesync_core::config::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .stability_delay_ms(250)
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- engine ---

    pub fn stability_samples(mut self, samples: u32) -> Self {
        self.config.engine.stability_samples = samples;
        self
    }

    pub fn stability_delay_ms(mut self, ms: u64) -> Self {
        self.config.engine.stability_delay_ms = ms;
        self
    }

    pub fn lock_poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.engine.lock_poll_interval_ms = ms;
        self
    }

    pub fn max_transient_failures(mut self, n: u32) -> Self {
        self.config.engine.max_transient_failures = n;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_file(mut self, file: PathBuf) -> Self {
        self.config.logging.file = Some(file);
        self
    }

    // --- syncs ---

    pub fn sync(mut self, sync: SyncConfig) -> Self {
        self.config.syncs.push(sync);
        self
    }

    // --- build ---

    pub fn build(self) -> Config {
        self.config
    }

    /// Builds, then runs [`Config::validate`]
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
