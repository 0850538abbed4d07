//! Domain entities and business logic
//!
//! This module contains the core domain types for filesync:
//! - Newtypes for identifiers
//! - The `SyncConfig` value object and retention rules
//! - The run-loop state machine and status snapshots
//! - Domain-specific error types

pub mod errors;
pub mod newtypes;
pub mod status;
pub mod sync_config;

// Re-export commonly used types
pub use errors::DomainError;
pub use newtypes::ConfigId;
pub use status::{
    progress_percent, StatusEvent, SyncState, SyncStatus, SystemState, SystemStatus,
};
pub use sync_config::{
    RetentionMode, RetentionPolicy, SyncConfig, DEFAULT_INTERVAL_SECS, DEFAULT_PATTERN,
    DEFAULT_RETENTION_DAYS,
};
