//! filesync Core - Domain types for the mirroring engine
//!
//! This crate contains the pieces shared by the engine and its hosts:
//! - **Domain types** - `SyncConfig`, `RetentionPolicy`, `SyncState`, `SyncStatus`, `StatusEvent`
//! - **Port definitions** - `IStatusSink` for status-change notifications
//! - **Configuration** - The YAML file describing engine tuning, logging and sync jobs
//!
//! # Architecture
//!
//! The domain module has no I/O. Ports define the traits that hosts
//! implement. The engine itself lives in `filesync-sync`.

pub mod config;
pub mod domain;
pub mod ports;
