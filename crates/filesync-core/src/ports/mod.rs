//! Port definitions
//!
//! Ports are the interfaces the engine depends on but whose
//! implementations live elsewhere (the sync crate, the daemon, or an
//! embedding application).
//!
//! ## Ports Overview
//!
//! - [`IStatusSink`] - Delivery of status-change notifications

pub mod status_sink;

pub use status_sink::{IStatusSink, NullStatusSink};
