// crates/observability/src/lib.rs
//! Logging for the reel server.
//!
//! - [`init_tracing`] installs the global `tracing` subscriber.
//! - [`LogHub`] is the log subsystem: it captures entries through
//!   [`LogCaptureLayer`] and hands them out in batches via
//!   [`LogHub::subscribe_to_log`].

pub mod hub;
mod init;
pub mod layer;

pub use hub::{LogEntry, LogHub, DEFAULT_FLUSH_INTERVAL, RECENT_CAPACITY};
pub use init::{init_tracing, LogConfig};
pub use layer::LogCaptureLayer;
