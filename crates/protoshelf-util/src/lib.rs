//! Shared utilities for protoshelf.
//!
//! This crate provides common utilities used across the protoshelf workspace:
//! - Monotonic timestamp identifiers for version records
//! - An injectable clock for TTL-driven caches
//! - Logging setup with tracing
//! - Path containment and normalisation helpers

pub mod clock;
pub mod id;
pub mod log;
pub mod path;

pub use clock::{system_clock, Clock, ManualClock, SharedClock, SystemClock};
pub use id::TimestampIds;
