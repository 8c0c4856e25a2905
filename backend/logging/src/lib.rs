//! Structured logging for aerodesk.
//!
//! Console output always; JSON console output and a rolling NDJSON file are optional.

pub mod logger;

pub use logger::{LogOptions, init_logger};
