//! Mediaflow Infrastructure Library
//!
//! Process-level infrastructure shared by mediaflow binaries:
//! - Telemetry initialization (`tracing` subscriber)

pub mod telemetry;

pub use telemetry::{init_telemetry, LogFormat};
