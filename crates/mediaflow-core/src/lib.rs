//! Mediaflow Core Library
//!
//! Domain models, error types and configuration shared by every mediaflow crate:
//! media items and their processing status, AI enrichment records, durable queue
//! jobs and the typed payloads carried on them.

pub mod config;
pub mod error;
pub mod models;
pub mod task_error;

pub use config::{Config, HlsRung};
pub use error::AppError;
pub use task_error::TaskError;
