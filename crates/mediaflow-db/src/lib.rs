//! Mediaflow DB – persistence for media items, AI enrichment records and queue jobs.
//!
//! Orchestration code depends on the [`MediaStore`], [`EnrichmentStore`] and
//! [`JobStore`] traits; the PostgreSQL repositories in [`db`] implement them.
//! With the `test-helpers` feature, [`test_helpers::InMemoryStore`] implements all
//! three without a database.

pub mod db;
pub mod setup;
pub mod traits;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use db::enrichment::EnrichmentRepository;
pub use db::job::{JobRepository, JOB_NOTIFY_CHANNEL, STALE_JOB_ERROR};
pub use db::media::MediaRepository;
pub use setup::connect;
pub use traits::{AiClaimFilter, EnrichmentStore, JobStore, MediaStore, ReapedJobs};
