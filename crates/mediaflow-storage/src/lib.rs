//! Mediaflow Storage Library
//!
//! Storage abstraction and the local filesystem backend used by intake, the derivative
//! workers and the AI stage.
//!
//! # Storage key format
//!
//! Keys are relative to the storage root and are derived deterministically from the
//! media id (see [`keys`]), so a retried job overwrites its own earlier output:
//!
//! - `images/originals/{id}.{ext}`, `videos/originals/{id}.{ext}`
//! - `images/thumbnails/{id}.webp`, `images/placeholders/{id}-placeholder.webp`
//! - `videos/hls/{id}/` holding `master.m3u8`, `thumb.jpg` and `v0`..`v2`
//!
//! Keys must not contain `..` or a leading `/`.

pub mod keys;
pub mod local;
pub mod traits;

pub use local::LocalStorage;
pub use traits::{Storage, StorageError, StorageResult};
