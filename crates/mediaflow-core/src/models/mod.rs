pub mod enrichment;
pub mod job;
pub mod media;

pub use enrichment::{AiClaim, AiEnrichment, AiStatus, ClaimLimits, EmbeddingClaim};
pub use job::{
    compute_backoff, ImageJobPayload, JobPayload, JobStatus, MediaJob, RetryPolicy,
    VideoJobPayload, MAX_RETRY_BACKOFF,
};
pub use media::{
    DeclaredMime, DerivativePaths, ImageMimeType, MediaItem, MediaKind, NewMediaItem,
    ProcessingStatus, VideoMimeType,
};
