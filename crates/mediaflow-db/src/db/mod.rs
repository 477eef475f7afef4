pub mod enrichment;
pub mod job;
pub mod media;
