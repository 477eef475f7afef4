//! Mediaflow Processing Library
//!
//! Derivative generation for the worker pools: WebP thumbnails and placeholders for
//! images, and HLS bundles plus poster frames for videos via ffmpeg/ffprobe.

pub mod command;
pub mod image;
pub mod video;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use command::{CommandOutput, CommandRunner, SystemCommandRunner};
pub use crate::image::{ImageDerivativeOptions, ImageDerivatives};
pub use video::{VideoProbe, VideoRendition, VideoTranscoder};
