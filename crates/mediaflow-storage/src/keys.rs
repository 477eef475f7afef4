//! Deterministic key generation for originals and derivatives.

use uuid::Uuid;

pub const HLS_MASTER_PLAYLIST: &str = "master.m3u8";
pub const HLS_VARIANT_PLAYLIST: &str = "stream.m3u8";
pub const VIDEO_POSTER_FILE: &str = "thumb.jpg";

/// Key for an uploaded image original.
pub fn image_original_key(media_id: Uuid, extension: &str) -> String {
    format!("images/originals/{}.{}", media_id, extension)
}

/// Key for an uploaded video original.
pub fn video_original_key(media_id: Uuid, extension: &str) -> String {
    format!("videos/originals/{}.{}", media_id, extension)
}

pub fn thumbnail_key(media_id: Uuid) -> String {
    format!("images/thumbnails/{}.webp", media_id)
}

pub fn placeholder_key(media_id: Uuid) -> String {
    format!("images/placeholders/{}-placeholder.webp", media_id)
}

/// Directory holding the whole HLS bundle and the poster frame of a video.
pub fn hls_dir_key(media_id: Uuid) -> String {
    format!("videos/hls/{}", media_id)
}

pub fn hls_master_key(media_id: Uuid) -> String {
    format!("{}/{}", hls_dir_key(media_id), HLS_MASTER_PLAYLIST)
}

/// Directory of the `index`-th HLS variant (`v0`, `v1`, ...).
pub fn hls_variant_dir_key(media_id: Uuid, index: usize) -> String {
    format!("{}/v{}", hls_dir_key(media_id), index)
}

pub fn video_poster_key(media_id: Uuid) -> String {
    format!("{}/{}", hls_dir_key(media_id), VIDEO_POSTER_FILE)
}
