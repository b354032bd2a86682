//! Preview thumbnail seam.
//!
//! Decoding images and audio cover art is out of scope; the core only asks
//! an extractor for preview bytes and bundles them next to the original.

use async_trait::async_trait;
use bytes::Bytes;

use crate::engine::SourceFile;
use crate::error::ContentError;

/// MIME type given to every bundled thumbnail.
pub const THUMBNAIL_MIME: &str = "image/jpeg";

#[async_trait]
pub trait ThumbnailExtractor: Send + Sync {
    /// Preview bytes for `file`, or `None` when it has no preview.
    async fn extract(&self, file: &SourceFile) -> Result<Option<Bytes>, ContentError>;
}

/// Extractor for builds without a media pipeline.
pub struct NoThumbnails;

#[async_trait]
impl ThumbnailExtractor for NoThumbnails {
    async fn extract(&self, _file: &SourceFile) -> Result<Option<Bytes>, ContentError> {
        Ok(None)
    }
}

/// Only images and audio get a preview.
pub fn wants_thumbnail(mime: &str) -> bool {
    mime.starts_with("image/") || mime.starts_with("audio/")
}
