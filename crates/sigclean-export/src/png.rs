//! PNG serializer for processed signatures.
//!
//! The output keeps the alpha channel untouched so the transparent
//! background survives the round trip.

use image::ImageEncoder;
use image::codecs::png::PngEncoder;
use sigclean_pipeline::{RgbaImage, Session};
use tracing::debug;

/// Prefix of every download name.
const FILENAME_PREFIX: &str = "signature";

/// Errors that can occur while exporting.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// The session has no processed image yet.
    #[error("nothing to export: no processed image")]
    NoImage,

    /// PNG encoding failed.
    #[error("PNG encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// An encoded PNG ready to hand to a download action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exported {
    /// PNG file bytes.
    pub bytes: Vec<u8>,
    /// Suggested file name.
    pub filename: String,
}

/// Encode an RGBA image as PNG, preserving alpha.
///
/// # Errors
///
/// Returns [`ExportError::Encode`] if the encoder rejects the buffer.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, ExportError> {
    let mut buf = Vec::new();
    PngEncoder::new(&mut buf).write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        image::ExtendedColorType::Rgba8,
    )?;
    Ok(buf)
}

/// Download name for an export taken at `timestamp_ms` (Unix epoch
/// milliseconds).
///
/// Unedited output is `signature-transparent-<ts>.png`; once a crop or
/// perspective correction has been applied it becomes
/// `signature-final-<ts>.png`.
#[must_use]
pub fn default_filename(timestamp_ms: u64, edited: bool) -> String {
    let kind = if edited { "final" } else { "transparent" };
    format!("{FILENAME_PREFIX}-{kind}-{timestamp_ms}.png")
}

/// Encode the session's current image and name it.
///
/// # Errors
///
/// Returns [`ExportError::NoImage`] before anything has been processed,
/// or [`ExportError::Encode`] if encoding fails.
pub fn export_session(session: &Session, timestamp_ms: u64) -> Result<Exported, ExportError> {
    let image = session.current().ok_or(ExportError::NoImage)?;
    let bytes = encode_png(image)?;
    let filename = default_filename(timestamp_ms, session.is_edited());
    debug!(
        %filename,
        width = image.width(),
        height = image.height(),
        bytes = bytes.len(),
        "exported signature"
    );
    Ok(Exported { bytes, filename })
}
