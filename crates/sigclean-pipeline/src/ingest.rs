//! Upload validation and image decoding.
//!
//! Validation runs before anything else touches the bytes: the upload
//! must be non-empty, at most [`MAX_UPLOAD_BYTES`], and recognizably a
//! JPEG, PNG, or HEIC image. Only then is it decoded into an RGBA
//! buffer.
//!
//! The file type is sniffed from magic bytes first. The declared MIME
//! type and the file extension are only consulted when the content is
//! not recognized, so a renamed `.txt` never sneaks through as a PNG.

use std::fmt;

use tracing::debug;

use crate::types::{PipelineError, RgbaImage};

/// Largest accepted upload, in bytes (10 MB).
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Image container types accepted for upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// JPEG / JFIF.
    Jpeg,
    /// PNG.
    Png,
    /// HEIC / HEIF (ISO-BMFF container).
    Heic,
}

impl ImageKind {
    /// Canonical MIME type.
    #[must_use]
    pub const fn mime_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Heic => "image/heic",
        }
    }

    /// Sniff the container type from leading magic bytes.
    #[must_use]
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";
        const HEIF_BRANDS: &[&[u8; 4]] = &[b"heic", b"heix", b"hevc", b"hevx", b"mif1", b"msf1"];

        if bytes.starts_with(PNG_SIGNATURE) {
            return Some(Self::Png);
        }
        if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Some(Self::Jpeg);
        }
        // ISO-BMFF: 4-byte box size, then "ftyp", then the major brand.
        if bytes.len() >= 12 && is_iso_bmff(bytes) {
            let brand = &bytes[8..12];
            if HEIF_BRANDS.iter().any(|b| b.as_slice() == brand) {
                return Some(Self::Heic);
            }
        }
        None
    }

    /// Interpret a declared MIME type.
    #[must_use]
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime.trim().to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(Self::Jpeg),
            "image/png" => Some(Self::Png),
            "image/heic" | "image/heif" | "image/heic-sequence" | "image/heif-sequence" => {
                Some(Self::Heic)
            }
            _ => None,
        }
    }

    /// Interpret a file name's extension.
    #[must_use]
    pub fn from_file_name(name: &str) -> Option<Self> {
        let (_, ext) = name.rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" | "jfif" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "heic" | "heif" => Some(Self::Heic),
            _ => None,
        }
    }
}

/// Whether `bytes` open with an ISO-BMFF `ftyp` box.
fn is_iso_bmff(bytes: &[u8]) -> bool {
    bytes.get(4..8) == Some(b"ftyp".as_slice())
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Jpeg => f.write_str("JPEG"),
            Self::Png => f.write_str("PNG"),
            Self::Heic => f.write_str("HEIC"),
        }
    }
}

/// A raw upload as handed over by the file-upload UI.
#[derive(Debug, Clone, Copy)]
pub struct Upload<'a> {
    /// File contents.
    pub bytes: &'a [u8],
    /// Original file name, used for the extension fallback.
    pub file_name: &'a str,
    /// Declared MIME type, if the host supplied one.
    pub mime_type: Option<&'a str>,
}

impl<'a> Upload<'a> {
    /// An upload with no declared MIME type.
    #[must_use]
    pub const fn new(bytes: &'a [u8], file_name: &'a str) -> Self {
        Self {
            bytes,
            file_name,
            mime_type: None,
        }
    }
}

/// Check an upload's size and type.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] for an empty upload,
/// [`PipelineError::TooLarge`] above [`MAX_UPLOAD_BYTES`], and
/// [`PipelineError::UnsupportedType`] when the content is not a JPEG or
/// PNG and is not an ISO-BMFF container declared as HEIC by MIME type
/// or extension.
pub fn validate_upload(upload: &Upload<'_>) -> Result<ImageKind, PipelineError> {
    let size = upload.bytes.len();
    if size == 0 {
        return Err(PipelineError::EmptyInput);
    }
    if size > MAX_UPLOAD_BYTES {
        return Err(PipelineError::TooLarge {
            size,
            limit: MAX_UPLOAD_BYTES,
        });
    }

    if let Some(kind) = ImageKind::sniff(upload.bytes) {
        debug!(%kind, size, "upload sniffed");
        return Ok(kind);
    }

    // Content is unrecognized. Only HEIC gets the benefit of the doubt
    // (brand lists drift), and only for an ISO-BMFF container; JPEG and
    // PNG have fixed signatures.
    let declared = upload
        .mime_type
        .and_then(ImageKind::from_mime)
        .or_else(|| ImageKind::from_file_name(upload.file_name));
    match declared {
        Some(ImageKind::Heic) if is_iso_bmff(upload.bytes) => Ok(ImageKind::Heic),
        _ => Err(PipelineError::UnsupportedType(
            upload
                .mime_type
                .map_or_else(|| upload.file_name.to_owned(), str::to_owned),
        )),
    }
}

/// Decode raw image bytes into an RGBA buffer.
///
/// Uses whatever decoders the `image` crate was built with (PNG and
/// JPEG here). HEIC uploads pass validation but fail at this point.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] if `bytes` is empty.
/// Returns [`PipelineError::ImageDecode`] if the format is unrecognized
/// or the data is corrupt.
#[must_use = "returns the decoded RGBA image"]
pub fn decode(bytes: &[u8]) -> Result<RgbaImage, PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::EmptyInput);
    }

    let img = image::load_from_memory(bytes)?;
    Ok(img.to_rgba8())
}
