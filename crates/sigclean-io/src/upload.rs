//! Upload front door: reads a `File` picked by the user and validates it.
//!
//! Oversized files are rejected from their declared size before any
//! bytes are read.

use sigclean_pipeline::{ImageKind, MAX_UPLOAD_BYTES, PipelineError, Upload, validate_upload};
use wasm_bindgen::JsValue;

/// Errors from reading an upload.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// The file failed size or type validation.
    #[error(transparent)]
    Invalid(#[from] PipelineError),

    /// A browser API call returned an error.
    #[error("browser API error: {0}")]
    JsError(String),
}

impl From<JsValue> for UploadError {
    fn from(value: JsValue) -> Self {
        Self::JsError(format!("{value:?}"))
    }
}

/// A validated upload held in memory.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// File contents.
    pub bytes: Vec<u8>,
    /// Name as reported by the browser.
    pub file_name: String,
    /// Declared MIME type; `None` when the browser reported none.
    pub mime_type: Option<String>,
    /// Detected image type.
    pub kind: ImageKind,
}

impl UploadedFile {
    /// Borrow as a pipeline [`Upload`].
    #[must_use]
    pub fn as_upload(&self) -> Upload<'_> {
        Upload {
            bytes: &self.bytes,
            file_name: &self.file_name,
            mime_type: self.mime_type.as_deref(),
        }
    }
}

/// Reject a file whose declared size exceeds [`MAX_UPLOAD_BYTES`].
///
/// # Errors
///
/// Returns [`PipelineError::TooLarge`].
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn check_declared_size(size: f64) -> Result<(), PipelineError> {
    let size = size.max(0.0) as usize;
    if size > MAX_UPLOAD_BYTES {
        return Err(PipelineError::TooLarge {
            size,
            limit: MAX_UPLOAD_BYTES,
        });
    }
    Ok(())
}

/// Read and validate a user-selected file.
///
/// # Errors
///
/// Returns [`UploadError::Invalid`] for files that are empty, too
/// large, or not JPEG/PNG/HEIC, and [`UploadError::JsError`] if reading
/// fails.
#[allow(clippy::future_not_send)] // WASM is single-threaded
pub async fn read_upload(file: &web_sys::File) -> Result<UploadedFile, UploadError> {
    check_declared_size(file.size())?;

    let buffer = wasm_bindgen_futures::JsFuture::from(file.array_buffer()).await?;
    let bytes = js_sys::Uint8Array::new(&buffer).to_vec();

    let file_name = file.name();
    let mime_type = Some(file.type_()).filter(|m| !m.is_empty());
    let kind = validate_upload(&Upload {
        bytes: &bytes,
        file_name: &file_name,
        mime_type: mime_type.as_deref(),
    })?;
    Ok(UploadedFile {
        bytes,
        file_name,
        mime_type,
        kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_size_limit() {
        assert!(check_declared_size(0.0).is_ok());
        #[allow(clippy::cast_precision_loss)]
        let limit = MAX_UPLOAD_BYTES as f64;
        assert!(check_declared_size(limit).is_ok());
        assert!(matches!(
            check_declared_size(15.0 * 1024.0 * 1024.0),
            Err(PipelineError::TooLarge { limit, .. }) if limit == MAX_UPLOAD_BYTES
        ));
    }

    #[test]
    fn as_upload_borrows_fields() {
        let file = UploadedFile {
            bytes: vec![1, 2, 3],
            file_name: "sig.jpg".into(),
            mime_type: Some("image/jpeg".into()),
            kind: ImageKind::Jpeg,
        };
        let upload = file.as_upload();
        assert_eq!(upload.bytes, [1, 2, 3]);
        assert_eq!(upload.file_name, "sig.jpg");
        assert_eq!(upload.mime_type, Some("image/jpeg"));
    }
}
