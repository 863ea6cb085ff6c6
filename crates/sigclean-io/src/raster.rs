//! Preview URLs for processed images.
//!
//! Encodes an `RgbaImage` to PNG and exposes it as a Blob URL usable as
//! an `<img src>`. PNG keeps the alpha channel, so the preview shows the
//! transparent background as-is.

use sigclean_export::{ExportError, encode_png};
use sigclean_pipeline::RgbaImage;
use wasm_bindgen::JsValue;
use web_sys::BlobPropertyBag;

/// Errors that can occur during raster-to-Blob-URL conversion.
#[derive(Debug, thiserror::Error)]
pub enum RasterError {
    /// PNG encoding failed.
    #[error("PNG encoding failed: {0}")]
    PngEncode(String),

    /// A browser API call returned an error.
    #[error("browser API error: {0}")]
    JsError(String),
}

impl From<JsValue> for RasterError {
    fn from(value: JsValue) -> Self {
        Self::JsError(format!("{value:?}"))
    }
}

impl From<ExportError> for RasterError {
    fn from(err: ExportError) -> Self {
        Self::PngEncode(err.to_string())
    }
}

/// Encode an `RgbaImage` as a PNG Blob URL.
///
/// The returned URL must be revoked via [`revoke_blob_url`] when no
/// longer needed to avoid memory leaks.
///
/// # Errors
///
/// Returns [`RasterError::PngEncode`] if PNG encoding fails.
/// Returns [`RasterError::JsError`] if Blob or URL creation fails.
pub fn rgba_image_to_blob_url(image: &RgbaImage) -> Result<String, RasterError> {
    let png_bytes = encode_png(image)?;

    let parts = js_sys::Array::new();
    parts.push(&js_sys::Uint8Array::from(png_bytes.as_slice()));

    let opts = BlobPropertyBag::new();
    opts.set_type("image/png");
    let blob = web_sys::Blob::new_with_u8_array_sequence_and_options(&parts, &opts)?;

    Ok(web_sys::Url::create_object_url_with_blob(&blob)?)
}

/// Revoke a Blob URL previously created by [`rgba_image_to_blob_url`].
///
/// Best-effort: failures are ignored since the URL may already be gone.
pub fn revoke_blob_url(url: &str) {
    let _ = web_sys::Url::revoke_object_url(url);
}
