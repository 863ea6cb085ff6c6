//! sigclean-pipeline: signature cleanup and correction (sans-IO).
//!
//! Turns a photographed handwritten signature into a transparent-
//! background raster:
//! decode -> background removal -> tone enhancement -> despeckle ->
//! edge feathering.
//!
//! On top of the processed image it provides automatic ink bounds
//! detection, an interactive crop editor, and a four-corner perspective
//! corrector, plus a [`Session`] that ties them together.
//!
//! This crate has **no I/O dependencies**: it operates on in-memory
//! byte slices and pixel buffers. Browser and filesystem interaction
//! lives in `sigclean-io`, `sigclean-worker`, and the `sigclean` CLI.

pub mod background;
pub mod bounds;
pub mod crop;
pub mod despeckle;
pub mod diagnostics;
pub mod feather;
pub mod ingest;
pub mod perspective;
pub mod pipeline;
pub mod progress;
pub mod session;
pub mod tone;
pub mod types;

pub use bounds::{BoundingBox, detect_bounds};
pub use crop::{
    CropEditor, CropEvent, CropRect, CropState, DragHandle, MIN_CROP_SIZE, apply_crop,
    apply_rotated_crop,
};
pub use ingest::{ImageKind, MAX_UPLOAD_BYTES, Upload, validate_upload};
pub use perspective::{DEFAULT_GRID, PerspectiveQuad, QuadEditor, QuadEvent};
pub use pipeline::{Pipeline, Stage};
pub use progress::{Progress, ProgressStep};
pub use session::Session;
pub use types::{
    Dimensions, DisplayGeometry, GrayImage, PipelineError, Point, ProcessingOptions, RgbaImage,
    Size, StagedResult,
};

use pipeline::Advance;
use progress::COMPLETE_PERCENT;

/// Run the full pipeline, keeping every intermediate buffer.
///
/// `on_progress` is called after each stage with a strictly increasing
/// percent (10, 35, 60, 75, 90) and a final 100 once the result is
/// assembled. Nothing is reported if decoding fails.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] for out-of-range options,
/// [`PipelineError::EmptyInput`] for empty bytes, and
/// [`PipelineError::ImageDecode`] if the image cannot be decoded.
pub fn process_staged(
    image_bytes: &[u8],
    options: &ProcessingOptions,
    mut on_progress: impl FnMut(Progress),
) -> Result<StagedResult, PipelineError> {
    let mut stage: Stage = Pipeline::new(image_bytes.to_vec(), options.clone()).into();
    loop {
        match stage.advance()? {
            Advance::Next(next) => {
                on_progress(Progress {
                    stage: next.name(),
                    percent: next.percent(),
                });
                stage = next;
            }
            Advance::Complete(done) => {
                let result = done.complete()?;
                on_progress(Progress {
                    stage: "complete",
                    percent: COMPLETE_PERCENT,
                });
                return Ok(result);
            }
        }
    }
}

/// Run the full pipeline and return only the final image.
///
/// # Errors
///
/// Same as [`process_staged`].
pub fn process(
    image_bytes: &[u8],
    options: &ProcessingOptions,
    on_progress: impl FnMut(Progress),
) -> Result<RgbaImage, PipelineError> {
    process_staged(image_bytes, options, on_progress).map(StagedResult::into_final_image)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn encode_png(img: &RgbaImage) -> Vec<u8> {
        let mut buf = Vec::new();
        let encoder = image::codecs::png::PngEncoder::new(&mut buf);
        image::ImageEncoder::write_image(
            encoder,
            img.as_raw(),
            img.width(),
            img.height(),
            image::ExtendedColorType::Rgba8,
        )
        .unwrap();
        buf
    }

    fn photo_png() -> Vec<u8> {
        encode_png(&RgbaImage::from_fn(48, 32, |x, y| {
            let on_stroke = (x + 2 * y) % 17 < 3 && (6..42).contains(&x);
            if on_stroke {
                image::Rgba([40, 35, 60, 255])
            } else {
                let shade = u8::try_from(200 + (x + y) % 40).unwrap();
                image::Rgba([shade, shade, shade - 5, 255])
            }
        }))
    }

    #[test]
    fn process_empty_input() {
        let result = process(&[], &ProcessingOptions::default(), |_| {});
        assert!(matches!(result, Err(PipelineError::EmptyInput)));
    }

    #[test]
    fn process_corrupt_input() {
        let result = process(&[0xFF, 0x00], &ProcessingOptions::default(), |_| {});
        assert!(matches!(result, Err(PipelineError::ImageDecode(_))));
    }

    #[test]
    fn all_white_image_becomes_fully_transparent() {
        let png = encode_png(&RgbaImage::from_pixel(100, 100, image::Rgba([255, 255, 255, 255])));
        let options = ProcessingOptions {
            threshold: 200,
            ..ProcessingOptions::default()
        };
        let out = process(&png, &options, |_| {}).unwrap();
        assert!(out.pixels().all(|p| p.0[3] == 0));
    }

    #[test]
    fn progress_is_strictly_increasing_and_ends_at_100() {
        let mut events = Vec::new();
        process(&photo_png(), &ProcessingOptions::default(), |p| events.push(p)).unwrap();
        let percents: Vec<u8> = events.iter().map(|p| p.percent).collect();
        assert_eq!(percents, [10, 35, 60, 75, 90, 100]);
        assert_eq!(events.last().unwrap().stage, "complete");
        assert_eq!(events[1].step(), ProgressStep::RemovingBackground);
    }

    #[test]
    fn no_progress_when_decode_fails() {
        let mut events = 0;
        let _ = process(b"not an image", &ProcessingOptions::default(), |_| events += 1);
        assert_eq!(events, 0);
    }

    #[test]
    fn processing_is_deterministic() {
        let png = photo_png();
        for options in [
            ProcessingOptions::default(),
            ProcessingOptions {
                aggressive_mode: false,
                edge_smoothing: false,
                threshold: 180,
                ..ProcessingOptions::default()
            },
        ] {
            let a = process(&png, &options, |_| {}).unwrap();
            let b = process(&png, &options, |_| {}).unwrap();
            assert_eq!(a.as_raw(), b.as_raw());
        }
    }

    #[test]
    fn transparent_pixels_keep_their_rgb() {
        let png = photo_png();
        let staged = process_staged(&png, &ProcessingOptions::default(), |_| {}).unwrap();
        for (src, out) in staged.original.pixels().zip(staged.enhanced.pixels()) {
            if out.0[3] == 0 {
                assert_eq!(src.0[..3], out.0[..3]);
            }
        }
    }

    #[test]
    fn square_on_paper_is_found_through_the_full_pipeline() {
        let png = encode_png(&RgbaImage::from_fn(100, 100, |x, y| {
            if (40..50).contains(&x) && (40..50).contains(&y) {
                image::Rgba([0, 0, 0, 255])
            } else {
                image::Rgba([240, 240, 240, 255])
            }
        }));
        let options = ProcessingOptions {
            threshold: 200,
            ..ProcessingOptions::default()
        };
        let out = process(&png, &options, |_| {}).unwrap();

        assert_eq!(out.get_pixel(5, 5).0[3], 0);
        assert_eq!(out.get_pixel(45, 45).0, [0, 0, 0, 255]);
        // The feathered rim is ink-colored, not paper-colored.
        let rim = out.get_pixel(39, 45).0;
        assert!(rim[3] > 0 && rim[3] < 255, "{rim:?}");
        assert_eq!(rim[..3], [0, 0, 0]);

        // The raw square pads to (35,35)-(55,55); feathering adds at most
        // one pixel of detectable rim on each side.
        let bounds = detect_bounds(&out);
        for (edge, unfeathered) in [
            (bounds.min_x, 35),
            (bounds.min_y, 35),
            (bounds.max_x, 55),
            (bounds.max_y, 55),
        ] {
            assert!(edge.abs_diff(unfeathered) <= 1, "{bounds:?}");
        }
        assert_eq!(
            bounds,
            BoundingBox {
                min_x: 34,
                min_y: 34,
                max_x: 56,
                max_y: 56
            }
        );
    }
}
