//! The state behind one signature editing session.
//!
//! A [`Session`] owns every buffer produced for the current upload:
//! the decoded original, the processed result, and the optional
//! perspective-corrected and cropped edits. Edits stack: the crop
//! applies to whatever is current, and a new perspective correction
//! discards any crop taken before it.

use tracing::{info, warn};

use crate::bounds::detect_bounds;
use crate::crop::{CropEditor, CropRect, apply_rotated_crop};
use crate::ingest::{Upload, validate_upload};
use crate::perspective::{PerspectiveQuad, QuadEditor, render};
use crate::progress::Progress;
use crate::types::{
    Dimensions, DisplayGeometry, PipelineError, ProcessingOptions, RgbaImage, Size, StagedResult,
};

/// Message stored when processing fails after validation passed.
pub const PROCESSING_FAILED_MESSAGE: &str = "Failed to process signature. Please try again.";

/// Images, progress, and the last error for one upload.
#[derive(Debug, Default)]
pub struct Session {
    original: Option<RgbaImage>,
    processed: Option<RgbaImage>,
    perspective_corrected: Option<RgbaImage>,
    cropped: Option<RgbaImage>,
    progress: u8,
    error: Option<String>,
}

impl Session {
    /// An empty session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and process a new upload, replacing all prior state.
    ///
    /// Validation failures are stored and returned without running the
    /// pipeline, so `on_progress` is never called for them. A failure
    /// during processing clears every image, resets progress to zero,
    /// and stores [`PROCESSING_FAILED_MESSAGE`].
    ///
    /// # Errors
    ///
    /// Returns the validation or processing error.
    pub fn load(
        &mut self,
        upload: &Upload<'_>,
        options: &ProcessingOptions,
        mut on_progress: impl FnMut(Progress),
    ) -> Result<(), PipelineError> {
        self.reset();

        if let Err(e) = validate_upload(upload) {
            warn!(file_name = upload.file_name, error = %e, "upload rejected");
            self.error = Some(e.to_string());
            return Err(e);
        }

        let progress = &mut self.progress;
        let result = crate::process_staged(upload.bytes, options, |p| {
            *progress = p.percent;
            on_progress(p);
        });

        match result {
            Ok(staged) => {
                let StagedResult {
                    original,
                    enhanced,
                    despeckled,
                    feathered,
                    ..
                } = staged;
                info!(
                    width = original.width(),
                    height = original.height(),
                    "signature processed"
                );
                self.original = Some(original);
                self.processed = Some(feathered.or(despeckled).unwrap_or(enhanced));
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "processing failed");
                self.reset();
                self.error = Some(PROCESSING_FAILED_MESSAGE.to_owned());
                Err(e)
            }
        }
    }

    /// The decoded upload.
    #[must_use]
    pub const fn original(&self) -> Option<&RgbaImage> {
        self.original.as_ref()
    }

    /// The pipeline output, before any manual edits.
    #[must_use]
    pub const fn processed(&self) -> Option<&RgbaImage> {
        self.processed.as_ref()
    }

    /// The perspective-corrected edit, if one was applied.
    #[must_use]
    pub const fn perspective_corrected(&self) -> Option<&RgbaImage> {
        self.perspective_corrected.as_ref()
    }

    /// The cropped edit, if one was applied.
    #[must_use]
    pub const fn cropped(&self) -> Option<&RgbaImage> {
        self.cropped.as_ref()
    }

    /// Most recent image: cropped, else perspective-corrected, else
    /// processed.
    #[must_use]
    pub fn current(&self) -> Option<&RgbaImage> {
        self.cropped
            .as_ref()
            .or(self.perspective_corrected.as_ref())
            .or(self.processed.as_ref())
    }

    /// Whether a crop or perspective correction has been applied.
    #[must_use]
    pub const fn is_edited(&self) -> bool {
        self.cropped.is_some() || self.perspective_corrected.is_some()
    }

    /// Last reported progress percent.
    #[must_use]
    pub const fn progress(&self) -> u8 {
        self.progress
    }

    /// User-visible message for the last failure.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// How the current image maps onto a preview of size `display`.
    #[must_use]
    pub fn geometry(&self, display: Size) -> Option<DisplayGeometry> {
        self.current().map(|image| DisplayGeometry {
            source: Dimensions::of(image),
            display,
        })
    }

    /// Initial crop rectangle: the detected ink bounds in display space.
    #[must_use]
    pub fn suggest_crop(&self, display: Size) -> Option<CropRect> {
        let image = self.current()?;
        let geometry = self.geometry(display)?;
        Some(detect_bounds(image).to_display(&geometry))
    }

    /// A crop editor seeded with [`suggest_crop`](Self::suggest_crop).
    #[must_use]
    pub fn crop_editor(&self, display: Size) -> Option<CropEditor> {
        self.suggest_crop(display)
            .map(|rect| CropEditor::new(rect, display))
    }

    /// A quad editor over the current image.
    #[must_use]
    pub fn quad_editor(&self, display: Size) -> Option<QuadEditor> {
        self.geometry(display).map(QuadEditor::new)
    }

    /// Bake `rect` (display coordinates) into a cropped buffer.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NoImage`] before a successful load and
    /// [`PipelineError::EmptyRegion`] for a zero-area crop.
    pub fn apply_crop(&mut self, rect: &CropRect, display: Size) -> Result<(), PipelineError> {
        self.apply_rotated_crop(rect, 0, display)
    }

    /// Rotate the current image by `degrees` clockwise, then crop `rect`.
    ///
    /// Takes the editor's [`CropEditor::rotation`].
    ///
    /// # Errors
    ///
    /// Same as [`apply_crop`](Self::apply_crop).
    pub fn apply_rotated_crop(
        &mut self,
        rect: &CropRect,
        degrees: i32,
        display: Size,
    ) -> Result<(), PipelineError> {
        let geometry = self.geometry(display).ok_or(PipelineError::NoImage)?;
        let image = self.current().ok_or(PipelineError::NoImage)?;
        let cropped = apply_rotated_crop(image, rect, &geometry, degrees)?;
        self.cropped = Some(cropped);
        Ok(())
    }

    /// Warp the current image onto `quad` and make it current.
    ///
    /// Any earlier crop is discarded.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NoImage`] before a successful load, or
    /// whatever [`render`] reports.
    pub fn apply_perspective(
        &mut self,
        quad: &PerspectiveQuad,
        grid: u32,
    ) -> Result<(), PipelineError> {
        let image = self.current().ok_or(PipelineError::NoImage)?;
        let corrected = render(image, quad, grid)?;
        self.perspective_corrected = Some(corrected);
        self.cropped = None;
        Ok(())
    }

    /// Forget everything.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::crop::{CropEvent, DragHandle};
    use crate::perspective::DEFAULT_GRID;
    use crate::types::Point;

    fn signature_png() -> Vec<u8> {
        let img = RgbaImage::from_fn(120, 80, |x, y| {
            if (30..90).contains(&x) && (35..45).contains(&y) {
                image::Rgba([20, 20, 30, 255])
            } else {
                image::Rgba([240, 240, 240, 255])
            }
        });
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

    fn loaded() -> Session {
        let png = signature_png();
        let mut session = Session::new();
        session
            .load(
                &Upload::new(&png, "signature.png"),
                &ProcessingOptions::default(),
                |_| {},
            )
            .unwrap();
        session
    }

    #[test]
    fn load_reports_every_stage_in_order() {
        let png = signature_png();
        let mut session = Session::new();
        let mut percents = Vec::new();
        session
            .load(
                &Upload::new(&png, "signature.png"),
                &ProcessingOptions::default(),
                |p| percents.push(p.percent),
            )
            .unwrap();
        assert_eq!(percents, [10, 35, 60, 75, 90, 100]);
        assert_eq!(session.progress(), 100);
        assert!(session.current().is_some());
        assert!(!session.is_edited());
        assert!(session.error().is_none());
    }

    #[test]
    fn text_upload_is_rejected_without_progress() {
        let mut session = Session::new();
        let mut events = 0;
        let result = session.load(
            &Upload {
                bytes: b"just some notes",
                file_name: "notes.txt",
                mime_type: Some("text/plain"),
            },
            &ProcessingOptions::default(),
            |_| events += 1,
        );
        assert!(matches!(result, Err(PipelineError::UnsupportedType(_))));
        assert_eq!(events, 0);
        assert!(session.current().is_none());
        assert!(session.error().is_some());
    }

    #[test]
    fn oversized_upload_is_rejected_without_progress() {
        let bytes = vec![0u8; 15 * 1024 * 1024];
        let mut session = Session::new();
        let mut events = 0;
        let result = session.load(
            &Upload::new(&bytes, "huge.png"),
            &ProcessingOptions::default(),
            |_| events += 1,
        );
        assert!(matches!(result, Err(PipelineError::TooLarge { .. })));
        assert_eq!(events, 0);
    }

    #[test]
    fn processing_failure_resets_state_with_generic_message() {
        let mut session = loaded();
        // Valid PNG signature, truncated body.
        let mut broken = signature_png();
        broken.truncate(40);
        let result = session.load(
            &Upload::new(&broken, "broken.png"),
            &ProcessingOptions::default(),
            |_| {},
        );
        assert!(result.is_err());
        assert!(!result.unwrap_err().is_validation());
        assert!(session.original().is_none());
        assert!(session.processed().is_none());
        assert_eq!(session.progress(), 0);
        assert_eq!(session.error(), Some(PROCESSING_FAILED_MESSAGE));
    }

    #[test]
    fn suggested_crop_surrounds_the_stroke() {
        let session = loaded();
        let rect = session.suggest_crop(Size::new(120.0, 80.0)).unwrap();
        assert!(rect.x <= 30.0 && rect.right() >= 90.0, "{rect:?}");
        assert!(rect.y <= 35.0 && rect.bottom() >= 45.0, "{rect:?}");
    }

    #[test]
    fn crop_then_perspective_discards_crop() {
        let mut session = loaded();
        let display = Size::new(60.0, 40.0);
        session
            .apply_crop(&CropRect::new(10.0, 10.0, 30.0, 20.0), display)
            .unwrap();
        assert_eq!(session.current().unwrap().dimensions(), (60, 40));
        assert!(session.is_edited());

        let quad = PerspectiveQuad::identity(Dimensions::of(session.current().unwrap()));
        session.apply_perspective(&quad, DEFAULT_GRID).unwrap();
        assert!(session.cropped().is_none());
        assert_eq!(session.current().unwrap().dimensions(), (60, 40));
    }

    #[test]
    fn crop_applies_on_top_of_perspective() {
        let mut session = loaded();
        let mut quad = PerspectiveQuad::identity(Dimensions {
            width: 120,
            height: 80,
        });
        quad.corners[2] = Point::new(100.0, 70.0);
        session.apply_perspective(&quad, DEFAULT_GRID).unwrap();
        let warped = session.current().unwrap().dimensions();
        assert_eq!(warped, (120, 80));

        let display = Size::new(120.0, 80.0);
        session
            .apply_crop(&CropRect::new(0.0, 0.0, 60.0, 50.0), display)
            .unwrap();
        assert_eq!(session.current().unwrap().dimensions(), (60, 50));
        assert!(session.perspective_corrected().is_some());
    }

    #[test]
    fn editor_rotation_is_applied_with_the_crop() {
        let mut session = loaded();
        let display = Size::new(120.0, 80.0);
        let editor = session.crop_editor(display).unwrap();
        let editor = editor
            .transition(CropEvent::DragStart(DragHandle::Rotate, Point::new(0.0, 0.0)))
            .transition(CropEvent::DragMove(Point::new(
                editor.rect.x + editor.rect.width / 2.0,
                editor.rect.bottom() + 40.0,
            )))
            .transition(CropEvent::DragEnd);
        assert_eq!(editor.rotation, 180);

        session
            .apply_rotated_crop(&editor.rect, editor.rotation, display)
            .unwrap();
        let plain = {
            let mut other = loaded();
            other.apply_crop(&editor.rect, display).unwrap();
            other.current().unwrap().clone()
        };
        let rotated = session.current().unwrap();
        assert_eq!(rotated.dimensions(), plain.dimensions());
        assert!(session.is_edited());
    }

    #[test]
    fn perspective_corners_beyond_the_image_are_clamped() {
        let mut session = loaded();
        let quad = PerspectiveQuad {
            corners: [
                Point::new(0.0, 0.0),
                Point::new(5000.0, 0.0),
                Point::new(5000.0, 5000.0),
                Point::new(0.0, 5000.0),
            ],
        };
        session.apply_perspective(&quad, DEFAULT_GRID).unwrap();
        assert_eq!(session.current().unwrap().dimensions(), (120, 80));
    }

    #[test]
    fn edits_before_load_are_rejected() {
        let mut session = Session::new();
        let rect = CropRect::new(0.0, 0.0, 50.0, 50.0);
        assert!(matches!(
            session.apply_crop(&rect, Size::new(100.0, 100.0)),
            Err(PipelineError::NoImage)
        ));
        let quad = PerspectiveQuad::identity(Dimensions {
            width: 10,
            height: 10,
        });
        assert!(matches!(
            session.apply_perspective(&quad, DEFAULT_GRID),
            Err(PipelineError::NoImage)
        ));
    }

    #[test]
    fn reset_empties_everything() {
        let mut session = loaded();
        session.reset();
        assert!(session.current().is_none());
        assert!(session.original().is_none());
        assert_eq!(session.progress(), 0);
    }
}
