//! Shared types for the sigclean signature processing pipeline.

use serde::{Deserialize, Serialize};

/// Re-export `GrayImage` so downstream crates can reference
/// single-channel alpha masks without depending on `image` directly.
pub use image::GrayImage;

/// Re-export `RgbaImage` so downstream crates can reference raster
/// buffers without depending on `image` directly.
///
/// Every buffer handed between stages is an `RgbaImage`: row-major,
/// four bytes per pixel, `width * height * 4` bytes long.
pub use image::RgbaImage;

/// A 2D point. Depending on context this is in source pixel space or
/// in display space (see [`DisplayGeometry`]).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position (from left edge).
    pub x: f64,
    /// Vertical position (from top edge).
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Component-wise difference `self - other`.
    #[must_use]
    pub fn delta_from(self, other: Self) -> (f64, f64) {
        (self.x - other.x, self.y - other.y)
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Dimensions of an existing raster.
    #[must_use]
    pub fn of(image: &RgbaImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
        }
    }

    /// Total pixel count.
    #[must_use]
    pub fn pixel_count(self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// A size in display units (the coordinate space of a rendered,
/// possibly scaled, preview).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    /// Width in display units.
    pub width: f64,
    /// Height in display units.
    pub height: f64,
}

impl Size {
    /// Create a new size.
    #[must_use]
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// How a source raster is laid out on screen.
///
/// The display container is exactly the rendered image, so the
/// container bounds are `[0, display.width] x [0, display.height]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplayGeometry {
    /// Source raster size in pixels.
    pub source: Dimensions,
    /// Rendered size in display units.
    pub display: Size,
}

impl DisplayGeometry {
    /// Geometry for an image displayed at its native size.
    #[must_use]
    pub fn native(source: Dimensions) -> Self {
        Self {
            source,
            display: Size::new(f64::from(source.width), f64::from(source.height)),
        }
    }

    /// Display units per source pixel, horizontally.
    ///
    /// Returns `1.0` for a zero-width source.
    #[must_use]
    pub fn scale_x(&self) -> f64 {
        if self.source.width == 0 {
            1.0
        } else {
            self.display.width / f64::from(self.source.width)
        }
    }

    /// Display units per source pixel, vertically.
    ///
    /// Returns `1.0` for a zero-height source.
    #[must_use]
    pub fn scale_y(&self) -> f64 {
        if self.source.height == 0 {
            1.0
        } else {
            self.display.height / f64::from(self.source.height)
        }
    }

    /// Map a display-space point into source pixel space (unclamped).
    #[must_use]
    pub fn to_source(&self, p: Point) -> Point {
        let (sx, sy) = (self.scale_x(), self.scale_y());
        Point::new(
            if sx > 0.0 { p.x / sx } else { 0.0 },
            if sy > 0.0 { p.y / sy } else { 0.0 },
        )
    }

    /// Map a source-space point into display space.
    #[must_use]
    pub fn to_display(&self, p: Point) -> Point {
        Point::new(p.x * self.scale_x(), p.y * self.scale_y())
    }
}

/// Parameters for one pipeline run.
///
/// Immutable for the duration of a run. Defaults match the production
/// settings used by the signature page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingOptions {
    /// Brightness cutoff (0–255). Pixels brighter than this become
    /// transparent background.
    pub threshold: u8,

    /// Scale applied to foreground channels after contrast (0.0–1.0).
    /// Lower values produce darker ink.
    pub darkness_factor: f32,

    /// Contrast multiplier around mid-gray. Must be positive.
    pub contrast: f32,

    /// Remove isolated foreground specks.
    pub noise_reduction: bool,

    /// Feather the alpha mask to anti-alias the stroke boundary.
    pub edge_smoothing: bool,

    /// Lower the effective threshold so more background is removed.
    pub aggressive_mode: bool,
}

impl ProcessingOptions {
    /// Default brightness threshold.
    pub const DEFAULT_THRESHOLD: u8 = 140;
    /// Default darkness factor.
    pub const DEFAULT_DARKNESS_FACTOR: f32 = 0.3;
    /// Default contrast multiplier.
    pub const DEFAULT_CONTRAST: f32 = 2.5;

    /// Check the numeric ranges.
    ///
    /// `threshold` is a `u8` so it is always in range.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if `darkness_factor` is
    /// outside `0.0..=1.0` or `contrast` is not a positive finite number.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(0.0..=1.0).contains(&self.darkness_factor) {
            return Err(PipelineError::InvalidConfig(format!(
                "darkness_factor must be within 0.0..=1.0, got {}",
                self.darkness_factor
            )));
        }
        if !self.contrast.is_finite() || self.contrast <= 0.0 {
            return Err(PipelineError::InvalidConfig(format!(
                "contrast must be a positive number, got {}",
                self.contrast
            )));
        }
        Ok(())
    }
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            threshold: Self::DEFAULT_THRESHOLD,
            darkness_factor: Self::DEFAULT_DARKNESS_FACTOR,
            contrast: Self::DEFAULT_CONTRAST,
            noise_reduction: true,
            edge_smoothing: true,
            aggressive_mode: true,
        }
    }
}

/// Result of running the pipeline with every intermediate buffer kept.
///
/// Optional stages that were disabled are `None`.
#[derive(Debug, Clone)]
pub struct StagedResult {
    /// Decoded upload, untouched.
    pub original: RgbaImage,
    /// After luminance thresholding (alpha carries the ink mask).
    pub background_removed: RgbaImage,
    /// After contrast and darkening.
    pub enhanced: RgbaImage,
    /// After despeckle (`Some` only when `noise_reduction` is enabled).
    pub despeckled: Option<RgbaImage>,
    /// After alpha feathering (`Some` only when `edge_smoothing` is enabled).
    pub feathered: Option<RgbaImage>,
    /// Source dimensions in pixels.
    pub dimensions: Dimensions,
}

impl StagedResult {
    /// The last buffer the pipeline produced.
    #[must_use]
    pub fn final_image(&self) -> &RgbaImage {
        self.feathered
            .as_ref()
            .or(self.despeckled.as_ref())
            .unwrap_or(&self.enhanced)
    }

    /// Consume the result, keeping only the final buffer.
    #[must_use]
    pub fn into_final_image(self) -> RgbaImage {
        self.feathered
            .or(self.despeckled)
            .unwrap_or(self.enhanced)
    }
}

/// Errors produced by validation and processing.
///
/// Validation errors ([`is_validation`](Self::is_validation)) are raised
/// before any processing starts. Everything else is a processing
/// failure.
///
/// Uses custom `Serialize`/`Deserialize` because `image::ImageError`
/// does not implement serde traits. The `ImageDecode` variant is
/// serialized as its `Display` string.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The upload was empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// The upload is not a JPEG, PNG, or HEIC image.
    #[error("unsupported file type: {0}")]
    UnsupportedType(String),

    /// The upload exceeds the size limit.
    #[error("file is too large: {size} bytes (limit {limit} bytes)")]
    TooLarge {
        /// Upload size in bytes.
        size: usize,
        /// Maximum accepted size in bytes.
        limit: usize,
    },

    /// Failed to decode the input image.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// A decode error carried across a serialization boundary.
    #[error("failed to decode image: {0}")]
    Decode(String),

    /// Options or a geometric argument are invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A crop or warp produced a zero-area region.
    #[error("region has zero area")]
    EmptyRegion,

    /// An edit or export was requested before any image was processed.
    #[error("no processed image")]
    NoImage,
}

impl PipelineError {
    /// Whether this error was raised by upload validation (before any
    /// processing started).
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::EmptyInput | Self::UnsupportedType(_) | Self::TooLarge { .. }
        )
    }
}

/// Serde-compatible proxy for `PipelineError`.
#[derive(Serialize, Deserialize)]
enum PipelineErrorProxy {
    EmptyInput,
    UnsupportedType(String),
    TooLarge { size: usize, limit: usize },
    Decode(String),
    InvalidConfig(String),
    EmptyRegion,
    NoImage,
}

impl Serialize for PipelineError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let proxy = match self {
            Self::EmptyInput => PipelineErrorProxy::EmptyInput,
            Self::UnsupportedType(s) => PipelineErrorProxy::UnsupportedType(s.clone()),
            Self::TooLarge { size, limit } => PipelineErrorProxy::TooLarge {
                size: *size,
                limit: *limit,
            },
            Self::ImageDecode(e) => PipelineErrorProxy::Decode(e.to_string()),
            Self::Decode(s) => PipelineErrorProxy::Decode(s.clone()),
            Self::InvalidConfig(s) => PipelineErrorProxy::InvalidConfig(s.clone()),
            Self::EmptyRegion => PipelineErrorProxy::EmptyRegion,
            Self::NoImage => PipelineErrorProxy::NoImage,
        };
        proxy.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PipelineError {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let proxy = PipelineErrorProxy::deserialize(deserializer)?;
        Ok(match proxy {
            PipelineErrorProxy::EmptyInput => Self::EmptyInput,
            PipelineErrorProxy::UnsupportedType(s) => Self::UnsupportedType(s),
            PipelineErrorProxy::TooLarge { size, limit } => Self::TooLarge { size, limit },
            PipelineErrorProxy::Decode(s) => Self::Decode(s),
            PipelineErrorProxy::InvalidConfig(s) => Self::InvalidConfig(s),
            PipelineErrorProxy::EmptyRegion => Self::EmptyRegion,
            PipelineErrorProxy::NoImage => Self::NoImage,
        })
    }
}
