//! Incremental pipeline: advance stage-by-stage, inspecting each
//! intermediate result before continuing.
//!
//! [`crate::process`] runs everything in one call. [`Pipeline`] lets
//! the caller drive execution one step at a time:
//!
//! ```rust
//! # use sigclean_pipeline::{Pipeline, ProcessingOptions, PipelineError};
//! # fn run(png: Vec<u8>) -> Result<(), PipelineError> {
//! let staged = Pipeline::new(png, ProcessingOptions::default())
//!     .decode()?
//!     .remove_background()
//!     .enhance_tone()
//!     .despeckle()
//!     .feather()
//!     .into_result();
//! # Ok(())
//! # }
//! ```
//!
//! Each stage method consumes `self` and returns the next state,
//! carrying every earlier buffer along. Skipping a stage or calling
//! them out of order is a compile error. Disabled optional stages
//! (`noise_reduction`, `edge_smoothing`) still exist as states but
//! produce `None` instead of a new buffer.

use tracing::info;

use crate::diagnostics::StageMetrics;
use crate::types::{Dimensions, PipelineError, ProcessingOptions, RgbaImage, StagedResult};

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// Pipeline state before any processing has occurred.
#[must_use = "pipeline stages are consumed by advancing; call .decode() to continue"]
pub struct Pending {
    options: ProcessingOptions,
    source: Vec<u8>,
}

impl Pending {
    /// Check the options, decode the source, and advance to [`Decoded`].
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] for out-of-range
    /// options, [`PipelineError::EmptyInput`] for empty bytes, and
    /// [`PipelineError::ImageDecode`] if the data cannot be decoded.
    pub fn decode(self) -> Result<Decoded, PipelineError> {
        self.options.validate()?;
        let source_len = self.source.len();
        let original = crate::ingest::decode(&self.source)?;
        info!(
            width = original.width(),
            height = original.height(),
            source_len,
            "image decoded"
        );
        Ok(Decoded {
            options: self.options,
            original,
            source_len,
        })
    }
}

// ───────────────────────── Stage 1: Decoded ──────────────────────────

/// Pipeline state after decoding the source image to RGBA.
#[must_use = "pipeline stages are consumed by advancing; call .remove_background() to continue"]
pub struct Decoded {
    options: ProcessingOptions,
    original: RgbaImage,
    source_len: usize,
}

impl Decoded {
    /// The decoded RGBA image.
    #[must_use]
    pub const fn original(&self) -> &RgbaImage {
        &self.original
    }

    /// Advance to the background removal stage.
    pub fn remove_background(self) -> BackgroundRemoved {
        let background_removed = crate::background::remove_background(
            &self.original,
            self.options.threshold,
            self.options.aggressive_mode,
        );
        BackgroundRemoved {
            options: self.options,
            original: self.original,
            background_removed,
        }
    }
}

// ───────────────────────── Stage 2: BackgroundRemoved ────────────────

/// Pipeline state after luminance thresholding.
///
/// The alpha channel now carries the ink mask.
#[must_use = "pipeline stages are consumed by advancing; call .enhance_tone() to continue"]
pub struct BackgroundRemoved {
    options: ProcessingOptions,
    original: RgbaImage,
    background_removed: RgbaImage,
}

impl BackgroundRemoved {
    /// The image with its background made transparent.
    #[must_use]
    pub const fn background_removed(&self) -> &RgbaImage {
        &self.background_removed
    }

    /// Advance to the tone enhancement stage.
    pub fn enhance_tone(self) -> ToneEnhanced {
        let enhanced = crate::tone::enhance_tone(
            &self.background_removed,
            self.options.contrast,
            self.options.darkness_factor,
        );
        ToneEnhanced {
            options: self.options,
            original: self.original,
            background_removed: self.background_removed,
            enhanced,
        }
    }
}

// ───────────────────────── Stage 3: ToneEnhanced ─────────────────────

/// Pipeline state after contrast and darkening.
#[must_use = "pipeline stages are consumed by advancing; call .despeckle() to continue"]
pub struct ToneEnhanced {
    options: ProcessingOptions,
    original: RgbaImage,
    background_removed: RgbaImage,
    enhanced: RgbaImage,
}

impl ToneEnhanced {
    /// The tone-enhanced image.
    #[must_use]
    pub const fn enhanced(&self) -> &RgbaImage {
        &self.enhanced
    }

    /// Advance to the despeckle stage.
    ///
    /// When `noise_reduction` is off the stage is a pass-through and
    /// [`Despeckled::despeckled`] returns `None`.
    pub fn despeckle(self) -> Despeckled {
        let (despeckled, removed) = if self.options.noise_reduction {
            let (image, removed) = crate::despeckle::despeckle(&self.enhanced);
            (Some(image), Some(removed))
        } else {
            (None, None)
        };
        Despeckled {
            options: self.options,
            original: self.original,
            background_removed: self.background_removed,
            enhanced: self.enhanced,
            despeckled,
            removed,
        }
    }
}

// ───────────────────────── Stage 4: Despeckled ───────────────────────

/// Pipeline state after optional speck removal.
#[must_use = "pipeline stages are consumed by advancing; call .feather() to continue"]
pub struct Despeckled {
    options: ProcessingOptions,
    original: RgbaImage,
    background_removed: RgbaImage,
    enhanced: RgbaImage,
    despeckled: Option<RgbaImage>,
    removed: Option<crate::despeckle::DespeckleReport>,
}

impl Despeckled {
    /// The despeckled image, or `None` if noise reduction was disabled.
    #[must_use]
    pub const fn despeckled(&self) -> Option<&RgbaImage> {
        self.despeckled.as_ref()
    }

    /// Advance to the feathering stage, the last pipeline step.
    pub fn feather(self) -> Feathered {
        let feathered = self.options.edge_smoothing.then(|| {
            let input = self.despeckled.as_ref().unwrap_or(&self.enhanced);
            crate::feather::feather_alpha(input, crate::feather::FEATHER_RADIUS)
        });
        let dimensions = Dimensions::of(&self.original);
        Feathered {
            options: self.options,
            original: self.original,
            background_removed: self.background_removed,
            enhanced: self.enhanced,
            despeckled: self.despeckled,
            feathered,
            dimensions,
        }
    }
}

// ───────────────────────── Stage 5: Feathered ────────────────────────

/// Final pipeline state.
#[must_use = "call .into_result() to extract the processed images"]
pub struct Feathered {
    options: ProcessingOptions,
    original: RgbaImage,
    background_removed: RgbaImage,
    enhanced: RgbaImage,
    despeckled: Option<RgbaImage>,
    feathered: Option<RgbaImage>,
    dimensions: Dimensions,
}

impl Feathered {
    /// The feathered image, or `None` if edge smoothing was disabled.
    #[must_use]
    pub const fn feathered(&self) -> Option<&RgbaImage> {
        self.feathered.as_ref()
    }

    /// The options this run used.
    #[must_use]
    pub const fn options(&self) -> &ProcessingOptions {
        &self.options
    }

    /// Source image dimensions.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Consume the pipeline and return every intermediate.
    #[must_use]
    pub fn into_result(self) -> StagedResult {
        StagedResult {
            original: self.original,
            background_removed: self.background_removed,
            enhanced: self.enhanced,
            despeckled: self.despeckled,
            feathered: self.feathered,
            dimensions: self.dimensions,
        }
    }
}

// ──────────────────── PipelineStage trait + Stage enum ────────────────

/// Total number of stages in the pipeline.
pub const STAGE_COUNT: usize = 6;

/// The output produced by a single pipeline stage.
#[must_use]
pub enum StageOutput<'a> {
    /// Source image bytes (not yet decoded).
    Source {
        /// The raw image bytes.
        bytes: &'a [u8],
    },
    /// Decoded RGBA image.
    Decoded {
        /// The original image.
        original: &'a RgbaImage,
    },
    /// Background removal result.
    BackgroundRemoved {
        /// Image with transparent background.
        image: &'a RgbaImage,
    },
    /// Tone enhancement result.
    ToneEnhanced {
        /// Contrast-stretched, darkened image.
        image: &'a RgbaImage,
    },
    /// Despeckle result.
    Despeckled {
        /// The cleaned image, or `None` if noise reduction was disabled.
        image: Option<&'a RgbaImage>,
    },
    /// Feathering result.
    Feathered {
        /// The feathered image, or `None` if edge smoothing was disabled.
        image: Option<&'a RgbaImage>,
        /// Image dimensions.
        dimensions: Dimensions,
    },
}

impl<'a> StageOutput<'a> {
    /// The image this stage produced, if it produced one.
    ///
    /// `None` for the undecoded source and for disabled optional stages.
    #[must_use]
    pub const fn image(&self) -> Option<&'a RgbaImage> {
        match *self {
            Self::Source { .. } => None,
            Self::Decoded { original } => Some(original),
            Self::BackgroundRemoved { image } | Self::ToneEnhanced { image } => Some(image),
            Self::Despeckled { image } | Self::Feathered { image, .. } => image,
        }
    }
}

/// Trait implemented by every pipeline stage, enabling uniform iteration.
///
/// ```rust
/// # use sigclean_pipeline::{Pipeline, ProcessingOptions, PipelineError};
/// # use sigclean_pipeline::pipeline::{Stage, PipelineStage, Advance};
/// # fn run(png: Vec<u8>) -> Result<(), PipelineError> {
/// let mut stage: Stage = Pipeline::new(png, ProcessingOptions::default()).into();
/// loop {
///     match stage.advance()? {
///         Advance::Next(next) => stage = next,
///         Advance::Complete(done) => { stage = done; break; }
///     }
/// }
/// let result = stage.complete()?;
/// # Ok(())
/// # }
/// ```
pub trait PipelineStage: Sized {
    /// Human-readable name of this stage (e.g. `"decode"`).
    const NAME: &str;

    /// Zero-based index (`0` for Pending through `5` for Feathered).
    const INDEX: usize;

    /// Progress percent reported once this stage has been reached.
    const PERCENT: u8;

    /// The output this stage produced.
    fn output(&self) -> StageOutput<'_>;

    /// Stage-specific metrics for diagnostics.
    ///
    /// `None` for [`Pending`] and for optional stages that were
    /// disabled.
    fn metrics(&self) -> Option<StageMetrics>;

    /// Advance to the next stage.
    ///
    /// Returns `Ok(Some(stage))` on success and `Ok(None)` if already
    /// at the final stage.
    ///
    /// # Errors
    ///
    /// Only the decode transition can fail; see [`Pending::decode`].
    fn next(self) -> Result<Option<Stage>, PipelineError>;

    /// Run all remaining stages and return the [`StagedResult`].
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if decoding has not happened yet and
    /// fails.
    fn complete(self) -> Result<StagedResult, PipelineError>;
}

impl PipelineStage for Pending {
    const NAME: &str = "source";
    const INDEX: usize = 0;
    const PERCENT: u8 = 0;

    fn output(&self) -> StageOutput<'_> {
        StageOutput::Source {
            bytes: &self.source,
        }
    }

    fn metrics(&self) -> Option<StageMetrics> {
        None
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(Some(Stage::Decoded(self.decode()?)))
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        self.decode()?.complete()
    }
}

impl PipelineStage for Decoded {
    const NAME: &str = "decode";
    const INDEX: usize = 1;
    const PERCENT: u8 = 10;

    fn output(&self) -> StageOutput<'_> {
        StageOutput::Decoded {
            original: &self.original,
        }
    }

    fn metrics(&self) -> Option<StageMetrics> {
        let dimensions = Dimensions::of(&self.original);
        Some(StageMetrics::Decode {
            input_bytes: self.source_len,
            width: dimensions.width,
            height: dimensions.height,
            pixel_count: dimensions.pixel_count(),
        })
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(Some(Stage::BackgroundRemoved(self.remove_background())))
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        self.remove_background().complete()
    }
}

impl PipelineStage for BackgroundRemoved {
    const NAME: &str = "background";
    const INDEX: usize = 2;
    const PERCENT: u8 = 35;

    fn output(&self) -> StageOutput<'_> {
        StageOutput::BackgroundRemoved {
            image: &self.background_removed,
        }
    }

    fn metrics(&self) -> Option<StageMetrics> {
        Some(StageMetrics::BackgroundRemoval {
            threshold: self.options.threshold,
            effective_threshold: crate::background::effective_threshold(
                self.options.threshold,
                self.options.aggressive_mode,
            ),
            aggressive: self.options.aggressive_mode,
            transparent_pixels: crate::background::count_transparent(&self.background_removed),
            total_pixels: Dimensions::of(&self.background_removed).pixel_count(),
        })
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(Some(Stage::ToneEnhanced(self.enhance_tone())))
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        self.enhance_tone().complete()
    }
}

impl PipelineStage for ToneEnhanced {
    const NAME: &str = "tone";
    const INDEX: usize = 3;
    const PERCENT: u8 = 60;

    fn output(&self) -> StageOutput<'_> {
        StageOutput::ToneEnhanced {
            image: &self.enhanced,
        }
    }

    fn metrics(&self) -> Option<StageMetrics> {
        Some(StageMetrics::Tone {
            contrast: self.options.contrast,
            darkness_factor: self.options.darkness_factor,
            foreground_pixels: crate::diagnostics::count_foreground(&self.enhanced),
        })
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(Some(Stage::Despeckled(self.despeckle())))
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        self.despeckle().complete()
    }
}

impl PipelineStage for Despeckled {
    const NAME: &str = "despeckle";
    const INDEX: usize = 4;
    const PERCENT: u8 = 75;

    fn output(&self) -> StageOutput<'_> {
        StageOutput::Despeckled {
            image: self.despeckled.as_ref(),
        }
    }

    fn metrics(&self) -> Option<StageMetrics> {
        self.removed.map(|report| StageMetrics::Despeckle {
            passes: crate::despeckle::DESPECKLE_PASSES,
            speck_pixels: report.specks,
            isolated_pixels: report.isolated,
            texture_pixels: report.texture,
        })
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(Some(Stage::Feathered(self.feather())))
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        self.feather().complete()
    }
}

impl PipelineStage for Feathered {
    const NAME: &str = "feather";
    const INDEX: usize = 5;
    const PERCENT: u8 = 90;

    fn output(&self) -> StageOutput<'_> {
        StageOutput::Feathered {
            image: self.feathered.as_ref(),
            dimensions: self.dimensions,
        }
    }

    fn metrics(&self) -> Option<StageMetrics> {
        self.feathered.as_ref().map(|_| StageMetrics::Feather {
            radius: crate::feather::FEATHER_RADIUS,
        })
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(None)
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        Ok(self.into_result())
    }
}

/// Enum wrapping all pipeline stages for uniform, loopable access.
#[must_use]
pub enum Stage {
    /// See [`Pending`].
    Pending(Pending),
    /// See [`Decoded`].
    Decoded(Decoded),
    /// See [`BackgroundRemoved`].
    BackgroundRemoved(BackgroundRemoved),
    /// See [`ToneEnhanced`].
    ToneEnhanced(ToneEnhanced),
    /// See [`Despeckled`].
    Despeckled(Despeckled),
    /// See [`Feathered`].
    Feathered(Feathered),
}

/// Compile-time guard: if a [`Stage`] variant is added, this match becomes
/// non-exhaustive and the build fails, reminding you to bump [`STAGE_COUNT`].
#[allow(dead_code, clippy::match_same_arms)]
const fn _stage_count_guard(s: &Stage) {
    match s {
        Stage::Pending(_)
        | Stage::Decoded(_)
        | Stage::BackgroundRemoved(_)
        | Stage::ToneEnhanced(_)
        | Stage::Despeckled(_)
        | Stage::Feathered(_) => {}
    }
}

/// Result of [`Stage::advance`]: either the next stage or the
/// completed final stage returned unchanged.
#[must_use]
pub enum Advance {
    /// The pipeline advanced to this next stage.
    Next(Stage),
    /// The pipeline was already at the final stage.
    Complete(Stage),
}

/// Delegate a method call to whichever `Stage` variant is active.
macro_rules! delegate {
    ($self:ident, $method:ident $(, $arg:expr)*) => {
        match $self {
            Self::Pending(s) => s.$method($($arg),*),
            Self::Decoded(s) => s.$method($($arg),*),
            Self::BackgroundRemoved(s) => s.$method($($arg),*),
            Self::ToneEnhanced(s) => s.$method($($arg),*),
            Self::Despeckled(s) => s.$method($($arg),*),
            Self::Feathered(s) => s.$method($($arg),*),
        }
    };
}

impl Stage {
    /// Human-readable name of the current stage.
    #[must_use]
    pub fn name(&self) -> &'static str {
        delegate!(self, name)
    }

    /// Zero-based index of the current stage.
    #[must_use]
    pub fn index(&self) -> usize {
        delegate!(self, index)
    }

    /// Progress percent for having reached the current stage.
    #[must_use]
    pub fn percent(&self) -> u8 {
        delegate!(self, percent)
    }

    /// The output this stage produced.
    pub fn output(&self) -> StageOutput<'_> {
        delegate!(self, output)
    }

    /// Stage-specific metrics for diagnostics.
    #[must_use]
    pub fn metrics(&self) -> Option<StageMetrics> {
        delegate!(self, metrics)
    }

    /// Whether the pipeline is at the final stage.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Feathered(_))
    }

    /// Advance to the next stage.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if decoding fails.
    pub fn next(self) -> Result<Option<Self>, PipelineError> {
        delegate!(self, next)
    }

    /// Advance to the next stage, returning `self` unchanged if
    /// already complete.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if decoding fails.
    pub fn advance(self) -> Result<Advance, PipelineError> {
        if self.is_complete() {
            return Ok(Advance::Complete(self));
        }
        // Non-complete stages always return Ok(Some(_)) from next().
        #[allow(clippy::unreachable)]
        let next = self
            .next()?
            .unwrap_or_else(|| unreachable!("non-complete stage returned None from next()"));
        Ok(Advance::Next(next))
    }

    /// Run all remaining stages to completion.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if decoding has not happened yet and
    /// fails.
    pub fn complete(self) -> Result<StagedResult, PipelineError> {
        delegate!(self, complete)
    }
}

// The associated constants aren't reachable as `self.NAME`, so the
// macro goes through this helper.
trait StageMetadata {
    fn name(&self) -> &'static str;
    fn index(&self) -> usize;
    fn percent(&self) -> u8;
}

impl<T: PipelineStage> StageMetadata for T {
    fn name(&self) -> &'static str {
        T::NAME
    }

    fn index(&self) -> usize {
        T::INDEX
    }

    fn percent(&self) -> u8 {
        T::PERCENT
    }
}

impl From<Pending> for Stage {
    fn from(s: Pending) -> Self {
        Self::Pending(s)
    }
}

impl From<Decoded> for Stage {
    fn from(s: Decoded) -> Self {
        Self::Decoded(s)
    }
}

impl From<BackgroundRemoved> for Stage {
    fn from(s: BackgroundRemoved) -> Self {
        Self::BackgroundRemoved(s)
    }
}

impl From<ToneEnhanced> for Stage {
    fn from(s: ToneEnhanced) -> Self {
        Self::ToneEnhanced(s)
    }
}

impl From<Despeckled> for Stage {
    fn from(s: Despeckled) -> Self {
        Self::Despeckled(s)
    }
}

impl From<Feathered> for Stage {
    fn from(s: Feathered) -> Self {
        Self::Feathered(s)
    }
}

// ───────────────────── Pipeline entry point ──────────────────────────

/// Incremental signature processing pipeline.
///
/// Created via [`Pipeline::new`], which stores the source bytes and
/// options without doing any work.
pub struct Pipeline;

impl Pipeline {
    /// Create a new pipeline from source image bytes and options.
    #[allow(clippy::new_ret_no_self)]
    pub const fn new(image_bytes: Vec<u8>, options: ProcessingOptions) -> Pending {
        Pending {
            options,
            source: image_bytes,
        }
    }
}
