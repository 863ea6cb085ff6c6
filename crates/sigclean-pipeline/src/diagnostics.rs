//! Pipeline diagnostics: timing and counts for each stage.
//!
//! Durations are measured through the [`Clock`] trait so callers pick
//! the time source. [`WebClock`] uses the `web-time` crate, which maps
//! to `performance.now()` on WASM and `std::time::Instant` natively.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pipeline::{Pipeline, PipelineStage};
use crate::types::{PipelineError, ProcessingOptions, RgbaImage, StagedResult};

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// A source of monotonic timestamps.
pub trait Clock {
    /// Opaque timestamp type.
    type Instant;

    /// The current time.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// [`Clock`] backed by `web_time::Instant`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebClock;

impl Clock for WebClock {
    type Instant = web_time::Instant;

    fn now(&self) -> web_time::Instant {
        web_time::Instant::now()
    }

    fn elapsed(&self, since: &web_time::Instant) -> Duration {
        since.elapsed()
    }
}

/// Diagnostics collected from a single pipeline run.
///
/// Optional stages that were disabled are `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// Image decoding.
    pub decode: StageDiagnostics,
    /// Luminance thresholding.
    pub background_removal: StageDiagnostics,
    /// Contrast and darkening.
    pub tone: StageDiagnostics,
    /// Speck removal (only when `noise_reduction` is on).
    pub despeckle: Option<StageDiagnostics>,
    /// Alpha feathering (only when `edge_smoothing` is on).
    pub feather: Option<StageDiagnostics>,
    /// Total wall-clock duration of the entire pipeline (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary counts.
    pub summary: PipelineSummary,
}

/// Diagnostics for a single pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Image decoding metrics.
    Decode {
        /// Size of the input image bytes.
        input_bytes: usize,
        /// Decoded width in pixels.
        width: u32,
        /// Decoded height in pixels.
        height: u32,
        /// `width * height`.
        pixel_count: u64,
    },
    /// Background removal metrics.
    BackgroundRemoval {
        /// Requested threshold.
        threshold: u8,
        /// Cutoff actually applied (lower in aggressive mode).
        effective_threshold: f32,
        /// Whether aggressive mode was on.
        aggressive: bool,
        /// Pixels made fully transparent.
        transparent_pixels: u64,
        /// Total pixel count.
        total_pixels: u64,
    },
    /// Tone enhancement metrics.
    Tone {
        /// Contrast multiplier.
        contrast: f32,
        /// Darkness factor.
        darkness_factor: f32,
        /// Pixels with non-zero alpha that were adjusted.
        foreground_pixels: u64,
    },
    /// Despeckle metrics.
    Despeckle {
        /// Neighbor passes run.
        passes: u32,
        /// Pixels removed by the neighbor passes.
        speck_pixels: u64,
        /// Pixels removed by the isolation check.
        isolated_pixels: u64,
        /// Light pixels removed as paper texture.
        texture_pixels: u64,
    },
    /// Feathering metrics.
    Feather {
        /// Box filter radius.
        radius: u32,
    },
}

/// High-level summary for the entire run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// Source image width in pixels.
    pub image_width: u32,
    /// Source image height in pixels.
    pub image_height: u32,
    /// Total pixel count.
    pub pixel_count: u64,
    /// Pixels with non-zero alpha in the final image.
    pub ink_pixels: u64,
}

impl PipelineDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Pipeline Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Image: {}x{} ({} pixels)",
            self.summary.image_width, self.summary.image_height, self.summary.pixel_count,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<24} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);

        let mut stages = vec![
            ("Decode", &self.decode),
            ("Background Removal", &self.background_removal),
            ("Tone", &self.tone),
        ];
        if let Some(ref d) = self.despeckle {
            stages.push(("Despeckle", d));
        }
        if let Some(ref f) = self.feather {
            stages.push(("Feather", f));
        }

        for (name, diag) in &stages {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<24} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.push(String::new());
        lines.push(format!("Ink pixels: {}", self.summary.ink_pixels));

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Decode {
            input_bytes,
            width,
            height,
            ..
        } => format!("{input_bytes} bytes -> {width}x{height}"),
        StageMetrics::BackgroundRemoval {
            threshold,
            effective_threshold,
            aggressive,
            transparent_pixels,
            total_pixels,
        } => {
            #[allow(clippy::cast_precision_loss)]
            let share = if *total_pixels > 0 {
                *transparent_pixels as f64 / *total_pixels as f64 * 100.0
            } else {
                0.0
            };
            let mode = if *aggressive { " aggressive" } else { "" };
            format!(
                "threshold={threshold} (cutoff {effective_threshold:.1}{mode}) \
                 transparent={transparent_pixels} ({share:.1}%)",
            )
        }
        StageMetrics::Tone {
            contrast,
            darkness_factor,
            foreground_pixels,
        } => format!("contrast={contrast:.2} darkness={darkness_factor:.2} fg={foreground_pixels}"),
        StageMetrics::Despeckle {
            passes,
            speck_pixels,
            isolated_pixels,
            texture_pixels,
        } => format!(
            "specks={speck_pixels} ({passes} passes) isolated={isolated_pixels} \
             texture={texture_pixels}"
        ),
        StageMetrics::Feather { radius } => format!("radius={radius}"),
    }
}

/// Count pixels with non-zero alpha.
pub(crate) fn count_foreground(image: &RgbaImage) -> u64 {
    image.pixels().map(|p| u64::from(u8::from(p.0[3] > 0))).sum()
}

/// Time one transition and capture the metrics of the state it produced.
fn timed<C: Clock, S: PipelineStage>(
    clock: &C,
    step: impl FnOnce() -> Result<S, PipelineError>,
) -> Result<(S, Duration, Option<StageMetrics>), PipelineError> {
    let start = clock.now();
    let stage = step()?;
    let duration = clock.elapsed(&start);
    let metrics = stage.metrics();
    Ok((stage, duration, metrics))
}

/// Pair a duration with metrics from a stage that always reports them.
fn required(duration: Duration, metrics: Option<StageMetrics>) -> StageDiagnostics {
    // Only Pending and disabled optional stages report no metrics.
    #[allow(clippy::unreachable)]
    let metrics = metrics.unwrap_or_else(|| unreachable!("mandatory stage reported no metrics"));
    StageDiagnostics { duration, metrics }
}

/// Run the full pipeline and collect per-stage diagnostics.
///
/// # Errors
///
/// Same as [`crate::process_staged`].
pub fn process_with_diagnostics<C: Clock>(
    image_bytes: &[u8],
    options: &ProcessingOptions,
    clock: &C,
) -> Result<(StagedResult, PipelineDiagnostics), PipelineError> {
    let total_start = clock.now();
    let pending = Pipeline::new(image_bytes.to_vec(), options.clone());

    let (decoded, d_decode, m_decode) = timed(clock, || pending.decode())?;
    let (removed, d_bg, m_bg) = timed(clock, || Ok(decoded.remove_background()))?;
    let (toned, d_tone, m_tone) = timed(clock, || Ok(removed.enhance_tone()))?;
    let (despeckled, d_speck, m_speck) = timed(clock, || Ok(toned.despeckle()))?;
    let (feathered, d_feather, m_feather) = timed(clock, || Ok(despeckled.feather()))?;

    let staged = feathered.into_result();
    let total_duration = clock.elapsed(&total_start);

    let diagnostics = PipelineDiagnostics {
        decode: required(d_decode, m_decode),
        background_removal: required(d_bg, m_bg),
        tone: required(d_tone, m_tone),
        despeckle: m_speck.map(|metrics| StageDiagnostics {
            duration: d_speck,
            metrics,
        }),
        feather: m_feather.map(|metrics| StageDiagnostics {
            duration: d_feather,
            metrics,
        }),
        total_duration,
        summary: PipelineSummary {
            image_width: staged.dimensions.width,
            image_height: staged.dimensions.height,
            pixel_count: staged.dimensions.pixel_count(),
            ink_pixels: count_foreground(staged.final_image()),
        },
    };

    Ok((staged, diagnostics))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::cell::Cell;

    use super::*;

    /// Clock that advances one millisecond per reading.
    struct TickClock(Cell<u64>);

    impl Clock for TickClock {
        type Instant = u64;

        fn now(&self) -> u64 {
            let t = self.0.get();
            self.0.set(t + 1);
            t
        }

        fn elapsed(&self, since: &u64) -> Duration {
            Duration::from_millis(self.now() - since)
        }
    }

    fn gray_png() -> Vec<u8> {
        let img = RgbaImage::from_fn(16, 16, |x, _| {
            if x < 8 {
                image::Rgba([20, 20, 20, 255])
            } else {
                image::Rgba([250, 250, 250, 255])
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

    #[test]
    fn duration_ms_converts_correctly() {
        let ms = duration_ms(Duration::from_millis(1234));
        assert!((ms - 1234.0).abs() < 0.01);
    }

    #[test]
    fn diagnostics_cover_every_enabled_stage() {
        let clock = TickClock(Cell::new(0));
        let (staged, diag) =
            process_with_diagnostics(&gray_png(), &ProcessingOptions::default(), &clock).unwrap();
        assert!(diag.despeckle.is_some());
        assert!(diag.feather.is_some());
        assert_eq!(diag.decode.duration, Duration::from_millis(1));
        assert_eq!(diag.summary.pixel_count, 256);
        assert_eq!(diag.summary.ink_pixels, count_foreground(staged.final_image()));
        assert!(matches!(
            diag.background_removal.metrics,
            StageMetrics::BackgroundRemoval {
                transparent_pixels,
                total_pixels: 256,
                ..
            } if transparent_pixels >= 128
        ));
    }

    #[test]
    fn disabled_stages_are_absent() {
        let options = ProcessingOptions {
            noise_reduction: false,
            edge_smoothing: false,
            ..ProcessingOptions::default()
        };
        let (_, diag) = process_with_diagnostics(&gray_png(), &options, &WebClock).unwrap();
        assert!(diag.despeckle.is_none());
        assert!(diag.feather.is_none());
        let report = diag.report();
        assert!(!report.contains("Despeckle"));
        assert!(report.contains("Background Removal"));
    }

    #[test]
    fn diagnostics_round_trip_through_json() {
        let (_, diag) =
            process_with_diagnostics(&gray_png(), &ProcessingOptions::default(), &WebClock)
                .unwrap();
        let json = serde_json::to_string(&diag).unwrap();
        let back: PipelineDiagnostics = serde_json::from_str(&json).unwrap();
        assert_eq!(back.tone.metrics, diag.tone.metrics);
    }

    #[test]
    fn decode_failure_propagates() {
        let result = process_with_diagnostics(&[1, 2, 3], &ProcessingOptions::default(), &WebClock);
        assert!(matches!(result, Err(PipelineError::ImageDecode(_))));
    }
}
