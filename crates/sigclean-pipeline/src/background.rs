//! Background removal by luminance thresholding.
//!
//! Paper is bright and ink is dark, so a single brightness cutoff
//! separates the two well enough for a signature photographed on white
//! paper. Pixels brighter than the cutoff become fully transparent.
//! Kept pixels get an alpha proportional to how far below the cutoff
//! they fall, which gives a softer initial edge than a hard binary cut.
//!
//! RGB values are never modified by this stage.

use tracing::debug;

use crate::types::RgbaImage;

/// Width of the soft band below the threshold, in brightness levels.
///
/// A pixel this many levels (or more) darker than the effective
/// threshold is fully opaque.
pub const SOFT_EDGE_BAND: f32 = 32.0;

/// Fraction of the threshold used when `aggressive` mode is on.
pub const AGGRESSIVE_SCALE: f32 = 0.85;

/// Perceived brightness of an RGB triple (ITU-R BT.601 weights).
#[must_use]
pub fn brightness(r: u8, g: u8, b: u8) -> f32 {
    0.114f32.mul_add(
        f32::from(b),
        0.299f32.mul_add(f32::from(r), 0.587 * f32::from(g)),
    )
}

/// The cutoff actually compared against pixel brightness.
#[must_use]
pub fn effective_threshold(threshold: u8, aggressive: bool) -> f32 {
    let t = f32::from(threshold);
    if aggressive { t * AGGRESSIVE_SCALE } else { t }
}

/// Alpha for a pixel of the given brightness.
///
/// `0` above the cutoff; otherwise ramps from `1` just below the cutoff
/// to `255` at [`SOFT_EDGE_BAND`] levels below it.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn alpha_for(brightness: f32, cutoff: f32) -> u8 {
    if brightness > cutoff {
        return 0;
    }
    let depth = (cutoff - brightness) / SOFT_EDGE_BAND;
    let alpha = (depth * 255.0).round().clamp(1.0, 255.0);
    alpha as u8
}

/// Replace the alpha channel with the ink/background decision.
///
/// Any incoming alpha is discarded: a pixel's visibility after this
/// stage depends only on its brightness.
#[must_use = "returns the image with its background removed"]
pub fn remove_background(image: &RgbaImage, threshold: u8, aggressive: bool) -> RgbaImage {
    let cutoff = effective_threshold(threshold, aggressive);
    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        let [r, g, b, _] = pixel.0;
        pixel.0[3] = alpha_for(brightness(r, g, b), cutoff);
    }
    debug!(
        threshold,
        aggressive,
        cutoff,
        transparent = count_transparent(&out),
        "background removed"
    );
    out
}

/// Number of fully transparent pixels.
#[must_use]
pub fn count_transparent(image: &RgbaImage) -> u64 {
    image.pixels().filter(|p| p.0[3] == 0).count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient() -> RgbaImage {
        RgbaImage::from_fn(64, 4, |x, y| {
            let v = u8::try_from((x * 4 + y) % 256).unwrap_or(0);
            image::Rgba([v, v, v, 255])
        })
    }

    #[test]
    fn all_white_becomes_fully_transparent() {
        let img = RgbaImage::from_pixel(100, 100, image::Rgba([255, 255, 255, 255]));
        let out = remove_background(&img, 200, false);
        assert!(out.pixels().all(|p| p.0[3] == 0));
    }

    #[test]
    fn black_ink_is_fully_opaque() {
        let img = RgbaImage::from_pixel(4, 4, image::Rgba([0, 0, 0, 255]));
        let out = remove_background(&img, 200, true);
        assert!(out.pixels().all(|p| p.0[3] == 255));
    }

    #[test]
    fn rgb_is_preserved() {
        let img = gradient();
        let out = remove_background(&img, 128, false);
        for (a, b) in img.pixels().zip(out.pixels()) {
            assert_eq!(a.0[..3], b.0[..3]);
        }
    }

    #[test]
    fn near_threshold_pixels_get_partial_alpha() {
        let cutoff = effective_threshold(200, false);
        let alpha = alpha_for(cutoff - SOFT_EDGE_BAND / 2.0, cutoff);
        assert!(alpha > 1 && alpha < 255, "expected partial alpha, got {alpha}");
        assert_eq!(alpha_for(cutoff, cutoff), 1);
        assert_eq!(alpha_for(cutoff + 0.5, cutoff), 0);
    }

    #[test]
    fn aggressive_mode_removes_more_background() {
        let img = gradient();
        let normal = count_transparent(&remove_background(&img, 150, false));
        let aggressive = count_transparent(&remove_background(&img, 150, true));
        assert!(aggressive > normal, "{aggressive} <= {normal}");
    }

    #[test]
    fn raising_threshold_never_adds_transparent_pixels() {
        let img = gradient();
        let mut previous = u64::MAX;
        for threshold in (0..=255u8).step_by(5) {
            let transparent = count_transparent(&remove_background(&img, threshold, false));
            assert!(
                transparent <= previous,
                "threshold {threshold}: {transparent} > {previous}"
            );
            previous = transparent;
        }
    }

    #[test]
    fn brightness_weights_green_highest() {
        assert!(brightness(0, 255, 0) > brightness(255, 0, 0));
        assert!(brightness(255, 0, 0) > brightness(0, 0, 255));
        assert!((brightness(255, 255, 255) - 255.0).abs() < 0.01);
    }
}
