//! Tone enhancement for foreground (ink) pixels.
//!
//! Stretches contrast around mid-gray and then scales toward black, which
//! crisps faint strokes from light pen pressure or poor lighting.
//! Transparent background pixels are left exactly as they are.

use tracing::debug;

use crate::types::RgbaImage;

/// Apply contrast then darkening to one channel value.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn adjust_channel(value: u8, contrast: f32, darkness_factor: f32) -> u8 {
    let stretched = (f32::from(value) - 128.0)
        .mul_add(contrast, 128.0)
        .clamp(0.0, 255.0);
    let darkened = (stretched * darkness_factor).round().clamp(0.0, 255.0);
    darkened as u8
}

/// Enhance every pixel with non-zero alpha.
///
/// Alpha is not modified. A 256-entry lookup table is built once since
/// the per-channel mapping depends only on the input value.
#[must_use = "returns the tone-enhanced image"]
pub fn enhance_tone(image: &RgbaImage, contrast: f32, darkness_factor: f32) -> RgbaImage {
    let lut: [u8; 256] = std::array::from_fn(|v| {
        adjust_channel(u8::try_from(v).unwrap_or(u8::MAX), contrast, darkness_factor)
    });

    let mut out = image.clone();
    let mut touched = 0u64;
    for pixel in out.pixels_mut() {
        if pixel.0[3] == 0 {
            continue;
        }
        for c in 0..3 {
            pixel.0[c] = lut[usize::from(pixel.0[c])];
        }
        touched += 1;
    }
    debug!(contrast, darkness_factor, touched, "tone enhanced");
    out
}
