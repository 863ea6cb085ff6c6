//! Edge feathering of the alpha mask.
//!
//! Thresholding leaves a hard, stair-stepped boundary around every
//! stroke. A small box blur on the alpha channel alone turns it into an
//! anti-aliased edge, so the signature blends cleanly when placed over
//! a document.
//!
//! Pixels that were already foreground keep their RGB. Pixels the blur
//! pulls in from the background take the alpha-weighted mean color of
//! the foreground around them, so a new edge is ink-colored rather than
//! whatever paper color thresholding left behind.
//!
//! Wraps [`imageproc::filter::box_filter`], which only accepts
//! single-channel images, by splitting alpha out and back in.

use tracing::debug;

use crate::despeckle::alpha_mask;
use crate::types::RgbaImage;

/// Default box filter radius in pixels (a 3x3 window).
pub const FEATHER_RADIUS: u32 = 1;

/// Blur the alpha channel with a box filter of the given radius.
///
/// A radius of zero returns the image unchanged.
#[must_use = "returns the feathered image"]
pub fn feather_alpha(image: &RgbaImage, radius: u32) -> RgbaImage {
    if radius == 0 || image.width() == 0 || image.height() == 0 {
        return image.clone();
    }

    let alpha = alpha_mask(image);
    let blurred = imageproc::filter::box_filter(&alpha, radius, radius);

    let mut out = image.clone();
    let mut recolored = 0u64;
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let alpha = blurred.get_pixel(x, y).0[0];
        if pixel.0[3] == 0
            && alpha > 0
            && let Some(rgb) = foreground_color(image, x, y, radius)
        {
            pixel.0[..3].copy_from_slice(&rgb);
            recolored += 1;
        }
        pixel.0[3] = alpha;
    }
    debug!(radius, recolored, "alpha feathered");
    out
}

/// Alpha-weighted mean RGB of the foreground in the window of half-width
/// `radius` around `(x, y)`, or `None` if the window has no foreground.
#[allow(clippy::cast_possible_truncation)]
fn foreground_color(image: &RgbaImage, x: u32, y: u32, radius: u32) -> Option<[u8; 3]> {
    let (w, h) = image.dimensions();
    let mut sums = [0u64; 3];
    let mut weight = 0u64;
    for ny in y.saturating_sub(radius)..=(y + radius).min(h - 1) {
        for nx in x.saturating_sub(radius)..=(x + radius).min(w - 1) {
            let [r, g, b, a] = image.get_pixel(nx, ny).0;
            let a = u64::from(a);
            sums[0] += u64::from(r) * a;
            sums[1] += u64::from(g) * a;
            sums[2] += u64::from(b) * a;
            weight += a;
        }
    }
    if weight == 0 {
        return None;
    }
    // Each mean is a weighted average of u8 values, so it fits.
    Some(sums.map(|s| ((s + weight / 2) / weight) as u8))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hard_edge() -> RgbaImage {
        RgbaImage::from_fn(10, 10, |x, _| {
            if x < 5 {
                image::Rgba([0, 0, 0, 255])
            } else {
                image::Rgba([255, 255, 255, 0])
            }
        })
    }

    #[test]
    fn zero_radius_is_identity() {
        let img = hard_edge();
        assert_eq!(feather_alpha(&img, 0), img);
    }

    #[test]
    fn boundary_becomes_partial() {
        let out = feather_alpha(&hard_edge(), FEATHER_RADIUS);
        let inside = out.get_pixel(4, 5).0[3];
        let outside = out.get_pixel(5, 5).0[3];
        assert!(inside < 255 && inside > 0, "inside alpha {inside}");
        assert!(outside > 0 && outside < 255, "outside alpha {outside}");
    }

    #[test]
    fn interior_and_far_background_are_stable() {
        let out = feather_alpha(&hard_edge(), FEATHER_RADIUS);
        assert_eq!(out.get_pixel(1, 5).0[3], 255);
        assert_eq!(out.get_pixel(8, 5).0[3], 0);
    }

    #[test]
    fn foreground_rgb_is_untouched() {
        let img = RgbaImage::from_fn(10, 10, |x, y| {
            if x < 5 {
                image::Rgba([u8::try_from(x * 10 + y).unwrap_or(0), 20, 30, 255])
            } else {
                image::Rgba([255, 255, 255, 0])
            }
        });
        let out = feather_alpha(&img, 2);
        for (a, b) in img.pixels().zip(out.pixels()) {
            if a.0[3] > 0 {
                assert_eq!(a.0[..3], b.0[..3]);
            }
        }
    }

    #[test]
    fn new_edge_pixels_take_ink_color() {
        // White paper RGB under the transparent side must not bleed into
        // the feathered edge.
        let out = feather_alpha(&hard_edge(), FEATHER_RADIUS);
        let edge = out.get_pixel(5, 5).0;
        assert!(edge[3] > 0);
        assert_eq!(edge[..3], [0, 0, 0]);
        // Pixels the blur does not reach keep their RGB.
        assert_eq!(out.get_pixel(8, 5).0, [255, 255, 255, 0]);
    }

    #[test]
    fn edge_color_is_alpha_weighted() {
        let mut img = RgbaImage::from_pixel(5, 1, image::Rgba([255, 255, 255, 0]));
        img.put_pixel(1, 0, image::Rgba([200, 0, 0, 255]));
        img.put_pixel(3, 0, image::Rgba([0, 0, 200, 85]));
        let out = feather_alpha(&img, FEATHER_RADIUS);
        // (200*255 + 0*85) / 340 = 150, (0*255 + 200*85) / 340 = 50.
        assert_eq!(out.get_pixel(2, 0).0[..3], [150, 0, 50]);
    }
}
