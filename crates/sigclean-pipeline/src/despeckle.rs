//! Despeckle: drop isolated foreground pixels and paper texture.
//!
//! Dust, sensor noise, and stray marks survive thresholding as tiny
//! islands of ink. A genuine pen stroke is several pixels wide, so
//! every stroke pixel has plenty of foreground neighbors; a speck does
//! not. Cleanup runs three steps, all of which only ever force alpha to
//! zero:
//!
//! 1. [`DESPECKLE_PASSES`] neighbor passes: a pixel with fewer than
//!    [`MIN_NEIGHBOR_PERCENT`] of its 8-neighbors in the foreground is
//!    demoted. Repeating the pass erodes small clusters from the outside
//!    in.
//! 2. An isolation check over the 5x5 window outside the pixel's direct
//!    cross: nothing there means the pixel is a lone fragment.
//! 3. Paper texture: light pixels with fewer than [`MIN_DARK_NEIGHBORS`]
//!    dark pixels around them.
//!
//! Every step reads from a snapshot of its input, never from partially
//! updated output, so the result does not depend on scan order.

use tracing::debug;

use crate::types::{GrayImage, RgbaImage};

/// Number of neighbor passes.
pub const DESPECKLE_PASSES: u32 = 3;

/// Share of in-image 8-neighbors (percent) that must be foreground.
pub const MIN_NEIGHBOR_PERCENT: u32 = 30;

/// Half-width of the isolation window (a 5x5 window).
pub const ISOLATION_RADIUS: u32 = 2;

/// Mean RGB above which a foreground pixel counts as light.
pub const LIGHT_PIXEL_LEVEL: u32 = 50;

/// Red channel below which a foreground pixel counts as dark ink.
pub const DARK_INK_LEVEL: u8 = 100;

/// Dark pixels (3x3 window, center included) a light pixel needs to stay.
pub const MIN_DARK_NEIGHBORS: u8 = 3;

/// Pixels removed by each cleanup step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DespeckleReport {
    /// Removed by the neighbor passes.
    pub specks: u64,
    /// Removed by the 5x5 isolation check.
    pub isolated: u64,
    /// Removed as paper texture.
    pub texture: u64,
}

impl DespeckleReport {
    /// Total pixels demoted to background.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.specks + self.isolated + self.texture
    }
}

/// Extract the alpha channel as a single-channel mask.
#[must_use]
pub fn alpha_mask(image: &RgbaImage) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        image::Luma([image.get_pixel(x, y).0[3]])
    })
}

/// Visit every in-image pixel of the window of half-width `radius`
/// around `(x, y)`, center included.
fn window(
    w: u32,
    h: u32,
    x: u32,
    y: u32,
    radius: u32,
) -> impl Iterator<Item = (u32, u32)> {
    let xs = x.saturating_sub(radius)..=(x + radius).min(w.saturating_sub(1));
    (y.saturating_sub(radius)..=(y + radius).min(h.saturating_sub(1)))
        .flat_map(move |ny| xs.clone().map(move |nx| (nx, ny)))
}

/// Count foreground (non-zero) pixels among the 8 neighbors of `(x, y)`.
///
/// Neighbors outside the image count as background.
#[must_use]
pub fn foreground_neighbors(mask: &GrayImage, x: u32, y: u32) -> u8 {
    let (w, h) = mask.dimensions();
    let count = window(w, h, x, y, 1)
        .filter(|&(nx, ny)| (nx, ny) != (x, y) && mask.get_pixel(nx, ny).0[0] > 0)
        .count();
    u8::try_from(count).unwrap_or(u8::MAX)
}

/// Number of 8-neighbors of `(x, y)` that lie inside the image.
fn neighbors_in_image(w: u32, h: u32, x: u32, y: u32) -> u32 {
    let count = window(w, h, x, y, 1).count();
    u32::try_from(count).unwrap_or(u32::MAX).saturating_sub(1)
}

/// Whether a pixel with `foreground` of `total` neighbors is a speck.
fn is_speck(foreground: u8, total: u32) -> bool {
    u32::from(foreground) * 100 < total * MIN_NEIGHBOR_PERCENT
}

/// One neighbor pass. Returns the cleaned image and how many pixels it
/// removed.
fn neighbor_pass(image: &RgbaImage) -> (RgbaImage, u64) {
    let mask = alpha_mask(image);
    let (w, h) = mask.dimensions();
    let mut out = image.clone();
    let mut removed = 0u64;

    for (x, y, pixel) in out.enumerate_pixels_mut() {
        if pixel.0[3] == 0 {
            continue;
        }
        if is_speck(foreground_neighbors(&mask, x, y), neighbors_in_image(w, h, x, y)) {
            pixel.0[3] = 0;
            removed += 1;
        }
    }
    (out, removed)
}

/// Demote foreground pixels with no foreground in the 5x5 window
/// outside their direct cross (center and 4-neighbors excluded).
#[must_use = "returns the cleaned image"]
pub fn remove_isolated(image: &RgbaImage) -> (RgbaImage, u64) {
    let mask = alpha_mask(image);
    let (w, h) = mask.dimensions();
    let mut out = image.clone();
    let mut removed = 0u64;

    for (x, y, pixel) in out.enumerate_pixels_mut() {
        if pixel.0[3] == 0 {
            continue;
        }
        let connected = window(w, h, x, y, ISOLATION_RADIUS).any(|(nx, ny)| {
            x.abs_diff(nx) + y.abs_diff(ny) >= 2 && mask.get_pixel(nx, ny).0[0] > 0
        });
        if !connected {
            pixel.0[3] = 0;
            removed += 1;
        }
    }
    (out, removed)
}

/// Demote light foreground pixels that have fewer than
/// [`MIN_DARK_NEIGHBORS`] dark pixels in their 3x3 window.
#[must_use = "returns the cleaned image"]
pub fn clean_paper_texture(image: &RgbaImage) -> (RgbaImage, u64) {
    let (w, h) = image.dimensions();
    let mut out = image.clone();
    let mut removed = 0u64;

    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let [r, g, b, a] = pixel.0;
        if a == 0 {
            continue;
        }
        let mean = (u32::from(r) + u32::from(g) + u32::from(b)) / 3;
        if mean <= LIGHT_PIXEL_LEVEL {
            continue;
        }
        let dark = window(w, h, x, y, 1)
            .filter(|&(nx, ny)| {
                let n = image.get_pixel(nx, ny).0;
                n[3] > 0 && n[0] < DARK_INK_LEVEL
            })
            .count();
        if dark < usize::from(MIN_DARK_NEIGHBORS) {
            pixel.0[3] = 0;
            removed += 1;
        }
    }
    (out, removed)
}

/// Run every cleanup step.
///
/// RGB values are never touched; only alpha is forced to zero.
#[must_use = "returns the despeckled image"]
pub fn despeckle(image: &RgbaImage) -> (RgbaImage, DespeckleReport) {
    let mut report = DespeckleReport::default();
    let mut current = image.clone();
    for _ in 0..DESPECKLE_PASSES {
        let (next, removed) = neighbor_pass(&current);
        current = next;
        report.specks += removed;
    }
    let (current, isolated) = remove_isolated(&current);
    report.isolated = isolated;
    let (current, texture) = clean_paper_texture(&current);
    report.texture = texture;

    debug!(
        specks = report.specks,
        isolated = report.isolated,
        texture = report.texture,
        "despeckled"
    );
    (current, report)
}

#[cfg(test)]
mod tests {
    use super::*;

    const INK: image::Rgba<u8> = image::Rgba([0, 0, 0, 255]);

    fn transparent(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_pixel(w, h, image::Rgba([255, 255, 255, 0]))
    }

    fn fill(img: &mut RgbaImage, xs: std::ops::Range<u32>, ys: std::ops::Range<u32>) {
        for y in ys {
            for x in xs.clone() {
                img.put_pixel(x, y, INK);
            }
        }
    }

    #[test]
    fn isolated_pixel_is_removed() {
        let mut img = transparent(9, 9);
        img.put_pixel(4, 4, INK);
        let (out, report) = despeckle(&img);
        assert_eq!(report.total(), 1);
        assert_eq!(out.get_pixel(4, 4).0, [0, 0, 0, 0]);
    }

    #[test]
    fn l_shaped_three_pixel_speck_is_removed() {
        let mut img = transparent(9, 9);
        img.put_pixel(4, 4, INK);
        img.put_pixel(5, 4, INK);
        img.put_pixel(4, 5, INK);
        let (out, report) = despeckle(&img);
        assert_eq!(report.specks, 3);
        assert!(out.pixels().all(|p| p.0[3] == 0));
    }

    #[test]
    fn thick_stroke_survives_intact() {
        let mut img = transparent(20, 10);
        fill(&mut img, 2..18, 3..6);
        let (out, report) = despeckle(&img);
        assert_eq!(report, DespeckleReport::default());
        assert_eq!(out, img);
    }

    #[test]
    fn small_blob_erodes_across_passes() {
        // A T shape: the arms have two neighbors and go in the first
        // pass; the stem and center keep three until the arms are gone.
        let mut img = transparent(9, 9);
        for (x, y) in [(3, 4), (4, 4), (5, 4), (4, 5)] {
            img.put_pixel(x, y, INK);
        }
        let (first, removed) = neighbor_pass(&img);
        assert_eq!(removed, 2);
        assert_eq!(first.get_pixel(4, 4).0[3], 255);
        assert_eq!(first.get_pixel(4, 5).0[3], 255);

        let (out, report) = despeckle(&img);
        assert_eq!(report.specks, 4);
        assert!(out.pixels().all(|p| p.0[3] == 0));
    }

    #[test]
    fn ratio_uses_neighbors_inside_the_image() {
        // A 2x2 block in the corner: each pixel has 3 in-image neighbors,
        // all foreground.
        let mut img = transparent(6, 6);
        fill(&mut img, 0..2, 0..2);
        let (out, _) = neighbor_pass(&img);
        assert_eq!(out, img);
    }

    #[test]
    fn isolation_check_ignores_direct_cross() {
        // Two pixels touching orthogonally, nothing else nearby.
        let mut img = transparent(9, 9);
        img.put_pixel(4, 4, INK);
        img.put_pixel(4, 5, INK);
        let (out, removed) = remove_isolated(&img);
        assert_eq!(removed, 2);
        assert!(out.pixels().all(|p| p.0[3] == 0));

        // A diagonal partner counts as a connection.
        let mut img = transparent(9, 9);
        img.put_pixel(4, 4, INK);
        img.put_pixel(5, 5, INK);
        let (_, removed) = remove_isolated(&img);
        assert_eq!(removed, 0);
    }

    #[test]
    fn light_texture_is_removed_next_to_paper() {
        let mut img = transparent(12, 12);
        // Light gray patch, opaque but not ink-dark.
        for y in 2..6 {
            for x in 2..6 {
                img.put_pixel(x, y, image::Rgba([180, 180, 180, 255]));
            }
        }
        let (out, removed) = clean_paper_texture(&img);
        assert_eq!(removed, 16);
        assert!(out.pixels().all(|p| p.0[3] == 0));
    }

    #[test]
    fn light_pixels_beside_ink_are_kept() {
        let mut img = transparent(12, 12);
        fill(&mut img, 2..10, 2..5);
        img.put_pixel(5, 5, image::Rgba([120, 120, 120, 255]));
        let (out, removed) = clean_paper_texture(&img);
        assert_eq!(removed, 0);
        assert_eq!(out.get_pixel(5, 5).0[3], 255);
    }

    #[test]
    fn rgb_of_background_is_unchanged() {
        let mut img = RgbaImage::from_fn(6, 6, |x, y| {
            let r = u8::try_from(x * 30).unwrap_or(0);
            let g = u8::try_from(y * 30).unwrap_or(0);
            image::Rgba([r, g, 9, 0])
        });
        img.put_pixel(2, 2, image::Rgba([1, 2, 3, 255]));
        let (out, _) = despeckle(&img);
        for (a, b) in img.pixels().zip(out.pixels()) {
            assert_eq!(a.0[..3], b.0[..3]);
        }
    }

    #[test]
    fn corner_neighbors_respect_bounds() {
        let mask = GrayImage::from_pixel(3, 3, image::Luma([255]));
        assert_eq!(foreground_neighbors(&mask, 0, 0), 3);
        assert_eq!(foreground_neighbors(&mask, 1, 1), 8);
        assert_eq!(foreground_neighbors(&mask, 2, 1), 5);
        assert_eq!(neighbors_in_image(3, 3, 0, 0), 3);
        assert_eq!(neighbors_in_image(3, 3, 1, 1), 8);
    }
}
