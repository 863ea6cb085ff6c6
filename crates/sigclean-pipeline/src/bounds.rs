//! Automatic ink bounds detection.
//!
//! Finds the tightest rectangle containing every pixel whose alpha is
//! above [`DETECTION_ALPHA`], pads it by 5% of the shorter image side,
//! and clamps it to the image. The result seeds the crop editor's
//! initial rectangle.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crop::{CropRect, MIN_CROP_SIZE};
use crate::types::{Dimensions, DisplayGeometry, RgbaImage};

/// Alpha above which a pixel counts as ink.
pub const DETECTION_ALPHA: u8 = 50;

/// Padding as a fraction of `min(width, height)`.
pub const PADDING_FRACTION: f64 = 0.05;

/// Axis-aligned box in source pixel coordinates.
///
/// `max_x` / `max_y` are exclusive, so a box covering a whole
/// `w x h` image is `(0, 0)–(w, h)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge.
    pub min_x: u32,
    /// Top edge.
    pub min_y: u32,
    /// Right edge (exclusive).
    pub max_x: u32,
    /// Bottom edge (exclusive).
    pub max_y: u32,
}

impl BoundingBox {
    /// The box covering an entire image.
    #[must_use]
    pub const fn full(dimensions: Dimensions) -> Self {
        Self {
            min_x: 0,
            min_y: 0,
            max_x: dimensions.width,
            max_y: dimensions.height,
        }
    }

    /// Width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.max_x - self.min_x
    }

    /// Height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.max_y - self.min_y
    }

    /// Grow by `pad` pixels on every side, clamped to the image.
    #[must_use]
    pub fn padded(self, pad: u32, dimensions: Dimensions) -> Self {
        Self {
            min_x: self.min_x.saturating_sub(pad),
            min_y: self.min_y.saturating_sub(pad),
            max_x: self.max_x.saturating_add(pad).min(dimensions.width),
            max_y: self.max_y.saturating_add(pad).min(dimensions.height),
        }
    }

    /// Translate into a display-space crop rectangle.
    ///
    /// The rectangle is scaled by the display/source ratio, grown to
    /// [`MIN_CROP_SIZE`] where the container allows, and shifted back
    /// inside the container.
    #[must_use]
    pub fn to_display(&self, geometry: &DisplayGeometry) -> CropRect {
        let (sx, sy) = (geometry.scale_x(), geometry.scale_y());
        let rect = CropRect::new(
            f64::from(self.min_x) * sx,
            f64::from(self.min_y) * sy,
            f64::from(self.width()) * sx,
            f64::from(self.height()) * sy,
        );
        rect.fit_within(geometry.display, MIN_CROP_SIZE)
    }
}

/// Padding for an image of the given size, in pixels.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn padding_for(dimensions: Dimensions) -> u32 {
    let short_side = dimensions.width.min(dimensions.height);
    (f64::from(short_side) * PADDING_FRACTION).round() as u32
}

/// Find the padded bounds of all ink in `image`.
///
/// Falls back to the full image when no pixel exceeds
/// [`DETECTION_ALPHA`], so the crop editor always has a usable box.
#[must_use]
pub fn detect_bounds(image: &RgbaImage) -> BoundingBox {
    let dimensions = Dimensions::of(image);
    let mut found: Option<BoundingBox> = None;

    for (x, y, pixel) in image.enumerate_pixels() {
        if pixel.0[3] <= DETECTION_ALPHA {
            continue;
        }
        found = Some(found.map_or(
            BoundingBox {
                min_x: x,
                min_y: y,
                max_x: x + 1,
                max_y: y + 1,
            },
            |b| BoundingBox {
                min_x: b.min_x.min(x),
                min_y: b.min_y.min(y),
                max_x: b.max_x.max(x + 1),
                max_y: b.max_y.max(y + 1),
            },
        ));
    }

    let Some(ink) = found else {
        debug!("no ink found, using full image bounds");
        return BoundingBox::full(dimensions);
    };

    let bounds = ink.padded(padding_for(dimensions), dimensions);
    debug!(?ink, ?bounds, "ink bounds detected");
    bounds
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Size;

    fn canvas(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_pixel(w, h, image::Rgba([255, 255, 255, 0]))
    }

    fn fill(img: &mut RgbaImage, x0: u32, y0: u32, w: u32, h: u32) {
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                img.put_pixel(x, y, image::Rgba([0, 0, 0, 255]));
            }
        }
    }

    #[test]
    fn square_at_forty_pads_by_five() {
        let mut img = canvas(100, 100);
        fill(&mut img, 40, 40, 10, 10);
        let b = detect_bounds(&img);
        assert_eq!(
            b,
            BoundingBox {
                min_x: 35,
                min_y: 35,
                max_x: 55,
                max_y: 55
            }
        );
    }

    #[test]
    fn no_ink_falls_back_to_full_image() {
        let b = detect_bounds(&canvas(30, 20));
        assert_eq!(b, BoundingBox::full(Dimensions { width: 30, height: 20 }));
    }

    #[test]
    fn faint_pixels_are_ignored() {
        let mut img = canvas(50, 50);
        img.put_pixel(3, 3, image::Rgba([0, 0, 0, DETECTION_ALPHA]));
        fill(&mut img, 20, 20, 5, 5);
        let b = detect_bounds(&img);
        assert!(b.min_x > 3 && b.min_y > 3, "{b:?}");
    }

    #[test]
    fn padding_clamps_at_image_edges() {
        let mut img = canvas(60, 40);
        fill(&mut img, 0, 0, 3, 3);
        fill(&mut img, 58, 38, 2, 2);
        let b = detect_bounds(&img);
        assert_eq!(b, BoundingBox::full(Dimensions { width: 60, height: 40 }));
    }

    #[test]
    fn bounds_always_within_image() {
        for (w, h, x, y) in [(1, 1, 0, 0), (7, 3, 6, 2), (200, 10, 100, 5), (10, 200, 9, 199)] {
            let mut img = canvas(w, h);
            img.put_pixel(x, y, image::Rgba([0, 0, 0, 255]));
            let b = detect_bounds(&img);
            assert!(b.min_x <= b.max_x && b.max_x <= w, "{b:?} for {w}x{h}");
            assert!(b.min_y <= b.max_y && b.max_y <= h, "{b:?} for {w}x{h}");
        }
    }

    #[test]
    fn display_translation_scales_box() {
        let b = BoundingBox {
            min_x: 100,
            min_y: 100,
            max_x: 300,
            max_y: 250,
        };
        let geometry = DisplayGeometry {
            source: Dimensions {
                width: 400,
                height: 400,
            },
            display: Size::new(200.0, 200.0),
        };
        let rect = b.to_display(&geometry);
        assert_eq!(rect, CropRect::new(50.0, 50.0, 100.0, 75.0));
    }

    #[test]
    fn display_translation_enforces_minimum_size() {
        let b = BoundingBox {
            min_x: 95,
            min_y: 0,
            max_x: 100,
            max_y: 5,
        };
        let geometry = DisplayGeometry::native(Dimensions {
            width: 100,
            height: 100,
        });
        let rect = b.to_display(&geometry);
        assert!(rect.width >= MIN_CROP_SIZE && rect.height >= MIN_CROP_SIZE);
        assert!(rect.x + rect.width <= 100.0 && rect.y >= 0.0);
    }
}
