//! Manual four-corner perspective correction.
//!
//! The user drags the four corners of a quadrilateral over the image.
//! [`render`] then maps the full source rectangle onto that quad: the
//! source is split into a `grid x grid` lattice, each lattice cell is
//! sent to the cell of the quad obtained by bilinear blending of its
//! corners, and every destination pixel is filled by inverting that
//! cell's bilinear map and sampling the source.
//!
//! Because the blend is bilinear in both parameters, the restriction to
//! any lattice cell is itself bilinear, so the per-cell pieces join
//! without seams at any grid size.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::types::{Dimensions, DisplayGeometry, PipelineError, Point, RgbaImage};

/// Lattice resolution used by the editor preview and by `apply`.
pub const DEFAULT_GRID: u32 = 20;

/// Tolerance when deciding whether a point lies inside a cell.
const INSIDE_EPSILON: f64 = 1e-9;

/// Corner indices into [`PerspectiveQuad::corners`].
pub const TOP_LEFT: usize = 0;
/// Top-right corner index.
pub const TOP_RIGHT: usize = 1;
/// Bottom-right corner index.
pub const BOTTOM_RIGHT: usize = 2;
/// Bottom-left corner index.
pub const BOTTOM_LEFT: usize = 3;

/// Four corners in source pixel space, ordered TL, TR, BR, BL.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerspectiveQuad {
    /// Corner positions.
    pub corners: [Point; 4],
}

impl PerspectiveQuad {
    /// The quad matching the image rectangle, `[(0,0),(w,0),(w,h),(0,h)]`.
    #[must_use]
    pub fn identity(dimensions: Dimensions) -> Self {
        let w = f64::from(dimensions.width);
        let h = f64::from(dimensions.height);
        Self {
            corners: [
                Point::new(0.0, 0.0),
                Point::new(w, 0.0),
                Point::new(w, h),
                Point::new(0.0, h),
            ],
        }
    }

    /// Bilinear blend of the corners at parameter `(u, v)`.
    ///
    /// `(0, 0)` is the top-left corner and `(1, 1)` the bottom-right.
    #[must_use]
    pub fn point_at(&self, u: f64, v: f64) -> Point {
        let [tl, tr, br, bl] = self.corners;
        let top = lerp(tl, tr, u);
        let bottom = lerp(bl, br, u);
        lerp(top, bottom, v)
    }

    /// `(min_x, min_y, max_x, max_y)` over the corners.
    #[must_use]
    pub fn extent(&self) -> (f64, f64, f64, f64) {
        self.corners.iter().fold(
            (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
            |(x0, y0, x1, y1), p| (x0.min(p.x), y0.min(p.y), x1.max(p.x), y1.max(p.y)),
        )
    }

    /// The quad with every corner clamped to `[0, w] x [0, h]`.
    #[must_use]
    pub fn clamped(self, dimensions: Dimensions) -> Self {
        Self {
            corners: self.corners.map(|p| clamp_point(p, dimensions)),
        }
    }

    fn is_finite(&self) -> bool {
        self.corners.iter().all(|p| p.x.is_finite() && p.y.is_finite())
    }
}

/// Editor input.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum QuadEvent {
    /// Grab corner `i` (ignored unless `i < 4`).
    DragStart(usize),
    /// Pointer moved, in display coordinates.
    DragMove(Point),
    /// Pointer released.
    DragEnd,
    /// Restore the identity quad.
    Reset,
}

/// Quad editing state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuadEditor {
    /// Current quad in source pixels.
    pub quad: PerspectiveQuad,
    /// Corner currently held, if any.
    pub dragging: Option<usize>,
    /// How the source image is displayed.
    pub geometry: DisplayGeometry,
}

impl QuadEditor {
    /// Start editing with the identity quad.
    #[must_use]
    pub fn new(geometry: DisplayGeometry) -> Self {
        Self {
            quad: PerspectiveQuad::identity(geometry.source),
            dragging: None,
            geometry,
        }
    }

    /// Apply one event.
    #[must_use]
    pub fn transition(self, event: QuadEvent) -> Self {
        match event {
            QuadEvent::DragStart(i) if i < 4 => Self {
                dragging: Some(i),
                ..self
            },
            QuadEvent::DragStart(_) => self,
            QuadEvent::DragMove(pointer) => match self.dragging {
                Some(i) => {
                    let mut quad = self.quad;
                    let source = self.geometry.to_source(pointer);
                    quad.corners[i] = clamp_point(source, self.geometry.source);
                    Self { quad, ..self }
                }
                None => self,
            },
            QuadEvent::DragEnd => Self {
                dragging: None,
                ..self
            },
            QuadEvent::Reset => self.reset(),
        }
    }

    /// Back to the identity quad with nothing held.
    #[must_use]
    pub fn reset(self) -> Self {
        Self::new(self.geometry)
    }
}

fn clamp_point(p: Point, dimensions: Dimensions) -> Point {
    let w = f64::from(dimensions.width);
    let h = f64::from(dimensions.height);
    Point::new(p.x.clamp(0.0, w), p.y.clamp(0.0, h))
}

fn lerp(a: Point, b: Point, t: f64) -> Point {
    Point::new((b.x - a.x).mul_add(t, a.x), (b.y - a.y).mul_add(t, a.y))
}

fn cross(ax: f64, ay: f64, bx: f64, by: f64) -> f64 {
    ax * by - ay * bx
}

/// Local `(s, t)` of `p` inside the bilinear patch with corners
/// `p00, p10, p11, p01`, or `None` if `p` is outside or the patch is
/// degenerate.
fn inverse_bilinear(
    p: Point,
    p00: Point,
    p10: Point,
    p11: Point,
    p01: Point,
) -> Option<(f64, f64)> {
    let (ex, ey) = p10.delta_from(p00);
    let (fx, fy) = p01.delta_from(p00);
    let gx = p00.x - p10.x + p11.x - p01.x;
    let gy = p00.y - p10.y + p11.y - p01.y;
    let (hx, hy) = p.delta_from(p00);

    let k2 = cross(gx, gy, fx, fy);
    let k1 = cross(ex, ey, fx, fy) + cross(hx, hy, gx, gy);
    let k0 = cross(hx, hy, ex, ey);

    let solve_s = |t: f64| -> Option<f64> {
        let dx = gx.mul_add(t, ex);
        let dy = gy.mul_add(t, ey);
        if dx.abs() >= dy.abs() {
            (dx.abs() > f64::EPSILON).then(|| fx.mul_add(-t, hx) / dx)
        } else {
            Some(fy.mul_add(-t, hy) / dy)
        }
    };
    let in_range = |v: f64| (-INSIDE_EPSILON..=1.0 + INSIDE_EPSILON).contains(&v);
    let accept = |t: f64| solve_s(t).filter(|&s| in_range(s) && in_range(t)).map(|s| (s, t));

    if k2.abs() < f64::EPSILON * k1.abs().max(1.0) {
        if k1.abs() < f64::EPSILON {
            return None;
        }
        return accept(-k0 / k1);
    }

    let discriminant = k1.mul_add(k1, -4.0 * k0 * k2);
    if discriminant < 0.0 {
        return None;
    }
    // Stable form of the quadratic roots: avoids cancellation when k2
    // is tiny relative to k1.
    let q = -0.5 * (k1 + discriminant.sqrt().copysign(k1));
    accept(q / k2).or_else(|| (q != 0.0).then(|| k0 / q).and_then(accept))
}

/// Bilinear sample at a pixel-center coordinate (pixel `i` is centered
/// at `i`), clamped to the image edge.
///
/// Color is interpolated premultiplied by alpha, so the RGB under a
/// transparent pixel never bleeds into a partially covered result.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub(crate) fn sample(image: &RgbaImage, x: f64, y: f64) -> image::Rgba<u8> {
    let max_x = f64::from(image.width() - 1);
    let max_y = f64::from(image.height() - 1);
    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let (x0, y0) = (x0 as u32, y0 as u32);
    let x1 = (x0 + 1).min(image.width() - 1);
    let y1 = (y0 + 1).min(image.height() - 1);

    let taps = [
        ((1.0 - fx) * (1.0 - fy), image.get_pixel(x0, y0).0),
        (fx * (1.0 - fy), image.get_pixel(x1, y0).0),
        ((1.0 - fx) * fy, image.get_pixel(x0, y1).0),
        (fx * fy, image.get_pixel(x1, y1).0),
    ];

    let mut alpha = 0.0;
    let mut premultiplied = [0.0f64; 3];
    let mut straight = [0.0f64; 3];
    for (w, p) in taps {
        let a = w * f64::from(p[3]);
        alpha += a;
        for ((pre, st), &v) in premultiplied.iter_mut().zip(&mut straight).zip(&p[..3]) {
            *pre += a * f64::from(v);
            *st += w * f64::from(v);
        }
    }
    let to_u8 = |v: f64| v.round().clamp(0.0, 255.0) as u8;
    let out_alpha = to_u8(alpha);
    // Fully transparent results keep the plain blend of the RGB beneath.
    let [r, g, b] = if out_alpha == 0 {
        straight.map(to_u8)
    } else {
        premultiplied.map(|v| to_u8(v / alpha))
    };
    image::Rgba([r, g, b, out_alpha])
}

/// Warp `image` onto `quad`.
///
/// Corners are first clamped to the source rectangle, so the output is
/// never larger than the source. The output canvas covers the clamped
/// quad's bounding extent (at least 1x1), with the extent's floored
/// minimum at the canvas origin. Pixels the quad does not cover are
/// transparent.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyRegion`] for an empty source image and
/// [`PipelineError::InvalidConfig`] for a zero grid or non-finite
/// corners.
#[instrument(skip(image), fields(width = image.width(), height = image.height()))]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn render(
    image: &RgbaImage,
    quad: &PerspectiveQuad,
    grid: u32,
) -> Result<RgbaImage, PipelineError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(PipelineError::EmptyRegion);
    }
    if grid == 0 {
        return Err(PipelineError::InvalidConfig(
            "perspective grid must be at least 1".to_owned(),
        ));
    }
    if !quad.is_finite() {
        return Err(PipelineError::InvalidConfig(
            "perspective corners must be finite".to_owned(),
        ));
    }

    let quad = quad.clamped(Dimensions::of(image));
    let (min_x, min_y, max_x, max_y) = quad.extent();
    let origin = Point::new(min_x.floor(), min_y.floor());
    let out_w = ((max_x.ceil() - origin.x) as u32).max(1);
    let out_h = ((max_y.ceil() - origin.y) as u32).max(1);
    let mut out = RgbaImage::new(out_w, out_h);

    let src_w = f64::from(image.width());
    let src_h = f64::from(image.height());
    let cells = f64::from(grid);
    let dest = |u: f64, v: f64| {
        let p = quad.point_at(u, v);
        Point::new(p.x - origin.x, p.y - origin.y)
    };

    let mut filled = 0u64;
    for row in 0..grid {
        let v0 = f64::from(row) / cells;
        let v1 = f64::from(row + 1) / cells;
        for col in 0..grid {
            let u0 = f64::from(col) / cells;
            let u1 = f64::from(col + 1) / cells;
            let d00 = dest(u0, v0);
            let d10 = dest(u1, v0);
            let d11 = dest(u1, v1);
            let d01 = dest(u0, v1);

            let lo_x = d00.x.min(d10.x).min(d11.x).min(d01.x).floor().max(0.0) as u32;
            let lo_y = d00.y.min(d10.y).min(d11.y).min(d01.y).floor().max(0.0) as u32;
            let hi_x = (d00.x.max(d10.x).max(d11.x).max(d01.x).ceil() as u32).min(out_w);
            let hi_y = (d00.y.max(d10.y).max(d11.y).max(d01.y).ceil() as u32).min(out_h);

            for py in lo_y..hi_y {
                for px in lo_x..hi_x {
                    let center = Point::new(f64::from(px) + 0.5, f64::from(py) + 0.5);
                    let Some((s, t)) = inverse_bilinear(center, d00, d10, d11, d01) else {
                        continue;
                    };
                    let su = (u1 - u0).mul_add(s.clamp(0.0, 1.0), u0);
                    let sv = (v1 - v0).mul_add(t.clamp(0.0, 1.0), v0);
                    let pixel = sample(image, su.mul_add(src_w, -0.5), sv.mul_add(src_h, -0.5));
                    out.put_pixel(px, py, pixel);
                    filled += 1;
                }
            }
        }
    }

    debug!(out_w, out_h, grid, filled, "perspective rendered");
    Ok(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::Size;

    fn pattern(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_fn(w, h, |x, y| {
            image::Rgba([
                u8::try_from((x * 7) % 256).unwrap(),
                u8::try_from((y * 11) % 256).unwrap(),
                u8::try_from((x + y) % 256).unwrap(),
                if (x + y) % 3 == 0 { 0 } else { 255 },
            ])
        })
    }

    fn editor(w: u32, h: u32, display: Size) -> QuadEditor {
        QuadEditor::new(DisplayGeometry {
            source: Dimensions {
                width: w,
                height: h,
            },
            display,
        })
    }

    #[test]
    fn identity_quad_reproduces_image() {
        let img = pattern(37, 23);
        let quad = PerspectiveQuad::identity(Dimensions::of(&img));
        for grid in [1, 3, DEFAULT_GRID] {
            let out = render(&img, &quad, grid).unwrap();
            assert_eq!(out, img, "grid {grid}");
        }
    }

    #[test]
    fn mirrored_quad_flips_horizontally() {
        let img = pattern(16, 9);
        let quad = PerspectiveQuad {
            corners: [
                Point::new(16.0, 0.0),
                Point::new(0.0, 0.0),
                Point::new(0.0, 9.0),
                Point::new(16.0, 9.0),
            ],
        };
        let out = render(&img, &quad, 4).unwrap();
        for (x, y, p) in out.enumerate_pixels() {
            assert_eq!(p, img.get_pixel(15 - x, y), "at ({x}, {y})");
        }
    }

    #[test]
    fn output_covers_quad_extent() {
        let img = RgbaImage::from_pixel(40, 30, image::Rgba([20, 30, 40, 255]));
        let quad = PerspectiveQuad {
            corners: [
                Point::new(5.2, 3.0),
                Point::new(35.0, 0.0),
                Point::new(40.0, 30.0),
                Point::new(0.0, 27.5),
            ],
        };
        let out = render(&img, &quad, DEFAULT_GRID).unwrap();
        assert_eq!(out.dimensions(), (40, 30));
        // Outside the quad near the top-left corner.
        assert_eq!(out.get_pixel(0, 0).0, [0, 0, 0, 0]);
        assert_eq!(out.get_pixel(20, 15).0, [20, 30, 40, 255]);
    }

    #[test]
    fn collapsed_quad_yields_minimal_canvas() {
        let img = pattern(10, 10);
        let p = Point::new(4.0, 4.0);
        let out = render(&img, &PerspectiveQuad { corners: [p; 4] }, 2).unwrap();
        assert_eq!(out.dimensions(), (1, 1));
    }

    #[test]
    fn zero_grid_is_rejected() {
        let img = pattern(4, 4);
        let quad = PerspectiveQuad::identity(Dimensions::of(&img));
        assert!(matches!(
            render(&img, &quad, 0),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn drag_maps_display_to_source_and_clamps() {
        let e = editor(200, 100, Size::new(100.0, 50.0))
            .transition(QuadEvent::DragStart(TOP_LEFT))
            .transition(QuadEvent::DragMove(Point::new(10.0, 5.0)));
        assert_eq!(e.quad.corners[TOP_LEFT], Point::new(20.0, 10.0));

        let e = e.transition(QuadEvent::DragMove(Point::new(-30.0, 999.0)));
        assert_eq!(e.quad.corners[TOP_LEFT], Point::new(0.0, 100.0));
    }

    #[test]
    fn clamped_pulls_corners_into_source() {
        let quad = PerspectiveQuad {
            corners: [
                Point::new(-5.0, -5.0),
                Point::new(5000.0, 2.0),
                Point::new(5000.0, 5000.0),
                Point::new(3.0, 5000.0),
            ],
        };
        let clamped = quad.clamped(Dimensions {
            width: 10,
            height: 8,
        });
        assert_eq!(
            clamped.corners,
            [
                Point::new(0.0, 0.0),
                Point::new(10.0, 2.0),
                Point::new(10.0, 8.0),
                Point::new(3.0, 8.0),
            ]
        );
    }

    #[test]
    fn oversized_quad_renders_at_source_size() {
        let img = pattern(10, 10);
        let quad = PerspectiveQuad {
            corners: [
                Point::new(0.0, 0.0),
                Point::new(5000.0, 0.0),
                Point::new(5000.0, 5000.0),
                Point::new(0.0, 5000.0),
            ],
        };
        let out = render(&img, &quad, DEFAULT_GRID).unwrap();
        assert_eq!(out.dimensions(), (10, 10));
        assert_eq!(out, img);
    }

    #[test]
    fn sampling_does_not_bleed_transparent_color() {
        // Opaque black next to transparent white: any partial result
        // must stay black.
        let img = RgbaImage::from_fn(2, 1, |x, _| {
            if x == 0 {
                image::Rgba([0, 0, 0, 255])
            } else {
                image::Rgba([255, 255, 255, 0])
            }
        });
        let mid = sample(&img, 0.5, 0.0);
        assert_eq!(mid.0, [0, 0, 0, 128]);
        let mostly_clear = sample(&img, 0.9, 0.0);
        assert_eq!(mostly_clear.0[..3], [0, 0, 0]);
        assert!(mostly_clear.0[3] > 0 && mostly_clear.0[3] < 128);
    }

    #[test]
    fn out_of_range_corner_is_ignored() {
        let before = editor(10, 10, Size::new(10.0, 10.0));
        let after = before
            .transition(QuadEvent::DragStart(4))
            .transition(QuadEvent::DragMove(Point::new(3.0, 3.0)));
        assert_eq!(after, before);
    }

    #[test]
    fn reset_restores_identity_exactly() {
        let e = editor(64, 48, Size::new(32.0, 24.0))
            .transition(QuadEvent::DragStart(BOTTOM_RIGHT))
            .transition(QuadEvent::DragMove(Point::new(12.3, 4.5)))
            .transition(QuadEvent::DragStart(BOTTOM_LEFT))
            .transition(QuadEvent::DragMove(Point::new(1.0, 2.0)))
            .transition(QuadEvent::Reset);
        assert_eq!(
            e.quad.corners,
            [
                Point::new(0.0, 0.0),
                Point::new(64.0, 0.0),
                Point::new(64.0, 48.0),
                Point::new(0.0, 48.0),
            ]
        );
        assert_eq!(e.dragging, None);
    }

    #[test]
    fn drag_end_releases_corner() {
        let e = editor(10, 10, Size::new(10.0, 10.0))
            .transition(QuadEvent::DragStart(TOP_RIGHT))
            .transition(QuadEvent::DragEnd)
            .transition(QuadEvent::DragMove(Point::new(1.0, 1.0)));
        assert_eq!(e.dragging, None);
        assert_eq!(e.quad.corners[TOP_RIGHT], Point::new(10.0, 0.0));
    }

    #[test]
    fn inverse_bilinear_recovers_parameters() {
        let quad = PerspectiveQuad {
            corners: [
                Point::new(2.0, 1.0),
                Point::new(30.0, 4.0),
                Point::new(27.0, 22.0),
                Point::new(-1.0, 18.0),
            ],
        };
        let [tl, tr, br, bl] = quad.corners;
        for (u, v) in [(0.1, 0.2), (0.5, 0.5), (0.9, 0.75), (0.0, 1.0)] {
            let p = quad.point_at(u, v);
            let (s, t) = inverse_bilinear(p, tl, tr, br, bl).unwrap();
            assert!((s - u).abs() < 1e-6 && (t - v).abs() < 1e-6, "({u}, {v}) -> ({s}, {t})");
        }
        assert!(inverse_bilinear(Point::new(100.0, 100.0), tl, tr, br, bl).is_none());
    }
}
