//! Interactive crop rectangle editing.
//!
//! The rectangle lives in display coordinates (the space of the
//! rendered preview). Editing is a pure state machine: each pointer
//! event produces a new [`CropEditor`], and no event can shrink the
//! rectangle below [`MIN_CROP_SIZE`] or push it outside the container.
//! A rotate handle above the rectangle sets a whole-degree rotation.
//! Baking the crop into pixels is a separate step ([`apply_crop`], or
//! [`apply_rotated_crop`] when a rotation is set).

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{Dimensions, DisplayGeometry, PipelineError, Point, RgbaImage, Size};

/// Smallest allowed crop width or height, in display units.
pub const MIN_CROP_SIZE: f64 = 50.0;

/// A rectangle in display coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropRect {
    /// Left edge.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    /// Width.
    pub width: f64,
    /// Height.
    pub height: f64,
}

impl CropRect {
    /// Create a new rectangle.
    #[must_use]
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle covering the whole container.
    #[must_use]
    pub const fn full(container: Size) -> Self {
        Self::new(0.0, 0.0, container.width, container.height)
    }

    /// Right edge.
    #[must_use]
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    /// Bottom edge.
    #[must_use]
    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// Whether the rectangle lies entirely inside `container`.
    #[must_use]
    pub fn is_within(&self, container: Size) -> bool {
        self.x >= 0.0
            && self.y >= 0.0
            && self.right() <= container.width
            && self.bottom() <= container.height
    }

    /// Grow to `min_size` (as far as the container allows) and shift
    /// back inside the container.
    #[must_use]
    pub fn fit_within(self, container: Size, min_size: f64) -> Self {
        let width = self.width.max(min_size).min(container.width).max(0.0);
        let height = self.height.max(min_size).min(container.height).max(0.0);
        Self {
            x: self.x.min(container.width - width).max(0.0),
            y: self.y.min(container.height - height).max(0.0),
            width,
            height,
        }
    }
}

/// Which part of the rectangle a drag grabbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DragHandle {
    /// The body: translates the whole rectangle.
    Move,
    /// Top-left corner.
    Nw,
    /// Top-right corner.
    Ne,
    /// Bottom-left corner.
    Sw,
    /// Bottom-right corner.
    Se,
    /// The rotate handle above the rectangle: sets the rotation, never
    /// the rectangle.
    Rotate,
}

/// Drag state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CropState {
    /// No drag in progress.
    Idle,
    /// A handle is held; `last` is the previous pointer position.
    Dragging {
        /// Grabbed handle.
        handle: DragHandle,
        /// Pointer position at the previous event.
        last: Point,
    },
}

/// Pointer input, in display coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CropEvent {
    /// Pointer pressed on a handle.
    DragStart(DragHandle, Point),
    /// Pointer moved.
    DragMove(Point),
    /// Pointer released.
    DragEnd,
    /// Clear the rotation back to zero.
    ResetRotation,
}

/// Crop rectangle plus drag state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropEditor {
    /// Current rectangle.
    pub rect: CropRect,
    /// Current drag state.
    pub state: CropState,
    /// Display container size.
    pub container: Size,
    /// Clockwise rotation in whole degrees, in `(-180, 180]`.
    #[serde(default)]
    pub rotation: i32,
}

impl CropEditor {
    /// Start editing with `initial`, fitted into the container.
    #[must_use]
    pub fn new(initial: CropRect, container: Size) -> Self {
        Self {
            rect: initial.fit_within(container, MIN_CROP_SIZE),
            state: CropState::Idle,
            container,
            rotation: 0,
        }
    }

    /// Whether a drag is in progress.
    #[must_use]
    pub const fn is_dragging(&self) -> bool {
        matches!(self.state, CropState::Dragging { .. })
    }

    /// Apply one event.
    #[must_use]
    pub fn transition(self, event: CropEvent) -> Self {
        match (self.state, event) {
            (_, CropEvent::DragStart(handle, pointer)) => Self {
                state: CropState::Dragging {
                    handle,
                    last: pointer,
                },
                ..self
            },
            (
                CropState::Dragging {
                    handle: DragHandle::Rotate,
                    ..
                },
                CropEvent::DragMove(pointer),
            ) => Self {
                rotation: self.rotation_towards(pointer),
                state: CropState::Dragging {
                    handle: DragHandle::Rotate,
                    last: pointer,
                },
                ..self
            },
            (CropState::Dragging { handle, last }, CropEvent::DragMove(pointer)) => {
                let (dx, dy) = pointer.delta_from(last);
                Self {
                    rect: self.dragged(handle, dx, dy),
                    state: CropState::Dragging {
                        handle,
                        last: pointer,
                    },
                    ..self
                }
            }
            (CropState::Idle, CropEvent::DragMove(_)) => self,
            (_, CropEvent::DragEnd) => Self {
                state: CropState::Idle,
                ..self
            },
            (_, CropEvent::ResetRotation) => Self {
                rotation: 0,
                ..self
            },
        }
    }

    /// Angle of `pointer` around the rectangle's center, measured
    /// clockwise from straight up (where the rotate handle sits).
    #[allow(clippy::cast_possible_truncation)]
    fn rotation_towards(&self, pointer: Point) -> i32 {
        let r = self.rect;
        let center = Point::new(r.x + r.width / 2.0, r.y + r.height / 2.0);
        let (dx, dy) = pointer.delta_from(center);
        if dx == 0.0 && dy == 0.0 {
            return self.rotation;
        }
        let degrees = dx.atan2(-dy).to_degrees().round() as i32;
        normalize_degrees(degrees)
    }

    fn dragged(&self, handle: DragHandle, dx: f64, dy: f64) -> CropRect {
        let r = self.rect;
        let c = self.container;

        if handle == DragHandle::Move {
            return CropRect {
                x: (r.x + dx).min(c.width - r.width).max(0.0),
                y: (r.y + dy).min(c.height - r.height).max(0.0),
                ..r
            };
        }

        let candidate = match handle {
            DragHandle::Nw => CropRect::new(r.x + dx, r.y + dy, r.width - dx, r.height - dy),
            DragHandle::Ne => CropRect::new(r.x, r.y + dy, r.width + dx, r.height - dy),
            DragHandle::Sw => CropRect::new(r.x + dx, r.y, r.width - dx, r.height + dy),
            DragHandle::Se | DragHandle::Move | DragHandle::Rotate => {
                CropRect::new(r.x, r.y, r.width + dx, r.height + dy)
            }
        };

        if candidate.width >= MIN_CROP_SIZE
            && candidate.height >= MIN_CROP_SIZE
            && candidate.is_within(c)
        {
            candidate
        } else {
            r
        }
    }
}

/// Source-pixel region `(x, y, width, height)` for a display rect.
///
/// Edges are rounded to the nearest pixel and clamped to the image.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn source_region(rect: &CropRect, geometry: &DisplayGeometry) -> (u32, u32, u32, u32) {
    let Dimensions { width, height } = geometry.source;
    let to_px = |v: f64, limit: u32| -> u32 { v.round().clamp(0.0, f64::from(limit)) as u32 };
    let top_left = geometry.to_source(Point::new(rect.x, rect.y));
    let bottom_right = geometry.to_source(Point::new(rect.right(), rect.bottom()));
    let x0 = to_px(top_left.x, width);
    let y0 = to_px(top_left.y, height);
    let x1 = to_px(bottom_right.x, width);
    let y1 = to_px(bottom_right.y, height);
    (x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0))
}

/// Copy the region under `rect` into a new buffer.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyRegion`] if the mapped region has zero
/// width or height.
pub fn apply_crop(
    image: &RgbaImage,
    rect: &CropRect,
    geometry: &DisplayGeometry,
) -> Result<RgbaImage, PipelineError> {
    let (x, y, w, h) = source_region(rect, geometry);
    if w == 0 || h == 0 {
        return Err(PipelineError::EmptyRegion);
    }
    debug!(x, y, w, h, "crop applied");
    Ok(image::imageops::crop_imm(image, x, y, w, h).to_image())
}

/// Map any whole-degree angle into `(-180, 180]`.
#[must_use]
pub const fn normalize_degrees(degrees: i32) -> i32 {
    let d = degrees.rem_euclid(360);
    if d > 180 { d - 360 } else { d }
}

/// `(sin, cos)` of a whole-degree angle, exact at quarter turns.
fn sin_cos(degrees: i32) -> (f64, f64) {
    match degrees.rem_euclid(360) {
        0 => (0.0, 1.0),
        90 => (1.0, 0.0),
        180 => (0.0, -1.0),
        270 => (-1.0, 0.0),
        d => f64::from(d).to_radians().sin_cos(),
    }
}

/// Rotate `image` clockwise by `degrees` about its center.
///
/// The canvas grows to hold the whole rotated image
/// (`w|cos| + h|sin|` by `w|sin| + h|cos|`, rounded). Uncovered canvas
/// is transparent.
#[must_use = "returns the rotated image"]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn rotate_expanded(image: &RgbaImage, degrees: i32) -> RgbaImage {
    let (w, h) = image.dimensions();
    if degrees.rem_euclid(360) == 0 || w == 0 || h == 0 {
        return image.clone();
    }
    let (sin, cos) = sin_cos(degrees);
    let (fw, fh) = (f64::from(w), f64::from(h));
    let out_w = (fw.mul_add(cos.abs(), fh * sin.abs()).round() as u32).max(1);
    let out_h = (fw.mul_add(sin.abs(), fh * cos.abs()).round() as u32).max(1);
    let (half_out_w, half_out_h) = (f64::from(out_w) / 2.0, f64::from(out_h) / 2.0);

    RgbaImage::from_fn(out_w, out_h, |px, py| {
        let dx = f64::from(px) + 0.5 - half_out_w;
        let dy = f64::from(py) + 0.5 - half_out_h;
        // Inverse rotation back into the source frame.
        let sx = cos.mul_add(dx, sin * dy) + fw / 2.0;
        let sy = cos.mul_add(dy, -sin * dx) + fh / 2.0;
        if (0.0..=fw).contains(&sx) && (0.0..=fh).contains(&sy) {
            crate::perspective::sample(image, sx - 0.5, sy - 0.5)
        } else {
            image::Rgba([0, 0, 0, 0])
        }
    })
}

/// Rotate the whole image by `degrees`, then crop `rect`.
///
/// The rectangle is mapped to source pixels as in [`apply_crop`] and
/// read from the rotated canvas with the rotation's growth split evenly
/// on both sides, so the crop window stays centered where it was drawn.
/// Parts of the window past the rotated canvas are transparent. A zero
/// rotation is exactly [`apply_crop`].
///
/// # Errors
///
/// Returns [`PipelineError::EmptyRegion`] if the mapped region has zero
/// width or height.
pub fn apply_rotated_crop(
    image: &RgbaImage,
    rect: &CropRect,
    geometry: &DisplayGeometry,
    degrees: i32,
) -> Result<RgbaImage, PipelineError> {
    if degrees.rem_euclid(360) == 0 {
        return apply_crop(image, rect, geometry);
    }
    let (x, y, w, h) = source_region(rect, geometry);
    if w == 0 || h == 0 {
        return Err(PipelineError::EmptyRegion);
    }
    let rotated = rotate_expanded(image, degrees);
    let offset = |grown: u32, original: u32| (i64::from(grown) - i64::from(original)).div_euclid(2);
    let ox = offset(rotated.width(), image.width()) + i64::from(x);
    let oy = offset(rotated.height(), image.height()) + i64::from(y);

    let out = RgbaImage::from_fn(w, h, |i, j| {
        let sx = u32::try_from(ox + i64::from(i)).ok();
        let sy = u32::try_from(oy + i64::from(j)).ok();
        match (sx, sy) {
            (Some(sx), Some(sy)) if sx < rotated.width() && sy < rotated.height() => {
                *rotated.get_pixel(sx, sy)
            }
            _ => image::Rgba([0, 0, 0, 0]),
        }
    });
    debug!(x, y, w, h, degrees, "rotated crop applied");
    Ok(out)
}
