//! Frame geometry — rotation, aspect cropping, screen/frame coordinate mapping.
//!
//! All transforms are pure: they read a frame and return a new one.

use crate::frame::Frame;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Width / height of the on-screen guide frame (3:4 portrait).
pub const GUIDE_ASPECT: f32 = 3.0 / 4.0;

// Guide frame occupies at most 80% of viewport width and 60% of its height.
const GUIDE_MAX_WIDTH_PCT: f32 = 0.8;
const GUIDE_MAX_HEIGHT_PCT: f32 = 0.6;

#[derive(Error, Debug, PartialEq)]
pub enum GeometryError {
    #[error("unsupported rotation: {0} degrees (expected -90, 90, 180 or 270)")]
    UnsupportedRotation(i32),
    #[error("invalid aspect ratio: {0}")]
    InvalidAspect(f32),
    #[error("empty frame")]
    EmptyFrame,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn is_landscape(&self) -> bool {
        self.width > self.height
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }
}

/// Rotation by a multiple of 90 degrees. Positive is clockwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Ccw90,
    Cw90,
    Half,
    Cw270,
}

impl Rotation {
    pub fn degrees(self) -> i32 {
        match self {
            Rotation::Ccw90 => -90,
            Rotation::Cw90 => 90,
            Rotation::Half => 180,
            Rotation::Cw270 => 270,
        }
    }
}

impl TryFrom<i32> for Rotation {
    type Error = GeometryError;

    fn try_from(degrees: i32) -> Result<Self, Self::Error> {
        match degrees {
            -90 => Ok(Rotation::Ccw90),
            90 => Ok(Rotation::Cw90),
            180 => Ok(Rotation::Half),
            270 => Ok(Rotation::Cw270),
            other => Err(GeometryError::UnsupportedRotation(other)),
        }
    }
}

/// Rotate a frame about its centre.
pub fn rotate(frame: &Frame, rotation: Rotation) -> Frame {
    let img = frame.image();
    let rotated = match rotation {
        // -90 and 270 are the same turn.
        Rotation::Ccw90 | Rotation::Cw270 => img.rotate270(),
        Rotation::Cw90 => img.rotate90(),
        Rotation::Half => img.rotate180(),
    };
    frame.with_image(rotated)
}

/// Integer crop region in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Centered crop box of aspect `target_ratio` (width / height).
///
/// A source wider than the target loses its left/right edges; a taller one
/// loses top/bottom.
pub fn crop_box_for_aspect(width: u32, height: u32, target_ratio: f32) -> Result<CropBox, GeometryError> {
    if !(target_ratio.is_finite() && target_ratio > 0.0) {
        return Err(GeometryError::InvalidAspect(target_ratio));
    }
    if width == 0 || height == 0 {
        return Err(GeometryError::EmptyFrame);
    }

    let (w, h) = (width as f32, height as f32);
    let (crop_w, crop_h) = if w / h > target_ratio {
        ((h * target_ratio).round().clamp(1.0, w), h)
    } else {
        (w, (w / target_ratio).round().clamp(1.0, h))
    };
    let crop_w = crop_w as u32;
    let crop_h = crop_h as u32;

    Ok(CropBox {
        x: (width - crop_w) / 2,
        y: (height - crop_h) / 2,
        width: crop_w,
        height: crop_h,
    })
}

/// Crop a frame to the given aspect ratio around its centre.
///
/// With [`GUIDE_ASPECT`] this is the landscape-to-portrait crop applied to
/// every captured still.
pub fn crop_to_aspect(frame: &Frame, target_ratio: f32) -> Result<Frame, GeometryError> {
    let b = crop_box_for_aspect(frame.width(), frame.height(), target_ratio)?;
    if (b.width, b.height) == (frame.width(), frame.height()) {
        return Ok(frame.clone());
    }
    tracing::debug!(
        from_w = frame.width(),
        from_h = frame.height(),
        x = b.x,
        y = b.y,
        w = b.width,
        h = b.height,
        "crop to aspect"
    );
    Ok(frame.with_image(frame.image().crop_imm(b.x, b.y, b.width, b.height)))
}

/// Guide-frame rectangle for a viewport: 3:4, centred, bounded by
/// 80% of the width and 60% of the height.
pub fn guide_frame(viewport: Size) -> Rect {
    let width = (viewport.width * GUIDE_MAX_WIDTH_PCT).min(viewport.height * GUIDE_MAX_HEIGHT_PCT);
    let height = width / GUIDE_ASPECT;
    Rect::new(
        (viewport.width - width) / 2.0,
        (viewport.height - height) / 2.0,
        width,
        height,
    )
}

/// Scale a rectangle given in screen coordinates into frame pixel coordinates.
///
/// When `is_rotated` the frame is displayed turned -90 degrees, the same
/// rotation the capture pipeline applies: screen x runs along frame y, and
/// screen y runs along frame x from the right edge.
pub fn map_screen_rect_to_frame(screen_rect: Rect, frame_size: Size, screen_size: Size, is_rotated: bool) -> Rect {
    if is_rotated {
        let sx = frame_size.width / screen_size.height;
        let sy = frame_size.height / screen_size.width;
        Rect::new(
            frame_size.width - screen_rect.bottom() * sx,
            screen_rect.x * sy,
            screen_rect.height * sx,
            screen_rect.width * sy,
        )
    } else {
        let sx = frame_size.width / screen_size.width;
        let sy = frame_size.height / screen_size.height;
        Rect::new(
            screen_rect.x * sx,
            screen_rect.y * sy,
            screen_rect.width * sx,
            screen_rect.height * sy,
        )
    }
}

/// Whether `face` lies within `guide`, allowing it to overhang each edge by
/// `tolerance` times its own size.
pub fn is_within_guide(face: Rect, guide: Rect, tolerance: f32) -> bool {
    let tol_w = face.width * tolerance;
    let tol_h = face.height * tolerance;
    face.x > guide.x - tol_w
        && face.y > guide.y - tol_h
        && face.right() < guide.right() + tol_w
        && face.bottom() < guide.bottom() + tol_h
}
