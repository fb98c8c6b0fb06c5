//! Pixel-space box geometry.
//!
//! Boxes are integer `(x1, y1, x2, y2)` corners in the coordinate space of the
//! image they were computed on. `x2`/`y2` are exclusive when a box is used to
//! crop, and inclusive when compared for containment.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub const fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }

    /// True iff `inner` lies fully inside `self`, edges inclusive.
    pub fn contains(&self, inner: &BoundingBox) -> bool {
        contains(self, inner)
    }

    /// Translate a box computed on a crop back into the parent image.
    pub fn offset(&self, dx: i32, dy: i32) -> Self {
        Self {
            x1: self.x1 + dx,
            y1: self.y1 + dy,
            x2: self.x2 + dx,
            y2: self.y2 + dy,
        }
    }

    /// Clamp to `[0, width] x [0, height]`. Keeps `x1 <= x2` and `y1 <= y2`.
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let w = i32::try_from(width).unwrap_or(i32::MAX);
        let h = i32::try_from(height).unwrap_or(i32::MAX);
        let x1 = self.x1.clamp(0, w);
        let y1 = self.y1.clamp(0, h);
        Self {
            x1,
            y1,
            x2: self.x2.clamp(x1, w),
            y2: self.y2.clamp(y1, h),
        }
    }

    /// Crop rectangle `(x, y, width, height)` inside an image, or `None` when
    /// the clipped region has no pixels.
    pub fn crop_rect(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let clipped = self.clamp_to(width, height);
        if clipped.is_empty() {
            return None;
        }
        Some((
            clipped.x1 as u32,
            clipped.y1 as u32,
            clipped.width() as u32,
            clipped.height() as u32,
        ))
    }

    pub fn area(&self) -> i64 {
        if self.is_empty() {
            return 0;
        }
        i64::from(self.width()) * i64::from(self.height())
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let inter = BoundingBox {
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
            x2: self.x2.min(other.x2),
            y2: self.y2.min(other.y2),
        };
        let inter_area = inter.area();
        if inter_area == 0 {
            return 0.0;
        }
        let union = self.area() + other.area() - inter_area;
        if union <= 0 {
            return 0.0;
        }
        inter_area as f32 / union as f32
    }
}

impl From<[i32; 4]> for BoundingBox {
    fn from(v: [i32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

/// Exact containment test, no tolerance.
pub fn contains(outer: &BoundingBox, inner: &BoundingBox) -> bool {
    inner.x1 >= outer.x1 && inner.y1 >= outer.y1 && inner.x2 <= outer.x2 && inner.y2 <= outer.y2
}
