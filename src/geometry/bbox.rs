//! Axis-aligned bounding boxes in `(x, y, width, height)` form.

use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

use super::{Normalized, Pixel, Point};

/// An axis-aligned box anchored at its top-left corner.
///
/// The `TSpace` parameter is either [`Pixel`] or [`Normalized`]. Construction
/// does not reject empty or inverted boxes; callers that need a committed
/// annotation check [`BBox::is_positive`].
#[derive(Clone, Copy, PartialEq)]
pub struct BBox<TSpace> {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    _space: PhantomData<TSpace>,
}

impl<TSpace> BBox<TSpace> {
    #[inline]
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
            _space: PhantomData,
        }
    }

    /// Builds the box spanned by two arbitrary corners (e.g. a drag gesture).
    pub fn from_corners(a: Point, b: Point) -> Self {
        let x = a.x.min(b.x);
        let y = a.y.min(b.y);
        Self::new(x, y, (a.x - b.x).abs(), (a.y - b.y).abs())
    }

    /// Converts from center-based `(cx, cy, w, h)`, as used by YOLO labels.
    #[inline]
    pub fn from_cxcywh(cx: f64, cy: f64, width: f64, height: f64) -> Self {
        Self::new(cx - width / 2.0, cy - height / 2.0, width, height)
    }

    #[inline]
    pub fn to_cxcywh(&self) -> (f64, f64, f64, f64) {
        (
            self.x + self.width / 2.0,
            self.y + self.height / 2.0,
            self.width,
            self.height,
        )
    }

    #[inline]
    pub fn xmax(&self) -> f64 {
        self.x + self.width
    }

    #[inline]
    pub fn ymax(&self) -> f64 {
        self.y + self.height
    }

    #[inline]
    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    /// True when both sides are strictly positive and finite.
    #[inline]
    pub fn is_positive(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }

    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x && p.x <= self.xmax() && p.y >= self.y && p.y <= self.ymax()
    }

    /// Corners in clockwise order starting at the top-left.
    pub fn corners(&self) -> [Point; 4] {
        [
            Point::new(self.x, self.y),
            Point::new(self.xmax(), self.y),
            Point::new(self.xmax(), self.ymax()),
            Point::new(self.x, self.ymax()),
        ]
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.x, self.y, self.width, self.height]
    }
}

impl<TSpace> std::fmt::Debug for BBox<TSpace> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BBox")
            .field("x", &self.x)
            .field("y", &self.y)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

impl<TSpace> Default for BBox<TSpace> {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0)
    }
}

// Serialized as the flat `[x, y, w, h]` array shared by COCO and the project file.
impl<TSpace> Serialize for BBox<TSpace> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_array().serialize(serializer)
    }
}

impl<'de, TSpace> Deserialize<'de> for BBox<TSpace> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let [x, y, w, h] = <[f64; 4]>::deserialize(deserializer)?;
        Ok(BBox::new(x, y, w, h))
    }
}

impl BBox<Pixel> {
    pub fn to_normalized(&self, image_width: f64, image_height: f64) -> BBox<Normalized> {
        BBox::new(
            self.x / image_width,
            self.y / image_height,
            self.width / image_width,
            self.height / image_height,
        )
    }

    /// Rounds every component to the nearest integer pixel. A positive
    /// extent never rounds below one pixel.
    pub fn rounded(&self) -> Self {
        let extent = |v: f64| if v > 0.0 { v.round().max(1.0) } else { v.round() };
        BBox::new(
            self.x.round(),
            self.y.round(),
            extent(self.width),
            extent(self.height),
        )
    }
}

impl BBox<Normalized> {
    pub fn to_pixel(&self, image_width: f64, image_height: f64) -> BBox<Pixel> {
        BBox::new(
            self.x * image_width,
            self.y * image_height,
            self.width * image_width,
            self.height * image_height,
        )
    }
}
