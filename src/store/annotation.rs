//! Annotation records held by the store.

use serde::{Deserialize, Serialize};

use super::ClassId;
use crate::geometry::{BBox, Pixel, Point, Polygon};

/// The single geometry an annotation carries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Geometry {
    Polygon(Polygon),
    #[serde(rename = "bbox")]
    BBox(BBox<Pixel>),
}

impl Geometry {
    pub fn area(&self) -> f64 {
        match self {
            Geometry::Polygon(p) => p.area(),
            Geometry::BBox(b) => b.area(),
        }
    }

    pub fn bbox(&self) -> BBox<Pixel> {
        match self {
            Geometry::Polygon(p) => p.bbox(),
            Geometry::BBox(b) => *b,
        }
    }

    /// The polygon itself, or the four corners of a box.
    pub fn to_polygon(&self) -> Polygon {
        match self {
            Geometry::Polygon(p) => p.clone(),
            Geometry::BBox(b) => Polygon::from_bbox(b),
        }
    }

    pub fn contains(&self, p: Point) -> bool {
        match self {
            Geometry::Polygon(poly) => poly.contains(p),
            Geometry::BBox(b) => b.contains(p),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Geometry::Polygon(_) => "polygon",
            Geometry::BBox(_) => "bbox",
        }
    }

    /// Integer-rounded copy, as written to the project file.
    pub fn rounded(&self) -> Self {
        match self {
            Geometry::Polygon(p) => Geometry::Polygon(p.rounded()),
            Geometry::BBox(b) => Geometry::BBox(b.rounded()),
        }
    }
}

/// A committed annotation.
///
/// `class_name` and `class_id` are denormalized from the registry; the store
/// keeps them in sync on rename and delete.
#[derive(Clone, Debug, PartialEq)]
pub struct Annotation {
    pub class_id: ClassId,
    pub class_name: String,
    /// 1-based ordinal, unique within its (slice, class) list.
    pub number: u32,
    pub geometry: Geometry,
}

impl Annotation {
    /// An annotation whose ordinal is assigned when it is put in the store.
    pub fn new(class_id: ClassId, class_name: impl Into<String>, geometry: Geometry) -> Self {
        Self {
            class_id,
            class_name: class_name.into(),
            number: 0,
            geometry,
        }
    }

    pub fn with_number(mut self, number: u32) -> Self {
        self.number = number;
        self
    }

    pub fn area(&self) -> f64 {
        self.geometry.area()
    }

    pub fn bbox(&self) -> BBox<Pixel> {
        self.geometry.bbox()
    }

    /// `class-number` label shown next to the shape.
    pub fn label(&self) -> String {
        format!("{}-{}", self.class_name, self.number)
    }
}
