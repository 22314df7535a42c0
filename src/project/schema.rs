//! On-disk layout of a `.iap` project file.
//!
//! The document is JSON. Coordinates are written integer-rounded; every
//! annotation repeats its class name and id so that a file can be read
//! without consulting the class list first.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::geometry::{BBox, Pixel, Polygon};
use crate::image_source::DimensionAssignment;
use crate::store::{Annotation, ClassId, Geometry, Rgb};

// ============================================================================
// Project document
// ============================================================================

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectFile {
    pub classes: Vec<ClassRecord>,
    pub images: Vec<ImageRecord>,
    /// Basename -> in-project copy, relative to the project directory.
    #[serde(default)]
    pub image_paths: BTreeMap<String, String>,
    #[serde(default)]
    pub creation_date: String,
    #[serde(default)]
    pub last_modified: String,
    #[serde(default)]
    pub notes: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassRecord {
    pub name: String,
    pub color: Rgb,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub file_name: String,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub is_multi_slice: bool,
    /// Axis labels of a multi-slice image, one per axis of `shape`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<DimensionAssignment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<Vec<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slices: Option<Vec<SliceRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Vec<AnnotationRecord>>,
}

impl ImageRecord {
    /// Prefix under which this image's slice keys live.
    pub fn purge_base(&self) -> String {
        if self.is_multi_slice {
            crate::image_source::base_name(&self.file_name)
        } else {
            self.file_name.clone()
        }
    }

    /// `(slice key, annotations)` pairs, whichever form the record uses.
    pub fn keyed_annotations(&self) -> Vec<(&str, &[AnnotationRecord])> {
        match (&self.slices, &self.annotations) {
            (Some(slices), _) => slices
                .iter()
                .map(|s| (s.name.as_str(), s.annotations.as_slice()))
                .collect(),
            (None, Some(annotations)) => vec![(self.file_name.as_str(), annotations.as_slice())],
            (None, None) => Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SliceRecord {
    pub name: String,
    pub annotations: Vec<AnnotationRecord>,
}

// ============================================================================
// Annotations
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeType {
    Polygon,
    #[serde(rename = "bbox")]
    BBox,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub category_id: u32,
    pub category_name: String,
    pub number: u32,
    #[serde(rename = "type")]
    pub shape_type: ShapeType,
    /// Flat `[x1, y1, x2, y2, ...]`; present for polygons.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segmentation: Option<Vec<f64>>,
    /// `[x, y, width, height]`.
    pub bbox: [f64; 4],
    pub area: f64,
}

impl AnnotationRecord {
    pub fn from_annotation(annotation: &Annotation) -> Self {
        let geometry = annotation.geometry.rounded();
        let (shape_type, segmentation) = match &geometry {
            Geometry::Polygon(p) => (ShapeType::Polygon, Some(p.coords().to_vec())),
            Geometry::BBox(_) => (ShapeType::BBox, None),
        };
        Self {
            category_id: annotation.class_id.as_u32(),
            category_name: annotation.class_name.clone(),
            number: annotation.number,
            shape_type,
            segmentation,
            bbox: geometry.bbox().to_array(),
            area: geometry.area(),
        }
    }

    /// Rebuilds the store record, rounding coordinates. `None` when the
    /// stored geometry is unusable.
    pub fn to_annotation(&self, class_id: ClassId) -> Option<Annotation> {
        let geometry = match (self.shape_type, &self.segmentation) {
            (ShapeType::Polygon, Some(coords)) => {
                Geometry::Polygon(Polygon::new(coords.clone()).ok()?.rounded())
            }
            _ => {
                let [x, y, w, h] = self.bbox;
                let bbox = BBox::<Pixel>::new(x, y, w, h);
                if !bbox.is_positive() {
                    return None;
                }
                Geometry::BBox(bbox.rounded())
            }
        };
        Some(Annotation::new(class_id, self.category_name.clone(), geometry).with_number(self.number))
    }
}
