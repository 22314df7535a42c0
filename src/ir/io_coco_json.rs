//! COCO JSON reader and writer.
//!
//! Boxes are `[x, y, width, height]` with `(x, y)` the top-left corner in
//! pixels. Polygons are written as a single outer ring in `segmentation`;
//! box annotations carry an empty `segmentation`, which is how the reader
//! tells the two apart. RLE segmentations are not supported and fall back to
//! the annotation's box.
//!
//! # Deterministic Output
//!
//! The writer sorts images, categories and annotations by id.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::model::{basename, Annotation, Category, Dataset, DatasetInfo, Image};
use super::{AnnotationId, CategoryId, ImageId};
use crate::error::IapError;
use crate::geometry::{BBox, Polygon};
use crate::store::{Geometry, Rgb};

// ============================================================================
// COCO Schema Types (internal to this module)
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct CocoDataset {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    info: Option<CocoInfo>,

    images: Vec<CocoImage>,

    annotations: Vec<CocoAnnotation>,

    categories: Vec<CocoCategory>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CocoInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    date_created: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CocoImage {
    id: u64,
    width: u32,
    height: u32,
    file_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct CocoCategory {
    id: u64,
    name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    supercategory: Option<String>,

    /// Display color; not part of the COCO standard, ignored by other tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    color: Option<Rgb>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CocoAnnotation {
    id: u64,
    image_id: u64,
    category_id: u64,

    bbox: [f64; 4],

    #[serde(default, skip_serializing_if = "Option::is_none")]
    area: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    iscrowd: Option<u8>,

    /// Polygon rings, or an RLE object that is ignored.
    #[serde(default)]
    segmentation: serde_json::Value,

    /// Per-(image, category) ordinal, written so numbering survives a round trip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    number: Option<u32>,
}

// ============================================================================
// Public API
// ============================================================================

/// Reads a dataset from a COCO JSON file.
///
/// ```no_run
/// use std::path::Path;
/// use iapkit::ir::io_coco_json::read_coco_json;
///
/// let dataset = read_coco_json(Path::new("annotations.json"))?;
/// # Ok::<(), iapkit::IapError>(())
/// ```
pub fn read_coco_json(path: &Path) -> Result<Dataset, IapError> {
    let file = File::open(path).map_err(IapError::Io)?;
    let reader = BufReader::new(file);

    let coco: CocoDataset =
        serde_json::from_reader(reader).map_err(|source| IapError::CocoJsonParse {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(coco_to_ir(coco))
}

/// Writes a dataset to a COCO JSON file.
pub fn write_coco_json(path: &Path, dataset: &Dataset) -> Result<(), IapError> {
    let file = File::create(path).map_err(IapError::Io)?;
    let writer = BufWriter::new(file);

    let coco = ir_to_coco(dataset);

    serde_json::to_writer_pretty(writer, &coco).map_err(|source| IapError::CocoJsonWrite {
        path: path.to_path_buf(),
        source,
    })
}

pub fn from_coco_str(json: &str) -> Result<Dataset, serde_json::Error> {
    let coco: CocoDataset = serde_json::from_str(json)?;
    Ok(coco_to_ir(coco))
}

/// Reads from raw bytes; used by the fuzz target.
pub fn from_coco_slice(bytes: &[u8]) -> Result<Dataset, serde_json::Error> {
    let coco: CocoDataset = serde_json::from_slice(bytes)?;
    Ok(coco_to_ir(coco))
}

pub fn to_coco_string(dataset: &Dataset) -> Result<String, serde_json::Error> {
    let coco = ir_to_coco(dataset);
    serde_json::to_string_pretty(&coco)
}

// ============================================================================
// Conversion: COCO -> IR
// ============================================================================

fn coco_to_ir(coco: CocoDataset) -> Dataset {
    let info = coco
        .info
        .map(|i| DatasetInfo {
            description: i.description,
            date_created: i.date_created,
        })
        .unwrap_or_default();

    let images = coco
        .images
        .into_iter()
        .map(|img| {
            let key = basename(&img.file_name).to_string();
            Image::new(img.id, img.file_name, img.width, img.height).with_key(key)
        })
        .collect();

    let categories = coco
        .categories
        .into_iter()
        .map(|cat| Category {
            id: CategoryId::new(cat.id),
            name: cat.name,
            color: cat.color,
        })
        .collect();

    let annotations = coco
        .annotations
        .into_iter()
        .filter_map(|ann| {
            let geometry = match first_ring(&ann.segmentation) {
                Some(polygon) => Geometry::Polygon(polygon),
                None => {
                    let [x, y, w, h] = ann.bbox;
                    let bbox = BBox::new(x, y, w, h);
                    if !bbox.is_positive() {
                        log::warn!("skipping COCO annotation {} with empty bbox", ann.id);
                        return None;
                    }
                    Geometry::BBox(bbox)
                }
            };
            let mut annotation = Annotation::new(
                AnnotationId::new(ann.id),
                ImageId::new(ann.image_id),
                CategoryId::new(ann.category_id),
                geometry,
            );
            annotation.number = ann.number;
            Some(annotation)
        })
        .collect();

    Dataset {
        info,
        images,
        categories,
        annotations,
    }
}

/// The first polygon ring of a COCO `segmentation`, if it has one.
fn first_ring(segmentation: &serde_json::Value) -> Option<Polygon> {
    let rings = segmentation.as_array()?;
    let ring = rings.first()?.as_array()?;
    let coords: Option<Vec<f64>> = ring.iter().map(serde_json::Value::as_f64).collect();
    Polygon::new(coords?).ok()
}

// ============================================================================
// Conversion: IR -> COCO
// ============================================================================

fn ir_to_coco(dataset: &Dataset) -> CocoDataset {
    let info = Some(CocoInfo {
        description: dataset.info.description.clone(),
        date_created: dataset.info.date_created.clone(),
    });

    let mut images: Vec<CocoImage> = dataset
        .images
        .iter()
        .map(|img| CocoImage {
            id: img.id.as_u64(),
            width: img.width,
            height: img.height,
            file_name: img.file_name.clone(),
        })
        .collect();
    images.sort_by_key(|i| i.id);

    let mut categories: Vec<CocoCategory> = dataset
        .categories
        .iter()
        .map(|cat| CocoCategory {
            id: cat.id.as_u64(),
            name: cat.name.clone(),
            supercategory: None,
            color: cat.color,
        })
        .collect();
    categories.sort_by_key(|c| c.id);

    let mut annotations: Vec<CocoAnnotation> = dataset
        .annotations
        .iter()
        .map(|ann| {
            let bbox = ann.geometry.bbox();
            let segmentation = match &ann.geometry {
                Geometry::Polygon(p) => serde_json::json!([p.coords()]),
                Geometry::BBox(_) => serde_json::Value::Array(vec![]),
            };
            CocoAnnotation {
                id: ann.id.as_u64(),
                image_id: ann.image_id.as_u64(),
                category_id: ann.category_id.as_u64(),
                bbox: bbox.to_array(),
                area: Some(ann.area()),
                iscrowd: Some(0),
                segmentation,
                number: ann.number,
            }
        })
        .collect();
    annotations.sort_by_key(|a| a.id);

    CocoDataset {
        info,
        images,
        annotations,
        categories,
    }
}

// ============================================================================
// Tests
// ============================================================================
