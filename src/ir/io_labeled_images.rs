//! Labeled-image masks: one 16-bit PNG per (image, class).
//!
//! Layout under the output root:
//!
//! ```text
//! labeled_images/<class>/<image-stem>_mask.png
//! labeled_images/class_summary.txt
//! ```
//!
//! Each annotation fills its pixels with its ordinal, so objects of one class
//! stay separable. Boxes are filled as rectangles. Masks are only written for
//! classes that have at least one annotation on the image. The format is
//! write-only: polygons are not recovered from it.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use image::{ImageBuffer, Luma};

use super::model::{Category, Dataset, Image};
use super::CategoryId;
use crate::error::IapError;
use crate::geometry::raster::fill_polygon_with;

pub const LABELED_DIR: &str = "labeled_images";
const SUMMARY_FILE: &str = "class_summary.txt";

pub type LabelMask = ImageBuffer<Luma<u16>, Vec<u16>>;

/// Masks for one image. Returns how many files were written.
pub fn write_labeled_image(root: &Path, dataset: &Dataset, image: &Image) -> Result<usize, IapError> {
    let masks = render_label_masks(dataset, image);
    for (category_id, mask) in &masks {
        let Some(category) = dataset.category(*category_id) else {
            continue;
        };
        let path = mask_path(root, category, image);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(IapError::Io)?;
        }
        mask.save(&path).map_err(|source| IapError::ImageEncode {
            path: path.clone(),
            source,
        })?;
    }
    Ok(masks.len())
}

/// Rasterizes the annotations of `image`, one mask per category present.
///
/// Pixels hold the annotation ordinal, falling back to the 1-based position
/// within the class when the dataset carries no ordinals. Later annotations
/// overwrite earlier ones where they overlap.
pub fn render_label_masks(dataset: &Dataset, image: &Image) -> BTreeMap<CategoryId, LabelMask> {
    let mut masks: BTreeMap<CategoryId, LabelMask> = BTreeMap::new();
    let mut counters: BTreeMap<CategoryId, u32> = BTreeMap::new();

    let mut annotations: Vec<_> = dataset.annotations_of(image.id).collect();
    annotations.sort_by_key(|a| a.id);
    for annotation in annotations {
        let counter = counters.entry(annotation.category_id).or_insert(0);
        *counter += 1;
        let value = annotation.number.unwrap_or(*counter).min(u16::MAX as u32) as u16;

        let mask = masks
            .entry(annotation.category_id)
            .or_insert_with(|| LabelMask::new(image.width, image.height));
        fill_polygon_with(mask, &annotation.geometry.to_polygon(), Luma([value]));
    }
    masks
}

pub fn write_labeled_summary(root: &Path, dataset: &Dataset) -> Result<(), IapError> {
    let dir = root.join(LABELED_DIR);
    fs::create_dir_all(&dir).map_err(IapError::Io)?;

    let names = dataset.category_names();
    let mut text = String::from("Labeled image export\n");
    text.push_str("Pixel values are per-class annotation numbers; 0 is background.\n");
    text.push_str(&format!("Classes ({}):\n", names.len()));
    for name in names {
        text.push_str(&format!("  {name}\n"));
    }
    fs::write(dir.join(SUMMARY_FILE), text).map_err(IapError::Io)
}

fn mask_path(root: &Path, category: &Category, image: &Image) -> PathBuf {
    root.join(LABELED_DIR)
        .join(dir_safe(&category.name))
        .join(format!("{}_mask.png", image.stem()))
}

/// Class names become directory names; path separators are replaced.
pub(crate) fn dir_safe(name: &str) -> String {
    name.chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
        .collect()
}
