//! Semantic label masks: one 8-bit PNG per image.
//!
//! Every class gets a pixel value from its position in sorted name order
//! (`1..=K`, `0` is background), recorded in `class_mapping.txt`:
//!
//! ```text
//! semantic_labels/<image-stem>_semantic_mask.png
//! semantic_labels/class_mapping.txt
//! ```
//!
//! Where annotations of different classes overlap, the class drawn last wins.
//! Classes are drawn in category id order and annotations in id order within
//! a class, so the result is stable for a given dataset.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use image::{GrayImage, Luma};

use super::model::{Dataset, Image};
use super::CategoryId;
use crate::error::IapError;
use crate::geometry::raster::fill_polygon_with;

pub const SEMANTIC_DIR: &str = "semantic_labels";
const MAPPING_FILE: &str = "class_mapping.txt";

/// Pixel value of every category, by sorted name.
///
/// Fails when there are more classes than an 8-bit mask can tell apart.
pub fn class_values(dataset: &Dataset) -> Result<BTreeMap<CategoryId, u8>, IapError> {
    let mut categories: Vec<_> = dataset.categories.iter().collect();
    if categories.len() > u8::MAX as usize {
        return Err(IapError::ExportFailed {
            slice: SEMANTIC_DIR.to_string(),
            message: format!(
                "{} classes do not fit an 8-bit semantic mask (max {})",
                categories.len(),
                u8::MAX
            ),
        });
    }
    categories.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
    Ok(categories
        .iter()
        .enumerate()
        .map(|(i, c)| (c.id, (i + 1) as u8))
        .collect())
}

pub fn write_semantic_mask(
    root: &Path,
    dataset: &Dataset,
    image: &Image,
    values: &BTreeMap<CategoryId, u8>,
) -> Result<(), IapError> {
    let dir = root.join(SEMANTIC_DIR);
    fs::create_dir_all(&dir).map_err(IapError::Io)?;
    let path = dir.join(format!("{}_semantic_mask.png", image.stem()));
    render_semantic_mask(dataset, image, values)
        .save(&path)
        .map_err(|source| IapError::ImageEncode { path, source })
}

pub fn render_semantic_mask(
    dataset: &Dataset,
    image: &Image,
    values: &BTreeMap<CategoryId, u8>,
) -> GrayImage {
    let mut mask = GrayImage::new(image.width, image.height);
    let mut annotations: Vec<_> = dataset.annotations_of(image.id).collect();
    annotations.sort_by_key(|a| (a.category_id, a.id));
    for annotation in annotations {
        let Some(value) = values.get(&annotation.category_id) else {
            log::warn!(
                "annotation {} has unknown category {}; not drawn",
                annotation.id,
                annotation.category_id
            );
            continue;
        };
        fill_polygon_with(&mut mask, &annotation.geometry.to_polygon(), Luma([*value]));
    }
    mask
}

pub fn write_semantic_mapping(
    root: &Path,
    dataset: &Dataset,
    values: &BTreeMap<CategoryId, u8>,
) -> Result<(), IapError> {
    let dir = root.join(SEMANTIC_DIR);
    fs::create_dir_all(&dir).map_err(IapError::Io)?;

    let mut by_value: Vec<(u8, &str)> = dataset
        .categories
        .iter()
        .filter_map(|c| values.get(&c.id).map(|v| (*v, c.name.as_str())))
        .collect();
    by_value.sort();

    let mut text = String::from("0: background\n");
    for (value, name) in by_value {
        text.push_str(&format!("{value}: {name}\n"));
    }
    fs::write(dir.join(MAPPING_FILE), text).map_err(IapError::Io)
}
