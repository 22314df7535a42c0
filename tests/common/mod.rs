#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use iapkit::geometry::{BBox, Polygon};
use iapkit::store::{Annotation, Geometry};
use iapkit::{Config, Project};
use image::{GrayImage, Luma};
use tiff::encoder::{colortype, TiffEncoder};

pub fn write_png(path: &Path, width: u32, height: u32) -> PathBuf {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dir");
    }
    GrayImage::from_fn(width, height, |x, y| Luma([((x + y) % 256) as u8]))
        .save(path)
        .expect("write png file");
    path.to_path_buf()
}

/// Multi-page 8-bit TIFF: `pages` frames of `width`x`height`.
pub fn write_tiff_stack(path: &Path, pages: u8, width: u32, height: u32) -> PathBuf {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dir");
    }
    let file = fs::File::create(path).expect("create tiff");
    let mut encoder = TiffEncoder::new(file).expect("tiff encoder");
    for page in 0..pages {
        let data: Vec<u8> = (0..width * height)
            .map(|i| (i as u8).wrapping_mul(3).wrapping_add(page * 40))
            .collect();
        encoder
            .write_image::<colortype::Gray8>(width, height, &data)
            .expect("write tiff page");
    }
    path.to_path_buf()
}

/// Default configuration with auto-save off.
pub fn quiet_config() -> Config {
    let mut config = Config::default();
    config.project.autosave = false;
    config
}

pub fn square(x: f64, y: f64, side: f64) -> Geometry {
    Geometry::Polygon(
        Polygon::new(vec![x, y, x + side, y, x + side, y + side, x, y + side])
            .expect("square polygon"),
    )
}

pub fn bbox(x: f64, y: f64, w: f64, h: f64) -> Geometry {
    Geometry::BBox(BBox::new(x, y, w, h))
}

/// Puts `geometry` on `slice` under the registered class `class`.
pub fn put(project: &mut Project, slice: &str, class: &str, geometry: Geometry) -> u32 {
    let store = project.store_mut();
    let id = store.registry().id_of(class).expect("class registered");
    store
        .put(slice, Annotation::new(id, class, geometry))
        .expect("put annotation")
}
