//! Weight-free reference back end built on Otsu thresholding.
//!
//! Box prompts threshold the box contents and keep the side that differs from
//! the box border. Point prompts threshold the whole image and keep the
//! connected regions under positive points that contain no negative point.

use std::path::Path;

use image::{DynamicImage, GrayImage, Luma, RgbImage};
use imageproc::contrast::otsu_level;
use imageproc::region_labelling::{connected_components, Connectivity};

use super::{MaskPrediction, ModelId, Prompt, SegmentationBackend};
use crate::error::IapError;
use crate::geometry::Point;

#[derive(Debug, Default)]
pub struct OtsuBackend {
    model: Option<ModelId>,
}

impl OtsuBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SegmentationBackend for OtsuBackend {
    fn load(&mut self, model: ModelId, _weights: Option<&Path>) -> Result<(), IapError> {
        self.model = Some(model);
        Ok(())
    }

    fn segment(&mut self, image: &RgbImage, prompt: &Prompt) -> Result<Option<MaskPrediction>, IapError> {
        if self.model.is_none() {
            return Err(IapError::predictor("no model loaded"));
        }
        let gray = DynamicImage::ImageRgb8(image.clone()).to_luma8();
        let result = match prompt {
            Prompt::BBox(b) => segment_box(&gray, b.x, b.y, b.xmax(), b.ymax()),
            Prompt::Points { positive, negative } => segment_points(&gray, positive, negative),
        };
        Ok(result)
    }
}

fn clamp_px(v: f64, limit: u32) -> u32 {
    (v.round().max(0.0) as u32).min(limit)
}

fn segment_box(gray: &GrayImage, x0: f64, y0: f64, x1: f64, y1: f64) -> Option<MaskPrediction> {
    let (w, h) = gray.dimensions();
    let (x0, y0) = (clamp_px(x0, w), clamp_px(y0, h));
    let (x1, y1) = (clamp_px(x1, w), clamp_px(y1, h));
    if x1 <= x0 + 1 || y1 <= y0 + 1 {
        return None;
    }
    let crop = image::imageops::crop_imm(gray, x0, y0, x1 - x0, y1 - y0).to_image();
    let level = otsu_level(&crop);

    let (cw, ch) = crop.dimensions();
    let border: Vec<u8> = crop
        .enumerate_pixels()
        .filter(|(x, y, _)| *x == 0 || *y == 0 || *x == cw - 1 || *y == ch - 1)
        .map(|(_, _, p)| p[0])
        .collect();
    let border_bright = mean(&border) > level as f64;

    let mut mask = GrayImage::new(w, h);
    let (mut fg, mut bg) = (Vec::new(), Vec::new());
    for (x, y, p) in crop.enumerate_pixels() {
        let object = if border_bright { p[0] <= level } else { p[0] > level };
        if object {
            mask.put_pixel(x0 + x, y0 + y, Luma([255]));
            fg.push(p[0]);
        } else {
            bg.push(p[0]);
        }
    }
    if fg.is_empty() {
        return None;
    }
    Some(MaskPrediction {
        mask,
        score: separation(&fg, &bg),
        label: None,
    })
}

fn segment_points(gray: &GrayImage, positive: &[Point], negative: &[Point]) -> Option<MaskPrediction> {
    let (w, h) = gray.dimensions();
    let inside = |p: &Point| p.x >= 0.0 && p.y >= 0.0 && (p.x as u32) < w && (p.y as u32) < h;
    let seed = positive.iter().find(|p| inside(p))?;
    let level = otsu_level(gray);
    let seed_bright = gray.get_pixel(seed.x as u32, seed.y as u32)[0] > level;

    let mut binary = GrayImage::new(w, h);
    for (x, y, p) in gray.enumerate_pixels() {
        if (p[0] > level) == seed_bright {
            binary.put_pixel(x, y, Luma([255]));
        }
    }
    let labels = connected_components(&binary, Connectivity::Eight, Luma([0]));
    let label_at = |p: &Point| labels.get_pixel(p.x as u32, p.y as u32)[0];

    let rejected: Vec<u32> = negative.iter().filter(|p| inside(p)).map(label_at).collect();
    let mut keep: Vec<u32> = positive
        .iter()
        .filter(|p| inside(p))
        .map(label_at)
        .filter(|&l| l != 0 && !rejected.contains(&l))
        .collect();
    keep.sort_unstable();
    keep.dedup();
    if keep.is_empty() {
        return None;
    }

    let mut mask = GrayImage::new(w, h);
    let (mut fg, mut bg) = (Vec::new(), Vec::new());
    for (x, y, l) in labels.enumerate_pixels() {
        let v = gray.get_pixel(x, y)[0];
        if keep.binary_search(&l[0]).is_ok() {
            mask.put_pixel(x, y, Luma([255]));
            fg.push(v);
        } else {
            bg.push(v);
        }
    }
    Some(MaskPrediction {
        mask,
        score: separation(&fg, &bg),
        label: None,
    })
}

fn mean(values: &[u8]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(|&v| v as f64).sum::<f64>() / values.len() as f64
}

/// Mean intensity gap between object and background, in `[0, 1]`.
fn separation(fg: &[u8], bg: &[u8]) -> f64 {
    if bg.is_empty() {
        return 1.0;
    }
    ((mean(fg) - mean(bg)).abs() / 255.0).clamp(0.0, 1.0)
}
