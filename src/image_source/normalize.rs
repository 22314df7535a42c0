//! Rendering of raw sample planes to 8-bit display rasters.
//!
//! - 16-bit and floating-point planes are min-max rescaled to `0..=255`.
//! - 8-bit planes get a percentile stretch followed by a gamma curve; with
//!   the default `0..100` percentiles and `gamma = 1` this is a min-max
//!   rescale of the occupied range.
//!
//! A constant plane renders black, except 8-bit planes which keep their value.

use image::GrayImage;
use ndarray::ArrayView2;

use crate::config::DisplayConfig;

/// Min-max rescale of any numeric plane. Non-finite samples render as 0.
pub fn min_max<T>(plane: ArrayView2<'_, T>) -> GrayImage
where
    T: Copy + Into<f64>,
{
    let (mut lo, mut hi) = (f64::INFINITY, f64::NEG_INFINITY);
    for &v in plane.iter() {
        let v: f64 = v.into();
        if v.is_finite() {
            lo = lo.min(v);
            hi = hi.max(v);
        }
    }
    render(plane, lo, hi, 1.0, 0)
}

/// Percentile stretch plus gamma for 8-bit planes.
pub fn stretch_u8(plane: ArrayView2<'_, u8>, display: &DisplayConfig) -> GrayImage {
    let mut histogram = [0usize; 256];
    for &v in plane.iter() {
        histogram[v as usize] += 1;
    }
    let lo = percentile(&histogram, display.percentile_low);
    let hi = percentile(&histogram, display.percentile_high);
    if hi <= lo {
        return from_fn(plane, |v| v);
    }
    render(plane, lo as f64, hi as f64, display.gamma, 0)
}

/// Smallest value whose cumulative count reaches `p` percent of the samples.
fn percentile(histogram: &[usize; 256], p: f64) -> u8 {
    let total: usize = histogram.iter().sum();
    if total == 0 {
        return 0;
    }
    let target = ((p.clamp(0.0, 100.0) / 100.0) * total as f64).ceil().max(1.0) as usize;
    let mut cumulative = 0;
    for (value, &count) in histogram.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return value as u8;
        }
    }
    255
}

fn render<T>(plane: ArrayView2<'_, T>, lo: f64, hi: f64, gamma: f64, flat: u8) -> GrayImage
where
    T: Copy + Into<f64>,
{
    if hi <= lo {
        return from_fn(plane, |_| flat);
    }
    let scale = hi - lo;
    from_fn(plane, |v| {
        let v: f64 = v.into();
        if !v.is_finite() {
            return 0;
        }
        let t = ((v - lo) / scale).clamp(0.0, 1.0);
        let t = if gamma == 1.0 { t } else { t.powf(gamma) };
        (t * 255.0).round() as u8
    })
}

fn from_fn<T: Copy>(plane: ArrayView2<'_, T>, f: impl Fn(T) -> u8) -> GrayImage {
    let (rows, cols) = plane.dim();
    GrayImage::from_fn(cols as u32, rows as u32, |x, y| {
        image::Luma([f(plane[[y as usize, x as usize]])])
    })
}
