//! Decoders for the raw N-D sample arrays behind multi-slice images.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use image::GrayImage;
use ndarray::{ArrayD, ArrayViewD, Axis, Ix2};
use ndarray_npy::{read_npy, ReadNpyError, ReadableElement};
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;
use tiff::ColorType;

use super::normalize::{min_max, stretch_u8};
use crate::config::DisplayConfig;
use crate::error::IapError;

/// Raw samples of an N-D image in row-major order.
#[derive(Clone, Debug, PartialEq)]
pub enum Volume {
    U8(ArrayD<u8>),
    U16(ArrayD<u16>),
    F32(ArrayD<f32>),
}

impl Volume {
    pub fn shape(&self) -> &[usize] {
        match self {
            Volume::U8(a) => a.shape(),
            Volume::U16(a) => a.shape(),
            Volume::F32(a) => a.shape(),
        }
    }

    /// Renders one 2-D plane.
    ///
    /// `fixed` pins every non-spatial axis to an index; the two remaining
    /// axes are `h_axis` and `w_axis` (original numbering).
    pub fn render_plane(
        &self,
        fixed: &[(usize, usize)],
        h_axis: usize,
        w_axis: usize,
        display: &DisplayConfig,
    ) -> Result<GrayImage, String> {
        match self {
            Volume::U8(a) => {
                plane(a.view(), fixed, h_axis, w_axis).map(|p| stretch_u8(p.view(), display))
            }
            Volume::U16(a) => plane(a.view(), fixed, h_axis, w_axis).map(|p| min_max(p.view())),
            Volume::F32(a) => plane(a.view(), fixed, h_axis, w_axis).map(|p| min_max(p.view())),
        }
    }
}

fn plane<T: Copy>(
    view: ArrayViewD<'_, T>,
    fixed: &[(usize, usize)],
    h_axis: usize,
    w_axis: usize,
) -> Result<ndarray::Array2<T>, String> {
    let mut pinned: Vec<(usize, usize)> = fixed.to_vec();
    pinned.sort_unstable_by(|a, b| b.0.cmp(&a.0));
    let mut view = view;
    for (axis, index) in pinned {
        if axis >= view.ndim() || index >= view.len_of(Axis(axis)) {
            return Err(format!("index {index} out of range on axis {axis}"));
        }
        view = view.index_axis_move(Axis(axis), index);
    }
    let view = view
        .into_dimensionality::<Ix2>()
        .map_err(|e| format!("slice is not two-dimensional: {e}"))?;
    let view = if h_axis > w_axis {
        view.reversed_axes()
    } else {
        view
    };
    Ok(view.to_owned())
}

/// Page layout of a TIFF file, read without decoding pixel data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TiffLayout {
    pub pages: usize,
    /// Axes the page sequence unfolds into, outermost first. An ImageJ
    /// hyperstack gives e.g. `[frames, slices]`; otherwise `[pages]`.
    pub stack: Vec<usize>,
    pub width: u32,
    pub height: u32,
    pub samples: usize,
}

impl TiffLayout {
    /// Stack axes lead, samples trail; singleton axes are omitted.
    pub fn shape(&self) -> Vec<usize> {
        let mut shape: Vec<usize> = self.stack.iter().copied().filter(|&n| n > 1).collect();
        shape.push(self.height as usize);
        shape.push(self.width as usize);
        if self.samples > 1 {
            shape.push(self.samples);
        }
        shape
    }
}

/// Leading axes declared by an ImageJ `ImageDescription`.
///
/// ImageJ stores hyperstack pages with channels varying fastest, then
/// slices, then frames, so the row-major shape is `[frames, slices,
/// channels]`. `None` when the description is not ImageJ's or its counts do
/// not multiply to `pages`.
fn imagej_stack(description: &str, pages: usize) -> Option<Vec<usize>> {
    let mut counts = [1usize; 3];
    let mut imagej = false;
    for line in description.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let slot = match key.trim() {
            "ImageJ" => {
                imagej = true;
                continue;
            }
            "frames" => 0,
            "slices" => 1,
            "channels" => 2,
            _ => continue,
        };
        counts[slot] = value.trim().parse().ok().filter(|&n: &usize| n > 0)?;
    }
    if !imagej || counts.iter().product::<usize>() != pages {
        return None;
    }
    Some(counts.to_vec())
}

fn open_tiff(path: &Path) -> Result<Decoder<BufReader<File>>, IapError> {
    let file = File::open(path)?;
    Decoder::new(BufReader::new(file))
        .map(|d| d.with_limits(Limits::unlimited()))
        .map_err(|source| IapError::TiffDecode {
            path: path.to_path_buf(),
            source,
        })
}

fn samples_of(path: &Path, color: ColorType) -> Result<usize, IapError> {
    match color {
        ColorType::Gray(_) => Ok(1),
        ColorType::GrayA(_) => Ok(2),
        ColorType::RGB(_) => Ok(3),
        ColorType::RGBA(_) => Ok(4),
        other => Err(IapError::DecodeFailed {
            path: path.to_path_buf(),
            message: format!("unsupported TIFF color type {other:?}"),
        }),
    }
}

pub fn probe_tiff(path: &Path) -> Result<TiffLayout, IapError> {
    let tiff_err = |source| IapError::TiffDecode {
        path: path.to_path_buf(),
        source,
    };
    let mut decoder = open_tiff(path)?;
    let (width, height) = decoder.dimensions().map_err(tiff_err)?;
    let samples = samples_of(path, decoder.colortype().map_err(tiff_err)?)?;
    let description = decoder.get_tag_ascii_string(Tag::ImageDescription).ok();
    let mut pages = 1;
    while decoder.more_images() {
        decoder.next_image().map_err(tiff_err)?;
        if decoder.dimensions().map_err(tiff_err)? != (width, height) {
            return Err(IapError::DecodeFailed {
                path: path.to_path_buf(),
                message: format!("page {} differs in size from page 1", pages + 1),
            });
        }
        pages += 1;
    }
    let stack = description
        .as_deref()
        .and_then(|d| imagej_stack(d, pages))
        .unwrap_or_else(|| vec![pages]);
    if stack.len() > 1 {
        log::debug!("{} is a hyperstack {:?}", path.display(), stack);
    }
    Ok(TiffLayout {
        pages,
        stack,
        width,
        height,
        samples,
    })
}

enum Samples {
    U8(Vec<u8>),
    U16(Vec<u16>),
    F32(Vec<f32>),
}

impl Samples {
    fn from_page(page: DecodingResult) -> Option<Self> {
        Some(match page {
            DecodingResult::U8(v) => Samples::U8(v),
            DecodingResult::U16(v) => Samples::U16(v),
            DecodingResult::F32(v) => Samples::F32(v),
            DecodingResult::F64(v) => Samples::F32(v.into_iter().map(|x| x as f32).collect()),
            DecodingResult::U32(v) => Samples::F32(v.into_iter().map(|x| x as f32).collect()),
            DecodingResult::I8(v) => Samples::F32(v.into_iter().map(f32::from).collect()),
            DecodingResult::I16(v) => Samples::F32(v.into_iter().map(f32::from).collect()),
            DecodingResult::I32(v) => Samples::F32(v.into_iter().map(|x| x as f32).collect()),
            _ => return None,
        })
    }

    fn into_f32(self) -> Vec<f32> {
        match self {
            Samples::U8(v) => v.into_iter().map(f32::from).collect(),
            Samples::U16(v) => v.into_iter().map(f32::from).collect(),
            Samples::F32(v) => v,
        }
    }

    fn append(self, next: Samples) -> Samples {
        match (self, next) {
            (Samples::U8(mut a), Samples::U8(b)) => {
                a.extend(b);
                Samples::U8(a)
            }
            (Samples::U16(mut a), Samples::U16(b)) => {
                a.extend(b);
                Samples::U16(a)
            }
            (a, b) => {
                let mut a = a.into_f32();
                a.extend(b.into_f32());
                Samples::F32(a)
            }
        }
    }
}

/// Decodes every page of a TIFF into one volume shaped like
/// [`TiffLayout::shape`].
pub fn read_tiff(path: &Path) -> Result<Volume, IapError> {
    let layout = probe_tiff(path)?;
    let tiff_err = |source| IapError::TiffDecode {
        path: path.to_path_buf(),
        source,
    };
    let mut decoder = open_tiff(path)?;
    let mut acc: Option<Samples> = None;
    loop {
        let page = decoder.read_image().map_err(tiff_err)?;
        let page = Samples::from_page(page).ok_or_else(|| IapError::DecodeFailed {
            path: path.to_path_buf(),
            message: "unsupported TIFF sample format".to_string(),
        })?;
        acc = Some(match acc {
            None => page,
            Some(prev) => prev.append(page),
        });
        if !decoder.more_images() {
            break;
        }
        decoder.next_image().map_err(tiff_err)?;
    }

    let shape = layout.shape();
    let shape_err = |e: ndarray::ShapeError| IapError::DecodeFailed {
        path: path.to_path_buf(),
        message: format!("sample count does not match shape {shape:?}: {e}"),
    };
    let volume = match acc {
        Some(Samples::U8(v)) => Volume::U8(ArrayD::from_shape_vec(shape.clone(), v).map_err(shape_err)?),
        Some(Samples::U16(v)) => {
            Volume::U16(ArrayD::from_shape_vec(shape.clone(), v).map_err(shape_err)?)
        }
        Some(Samples::F32(v)) => {
            Volume::F32(ArrayD::from_shape_vec(shape.clone(), v).map_err(shape_err)?)
        }
        None => {
            return Err(IapError::DecodeFailed {
                path: path.to_path_buf(),
                message: "TIFF has no pages".to_string(),
            })
        }
    };
    log::debug!("decoded TIFF {} with shape {:?}", path.display(), volume.shape());
    Ok(volume)
}

fn try_npy<T: ReadableElement>(path: &Path) -> Result<Option<ArrayD<T>>, IapError> {
    match read_npy::<_, ArrayD<T>>(path) {
        Ok(array) => Ok(Some(array)),
        Err(ReadNpyError::WrongDescriptor(_)) => Ok(None),
        Err(e) => Err(IapError::DecodeFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        }),
    }
}

/// Reads a `.npy` array of any common numeric dtype.
pub fn read_npy_volume(path: &Path) -> Result<Volume, IapError> {
    if let Some(a) = try_npy::<u8>(path)? {
        return Ok(Volume::U8(a));
    }
    if let Some(a) = try_npy::<u16>(path)? {
        return Ok(Volume::U16(a));
    }
    if let Some(a) = try_npy::<f32>(path)? {
        return Ok(Volume::F32(a));
    }
    if let Some(a) = try_npy::<f64>(path)? {
        return Ok(Volume::F32(a.mapv(|x| x as f32)));
    }
    if let Some(a) = try_npy::<i16>(path)? {
        return Ok(Volume::F32(a.mapv(f32::from)));
    }
    if let Some(a) = try_npy::<i32>(path)? {
        return Ok(Volume::F32(a.mapv(|x| x as f32)));
    }
    if let Some(a) = try_npy::<u32>(path)? {
        return Ok(Volume::F32(a.mapv(|x| x as f32)));
    }
    if let Some(a) = try_npy::<bool>(path)? {
        return Ok(Volume::U8(a.mapv(u8::from)));
    }
    Err(IapError::DecodeFailed {
        path: path.to_path_buf(),
        message: "unsupported .npy dtype".to_string(),
    })
}
