//! Image source: opens 2-D and N-D images and renders addressable slices.
//!
//! A single-frame image yields one slice keyed by its file name. An N-D
//! image (multi-page TIFF, `.npy` array with more than two axes) needs a
//! [`DimensionAssignment`]; its slices are keyed `<stem>_<D><k>...` with one
//! segment per non-spatial axis, enumerated lexicographically.
//!
//! Rendered slices are cached on the [`ImageDescriptor`] and evicted when the
//! dimension assignment changes.

mod decode;
mod dims;
mod normalize;

pub use decode::{probe_tiff, read_npy_volume, read_tiff, TiffLayout, Volume};
pub use dims::{Dim, DimensionAssignment};
pub use normalize::{min_max, stretch_u8};

use std::path::{Path, PathBuf};

use image::{DynamicImage, GrayImage, RgbImage};
use ndarray::ArrayView2;

use crate::config::DisplayConfig;
use crate::error::IapError;
use crate::progress::{step, ProgressSink};
use crate::prompt::UserPrompt;

/// An 8-bit display raster.
#[derive(Clone, Debug, PartialEq)]
pub enum Raster {
    Gray(GrayImage),
    Rgb(RgbImage),
}

impl Raster {
    pub fn width(&self) -> u32 {
        match self {
            Raster::Gray(g) => g.width(),
            Raster::Rgb(c) => c.width(),
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            Raster::Gray(g) => g.height(),
            Raster::Rgb(c) => c.height(),
        }
    }

    /// Broadcasts grayscale to three channels.
    pub fn to_rgb(&self) -> RgbImage {
        match self {
            Raster::Gray(g) => DynamicImage::ImageLuma8(g.clone()).to_rgb8(),
            Raster::Rgb(c) => c.clone(),
        }
    }

    pub fn to_gray(&self) -> GrayImage {
        match self {
            Raster::Gray(g) => g.clone(),
            Raster::Rgb(c) => DynamicImage::ImageRgb8(c.clone()).to_luma8(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), IapError> {
        let result = match self {
            Raster::Gray(g) => g.save(path),
            Raster::Rgb(c) => c.save(path),
        };
        result.map_err(|source| IapError::ImageEncode {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// One rendered slice.
#[derive(Clone, Debug, PartialEq)]
pub struct Slice {
    pub key: String,
    pub raster: Raster,
}

/// Axis layout of an N-D image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackInfo {
    pub dims: DimensionAssignment,
    pub shape: Vec<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SourceKind {
    Raster,
    Tiff,
    Npy,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ImageDescriptor {
    /// Basename; also the slice key of a single-frame image.
    pub file_name: String,
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    /// `Some` for multi-slice images.
    pub stack: Option<StackInfo>,
    kind: SourceKind,
    cache: Option<Vec<Slice>>,
}

impl ImageDescriptor {
    pub fn is_multi(&self) -> bool {
        self.stack.is_some()
    }

    /// File name without extension; prefix of every N-D slice key.
    pub fn base_name(&self) -> String {
        base_name(&self.file_name)
    }

    /// Slice keys this image produces under its current assignment.
    pub fn slice_keys(&self) -> Vec<String> {
        match &self.stack {
            Some(stack) => stack.dims.slice_keys(&self.base_name(), &stack.shape),
            None => vec![self.file_name.clone()],
        }
    }

    /// Key prefix used when purging this image's annotations.
    pub fn purge_base(&self) -> String {
        if self.is_multi() {
            self.base_name()
        } else {
            self.file_name.clone()
        }
    }

    pub fn is_cached(&self) -> bool {
        self.cache.is_some()
    }

    /// Drops rendered slices.
    pub fn evict(&mut self) {
        self.cache = None;
    }
}

pub fn base_name(file_name: &str) -> String {
    Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string())
}

fn file_name_of(path: &Path) -> Result<String, IapError> {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| IapError::NotAnImage {
            path: path.to_path_buf(),
        })
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

/// What a file looks like before any assignment is applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Probe {
    Single { width: u32, height: u32 },
    Stack { shape: Vec<usize> },
}

#[derive(Clone, Debug, Default)]
pub struct ImageSource {
    display: DisplayConfig,
}

impl ImageSource {
    pub fn new(display: DisplayConfig) -> Self {
        Self { display }
    }

    pub fn display(&self) -> &DisplayConfig {
        &self.display
    }

    /// Inspects `path` without decoding pixel data where the format allows.
    pub fn probe(&self, path: &Path) -> Result<Probe, IapError> {
        if !path.is_file() {
            return Err(IapError::ResourceMissing {
                what: "image file",
                path: path.to_path_buf(),
            });
        }
        match source_kind(path)? {
            SourceKind::Tiff => {
                let layout = probe_tiff(path)?;
                if layout.pages > 1 {
                    Ok(Probe::Stack {
                        shape: layout.shape(),
                    })
                } else {
                    Ok(Probe::Single {
                        width: layout.width,
                        height: layout.height,
                    })
                }
            }
            SourceKind::Npy => {
                let volume = read_npy_volume(path)?;
                match volume.shape() {
                    [h, w] => Ok(Probe::Single {
                        width: *w as u32,
                        height: *h as u32,
                    }),
                    shape if shape.len() > 2 => Ok(Probe::Stack {
                        shape: shape.to_vec(),
                    }),
                    shape => Err(IapError::DecodeFailed {
                        path: path.to_path_buf(),
                        message: format!("array of shape {shape:?} is not an image"),
                    }),
                }
            }
            SourceKind::Raster => {
                let size = imagesize::size(path).map_err(|source| {
                    IapError::ImageDimensionRead {
                        path: path.to_path_buf(),
                        source,
                    }
                })?;
                Ok(Probe::Single {
                    width: size.width as u32,
                    height: size.height as u32,
                })
            }
        }
    }

    /// Opens an image, asking for a dimension assignment if it is N-D.
    pub fn open(&self, path: &Path, prompt: &mut dyn UserPrompt) -> Result<ImageDescriptor, IapError> {
        let file_name = file_name_of(path)?;
        let probe = self.probe(path)?;
        let dims = match &probe {
            Probe::Stack { shape } => Some(
                prompt
                    .assign_dimensions(&file_name, shape)
                    .ok_or(IapError::Cancelled)?,
            ),
            Probe::Single { .. } => None,
        };
        self.describe(path, file_name, probe, dims)
    }

    /// Opens an image with a known assignment, as when replaying a project.
    pub fn open_with_dims(
        &self,
        path: &Path,
        dims: Option<DimensionAssignment>,
    ) -> Result<ImageDescriptor, IapError> {
        let file_name = file_name_of(path)?;
        let probe = self.probe(path)?;
        self.describe(path, file_name, probe, dims)
    }

    fn describe(
        &self,
        path: &Path,
        file_name: String,
        probe: Probe,
        dims: Option<DimensionAssignment>,
    ) -> Result<ImageDescriptor, IapError> {
        let kind = source_kind(path)?;
        let descriptor = match probe {
            Probe::Single { width, height } => ImageDescriptor {
                file_name,
                path: path.to_path_buf(),
                width,
                height,
                stack: None,
                kind,
                cache: None,
            },
            Probe::Stack { shape } => {
                let dims = dims.ok_or_else(|| IapError::DimensionAssignmentInvalid {
                    file: file_name.clone(),
                    message: format!("no dimension assignment for shape {shape:?}"),
                })?;
                dims.validate(&file_name, &shape)?;
                let (height, width) = spatial_extent(&dims, &shape);
                ImageDescriptor {
                    file_name,
                    path: path.to_path_buf(),
                    width,
                    height,
                    stack: Some(StackInfo { dims, shape }),
                    kind,
                    cache: None,
                }
            }
        };
        log::info!(
            "opened {} ({}x{}, {} slice(s))",
            descriptor.file_name,
            descriptor.width,
            descriptor.height,
            descriptor.slice_keys().len()
        );
        Ok(descriptor)
    }

    /// Rendered slices in enumeration order, decoding on first use.
    pub fn slices_of<'d>(
        &self,
        descriptor: &'d mut ImageDescriptor,
        progress: &mut dyn ProgressSink,
    ) -> Result<&'d [Slice], IapError> {
        if descriptor.cache.is_none() {
            let slices = self.render(descriptor, progress)?;
            descriptor.cache = Some(slices);
        }
        Ok(descriptor.cache.as_deref().unwrap_or(&[]))
    }

    /// One rendered slice by key.
    pub fn slice<'d>(
        &self,
        descriptor: &'d mut ImageDescriptor,
        key: &str,
        progress: &mut dyn ProgressSink,
    ) -> Result<&'d Raster, IapError> {
        let file_name = descriptor.file_name.clone();
        self.slices_of(descriptor, progress)?
            .iter()
            .find(|s| s.key == key)
            .map(|s| &s.raster)
            .ok_or_else(|| IapError::invalid(format!("{file_name} has no slice '{key}'")))
    }

    /// Replaces the assignment and evicts the cache. Returns the keys the old
    /// assignment produced; annotations under them must be purged.
    pub fn reassign_dimensions(
        &self,
        descriptor: &mut ImageDescriptor,
        dims: DimensionAssignment,
    ) -> Result<Vec<String>, IapError> {
        let Some(stack) = descriptor.stack.as_ref() else {
            return Err(IapError::DimensionAssignmentInvalid {
                file: descriptor.file_name.clone(),
                message: "single-frame images have no dimensions to assign".to_string(),
            });
        };
        dims.validate(&descriptor.file_name, &stack.shape)?;
        let old_keys = descriptor.slice_keys();
        if let Some(stack) = descriptor.stack.as_mut() {
            let (height, width) = spatial_extent(&dims, &stack.shape);
            stack.dims = dims;
            descriptor.width = width;
            descriptor.height = height;
        }
        descriptor.evict();
        log::info!(
            "reassigned dimensions of {}; {} old slice key(s) invalidated",
            descriptor.file_name,
            old_keys.len()
        );
        Ok(old_keys)
    }

    fn render(
        &self,
        descriptor: &ImageDescriptor,
        progress: &mut dyn ProgressSink,
    ) -> Result<Vec<Slice>, IapError> {
        let path = descriptor.path.as_path();
        let Some(stack) = &descriptor.stack else {
            let raster = self.render_single(descriptor)?;
            step(progress, 1, 1)?;
            return Ok(vec![Slice {
                key: descriptor.file_name.clone(),
                raster,
            }]);
        };

        let volume = match descriptor.kind {
            SourceKind::Tiff => read_tiff(path)?,
            SourceKind::Npy => read_npy_volume(path)?,
            SourceKind::Raster => {
                return Err(IapError::DecodeFailed {
                    path: path.to_path_buf(),
                    message: "not a multi-slice format".to_string(),
                })
            }
        };
        if volume.shape() != stack.shape.as_slice() {
            return Err(IapError::DimensionAssignmentInvalid {
                file: descriptor.file_name.clone(),
                message: format!(
                    "stored shape {:?} does not match file shape {:?}",
                    stack.shape,
                    volume.shape()
                ),
            });
        }

        let (h_axis, w_axis) = spatial_axes(&stack.dims);
        let axes = stack.dims.slice_axes(&stack.shape);
        let indices = dims::slice_indices(&axes);
        let base = descriptor.base_name();
        let total = indices.len();
        let mut slices = Vec::with_capacity(total);
        for (i, index) in indices.iter().enumerate() {
            let fixed: Vec<(usize, usize)> = axes
                .iter()
                .zip(index)
                .map(|(&(axis, _, _), &k)| (axis, k))
                .collect();
            let key = dims::slice_key(&base, &axes, index);
            let plane = volume
                .render_plane(&fixed, h_axis, w_axis, &self.display)
                .map_err(|message| IapError::DecodeFailed {
                    path: path.to_path_buf(),
                    message: format!("{key}: {message}"),
                })?;
            slices.push(Slice {
                key,
                raster: Raster::Gray(plane),
            });
            step(progress, i + 1, total)?;
        }
        log::debug!("rendered {} slice(s) of {}", total, descriptor.file_name);
        Ok(slices)
    }

    fn render_single(&self, descriptor: &ImageDescriptor) -> Result<Raster, IapError> {
        let path = descriptor.path.as_path();
        if descriptor.kind == SourceKind::Npy {
            let volume = read_npy_volume(path)?;
            let plane = volume
                .render_plane(&[], 0, 1, &self.display)
                .map_err(|message| IapError::DecodeFailed {
                    path: path.to_path_buf(),
                    message,
                })?;
            return Ok(Raster::Gray(plane));
        }

        let decoded = image::ImageReader::open(path)?
            .with_guessed_format()?
            .decode()
            .map_err(|source| IapError::ImageDecode {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(match decoded {
            DynamicImage::ImageLuma8(g) => Raster::Gray(self.stretch_gray(&g)?),
            DynamicImage::ImageLumaA8(g) => {
                Raster::Gray(self.stretch_gray(&DynamicImage::ImageLumaA8(g).to_luma8())?)
            }
            DynamicImage::ImageLuma16(g) => {
                let (w, h) = g.dimensions();
                let view = ArrayView2::from_shape((h as usize, w as usize), g.as_raw().as_slice())
                    .map_err(|e| IapError::DecodeFailed {
                        path: path.to_path_buf(),
                        message: e.to_string(),
                    })?;
                Raster::Gray(min_max(view))
            }
            DynamicImage::ImageRgb8(c) => Raster::Rgb(c),
            other => Raster::Rgb(other.to_rgb8()),
        })
    }

    fn stretch_gray(&self, g: &GrayImage) -> Result<GrayImage, IapError> {
        let (w, h) = g.dimensions();
        let view = ArrayView2::from_shape((h as usize, w as usize), g.as_raw().as_slice())
            .map_err(|e| IapError::invalid(e.to_string()))?;
        Ok(stretch_u8(view, &self.display))
    }
}

fn source_kind(path: &Path) -> Result<SourceKind, IapError> {
    match extension_of(path).as_str() {
        "tif" | "tiff" => Ok(SourceKind::Tiff),
        "npy" => Ok(SourceKind::Npy),
        "czi" => Err(IapError::DecodeFailed {
            path: path.to_path_buf(),
            message: "CZI stacks cannot be decoded by this build".to_string(),
        }),
        _ => match image::ImageFormat::from_path(path) {
            Ok(_) => Ok(SourceKind::Raster),
            Err(_) => Err(IapError::NotAnImage {
                path: path.to_path_buf(),
            }),
        },
    }
}

fn spatial_axes(dims: &DimensionAssignment) -> (usize, usize) {
    (
        dims.axis_of(Dim::H).unwrap_or(0),
        dims.axis_of(Dim::W).unwrap_or(1),
    )
}

fn spatial_extent(dims: &DimensionAssignment, shape: &[usize]) -> (u32, u32) {
    let (h, w) = spatial_axes(dims);
    (
        shape.get(h).copied().unwrap_or(0) as u32,
        shape.get(w).copied().unwrap_or(0) as u32,
    )
}
