//! Runtime configuration loaded from YAML.
//!
//! Every section and field is optional; missing values take the defaults
//! below, so an empty file is a valid configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::IapError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub display: DisplayConfig,
    pub editor: EditorConfig,
    pub project: ProjectConfig,
    pub predictor: PredictorConfig,
}

impl Config {
    pub fn open<P>(path: P) -> Result<Self, IapError>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&text).map_err(|source| IapError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, IapError> {
        serde_yaml::from_str(text).map_err(|source| IapError::ConfigParse {
            path: PathBuf::from("<string>"),
            source,
        })
    }
}

/// Contrast settings used when rendering slices to 8 bits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Lower percentile of the 8-bit stretch.
    pub percentile_low: f64,
    /// Upper percentile of the 8-bit stretch.
    pub percentile_high: f64,
    pub gamma: f64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            percentile_low: 0.0,
            percentile_high: 100.0,
            gamma: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    pub brush_size: u32,
    pub eraser_size: u32,
    /// Vertex grab radius in screen pixels; divided by the zoom factor.
    pub vertex_hit_radius: f64,
    pub min_contour_area: f64,
    pub segment_epsilon: f64,
    pub zoom_min: f64,
    pub zoom_max: f64,
    pub zoom_step: f64,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            brush_size: 10,
            eraser_size: 10,
            vertex_hit_radius: 10.0,
            min_contour_area: 10.0,
            segment_epsilon: 0.1,
            zoom_min: 0.1,
            zoom_max: 5.0,
            zoom_step: 1.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub autosave: bool,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self { autosave: true }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorConfig {
    /// Directory holding model weight files.
    pub weights_dir: Option<PathBuf>,
    /// Model loaded at startup, e.g. `sam2_b`.
    pub model: Option<String>,
}
