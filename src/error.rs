use std::path::PathBuf;
use thiserror::Error;

use crate::validation::ValidationReport;

/// The main error type for iapkit operations.
#[derive(Debug, Error)]
pub enum IapError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid input: {message}")]
    UserInputInvalid { message: String },

    #[error("Missing {what}: {path}")]
    ResourceMissing { what: &'static str, path: PathBuf },

    #[error("Not an image: {path}")]
    NotAnImage { path: PathBuf },

    #[error("Failed to decode {path}: {message}")]
    DecodeFailed { path: PathBuf, message: String },

    #[error("Failed to decode image {path}: {source}")]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Failed to decode TIFF {path}: {source}")]
    TiffDecode {
        path: PathBuf,
        #[source]
        source: tiff::TiffError,
    },

    #[error("Invalid dimension assignment for {file}: {message}")]
    DimensionAssignmentInvalid { file: String, message: String },

    #[error("Selected annotations are not connected ({components} separate component(s))")]
    Disconnected { components: usize },

    #[error("A pending {kind} must be committed or discarded first")]
    PendingBufferConflict { kind: &'static str },

    #[error("Failed to read project {path}: {source}")]
    ProjectJsonParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write project {path}: {source}")]
    ProjectJsonWrite {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to persist {path}: {message}")]
    PersistenceFailed { path: PathBuf, message: String },

    #[error("Predictor failed: {message}")]
    PredictorFailed { message: String },

    #[error("Unknown model identifier '{0}' (expected sam2_t, sam2_s, sam2_b or sam2_l)")]
    UnknownModel(String),

    #[error("Failed to parse COCO JSON from {path}: {source}")]
    CocoJsonParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write COCO JSON to {path}: {source}")]
    CocoJsonWrite {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid YOLO dataset layout at {path}: {message}")]
    YoloLayoutInvalid { path: PathBuf, message: String },

    #[error("Failed to parse YOLO label {path}:{line}: {message}")]
    YoloLabelParse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Failed to parse {path}: {source}")]
    YoloDataYamlParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to read image dimensions from {path}: {source}")]
    ImageDimensionRead {
        path: PathBuf,
        #[source]
        source: imagesize::ImageError,
    },

    #[error("Invalid VOC dataset layout at {path}: {message}")]
    VocLayoutInvalid { path: PathBuf, message: String },

    #[error("Failed to parse VOC XML {path}: {message}")]
    VocXmlParse { path: PathBuf, message: String },

    #[error("Failed to write {path}: {source}")]
    ImageEncode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Failed to export {slice}: {message}")]
    ExportFailed { slice: String, message: String },

    #[error("Failed to parse config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Validation failed with {error_count} error(s) and {warning_count} warning(s)")]
    ValidationFailed {
        error_count: usize,
        warning_count: usize,
        report: ValidationReport,
    },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Coarse classification used by callers deciding how to surface an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    UserInputInvalid,
    ResourceMissing,
    DecodeFailed,
    AssignmentInvalid,
    Disconnected,
    PendingBufferConflict,
    PersistenceFailed,
    PredictorFailed,
    Cancelled,
}

impl IapError {
    pub fn invalid(message: impl Into<String>) -> Self {
        IapError::UserInputInvalid {
            message: message.into(),
        }
    }

    pub fn predictor(message: impl Into<String>) -> Self {
        IapError::PredictorFailed {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            IapError::UserInputInvalid { .. }
            | IapError::UnsupportedFormat(_)
            | IapError::ValidationFailed { .. } => ErrorKind::UserInputInvalid,
            IapError::ResourceMissing { .. } => ErrorKind::ResourceMissing,
            IapError::NotAnImage { .. }
            | IapError::DecodeFailed { .. }
            | IapError::ImageDecode { .. }
            | IapError::TiffDecode { .. }
            | IapError::ImageDimensionRead { .. }
            | IapError::CocoJsonParse { .. }
            | IapError::YoloLayoutInvalid { .. }
            | IapError::YoloLabelParse { .. }
            | IapError::YoloDataYamlParse { .. }
            | IapError::VocLayoutInvalid { .. }
            | IapError::VocXmlParse { .. }
            | IapError::ProjectJsonParse { .. }
            | IapError::ConfigParse { .. } => ErrorKind::DecodeFailed,
            IapError::DimensionAssignmentInvalid { .. } => ErrorKind::AssignmentInvalid,
            IapError::Disconnected { .. } => ErrorKind::Disconnected,
            IapError::PendingBufferConflict { .. } => ErrorKind::PendingBufferConflict,
            IapError::Io(_)
            | IapError::ProjectJsonWrite { .. }
            | IapError::PersistenceFailed { .. }
            | IapError::CocoJsonWrite { .. }
            | IapError::ImageEncode { .. }
            | IapError::ExportFailed { .. } => ErrorKind::PersistenceFailed,
            IapError::PredictorFailed { .. } | IapError::UnknownModel(_) => {
                ErrorKind::PredictorFailed
            }
            IapError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_error_families() {
        assert_eq!(IapError::invalid("x").kind(), ErrorKind::UserInputInvalid);
        assert_eq!(
            IapError::Disconnected { components: 2 }.kind(),
            ErrorKind::Disconnected
        );
        assert_eq!(
            IapError::UnknownModel("sam3".into()).kind(),
            ErrorKind::PredictorFailed
        );
        assert_eq!(IapError::Cancelled.kind(), ErrorKind::Cancelled);
    }
}
