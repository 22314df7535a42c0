//! Project validation.
//!
//! Checks the invariants every store operation must preserve:
//! - ordinals of each (slice, class) list are `1..=N`
//! - every annotation's class id and name agree with the registry
//! - every slice key is produced by some image under its current assignment
//! - geometry is usable (polygon length, finite values, positive box size)

mod report;

pub use report::{IssueCode, IssueContext, Severity, ValidationIssue, ValidationReport};

use std::collections::{BTreeMap, HashSet};

use crate::error::IapError;
use crate::project::Project;
use crate::store::{AnnotationStore, Geometry};

/// Options for validation behavior.
#[derive(Clone, Debug, Default)]
pub struct ValidateOptions {
    /// If true, treat warnings as errors.
    pub strict: bool,
}

/// Validates the project's images and store.
pub fn validate_project(project: &Project, opts: &ValidateOptions) -> ValidationReport {
    let mut report = ValidationReport::new();
    let mut seen = HashSet::new();
    for image in project.images() {
        if !seen.insert(image.file_name.as_str()) {
            report.add(ValidationIssue::error(
                IssueCode::DuplicateImageName,
                "file name used by more than one image",
                IssueContext::Image {
                    file_name: image.file_name.clone(),
                },
            ));
        }
        if image.width == 0 || image.height == 0 {
            report.add(ValidationIssue::error(
                IssueCode::InvalidImageDimensions,
                format!("invalid dimensions {}x{}", image.width, image.height),
                IssueContext::Image {
                    file_name: image.file_name.clone(),
                },
            ));
        }
    }

    let sizes: BTreeMap<String, (u32, u32)> = project
        .images()
        .iter()
        .flat_map(|image| {
            image
                .slice_keys()
                .into_iter()
                .map(move |key| (key, (image.width, image.height)))
        })
        .collect();
    report
        .issues
        .extend(validate_store(project.store(), Some(&sizes), opts).issues);
    report
}

/// Validates a store on its own.
///
/// `slice_sizes` maps every producible slice key to its raster size; when
/// given, unknown slice keys and out-of-bounds geometry are reported too.
pub fn validate_store(
    store: &AnnotationStore,
    slice_sizes: Option<&BTreeMap<String, (u32, u32)>>,
    _opts: &ValidateOptions,
) -> ValidationReport {
    let mut report = ValidationReport::new();
    let registry = store.registry();
    let mut reported_slices = HashSet::new();

    for (slice, class, list) in store.iter() {
        if let Some(sizes) = slice_sizes {
            if !sizes.contains_key(slice) && reported_slices.insert(slice) {
                report.add(ValidationIssue::error(
                    IssueCode::UnproducibleSliceKey,
                    "no image produces this slice under its current dimension assignment",
                    IssueContext::Slice {
                        key: slice.to_string(),
                    },
                ));
            }
        }

        if list.is_empty() {
            report.add(ValidationIssue::warning(
                IssueCode::EmptySliceEntry,
                format!("empty list for class '{class}'"),
                IssueContext::Slice {
                    key: slice.to_string(),
                },
            ));
            continue;
        }

        let registered = registry.id_of(class);
        if registered.is_none() {
            report.add(ValidationIssue::error(
                IssueCode::UnregisteredClass,
                format!("{} annotation(s) on '{}'", list.len(), slice),
                IssueContext::Class {
                    name: class.to_string(),
                },
            ));
        }

        let mut numbers: Vec<u32> = list.iter().map(|a| a.number).collect();
        numbers.sort_unstable();
        let expected: Vec<u32> = (1..=list.len() as u32).collect();
        if numbers != expected {
            report.add(ValidationIssue::error(
                IssueCode::OrdinalsNotPermutation,
                format!("class '{}' has ordinals {:?}, expected 1..={}", class, numbers, list.len()),
                IssueContext::Slice {
                    key: slice.to_string(),
                },
            ));
        }

        for annotation in list {
            let context = || IssueContext::Annotation {
                slice: slice.to_string(),
                label: annotation.label(),
            };
            if annotation.class_name != class {
                report.add(ValidationIssue::error(
                    IssueCode::ClassNameMismatch,
                    format!("stored under class '{class}'"),
                    context(),
                ));
            }
            if let Some(id) = registered {
                if annotation.class_id != id {
                    report.add(ValidationIssue::error(
                        IssueCode::ClassIdMismatch,
                        format!("class id {} but the registry says {}", annotation.class_id, id),
                        context(),
                    ));
                }
            }
            validate_geometry(
                &annotation.geometry,
                slice_sizes.and_then(|s| s.get(slice)).copied(),
                &mut report,
                context,
            );
        }
    }

    report
}

fn validate_geometry(
    geometry: &Geometry,
    size: Option<(u32, u32)>,
    report: &mut ValidationReport,
    context: impl Fn() -> IssueContext,
) {
    let coords: Vec<f64> = match geometry {
        Geometry::Polygon(polygon) => {
            let coords = polygon.coords();
            if coords.len() < 6 || coords.len() % 2 != 0 {
                report.add(ValidationIssue::error(
                    IssueCode::PolygonTooShort,
                    format!("polygon has {} coordinate(s)", coords.len()),
                    context(),
                ));
            }
            coords.to_vec()
        }
        Geometry::BBox(b) => {
            if b.width <= 0.0 || b.height <= 0.0 {
                report.add(ValidationIssue::error(
                    IssueCode::InvalidBBoxArea,
                    format!("box size {}x{} must be positive", b.width, b.height),
                    context(),
                ));
            }
            b.to_array().to_vec()
        }
    };

    if coords.iter().any(|v| !v.is_finite()) {
        report.add(ValidationIssue::error(
            IssueCode::NonFiniteCoordinates,
            "coordinates contain NaN or infinity",
            context(),
        ));
        return;
    }

    if let Some((width, height)) = size {
        let b = geometry.bbox();
        if b.x < 0.0 || b.y < 0.0 || b.xmax() > width as f64 || b.ymax() > height as f64 {
            report.add(ValidationIssue::warning(
                IssueCode::OutOfBounds,
                format!(
                    "extent [{}, {}, {}, {}] leaves the {}x{} image",
                    b.x,
                    b.y,
                    b.xmax(),
                    b.ymax(),
                    width,
                    height
                ),
                context(),
            ));
        }
    }
}

/// Turns a report into an error when it fails under `opts`.
pub fn check(report: ValidationReport, opts: &ValidateOptions) -> Result<ValidationReport, IapError> {
    let passed = if opts.strict {
        report.is_ok_strict()
    } else {
        report.is_ok()
    };
    if passed {
        return Ok(report);
    }
    Err(IapError::ValidationFailed {
        error_count: report.error_count(),
        warning_count: report.warning_count(),
        report,
    })
}
