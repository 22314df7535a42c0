//! Export and import report types.
//!
//! An export report says what was written and what the target format could
//! not carry, similar to how `validation::ValidationReport` tracks store
//! issues.

use serde::Serialize;
use std::fmt;

use crate::ir::MergeSummary;

/// A report generated by an export.
///
/// Tracks counts of what was written, plus lossiness warnings and policy
/// notes, so users can see what the target format dropped.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ExportReport {
    /// Target format name.
    pub format: String,
    pub counts: ExportCounts,
    /// Files written into the output directory.
    pub files_written: usize,
    pub issues: Vec<ExportIssue>,
}

impl ExportReport {
    pub fn new(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
            ..Default::default()
        }
    }

    pub fn add(&mut self, issue: ExportIssue) {
        self.issues.push(issue);
    }

    /// Count of warning-level issues (true lossiness).
    pub fn warning_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == ExportSeverity::Warning)
            .count()
    }

    /// Count of info-level issues (policy decisions, notes).
    pub fn info_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == ExportSeverity::Info)
            .count()
    }

    /// True if the export could not represent everything in the store.
    pub fn is_lossy(&self) -> bool {
        self.warning_count() > 0
    }

    pub fn has(&self, code: ExportIssueCode) -> bool {
        self.issues.iter().any(|i| i.code == code)
    }
}

impl fmt::Display for ExportReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "  {} images, {} categories, {} annotations -> {} file(s)",
            self.counts.images, self.counts.categories, self.counts.annotations, self.files_written
        )?;

        for (severity, title) in [
            (ExportSeverity::Warning, "Warnings"),
            (ExportSeverity::Info, "Notes"),
        ] {
            let issues: Vec<_> = self.issues.iter().filter(|i| i.severity == severity).collect();
            if issues.is_empty() {
                continue;
            }
            writeln!(f)?;
            writeln!(f, "{} ({}):", title, issues.len())?;
            for issue in issues {
                writeln!(f, "  - {}", issue.message)?;
            }
        }

        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ExportCounts {
    pub images: usize,
    pub categories: usize,
    pub annotations: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct ExportIssue {
    pub severity: ExportSeverity,
    pub code: ExportIssueCode,
    pub message: String,
}

impl ExportIssue {
    pub fn warning(code: ExportIssueCode, message: impl Into<String>) -> Self {
        Self {
            severity: ExportSeverity::Warning,
            code,
            message: message.into(),
        }
    }

    pub fn info(code: ExportIssueCode, message: impl Into<String>) -> Self {
        Self {
            severity: ExportSeverity::Info,
            code,
            message: message.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportSeverity {
    /// Information in the store that the output does not carry.
    Warning,
    /// A policy decision worth knowing about.
    Info,
}

/// Stable issue codes for programmatic consumption.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportIssueCode {
    /// Bbox-only VOC writes polygons as their bounding box.
    VocDropsPolygonDetail,
    /// Raster masks cannot be read back as polygons.
    RasterNotReversible,
    /// Overlapping classes in a semantic mask: the last drawn wins.
    SemanticOverlapPolicy,
    /// Semantic pixel values follow sorted class names.
    SemanticValueOrder,
    /// Class ordinals are only kept by COCO and the project file.
    DropOrdinals,
    /// Class colors are only kept by COCO and the project file.
    DropClassColors,
    /// YOLO class indices follow registry order.
    YoloClassOrder,
    /// YOLO writes normalized floats at 6 decimal places.
    YoloFloatPrecision,
    /// Slices of multi-slice images are written as `<slice-key>.png`.
    SlicesRendered,
    /// Images without annotations still get an (empty) output.
    EmptyImagesKept,
}

/// What an import did to the project.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ImportReport {
    pub format: String,
    pub merge: MergeSummary,
    /// Images found next to the import and added to the project.
    pub added_images: Vec<String>,
    /// Images that could not be found; their annotations were not imported.
    pub dropped_images: Vec<String>,
}

impl fmt::Display for ImportReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "  {} annotation(s) imported from {}",
            self.merge.annotations, self.format
        )?;
        if !self.merge.new_classes.is_empty() {
            writeln!(f, "  new classes: {}", self.merge.new_classes.join(", "))?;
        }
        if !self.added_images.is_empty() {
            writeln!(f, "  added {} image(s)", self.added_images.len())?;
        }
        if !self.dropped_images.is_empty() {
            writeln!(
                f,
                "  dropped annotations of {} missing image(s): {}",
                self.dropped_images.len(),
                self.dropped_images.join(", ")
            )?;
        }
        if self.merge.skipped > 0 {
            writeln!(f, "  skipped {} unusable annotation(s)", self.merge.skipped)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_report_is_not_lossy() {
        let report = ExportReport::new("coco");
        assert!(!report.is_lossy());
        assert_eq!(report.warning_count(), 0);
        assert_eq!(report.info_count(), 0);
    }

    #[test]
    fn warning_makes_report_lossy() {
        let mut report = ExportReport::new("voc");
        report.add(ExportIssue::warning(
            ExportIssueCode::VocDropsPolygonDetail,
            "2 polygon(s) written as boxes",
        ));
        assert!(report.is_lossy());
        assert!(report.has(ExportIssueCode::VocDropsPolygonDetail));
        assert!(report.to_string().contains("Warnings (1):"));
    }

    #[test]
    fn report_serializes_to_json() {
        let mut report = ExportReport::new("semantic");
        report.counts = ExportCounts {
            images: 3,
            categories: 2,
            annotations: 7,
        };
        report.add(ExportIssue::info(
            ExportIssueCode::SemanticValueOrder,
            "values follow sorted class names",
        ));

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"format\":\"semantic\""));
        assert!(json.contains("\"severity\":\"info\""));
        assert!(json.contains("\"code\":\"semantic_value_order\""));
    }
}
