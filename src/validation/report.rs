//! Findings of a project or store check.

use std::fmt;

/// Issues found by [`super::validate_project`] or [`super::validate_store`],
/// in the order they were found.
#[derive(Clone, Debug, Default)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, issue: ValidationIssue) {
        self.issues.push(issue);
    }

    fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    pub fn error_count(&self) -> usize {
        self.count(Severity::Error)
    }

    pub fn warning_count(&self) -> usize {
        self.count(Severity::Warning)
    }

    /// No broken invariants; warnings allowed.
    pub fn is_ok(&self) -> bool {
        self.error_count() == 0
    }

    /// Nothing to report at all.
    pub fn is_ok_strict(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn has(&self, code: IssueCode) -> bool {
        self.issues.iter().any(|i| i.code == code)
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.issues.is_empty() {
            return writeln!(f, "Project is consistent");
        }
        writeln!(
            f,
            "{} error(s), {} warning(s):",
            self.error_count(),
            self.warning_count()
        )?;
        for issue in &self.issues {
            writeln!(f, "  {issue}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub code: IssueCode,
    pub message: String,
    pub context: IssueContext,
}

impl ValidationIssue {
    pub fn error(code: IssueCode, message: impl Into<String>, context: IssueContext) -> Self {
        Self {
            severity: Severity::Error,
            code,
            message: message.into(),
            context,
        }
    }

    pub fn warning(code: IssueCode, message: impl Into<String>, context: IssueContext) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(code, message, context)
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warn ",
        };
        write!(f, "{tag} {:?} ({}): {}", self.code, self.context, self.message)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    /// Suspicious but loadable, savable and exportable.
    Warning,
    /// A broken store invariant.
    Error,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IssueCode {
    /// The numbers of one (slice, class) list are not `1..=N`.
    OrdinalsNotPermutation,
    /// An annotation's class id differs from the registry's id for its name.
    ClassIdMismatch,
    /// An annotation sits in the list of a different class.
    ClassNameMismatch,
    /// Annotations exist for a class the registry does not know.
    UnregisteredClass,
    /// A slice key that no image produces under its current assignment.
    UnproducibleSliceKey,
    /// An empty (slice, class) list was left behind.
    EmptySliceEntry,
    DuplicateImageName,
    InvalidImageDimensions,
    /// Fewer than three points or an odd coordinate count.
    PolygonTooShort,
    NonFiniteCoordinates,
    /// Zero or negative box size.
    InvalidBBoxArea,
    /// The geometry's bounding box lies partly outside its image.
    OutOfBounds,
}

#[derive(Clone, Debug)]
pub enum IssueContext {
    Image { file_name: String },
    Class { name: String },
    Slice { key: String },
    Annotation { slice: String, label: String },
}

impl fmt::Display for IssueContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueContext::Image { file_name } => write!(f, "image '{file_name}'"),
            IssueContext::Class { name } => write!(f, "class '{name}'"),
            IssueContext::Slice { key } => write!(f, "slice '{key}'"),
            IssueContext::Annotation { slice, label } => write!(f, "{label} on '{slice}'"),
        }
    }
}
