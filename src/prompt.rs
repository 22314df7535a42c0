//! Questions the core asks the user.
//!
//! A front end implements [`UserPrompt`] with modal dialogs. [`FixedAnswers`]
//! answers every question from preset values and backs the command line and
//! the tests.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::IapError;
use crate::image_source::DimensionAssignment;

/// Answer to "commit or discard the pending buffer?".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PendingChoice {
    Commit,
    Discard,
    /// Veto the action that caused the question.
    Cancel,
}

/// Answer to "some referenced images are missing".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MissingImagesChoice {
    Locate,
    Drop,
    Cancel,
}

pub trait UserPrompt {
    /// `kind` names the pending buffer, e.g. `"paint mask"`.
    fn resolve_pending(&mut self, kind: &'static str) -> PendingChoice;

    /// Asked the first time an N-D file is opened. `None` cancels the open.
    fn assign_dimensions(&mut self, file: &str, shape: &[usize]) -> Option<DimensionAssignment>;

    fn reconcile_missing(&mut self, missing: &[String]) -> MissingImagesChoice;

    /// Where is `name` now? `None` gives up on that image.
    fn locate_image(&mut self, name: &str) -> Option<PathBuf>;

    /// Import with missing images: `true` drops their annotations and continues.
    fn proceed_without(&mut self, missing: &[String]) -> bool;

    /// Asked once per session by auto-save when the project has no file yet.
    fn choose_project_path(&mut self) -> Option<PathBuf>;

    fn notify(&mut self, error: &IapError);
}

/// Non-interactive prompt answering from preset values.
#[derive(Debug, Clone)]
pub struct FixedAnswers {
    pub pending: PendingChoice,
    /// Used for every file not listed in `dims_by_file`.
    pub dims: Option<DimensionAssignment>,
    pub dims_by_file: BTreeMap<String, DimensionAssignment>,
    pub missing: MissingImagesChoice,
    pub located: BTreeMap<String, PathBuf>,
    pub proceed_without_missing: bool,
    pub project_path: Option<PathBuf>,
    /// Messages passed to `notify`, in order.
    pub notices: Vec<String>,
}

impl Default for FixedAnswers {
    fn default() -> Self {
        Self {
            pending: PendingChoice::Cancel,
            dims: None,
            dims_by_file: BTreeMap::new(),
            missing: MissingImagesChoice::Cancel,
            located: BTreeMap::new(),
            proceed_without_missing: false,
            project_path: None,
            notices: Vec::new(),
        }
    }
}

impl FixedAnswers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pending(mut self, choice: PendingChoice) -> Self {
        self.pending = choice;
        self
    }

    pub fn with_dims(mut self, dims: DimensionAssignment) -> Self {
        self.dims = Some(dims);
        self
    }

    pub fn with_missing(mut self, choice: MissingImagesChoice) -> Self {
        self.missing = choice;
        self
    }
}

impl UserPrompt for FixedAnswers {
    fn resolve_pending(&mut self, _kind: &'static str) -> PendingChoice {
        self.pending
    }

    fn assign_dimensions(&mut self, file: &str, _shape: &[usize]) -> Option<DimensionAssignment> {
        self.dims_by_file
            .get(file)
            .cloned()
            .or_else(|| self.dims.clone())
    }

    fn reconcile_missing(&mut self, _missing: &[String]) -> MissingImagesChoice {
        self.missing
    }

    fn locate_image(&mut self, name: &str) -> Option<PathBuf> {
        self.located.get(name).cloned()
    }

    fn proceed_without(&mut self, _missing: &[String]) -> bool {
        self.proceed_without_missing
    }

    fn choose_project_path(&mut self) -> Option<PathBuf> {
        self.project_path.clone()
    }

    fn notify(&mut self, error: &IapError) {
        log::warn!("{error}");
        self.notices.push(error.to_string());
    }
}
