//! Auto-save policy.

use std::path::PathBuf;

use crate::prompt::UserPrompt;

/// What the auto-saver should do for one trigger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AutoSaveAction {
    Skip,
    /// Save to the existing project file.
    Save,
    /// The user picked a path for the first save.
    SaveAs(PathBuf),
}

/// Per-session auto-save state.
///
/// When the project has no file yet, the user is asked for a path once per
/// session; declining turns auto-save off until [`AutoSave::reset`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AutoSave {
    asked: bool,
    declined: bool,
}

impl AutoSave {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_declined(&self) -> bool {
        self.declined
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn decide(&mut self, enabled: bool, has_path: bool, prompt: &mut dyn UserPrompt) -> AutoSaveAction {
        if !enabled || self.declined {
            return AutoSaveAction::Skip;
        }
        if has_path {
            return AutoSaveAction::Save;
        }
        if self.asked {
            return AutoSaveAction::Skip;
        }
        self.asked = true;
        match prompt.choose_project_path() {
            Some(path) => AutoSaveAction::SaveAs(path),
            None => {
                log::info!("auto-save disabled for this session");
                self.declined = true;
                AutoSaveAction::Skip
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::FixedAnswers;

    #[test]
    fn asks_for_a_path_once() {
        let mut prompt = FixedAnswers::new();
        let mut auto = AutoSave::new();
        assert_eq!(auto.decide(true, false, &mut prompt), AutoSaveAction::Skip);
        assert!(auto.is_declined());

        prompt.project_path = Some(PathBuf::from("/tmp/p.iap"));
        assert_eq!(auto.decide(true, false, &mut prompt), AutoSaveAction::Skip);

        auto.reset();
        assert_eq!(
            auto.decide(true, false, &mut prompt),
            AutoSaveAction::SaveAs(PathBuf::from("/tmp/p.iap"))
        );
        assert_eq!(auto.decide(true, true, &mut prompt), AutoSaveAction::Save);
        assert_eq!(auto.decide(false, true, &mut prompt), AutoSaveAction::Skip);
    }
}
