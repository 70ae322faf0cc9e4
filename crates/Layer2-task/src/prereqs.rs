//! Task prerequisites
//!
//! Conditions the repository must meet before a task may start. They are
//! checked once, right before the first step of a root task; a failed check
//! aborts the chain like an abort raised by the flow itself.

use crate::error::{AbortTask, TaskResult};
use crate::repo::{RepoProbe, RepoState};
use std::ops::BitOr;

/// Set of repository conditions a task requires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TaskPrereqs(u8);

impl TaskPrereqs {
    pub const NOTHING: TaskPrereqs = TaskPrereqs(0);
    pub const NO_UNBORN: TaskPrereqs = TaskPrereqs(1 << 0);
    pub const NO_DETACHED: TaskPrereqs = TaskPrereqs(1 << 1);
    pub const NO_CONFLICTS: TaskPrereqs = TaskPrereqs(1 << 2);
    pub const NO_CHERRYPICK: TaskPrereqs = TaskPrereqs(1 << 3);
    pub const NO_STAGED_CHANGES: TaskPrereqs = TaskPrereqs(1 << 4);

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: TaskPrereqs) -> bool {
        self.0 & other.0 == other.0
    }

    /// Check every requested condition against the repository, in a fixed
    /// order. The first unmet one aborts with a message for the user.
    pub fn check(self, repo: &dyn RepoProbe) -> TaskResult<()> {
        if self.is_empty() {
            return Ok(());
        }

        let status = repo.status()?;

        if self.contains(Self::NO_CONFLICTS) && status.any_conflicts {
            return Err(AbortTask::new("Fix merge conflicts before performing this action.").into());
        }

        if self.contains(Self::NO_UNBORN) && status.head_is_unborn {
            return Err(AbortTask::new(paragraphs(
                "There are no commits in this repository yet.",
                "Create the initial commit in this repository before performing this action.",
            ))
            .into());
        }

        if self.contains(Self::NO_DETACHED) && status.head_is_detached {
            return Err(AbortTask::new(paragraphs(
                "You are in “detached HEAD” state.",
                "Switch to a local branch before performing this action.",
            ))
            .into());
        }

        if self.contains(Self::NO_CHERRYPICK) && status.state == RepoState::CherryPick {
            return Err(AbortTask::new(paragraphs(
                "You are in the middle of a cherry-pick.",
                "Before performing this action, conclude the cherry-pick.",
            ))
            .into());
        }

        if self.contains(Self::NO_STAGED_CHANGES) && status.any_staged_changes {
            return Err(AbortTask::new(paragraphs(
                "You have staged changes.",
                "Before performing this action, commit your changes or stash them.",
            ))
            .into());
        }

        Ok(())
    }
}

impl BitOr for TaskPrereqs {
    type Output = TaskPrereqs;

    fn bitor(self, rhs: TaskPrereqs) -> TaskPrereqs {
        TaskPrereqs(self.0 | rhs.0)
    }
}

fn paragraphs(first: &str, second: &str) -> String {
    format!("{}\n\n{}", first, second)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use crate::repo::RepoStatus;
    use std::path::{Path, PathBuf};

    struct FixedProbe(RepoStatus);

    impl RepoProbe for FixedProbe {
        fn workdir(&self) -> &Path {
            Path::new("/repo")
        }

        fn status(&self) -> TaskResult<RepoStatus> {
            Ok(self.0.clone())
        }
    }

    struct GoneProbe;

    impl RepoProbe for GoneProbe {
        fn workdir(&self) -> &Path {
            Path::new("/gone")
        }

        fn status(&self) -> TaskResult<RepoStatus> {
            Err(TaskError::RepoGone(PathBuf::from("/gone")))
        }
    }

    fn abort_message(result: TaskResult<()>) -> String {
        match result {
            Err(TaskError::Abort(abort)) => abort.message,
            other => panic!("expected abort, got {:?}", other),
        }
    }

    #[test]
    fn test_nothing_skips_probe() {
        assert!(TaskPrereqs::NOTHING.check(&GoneProbe).is_ok());
    }

    #[test]
    fn test_unborn() {
        let probe = FixedProbe(RepoStatus {
            head_is_unborn: true,
            ..Default::default()
        });
        let message = abort_message(TaskPrereqs::NO_UNBORN.check(&probe));
        assert!(message.starts_with("There are no commits in this repository yet."));
        assert!(TaskPrereqs::NO_DETACHED.check(&probe).is_ok());
    }

    #[test]
    fn test_conflicts_checked_first() {
        let probe = FixedProbe(RepoStatus {
            any_conflicts: true,
            any_staged_changes: true,
            ..Default::default()
        });
        let prereqs = TaskPrereqs::NO_STAGED_CHANGES | TaskPrereqs::NO_CONFLICTS;
        assert_eq!(
            abort_message(prereqs.check(&probe)),
            "Fix merge conflicts before performing this action."
        );
    }

    #[test]
    fn test_cherrypick() {
        let probe = FixedProbe(RepoStatus {
            state: RepoState::CherryPick,
            ..Default::default()
        });
        let message = abort_message(TaskPrereqs::NO_CHERRYPICK.check(&probe));
        assert!(message.contains("cherry-pick"));
    }

    #[test]
    fn test_repo_gone_propagates() {
        let result = TaskPrereqs::NO_UNBORN.check(&GoneProbe);
        assert!(matches!(result, Err(TaskError::RepoGone(_))));
    }
}
