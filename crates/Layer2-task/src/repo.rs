//! Repository probe
//!
//! The engine only needs a handful of facts about the repository before it
//! starts a task (see [`TaskPrereqs`](crate::TaskPrereqs)). [`RepoProbe`] is
//! the seam; [`Git2Probe`] answers through libgit2.

use crate::error::{TaskError, TaskResult};
use git2::{ErrorCode, Repository, RepositoryState, Status, StatusOptions};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// In-progress operation recorded by git
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RepoState {
    #[default]
    Clean,
    Merge,
    CherryPick,
    Revert,
    Rebase,
    Bisect,
    Other,
}

impl From<RepositoryState> for RepoState {
    fn from(state: RepositoryState) -> Self {
        match state {
            RepositoryState::Clean => RepoState::Clean,
            RepositoryState::Merge => RepoState::Merge,
            RepositoryState::CherryPick | RepositoryState::CherryPickSequence => {
                RepoState::CherryPick
            }
            RepositoryState::Revert | RepositoryState::RevertSequence => RepoState::Revert,
            RepositoryState::Rebase
            | RepositoryState::RebaseInteractive
            | RepositoryState::RebaseMerge => RepoState::Rebase,
            RepositoryState::Bisect => RepoState::Bisect,
            _ => RepoState::Other,
        }
    }
}

/// Snapshot of the facts prerequisites are checked against
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoStatus {
    pub any_conflicts: bool,
    pub head_is_unborn: bool,
    pub head_is_detached: bool,
    pub any_staged_changes: bool,
    pub state: RepoState,
    /// Shorthand of the checked-out branch, if any
    pub branch: Option<String>,
}

/// Read-only view of the repository the tasks operate on
pub trait RepoProbe: Send + Sync {
    /// Root of the working directory
    fn workdir(&self) -> &Path;

    /// Fails with [`TaskError::RepoGone`] if the repository vanished
    fn status(&self) -> TaskResult<RepoStatus>;
}

// ============================================================================
// Git2Probe
// ============================================================================

/// [`RepoProbe`] backed by libgit2
pub struct Git2Probe {
    repo: Mutex<Repository>,
    workdir: PathBuf,
}

impl Git2Probe {
    /// Open the repository containing `path`
    pub fn open(path: impl AsRef<Path>) -> TaskResult<Self> {
        let path = path.as_ref();
        let repo = Repository::discover(path).map_err(|e| {
            if e.code() == ErrorCode::NotFound && !path.exists() {
                TaskError::RepoGone(path.to_path_buf())
            } else {
                TaskError::Git(e)
            }
        })?;
        let workdir = repo
            .workdir()
            .map(Path::to_path_buf)
            .ok_or_else(|| TaskError::abort("Bare repositories are not supported."))?;
        debug!("Opened repository at {}", workdir.display());
        Ok(Self {
            repo: Mutex::new(repo),
            workdir,
        })
    }

    /// Run `f` against the underlying repository
    pub fn with_repo<F, T>(&self, f: F) -> TaskResult<T>
    where
        F: FnOnce(&Repository) -> TaskResult<T>,
    {
        self.ensure_present()?;
        let repo = self.repo.lock();
        f(&repo)
    }

    fn ensure_present(&self) -> TaskResult<()> {
        if self.workdir.join(".git").exists() {
            Ok(())
        } else {
            Err(TaskError::RepoGone(self.workdir.clone()))
        }
    }
}

impl RepoProbe for Git2Probe {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn status(&self) -> TaskResult<RepoStatus> {
        self.with_repo(|repo| {
            let (head_is_unborn, branch) = match repo.head() {
                Ok(head) => (
                    false,
                    head.is_branch()
                        .then(|| head.shorthand().map(str::to_string))
                        .flatten(),
                ),
                Err(e) if e.code() == ErrorCode::UnbornBranch => (true, None),
                Err(e) => return Err(e.into()),
            };

            let index = repo.index()?;
            let any_conflicts = index.has_conflicts();

            let mut options = StatusOptions::new();
            options.include_untracked(false).include_ignored(false);
            let staged = Status::INDEX_NEW
                | Status::INDEX_MODIFIED
                | Status::INDEX_DELETED
                | Status::INDEX_RENAMED
                | Status::INDEX_TYPECHANGE;
            let any_staged_changes = repo
                .statuses(Some(&mut options))?
                .iter()
                .any(|entry| entry.status().intersects(staged));

            Ok(RepoStatus {
                any_conflicts,
                head_is_unborn,
                head_is_detached: repo.head_detached()?,
                any_staged_changes,
                state: repo.state().into(),
                branch,
            })
        })
    }
}
