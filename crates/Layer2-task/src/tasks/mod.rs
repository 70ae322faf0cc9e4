//! Task catalogue
//!
//! - `refresh.rs` - RefreshRepo
//! - `net.rs` - FetchRemote, PullBranch
//! - `index.rs` - StageFiles, UnstageFiles, AbortMerge
//! - `commit.rs` - NewCommit
//! - `command.rs` - RunGit
//!
//! [`TaskRequest`] is the closed list of what can be put on a runner; each
//! variant carries the task with its arguments already typed.

mod command;
mod commit;
mod index;
mod net;
mod refresh;

pub use command::RunGit;
pub use commit::NewCommit;
pub use index::{AbortMerge, StageFiles, UnstageFiles};
pub use net::{FetchRemote, PullBranch};
pub use refresh::RefreshRepo;

use crate::context::FlowContext;
use crate::error::{TaskError, TaskResult};
use crate::task::Task;
use git2::{ErrorCode, Repository};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Which catalogue entry a task is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskKind {
    RefreshRepo,
    FetchRemote,
    PullBranch,
    StageFiles,
    UnstageFiles,
    NewCommit,
    AbortMerge,
    RunGit,
    /// Defined outside the catalogue
    Custom,
}

impl TaskKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            TaskKind::RefreshRepo => "Refresh",
            TaskKind::FetchRemote => "Fetch remote",
            TaskKind::PullBranch => "Pull",
            TaskKind::StageFiles => "Stage files",
            TaskKind::UnstageFiles => "Unstage files",
            TaskKind::NewCommit => "Commit",
            TaskKind::AbortMerge => "Abort merge",
            TaskKind::RunGit => "Git command",
            TaskKind::Custom => "Task",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// A task to put on the runner, with its arguments
pub enum TaskRequest {
    RefreshRepo(RefreshRepo),
    FetchRemote(FetchRemote),
    PullBranch(PullBranch),
    StageFiles(StageFiles),
    UnstageFiles(UnstageFiles),
    NewCommit(NewCommit),
    AbortMerge(AbortMerge),
    RunGit(RunGit),
    Custom(Arc<dyn Task>),
}

impl TaskRequest {
    pub fn custom(task: impl Task) -> Self {
        TaskRequest::Custom(Arc::new(task))
    }

    pub fn kind(&self) -> TaskKind {
        match self {
            TaskRequest::RefreshRepo(_) => TaskKind::RefreshRepo,
            TaskRequest::FetchRemote(_) => TaskKind::FetchRemote,
            TaskRequest::PullBranch(_) => TaskKind::PullBranch,
            TaskRequest::StageFiles(_) => TaskKind::StageFiles,
            TaskRequest::UnstageFiles(_) => TaskKind::UnstageFiles,
            TaskRequest::NewCommit(_) => TaskKind::NewCommit,
            TaskRequest::AbortMerge(_) => TaskKind::AbortMerge,
            TaskRequest::RunGit(_) => TaskKind::RunGit,
            TaskRequest::Custom(task) => task.kind(),
        }
    }

    /// The task object the runner drives
    pub fn instantiate(self) -> Arc<dyn Task> {
        match self {
            TaskRequest::RefreshRepo(task) => Arc::new(task),
            TaskRequest::FetchRemote(task) => Arc::new(task),
            TaskRequest::PullBranch(task) => Arc::new(task),
            TaskRequest::StageFiles(task) => Arc::new(task),
            TaskRequest::UnstageFiles(task) => Arc::new(task),
            TaskRequest::NewCommit(task) => Arc::new(task),
            TaskRequest::AbortMerge(task) => Arc::new(task),
            TaskRequest::RunGit(task) => Arc::new(task),
            TaskRequest::Custom(task) => task,
        }
    }
}

impl fmt::Debug for TaskRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskRequest({})", self.kind())
    }
}

/// Whether `task` only reads state and may be replaced at any time
pub(crate) fn is_refresh(task: &dyn Task) -> bool {
    task.kind() == TaskKind::RefreshRepo
}

/// Fresh libgit2 handle on the repository the chain works on
fn open_repo(ctx: &FlowContext) -> TaskResult<Repository> {
    let workdir = ctx.workdir()?;
    Repository::open(&workdir).map_err(|e| {
        if e.code() == ErrorCode::NotFound {
            TaskError::RepoGone(workdir)
        } else {
            e.into()
        }
    })
}
