use super::{is_refresh, open_repo, TaskKind};
use crate::context::FlowContext;
use crate::effects::{JumpTarget, TaskEffects};
use crate::error::{AbortTask, ConflictError, ConflictScope, MultiFileError, Severity, TaskResult};
use crate::prompt::UserPrompt;
use crate::repo::RepoState;
use crate::report::plural;
use crate::task::Task;
use async_trait::async_trait;
use git2::{ErrorCode, Repository, Status, StatusOptions};
use std::path::Path;

/// Selected paths that are still in conflict
fn conflicted_among(repo: &Repository, paths: &[String]) -> TaskResult<Vec<String>> {
    let index = repo.index()?;
    if !index.has_conflicts() {
        return Ok(Vec::new());
    }
    let mut conflicted = Vec::new();
    for conflict in index.conflicts()? {
        let conflict = conflict?;
        let entry = conflict.our.or(conflict.their).or(conflict.ancestor);
        if let Some(entry) = entry {
            let path = String::from_utf8_lossy(&entry.path).into_owned();
            if paths.contains(&path) {
                conflicted.push(path);
            }
        }
    }
    Ok(conflicted)
}

fn deny_conflicts(repo: &Repository, paths: &[String]) -> TaskResult<()> {
    let conflicts = conflicted_among(repo, paths)?;
    if conflicts.is_empty() {
        Ok(())
    } else {
        Err(ConflictError::new(ConflictScope::Workdir, conflicts).into())
    }
}

// ============================================================================
// StageFiles
// ============================================================================

/// Add files to the index. Paths that no longer exist are staged as deleted.
#[derive(Debug, Default)]
pub struct StageFiles {
    pub paths: Vec<String>,
}

impl StageFiles {
    pub fn new(paths: Vec<String>) -> Self {
        Self { paths }
    }
}

#[async_trait]
impl Task for StageFiles {
    fn kind(&self) -> TaskKind {
        TaskKind::StageFiles
    }

    // Holding a key down in a file list fires one of these per row; a
    // refresh in between must not get in the way.
    fn can_kill(&self, running: &dyn Task) -> bool {
        is_refresh(running)
    }

    async fn flow(&self, ctx: &FlowContext) -> TaskResult<()> {
        if self.paths.is_empty() {
            return Err(AbortTask::silent().into());
        }
        deny_conflicts(&open_repo(ctx)?, &self.paths)?;

        ctx.enter_worker().await;
        ctx.add_effects(TaskEffects::WORKDIR | TaskEffects::INDEX);

        let workdir = ctx.workdir()?;
        let repo = open_repo(ctx)?;
        let mut index = repo.index()?;
        let mut errors = MultiFileError::new("Some files couldn’t be staged.");

        for path in &self.paths {
            let result = if workdir.join(path).exists() {
                index.add_path(Path::new(path))
            } else {
                index.remove_path(Path::new(path))
            };
            match result {
                Ok(()) => errors.add_file_success(),
                Err(e) => errors.add_file_error(path.as_str(), Some(e.message())),
            }
        }
        index.write()?;

        if let Some(first) = self.paths.first() {
            ctx.set_jump_target(JumpTarget::workdir_file(first.as_str()));
        }
        errors.into_result()?;

        ctx.set_post_status(format!("{} staged.", plural(self.paths.len(), "file", "files")));
        Ok(())
    }
}

// ============================================================================
// UnstageFiles
// ============================================================================

/// Reset files in the index to their state in HEAD
#[derive(Debug, Default)]
pub struct UnstageFiles {
    pub paths: Vec<String>,
}

impl UnstageFiles {
    pub fn new(paths: Vec<String>) -> Self {
        Self { paths }
    }
}

#[async_trait]
impl Task for UnstageFiles {
    fn kind(&self) -> TaskKind {
        TaskKind::UnstageFiles
    }

    fn can_kill(&self, running: &dyn Task) -> bool {
        is_refresh(running)
    }

    async fn flow(&self, ctx: &FlowContext) -> TaskResult<()> {
        if self.paths.is_empty() {
            return Err(AbortTask::silent().into());
        }

        ctx.enter_worker().await;
        ctx.add_effects(TaskEffects::WORKDIR | TaskEffects::INDEX);

        let repo = open_repo(ctx)?;
        let head = match repo.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(e) if e.code() == ErrorCode::UnbornBranch => None,
            Err(e) => return Err(e.into()),
        };
        let mut errors = MultiFileError::new("Some files couldn’t be unstaged.");

        match head {
            Some(head) => {
                for path in &self.paths {
                    match repo.reset_default(Some(head.as_object()), [path.as_str()]) {
                        Ok(()) => errors.add_file_success(),
                        Err(e) => errors.add_file_error(path.as_str(), Some(e.message())),
                    }
                }
            }
            None => {
                // Nothing to reset to; drop the entries instead
                let mut index = repo.index()?;
                for path in &self.paths {
                    match index.remove_path(Path::new(path)) {
                        Ok(()) => errors.add_file_success(),
                        Err(e) => errors.add_file_error(path.as_str(), Some(e.message())),
                    }
                }
                index.write()?;
            }
        }
        errors.into_result()?;

        ctx.set_post_status(format!("{} unstaged.", plural(self.paths.len(), "file", "files")));
        Ok(())
    }
}

// ============================================================================
// AbortMerge
// ============================================================================

/// Abort an ongoing merge, cherry-pick or revert, or clear leftover conflicts
#[derive(Debug, Default)]
pub struct AbortMerge;

struct AbortPlan {
    title: &'static str,
    clause: &'static str,
    verb: &'static str,
    post_status: &'static str,
}

impl AbortMerge {
    fn plan(state: RepoState, any_conflicts: bool) -> TaskResult<AbortPlan> {
        let plan = match state {
            RepoState::CherryPick => AbortPlan {
                title: "Abort cherry-pick",
                clause: "abort the ongoing cherry-pick",
                verb: "Abort",
                post_status: "Cherry-pick aborted.",
            },
            RepoState::Merge => AbortPlan {
                title: "Abort merge",
                clause: "abort the ongoing merge",
                verb: "Abort",
                post_status: "Merge aborted.",
            },
            RepoState::Revert => AbortPlan {
                title: "Abort revert",
                clause: "abort the ongoing revert",
                verb: "Abort",
                post_status: "Revert aborted.",
            },
            _ if any_conflicts => AbortPlan {
                title: "Reset index",
                clause: "reset the index",
                verb: "Reset",
                post_status: "Index reset.",
            },
            _ => {
                return Err(AbortTask::new("No abortable state is in progress.")
                    .with_severity(Severity::Information)
                    .into())
            }
        };
        Ok(plan)
    }

    /// Files `git reset --merge` would touch. Fails if any of them also has
    /// unstaged changes, since those would be lost.
    fn reset_file_list(repo: &Repository, clause: &str) -> TaskResult<Vec<String>> {
        let mut options = StatusOptions::new();
        options.include_untracked(false).include_ignored(false);
        let statuses = repo.statuses(Some(&mut options))?;

        let staged = Status::INDEX_NEW
            | Status::INDEX_MODIFIED
            | Status::INDEX_DELETED
            | Status::INDEX_RENAMED
            | Status::INDEX_TYPECHANGE;
        let unstaged = Status::WT_MODIFIED | Status::WT_DELETED | Status::WT_TYPECHANGE;

        let mut files = Vec::new();
        let mut mixed = MultiFileError::default();
        for entry in statuses.iter() {
            let status = entry.status();
            let Some(path) = entry.path() else { continue };
            if status.contains(Status::CONFLICTED) {
                files.push(path.to_string());
            } else if status.intersects(staged) {
                if status.intersects(unstaged) {
                    mixed.add_file_error(path, None::<String>);
                } else {
                    files.push(path.to_string());
                }
            }
        }

        if mixed.has_errors() {
            mixed.message = format!(
                "Cannot {} right now, because {} contain both staged and unstaged changes.",
                clause,
                plural(mixed.file_errors.len(), "file", "files")
            );
            return Err(mixed.into());
        }
        Ok(files)
    }
}

#[async_trait]
impl Task for AbortMerge {
    fn kind(&self) -> TaskKind {
        TaskKind::AbortMerge
    }

    async fn flow(&self, ctx: &FlowContext) -> TaskResult<()> {
        let status = ctx.repo()?.status()?;
        let plan = Self::plan(status.state, status.any_conflicts)?;
        let files = Self::reset_file_list(&open_repo(ctx)?, plan.clause)?;

        let mut text = format!("Do you want to {}?", plan.clause);
        if files.is_empty() {
            text.push_str("\nNo files are affected.");
        } else {
            if status.any_conflicts {
                text.push_str("\nAll conflicts will be cleared and all staged changes will be lost.");
            } else {
                text.push_str("\nAll staged changes will be lost.");
            }
            text.push_str(&format!("\n{} will be reset:", plural(files.len(), "file", "files")));
        }

        ctx.confirm(
            UserPrompt::confirm(plan.title, text)
                .with_verb(plan.verb)
                .with_details(files),
        )
        .await?;

        ctx.add_effects(TaskEffects::DEFAULT_REFRESH);
        ctx.run_process(ctx.git(["reset", "--merge"])?).await?;
        open_repo(ctx)?.cleanup_state()?;

        ctx.set_post_status(plan.post_status);
        Ok(())
    }
}
