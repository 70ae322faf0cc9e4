use super::{is_refresh, open_repo, TaskKind};
use crate::context::FlowContext;
use crate::effects::{JumpTarget, TaskEffects};
use crate::error::{AbortTask, TaskResult};
use crate::prereqs::TaskPrereqs;
use crate::task::Task;
use async_trait::async_trait;
use git2::{ErrorCode, Repository};
use parking_lot::Mutex;

/// Remote-tracking branch the checked-out branch follows
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Upstream {
    pub branch: String,
    pub remote: String,
    /// e.g. `origin/main`
    pub shorthand: String,
}

pub(crate) fn detect_upstream(repo: &Repository) -> TaskResult<Upstream> {
    let switch_first = || AbortTask::new("Please switch to a local branch before performing this action.");

    let head = match repo.head() {
        Ok(head) if head.is_branch() => head,
        Ok(_) => return Err(switch_first().into()),
        Err(e) if e.code() == ErrorCode::UnbornBranch => return Err(switch_first().into()),
        Err(e) => return Err(e.into()),
    };
    let refname = head.name().ok_or_else(switch_first)?.to_string();
    let branch = head.shorthand().unwrap_or(&refname).to_string();

    let not_tracking = || {
        AbortTask::new(format!(
            "Can’t fetch remote changes on “{}” because this branch isn’t tracking a remote branch.",
            branch
        ))
    };

    let upstream_ref = match repo.branch_upstream_name(&refname) {
        Ok(buf) => buf.as_str().map(str::to_string).ok_or_else(not_tracking)?,
        Err(e) if e.code() == ErrorCode::NotFound => return Err(not_tracking().into()),
        Err(e) => return Err(e.into()),
    };
    let remote = repo
        .branch_upstream_remote(&refname)
        .ok()
        .and_then(|buf| buf.as_str().map(str::to_string))
        .ok_or_else(not_tracking)?;

    let shorthand = upstream_ref
        .strip_prefix("refs/remotes/")
        .unwrap_or(&upstream_ref)
        .to_string();

    Ok(Upstream {
        branch,
        remote,
        shorthand,
    })
}

// ============================================================================
// FetchRemote
// ============================================================================

/// `git fetch` one remote. Without a name, fetches the remote the
/// checked-out branch tracks.
#[derive(Debug, Default)]
pub struct FetchRemote {
    pub remote: Option<String>,
    fetched: Mutex<Option<String>>,
}

impl FetchRemote {
    pub fn new(remote: Option<String>) -> Self {
        Self {
            remote,
            fetched: Mutex::new(None),
        }
    }

    /// Name of the remote that was fetched
    pub fn fetched_remote(&self) -> Option<String> {
        self.fetched.lock().clone()
    }
}

#[async_trait]
impl Task for FetchRemote {
    fn kind(&self) -> TaskKind {
        TaskKind::FetchRemote
    }

    fn can_kill(&self, running: &dyn Task) -> bool {
        is_refresh(running) || running.kind() == TaskKind::FetchRemote
    }

    async fn flow(&self, ctx: &FlowContext) -> TaskResult<()> {
        let remote = {
            let repo = open_repo(ctx)?;
            let remote = match &self.remote {
                Some(remote) if !remote.is_empty() => remote.clone(),
                _ => detect_upstream(&repo)?.remote,
            };
            if repo.find_remote(&remote).is_err() {
                return Err(AbortTask::new(format!("There is no remote named “{}”.", remote)).into());
            }
            remote
        };

        ctx.add_effects(TaskEffects::REMOTES);
        let spec = ctx
            .git(["fetch", "--progress", "--prune", remote.as_str()])?
            .with_progress();
        ctx.run_process(spec).await?;

        *self.fetched.lock() = Some(remote.clone());
        ctx.set_post_status(format!("Fetched remote “{}”.", remote));
        Ok(())
    }
}

// ============================================================================
// PullBranch
// ============================================================================

/// Fetch the upstream of the checked-out branch, then fast-forward to it
#[derive(Debug, Default)]
pub struct PullBranch;

#[async_trait]
impl Task for PullBranch {
    fn kind(&self) -> TaskKind {
        TaskKind::PullBranch
    }

    fn prereqs(&self) -> TaskPrereqs {
        TaskPrereqs::NO_UNBORN | TaskPrereqs::NO_DETACHED | TaskPrereqs::NO_CONFLICTS
    }

    fn can_kill(&self, running: &dyn Task) -> bool {
        is_refresh(running)
    }

    async fn flow(&self, ctx: &FlowContext) -> TaskResult<()> {
        let upstream = detect_upstream(&open_repo(ctx)?)?;

        ctx.subtask(FetchRemote::new(Some(upstream.remote.clone())))
            .await?;

        ctx.add_effects(TaskEffects::WORKDIR | TaskEffects::REFS | TaskEffects::HEAD | TaskEffects::INDEX);
        let spec = ctx.git(["merge", "--ff-only", upstream.shorthand.as_str()])?;
        let output = ctx.run_process(spec).await?;

        ctx.set_jump_target(JumpTarget::Head);
        if output.stdout.contains("Already up to date") {
            ctx.set_post_status(format!("“{}” is already up to date.", upstream.branch));
        } else {
            ctx.set_post_status(format!(
                "Pulled “{}” into “{}”.",
                upstream.shorthand, upstream.branch
            ));
        }
        Ok(())
    }
}
