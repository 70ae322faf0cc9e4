use super::TaskKind;
use crate::context::FlowContext;
use crate::effects::TaskEffects;
use crate::error::TaskResult;
use crate::repo::RepoStatus;
use crate::task::Task;
use async_trait::async_trait;
use parking_lot::Mutex;

/// Reload the repository status.
///
/// Read-only, so anything put on the runner may replace it.
#[derive(Debug, Default)]
pub struct RefreshRepo {
    status: Mutex<Option<RepoStatus>>,
}

impl RefreshRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status read by the last run
    pub fn status(&self) -> Option<RepoStatus> {
        self.status.lock().clone()
    }
}

#[async_trait]
impl Task for RefreshRepo {
    fn kind(&self) -> TaskKind {
        TaskKind::RefreshRepo
    }

    fn can_kill(&self, running: &dyn Task) -> bool {
        super::is_refresh(running)
    }

    fn is_freely_interruptible(&self) -> bool {
        true
    }

    async fn flow(&self, ctx: &FlowContext) -> TaskResult<()> {
        let repo = ctx.repo()?;
        ctx.enter_worker().await;

        let status = repo.status()?;
        *self.status.lock() = Some(status);

        ctx.add_effects(TaskEffects::DEFAULT_REFRESH);
        Ok(())
    }
}
