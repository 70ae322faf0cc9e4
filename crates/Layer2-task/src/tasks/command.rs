use super::{is_refresh, TaskKind};
use crate::context::FlowContext;
use crate::effects::TaskEffects;
use crate::error::{AbortTask, TaskResult};
use crate::task::Task;
use async_trait::async_trait;
use parking_lot::Mutex;

/// Run an arbitrary git command with progress, then refresh everything
#[derive(Debug, Default)]
pub struct RunGit {
    pub args: Vec<String>,
    stdout: Mutex<Option<String>>,
}

impl RunGit {
    pub fn new(args: Vec<String>) -> Self {
        Self {
            args,
            stdout: Mutex::new(None),
        }
    }

    /// Captured standard output, once the command exited
    pub fn stdout(&self) -> Option<String> {
        self.stdout.lock().clone()
    }
}

#[async_trait]
impl Task for RunGit {
    fn kind(&self) -> TaskKind {
        TaskKind::RunGit
    }

    fn can_kill(&self, running: &dyn Task) -> bool {
        is_refresh(running)
    }

    async fn flow(&self, ctx: &FlowContext) -> TaskResult<()> {
        if self.args.is_empty() {
            return Err(AbortTask::new("No git command given.").into());
        }

        ctx.add_effects(TaskEffects::DEFAULT_REFRESH);
        let spec = ctx.git(self.args.iter().cloned())?.with_progress();
        let output = ctx.run_process(spec).await?;

        if let Some(last) = output.stdout.lines().map(str::trim).filter(|l| !l.is_empty()).last() {
            ctx.set_post_status(last.to_string());
        }
        *self.stdout.lock() = Some(output.stdout);
        Ok(())
    }
}
