//! Task definition
//!
//! A task is a unit of user-visible work against the repository. Its
//! [`flow`](Task::flow) is an async routine that the runner drives one step at
//! a time; every `.await` on a [`FlowContext`] helper is a suspension point.
//!
//! Flows must only await `FlowContext` helpers (and other flows through
//! [`FlowContext::subtask`]). Awaiting an arbitrary future, such as a tokio
//! timer, fails the chain: nothing would ever resume it.

use crate::context::FlowContext;
use crate::error::{TaskError, TaskResult};
use crate::prereqs::TaskPrereqs;
use crate::report::FailureReport;
use crate::tasks::TaskKind;
use async_trait::async_trait;

/// Task trait - implement to add new tasks
#[async_trait]
pub trait Task: Send + Sync + 'static {
    /// Which catalogue entry this is
    fn kind(&self) -> TaskKind {
        TaskKind::Custom
    }

    /// Display name, used in busy messages, logs and reports
    fn name(&self) -> String {
        self.kind().display_name().to_string()
    }

    /// Repository conditions checked before the first step
    fn prereqs(&self) -> TaskPrereqs {
        TaskPrereqs::NOTHING
    }

    /// Whether this task may interrupt `running` when put while it is busy
    fn can_kill(&self, _running: &dyn Task) -> bool {
        false
    }

    /// Whether any newly put task may interrupt this one
    fn is_freely_interruptible(&self) -> bool {
        false
    }

    /// Critical tasks are queued instead of rejected when the runner is busy
    fn is_critical(&self) -> bool {
        false
    }

    /// The task's routine. Starts on the interactive context.
    async fn flow(&self, ctx: &FlowContext) -> TaskResult<()>;

    /// Called on the interactive context when the task is popped off its
    /// chain, whether it succeeded, failed or was interrupted.
    fn cleanup(&self) {}

    /// Describe a failure of the chain rooted at this task
    fn report_error(&self, error: &TaskError) -> FailureReport {
        FailureReport::from_error(&self.name(), error)
    }
}

impl std::fmt::Debug for dyn Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Task({})", self.name())
    }
}
