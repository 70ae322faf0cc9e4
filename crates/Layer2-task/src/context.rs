//! Flow context
//!
//! The handle a task's flow uses to talk to the runner. Every `async` method
//! here that suspends is a point where the runner may move the flow to
//! another context, wait for the user or a process, or discard the chain if
//! it was interrupted.

use crate::chain::Chain;
use crate::effects::{JumpTarget, TaskEffects};
use crate::error::{AbortTask, TaskError, TaskResult};
use crate::flow::Suspend;
use crate::process::{ProcessOutput, ProcessSpec, ProcessWrapper};
use crate::prompt::{PromptKind, UserDecision, UserPrompt};
use crate::repo::RepoProbe;
use crate::task::Task;
use crate::token::ControlToken;
use branchwork_foundation::EngineConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Handle given to [`Task::flow`]
#[derive(Clone)]
pub struct FlowContext {
    chain: Arc<Chain>,
    depth: usize,
}

impl FlowContext {
    pub(crate) fn root(chain: Arc<Chain>) -> Self {
        Self { chain, depth: 0 }
    }

    pub(crate) fn chain(&self) -> &Arc<Chain> {
        &self.chain
    }

    pub(crate) fn suspend(&self, token: ControlToken) -> Suspend<'_> {
        Suspend::new(&self.chain, token)
    }

    pub(crate) fn require_interactive(&self, what: &str) -> TaskResult<()> {
        if self.chain.on_interactive() {
            Ok(())
        } else {
            Err(TaskError::internal(format!(
                "{}: must {} on the interactive context",
                self.name(),
                what
            )))
        }
    }

    /// Name of this task, prefixed with its parents' names
    pub fn name(&self) -> String {
        self.chain.frame_name(self.depth)
    }

    /// 0 for the root task
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_root(&self) -> bool {
        self.depth == 0
    }

    pub fn is_on_interactive(&self) -> bool {
        self.chain.on_interactive()
    }

    /// Whether the chain has been interrupted. It will be discarded at its
    /// next suspension point; long loops on the worker can bail early.
    pub fn is_interrupted(&self) -> bool {
        self.chain.is_interrupted()
    }

    /// Snapshot of the engine settings
    pub fn config(&self) -> EngineConfig {
        self.chain.services.config.read().clone()
    }

    pub fn repo(&self) -> TaskResult<Arc<dyn RepoProbe>> {
        self.chain
            .services
            .repo
            .clone()
            .ok_or_else(|| TaskError::abort("No repository is open."))
    }

    pub fn workdir(&self) -> TaskResult<PathBuf> {
        Ok(self.repo()?.workdir().to_path_buf())
    }

    // ========================================================================
    // Context switches
    // ========================================================================

    /// Continue on the worker thread
    pub async fn enter_worker(&self) {
        self.chain.set_on_interactive(false);
        self.suspend(ControlToken::ContinueWorker).await;
    }

    /// Continue on the interactive context
    pub async fn enter_interactive(&self) {
        self.chain.set_on_interactive(true);
        self.suspend(ControlToken::ContinueInteractive).await;
    }

    /// Suspend and resume on the same context
    pub async fn yield_now(&self) {
        let token = if self.chain.on_interactive() {
            ControlToken::ContinueInteractive
        } else {
            ControlToken::ContinueWorker
        };
        self.suspend(token).await;
    }

    // ========================================================================
    // Outcome
    // ========================================================================

    pub fn add_effects(&self, effects: TaskEffects) {
        self.chain.with_frame(self.depth, |frame| frame.effects |= effects);
    }

    pub fn effects(&self) -> TaskEffects {
        self.chain
            .with_frame(self.depth, |frame| frame.effects)
            .unwrap_or_default()
    }

    /// Set where to navigate on completion, unless already set
    pub fn set_jump_target(&self, target: JumpTarget) {
        self.chain.with_frame(self.depth, |frame| {
            if frame.jump_target.is_none() {
                frame.jump_target = Some(target);
            }
        });
    }

    pub fn override_jump_target(&self, target: JumpTarget) {
        self.chain
            .with_frame(self.depth, |frame| frame.jump_target = Some(target));
    }

    pub fn jump_target(&self) -> Option<JumpTarget> {
        self.chain
            .with_frame(self.depth, |frame| frame.jump_target.clone())
            .flatten()
    }

    /// Set the completion message. Sub-tasks can no longer replace it.
    pub fn set_post_status(&self, status: impl Into<String>) {
        let status = status.into();
        self.chain.with_frame(self.depth, |frame| {
            frame.post_status = Some(status);
            frame.post_status_locked = true;
        });
    }

    pub fn post_status(&self) -> Option<String> {
        self.chain
            .with_frame(self.depth, |frame| frame.post_status.clone())
            .flatten()
    }

    // ========================================================================
    // Sub-tasks
    // ========================================================================

    /// Run another task's flow as part of this chain, then fold its effects,
    /// status and jump target into this task.
    ///
    /// Must be called on the interactive context. Returns the sub-task so its
    /// fields can be inspected. If it fails, it is popped and the error is
    /// returned to the caller.
    pub async fn subtask<T: Task>(&self, task: T) -> TaskResult<Arc<T>> {
        self.require_interactive("start a subtask")?;

        let task = Arc::new(task);
        let name = format!("{}:{}", self.name(), task.name());
        let depth = self
            .chain
            .push_frame(Arc::clone(&task) as Arc<dyn Task>, name)?;
        let child = FlowContext {
            chain: Arc::clone(&self.chain),
            depth,
        };

        let result = task.flow(&child).await;

        if !self.chain.on_interactive() {
            self.enter_interactive().await;
        }
        self.chain.pop_frame();

        result.map(|()| task)
    }

    // ========================================================================
    // User interaction
    // ========================================================================

    /// Show a prompt and suspend until the user answers it
    pub async fn ask_user(&self, prompt: UserPrompt) -> TaskResult<UserDecision> {
        self.require_interactive("prompt the user")?;

        let id = self.chain.begin_prompt();
        debug!("{} asks: {} ({})", self.name(), prompt.title, id);
        self.chain
            .services
            .observer
            .on_user_prompt(id, &self.name(), &prompt);

        self.suspend(ControlToken::WaitForUser).await;

        let decision = self.chain.take_decision(id)?;
        if decision.accepted && decision.dont_ask_again {
            if let Some(key) = &prompt.dont_ask_again_key {
                info!("Won't ask again: {}", key);
                self.chain.services.config.write().remember_dont_ask_again(key);
            }
        }
        Ok(decision)
    }

    /// Ask for confirmation. Rejecting aborts the chain silently, unless the
    /// prompt cannot be cancelled. Skips the prompt entirely if the user
    /// ticked "don't ask again" for its key before.
    pub async fn confirm(&self, prompt: UserPrompt) -> TaskResult<()> {
        if let Some(key) = &prompt.dont_ask_again_key {
            if self.chain.services.config.read().is_dont_ask_again(key) {
                debug!("Skipping confirmation {}", key);
                return Ok(());
            }
        }

        let can_cancel = prompt.can_cancel;
        let decision = self.ask_user(prompt).await?;
        if decision.accepted || !can_cancel {
            Ok(())
        } else {
            Err(AbortTask::silent().into())
        }
    }

    /// Ask for a line of text. Rejecting aborts the chain silently.
    pub async fn input(&self, prompt: UserPrompt) -> TaskResult<String> {
        let prompt = UserPrompt {
            kind: PromptKind::Input,
            ..prompt
        };
        let decision = self.ask_user(prompt).await?;
        if !decision.accepted {
            return Err(AbortTask::silent().into());
        }
        Ok(decision.value.unwrap_or_default())
    }

    // ========================================================================
    // Processes
    // ========================================================================

    /// Start a process, wait for it and fail on unsuccessful exit
    pub async fn run_process(&self, spec: ProcessSpec) -> TaskResult<ProcessOutput> {
        let mut process = ProcessWrapper::new(spec);
        process.start(self).await?;
        process.wait(self, true).await
    }

    /// Git invocation in the repository's working directory
    pub fn git<I, S>(&self, args: I) -> TaskResult<ProcessSpec>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let workdir = self.workdir()?;
        Ok(crate::git::command(&self.config(), args).cwd(workdir))
    }
}
