//! Chain state
//!
//! A chain is a root task plus the sub-tasks it is currently running. All of
//! them share one [`Chain`]: the stack of frames, the token slot the current
//! flow step deposits into, the single owned process and the replies the
//! runner delivers (user answers, process events).

use crate::effects::{JumpTarget, TaskEffects};
use crate::error::{TaskError, TaskResult};
use crate::observer::TaskObserver;
use crate::process::{ProcessHandle, ProcessOutput, ProcessSignal};
use crate::prompt::{PromptId, UserDecision};
use crate::repo::RepoProbe;
use crate::runner::RunnerEvent;
use crate::task::Task;
use crate::token::ControlToken;
use branchwork_foundation::EngineConfig;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, warn};

pub(crate) type ChainId = u64;

// ============================================================================
// Services
// ============================================================================

/// Everything a chain needs from the runner that owns it
pub(crate) struct Services {
    pub observer: Arc<dyn TaskObserver>,
    pub events: UnboundedSender<RunnerEvent>,
    pub runtime: tokio::runtime::Handle,
    pub config: Arc<RwLock<EngineConfig>>,
    pub repo: Option<Arc<dyn RepoProbe>>,
    /// Raised when the current chain must be discarded at its next stop
    pub interrupted: Arc<AtomicBool>,
    next_id: AtomicU64,
}

impl Services {
    pub fn new(
        observer: Arc<dyn TaskObserver>,
        events: UnboundedSender<RunnerEvent>,
        runtime: tokio::runtime::Handle,
        config: Arc<RwLock<EngineConfig>>,
        repo: Option<Arc<dyn RepoProbe>>,
    ) -> Self {
        Self {
            observer,
            events,
            runtime,
            config,
            repo,
            interrupted: Arc::new(AtomicBool::new(false)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Unique id for chains, prompts and processes
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

// ============================================================================
// Frames
// ============================================================================

/// One task on the chain's stack, with what it has accumulated so far
pub(crate) struct TaskFrame {
    pub task: Arc<dyn Task>,
    pub name: String,
    pub effects: TaskEffects,
    pub jump_target: Option<JumpTarget>,
    pub post_status: Option<String>,
    pub post_status_locked: bool,
}

impl TaskFrame {
    fn new(task: Arc<dyn Task>, name: String) -> Self {
        Self {
            task,
            name,
            effects: TaskEffects::NOTHING,
            jump_target: None,
            post_status: None,
            post_status_locked: false,
        }
    }

    /// Fold a finished sub-task into this frame
    fn absorb(&mut self, child: &TaskFrame) {
        self.effects |= child.effects;

        if !self.post_status_locked {
            if let Some(status) = child.post_status.as_ref().filter(|s| !s.is_empty()) {
                self.post_status = Some(status.clone());
            }
        }

        match (&self.jump_target, &child.jump_target) {
            (None, Some(target)) => self.jump_target = Some(target.clone()),
            (Some(mine), Some(theirs)) if mine != theirs => {
                warn!(
                    "Subtask {}: ignoring jump target {} (parent has {})",
                    child.name, theirs, mine
                );
            }
            _ => {}
        }
    }
}

/// What a chain produced, taken from its root frame
#[derive(Debug, Clone, Default)]
pub(crate) struct ChainSummary {
    pub effects: TaskEffects,
    pub jump_target: Option<JumpTarget>,
    pub post_status: Option<String>,
}

// ============================================================================
// Process slot and mailbox
// ============================================================================

/// The chain's single external process
pub(crate) struct OwnedProcess {
    pub id: u64,
    /// Stack depth of the frame that started it
    pub owner: usize,
    pub signals: UnboundedSender<ProcessSignal>,
}

/// Replies delivered by the runner, picked up by the flow when it resumes
#[derive(Default)]
struct Mailbox {
    decision: Option<(PromptId, UserDecision)>,
    started: Option<Result<ProcessHandle, String>>,
    exited: Option<ProcessOutput>,
}

#[derive(Default)]
struct ChainState {
    stack: Vec<TaskFrame>,
    token: Option<ControlToken>,
    overfilled: bool,
    on_interactive: bool,
    process: Option<OwnedProcess>,
    prompt: Option<PromptId>,
    mailbox: Mailbox,
}

// ============================================================================
// Chain
// ============================================================================

pub(crate) struct Chain {
    pub id: ChainId,
    pub services: Arc<Services>,
    state: Mutex<ChainState>,
}

impl Chain {
    pub fn new(services: Arc<Services>, root: Arc<dyn Task>, name: String) -> Self {
        let state = ChainState {
            stack: vec![TaskFrame::new(root, name)],
            on_interactive: true,
            ..Default::default()
        };
        Self {
            id: services.next_id(),
            services,
            state: Mutex::new(state),
        }
    }

    // ------------------------------------------------------------------------
    // Token slot
    // ------------------------------------------------------------------------

    pub fn deposit(&self, token: ControlToken) {
        let mut state = self.state.lock();
        if state.token.is_some() {
            state.overfilled = true;
        }
        state.token = Some(token);
    }

    /// Token left by the step that just returned `Pending`
    pub fn take_token(&self) -> TaskResult<ControlToken> {
        let mut state = self.state.lock();
        let token = state.token.take();
        if std::mem::take(&mut state.overfilled) {
            return Err(TaskError::internal(
                "flow reached more than one suspension point in a single step",
            ));
        }
        token.ok_or_else(|| {
            TaskError::internal("flow awaited a future that is not a suspension point")
        })
    }

    pub fn clear_token(&self) {
        let mut state = self.state.lock();
        state.token = None;
        state.overfilled = false;
    }

    // ------------------------------------------------------------------------
    // Context
    // ------------------------------------------------------------------------

    pub fn on_interactive(&self) -> bool {
        self.state.lock().on_interactive
    }

    pub fn set_on_interactive(&self, on_interactive: bool) {
        self.state.lock().on_interactive = on_interactive;
    }

    pub fn is_interrupted(&self) -> bool {
        self.services.interrupted.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------------
    // Frames
    // ------------------------------------------------------------------------

    /// Push a sub-task; returns its depth
    pub fn push_frame(&self, task: Arc<dyn Task>, name: String) -> TaskResult<usize> {
        let mut state = self.state.lock();
        if let Some(process) = &state.process {
            return Err(TaskError::internal(format!(
                "cannot start subtask {} while the frame at depth {} owns a process",
                name, process.owner
            )));
        }
        debug!("Push subtask {}", name);
        state.stack.push(TaskFrame::new(task, name));
        Ok(state.stack.len() - 1)
    }

    /// Read or update the frame at `depth`
    pub fn with_frame<T>(&self, depth: usize, f: impl FnOnce(&mut TaskFrame) -> T) -> Option<T> {
        let mut state = self.state.lock();
        state.stack.get_mut(depth).map(f)
    }

    pub fn frame_name(&self, depth: usize) -> String {
        self.with_frame(depth, |frame| frame.name.clone())
            .unwrap_or_default()
    }

    /// Pop the innermost frame, merge it into its parent and run its cleanup.
    /// Returns `None` if the stack was already empty.
    pub fn pop_frame(&self) -> Option<TaskFrame> {
        let popped = {
            let mut state = self.state.lock();
            let child = state.stack.pop()?;
            let depth = state.stack.len();

            if state.process.as_ref().is_some_and(|p| p.owner >= depth) {
                error!("{} popped while still owning a process", child.name);
                if let Some(process) = state.process.take() {
                    let _ = process.signals.send(ProcessSignal::Terminate);
                }
            }

            if let Some(parent) = state.stack.last_mut() {
                parent.absorb(&child);
            }
            child
        };

        popped.task.cleanup();
        Some(popped)
    }

    /// Pop every frame. Returns what the root accumulated, or `None` if the
    /// chain had already been unwound.
    pub fn unwind(&self) -> Option<ChainSummary> {
        let mut root = None;
        while let Some(frame) = self.pop_frame() {
            root = Some(frame);
        }
        root.map(|frame| ChainSummary {
            effects: frame.effects,
            jump_target: frame.jump_target,
            post_status: frame.post_status,
        })
    }

    // ------------------------------------------------------------------------
    // Prompts
    // ------------------------------------------------------------------------

    pub fn begin_prompt(&self) -> PromptId {
        let id = PromptId(self.services.next_id());
        let mut state = self.state.lock();
        state.prompt = Some(id);
        state.mailbox.decision = None;
        id
    }

    pub fn pending_prompt(&self) -> Option<PromptId> {
        self.state.lock().prompt
    }

    /// Store the answer to the outstanding prompt. Returns false if `id` is
    /// not the prompt this chain is waiting on.
    pub fn deliver_decision(&self, id: PromptId, decision: UserDecision) -> bool {
        let mut state = self.state.lock();
        if state.prompt != Some(id) {
            return false;
        }
        state.prompt = None;
        state.mailbox.decision = Some((id, decision));
        true
    }

    pub fn take_decision(&self, id: PromptId) -> TaskResult<UserDecision> {
        let mut state = self.state.lock();
        match state.mailbox.decision.take() {
            Some((answered, decision)) if answered == id => Ok(decision),
            _ => Err(TaskError::internal(format!("resumed without an answer to {}", id))),
        }
    }

    // ------------------------------------------------------------------------
    // Process slot
    // ------------------------------------------------------------------------

    /// Reserve the chain's process slot for the frame at `owner`
    pub fn claim_process(
        &self,
        owner: usize,
        signals: UnboundedSender<ProcessSignal>,
    ) -> TaskResult<u64> {
        let mut state = self.state.lock();
        if let Some(existing) = &state.process {
            return Err(TaskError::internal(format!(
                "chain already owns process #{}",
                existing.id
            )));
        }
        if owner + 1 != state.stack.len() {
            return Err(TaskError::internal(
                "only the innermost task of a chain may start a process",
            ));
        }
        let id = self.services.next_id();
        state.process = Some(OwnedProcess {
            id,
            owner,
            signals,
        });
        state.mailbox.started = None;
        state.mailbox.exited = None;
        Ok(id)
    }

    pub fn owns_process(&self, id: u64) -> bool {
        self.state
            .lock()
            .process
            .as_ref()
            .is_some_and(|p| p.id == id)
    }

    pub fn process_started(&self, id: u64, handle: ProcessHandle) {
        let mut state = self.state.lock();
        if state.process.as_ref().is_some_and(|p| p.id == id) {
            state.mailbox.started = Some(Ok(handle));
        } else {
            let _ = handle.terminate();
        }
    }

    pub fn process_start_failed(&self, id: u64, message: String) {
        let mut state = self.state.lock();
        if state.process.as_ref().is_some_and(|p| p.id == id) {
            state.process = None;
            state.mailbox.started = Some(Err(message));
        }
    }

    pub fn process_exited(&self, id: u64, output: ProcessOutput) {
        let mut state = self.state.lock();
        if state.process.as_ref().is_some_and(|p| p.id == id) {
            state.mailbox.exited = Some(output);
        }
    }

    pub fn take_process_start(&self) -> TaskResult<Result<ProcessHandle, String>> {
        self.state
            .lock()
            .mailbox
            .started
            .take()
            .ok_or_else(|| TaskError::internal("resumed before the process started"))
    }

    pub fn take_process_exit(&self) -> Option<ProcessOutput> {
        self.state.lock().mailbox.exited.take()
    }

    /// Empty the slot once its process has been waited on
    pub fn release_process(&self, id: u64) {
        let mut state = self.state.lock();
        if state.process.as_ref().is_some_and(|p| p.id == id) {
            state.process = None;
        }
    }

    /// Send a signal to the owned process, if any. Returns whether one was sent.
    pub fn signal_process(&self, signal: ProcessSignal) -> bool {
        let state = self.state.lock();
        match &state.process {
            Some(process) => process.signals.send(signal).is_ok(),
            None => false,
        }
    }

    /// Ask the process to stop and forget about it
    pub fn abandon_process(&self) {
        let process = self.state.lock().process.take();
        if let Some(process) = process {
            debug!("Terminating abandoned process #{}", process.id);
            let _ = process.signals.send(ProcessSignal::Terminate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::FlowContext;
    use crate::observer::NullObserver;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct Probe {
        cleanups: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Task for Probe {
        async fn flow(&self, _ctx: &FlowContext) -> TaskResult<()> {
            Ok(())
        }

        fn cleanup(&self) {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn chain(cleanups: &Arc<AtomicUsize>) -> Chain {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let (events, _rx) = tokio::sync::mpsc::unbounded_channel();
        let services = Services::new(
            Arc::new(NullObserver),
            events,
            runtime.handle().clone(),
            Arc::new(RwLock::new(EngineConfig::default())),
            None,
        );
        let root = Arc::new(Probe {
            cleanups: cleanups.clone(),
        });
        Chain::new(Arc::new(services), root, "Root".to_string())
    }

    fn probe(cleanups: &Arc<AtomicUsize>) -> Arc<dyn Task> {
        Arc::new(Probe {
            cleanups: cleanups.clone(),
        })
    }

    #[test]
    fn test_pop_merges_into_parent() {
        let cleanups = Arc::new(AtomicUsize::new(0));
        let chain = chain(&cleanups);
        chain.with_frame(0, |f| f.effects |= TaskEffects::WORKDIR);

        let depth = chain.push_frame(probe(&cleanups), "Root:Child".into()).unwrap();
        chain.with_frame(depth, |f| {
            f.effects |= TaskEffects::REFS;
            f.post_status = Some("Child done".into());
            f.jump_target = Some(JumpTarget::Head);
        });

        let child = chain.pop_frame().unwrap();
        assert_eq!(child.name, "Root:Child");
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);

        let summary = chain.unwind().unwrap();
        assert_eq!(summary.effects, TaskEffects::WORKDIR | TaskEffects::REFS);
        assert_eq!(summary.post_status.as_deref(), Some("Child done"));
        assert_eq!(summary.jump_target, Some(JumpTarget::Head));
        assert_eq!(cleanups.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_locked_status_and_first_jump_target_win() {
        let cleanups = Arc::new(AtomicUsize::new(0));
        let chain = chain(&cleanups);
        chain.with_frame(0, |f| {
            f.post_status = Some("Mine".into());
            f.post_status_locked = true;
            f.jump_target = Some(JumpTarget::workdir());
        });

        let depth = chain.push_frame(probe(&cleanups), "Root:Child".into()).unwrap();
        chain.with_frame(depth, |f| {
            f.post_status = Some("Theirs".into());
            f.jump_target = Some(JumpTarget::Head);
        });

        let summary = chain.unwind().unwrap();
        assert_eq!(summary.post_status.as_deref(), Some("Mine"));
        assert_eq!(summary.jump_target, Some(JumpTarget::workdir()));
    }

    #[test]
    fn test_empty_child_status_does_not_clear_parent() {
        let cleanups = Arc::new(AtomicUsize::new(0));
        let chain = chain(&cleanups);
        chain.with_frame(0, |f| f.post_status = Some("Parent".into()));
        let depth = chain.push_frame(probe(&cleanups), "Root:Child".into()).unwrap();
        chain.with_frame(depth, |f| f.post_status = Some(String::new()));

        let summary = chain.unwind().unwrap();
        assert_eq!(summary.post_status.as_deref(), Some("Parent"));
    }

    #[test]
    fn test_unwind_twice_is_noop() {
        let cleanups = Arc::new(AtomicUsize::new(0));
        let chain = chain(&cleanups);
        assert!(chain.unwind().is_some());
        assert!(chain.unwind().is_none());
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_single_process_slot() {
        let cleanups = Arc::new(AtomicUsize::new(0));
        let chain = chain(&cleanups);
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();

        let id = chain.claim_process(0, tx.clone()).unwrap();
        assert!(chain.owns_process(id));
        assert!(chain.claim_process(0, tx.clone()).is_err());
        assert!(chain.push_frame(probe(&cleanups), "Root:Child".into()).is_err());

        chain.release_process(id);
        assert!(!chain.owns_process(id));
        assert!(chain.claim_process(0, tx).is_ok());
    }

    #[test]
    fn test_only_innermost_may_claim() {
        let cleanups = Arc::new(AtomicUsize::new(0));
        let chain = chain(&cleanups);
        chain.push_frame(probe(&cleanups), "Root:Child".into()).unwrap();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        assert!(chain.claim_process(0, tx.clone()).is_err());
        assert!(chain.claim_process(1, tx).is_ok());
    }

    #[test]
    fn test_token_slot() {
        let cleanups = Arc::new(AtomicUsize::new(0));
        let chain = chain(&cleanups);
        assert!(chain.take_token().is_err());

        chain.deposit(ControlToken::WaitForUser);
        assert!(matches!(chain.take_token(), Ok(ControlToken::WaitForUser)));

        chain.deposit(ControlToken::ContinueWorker);
        chain.deposit(ControlToken::ContinueInteractive);
        assert!(chain.take_token().is_err());
        assert!(chain.take_token().is_err());
    }

    #[test]
    fn test_prompt_answers_must_match() {
        let cleanups = Arc::new(AtomicUsize::new(0));
        let chain = chain(&cleanups);
        let id = chain.begin_prompt();
        assert!(!chain.deliver_decision(PromptId(9999), UserDecision::accept()));
        assert!(chain.deliver_decision(id, UserDecision::reject()));
        assert!(!chain.take_decision(id).unwrap().accepted);
        assert!(chain.take_decision(id).is_err());
    }
}
