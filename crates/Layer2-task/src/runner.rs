//! Task runner
//!
//! Owns the interactive context: a tokio task that receives every
//! [`RunnerEvent`] (new tasks, answers, worker results, process events) and
//! drives the current chain one step at a time.
//!
//! At most one chain runs at once. A task put while another is running
//! either interrupts it, waits in the critical queue, or is rejected:
//!
//! ```text
//! put(new)
//!   ├── nothing running            → start new
//!   ├── current is freely          → interrupt current, new becomes pending
//!   │   interruptible, or new      (any previous pending task is discarded)
//!   │   can kill current
//!   ├── new is critical            → queue new
//!   └── otherwise                  → reject (busy notification)
//! ```
//!
//! Interruption is cooperative. The interrupted chain keeps running until its
//! next suspension point, where it is torn down without a completion
//! notification; then the pending task starts.

use crate::chain::{Chain, ChainId, ChainSummary, Services};
use crate::context::FlowContext;
use crate::error::{TaskError, TaskResult};
use crate::flow::{step, BoxFlow};
use crate::git;
use crate::invocation::{InvokerId, TaskInvocation};
use crate::observer::{TaskCompletion, TaskObserver, TaskOutcome};
use crate::process::{ProcessEvent, ProcessSignal};
use crate::prompt::{PromptId, UserDecision};
use crate::repo::RepoProbe;
use crate::state::TaskState;
use crate::task::Task;
use crate::tasks::{TaskKind, TaskRequest};
use crate::token::ControlToken;
use crate::worker::{Worker, WorkerJob};
use branchwork_foundation::EngineConfig;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tracing::{debug, error, info, info_span, warn, Span};

// ============================================================================
// Events
// ============================================================================

/// Everything that can wake the interactive context
pub(crate) enum RunnerEvent {
    Put(TaskInvocation),
    Kill,
    Join(oneshot::Sender<()>),
    Answer {
        prompt: PromptId,
        decision: UserDecision,
    },
    ForceKillProcess,
    WorkerDone {
        chain: ChainId,
        flow: BoxFlow,
        token: ControlToken,
    },
    Process {
        chain: ChainId,
        process: u64,
        event: ProcessEvent,
    },
    Shutdown(oneshot::Sender<()>),
}

// ============================================================================
// TaskRunner (handle)
// ============================================================================

struct RunnerShared {
    busy: AtomicBool,
    config: Arc<RwLock<EngineConfig>>,
}

/// Handle to a running task runner. Cheap to clone.
#[derive(Clone)]
pub struct TaskRunner {
    events: UnboundedSender<RunnerEvent>,
    shared: Arc<RunnerShared>,
}

/// Builder for [`TaskRunner`]
pub struct TaskRunnerBuilder {
    observer: Arc<dyn TaskObserver>,
    config: EngineConfig,
    repo: Option<Arc<dyn RepoProbe>>,
}

impl TaskRunnerBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn repo(mut self, repo: Arc<dyn RepoProbe>) -> Self {
        self.repo = Some(repo);
        self
    }

    /// Start the interactive context (and the worker thread, unless serial
    /// mode is on). Must be called from within a tokio runtime.
    pub fn spawn(self) -> TaskResult<TaskRunner> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TaskError::internal(format!("task runner needs a tokio runtime: {}", e)))?;

        let force_serial = self.config.force_serial();
        let worker_name = self.config.worker_thread_name().to_string();
        let config = Arc::new(RwLock::new(self.config));
        let (events, rx) = mpsc::unbounded_channel();

        let worker = if force_serial {
            info!("Serial mode: worker steps run on the interactive context");
            None
        } else {
            Some(Worker::spawn(&worker_name, events.clone())?)
        };

        let services = Arc::new(Services::new(
            self.observer,
            events.clone(),
            runtime.clone(),
            Arc::clone(&config),
            self.repo,
        ));
        let shared = Arc::new(RunnerShared {
            busy: AtomicBool::new(false),
            config,
        });

        let event_loop = RunnerLoop::new(services, Arc::clone(&shared), worker);
        runtime.spawn(event_loop.run(rx));

        Ok(TaskRunner { events, shared })
    }
}

impl TaskRunner {
    pub fn builder(observer: Arc<dyn TaskObserver>) -> TaskRunnerBuilder {
        TaskRunnerBuilder {
            observer,
            config: EngineConfig::default(),
            repo: None,
        }
    }

    fn send(&self, event: RunnerEvent) {
        if self.events.send(event).is_err() {
            warn!("Task runner is shut down");
        }
    }

    /// Request a task; see the module docs for what happens if busy
    pub fn put(&self, invocation: TaskInvocation) {
        self.shared.busy.store(true, Ordering::SeqCst);
        self.send(RunnerEvent::Put(invocation));
    }

    /// Request a task that is not part of the catalogue
    pub fn put_task(&self, invoker: impl Into<InvokerId>, task: impl Task) {
        self.put(TaskInvocation::new(invoker, TaskRequest::custom(task)));
    }

    /// Whether a chain is running, pending or queued
    pub fn is_busy(&self) -> bool {
        self.shared.busy.load(Ordering::SeqCst)
    }

    /// Interrupt the current chain (and drop the pending task, if any)
    pub fn kill_current(&self) {
        self.send(RunnerEvent::Kill);
    }

    /// Wait until no interrupted chain is left
    pub async fn join_killed(&self) {
        let (tx, rx) = oneshot::channel();
        self.send(RunnerEvent::Join(tx));
        let _ = rx.await;
    }

    /// Answer a prompt announced by [`TaskObserver::on_user_prompt`]
    pub fn answer(&self, prompt: PromptId, decision: UserDecision) {
        self.send(RunnerEvent::Answer { prompt, decision });
    }

    /// Kill the current chain's process outright
    pub fn force_kill_process(&self) {
        self.send(RunnerEvent::ForceKillProcess);
    }

    /// Current settings, including "don't ask again" choices made so far
    pub fn config(&self) -> EngineConfig {
        self.shared.config.read().clone()
    }

    /// Tear down the current chain, stop the worker thread and the event loop
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        self.send(RunnerEvent::Shutdown(tx));
        let _ = rx.await;
    }
}

// ============================================================================
// RunnerLoop (interactive context)
// ============================================================================

/// A task accepted by `put`, not started yet
struct Accepted {
    task: Arc<dyn Task>,
    name: String,
    kind: TaskKind,
    invoker: InvokerId,
}

impl Accepted {
    fn new(invocation: TaskInvocation) -> Self {
        let task = invocation.request.instantiate();
        Self {
            name: task.name(),
            kind: task.kind(),
            invoker: invocation.invoker,
            task,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Waiting {
    Nothing,
    Worker,
    User,
    Process,
}

/// The current root task and its chain
struct ActiveTask {
    task: Arc<dyn Task>,
    name: String,
    kind: TaskKind,
    invoker: InvokerId,
    chain: Arc<Chain>,
    /// `None` while the worker has it
    flow: Option<BoxFlow>,
    waiting: Waiting,
    state: TaskState,
    span: Span,
    started: Instant,
    started_at: DateTime<Utc>,
}

impl ActiveTask {
    fn set_state(&mut self, next: TaskState, observer: &dyn TaskObserver) {
        if self.state == next {
            return;
        }
        if !self.state.can_transition_to(next) {
            error!("{}: invalid transition {} -> {}", self.name, self.state, next);
            return;
        }
        self.state = next;
        observer.on_state_change(&self.name, next);
    }
}

struct RunnerLoop {
    services: Arc<Services>,
    shared: Arc<RunnerShared>,
    worker: Option<Worker>,
    current: Option<ActiveTask>,
    pending: Option<Accepted>,
    queue: VecDeque<Accepted>,
    join_waiters: Vec<oneshot::Sender<()>>,
    ready_pending: bool,
}

impl RunnerLoop {
    fn new(services: Arc<Services>, shared: Arc<RunnerShared>, worker: Option<Worker>) -> Self {
        Self {
            services,
            shared,
            worker,
            current: None,
            pending: None,
            queue: VecDeque::new(),
            join_waiters: Vec::new(),
            ready_pending: false,
        }
    }

    fn observer(&self) -> &dyn TaskObserver {
        self.services.observer.as_ref()
    }

    fn is_busy(&self) -> bool {
        self.current.is_some() || self.pending.is_some() || !self.queue.is_empty()
    }

    fn is_interrupted(&self) -> bool {
        self.services.interrupted.load(Ordering::SeqCst)
    }

    async fn run(mut self, mut rx: UnboundedReceiver<RunnerEvent>) {
        debug!("Task runner started");
        while let Some(event) = rx.recv().await {
            match event {
                RunnerEvent::Put(invocation) => self.put(invocation),
                RunnerEvent::Kill => self.kill_current(),
                RunnerEvent::Join(waiter) => self.join_waiters.push(waiter),
                RunnerEvent::Answer { prompt, decision } => self.on_answer(prompt, decision),
                RunnerEvent::ForceKillProcess => self.force_kill_process(),
                RunnerEvent::WorkerDone { chain, flow, token } => {
                    self.on_worker_done(chain, flow, token)
                }
                RunnerEvent::Process {
                    chain,
                    process,
                    event,
                } => self.on_process_event(chain, process, event),
                RunnerEvent::Shutdown(done) => {
                    self.shutdown();
                    let _ = done.send(());
                    break;
                }
            }
            self.settle();
        }
        debug!("Task runner stopped");
    }

    /// Bookkeeping after every event
    fn settle(&mut self) {
        while self.current.is_none() {
            match self.queue.pop_front() {
                Some(next) => {
                    debug!("Starting queued task {}", next.name);
                    self.start(next);
                }
                None => break,
            }
        }

        let busy = self.is_busy();
        self.shared.busy.store(busy, Ordering::SeqCst);

        if !self.is_interrupted() {
            for waiter in self.join_waiters.drain(..) {
                let _ = waiter.send(());
            }
        }

        if !busy && std::mem::take(&mut self.ready_pending) {
            self.observer().on_ready();
        }
    }

    // ========================================================================
    // Put / kill
    // ========================================================================

    fn put(&mut self, invocation: TaskInvocation) {
        let accepted = Accepted::new(invocation);

        let Some(current) = &self.current else {
            self.start(accepted);
            return;
        };

        if current.task.is_freely_interruptible() || accepted.task.can_kill(current.task.as_ref()) {
            info!("{} interrupts {}", accepted.name, current.name);
            if let Some(discarded) = self.pending.replace(accepted) {
                info!("Discarding pending task {}", discarded.name);
            }
            self.interrupt_current();
        } else if accepted.task.is_critical() {
            info!("Queueing critical task {} behind {}", accepted.name, current.name);
            self.observer().on_state_change(&accepted.name, TaskState::Idle);
            self.queue.push_back(accepted);
        } else {
            info!("Rejecting {}: {} is running", accepted.name, current.name);
            self.observer()
                .on_busy(&accepted.invoker, &accepted.name, &current.name);
        }
    }

    fn kill_current(&mut self) {
        if self.current.is_none() {
            return;
        }
        if let Some(discarded) = self.pending.take() {
            info!("Discarding pending task {}", discarded.name);
        }
        self.interrupt_current();
    }

    /// Flag the current chain and ask its process to stop. If the chain is
    /// parked on a prompt it is already at a suspension point, so it is
    /// released right away.
    fn interrupt_current(&mut self) {
        let services = Arc::clone(&self.services);
        let Some(active) = self.current.as_mut() else {
            return;
        };

        services.interrupted.store(true, Ordering::SeqCst);
        active.set_state(TaskState::Interrupted, services.observer.as_ref());
        if active.chain.signal_process(ProcessSignal::Terminate) {
            info!("Requested termination of {}'s process", active.name);
        }

        if active.waiting == Waiting::User {
            self.release_interrupted();
        }
    }

    fn force_kill_process(&mut self) {
        if let Some(active) = &self.current {
            if active.chain.signal_process(ProcessSignal::Kill) {
                warn!("Force-killing {}'s process", active.name);
            }
        }
    }

    // ========================================================================
    // Driving the chain
    // ========================================================================

    fn start(&mut self, accepted: Accepted) {
        if let Some(current) = &self.current {
            error!("Cannot start {} while {} is current", accepted.name, current.name);
            return;
        }

        let span = info_span!("task", name = %accepted.name);
        span.in_scope(|| info!(">>> {}", accepted.name));

        let chain = Arc::new(Chain::new(
            Arc::clone(&self.services),
            Arc::clone(&accepted.task),
            accepted.name.clone(),
        ));
        let ctx = FlowContext::root(Arc::clone(&chain));
        let task = Arc::clone(&accepted.task);
        let flow: BoxFlow = Box::pin(async move { task.flow(&ctx).await });

        let mut active = ActiveTask {
            task: accepted.task,
            name: accepted.name,
            kind: accepted.kind,
            invoker: accepted.invoker,
            chain,
            flow: Some(flow),
            waiting: Waiting::Nothing,
            state: TaskState::Idle,
            span,
            started: Instant::now(),
            started_at: Utc::now(),
        };
        active.set_state(TaskState::Running, self.services.observer.as_ref());

        let prereqs = active.task.prereqs();
        let checked = match &self.services.repo {
            _ if prereqs.is_empty() => Ok(()),
            Some(repo) => prereqs.check(repo.as_ref()),
            None => Err(TaskError::abort("No repository is open.")),
        };
        self.current = Some(active);

        let token = match checked {
            Ok(()) => ControlToken::ContinueInteractive,
            Err(e) => ControlToken::Failed(e),
        };
        self.iterate(token);
    }

    /// Interpret tokens until the chain parks somewhere or ends
    fn iterate(&mut self, mut token: ControlToken) {
        loop {
            let Some(active) = self.current.as_mut() else {
                return;
            };
            active.waiting = Waiting::Nothing;

            if active.chain.is_interrupted() {
                debug!("{} discarded at {}", active.name, token.display_name());
                self.release_interrupted();
                return;
            }

            token = match token {
                ControlToken::ContinueInteractive => self.step_current(),
                ControlToken::ContinueWorker => match self.send_to_worker() {
                    Ok(()) => return,
                    Err(token) => token,
                },
                ControlToken::WaitForUser => {
                    active.waiting = Waiting::User;
                    self.observer().on_progress("", false);
                    self.observer().on_attention_requested();
                    return;
                }
                ControlToken::WaitForProcess => {
                    active.waiting = Waiting::Process;
                    let busy = format!("Busy: {}...", active.name);
                    self.observer().on_progress(&busy, true);
                    return;
                }
                ControlToken::Finished => {
                    self.finish(Ok(()));
                    return;
                }
                ControlToken::Failed(e) => {
                    self.finish(Err(e));
                    return;
                }
            };
        }
    }

    fn step_current(&mut self) -> ControlToken {
        let Some(active) = self.current.as_mut() else {
            return ControlToken::Failed(TaskError::internal("no current task to step"));
        };
        let Some(flow) = active.flow.as_mut() else {
            return ControlToken::Failed(TaskError::internal("flow is on the worker thread"));
        };
        let _enter = active.span.enter();
        step(flow, &active.chain)
    }

    /// Hand the flow to the worker, or run the step inline in serial mode
    fn send_to_worker(&mut self) -> Result<(), ControlToken> {
        let Some(worker) = &self.worker else {
            return Err(self.step_current());
        };
        let Some(active) = self.current.as_mut() else {
            return Ok(());
        };
        let Some(flow) = active.flow.take() else {
            return Err(ControlToken::Failed(TaskError::internal(
                "flow is already on the worker thread",
            )));
        };

        let busy = format!("Busy: {}...", active.name);
        let job = WorkerJob {
            chain: Arc::clone(&active.chain),
            flow,
            span: active.span.clone(),
        };
        match worker.submit(job) {
            Ok(()) => {
                active.waiting = Waiting::Worker;
                self.services.observer.on_progress(&busy, true);
                Ok(())
            }
            Err(job) => {
                active.flow = Some(job.flow);
                Err(ControlToken::Failed(TaskError::internal(
                    "worker thread is gone",
                )))
            }
        }
    }

    fn current_chain(&mut self, chain: ChainId) -> Option<&mut ActiveTask> {
        self.current.as_mut().filter(|active| active.chain.id == chain)
    }

    fn on_worker_done(&mut self, chain: ChainId, flow: BoxFlow, token: ControlToken) {
        let Some(active) = self.current_chain(chain) else {
            warn!("Dropping worker result of stale chain {}", chain);
            return;
        };
        active.flow = Some(flow);
        self.iterate(token);
    }

    fn on_answer(&mut self, prompt: PromptId, decision: UserDecision) {
        let Some(active) = self.current.as_mut() else {
            warn!("Ignoring answer to {}: nothing is running", prompt);
            return;
        };
        if active.waiting != Waiting::User || !active.chain.deliver_decision(prompt, decision) {
            warn!("Ignoring answer to stale {}", prompt);
            return;
        }
        self.iterate(ControlToken::ContinueInteractive);
    }

    fn on_process_event(&mut self, chain: ChainId, process: u64, event: ProcessEvent) {
        let services = Arc::clone(&self.services);
        let Some(active) = self.current_chain(chain) else {
            if let ProcessEvent::Started(handle) = event {
                debug!("Terminating process #{} of stale chain {}", process, chain);
                handle.terminate();
            }
            return;
        };

        match event {
            ProcessEvent::Started(handle) => active.chain.process_started(process, handle),
            ProcessEvent::StartFailed(message) => {
                active.chain.process_start_failed(process, message)
            }
            ProcessEvent::Exited(output) => active.chain.process_exited(process, output),
            ProcessEvent::Progress(line) => {
                if let Some(progress) = git::parse_progress(&line) {
                    services.observer.on_progress(&progress.text, true);
                }
                return;
            }
        }

        if active.waiting == Waiting::Process {
            self.iterate(ControlToken::ContinueInteractive);
        }
    }

    // ========================================================================
    // Release
    // ========================================================================

    /// Tear down the current chain: dismiss its prompt, stop its process,
    /// pop every frame (running cleanups) and clear the busy indicator.
    /// Returns `None` if there was nothing to release.
    fn release(&mut self, final_state: TaskState) -> Option<(ActiveTask, ChainSummary)> {
        let Some(mut active) = self.current.take() else {
            error!("Release requested with no current task");
            return None;
        };
        let observer = Arc::clone(&self.services.observer);

        active.set_state(final_state, observer.as_ref());
        if let Some(prompt) = active.chain.pending_prompt() {
            observer.on_prompt_dismissed(prompt);
        }
        active.chain.abandon_process();
        active.flow = None;
        let summary = active.chain.unwind().unwrap_or_default();

        observer.on_progress("", false);
        active.set_state(TaskState::Released, observer.as_ref());
        active.span.in_scope(|| {
            info!(
                "<<< {} ({}) in {:.1?}",
                active.name,
                final_state,
                active.started.elapsed()
            )
        });

        self.ready_pending = true;
        Some((active, summary))
    }

    fn release_interrupted(&mut self) {
        self.release(TaskState::Interrupted);
        self.services.interrupted.store(false, Ordering::SeqCst);
        if let Some(next) = self.pending.take() {
            self.start(next);
        }
    }

    fn finish(&mut self, result: Result<(), TaskError>) {
        let error = result.err();
        let (outcome, state) = match &error {
            None => (TaskOutcome::Completed, TaskState::Completed),
            Some(TaskError::Abort(_)) => (TaskOutcome::Aborted, TaskState::Aborted),
            Some(TaskError::RepoGone(_)) => (TaskOutcome::RepoGone, TaskState::Failed),
            Some(e) => (TaskOutcome::Failed(e.kind()), TaskState::Failed),
        };

        let Some((active, summary)) = self.release(state) else {
            return;
        };

        if let Some(error) = &error {
            self.report(&active, error);
        }

        let completion = TaskCompletion {
            task_name: active.name.clone(),
            kind: active.kind,
            invoker: active.invoker.clone(),
            outcome,
            effects: summary.effects,
            jump_target: summary.jump_target,
            post_status: summary.post_status,
            started_at: active.started_at,
            finished_at: Utc::now(),
        };
        self.observer().on_completion(&completion);
    }

    fn report(&self, active: &ActiveTask, error: &TaskError) {
        let _enter = active.span.enter();
        match error {
            TaskError::RepoGone(path) => {
                warn!("Repository gone: {}", path.display());
                self.observer().on_repo_gone();
                return;
            }
            TaskError::Abort(abort) => info!("Aborted: {}", abort),
            TaskError::Conflict(_) | TaskError::MultiFile(_) => warn!("{}", error),
            other => error!("{} failed: {}", active.name, other),
        }

        let report = active.task.report_error(error);
        if !report.is_silent() {
            self.observer().on_failure(&report);
        }
    }

    fn shutdown(&mut self) {
        info!("Shutting down task runner");
        self.pending = None;
        self.queue.clear();
        if let Some(active) = &self.current {
            self.services.interrupted.store(true, Ordering::SeqCst);
            active.chain.abandon_process();
        }
        if let Some(mut worker) = self.worker.take() {
            worker.shutdown();
        }
        if self.current.is_some() {
            self.release_interrupted();
        }
        self.shared.busy.store(false, Ordering::SeqCst);
        for waiter in self.join_waiters.drain(..) {
            let _ = waiter.send(());
        }
    }
}
