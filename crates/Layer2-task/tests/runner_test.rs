//! Runner integration tests
//!
//! `cargo test -p branchwork-task --test runner_test`

mod common;

use async_trait::async_trait;
use branchwork_foundation::EngineConfig;
use branchwork_task::{
    ErrorKind, FlowContext, JumpTarget, MultiFileError, Notification, ProcessSpec, ProcessWrapper,
    RepoProbe, RepoStatus, Severity, Task, TaskEffects, TaskError, TaskOutcome, TaskPrereqs,
    TaskResult, TaskState, UserDecision, UserPrompt,
};
use common::Harness;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Test tasks
// ============================================================================

/// Finishes right away
struct Quick {
    name: &'static str,
    kills: bool,
    critical: bool,
}

impl Quick {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            kills: false,
            critical: false,
        }
    }

    fn killer(name: &'static str) -> Self {
        Self {
            kills: true,
            ..Self::new(name)
        }
    }

    fn critical(name: &'static str) -> Self {
        Self {
            critical: true,
            ..Self::new(name)
        }
    }
}

#[async_trait]
impl Task for Quick {
    fn name(&self) -> String {
        self.name.to_string()
    }

    fn can_kill(&self, _running: &dyn Task) -> bool {
        self.kills
    }

    fn is_critical(&self) -> bool {
        self.critical
    }

    async fn flow(&self, ctx: &FlowContext) -> TaskResult<()> {
        ctx.set_post_status(format!("{} done.", self.name));
        Ok(())
    }
}

/// Asks for confirmation, then finishes
struct Ask {
    dont_ask_key: Option<&'static str>,
}

#[async_trait]
impl Task for Ask {
    fn name(&self) -> String {
        "Ask".to_string()
    }

    async fn flow(&self, ctx: &FlowContext) -> TaskResult<()> {
        let mut prompt = UserPrompt::confirm("Continue?", "Really continue?").with_verb("Go");
        if let Some(key) = self.dont_ask_key {
            prompt = prompt.with_dont_ask_again(key);
        }
        ctx.confirm(prompt).await?;
        ctx.add_effects(TaskEffects::WORKDIR);
        Ok(())
    }
}

/// Runs `sleep 5`
struct Sleep;

#[async_trait]
impl Task for Sleep {
    fn name(&self) -> String {
        "Sleep".to_string()
    }

    async fn flow(&self, ctx: &FlowContext) -> TaskResult<()> {
        ctx.run_process(ProcessSpec::new("sleep").arg("5")).await?;
        Ok(())
    }
}

#[derive(Default)]
struct Parent {
    /// Replaces whatever target the child left behind
    override_target: Option<JumpTarget>,
}

#[async_trait]
impl Task for Parent {
    fn name(&self) -> String {
        "Parent".to_string()
    }

    async fn flow(&self, ctx: &FlowContext) -> TaskResult<()> {
        ctx.add_effects(TaskEffects::WORKDIR);
        let child = ctx.subtask(Child).await?;
        assert!(ctx.is_on_interactive());
        assert!(Arc::strong_count(&child) >= 1);

        // The child's target was copied up and wins
        ctx.set_jump_target(JumpTarget::Head);
        if let Some(target) = self.override_target.clone() {
            ctx.override_jump_target(target);
        }
        Ok(())
    }
}

struct Child;

#[async_trait]
impl Task for Child {
    fn name(&self) -> String {
        "Child".to_string()
    }

    async fn flow(&self, ctx: &FlowContext) -> TaskResult<()> {
        assert_eq!(ctx.depth(), 1);
        assert_eq!(ctx.name(), "Parent:Child");
        ctx.add_effects(TaskEffects::REFS);
        ctx.enter_worker().await;
        ctx.set_jump_target(JumpTarget::commit("abc1234"));
        ctx.set_post_status("Child done.");
        Ok(())
    }
}

/// Records the name of the thread each step ran on
struct ThreadProbe {
    threads: Arc<Mutex<Vec<String>>>,
}

impl ThreadProbe {
    fn record(&self) {
        let name = std::thread::current()
            .name()
            .unwrap_or("unnamed")
            .to_string();
        self.threads.lock().unwrap().push(name);
    }
}

#[async_trait]
impl Task for ThreadProbe {
    async fn flow(&self, ctx: &FlowContext) -> TaskResult<()> {
        self.record();
        ctx.enter_worker().await;
        self.record();
        ctx.enter_interactive().await;
        self.record();
        Ok(())
    }
}

struct ExitCode {
    code: Arc<Mutex<Option<i32>>>,
}

#[async_trait]
impl Task for ExitCode {
    async fn flow(&self, ctx: &FlowContext) -> TaskResult<()> {
        let spec = ProcessSpec::new("sh").args(["-c", "echo oops >&2; exit 7"]);
        let result = ctx.run_process(spec).await;
        if let Err(TaskError::Abort(abort)) = &result {
            *self.code.lock().unwrap() = abort.exit_code;
        }
        result.map(|_| ())
    }
}

struct TwoProcesses;

#[async_trait]
impl Task for TwoProcesses {
    async fn flow(&self, ctx: &FlowContext) -> TaskResult<()> {
        let mut first = ProcessWrapper::new(ProcessSpec::new("sleep").arg("5"));
        first.start(ctx).await?;
        let mut second = ProcessWrapper::new(ProcessSpec::new("sleep").arg("5"));
        second.start(ctx).await?;
        Ok(())
    }
}

struct PartialStage;

#[async_trait]
impl Task for PartialStage {
    fn name(&self) -> String {
        "Stage".to_string()
    }

    async fn flow(&self, _ctx: &FlowContext) -> TaskResult<()> {
        let mut error = MultiFileError::new("Some files couldn’t be staged.");
        error.add_file_error("a.txt", Some("file is locked"));
        error.add_file_success();
        error.add_file_error("b.txt", None::<String>);
        error.into_result()
    }
}

/// Shared record of cleanup hooks, in call order
type Cleanups = Arc<Mutex<Vec<&'static str>>>;

/// Adds effects, then runs a sub-task that fails on the worker
struct StageAll {
    cleanups: Cleanups,
    resumed: Arc<AtomicBool>,
}

#[async_trait]
impl Task for StageAll {
    fn name(&self) -> String {
        "Stage all".to_string()
    }

    async fn flow(&self, ctx: &FlowContext) -> TaskResult<()> {
        ctx.add_effects(TaskEffects::WORKDIR);
        ctx.subtask(StageOnWorker {
            cleanups: Arc::clone(&self.cleanups),
        })
        .await?;
        self.resumed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn cleanup(&self) {
        self.cleanups.lock().unwrap().push("Stage all");
    }
}

struct StageOnWorker {
    cleanups: Cleanups,
}

#[async_trait]
impl Task for StageOnWorker {
    fn name(&self) -> String {
        "Stage".to_string()
    }

    async fn flow(&self, ctx: &FlowContext) -> TaskResult<()> {
        ctx.add_effects(TaskEffects::INDEX);
        ctx.enter_worker().await;
        let mut error = MultiFileError::new("Some files couldn’t be staged.");
        error.add_file_error("a", None::<String>);
        error.add_file_success();
        error.add_file_error("b", None::<String>);
        error.into_result()
    }

    fn cleanup(&self) {
        self.cleanups.lock().unwrap().push("Stage");
    }
}

/// Repository that has no commits yet
struct UnbornRepo {
    workdir: PathBuf,
}

impl RepoProbe for UnbornRepo {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn status(&self) -> TaskResult<RepoStatus> {
        Ok(RepoStatus {
            head_is_unborn: true,
            ..Default::default()
        })
    }
}

/// Needs a commit; never gets to run its flow on an unborn repository
struct NeedsCommit {
    cleanups: Cleanups,
    started: Arc<AtomicBool>,
}

#[async_trait]
impl Task for NeedsCommit {
    fn prereqs(&self) -> TaskPrereqs {
        TaskPrereqs::NO_UNBORN
    }

    async fn flow(&self, ctx: &FlowContext) -> TaskResult<()> {
        self.started.store(true, Ordering::SeqCst);
        ctx.add_effects(TaskEffects::HEAD);
        Ok(())
    }

    fn cleanup(&self) {
        self.cleanups.lock().unwrap().push("NeedsCommit");
    }
}

/// Long worker loop that yields between iterations
struct Crunch {
    steps: Arc<AtomicUsize>,
    finished: Arc<AtomicBool>,
    cleanups: Cleanups,
}

#[async_trait]
impl Task for Crunch {
    fn name(&self) -> String {
        "Crunch".to_string()
    }

    async fn flow(&self, ctx: &FlowContext) -> TaskResult<()> {
        ctx.enter_worker().await;
        for _ in 0..5 {
            std::thread::sleep(Duration::from_millis(100));
            self.steps.fetch_add(1, Ordering::SeqCst);
            ctx.yield_now().await;
        }
        self.finished.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn cleanup(&self) {
        self.cleanups.lock().unwrap().push("Crunch");
    }
}

struct Panics;

#[async_trait]
impl Task for Panics {
    async fn flow(&self, ctx: &FlowContext) -> TaskResult<()> {
        ctx.enter_worker().await;
        panic!("boom");
    }
}

struct ForeignAwait;

#[async_trait]
impl Task for ForeignAwait {
    async fn flow(&self, _ctx: &FlowContext) -> TaskResult<()> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_quick_task_completes() {
    let mut h = Harness::new();
    h.runner.put_task("test", Quick::new("Quick"));

    let completion = h.completion().await;
    assert_eq!(completion.task_name, "Quick");
    assert_eq!(completion.outcome, TaskOutcome::Completed);
    assert_eq!(completion.invoker.as_str(), "test");
    assert_eq!(completion.post_status.as_deref(), Some("Quick done."));
    assert!(completion.effects.is_empty());

    h.ready().await;
    assert!(!h.runner.is_busy());
    assert!(h.seen.iter().any(|n| matches!(
        n,
        Notification::StateChange { state: TaskState::Released, .. }
    )));
}

#[tokio::test]
async fn test_subtask_effects_union() {
    let mut h = Harness::new();
    h.runner.put_task("test", Parent::default());

    let completion = h.completion().await;
    assert_eq!(completion.outcome, TaskOutcome::Completed);
    assert_eq!(completion.effects, TaskEffects::WORKDIR | TaskEffects::REFS);
    assert_eq!(completion.post_status.as_deref(), Some("Child done."));
    assert_eq!(completion.jump_target, Some(JumpTarget::commit("abc1234")));

    // An explicit override beats the target copied up from the child
    h.runner.put_task(
        "test",
        Parent {
            override_target: Some(JumpTarget::Head),
        },
    );
    assert_eq!(h.completion().await.jump_target, Some(JumpTarget::Head));
}

#[tokio::test]
async fn test_worker_steps_run_on_worker_thread() {
    let config = EngineConfig::default().with_worker_thread_name("bw-test-worker");
    let mut h = Harness::with_config(config);
    let threads = Arc::new(Mutex::new(Vec::new()));
    h.runner.put_task(
        "test",
        ThreadProbe {
            threads: Arc::clone(&threads),
        },
    );
    assert_eq!(h.completion().await.outcome, TaskOutcome::Completed);

    let threads = threads.lock().unwrap().clone();
    assert_eq!(threads.len(), 3);
    assert_ne!(threads[0], "bw-test-worker");
    assert_eq!(threads[1], "bw-test-worker");
    assert_eq!(threads[2], threads[0]);
}

#[tokio::test]
async fn test_serial_mode_stays_on_interactive_thread() {
    let config = EngineConfig::default()
        .with_force_serial(true)
        .with_worker_thread_name("bw-test-worker");
    let mut h = Harness::with_config(config);
    let threads = Arc::new(Mutex::new(Vec::new()));
    h.runner.put_task(
        "test",
        ThreadProbe {
            threads: Arc::clone(&threads),
        },
    );
    assert_eq!(h.completion().await.outcome, TaskOutcome::Completed);

    let threads = threads.lock().unwrap().clone();
    assert!(threads.iter().all(|t| t != "bw-test-worker"));
}

#[tokio::test]
async fn test_busy_rejection() {
    let mut h = Harness::new();
    h.runner.put_task("toolbar", Ask { dont_ask_key: None });
    let (id, _) = h.prompt().await;

    h.runner.put_task("menu", Quick::new("Quick"));
    match h.wait_for(|n| matches!(n, Notification::Busy { .. })).await {
        Notification::Busy {
            invoker,
            rejected,
            running,
        } => {
            assert_eq!(invoker.as_str(), "menu");
            assert_eq!(rejected, "Quick");
            assert_eq!(running, "Ask");
        }
        _ => unreachable!(),
    }

    h.runner.answer(id, UserDecision::accept());
    let completion = h.completion().await;
    assert_eq!(completion.task_name, "Ask");
    assert_eq!(completion.effects, TaskEffects::WORKDIR);
}

#[tokio::test]
async fn test_critical_task_is_queued() {
    let mut h = Harness::new();
    h.runner.put_task("test", Ask { dont_ask_key: None });
    let (id, _) = h.prompt().await;

    h.runner.put_task("test", Quick::critical("Critical"));
    h.wait_for(|n| {
        matches!(n, Notification::StateChange { task_name, state: TaskState::Idle } if task_name == "Critical")
    })
    .await;
    assert!(h.runner.is_busy());

    h.runner.answer(id, UserDecision::accept());
    assert_eq!(h.completion().await.task_name, "Ask");
    assert_eq!(h.completion().await.task_name, "Critical");
    assert!(!h.seen.iter().any(|n| matches!(n, Notification::Busy { .. })));
}

#[tokio::test]
async fn test_killer_replaces_pending_task() {
    let mut h = Harness::new();
    h.runner.put_task("test", Sleep);
    h.process_started().await;

    // Both land before the interrupted chain reaches its next suspension
    // point; the second one discards the first.
    h.runner.put_task("test", Quick::killer("B"));
    h.runner.put_task("test", Quick::killer("C"));

    let completion = h.completion().await;
    assert_eq!(completion.task_name, "C");
    assert_eq!(completion.outcome, TaskOutcome::Completed);

    h.ready().await;
    let names: Vec<_> = h.completions().into_iter().map(|c| c.task_name).collect();
    assert_eq!(names, vec!["C".to_string()]);
    assert!(!h.seen.iter().any(|n| matches!(
        n,
        Notification::StateChange { task_name, .. } if task_name == "B"
    )));
}

#[tokio::test]
async fn test_interrupt_at_prompt_dismisses_it() {
    let mut h = Harness::new();
    h.runner.put_task("test", Ask { dont_ask_key: None });
    let (id, _) = h.prompt().await;

    h.runner.put_task("test", Quick::killer("Killer"));
    match h
        .wait_for(|n| matches!(n, Notification::PromptDismissed(_)))
        .await
    {
        Notification::PromptDismissed(dismissed) => assert_eq!(dismissed, id),
        _ => unreachable!(),
    }

    let completion = h.completion().await;
    assert_eq!(completion.task_name, "Killer");
    assert_eq!(h.completions().len(), 1);

    // Stale answers are ignored
    h.runner.answer(id, UserDecision::accept());
    h.ready().await;
}

#[tokio::test]
async fn test_join_killed() {
    let mut h = Harness::new();
    h.runner.put_task("test", Sleep);
    h.process_started().await;

    h.runner.kill_current();
    tokio::time::timeout(Duration::from_secs(10), h.runner.join_killed())
        .await
        .expect("interrupted chain should be released");

    h.ready().await;
    assert!(h.completions().is_empty());
    assert!(h.failures().is_empty());
    assert!(!h.runner.is_busy());
}

#[tokio::test]
async fn test_force_kill_process() {
    let mut h = Harness::new();
    h.runner.put_task("test", Sleep);
    h.process_started().await;

    h.runner.force_kill_process();
    let completion = h.completion().await;
    assert_eq!(completion.outcome, TaskOutcome::Aborted);

    let failures = h.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].message, "sleep was terminated.");
}

#[tokio::test]
async fn test_process_exit_code_aborts() {
    let mut h = Harness::new();
    let code = Arc::new(Mutex::new(None));
    h.runner.put_task(
        "test",
        ExitCode {
            code: Arc::clone(&code),
        },
    );

    let completion = h.completion().await;
    assert_eq!(completion.outcome, TaskOutcome::Aborted);
    assert_eq!(*code.lock().unwrap(), Some(7));

    let failures = h.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].message, "sh exited with code 7.");
    assert_eq!(failures[0].detail_text.as_deref(), Some("oops"));
}

#[tokio::test]
async fn test_single_process_per_chain() {
    let mut h = Harness::new();
    h.runner.put_task("test", TwoProcesses);

    let completion = h.completion().await;
    assert_eq!(completion.outcome, TaskOutcome::Failed(ErrorKind::Unclassified));
    let failures = h.failures();
    assert_eq!(failures.len(), 1);
    assert!(failures[0]
        .detail_text
        .as_deref()
        .unwrap_or_default()
        .contains("already owns process"));
}

#[tokio::test]
async fn test_multi_file_report() {
    let mut h = Harness::new();
    h.runner.put_task("test", PartialStage);

    let completion = h.completion().await;
    assert_eq!(completion.outcome, TaskOutcome::Failed(ErrorKind::Domain));

    let failures = h.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].message, "Some files couldn’t be staged.");
    assert_eq!(
        failures[0].details,
        vec![
            "a.txt: file is locked".to_string(),
            "b.txt".to_string(),
            "(1 other file was successful)".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_subtask_failure_on_worker_keeps_effects() {
    let mut h = Harness::new();
    let cleanups: Cleanups = Arc::default();
    let resumed = Arc::new(AtomicBool::new(false));
    h.runner.put_task(
        "test",
        StageAll {
            cleanups: Arc::clone(&cleanups),
            resumed: Arc::clone(&resumed),
        },
    );

    let completion = h.completion().await;
    assert_eq!(completion.outcome, TaskOutcome::Failed(ErrorKind::Domain));
    assert_eq!(completion.effects, TaskEffects::WORKDIR | TaskEffects::INDEX);
    assert!(!resumed.load(Ordering::SeqCst));
    // Innermost first
    assert_eq!(*cleanups.lock().unwrap(), vec!["Stage", "Stage all"]);

    let failures = h.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(
        failures[0].details,
        vec![
            "a".to_string(),
            "b".to_string(),
            "(1 other file was successful)".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_prereq_abort_runs_cleanup() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = Harness::with_repo(Arc::new(UnbornRepo {
        workdir: dir.path().to_path_buf(),
    }));
    let cleanups: Cleanups = Arc::default();
    let started = Arc::new(AtomicBool::new(false));
    h.runner.put_task(
        "test",
        NeedsCommit {
            cleanups: Arc::clone(&cleanups),
            started: Arc::clone(&started),
        },
    );

    let completion = h.completion().await;
    assert_eq!(completion.outcome, TaskOutcome::Aborted);
    assert!(completion.effects.is_empty());
    assert!(!started.load(Ordering::SeqCst));
    assert_eq!(*cleanups.lock().unwrap(), vec!["NeedsCommit"]);
}

#[tokio::test]
async fn test_kill_during_worker_loop_stops_at_yield() {
    let mut h = Harness::new();
    let steps = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));
    let cleanups: Cleanups = Arc::default();
    h.runner.put_task(
        "test",
        Crunch {
            steps: Arc::clone(&steps),
            finished: Arc::clone(&finished),
            cleanups: Arc::clone(&cleanups),
        },
    );

    tokio::time::sleep(Duration::from_millis(150)).await;
    h.runner.put_task("test", Quick::killer("Killer"));

    let completion = h.completion().await;
    assert_eq!(completion.task_name, "Killer");
    let at_kill = steps.load(Ordering::SeqCst);
    assert!(at_kill >= 1 && at_kill < 5, "steps = {}", at_kill);

    // The interrupted loop never runs another iteration
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(steps.load(Ordering::SeqCst), at_kill);
    assert!(!finished.load(Ordering::SeqCst));
    assert_eq!(*cleanups.lock().unwrap(), vec!["Crunch"]);
    assert_eq!(h.completions().len(), 1);
}

#[tokio::test]
async fn test_rejected_confirmation_aborts_silently() {
    let mut h = Harness::new();
    h.runner.put_task("test", Ask { dont_ask_key: None });
    let (id, prompt) = h.prompt().await;
    assert_eq!(prompt.verb.as_deref(), Some("Go"));

    h.runner.answer(id, UserDecision::reject());
    let completion = h.completion().await;
    assert_eq!(completion.outcome, TaskOutcome::Aborted);
    assert!(completion.effects.is_empty());

    h.ready().await;
    assert!(h.failures().is_empty());
}

#[tokio::test]
async fn test_dont_ask_again_is_remembered() {
    let mut h = Harness::new();
    h.runner.put_task("test", Ask { dont_ask_key: Some("continue") });
    let (id, _) = h.prompt().await;
    h.runner.answer(id, UserDecision::accept().remember());
    assert_eq!(h.completion().await.outcome, TaskOutcome::Completed);
    assert!(h.runner.config().is_dont_ask_again("continue"));

    h.runner.put_task("test", Ask { dont_ask_key: Some("continue") });
    assert_eq!(h.completion().await.outcome, TaskOutcome::Completed);
    let prompts = h
        .seen
        .iter()
        .filter(|n| matches!(n, Notification::UserPrompt { .. }))
        .count();
    assert_eq!(prompts, 1);
}

#[tokio::test]
async fn test_panic_is_captured() {
    let mut h = Harness::new();
    h.runner.put_task("test", Panics);

    let completion = h.completion().await;
    assert_eq!(completion.outcome, TaskOutcome::Failed(ErrorKind::Unclassified));
    let failures = h.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].severity, Severity::Warning);
    assert!(failures[0].detail_text.as_deref().unwrap_or_default().contains("boom"));

    // The runner survives
    h.runner.put_task("test", Quick::new("After"));
    assert_eq!(h.completion().await.outcome, TaskOutcome::Completed);
}

#[tokio::test]
async fn test_foreign_await_fails_chain() {
    let mut h = Harness::new();
    h.runner.put_task("test", ForeignAwait);

    let completion = h.completion().await;
    assert_eq!(completion.outcome, TaskOutcome::Failed(ErrorKind::Unclassified));
}

#[tokio::test]
async fn test_shutdown_releases_current() {
    let mut h = Harness::new();
    h.runner.put_task("test", Ask { dont_ask_key: None });
    h.prompt().await;

    tokio::time::timeout(Duration::from_secs(10), h.runner.shutdown())
        .await
        .expect("shutdown should finish");
    assert!(!h.runner.is_busy());
    h.drain();
    assert!(h.completions().is_empty());
}
