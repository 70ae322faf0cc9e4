//! Task observer
//!
//! Every notification the runner emits goes through [`TaskObserver`]. All
//! callbacks run on the interactive context and must not block.
//! [`ChannelObserver`] turns them into [`Notification`] values on a channel,
//! which is what the CLI and the tests consume.

use crate::effects::{JumpTarget, TaskEffects};
use crate::error::ErrorKind;
use crate::invocation::InvokerId;
use crate::process::ProcessHandle;
use crate::prompt::{PromptId, UserPrompt};
use crate::report::FailureReport;
use crate::state::TaskState;
use crate::tasks::TaskKind;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

// ============================================================================
// Completion
// ============================================================================

/// How a chain ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskOutcome {
    Completed,
    Aborted,
    Failed(ErrorKind),
    RepoGone,
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Completed)
    }
}

/// Sent once per root task that ran to an end, whether it succeeded or not.
/// Interrupted tasks get none.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCompletion {
    pub task_name: String,
    pub kind: TaskKind,
    pub invoker: InvokerId,
    pub outcome: TaskOutcome,
    /// Repository areas to refresh
    pub effects: TaskEffects,
    pub jump_target: Option<JumpTarget>,
    /// Message for the status bar
    pub post_status: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

// ============================================================================
// TaskObserver
// ============================================================================

/// Task observer (UI hookup)
pub trait TaskObserver: Send + Sync {
    /// A root task finished
    fn on_completion(&self, completion: &TaskCompletion);

    /// Busy indicator. An empty message clears it.
    fn on_progress(&self, _message: &str, _background: bool) {}

    /// Root task state change
    fn on_state_change(&self, _task_name: &str, _state: TaskState) {}

    /// A chain started an external process
    fn on_process_started(&self, _process: &ProcessHandle, _task_name: &str) {}

    /// A task was rejected because another one is running
    fn on_busy(&self, _invoker: &InvokerId, _rejected: &str, _running: &str) {}

    /// A failure the user should see
    fn on_failure(&self, _report: &FailureReport) {}

    /// The repository vanished; the UI should close it
    fn on_repo_gone(&self) {}

    /// A flow is waiting for an answer; reply with
    /// [`TaskRunner::answer`](crate::TaskRunner::answer)
    fn on_user_prompt(&self, _id: PromptId, _task_name: &str, _prompt: &UserPrompt) {}

    /// A prompt no longer needs an answer (its chain was interrupted)
    fn on_prompt_dismissed(&self, _id: PromptId) {}

    /// Bring the UI to the foreground
    fn on_attention_requested(&self) {}

    /// Nothing running, nothing queued
    fn on_ready(&self) {}
}

/// Observer that ignores everything
pub struct NullObserver;

impl TaskObserver for NullObserver {
    fn on_completion(&self, _completion: &TaskCompletion) {}
}

// ============================================================================
// ChannelObserver
// ============================================================================

/// A notification, as forwarded by [`ChannelObserver`]
#[derive(Debug, Clone)]
pub enum Notification {
    Completion(TaskCompletion),
    Progress {
        message: String,
        background: bool,
    },
    StateChange {
        task_name: String,
        state: TaskState,
    },
    ProcessStarted {
        process: ProcessHandle,
        task_name: String,
    },
    Busy {
        invoker: InvokerId,
        rejected: String,
        running: String,
    },
    Failure(FailureReport),
    RepoGone,
    UserPrompt {
        id: PromptId,
        task_name: String,
        prompt: UserPrompt,
    },
    PromptDismissed(PromptId),
    AttentionRequested,
    Ready,
}

/// Forwards every notification to an unbounded channel
#[derive(Clone)]
pub struct ChannelObserver {
    tx: UnboundedSender<Notification>,
}

impl ChannelObserver {
    pub fn new() -> (Self, UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, notification: Notification) {
        // Receiver gone means nobody is listening anymore
        let _ = self.tx.send(notification);
    }
}

impl TaskObserver for ChannelObserver {
    fn on_completion(&self, completion: &TaskCompletion) {
        self.send(Notification::Completion(completion.clone()));
    }

    fn on_progress(&self, message: &str, background: bool) {
        self.send(Notification::Progress {
            message: message.to_string(),
            background,
        });
    }

    fn on_state_change(&self, task_name: &str, state: TaskState) {
        self.send(Notification::StateChange {
            task_name: task_name.to_string(),
            state,
        });
    }

    fn on_process_started(&self, process: &ProcessHandle, task_name: &str) {
        self.send(Notification::ProcessStarted {
            process: process.clone(),
            task_name: task_name.to_string(),
        });
    }

    fn on_busy(&self, invoker: &InvokerId, rejected: &str, running: &str) {
        self.send(Notification::Busy {
            invoker: invoker.clone(),
            rejected: rejected.to_string(),
            running: running.to_string(),
        });
    }

    fn on_failure(&self, report: &FailureReport) {
        self.send(Notification::Failure(report.clone()));
    }

    fn on_repo_gone(&self) {
        self.send(Notification::RepoGone);
    }

    fn on_user_prompt(&self, id: PromptId, task_name: &str, prompt: &UserPrompt) {
        self.send(Notification::UserPrompt {
            id,
            task_name: task_name.to_string(),
            prompt: prompt.clone(),
        });
    }

    fn on_prompt_dismissed(&self, id: PromptId) {
        self.send(Notification::PromptDismissed(id));
    }

    fn on_attention_requested(&self) {
        self.send(Notification::AttentionRequested);
    }

    fn on_ready(&self) {
        self.send(Notification::Ready);
    }
}
