//! Task state machine
//!
//! Lifecycle of a root task, as seen by the runner:
//!
//! ```text
//! Idle ──► Running ──┬──► Completed ──┐
//!                    ├──► Aborted ────┤
//!                    ├──► Failed ─────┼──► Released
//!                    └──► Interrupted ┘
//! ```

use serde::{Deserialize, Serialize};

/// Possible states of a root task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskState {
    /// Accepted but not started yet (pending or queued)
    Idle,

    /// Its chain is being driven
    Running,

    /// The flow returned normally
    Completed,

    /// The flow (or a prerequisite check) aborted on purpose
    Aborted,

    /// The flow failed with any other error
    Failed,

    /// Another task took over; discarded at the next suspension point
    Interrupted,

    /// Chain torn down, cleanups run
    Released,
}

impl TaskState {
    /// Check if the chain has stopped running
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Aborted | TaskState::Failed | TaskState::Interrupted
        )
    }

    /// Check if this is a terminal state (cannot transition further)
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Released)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, TaskState::Running)
    }

    /// Whether `self → next` is a legal transition
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        match (self, next) {
            (TaskState::Idle, TaskState::Running) => true,
            (TaskState::Running, next) => next.is_finished(),
            (from, TaskState::Released) => from.is_finished(),
            _ => false,
        }
    }

    /// Get display name for the state
    pub fn display_name(&self) -> &'static str {
        match self {
            TaskState::Idle => "Idle",
            TaskState::Running => "Running",
            TaskState::Completed => "Completed",
            TaskState::Aborted => "Aborted",
            TaskState::Failed => "Failed",
            TaskState::Interrupted => "Interrupted",
            TaskState::Released => "Released",
        }
    }

    /// Get a symbol for the state (for terminal output)
    pub fn symbol(&self) -> &'static str {
        match self {
            TaskState::Idle => "◯",
            TaskState::Running => "⟳",
            TaskState::Completed => "✓",
            TaskState::Aborted => "⊘",
            TaskState::Failed => "✗",
            TaskState::Interrupted => "⏸",
            TaskState::Released => "·",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
