//! # branchwork-task
//!
//! Task engine for Branchwork.
//! Runs user-visible repository operations one chain at a time, stepping
//! each task's flow between the interactive context and a worker thread.
//!
//! ## Features
//!
//! - One active chain; busy rejection, kill rules and a critical queue
//! - Flows as async routines with explicit suspension points
//! - Sub-tasks sharing their parent's chain, effects and status
//! - User prompts and external processes as suspension points
//! - **Prerequisite checks before the first step**
//! - **Typed failure taxonomy with ready-to-show reports**
//! - **Interruption that discards chains without notifying**

mod chain;
pub mod context;
pub mod effects;
pub mod error;
mod flow;
pub mod git;
pub mod invocation;
pub mod observer;
pub mod prereqs;
pub mod process;
pub mod prompt;
pub mod report;
pub mod repo;
pub mod runner;
pub mod state;
pub mod task;
pub mod tasks;
pub mod token;
mod worker;

// Runner
pub use runner::{TaskRunner, TaskRunnerBuilder};
pub use state::TaskState;

// Task definition
pub use context::FlowContext;
pub use effects::{JumpTarget, TaskEffects};
pub use prereqs::TaskPrereqs;
pub use task::Task;
pub use token::ControlToken;

// Catalogue
pub use invocation::{InvokerId, TaskInvocation};
pub use tasks::{
    AbortMerge, FetchRemote, NewCommit, PullBranch, RefreshRepo, RunGit, StageFiles, TaskKind,
    TaskRequest, UnstageFiles,
};

// Errors
pub use error::{
    AbortTask, ConflictError, ConflictScope, ErrorKind, MultiFileError, Severity, TaskError,
    TaskResult,
};
pub use report::{FailureReport, Presentation};

// Repository
pub use repo::{Git2Probe, RepoProbe, RepoState, RepoStatus};

// Processes
pub use git::{parse_progress, GitProgress};
pub use process::{ProcessHandle, ProcessOutput, ProcessSignal, ProcessSpec, ProcessWrapper};

// User interaction and notifications
pub use observer::{
    ChannelObserver, Notification, NullObserver, TaskCompletion, TaskObserver, TaskOutcome,
};
pub use prompt::{PromptId, PromptKind, UserDecision, UserPrompt};
