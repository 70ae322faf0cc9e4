//! Task errors
//!
//! Failure taxonomy for task flows:
//!
//! - [`AbortTask`]: controlled abort. Not a bug; the message (if any) goes
//!   straight to the user.
//! - [`ConflictError`], [`MultiFileError`]: domain failures with their own
//!   presentation.
//! - [`TaskError::RepoGone`]: the repository disappeared from disk.
//! - everything else is unclassified and reported generically.

use branchwork_foundation::Error as FoundationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for task flows
pub type TaskResult<T> = std::result::Result<T, TaskError>;

// ============================================================================
// Severity
// ============================================================================

/// Icon of the message box shown for an abort
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Information,
    #[default]
    Warning,
    Critical,
}

// ============================================================================
// AbortTask
// ============================================================================

/// Controlled abort of a task chain
#[derive(Debug, Clone, Default, Error)]
#[error("{message}")]
pub struct AbortTask {
    /// Text shown to the user. Empty means abort silently.
    pub message: String,
    pub severity: Severity,
    /// Show in the status bar instead of a dialog
    pub status_only: bool,
    /// Extra text for an expandable details section
    pub details: Option<String>,
    /// Exit code of the process that caused the abort, if any
    pub exit_code: Option<i32>,
}

impl AbortTask {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    /// Abort without telling the user anything
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn as_status_message(mut self) -> Self {
        self.status_only = true;
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Abort caused by a process that exited unsuccessfully
    pub fn process_failed(program: &str, exit_code: Option<i32>, stderr: &str) -> Self {
        let message = match exit_code {
            Some(code) => format!("{} exited with code {}.", program, code),
            None => format!("{} was terminated.", program),
        };
        let details = stderr.trim();
        Self {
            message,
            severity: Severity::Warning,
            status_only: false,
            details: (!details.is_empty()).then(|| details.to_string()),
            exit_code,
        }
    }

    pub fn is_silent(&self) -> bool {
        self.message.is_empty()
    }
}

// ============================================================================
// ConflictError
// ============================================================================

/// What an operation collided with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictScope {
    /// Uncommitted changes in the working directory
    Workdir,
    /// The commit at HEAD
    Head,
    /// Anything else, described in free text
    Other(String),
}

impl fmt::Display for ConflictScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictScope::Workdir => write!(f, "workdir"),
            ConflictScope::Head => write!(f, "HEAD"),
            ConflictScope::Other(text) => write!(f, "{}", text),
        }
    }
}

/// An operation would overwrite files it does not own
#[derive(Debug, Clone, Error)]
#[error("{} conflicting file(s) in {scope}", .conflicts.len())]
pub struct ConflictError {
    pub scope: ConflictScope,
    pub conflicts: Vec<String>,
}

impl ConflictError {
    pub fn new(scope: ConflictScope, conflicts: Vec<String>) -> Self {
        Self { scope, conflicts }
    }
}

// ============================================================================
// MultiFileError
// ============================================================================

/// Per-file failures of an operation applied to many files
#[derive(Debug, Clone, Default, Error)]
#[error("{} file(s) failed", .file_errors.len())]
pub struct MultiFileError {
    /// Headline; a generic one is used if empty
    pub message: String,
    /// Failing paths, in order, with the reason if known
    pub file_errors: Vec<(String, Option<String>)>,
    /// How many files went through fine
    pub successes: usize,
}

impl MultiFileError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    /// Record a failing path. A path reported twice keeps its first position
    /// and the latest reason.
    pub fn add_file_error(&mut self, path: impl Into<String>, reason: Option<impl fmt::Display>) {
        let path = path.into();
        let reason = reason.map(|r| r.to_string());
        match self.file_errors.iter_mut().find(|(p, _)| *p == path) {
            Some(entry) => entry.1 = reason,
            None => self.file_errors.push((path, reason)),
        }
    }

    pub fn add_file_success(&mut self) {
        self.successes += 1;
    }

    pub fn has_errors(&self) -> bool {
        !self.file_errors.is_empty()
    }

    /// `Ok(())` if no file failed
    pub fn into_result(self) -> TaskResult<()> {
        if self.has_errors() {
            Err(TaskError::MultiFile(self))
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// TaskError
// ============================================================================

/// How the runner treats a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// Controlled abort
    Abort,
    /// Conflict or multi-file failure
    Domain,
    /// Repository vanished
    RepoGone,
    /// Anything else
    Unclassified,
}

/// Error raised by a task flow
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("{0}")]
    Abort(#[from] AbortTask),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error(transparent)]
    MultiFile(#[from] MultiFileError),

    #[error("Repository is gone: {}", .0.display())]
    RepoGone(PathBuf),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error(transparent)]
    Foundation(#[from] FoundationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Task panicked: {0}")]
    Panic(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TaskError {
    pub fn abort(message: impl Into<String>) -> Self {
        TaskError::Abort(AbortTask::new(message))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        TaskError::Internal(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TaskError::Abort(_) => ErrorKind::Abort,
            TaskError::Conflict(_) | TaskError::MultiFile(_) => ErrorKind::Domain,
            TaskError::RepoGone(_) => ErrorKind::RepoGone,
            _ => ErrorKind::Unclassified,
        }
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, TaskError::Abort(_))
    }

    pub fn as_abort(&self) -> Option<&AbortTask> {
        match self {
            TaskError::Abort(abort) => Some(abort),
            _ => None,
        }
    }

    /// Turn a caught panic payload into an error
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        TaskError::Panic(message)
    }
}
