//! Failure reports
//!
//! Turns a [`TaskError`] into something the UI can show. The runner never
//! formats text itself; it asks the root task for a report (see
//! [`Task::report_error`](crate::Task::report_error)), whose default is
//! [`FailureReport::from_error`].

use crate::error::{AbortTask, ConflictError, ConflictScope, ErrorKind, MultiFileError, Severity, TaskError};
use serde::{Deserialize, Serialize};

/// How prominently a report should be shown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Presentation {
    /// Don't show anything
    Silent,
    /// Transient status bar message
    StatusBar,
    /// Message box
    Dialog,
}

/// User-facing description of a failed task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureReport {
    /// Usually the task name
    pub title: String,
    pub message: String,
    /// Bullet list shown under the message
    pub details: Vec<String>,
    /// Collapsible detail text
    pub detail_text: Option<String>,
    pub severity: Severity,
    pub presentation: Presentation,
    pub kind: ErrorKind,
}

impl FailureReport {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            details: Vec::new(),
            detail_text: None,
            severity: Severity::Warning,
            presentation: Presentation::Dialog,
            kind: ErrorKind::Unclassified,
        }
    }

    /// Default presentation of any task error
    pub fn from_error(title: &str, error: &TaskError) -> Self {
        match error {
            TaskError::Abort(abort) => Self::from_abort(title, abort),
            TaskError::Conflict(conflict) => Self::from_conflict(title, conflict),
            TaskError::MultiFile(multi) => Self::from_multi_file(title, multi),
            TaskError::RepoGone(path) => {
                let mut report = Self::new(
                    title,
                    format!("The repository at {} is gone.", path.display()),
                );
                report.kind = ErrorKind::RepoGone;
                report
            }
            other => {
                let mut report = Self::new(title, format!("Operation failed: {}.", title));
                report.detail_text = Some(other.to_string());
                report
            }
        }
    }

    pub fn from_abort(title: &str, abort: &AbortTask) -> Self {
        let presentation = if abort.is_silent() {
            Presentation::Silent
        } else if abort.status_only {
            Presentation::StatusBar
        } else {
            Presentation::Dialog
        };
        Self {
            title: title.to_string(),
            message: abort.message.clone(),
            details: Vec::new(),
            detail_text: abort.details.clone(),
            severity: abort.severity,
            presentation,
            kind: ErrorKind::Abort,
        }
    }

    pub fn from_conflict(title: &str, conflict: &ConflictError) -> Self {
        let count = conflict.conflicts.len();
        let files = plural(count, "file", "files");
        let message = match &conflict.scope {
            ConflictScope::Workdir => format!(
                "Operation “{}” conflicts with {} in the working directory:",
                title, files
            ),
            ConflictScope::Head => format!(
                "Operation “{}” conflicts with {} in the commit at HEAD:",
                title, files
            ),
            ConflictScope::Other(what) => format!(
                "Operation “{}” has caused a conflict with {} ({}):",
                title, files, what
            ),
        };
        let detail_text = (conflict.scope == ConflictScope::Workdir).then(|| {
            "Before you try again, you should either commit, stash, or discard your changes."
                .to_string()
        });
        Self {
            title: plural(count, "conflicting file", "conflicting files"),
            message,
            details: conflict.conflicts.clone(),
            detail_text,
            severity: Severity::Warning,
            presentation: Presentation::Dialog,
            kind: ErrorKind::Domain,
        }
    }

    /// Lists failing paths in order, then a line counting the successes
    pub fn from_multi_file(title: &str, error: &MultiFileError) -> Self {
        let message = if error.message.is_empty() {
            format!("Operation failed: {}.", title)
        } else {
            error.message.clone()
        };

        let mut details: Vec<String> = error
            .file_errors
            .iter()
            .map(|(path, reason)| match reason {
                Some(reason) => format!("{}: {}", path, reason),
                None => path.clone(),
            })
            .collect();

        match error.successes {
            0 => {}
            1 => details.push("(1 other file was successful)".to_string()),
            n => details.push(format!("({} other files were successful)", n)),
        }

        Self {
            title: title.to_string(),
            message,
            details,
            detail_text: None,
            severity: Severity::Warning,
            presentation: Presentation::Dialog,
            kind: ErrorKind::Domain,
        }
    }

    pub fn is_silent(&self) -> bool {
        self.presentation == Presentation::Silent
    }
}

/// "1 file", "3 files"
pub(crate) fn plural(count: usize, one: &str, many: &str) -> String {
    if count == 1 {
        format!("1 {}", one)
    } else {
        format!("{} {}", count, many)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_plural() {
        assert_eq!(plural(1, "file", "files"), "1 file");
        assert_eq!(plural(0, "file", "files"), "0 files");
        assert_eq!(plural(3, "conflicting file", "conflicting files"), "3 conflicting files");
    }

    #[test]
    fn test_abort_presentation() {
        let silent = FailureReport::from_error("Fetch", &AbortTask::silent().into());
        assert_eq!(silent.presentation, Presentation::Silent);

        let status = FailureReport::from_error(
            "Fetch",
            &AbortTask::new("Nothing to fetch.").as_status_message().into(),
        );
        assert_eq!(status.presentation, Presentation::StatusBar);
        assert_eq!(status.message, "Nothing to fetch.");

        let dialog = FailureReport::from_error(
            "Fetch",
            &AbortTask::new("Remote not found.")
                .with_severity(Severity::Critical)
                .into(),
        );
        assert_eq!(dialog.presentation, Presentation::Dialog);
        assert_eq!(dialog.severity, Severity::Critical);
        assert_eq!(dialog.kind, ErrorKind::Abort);
    }

    #[test]
    fn test_multi_file_one_success() {
        let mut error = MultiFileError::new("");
        error.add_file_error("a.txt", Some("locked"));
        error.add_file_success();
        error.add_file_error("c.txt", None::<String>);

        let report = FailureReport::from_error("Stage files", &error.into());
        assert_eq!(report.message, "Operation failed: Stage files.");
        assert_eq!(
            report.details,
            vec![
                "a.txt: locked".to_string(),
                "c.txt".to_string(),
                "(1 other file was successful)".to_string(),
            ]
        );
    }

    #[test]
    fn test_multi_file_many_successes() {
        let mut error = MultiFileError::new("Some files could not be staged.");
        error.add_file_error("x", None::<String>);
        error.successes = 4;

        let report = FailureReport::from_multi_file("Stage files", &error);
        assert_eq!(report.message, "Some files could not be staged.");
        assert_eq!(report.details.last().unwrap(), "(4 other files were successful)");
    }

    #[test]
    fn test_conflict_report() {
        let conflict = ConflictError::new(
            ConflictScope::Workdir,
            vec!["a.txt".to_string(), "b.txt".to_string()],
        );
        let report = FailureReport::from_conflict("Checkout", &conflict);
        assert_eq!(report.title, "2 conflicting files");
        assert!(report.message.contains("in the working directory"));
        assert!(report.detail_text.is_some());
        assert_eq!(report.details.len(), 2);

        let head = ConflictError::new(ConflictScope::Head, vec!["a.txt".to_string()]);
        let report = FailureReport::from_conflict("Stash", &head);
        assert_eq!(report.title, "1 conflicting file");
        assert!(report.message.contains("commit at HEAD"));
        assert!(report.detail_text.is_none());
    }

    #[test]
    fn test_unclassified() {
        let report = FailureReport::from_error("Commit", &TaskError::internal("oops"));
        assert_eq!(report.message, "Operation failed: Commit.");
        assert_eq!(report.detail_text.as_deref(), Some("Internal error: oops"));
        assert_eq!(report.kind, ErrorKind::Unclassified);

        let gone = FailureReport::from_error("Commit", &TaskError::RepoGone(PathBuf::from("/r")));
        assert_eq!(gone.kind, ErrorKind::RepoGone);
    }
}
