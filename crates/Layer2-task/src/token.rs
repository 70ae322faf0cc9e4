//! Control tokens
//!
//! A flow hands one of these back to the runner every time it stops. The
//! first four are suspension points and mean "resume me later"; the last two
//! end the chain.

use crate::error::TaskError;

/// What a flow wants the runner to do next
#[derive(Debug)]
pub enum ControlToken {
    /// Resume on the interactive context as soon as possible
    ContinueInteractive,

    /// Resume on the worker thread
    ContinueWorker,

    /// Resume once the user has answered the pending prompt
    WaitForUser,

    /// Resume once the owned process has started or exited
    WaitForProcess,

    /// The root flow returned normally
    Finished,

    /// The root flow returned an error
    Failed(TaskError),
}

impl ControlToken {
    /// Whether the flow can still be resumed after this token
    pub fn is_suspension(&self) -> bool {
        matches!(
            self,
            ControlToken::ContinueInteractive
                | ControlToken::ContinueWorker
                | ControlToken::WaitForUser
                | ControlToken::WaitForProcess
        )
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ControlToken::ContinueInteractive => "ContinueInteractive",
            ControlToken::ContinueWorker => "ContinueWorker",
            ControlToken::WaitForUser => "WaitForUser",
            ControlToken::WaitForProcess => "WaitForProcess",
            ControlToken::Finished => "Finished",
            ControlToken::Failed(_) => "Failed",
        }
    }
}

impl std::fmt::Display for ControlToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlToken::Failed(e) => write!(f, "Failed({})", e),
            other => write!(f, "{}", other.display_name()),
        }
    }
}
