//! Task invocations
//!
//! A plain request to run a task on behalf of some part of the UI. The task
//! itself is only instantiated when the runner accepts the request.

use crate::tasks::TaskRequest;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Who asked for a task (a toolbar button, a menu, the CLI...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvokerId(String);

impl InvokerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InvokerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for InvokerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Run `request` on behalf of `invoker`
#[derive(Debug)]
pub struct TaskInvocation {
    pub invoker: InvokerId,
    pub request: TaskRequest,
}

impl TaskInvocation {
    pub fn new(invoker: impl Into<InvokerId>, request: TaskRequest) -> Self {
        Self {
            invoker: invoker.into(),
            request,
        }
    }
}
