//! Task effects and jump targets
//!
//! Effects tell the UI which parts of its repository model went stale after a
//! chain finished. They only ever accumulate: a sub-task's effects are OR'd
//! into its parent's when the sub-task is popped.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Set of repository areas touched by a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskEffects(u8);

impl TaskEffects {
    pub const NOTHING: TaskEffects = TaskEffects(0);
    /// Files in the working directory
    pub const WORKDIR: TaskEffects = TaskEffects(1 << 0);
    /// Local branches and tags
    pub const REFS: TaskEffects = TaskEffects(1 << 1);
    /// Remotes and remote-tracking branches
    pub const REMOTES: TaskEffects = TaskEffects(1 << 2);
    /// What HEAD points to
    pub const HEAD: TaskEffects = TaskEffects(1 << 3);
    /// Upstream configuration of branches
    pub const UPSTREAMS: TaskEffects = TaskEffects(1 << 4);
    /// The staging area
    pub const INDEX: TaskEffects = TaskEffects(1 << 5);

    /// What a plain "refresh" has to reload
    pub const DEFAULT_REFRESH: TaskEffects =
        TaskEffects(Self::WORKDIR.0 | Self::REFS.0 | Self::REMOTES.0 | Self::HEAD.0 | Self::INDEX.0);

    const NAMES: [(TaskEffects, &'static str); 6] = [
        (Self::WORKDIR, "Workdir"),
        (Self::REFS, "Refs"),
        (Self::REMOTES, "Remotes"),
        (Self::HEAD, "Head"),
        (Self::UPSTREAMS, "Upstreams"),
        (Self::INDEX, "Index"),
    ];

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: TaskEffects) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: TaskEffects) -> bool {
        self.0 & other.0 != 0
    }

    /// Names of the individual flags that are set
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl BitOr for TaskEffects {
    type Output = TaskEffects;

    fn bitor(self, rhs: TaskEffects) -> TaskEffects {
        TaskEffects(self.0 | rhs.0)
    }
}

impl BitOrAssign for TaskEffects {
    fn bitor_assign(&mut self, rhs: TaskEffects) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for TaskEffects {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "Nothing")
        } else {
            write!(f, "{}", self.names().join("|"))
        }
    }
}

/// Where the UI should navigate once a chain completes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum JumpTarget {
    /// A file in the working directory (or the working directory itself)
    Workdir { path: Option<String> },

    /// A commit, optionally focused on one of its files
    Commit { oid: String, path: Option<String> },

    /// Whatever HEAD points to
    Head,

    /// A branch, tag or remote-tracking branch
    Ref { name: String },
}

impl JumpTarget {
    pub fn workdir() -> Self {
        JumpTarget::Workdir { path: None }
    }

    pub fn workdir_file(path: impl Into<String>) -> Self {
        JumpTarget::Workdir {
            path: Some(path.into()),
        }
    }

    pub fn commit(oid: impl Into<String>) -> Self {
        JumpTarget::Commit {
            oid: oid.into(),
            path: None,
        }
    }

    pub fn reference(name: impl Into<String>) -> Self {
        JumpTarget::Ref { name: name.into() }
    }
}

impl fmt::Display for JumpTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JumpTarget::Workdir { path: None } => write!(f, "workdir"),
            JumpTarget::Workdir { path: Some(p) } => write!(f, "workdir:{}", p),
            JumpTarget::Commit { oid, path: None } => write!(f, "commit:{}", oid),
            JumpTarget::Commit {
                oid,
                path: Some(p),
            } => write!(f, "commit:{}:{}", oid, p),
            JumpTarget::Head => write!(f, "HEAD"),
            JumpTarget::Ref { name } => write!(f, "ref:{}", name),
        }
    }
}
