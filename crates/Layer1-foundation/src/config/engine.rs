//! Engine Config - settings for the task engine
//!
//! Every field is optional on disk so that a per-repository file only needs
//! to mention what it overrides.

use crate::core::Configurable;
use serde::{Deserialize, Serialize};

/// Settings file name
pub const ENGINE_CONFIG_FILE: &str = "engine.json";

/// Default command used to invoke git
pub const DEFAULT_GIT_PATH: &str = "git";

/// Default name of the worker thread
pub const DEFAULT_WORKER_THREAD_NAME: &str = "branchwork-worker";

fn default_version() -> u32 {
    1
}

/// Task engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Version (for migrations)
    #[serde(default = "default_version")]
    pub version: u32,

    /// Run worker steps on the interactive context (debugging aid)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_serial: Option<bool>,

    /// Command stem for git processes (may carry extra arguments)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_path: Option<String>,

    /// Name given to the worker thread
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_thread_name: Option<String>,

    /// Confirmation keys the user asked not to be prompted for again
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dont_ask_again: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            force_serial: None,
            git_path: None,
            worker_thread_name: None,
            dont_ask_again: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn force_serial(&self) -> bool {
        self.force_serial.unwrap_or(false)
    }

    pub fn git_path(&self) -> &str {
        self.git_path.as_deref().unwrap_or(DEFAULT_GIT_PATH)
    }

    /// Program and leading arguments of the git command, split with shell
    /// quoting rules. Falls back to plain `git` if the setting is blank or
    /// badly quoted.
    pub fn git_command_stem(&self) -> Vec<String> {
        match shlex::split(self.git_path()) {
            Some(stem) if !stem.is_empty() => stem,
            _ => vec![DEFAULT_GIT_PATH.to_string()],
        }
    }

    pub fn worker_thread_name(&self) -> &str {
        self.worker_thread_name
            .as_deref()
            .unwrap_or(DEFAULT_WORKER_THREAD_NAME)
    }

    pub fn is_dont_ask_again(&self, key: &str) -> bool {
        self.dont_ask_again.iter().any(|k| k == key)
    }

    pub fn remember_dont_ask_again(&mut self, key: impl Into<String>) {
        let key = key.into();
        if !self.is_dont_ask_again(&key) {
            self.dont_ask_again.push(key);
        }
    }

    // ========================================================================
    // Builder
    // ========================================================================

    pub fn with_force_serial(mut self, serial: bool) -> Self {
        self.force_serial = Some(serial);
        self
    }

    pub fn with_git_path(mut self, path: impl Into<String>) -> Self {
        self.git_path = Some(path.into());
        self
    }

    pub fn with_worker_thread_name(mut self, name: impl Into<String>) -> Self {
        self.worker_thread_name = Some(name.into());
        self
    }
}

impl Configurable for EngineConfig {
    const FILE_NAME: &'static str = ENGINE_CONFIG_FILE;

    fn merge(&mut self, other: EngineConfig) {
        if other.force_serial.is_some() {
            self.force_serial = other.force_serial;
        }
        if other.git_path.is_some() {
            self.git_path = other.git_path;
        }
        if other.worker_thread_name.is_some() {
            self.worker_thread_name = other.worker_thread_name;
        }
        for key in other.dont_ask_again {
            self.remember_dont_ask_again(key);
        }
    }
}
