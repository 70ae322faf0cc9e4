//! User prompts
//!
//! A flow that needs the user asks through [`FlowContext::ask_user`]
//! (or [`confirm`](crate::FlowContext::confirm)). The observer is handed a
//! [`UserPrompt`] and a [`PromptId`]; the answer comes back through
//! [`TaskRunner::answer`](crate::TaskRunner::answer).
//!
//! [`FlowContext::ask_user`]: crate::FlowContext::ask_user

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one outstanding prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PromptId(pub(crate) u64);

impl PromptId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PromptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "prompt#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PromptKind {
    /// Yes/no question
    Confirmation,
    /// Message with a single OK button
    Information,
    /// Free text entry
    Input,
}

/// What to show the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPrompt {
    pub kind: PromptKind,
    pub title: String,
    pub text: String,
    /// Label of the accept button ("Delete", "Abort merge"...)
    pub verb: Option<String>,
    /// Bullet list under the text
    pub details: Vec<String>,
    /// Offer a cancel button
    pub can_cancel: bool,
    /// Offer a "don't ask again" box that remembers this key
    pub dont_ask_again_key: Option<String>,
    /// Pre-filled value for input prompts
    pub default_value: Option<String>,
}

impl UserPrompt {
    pub fn confirm(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: PromptKind::Confirmation,
            title: title.into(),
            text: text.into(),
            verb: None,
            details: Vec::new(),
            can_cancel: true,
            dont_ask_again_key: None,
            default_value: None,
        }
    }

    pub fn information(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: PromptKind::Information,
            can_cancel: false,
            ..Self::confirm(title, text)
        }
    }

    pub fn input(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: PromptKind::Input,
            ..Self::confirm(title, text)
        }
    }

    pub fn with_verb(mut self, verb: impl Into<String>) -> Self {
        self.verb = Some(verb.into());
        self
    }

    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = details;
        self
    }

    pub fn with_dont_ask_again(mut self, key: impl Into<String>) -> Self {
        self.dont_ask_again_key = Some(key.into());
        self
    }

    pub fn with_default_value(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Only an OK button
    pub fn not_cancellable(mut self) -> Self {
        self.can_cancel = false;
        self
    }
}

/// The user's answer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDecision {
    pub accepted: bool,
    /// Text entered in an input prompt
    pub value: Option<String>,
    /// The "don't ask again" box was ticked
    pub dont_ask_again: bool,
}

impl UserDecision {
    pub fn accept() -> Self {
        Self {
            accepted: true,
            ..Default::default()
        }
    }

    pub fn reject() -> Self {
        Self::default()
    }

    pub fn with_value(value: impl Into<String>) -> Self {
        Self {
            accepted: true,
            value: Some(value.into()),
            dont_ask_again: false,
        }
    }

    pub fn remember(mut self) -> Self {
        self.dont_ask_again = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_builders() {
        let prompt = UserPrompt::confirm("Abort merge", "Really?")
            .with_verb("Abort")
            .with_dont_ask_again("abort-merge");
        assert_eq!(prompt.kind, PromptKind::Confirmation);
        assert!(prompt.can_cancel);
        assert_eq!(prompt.dont_ask_again_key.as_deref(), Some("abort-merge"));

        let info = UserPrompt::information("Done", "All good.");
        assert!(!info.can_cancel);
    }

    #[test]
    fn test_decisions() {
        assert!(UserDecision::accept().accepted);
        assert!(!UserDecision::reject().accepted);
        let input = UserDecision::with_value("origin");
        assert!(input.accepted);
        assert_eq!(input.value.as_deref(), Some("origin"));
        assert!(UserDecision::accept().remember().dont_ask_again);
    }
}
