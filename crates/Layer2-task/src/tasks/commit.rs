use super::{is_refresh, TaskKind};
use crate::context::FlowContext;
use crate::effects::{JumpTarget, TaskEffects};
use crate::error::{AbortTask, TaskResult};
use crate::git;
use crate::prereqs::TaskPrereqs;
use crate::prompt::UserPrompt;
use crate::task::Task;
use async_trait::async_trait;
use parking_lot::Mutex;

/// Commit the staged changes.
///
/// Asks for a message if none was given, and for confirmation before
/// creating an empty commit.
#[derive(Debug, Default)]
pub struct NewCommit {
    pub message: String,
    created: Mutex<Option<String>>,
}

impl NewCommit {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            created: Mutex::new(None),
        }
    }

    /// Abbreviated hash of the commit, once created
    pub fn created(&self) -> Option<String> {
        self.created.lock().clone()
    }
}

#[async_trait]
impl Task for NewCommit {
    fn kind(&self) -> TaskKind {
        TaskKind::NewCommit
    }

    fn prereqs(&self) -> TaskPrereqs {
        TaskPrereqs::NO_CONFLICTS
    }

    fn can_kill(&self, running: &dyn Task) -> bool {
        is_refresh(running)
    }

    async fn flow(&self, ctx: &FlowContext) -> TaskResult<()> {
        let status = ctx.repo()?.status()?;

        let mut allow_empty = false;
        if !status.any_staged_changes {
            ctx.confirm(
                UserPrompt::confirm(
                    "Create empty commit",
                    "No files are staged for commit.\nDo you want to create an empty commit anyway?",
                )
                .with_verb("Empty commit")
                .with_dont_ask_again("empty-commit"),
            )
            .await?;
            allow_empty = true;
        }

        let mut message = self.message.trim().to_string();
        if message.is_empty() {
            message = ctx
                .input(UserPrompt::input("Commit", "Enter commit message:").with_verb("Commit"))
                .await?
                .trim()
                .to_string();
        }
        if message.is_empty() {
            return Err(AbortTask::new("Commit message is empty.")
                .as_status_message()
                .into());
        }

        let mut args = vec!["commit".to_string()];
        if allow_empty {
            args.push("--allow-empty".to_string());
        }
        args.push("-m".to_string());
        args.push(message);

        ctx.add_effects(TaskEffects::WORKDIR | TaskEffects::REFS | TaskEffects::HEAD | TaskEffects::INDEX);
        let output = ctx.run_process(ctx.git(args)?).await?;

        match git::parse_commit_summary(&output.stdout) {
            Some((hash, summary)) => {
                ctx.set_jump_target(JumpTarget::commit(hash.as_str()));
                ctx.set_post_status(format!("Commit {} created: {}", hash, summary));
                *self.created.lock() = Some(hash);
            }
            None => {
                ctx.set_jump_target(JumpTarget::Head);
                ctx.set_post_status("Commit created.");
            }
        }
        Ok(())
    }
}
