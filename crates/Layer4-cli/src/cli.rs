//! Non-interactive CLI mode
//!
//! Renders runner notifications on the terminal and answers prompts, either
//! automatically (`--yes`) or by reading stdin.

use branchwork_task::{
    FailureReport, Notification, PromptKind, Severity, TaskOutcome, TaskRunner, UserDecision,
    UserPrompt,
};
use std::io::{self, BufRead, Write};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::debug;

pub struct RunOptions {
    pub assume_yes: bool,
    pub json: bool,
}

/// Follow the runner until the task that was put completes.
///
/// Returns `None` if the task was interrupted with Ctrl-C.
pub async fn run_once(
    runner: &TaskRunner,
    mut notifications: UnboundedReceiver<Notification>,
    options: &RunOptions,
) -> anyhow::Result<Option<TaskOutcome>> {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let notification = tokio::select! {
            next = notifications.recv() => match next {
                Some(notification) => notification,
                None => anyhow::bail!("Task runner stopped unexpectedly"),
            },
            _ = &mut ctrl_c => {
                eprintln!("\nInterrupted.");
                runner.kill_current();
                runner.join_killed().await;
                return Ok(None);
            }
        };

        match notification {
            Notification::Completion(completion) => {
                if options.json {
                    println!("{}", serde_json::to_string_pretty(&completion)?);
                } else if let Some(status) = &completion.post_status {
                    println!("{}", status);
                } else if completion.outcome.is_success() {
                    println!("{}: done.", completion.task_name);
                }
                return Ok(Some(completion.outcome));
            }
            Notification::Progress { message, .. } => {
                if !message.is_empty() {
                    eprintln!("{}", message);
                }
            }
            Notification::Failure(report) => print_failure(&report),
            Notification::RepoGone => eprintln!("The repository is gone."),
            Notification::Busy {
                rejected, running, ..
            } => eprintln!("Cannot run {}: {} is in progress.", rejected, running),
            Notification::UserPrompt { id, prompt, .. } => {
                let decision = if options.assume_yes {
                    auto_answer(&prompt)
                } else {
                    tokio::task::spawn_blocking(move || ask_on_terminal(&prompt)).await?
                };
                runner.answer(id, decision);
            }
            Notification::ProcessStarted { process, task_name } => {
                debug!("{} started {} (pid {:?})", task_name, process.program(), process.pid())
            }
            other => debug!("{:?}", other),
        }
    }
}

fn print_failure(report: &FailureReport) {
    let marker = match report.severity {
        Severity::Information => "i",
        Severity::Warning => "!",
        Severity::Critical => "✗",
    };
    eprintln!("{} {}: {}", marker, report.title, report.message);
    for line in &report.details {
        eprintln!("  - {}", line);
    }
    if let Some(text) = &report.detail_text {
        for line in text.lines() {
            eprintln!("    {}", line);
        }
    }
}

/// Answer for `--yes`: accept confirmations, take the default for inputs
fn auto_answer(prompt: &UserPrompt) -> UserDecision {
    match prompt.kind {
        PromptKind::Input => match &prompt.default_value {
            Some(value) => UserDecision::with_value(value.clone()),
            None => UserDecision::reject(),
        },
        PromptKind::Confirmation | PromptKind::Information => UserDecision::accept(),
    }
}

fn ask_on_terminal(prompt: &UserPrompt) -> UserDecision {
    eprintln!();
    eprintln!("{}", prompt.title);
    eprintln!("{}", prompt.text);
    for line in &prompt.details {
        eprintln!("  - {}", line);
    }

    let hint = match prompt.kind {
        PromptKind::Information => "[Enter] ".to_string(),
        PromptKind::Input => match &prompt.default_value {
            Some(value) => format!("[{}] > ", value),
            None => "> ".to_string(),
        },
        PromptKind::Confirmation => {
            let verb = prompt.verb.as_deref().unwrap_or("Continue");
            if prompt.dont_ask_again_key.is_some() {
                format!("{}? [y/N/a(lways)] ", verb)
            } else {
                format!("{}? [y/N] ", verb)
            }
        }
    };
    eprint!("{}", hint);
    let _ = io::stderr().flush();

    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => UserDecision::reject(),
        Ok(_) => parse_answer(prompt, &line),
    }
}

fn parse_answer(prompt: &UserPrompt, line: &str) -> UserDecision {
    let answer = line.trim();
    match prompt.kind {
        PromptKind::Information => UserDecision::accept(),
        PromptKind::Input => {
            if answer.is_empty() {
                match &prompt.default_value {
                    Some(value) => UserDecision::with_value(value.clone()),
                    None => UserDecision::reject(),
                }
            } else {
                UserDecision::with_value(answer)
            }
        }
        PromptKind::Confirmation => match answer.to_ascii_lowercase().as_str() {
            "y" | "yes" => UserDecision::accept(),
            "a" | "always" if prompt.dont_ask_again_key.is_some() => {
                UserDecision::accept().remember()
            }
            _ => UserDecision::reject(),
        },
    }
}
