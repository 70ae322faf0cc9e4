//! Branchwork CLI - Main entry point

mod cli;

use anyhow::Context;
use branchwork_foundation::{Configurable, EngineConfig};
use branchwork_task::{
    AbortMerge, ChannelObserver, FetchRemote, Git2Probe, NewCommit, PullBranch, RefreshRepo,
    RepoProbe, RunGit, StageFiles, TaskInvocation, TaskRequest, TaskRunner, UnstageFiles,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Branchwork - run repository tasks from the terminal
#[derive(Parser, Debug)]
#[command(name = "branchwork")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Repository to work on
    #[arg(short, long, default_value = ".")]
    repo: PathBuf,

    /// Accept every confirmation without asking
    #[arg(short, long)]
    yes: bool,

    /// Run worker steps on the main context
    #[arg(long)]
    serial: bool,

    /// Git command to use (may include arguments)
    #[arg(long)]
    git: Option<String>,

    /// Print the completion as JSON
    #[arg(long)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch a remote (defaults to the upstream of the current branch)
    Fetch { remote: Option<String> },
    /// Fetch and fast-forward the current branch
    Pull,
    /// Stage files
    Stage {
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Unstage files
    Unstage {
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Commit staged changes
    Commit {
        /// Commit message (asked for if omitted)
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Abort an ongoing merge, cherry-pick or revert
    AbortMerge,
    /// Reload the repository status
    Refresh,
    /// Run any git command
    Git {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        args: Vec<String>,
    },
}

impl Command {
    fn into_request(self) -> TaskRequest {
        match self {
            Command::Fetch { remote } => TaskRequest::FetchRemote(FetchRemote::new(remote)),
            Command::Pull => TaskRequest::PullBranch(PullBranch),
            Command::Stage { paths } => TaskRequest::StageFiles(StageFiles::new(paths)),
            Command::Unstage { paths } => TaskRequest::UnstageFiles(UnstageFiles::new(paths)),
            Command::Commit { message } => {
                TaskRequest::NewCommit(NewCommit::new(message.unwrap_or_default()))
            }
            Command::AbortMerge => TaskRequest::AbortMerge(AbortMerge),
            Command::Refresh => TaskRequest::RefreshRepo(RefreshRepo::new()),
            Command::Git { args } => TaskRequest::RunGit(RunGit::new(args)),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let probe = Git2Probe::open(&args.repo)
        .with_context(|| format!("Cannot open repository at {}", args.repo.display()))?;
    let workdir = probe.workdir().to_path_buf();

    // Load configuration
    let mut config = EngineConfig::load(&workdir).unwrap_or_else(|e| {
        eprintln!("Warning: Failed to load config: {}", e);
        EngineConfig::default()
    });
    if args.serial {
        config = config.with_force_serial(true);
    }
    if let Some(git) = &args.git {
        config = config.with_git_path(git.clone());
    }
    let remembered_before = config.dont_ask_again.clone();

    let (observer, notifications) = ChannelObserver::new();
    let runner = TaskRunner::builder(Arc::new(observer))
        .config(config)
        .repo(Arc::new(probe))
        .spawn()?;

    let options = cli::RunOptions {
        assume_yes: args.yes,
        json: args.json,
    };
    runner.put(TaskInvocation::new("cli", args.command.into_request()));
    let outcome = cli::run_once(&runner, notifications, &options).await;

    remember_choices(&runner.config(), &remembered_before);
    runner.shutdown().await;

    match outcome? {
        Some(outcome) if outcome.is_success() => Ok(()),
        _ => std::process::exit(1),
    }
}

/// Persist "don't ask again" choices made during this run to the user settings
fn remember_choices(config: &EngineConfig, before: &[String]) {
    let new_keys: Vec<&String> = config
        .dont_ask_again
        .iter()
        .filter(|key| !before.contains(key))
        .collect();
    if new_keys.is_empty() {
        return;
    }

    let mut global = EngineConfig::load_global().unwrap_or_default();
    for key in new_keys {
        global.remember_dont_ask_again(key.as_str());
    }
    if let Err(e) = global.save_global() {
        eprintln!("Warning: Failed to save config: {}", e);
    }
}
