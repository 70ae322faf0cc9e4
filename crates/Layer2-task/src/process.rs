//! External processes
//!
//! - [`ProcessSpec`]: what to run
//! - [`ProcessWrapper`]: flow-side handle; starting and waiting are
//!   suspension points
//! - [`ProcessHandle`]: the live process, handed to the observer so the UI
//!   can offer a "force stop" button
//!
//! Each process is watched by a tokio task that captures its output and
//! reports back to the runner through its event channel.

use crate::chain::{ChainId, Services};
use crate::context::FlowContext;
use crate::error::{AbortTask, Severity, TaskError, TaskResult};
use crate::runner::RunnerEvent;
use crate::token::ControlToken;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

// ============================================================================
// ProcessSpec
// ============================================================================

/// Program, arguments and environment of a process to launch
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Forward stderr lines as progress notifications
    pub report_progress: bool,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_progress(mut self) -> Self {
        self.report_progress = true;
        self
    }

    /// For logs only; not shell-escaped
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

// ============================================================================
// ProcessHandle / ProcessOutput
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessSignal {
    /// Ask politely (SIGTERM on unix)
    Terminate,
    /// Kill outright
    Kill,
}

/// A running process
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    id: u64,
    pid: Option<u32>,
    program: String,
    signals: UnboundedSender<ProcessSignal>,
}

impl ProcessHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Request graceful termination. Returns false if the process is gone.
    pub fn terminate(&self) -> bool {
        self.signals.send(ProcessSignal::Terminate).is_ok()
    }

    /// Kill the process outright. Returns false if the process is gone.
    pub fn kill(&self) -> bool {
        self.signals.send(ProcessSignal::Kill).is_ok()
    }
}

/// What a process left behind
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessOutput {
    /// `None` if the process was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Reported by a process watcher to the runner
#[derive(Debug)]
pub(crate) enum ProcessEvent {
    Started(ProcessHandle),
    StartFailed(String),
    Progress(String),
    Exited(ProcessOutput),
}

// ============================================================================
// ProcessWrapper
// ============================================================================

/// Flow-side view of one external process
#[derive(Debug)]
pub struct ProcessWrapper {
    spec: ProcessSpec,
    id: Option<u64>,
    handle: Option<ProcessHandle>,
}

impl ProcessWrapper {
    pub fn new(spec: ProcessSpec) -> Self {
        Self {
            spec,
            id: None,
            handle: None,
        }
    }

    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    pub fn handle(&self) -> Option<&ProcessHandle> {
        self.handle.as_ref()
    }

    /// Launch the process and suspend until it is running.
    ///
    /// Must be called on the interactive context. The chain owns at most one
    /// process at a time, and only its innermost task may start one.
    pub async fn start(&mut self, ctx: &FlowContext) -> TaskResult<()> {
        ctx.require_interactive("start a process")?;
        if self.id.is_some() {
            return Err(TaskError::internal("process wrapper started twice"));
        }

        let chain = ctx.chain();
        let (signals, signal_rx) = mpsc::unbounded_channel();
        let id = chain.claim_process(ctx.depth(), signals.clone())?;
        self.id = Some(id);

        info!("Starting process #{}: {}", id, self.spec.command_line());
        launch(
            self.spec.clone(),
            chain.id,
            id,
            signals,
            signal_rx,
            Arc::clone(&chain.services),
        );

        ctx.suspend(ControlToken::WaitForProcess).await;

        match chain.take_process_start()? {
            Ok(handle) => {
                chain
                    .services
                    .observer
                    .on_process_started(&handle, &ctx.name());
                self.handle = Some(handle);
                Ok(())
            }
            Err(message) => Err(AbortTask::new(format!(
                "Couldn't start {}: {}",
                self.spec.program, message
            ))
            .with_severity(Severity::Critical)
            .into()),
        }
    }

    /// Suspend until the process exits.
    ///
    /// With `auto_fail`, an unsuccessful exit aborts the chain with the exit
    /// code and captured stderr.
    pub async fn wait(&mut self, ctx: &FlowContext, auto_fail: bool) -> TaskResult<ProcessOutput> {
        ctx.require_interactive("wait for a process")?;
        let id = match (self.id, &self.handle) {
            (Some(id), Some(_)) => id,
            _ => return Err(TaskError::internal("waiting on a process that never started")),
        };
        let chain = ctx.chain();

        let output = loop {
            if let Some(output) = chain.take_process_exit() {
                break output;
            }
            if !chain.owns_process(id) {
                return Err(TaskError::internal(format!("process #{} is no longer owned", id)));
            }
            ctx.suspend(ControlToken::WaitForProcess).await;
        };
        chain.release_process(id);

        debug!(
            "Process #{} exited with {:?} ({} bytes stdout, {} bytes stderr)",
            id,
            output.exit_code,
            output.stdout.len(),
            output.stderr.len()
        );

        if auto_fail && !output.success() {
            return Err(AbortTask::process_failed(
                &self.spec.program,
                output.exit_code,
                &crate::git::scrollback(&output.stderr),
            )
            .into());
        }
        Ok(output)
    }
}

// ============================================================================
// Launch and watch
// ============================================================================

fn launch(
    spec: ProcessSpec,
    chain: ChainId,
    id: u64,
    signals: UnboundedSender<ProcessSignal>,
    mut signal_rx: UnboundedReceiver<ProcessSignal>,
    services: Arc<Services>,
) {
    let events = services.events.clone();
    let report = move |event: ProcessEvent| {
        let _ = events.send(RunnerEvent::Process {
            chain,
            process: id,
            event,
        });
    };

    services.runtime.spawn(async move {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to spawn {}: {}", spec.program, e);
                report(ProcessEvent::StartFailed(e.to_string()));
                return;
            }
        };

        let handle = ProcessHandle {
            id,
            pid: child.id(),
            program: spec.program.clone(),
            signals,
        };
        report(ProcessEvent::Started(handle));

        let stdout = child.stdout.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut stdout) = stdout {
                let _ = stdout.read_to_end(&mut buf).await;
            }
            String::from_utf8_lossy(&buf).into_owned()
        });

        let stderr = child.stderr.take();
        let progress = spec.report_progress.then(|| report.clone());
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            let mut line_start = 0;
            if let Some(mut stderr) = stderr {
                loop {
                    let n = match stderr.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => n,
                    };
                    buf.extend_from_slice(&chunk[..n]);

                    let Some(progress) = &progress else { continue };
                    while let Some(pos) = buf[line_start..]
                        .iter()
                        .position(|&b| b == b'\r' || b == b'\n')
                    {
                        let line = String::from_utf8_lossy(&buf[line_start..line_start + pos])
                            .trim()
                            .to_string();
                        line_start += pos + 1;
                        if !line.is_empty() {
                            progress(ProcessEvent::Progress(line));
                        }
                    }
                }
            }
            String::from_utf8_lossy(&buf).into_owned()
        });

        let status = loop {
            tokio::select! {
                status = child.wait() => break status,
                Some(signal) = signal_rx.recv() => match signal {
                    ProcessSignal::Terminate => send_sigterm(&mut child),
                    ProcessSignal::Kill => {
                        debug!("Killing process #{}", id);
                        let _ = child.start_kill();
                    }
                },
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        let exit_code = match status {
            Ok(status) => status.code(),
            Err(e) => {
                warn!("Failed to wait for process #{}: {}", id, e);
                None
            }
        };

        report(ProcessEvent::Exited(ProcessOutput {
            exit_code,
            stdout,
            stderr,
        }));
    });
}

/// Send graceful termination signal (SIGTERM on Unix)
#[cfg(unix)]
fn send_sigterm(child: &mut Child) {
    if let Some(pid) = child.id() {
        debug!("Sending SIGTERM to {}", pid);
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn send_sigterm(child: &mut Child) {
    // No graceful signal available; fall back to killing
    let _ = child.start_kill();
}
