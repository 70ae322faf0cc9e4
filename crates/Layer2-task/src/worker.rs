//! Worker thread
//!
//! One dedicated OS thread runs the flow steps that asked for
//! [`ContinueWorker`](crate::ControlToken::ContinueWorker). It takes a flow,
//! runs exactly one step, and hands the flow back to the runner together with
//! the token the step produced. Only one job is ever in flight.

use crate::chain::Chain;
use crate::flow::{step, BoxFlow};
use crate::runner::RunnerEvent;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, Span};

pub(crate) struct WorkerJob {
    pub chain: Arc<Chain>,
    pub flow: BoxFlow,
    pub span: Span,
}

pub(crate) struct Worker {
    jobs: Option<UnboundedSender<WorkerJob>>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn spawn(name: &str, events: UnboundedSender<RunnerEvent>) -> std::io::Result<Self> {
        let (jobs, mut rx) = mpsc::unbounded_channel::<WorkerJob>();

        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Some(job) = rx.blocking_recv() {
                    let WorkerJob {
                        chain,
                        mut flow,
                        span,
                    } = job;
                    let token = span.in_scope(|| step(&mut flow, &chain));
                    let done = RunnerEvent::WorkerDone {
                        chain: chain.id,
                        flow,
                        token,
                    };
                    if events.send(done).is_err() {
                        break;
                    }
                }
                debug!("Worker thread exiting");
            })?;

        Ok(Self {
            jobs: Some(jobs),
            thread: Some(thread),
        })
    }

    /// Queue one step. Hands the job back if the thread is gone.
    pub fn submit(&self, job: WorkerJob) -> Result<(), WorkerJob> {
        match &self.jobs {
            Some(jobs) => jobs.send(job).map_err(|e| e.0),
            None => Err(job),
        }
    }

    /// Stop accepting jobs and wait for the thread to finish its current one
    pub fn shutdown(&mut self) {
        self.jobs = None;
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Worker thread panicked");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
