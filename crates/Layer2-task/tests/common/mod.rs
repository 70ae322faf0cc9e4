//! Shared helpers for runner integration tests

#![allow(dead_code)]

use branchwork_foundation::EngineConfig;
use branchwork_task::{
    ChannelObserver, FailureReport, Notification, PromptId, RepoProbe, TaskCompletion, TaskRunner,
    UserPrompt,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

const TIMEOUT: Duration = Duration::from_secs(10);

/// A runner plus everything it has told its observer so far
pub struct Harness {
    pub runner: TaskRunner,
    rx: UnboundedReceiver<Notification>,
    pub seen: Vec<Notification>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(EngineConfig::default(), None)
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::build(config, None)
    }

    pub fn with_repo(repo: Arc<dyn RepoProbe>) -> Self {
        Self::build(EngineConfig::default(), Some(repo))
    }

    fn build(config: EngineConfig, repo: Option<Arc<dyn RepoProbe>>) -> Self {
        let (observer, rx) = ChannelObserver::new();
        let mut builder = TaskRunner::builder(Arc::new(observer)).config(config);
        if let Some(repo) = repo {
            builder = builder.repo(repo);
        }
        let runner = builder.spawn().expect("runner should spawn");
        Self {
            runner,
            rx,
            seen: Vec::new(),
        }
    }

    /// Wait for the first notification matching `pred`
    pub async fn wait_for(&mut self, pred: impl Fn(&Notification) -> bool) -> Notification {
        loop {
            let next = tokio::time::timeout(TIMEOUT, self.rx.recv())
                .await
                .expect("timed out waiting for a notification")
                .expect("observer channel closed");
            self.seen.push(next.clone());
            if pred(&next) {
                return next;
            }
        }
    }

    pub async fn completion(&mut self) -> TaskCompletion {
        match self
            .wait_for(|n| matches!(n, Notification::Completion(_)))
            .await
        {
            Notification::Completion(completion) => completion,
            _ => unreachable!(),
        }
    }

    pub async fn prompt(&mut self) -> (PromptId, UserPrompt) {
        match self
            .wait_for(|n| matches!(n, Notification::UserPrompt { .. }))
            .await
        {
            Notification::UserPrompt { id, prompt, .. } => (id, prompt),
            _ => unreachable!(),
        }
    }

    pub async fn process_started(&mut self) {
        self.wait_for(|n| matches!(n, Notification::ProcessStarted { .. }))
            .await;
    }

    pub async fn ready(&mut self) {
        self.wait_for(|n| matches!(n, Notification::Ready)).await;
    }

    /// Whatever arrived without waiting
    pub fn drain(&mut self) {
        while let Ok(next) = self.rx.try_recv() {
            self.seen.push(next);
        }
    }

    pub fn failures(&self) -> Vec<FailureReport> {
        self.seen
            .iter()
            .filter_map(|n| match n {
                Notification::Failure(report) => Some(report.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn completions(&self) -> Vec<TaskCompletion> {
        self.seen
            .iter()
            .filter_map(|n| match n {
                Notification::Completion(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }
}
