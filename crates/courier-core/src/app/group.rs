use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::domain::RunnerError;
use crate::ports::Connection;
use crate::typed::Task;

use super::runner::{RunnerSettings, TaskRunner};

/// Runner group handle.
/// - task ごとに 1 本の runner を spawn する
/// - `request_shutdown()` で全 runner に停止を伝える（処理中の handler は止めない）
/// - 1 本が致命的に落ちても他の runner は動き続ける
pub struct RunnerGroup {
    shutdown_tx: watch::Sender<bool>,
    runners: JoinSet<Result<(), RunnerError>>,
    patterns: Vec<String>,
}

impl RunnerGroup {
    pub fn spawn(tasks: Vec<Arc<Task>>, connection: Connection, settings: RunnerSettings) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut runners = JoinSet::new();
        let mut patterns = Vec::with_capacity(tasks.len());
        for task in tasks {
            patterns.push(task.pattern().to_string());
            let runner = TaskRunner::new(task, connection.clone(), settings);
            runners.spawn(runner.run(shutdown_rx.clone()));
        }

        Self {
            shutdown_tx,
            runners,
            patterns,
        }
    }

    /// Number of runners still alive.
    pub fn len(&self) -> usize {
        self.runners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }

    /// Patterns in spawn order.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for the next runner to fail. `None` once every runner has
    /// stopped cleanly.
    pub async fn next_failure(&mut self) -> Option<RunnerError> {
        while let Some(joined) = self.runners.join_next().await {
            let err = match joined {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err,
                Err(join) => RunnerError::Join(join),
            };
            error!(error = %err, "runner failed");
            return Some(err);
        }
        None
    }

    /// Serve until `signal` resolves, then shut down.
    ///
    /// Runner failures seen meanwhile are logged and the survivors keep going.
    pub async fn run_until<F>(mut self, signal: F) -> Result<(), RunnerError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(signal);
        loop {
            tokio::select! {
                _ = &mut signal => break,
                _ = self.next_failure(), if !self.is_empty() => {}
            }
        }
        info!(runners = self.len(), "shutting down");
        self.shutdown_and_join().await
    }

    /// Shutdown and wait for every runner. Returns the first failure seen.
    pub async fn shutdown_and_join(mut self) -> Result<(), RunnerError> {
        self.request_shutdown();
        let mut first = None;
        while let Some(err) = self.next_failure().await {
            first.get_or_insert(err);
        }
        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
