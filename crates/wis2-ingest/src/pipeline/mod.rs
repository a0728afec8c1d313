//! Ingestion pipeline
//!
//! A single producer drains a [`NotificationSource`], validates each
//! notification, skips files the repository already holds, and hands tasks
//! to the [`WorkerPool`] over a channel of capacity one. A single aggregator
//! drains the results, logs them and runs the optional post-processing
//! command.
//!
//! Shutdown runs in one direction only: the source ends, the producer drops
//! the task sender, workers drain and exit, the pool supervisor drops the
//! last results sender, and the aggregator finishes. [`Pipeline::run`]
//! returns after all of them.

pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::executor::{Executor, ScriptExecutor};
use crate::fetch::FetcherFactory;
use crate::receiver::NotificationSource;
use crate::repo::Repository;

pub use worker::{PoolReport, Task, TaskResult, WorkerContext, WorkerPool};

/// Default number of workers
pub const DEFAULT_WORKERS: usize = 4;

/// Default deadline for a single fetch
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(300);

/// Default deadline for the post-processing command
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Tasks waiting for a worker; kept at the minimum so a busy pool holds back
/// the broker
const TASK_CHANNEL_CAPACITY: usize = 1;

const RESULT_CHANNEL_CAPACITY: usize = 1;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub workers: usize,
    pub fetch_timeout: Duration,
    /// Program run after each stored file with `<topic> <path>`
    pub command: Option<String>,
    pub command_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            command: None,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

/// Counters for one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub received: u64,
    pub invalid: u64,
    /// Already present in the repository
    pub skipped: u64,
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Set when the notification stream ended with an error
    pub stream_error: Option<String>,
}

#[derive(Debug, Default)]
struct ProducerStats {
    received: u64,
    invalid: u64,
    skipped: u64,
    submitted: u64,
    stream_error: Option<String>,
}

#[derive(Debug, Default)]
struct AggregateStats {
    succeeded: u64,
    failed: u64,
}

pub struct Pipeline {
    repo: Arc<dyn Repository>,
    fetchers: Arc<dyn FetcherFactory>,
    executor: Arc<dyn Executor>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        repo: Arc<dyn Repository>,
        fetchers: Arc<dyn FetcherFactory>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            repo,
            fetchers,
            executor: Arc::new(ScriptExecutor),
            config,
        }
    }

    /// Replace the executor used for the post-processing command
    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    /// Drive `source` to completion.
    ///
    /// Returns once the source has ended and every submitted task has been
    /// processed and aggregated.
    pub async fn run<S: NotificationSource>(&self, source: S) -> RunSummary {
        let (task_tx, task_rx) = mpsc::channel::<Task>(TASK_CHANNEL_CAPACITY);
        let (result_tx, result_rx) = mpsc::channel::<TaskResult>(RESULT_CHANNEL_CAPACITY);

        let pool = WorkerPool::spawn(
            self.config.workers,
            task_rx,
            result_tx,
            WorkerContext {
                fetchers: self.fetchers.clone(),
                fetch_timeout: self.config.fetch_timeout,
            },
        );
        info!(workers = self.config.workers, "Pipeline started");

        let (produced, aggregated, report) =
            tokio::join!(self.produce(source, task_tx), self.aggregate(result_rx), pool.join());

        let summary = RunSummary {
            received: produced.received,
            invalid: produced.invalid,
            skipped: produced.skipped,
            submitted: produced.submitted,
            succeeded: aggregated.succeeded,
            failed: aggregated.failed,
            stream_error: produced.stream_error,
        };
        info!(
            received = summary.received,
            invalid = summary.invalid,
            skipped = summary.skipped,
            submitted = summary.submitted,
            succeeded = summary.succeeded,
            failed = summary.failed,
            panicked_workers = report.panicked,
            "Pipeline finished"
        );
        summary
    }

    async fn produce<S: NotificationSource>(&self, mut source: S, tasks: mpsc::Sender<Task>) -> ProducerStats {
        let mut stats = ProducerStats::default();

        while let Some(notification) = source.next().await {
            stats.received += 1;

            let target = match notification.validate() {
                Ok(target) => target,
                Err(e) => {
                    stats.invalid += 1;
                    warn!(topic = %notification.topic, error = %e, "Dropping invalid notification");
                    continue;
                },
            };

            match self.repo.exists(&notification.topic, &target.name).await {
                Ok(true) => {
                    stats.skipped += 1;
                    info!(topic = %notification.topic, name = %target.name, "Already stored, skipping");
                    continue;
                },
                Ok(false) => {},
                Err(e) => {
                    stats.invalid += 1;
                    error!(topic = %notification.topic, name = %target.name, error = %e, "Existence check failed, dropping");
                    continue;
                },
            }

            let task = Task {
                notification: Arc::new(notification),
                target,
                repo: self.repo.clone(),
            };
            if tasks.send(task).await.is_err() {
                error!("Task channel closed, no workers left");
                break;
            }
            stats.submitted += 1;
        }

        stats.stream_error = source.error().map(|e| e.to_string());
        debug!("Producer finished, closing task channel");
        drop(tasks);
        stats
    }

    async fn aggregate(&self, mut results: mpsc::Receiver<TaskResult>) -> AggregateStats {
        let mut stats = AggregateStats::default();

        while let Some(result) = results.recv().await {
            let elapsed_ms = result.duration().num_milliseconds();
            match &result.outcome {
                Ok(path) => {
                    stats.succeeded += 1;
                    info!(
                        topic = %result.topic,
                        url = %result.url,
                        path = %path.display(),
                        elapsed_ms,
                        "Ingested file"
                    );
                    if let Some(command) = &self.config.command {
                        let args = [result.topic.clone(), path.display().to_string()];
                        if let Err(e) = self
                            .executor
                            .execute(command, &args, self.config.command_timeout)
                            .await
                        {
                            error!(command = %command, topic = %result.topic, error = %e, "Post-processing command failed");
                        }
                    }
                },
                Err(e) => {
                    stats.failed += 1;
                    error!(
                        topic = %result.topic,
                        url = %result.url,
                        kind = e.kind(),
                        error = %e,
                        elapsed_ms,
                        "Ingest failed"
                    );
                },
            }
        }

        debug!("Results channel closed, aggregator finished");
        stats
    }
}
