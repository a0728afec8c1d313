//! Worker pool running fetch → verify → store
//!
//! Workers share one task receiver. A supervisor task waits for every worker
//! to exit before it drops the last results sender, so the results channel
//! closes once, after all results have been sent.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use url::Url;
use wis2_common::checksum::verify_file_checksum;
use wis2_common::types::{DownloadTarget, Notification};
use wis2_common::Wis2Error;

use crate::error::{FetchError, IngestError};
use crate::fetch::FetcherFactory;
use crate::repo::Repository;

/// One unit of work: a validated notification and where its file goes
#[derive(Clone)]
pub struct Task {
    pub notification: Arc<Notification>,
    pub target: DownloadTarget,
    pub repo: Arc<dyn Repository>,
}

impl Task {
    pub fn topic(&self) -> &str {
        &self.notification.topic
    }
}

/// Outcome of a [`Task`]
#[derive(Debug)]
pub struct TaskResult {
    pub topic: String,
    pub url: Url,
    /// Stored path on success
    pub outcome: Result<PathBuf, IngestError>,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
}

impl TaskResult {
    pub fn duration(&self) -> chrono::Duration {
        self.finished - self.started
    }
}

/// Shared state handed to every worker
#[derive(Clone)]
pub struct WorkerContext {
    pub fetchers: Arc<dyn FetcherFactory>,
    pub fetch_timeout: Duration,
}

/// What the supervisor saw once all workers had exited
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolReport {
    pub workers: usize,
    pub panicked: usize,
}

/// Fixed-size pool of workers
pub struct WorkerPool {
    supervisor: JoinHandle<PoolReport>,
}

impl WorkerPool {
    /// Spawn `size` workers draining `tasks` and reporting on `results`.
    ///
    /// `results` is moved into the supervisor; when the pool finishes it is
    /// the last sender, so receivers observe the channel closing only after
    /// every worker has exited.
    pub fn spawn(
        size: usize,
        tasks: mpsc::Receiver<Task>,
        results: mpsc::Sender<TaskResult>,
        context: WorkerContext,
    ) -> Self {
        let size = size.max(1);
        let tasks = Arc::new(Mutex::new(tasks));

        let handles: Vec<JoinHandle<()>> = (0..size)
            .map(|id| {
                let worker = Worker {
                    id,
                    tasks: tasks.clone(),
                    results: results.clone(),
                    context: context.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        let supervisor = tokio::spawn(async move {
            let outcomes = futures::future::join_all(handles).await;
            let panicked = outcomes.iter().filter(|o| o.is_err()).count();
            if panicked > 0 {
                error!(panicked, "Workers terminated abnormally");
            }
            debug!(workers = size, "All workers drained");
            drop(results);
            PoolReport {
                workers: size,
                panicked,
            }
        });

        Self { supervisor }
    }

    /// Wait for the supervisor to finish
    pub async fn join(self) -> PoolReport {
        match self.supervisor.await {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "Worker pool supervisor failed");
                PoolReport::default()
            },
        }
    }
}

struct Worker {
    id: usize,
    tasks: Arc<Mutex<mpsc::Receiver<Task>>>,
    results: mpsc::Sender<TaskResult>,
    context: WorkerContext,
}

impl Worker {
    async fn run(self) {
        loop {
            let task = {
                let mut tasks = self.tasks.lock().await;
                tasks.recv().await
            };
            let Some(task) = task else {
                break;
            };

            debug!(worker = self.id, topic = %task.topic(), url = %task.target.url, "Processing task");
            let started = Utc::now();
            let outcome = ingest(&task, &self.context).await;
            let result = TaskResult {
                topic: task.notification.topic.clone(),
                url: task.target.url.clone(),
                outcome,
                started,
                finished: Utc::now(),
            };

            if self.results.send(result).await.is_err() {
                warn!(worker = self.id, "Results channel closed, worker stopping");
                break;
            }
        }
        debug!(worker = self.id, "Worker exiting");
    }
}

/// Fetch, verify and store the file for one task
pub async fn ingest(task: &Task, context: &WorkerContext) -> Result<PathBuf, IngestError> {
    let url = &task.target.url;
    let fetcher = context.fetchers.fetcher_for(url)?;

    let temp = tempfile::Builder::new()
        .prefix(&format!("{}.", task.target.name))
        .tempfile()
        .map_err(IngestError::TempFile)?;
    let mut sink = tokio::fs::File::from_std(temp.reopen().map_err(IngestError::TempFile)?);

    let written = match tokio::time::timeout(context.fetch_timeout, fetcher.fetch(url, &mut sink)).await {
        Ok(result) => result?,
        Err(_) => return Err(FetchError::TimedOut(context.fetch_timeout).into()),
    };
    sink.sync_all().await.map_err(IngestError::TempFile)?;
    drop(sink);

    let declared = task.notification.payload.size;
    if declared > 0 && declared != written {
        debug!(url = %url, declared, written, "Size differs from notification");
    }

    let path = temp.path().to_path_buf();
    let method = task.target.method;
    let expected = task.notification.payload.integrity.value.clone();
    tokio::task::spawn_blocking(move || verify_file_checksum(&path, method, &expected))
        .await
        .map_err(|e| IngestError::Integrity(format!("verification task failed: {}", e)))?
        .map_err(|e| match e {
            Wis2Error::Io(io) => IngestError::TempFile(io),
            other => IngestError::Integrity(other.to_string()),
        })?;

    let stored = task
        .repo
        .store(task.topic(), &task.target.name, temp.path())
        .await?;
    Ok(stored)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::fetch::{Fetcher, Sink};
    use crate::repo::FsRepository;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use tokio::io::AsyncWriteExt;
    use wis2_common::checksum::compute_digest;
    use wis2_common::types::{Integrity, IntegrityMethod, WisPayload};

    /// Serves fixed bodies by URL path and records every fetch
    #[derive(Default)]
    struct MapFetcher {
        bodies: HashMap<String, Vec<u8>>,
        calls: StdMutex<Vec<String>>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl Fetcher for MapFetcher {
        async fn fetch(&self, url: &Url, sink: &mut Sink<'_>) -> crate::fetch::Result<u64> {
            self.calls.lock().unwrap().push(url.path().to_string());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let body = self
                .bodies
                .get(url.path())
                .ok_or_else(|| FetchError::Status {
                    url: url.to_string(),
                    status: 404,
                })?;
            sink.write_all(body).await?;
            Ok(body.len() as u64)
        }
    }

    struct Factory(Arc<MapFetcher>);

    impl FetcherFactory for Factory {
        fn fetcher_for(&self, url: &Url) -> crate::fetch::Result<Arc<dyn Fetcher>> {
            match url.scheme() {
                "http" => Ok(self.0.clone()),
                other => Err(FetchError::UnsupportedScheme(other.to_string())),
            }
        }
    }

    fn task(repo: Arc<dyn Repository>, base: &str, name: &str, digest: Vec<u8>) -> Task {
        let notification = Notification {
            topic: "origin/a/wis2/x".to_string(),
            received: Utc::now(),
            source: "tcp://broker:1883".to_string(),
            payload: WisPayload {
                base_url: base.to_string(),
                rel_path: format!("/{}", name),
                integrity: Integrity {
                    method: "sha256".to_string(),
                    value: digest,
                },
                ..Default::default()
            },
        };
        let target = notification.validate().unwrap();
        Task {
            notification: Arc::new(notification),
            target,
            repo,
        }
    }

    fn context(fetcher: Arc<MapFetcher>) -> WorkerContext {
        WorkerContext {
            fetchers: Arc::new(Factory(fetcher)),
            fetch_timeout: Duration::from_secs(5),
        }
    }

    fn sha256(data: &[u8]) -> Vec<u8> {
        compute_digest(data, IntegrityMethod::Sha256)
    }

    #[tokio::test]
    async fn test_ingest_stores_verified_file() {
        let dir = tempfile::tempdir().unwrap();
        let repo: Arc<dyn Repository> = Arc::new(FsRepository::new(dir.path()).unwrap());
        let fetcher = Arc::new(MapFetcher {
            bodies: HashMap::from([("/f.bin".to_string(), b"hello world".to_vec())]),
            ..Default::default()
        });

        let t = task(repo, "http://origin", "f.bin", sha256(b"hello world"));
        let stored = ingest(&t, &context(fetcher)).await.unwrap();

        assert_eq!(stored, dir.path().join("origin/a/wis2/x/f.bin"));
        assert_eq!(std::fs::read(&stored).unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_ingest_mismatch_stores_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let repo: Arc<dyn Repository> = Arc::new(FsRepository::new(dir.path()).unwrap());
        let fetcher = Arc::new(MapFetcher {
            bodies: HashMap::from([("/f.bin".to_string(), b"tampered".to_vec())]),
            ..Default::default()
        });

        let t = task(repo, "http://origin", "f.bin", sha256(b"hello world"));
        let err = ingest(&t, &context(fetcher)).await.unwrap_err();

        assert!(matches!(err, IngestError::Integrity(_)));
        assert!(!dir.path().join("origin/a/wis2/x/f.bin").exists());
    }

    #[tokio::test]
    async fn test_ingest_unknown_scheme() {
        let dir = tempfile::tempdir().unwrap();
        let repo: Arc<dyn Repository> = Arc::new(FsRepository::new(dir.path()).unwrap());
        let fetcher = Arc::new(MapFetcher::default());

        let t = task(repo, "sftp://origin", "f.bin", sha256(b"x"));
        let err = ingest(&t, &context(fetcher.clone())).await.unwrap_err();

        assert!(matches!(err, IngestError::Fetch(FetchError::UnsupportedScheme(_))));
        assert!(fetcher.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ingest_fetch_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let repo: Arc<dyn Repository> = Arc::new(FsRepository::new(dir.path()).unwrap());
        let fetcher = Arc::new(MapFetcher {
            bodies: HashMap::from([("/f.bin".to_string(), b"x".to_vec())]),
            delay: Some(Duration::from_secs(30)),
            ..Default::default()
        });
        let ctx = WorkerContext {
            fetch_timeout: Duration::from_millis(50),
            ..context(fetcher)
        };

        let t = task(repo, "http://origin", "f.bin", sha256(b"x"));
        let err = ingest(&t, &ctx).await.unwrap_err();
        assert!(matches!(err, IngestError::Fetch(FetchError::TimedOut(_))));
    }

    #[tokio::test]
    async fn test_pool_delivers_one_result_per_task() {
        const TASKS: usize = 10;
        const WORKERS: usize = 3;

        let dir = tempfile::tempdir().unwrap();
        let repo: Arc<dyn Repository> = Arc::new(FsRepository::new(dir.path()).unwrap());
        let mut bodies = HashMap::new();
        for i in 0..TASKS {
            bodies.insert(format!("/f{}.bin", i), format!("body {}", i).into_bytes());
        }
        let fetcher = Arc::new(MapFetcher {
            bodies,
            delay: Some(Duration::from_millis(10)),
            ..Default::default()
        });

        let (task_tx, task_rx) = mpsc::channel(1);
        let (result_tx, mut result_rx) = mpsc::channel(1);
        let pool = WorkerPool::spawn(WORKERS, task_rx, result_tx, context(fetcher.clone()));

        let producer = {
            let repo = repo.clone();
            tokio::spawn(async move {
                for i in 0..TASKS {
                    let body = format!("body {}", i);
                    let t = task(repo.clone(), "http://origin", &format!("f{}.bin", i), sha256(body.as_bytes()));
                    task_tx.send(t).await.unwrap();
                }
            })
        };

        let mut results = Vec::new();
        while let Some(result) = result_rx.recv().await {
            results.push(result);
        }
        producer.await.unwrap();
        let report = pool.join().await;

        assert_eq!(results.len(), TASKS);
        assert!(results.iter().all(|r| r.outcome.is_ok()));
        assert!(results.iter().all(|r| r.finished >= r.started));

        let mut calls = fetcher.calls.lock().unwrap().clone();
        calls.sort();
        calls.dedup();
        assert_eq!(calls.len(), TASKS);
        assert_eq!(fetcher.calls.lock().unwrap().len(), TASKS);

        assert_eq!(report, PoolReport { workers: WORKERS, panicked: 0 });
    }
}
