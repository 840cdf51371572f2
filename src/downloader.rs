use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use futures::future::join_all;
use tokio::{fs::OpenOptions, io::AsyncWriteExt, sync::Semaphore};
use tokio_retry::{strategy::FixedInterval, Retry};

use crate::util::FetchError;

/// Issues one request for one resource. Implementations must not retry.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Notified once per segment that reached disk.
pub trait ProgressObserver: Send + Sync {
    fn segment_completed(&self, path: &Path, bytes: usize);
}

#[derive(thiserror::Error, Debug)]
#[error("{0}")]
pub struct TransformError(pub String);

/// Payload transform applied between fetch and persist, e.g. decryption.
pub type Transform = Arc<dyn Fn(Vec<u8>) -> Result<Vec<u8>, TransformError> + Send + Sync>;

pub fn identity() -> Transform {
    Arc::new(|body: Vec<u8>| Ok::<_, TransformError>(body))
}

#[derive(thiserror::Error, Debug)]
pub enum TaskError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("transform failed: {0}")]
    Transform(#[from] TransformError),
    #[error("could not persist {path}: {source}")]
    Persist {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("permit pool closed")]
    PoolClosed,
}

#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub url: String,
    pub path: PathBuf,
}

#[derive(Debug)]
pub enum TaskOutcome {
    Success { bytes: usize },
    Failed(TaskError),
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Success { .. })
    }
}

#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Size of the permit pool, the upper bound on in-flight tasks.
    pub concurrency: usize,
    /// Total attempts per task, the first one included.
    pub max_attempts: usize,
    pub retry_backoff: Duration,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            concurrency: 1000,
            max_attempts: 5,
            retry_backoff: Duration::from_secs(1),
        }
    }
}

/// Runs batches of download tasks against a fixed permit pool.
///
/// Every task holds one permit from before its first fetch until its
/// terminal outcome, retries included. The pool lives as long as the
/// downloader, so consecutive batches share the same bound.
pub struct Downloader {
    fetcher: Arc<dyn Fetcher>,
    permits: Arc<Semaphore>,
    config: DownloaderConfig,
    transform: Transform,
    observer: Option<Arc<dyn ProgressObserver>>,
}

impl Downloader {
    pub fn new(fetcher: Arc<dyn Fetcher>, config: DownloaderConfig) -> Self {
        Self {
            fetcher,
            permits: Arc::new(Semaphore::new(config.concurrency.max(1))),
            config,
            transform: identity(),
            observer: None,
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Drives every task to a terminal outcome. Outcomes are returned in
    /// task order, whatever order the downloads finished in.
    pub async fn run(&self, tasks: &[DownloadTask]) -> Vec<TaskOutcome> {
        join_all(tasks.iter().map(|task| self.run_task(task))).await
    }

    async fn run_task(&self, task: &DownloadTask) -> TaskOutcome {
        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => return TaskOutcome::Failed(TaskError::PoolClosed),
        };

        let strategy = FixedInterval::new(self.config.retry_backoff)
            .take(self.config.max_attempts.saturating_sub(1));

        let this = self;
        let mut attempt = 0;
        let result = Retry::spawn(strategy, move || {
            attempt += 1;
            this.attempt(task, attempt)
        })
        .await;

        match result {
            Ok(bytes) => {
                debug!("Saved {} ({} bytes)", task.path.display(), bytes);
                if let Some(observer) = &self.observer {
                    observer.segment_completed(&task.path, bytes);
                }
                TaskOutcome::Success { bytes }
            }
            Err(e) => {
                warn!(
                    "Giving up on {} after {} attempts: {}",
                    task.url, self.config.max_attempts, e
                );
                TaskOutcome::Failed(e)
            }
        }
    }

    async fn attempt(&self, task: &DownloadTask, attempt: usize) -> Result<usize, TaskError> {
        let result = async {
            let body = self.fetcher.fetch(&task.url).await?;
            let body = (self.transform)(body)?;
            persist(&task.path, &body).await?;
            Ok::<_, TaskError>(body.len())
        }
        .await;

        if let Err(e) = &result {
            debug!(
                "Attempt {}/{} for {} failed: {}",
                attempt, self.config.max_attempts, task.url, e
            );
        }

        result
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Writes `contents` so that `path` is either absent or complete: the bytes go
/// to a sibling `.part` file which is synced and then renamed into place.
pub async fn persist(path: &Path, contents: &[u8]) -> Result<(), TaskError> {
    let temp_path = partial_path(path);

    let written = async {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .await?;
        file.write_all(contents).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&temp_path, path).await
    }
    .await;

    if let Err(source) = written {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(TaskError::Persist {
            path: path.to_path_buf(),
            source,
        });
    }

    Ok(())
}
