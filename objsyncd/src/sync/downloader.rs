use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, warn};

use super::paths::base_name;
use super::remote::{FetchError, RemoteFetcher};
use super::retry::RetryPolicy;

/// Hard ceiling on download workers per batch.
pub const MAX_WORKERS: usize = 8;
const KEYS_PER_WORKER: usize = 1000;

/// One worker per started thousand keys beyond the first 999, capped at
/// [`MAX_WORKERS`]. A fixed linear policy, not load-aware.
pub fn worker_count(len: usize) -> usize {
    (len / KEYS_PER_WORKER).min(MAX_WORKERS - 1) + 1
}

/// Splits `keys` into [`worker_count`] contiguous slices of `len / workers`
/// keys; the last slice takes the remainder. Listing order is kept inside
/// each slice.
pub fn partition(mut keys: Vec<String>) -> Vec<Vec<String>> {
    if keys.is_empty() {
        return Vec::new();
    }
    let workers = worker_count(keys.len());
    let chunk = keys.len() / workers;
    let mut slices = Vec::with_capacity(workers);
    for _ in 1..workers {
        let rest = keys.split_off(chunk);
        slices.push(keys);
        keys = rest;
    }
    slices.push(keys);
    slices
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedFetch {
    pub key: String,
    pub error: String,
}

#[derive(Debug, Default, Clone)]
pub struct BatchReport {
    pub workers: usize,
    pub fetched: Vec<String>,
    pub failed: Vec<FailedFetch>,
    pub bytes: u64,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    fn merge(&mut self, other: BatchReport) {
        self.fetched.extend(other.fetched);
        self.failed.extend(other.failed);
        self.bytes += other.bytes;
    }
}

pub struct BatchDownloader {
    fetcher: Arc<dyn RemoteFetcher>,
    local_dir: PathBuf,
    retry: RetryPolicy,
}

impl BatchDownloader {
    pub fn new(fetcher: Arc<dyn RemoteFetcher>, local_dir: PathBuf, retry: RetryPolicy) -> Self {
        Self {
            fetcher,
            local_dir,
            retry,
        }
    }

    /// Fetches every key into the local directory and returns once all
    /// workers have finished. A failing object never stops the batch.
    pub async fn fetch(&self, keys: Vec<String>) -> BatchReport {
        let slices = partition(keys);
        let mut report = BatchReport {
            workers: slices.len(),
            ..BatchReport::default()
        };

        let mut workers = Vec::with_capacity(slices.len());
        for (worker, slice) in slices.into_iter().enumerate() {
            let fetcher = Arc::clone(&self.fetcher);
            let local_dir = self.local_dir.clone();
            let retry = self.retry;
            let keys = slice.clone();
            let handle = tokio::spawn(async move {
                fetch_slice(worker, fetcher.as_ref(), &local_dir, retry, slice).await
            });
            workers.push((keys, handle));
        }

        for (keys, handle) in workers {
            match handle.await {
                Ok(slice_report) => report.merge(slice_report),
                Err(err) => {
                    error!(error = %err, keys = keys.len(), "download worker aborted");
                    report
                        .failed
                        .extend(keys.into_iter().map(|key| FailedFetch {
                            key,
                            error: format!("worker aborted: {err}"),
                        }));
                }
            }
        }
        report
    }
}

async fn fetch_slice(
    worker: usize,
    fetcher: &dyn RemoteFetcher,
    local_dir: &Path,
    retry: RetryPolicy,
    keys: Vec<String>,
) -> BatchReport {
    let mut report = BatchReport::default();
    for key in keys {
        let Some(name) = base_name(&key) else {
            report.failed.push(FailedFetch {
                error: "key has no base name".into(),
                key,
            });
            continue;
        };
        let target = local_dir.join(name);
        match fetch_with_retry(fetcher, &key, &target, retry).await {
            Ok(bytes) => {
                debug!(worker, key = %key, bytes, "fetched object");
                report.bytes += bytes;
                report.fetched.push(key);
            }
            Err(err) => {
                warn!(worker, key = %key, error = %err, "failed to fetch object");
                report.failed.push(FailedFetch {
                    error: err.to_string(),
                    key,
                });
            }
        }
    }
    report
}

async fn fetch_with_retry(
    fetcher: &dyn RemoteFetcher,
    key: &str,
    target: &Path,
    retry: RetryPolicy,
) -> Result<u64, FetchError> {
    let mut attempt = 0u32;
    loop {
        match fetcher.fetch(key, target).await {
            Err(err) if err.is_retryable() && retry.allows_retry(attempt) => {
                let delay = retry.delay(attempt);
                debug!(key, attempt, ?delay, error = %err, "retrying fetch");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}
