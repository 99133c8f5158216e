use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use objsync_core::StoreError;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::downloader::{BatchDownloader, BatchReport};
use super::index::LocalIndex;
use super::paths::{PathError, normalize_prefix, resolve_local_dir};
use super::queue::CallbackToken;
use super::remote::{RemoteFetcher, RemoteListing};
use super::retry::RetryPolicy;
use super::scheduler::{CallbackOutcome, CallbackScheduler, CallbackTicket, SyncCallback};
use super::transfer::clear_staging;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("path error: {0}")]
    Path(#[from] PathError),
    #[error("local directory {path:?} is unusable: {source}")]
    LocalDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("listing failed: {0}")]
    Listing(#[from] StoreError),
}

/// Start parameters for one (remote prefix, local directory) pair.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub prefix: String,
    pub local_dir: PathBuf,
    pub poll_interval: Duration,
    pub callback_threshold: Option<u64>,
    /// Keeps the first successful listing (the backfill of whatever already
    /// sits under the prefix) from counting toward the threshold.
    pub suppress_initial_callback: bool,
    pub fetch_retry: RetryPolicy,
    /// Caps how many cycle units download at once; `None` leaves them
    /// unbounded.
    pub max_inflight_cycles: Option<usize>,
}

impl SessionConfig {
    pub fn new(prefix: impl Into<String>, local_dir: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
            local_dir: local_dir.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            callback_threshold: None,
            suppress_initial_callback: true,
            fetch_retry: RetryPolicy::default(),
            max_inflight_cycles: None,
        }
    }
}

/// What one cycle unit did: the download batch and, if it carried an armed
/// callback, how that callback ended.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub batch: BatchReport,
    pub callback: Option<CallbackOutcome>,
}

pub struct TickOutcome {
    pub new_keys: Vec<String>,
    pub armed: Option<CallbackToken>,
    pub unit: Option<JoinHandle<CycleReport>>,
}

pub struct SyncEngine {
    prefix: String,
    local_dir: PathBuf,
    poll_interval: Duration,
    suppress_initial_callback: bool,
    awaiting_first_listing: AtomicBool,
    listing: Arc<dyn RemoteListing>,
    downloader: BatchDownloader,
    index: LocalIndex,
    scheduler: CallbackScheduler,
    inflight: Option<Arc<Semaphore>>,
}

impl SyncEngine {
    /// Validates the configuration, prepares the local directory (dropping
    /// downloads an earlier run left half-done) and seeds the index from it.
    /// Every failure here is fatal.
    pub async fn start(
        config: SessionConfig,
        listing: Arc<dyn RemoteListing>,
        fetcher: Arc<dyn RemoteFetcher>,
        callback: Option<Arc<dyn SyncCallback>>,
    ) -> Result<Arc<Self>, EngineError> {
        let prefix = normalize_prefix(&config.prefix)?;
        if config.poll_interval.is_zero() {
            return Err(EngineError::Config("poll interval must be positive".into()));
        }
        if config.callback_threshold == Some(0) {
            return Err(EngineError::Config(
                "callback threshold must be at least 1".into(),
            ));
        }
        if config.max_inflight_cycles == Some(0) {
            return Err(EngineError::Config(
                "max in-flight cycles must be at least 1".into(),
            ));
        }
        if callback.is_some() != config.callback_threshold.is_some() {
            warn!(
                has_callback = callback.is_some(),
                threshold = ?config.callback_threshold,
                "callback and threshold must both be set for callbacks to fire"
            );
        }

        let local_dir = resolve_local_dir(&config.local_dir)?;
        tokio::fs::create_dir_all(&local_dir)
            .await
            .map_err(|source| EngineError::LocalDir {
                path: local_dir.clone(),
                source,
            })?;
        clear_staging(&local_dir)
            .await
            .map_err(|source| EngineError::LocalDir {
                path: local_dir.clone(),
                source,
            })?;
        let index = LocalIndex::scan(&local_dir)
            .await
            .map_err(|source| EngineError::LocalDir {
                path: local_dir.clone(),
                source,
            })?;
        info!(
            prefix = %prefix,
            local_dir = %local_dir.display(),
            indexed = index.len(),
            "sync session started"
        );

        Ok(Arc::new(Self {
            downloader: BatchDownloader::new(fetcher, local_dir.clone(), config.fetch_retry),
            prefix,
            local_dir,
            poll_interval: config.poll_interval,
            suppress_initial_callback: config.suppress_initial_callback,
            awaiting_first_listing: AtomicBool::new(true),
            listing,
            index,
            scheduler: CallbackScheduler::new(callback, config.callback_threshold),
            inflight: config
                .max_inflight_cycles
                .map(|limit| Arc::new(Semaphore::new(limit))),
        }))
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn local_dir(&self) -> &Path {
        &self.local_dir
    }

    pub fn index(&self) -> &LocalIndex {
        &self.index
    }

    pub fn scheduler(&self) -> &CallbackScheduler {
        &self.scheduler
    }

    /// Polls forever: tick, then sleep for the interval. Ticks fire on
    /// schedule even while earlier cycle units are still running.
    pub async fn run(self: Arc<Self>) {
        info!(
            prefix = %self.prefix,
            interval_secs = self.poll_interval.as_secs(),
            "sync loop running"
        );
        loop {
            // The unit is detached; dropping its handle does not cancel it.
            let _ = self.tick().await;
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// One poll: list, claim unseen names, arm the callback counter and spawn
    /// the cycle unit that downloads the new keys.
    pub async fn tick(self: &Arc<Self>) -> TickOutcome {
        let keys = match self.listing.list(&self.prefix).await {
            Ok(keys) => keys,
            Err(err) => {
                warn!(prefix = %self.prefix, error = %err, "listing failed, retrying next tick");
                return TickOutcome {
                    new_keys: Vec::new(),
                    armed: None,
                    unit: None,
                };
            }
        };
        let first_listing = self.awaiting_first_listing.swap(false, Ordering::SeqCst);

        let new_keys = self.index.claim_new(keys);
        if new_keys.is_empty() {
            debug!(prefix = %self.prefix, "no new objects");
            return TickOutcome {
                new_keys,
                armed: None,
                unit: None,
            };
        }

        let suppress = first_listing && self.suppress_initial_callback;
        // Arming happens here, in tick order, so callbacks follow detection
        // order regardless of how long each unit's downloads take.
        let ticket = self.scheduler.on_batch_ingested(new_keys.len(), suppress);
        let armed = ticket.as_ref().map(|t| t.token().clone());
        info!(
            prefix = %self.prefix,
            new_keys = new_keys.len(),
            counted = !suppress,
            armed = armed.is_some(),
            "detected new objects"
        );

        let unit = tokio::spawn(run_cycle_unit(Arc::clone(self), new_keys.clone(), ticket));
        TickOutcome {
            new_keys,
            armed,
            unit: Some(unit),
        }
    }
}

async fn run_cycle_unit(
    engine: Arc<SyncEngine>,
    keys: Vec<String>,
    ticket: Option<CallbackTicket>,
) -> CycleReport {
    let permit = match &engine.inflight {
        Some(limit) => Arc::clone(limit).acquire_owned().await.ok(),
        None => None,
    };
    let batch = engine.downloader.fetch(keys).await;
    // Waiting for an earlier callback must not hold a download slot.
    drop(permit);

    if batch.is_complete() {
        info!(
            fetched = batch.fetched.len(),
            workers = batch.workers,
            bytes = batch.bytes,
            "batch downloaded"
        );
    } else {
        warn!(
            fetched = batch.fetched.len(),
            failed = batch.failed.len(),
            workers = batch.workers,
            "batch downloaded with failures; failed keys will not be retried"
        );
    }

    let callback = match ticket {
        Some(ticket) => Some(ticket.run_when_ready().await),
        None => None,
    };
    CycleReport { batch, callback }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
