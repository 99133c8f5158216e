use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use objsync_core::ObjectStoreClient;
use tracing::{info, warn};

use crate::callback::CommandCallback;
use crate::sync::engine::{SessionConfig, SyncEngine};
use crate::sync::paths::DEFAULT_LOCAL_DIR_NAME;
use crate::sync::remote::{DEFAULT_PAGE_SIZE, HttpRemote, RemoteFetcher, RemoteListing};
use crate::sync::retry::RetryPolicy;
use crate::sync::scheduler::SyncCallback;

const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";
const DEFAULT_POLL_SECS: u64 = 300;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
const DEFAULT_FETCH_RETRIES: u32 = 2;

#[derive(Clone)]
pub struct DaemonConfig {
    pub bucket: String,
    pub endpoint: String,
    pub token: Option<String>,
    pub prefix: String,
    pub local_dir: PathBuf,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub page_size: u32,
    pub fetch_retries: u32,
    pub max_inflight_cycles: Option<usize>,
    pub callback_command: Option<String>,
    pub callback_threshold: Option<u64>,
    pub count_initial_backfill: bool,
}

impl DaemonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bucket = read_required(&lookup, "OBJSYNC_BUCKET")?;
        let prefix = read_required(&lookup, "OBJSYNC_PREFIX")?;
        let local_dir = match lookup("OBJSYNC_LOCAL_DIR").filter(|v| !v.trim().is_empty()) {
            Some(value) if value.starts_with('~') => {
                let home = dirs::home_dir().context("home directory is unavailable")?;
                expand_with_home(&value, &home)
            }
            Some(value) => PathBuf::from(value),
            None => PathBuf::from(DEFAULT_LOCAL_DIR_NAME),
        };
        let endpoint = lookup("OBJSYNC_ENDPOINT")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let token = lookup("OBJSYNC_TOKEN").filter(|v| !v.is_empty());
        let poll_interval =
            Duration::from_secs(read_u64(&lookup, "OBJSYNC_POLL_SECS", DEFAULT_POLL_SECS)?);
        let request_timeout = Duration::from_secs(read_u64(
            &lookup,
            "OBJSYNC_REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?);
        let page_size = read_u64(&lookup, "OBJSYNC_PAGE_SIZE", u64::from(DEFAULT_PAGE_SIZE))?;
        let page_size = u32::try_from(page_size)
            .with_context(|| format!("OBJSYNC_PAGE_SIZE is too large: {page_size}"))?;
        let fetch_retries = read_count(&lookup, "OBJSYNC_FETCH_RETRIES", DEFAULT_FETCH_RETRIES)?;
        let max_inflight_cycles =
            read_optional_u64(&lookup, "OBJSYNC_MAX_INFLIGHT_CYCLES")?.map(|v| v as usize);
        let callback_command = lookup("OBJSYNC_CALLBACK_CMD").filter(|v| !v.trim().is_empty());
        let callback_threshold = read_optional_u64(&lookup, "OBJSYNC_CALLBACK_THRESHOLD")?;
        let count_initial_backfill = read_bool(&lookup, "OBJSYNC_COUNT_INITIAL_BACKFILL", false);

        Ok(Self {
            bucket,
            endpoint,
            token,
            prefix,
            local_dir,
            poll_interval,
            request_timeout,
            page_size,
            fetch_retries,
            max_inflight_cycles,
            callback_command,
            callback_threshold,
            count_initial_backfill,
        })
    }

    pub fn session_config(&self) -> SessionConfig {
        let mut session = SessionConfig::new(self.prefix.clone(), self.local_dir.clone());
        session.poll_interval = self.poll_interval;
        session.callback_threshold = self.callback_threshold;
        session.suppress_initial_callback = !self.count_initial_backfill;
        session.fetch_retry = RetryPolicy::default().with_max_retries(self.fetch_retries);
        session.max_inflight_cycles = self.max_inflight_cycles;
        session
    }
}

pub struct DaemonRuntime {
    config: DaemonConfig,
    engine: Arc<SyncEngine>,
}

impl DaemonRuntime {
    pub async fn bootstrap(config: DaemonConfig) -> anyhow::Result<Self> {
        let client =
            ObjectStoreClient::with_base_url(&config.endpoint, &config.bucket, config.token.clone())
                .with_context(|| format!("invalid object store endpoint {}", config.endpoint))?
                .with_timeout(config.request_timeout)
                .context("failed to build http client")?;
        let remote = Arc::new(HttpRemote::new(client).with_page_size(config.page_size));
        let callback = config.callback_command.as_ref().map(|command| {
            Arc::new(CommandCallback::new(command.clone())) as Arc<dyn SyncCallback>
        });

        let engine = SyncEngine::start(
            config.session_config(),
            Arc::clone(&remote) as Arc<dyn RemoteListing>,
            remote as Arc<dyn RemoteFetcher>,
            callback,
        )
        .await
        .context("failed to start sync session")?;

        Ok(Self { config, engine })
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Polls until interrupted.
    pub async fn run(self) -> anyhow::Result<()> {
        info!(
            bucket = %self.config.bucket,
            prefix = %self.engine.prefix(),
            local_dir = %self.engine.local_dir().display(),
            callback = self.config.callback_command.is_some(),
            "objsyncd started"
        );
        let mut sync_handle = tokio::spawn(Arc::clone(&self.engine).run());

        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res.context("failed waiting for shutdown signal")?;
                info!("shutdown requested");
            }
            res = &mut sync_handle => {
                res.context("sync loop stopped unexpectedly")?;
            }
        }

        sync_handle.abort();
        Ok(())
    }

    /// Runs a single tick and waits for its cycle unit, callback included.
    /// Fails when any object could not be downloaded.
    pub async fn run_once(self) -> anyhow::Result<()> {
        let outcome = self.engine.tick().await;
        let Some(unit) = outcome.unit else {
            info!(prefix = %self.engine.prefix(), "nothing new to mirror");
            return Ok(());
        };
        let report = unit.await.context("cycle unit aborted")?;
        if let Some(callback) = &report.callback {
            info!(?callback, "callback completed");
        }
        if !report.batch.failed.is_empty() {
            for failed in &report.batch.failed {
                warn!(key = %failed.key, error = %failed.error, "object not mirrored");
            }
            anyhow::bail!(
                "{} of {} objects failed to download",
                report.batch.failed.len(),
                outcome.new_keys.len()
            );
        }
        info!(
            fetched = report.batch.fetched.len(),
            bytes = report.batch.bytes,
            "single pass complete"
        );
        Ok(())
    }
}

include!("daemon_helpers.rs");

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
