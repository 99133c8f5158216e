use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use objsync_core::StoreError;
use reqwest::StatusCode;

use super::remote::{FetchError, RemoteFetcher, RemoteListing};
use super::transfer::TransferError;

#[derive(Debug, Clone, Copy)]
enum Failure {
    Permanent,
    Transient(u32),
}

/// In-memory object store with scripted failures and per-key latency.
#[derive(Default)]
pub struct FakeRemote {
    objects: Mutex<Vec<(String, Vec<u8>)>>,
    failures: Mutex<HashMap<String, Failure>>,
    delays: Mutex<HashMap<String, Duration>>,
    fetches: Mutex<Vec<String>>,
    failing_listings: AtomicU32,
}

impl FakeRemote {
    pub fn with_objects(objects: &[(&str, &[u8])]) -> Self {
        let remote = Self::default();
        for (key, body) in objects {
            remote.put(key, body);
        }
        remote
    }

    pub fn put(&self, key: &str, body: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .push((key.to_string(), body.to_vec()));
    }

    pub fn fail_always(&self, key: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(key.to_string(), Failure::Permanent);
    }

    pub fn fail_transiently(&self, key: &str, times: u32) {
        self.failures
            .lock()
            .unwrap()
            .insert(key.to_string(), Failure::Transient(times));
    }

    pub fn delay(&self, key: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(key.to_string(), delay);
    }

    pub fn fail_next_listings(&self, times: u32) {
        self.failing_listings.store(times, Ordering::SeqCst);
    }

    pub fn fetch_count(&self, key: &str) -> usize {
        self.fetches
            .lock()
            .unwrap()
            .iter()
            .filter(|k| k.as_str() == key)
            .count()
    }

    fn unavailable() -> StoreError {
        StoreError::Api {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: "simulated outage".into(),
        }
    }
}

#[async_trait]
impl RemoteListing for FakeRemote {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let pending = self.failing_listings.load(Ordering::SeqCst);
        if pending > 0 {
            self.failing_listings.store(pending - 1, Ordering::SeqCst);
            return Err(Self::unavailable());
        }
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }
}

#[async_trait]
impl RemoteFetcher for FakeRemote {
    async fn fetch(&self, key: &str, target: &Path) -> Result<u64, FetchError> {
        self.fetches.lock().unwrap().push(key.to_string());
        let delay = self.delays.lock().unwrap().get(key).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = {
            let mut failures = self.failures.lock().unwrap();
            match failures.get(key).copied() {
                Some(Failure::Transient(0)) | None => None,
                Some(Failure::Transient(n)) => {
                    failures.insert(key.to_string(), Failure::Transient(n - 1));
                    Some(Failure::Transient(n))
                }
                Some(Failure::Permanent) => Some(Failure::Permanent),
            }
        };
        match failure {
            Some(Failure::Permanent) => {
                return Err(TransferError::Io(io::Error::other("simulated write failure")).into());
            }
            Some(Failure::Transient(_)) => return Err(Self::unavailable().into()),
            None => {}
        }

        let body = self
            .objects
            .lock()
            .unwrap()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, body)| body.clone())
            .ok_or_else(|| {
                FetchError::from(StoreError::Api {
                    status: StatusCode::NOT_FOUND,
                    body: key.to_string(),
                })
            })?;
        tokio::fs::write(target, &body)
            .await
            .map_err(TransferError::from)?;
        Ok(body.len() as u64)
    }
}
