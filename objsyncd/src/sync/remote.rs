use std::path::Path;

use async_trait::async_trait;
use objsync_core::{ObjectStoreClient, StoreError};
use thiserror::Error;

use super::transfer::{TransferError, write_response_to_path};

pub const DEFAULT_PAGE_SIZE: u32 = 1000;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Store(err) => err.is_retryable(),
            FetchError::Transfer(err) => err.is_retryable(),
        }
    }
}

/// Enumerates every key under a prefix, pagination included.
#[async_trait]
pub trait RemoteListing: Send + Sync {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// Downloads one object into `target`, returning the bytes written.
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    async fn fetch(&self, key: &str, target: &Path) -> Result<u64, FetchError>;
}

/// Listing and fetching backed by [`ObjectStoreClient`].
#[derive(Clone)]
pub struct HttpRemote {
    client: ObjectStoreClient,
    page_size: u32,
}

impl HttpRemote {
    pub fn new(client: ObjectStoreClient) -> Self {
        Self {
            client,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

#[async_trait]
impl RemoteListing for HttpRemote {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let items = self.client.list_objects_all(prefix, self.page_size).await?;
        Ok(items.into_iter().map(|item| item.name).collect())
    }
}

#[async_trait]
impl RemoteFetcher for HttpRemote {
    async fn fetch(&self, key: &str, target: &Path) -> Result<u64, FetchError> {
        let response = self.client.open_object(key).await?;
        Ok(write_response_to_path(response, target).await?)
    }
}
