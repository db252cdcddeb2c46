//! Asset storage client
//!
//! Uploads happen before a request reaches us; the backend only ever sees an
//! [`AssetRef`] and, when an asset is replaced or its owner deleted, asks the
//! storage service to destroy the old object by its public id.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

use crate::db::AssetRef;

#[async_trait]
pub trait AssetStorage: Send + Sync {
    /// Delete a stored object
    async fn destroy(&self, asset: &AssetRef) -> Result<()>;
}

/// Shared handle used by the services
pub type SharedStorage = Arc<dyn AssetStorage>;

/// Request deletion of each asset, logging failures instead of returning them
pub async fn destroy_quietly(storage: &dyn AssetStorage, assets: &[&AssetRef]) {
    for asset in assets {
        if let Err(e) = storage.destroy(asset).await {
            warn!(public_id = %asset.public_id, error = %e, "Failed to delete asset from storage");
        }
    }
}

/// HTTP storage client: `DELETE {base_url}/assets/{public_id}`
#[derive(Clone)]
pub struct StorageClient {
    base_url: Option<Url>,
    api_key: Option<String>,
    client: Client,
}

impl StorageClient {
    /// A client without a base URL skips deletions
    pub fn new(base_url: Option<&str>, api_key: Option<String>) -> Result<Self> {
        let base_url = base_url
            .map(|u| Url::parse(u).with_context(|| format!("Invalid STORAGE_URL '{}'", u)))
            .transpose()?;

        Ok(Self {
            base_url,
            api_key,
            client: Client::new(),
        })
    }

    fn object_url(base: &Url, public_id: &str) -> Result<Url> {
        let mut url = base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("STORAGE_URL cannot be a base URL"))?
            .pop_if_empty()
            .push("assets")
            .push(public_id);
        Ok(url)
    }
}

#[async_trait]
impl AssetStorage for StorageClient {
    async fn destroy(&self, asset: &AssetRef) -> Result<()> {
        let Some(base) = &self.base_url else {
            debug!(public_id = %asset.public_id, "Asset storage not configured, skipping delete");
            return Ok(());
        };

        let url = Self::object_url(base, &asset.public_id)?;
        debug!(url = %url, "Deleting asset");

        let mut request = self.client.delete(url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let resp = request.send().await.context("Failed to send delete request")?;

        let status = resp.status();
        if status.is_success() || status == reqwest::StatusCode::NOT_FOUND {
            Ok(())
        } else {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Failed to delete asset: {} - {}", status, body)
        }
    }
}

/// Keeps the ids of destroyed assets in memory. Used by tests and local runs
/// without a storage service.
#[derive(Default)]
pub struct InMemoryStorage {
    destroyed: Mutex<Vec<String>>,
}

impl InMemoryStorage {
    pub fn destroyed(&self) -> Vec<String> {
        self.destroyed.lock().clone()
    }
}

#[async_trait]
impl AssetStorage for InMemoryStorage {
    async fn destroy(&self, asset: &AssetRef) -> Result<()> {
        self.destroyed.lock().push(asset.public_id.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_url_encodes_public_id() {
        let base = Url::parse("https://storage.example.com/v1/").unwrap();
        let url = StorageClient::object_url(&base, "folder/img 1").unwrap();
        assert_eq!(url.as_str(), "https://storage.example.com/v1/assets/folder%2Fimg%201");
    }

    #[tokio::test]
    async fn test_unconfigured_client_is_noop() {
        let client = StorageClient::new(None, None).unwrap();
        let asset = AssetRef {
            url: "https://cdn.example.com/x.png".to_string(),
            public_id: "x".to_string(),
        };
        assert!(client.destroy(&asset).await.is_ok());
    }

    #[tokio::test]
    async fn test_in_memory_storage_records_deletes() {
        let storage = InMemoryStorage::default();
        let a = AssetRef {
            url: "u".to_string(),
            public_id: "a".to_string(),
        };
        destroy_quietly(&storage, &[&a, &a]).await;
        assert_eq!(storage.destroyed(), vec!["a".to_string(), "a".to_string()]);
    }
}
