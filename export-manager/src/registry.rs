//! Adapter registry - maps storage types to export adapters.

use crate::adapter::ExportAdapter;
use crate::adapters::{CustomApiAdapter, GoogleDriveAdapter, ObjectAdapter, ObjectTransport, OneDriveAdapter};
use dataport::config::ExportsConfig;
use dataport::credentials::{OAuthToken, TokenStore};
use dataport::destination::StorageType;
use dataport::{DestinationError, Result};
use std::collections::HashMap;
use std::sync::Arc;

pub struct AdapterRegistry {
    adapters: HashMap<StorageType, Arc<dyn ExportAdapter>>,
    tokens: Arc<TokenStore>,
}

impl AdapterRegistry {
    /// Empty registry. Exports to unregistered storage types fail.
    pub fn new(tokens: Arc<TokenStore>) -> Self {
        Self {
            adapters: HashMap::new(),
            tokens,
        }
    }

    /// Registry with the shipped adapter for every storage type.
    pub fn with_defaults(
        tokens: Arc<TokenStore>,
        client: reqwest::Client,
        exports: &ExportsConfig,
        transport: Arc<dyn ObjectTransport>,
    ) -> Self {
        Self::new(tokens)
            .with_adapter(Arc::new(CustomApiAdapter::new(client.clone())))
            .with_adapter(Arc::new(GoogleDriveAdapter::new(
                client.clone(),
                exports.google_api_base.clone(),
            )))
            .with_adapter(Arc::new(OneDriveAdapter::new(client, exports.graph_api_base.clone())))
            .with_adapter(Arc::new(ObjectAdapter::new(StorageType::AwsS3, transport.clone())))
            .with_adapter(Arc::new(ObjectAdapter::new(StorageType::Ftp, transport.clone())))
            .with_adapter(Arc::new(ObjectAdapter::new(StorageType::Sftp, transport)))
    }

    /// Registers an adapter under its storage type, replacing any previous one.
    pub fn with_adapter(mut self, adapter: Arc<dyn ExportAdapter>) -> Self {
        self.adapters.insert(adapter.storage_type(), adapter);
        self
    }

    pub fn resolve(&self, storage_type: StorageType) -> Result<Arc<dyn ExportAdapter>> {
        self.adapters.get(&storage_type).cloned().ok_or_else(|| {
            DestinationError::Configuration(format!(
                "No export adapter registered for {}",
                storage_type.as_str()
            ))
        })
    }

    /// Stored OAuth token for the owner, for storage types backed by OAuth.
    pub fn token_for(&self, owner_id: &str, storage_type: StorageType) -> Result<Option<OAuthToken>> {
        match storage_type.oauth_provider() {
            Some(provider) => Ok(self.tokens.get(owner_id, provider)?),
            None => Ok(None),
        }
    }
}
