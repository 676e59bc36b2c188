//! The lifetime of one catalog session.

use std::sync::Arc;

use anyhow::{Context, Result};
use aws_credential_types::provider::SharedCredentialsProvider;

use catalog_cache::ResourceCache;

use crate::config::{Config, StoreConfig};
use crate::preview::{PreviewError, VoilaLoader};
use crate::settings::SettingsService;
use crate::store::{FilesystemStore, ObjectStoreRef, S3Store};

/// Owns the resource cache of a session and the services that read through it.
///
/// The cache is created with the session and cleared by [`teardown`](Self::teardown). Services
/// get clones of it, so they all share its entries.
#[derive(Clone, Debug)]
pub struct CatalogSession {
    config: Arc<Config>,
    cache: ResourceCache,
    settings: SettingsService,
    voila: Option<VoilaLoader>,
}

impl CatalogSession {
    /// Creates a session with the object store described by `config`.
    pub async fn create(config: Config) -> Result<Self> {
        let (store, credentials) = match &config.store {
            StoreConfig::S3(s3) => {
                let store = S3Store::new(s3).await;
                let credentials = store.credentials_provider();
                let store: ObjectStoreRef = Arc::new(store);
                (store, credentials)
            }
            StoreConfig::Filesystem(fs) => {
                let store = FilesystemStore::new(&fs.path)
                    .with_context(|| format!("invalid store path {}", fs.path.display()))?;
                let store: ObjectStoreRef = Arc::new(store);
                (store, None)
            }
        };

        Self::from_parts(config, store, credentials)
    }

    /// Creates a session around an existing store.
    pub fn from_parts(
        config: Config,
        store: ObjectStoreRef,
        credentials: Option<SharedCredentialsProvider>,
    ) -> Result<Self> {
        let cache = ResourceCache::new();
        let settings = SettingsService::new(&config, cache.clone(), Arc::clone(&store));

        let voila = match &config.registry_url {
            Some(registry_url) => {
                let client = reqwest::Client::builder()
                    .build()
                    .context("failed to create http client")?;
                Some(VoilaLoader::new(
                    cache.clone(),
                    store,
                    credentials,
                    registry_url.clone(),
                    &config.preview,
                    client,
                ))
            }
            None => {
                tracing::debug!("No registry configured, Voila previews are disabled");
                None
            }
        };

        Ok(Self {
            config: Arc::new(config),
            cache,
            settings,
            voila,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The cache shared by all services of this session.
    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    pub fn settings(&self) -> &SettingsService {
        &self.settings
    }

    /// The Voila loader.
    ///
    /// # Errors
    ///
    /// Returns [`PreviewError::NoRegistry`] if the catalog has no registry to render with.
    pub fn voila(&self) -> Result<&VoilaLoader, PreviewError> {
        self.voila.as_ref().ok_or(PreviewError::NoRegistry)
    }

    /// Ends the session by dropping everything it cached.
    ///
    /// Loads that are still in flight finish in the background, but their results are
    /// discarded.
    pub fn teardown(&self) {
        self.cache.clear();
    }
}
