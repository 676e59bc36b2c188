use std::fmt;
use std::time::Duration;

use aws_credential_types::Credentials;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use catalog_cache::{Entry, FetchError, Handle, Resource, ResourceCache, create_resource};
use futures::future::{BoxFuture, FutureExt};
use url::Url;

use super::{FileHandle, FileType, PackageHandle, PreviewData, PreviewError};
use crate::config::PreviewConfig;
use crate::store::ObjectStoreRef;

/// The name of the Voila resource, used in logs and metrics.
pub const VOILA_RESOURCE_NAME: &str = "Preview.voila";

/// The `sandbox` attribute of iframes that show Voila dashboards.
pub const IFRAME_SANDBOX_ATTRIBUTES: &str = "allow-scripts allow-same-origin allow-downloads";

/// AWS credentials passed to Voila, so the kernel can read the file itself.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialsQuery {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: Option<String>,
}

impl fmt::Debug for CredentialsQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsQuery")
            .field("access_key", &self.access_key)
            .finish_non_exhaustive()
    }
}

impl From<&Credentials> for CredentialsQuery {
    fn from(credentials: &Credentials) -> Self {
        Self {
            access_key: credentials.access_key_id().to_owned(),
            secret_key: credentials.secret_access_key().to_owned(),
            session_token: credentials.session_token().map(str::to_owned),
        }
    }
}

/// Builds the URL of the page that renders a notebook with Voila.
///
/// The query carries the signed notebook URL, the credentials if any, and the package the
/// notebook is viewed in.
pub fn voila_url(
    registry_url: &Url,
    signed_url: &Url,
    credentials: Option<&CredentialsQuery>,
    package: Option<&PackageHandle>,
) -> Result<Url, url::ParseError> {
    let base = registry_url.as_str().trim_end_matches('/');
    let mut url = Url::parse(&format!("{base}/voila/voila/render/"))?;

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("url", signed_url.as_str());
        if let Some(credentials) = credentials {
            query.append_pair("access_key", &credentials.access_key);
            query.append_pair("secret_key", &credentials.secret_key);
            if let Some(token) = &credentials.session_token {
                query.append_pair("session_token", token);
            }
        }
        if let Some(package) = package {
            query.append_pair("pkg_bucket", &package.bucket);
            query.append_pair("pkg_name", &package.name);
            query.append_pair("pkg_top_hash", &package.hash);
        }
    }

    Ok(url)
}

/// Loads `src` and waits for the complete page, failing after `timeout`.
///
/// On timeout the request is dropped, which closes its connection.
pub async fn wait_for_page(
    client: &reqwest::Client,
    src: &Url,
    timeout: Duration,
) -> Result<(), PreviewError> {
    let load = async {
        let response = client.get(src.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PreviewError::Status(status));
        }
        response.bytes().await?;
        Ok::<_, PreviewError>(())
    };

    tokio::time::timeout(timeout, load)
        .await
        .map_err(|_| PreviewError::Timeout(timeout))?
}

/// Preloads the Voila pages of files.
///
/// Entries are keyed by file. The object is signed when its page is loaded, because signed URLs
/// differ between signatures and would never hit the cache. All credentials come from the same
/// provider, so the file alone identifies a page.
#[derive(Clone)]
pub struct VoilaResource {
    client: reqwest::Client,
    store: ObjectStoreRef,
    credentials: Option<SharedCredentialsProvider>,
    registry_url: Url,
    sign_expiry: Duration,
    timeout: Duration,
}

impl VoilaResource {
    pub fn new(
        client: reqwest::Client,
        store: ObjectStoreRef,
        credentials: Option<SharedCredentialsProvider>,
        registry_url: Url,
        config: &PreviewConfig,
    ) -> Self {
        Self {
            client,
            store,
            credentials,
            registry_url,
            sign_expiry: config.sign_expiry,
            timeout: config.iframe_load_timeout,
        }
    }

    async fn credentials_query(&self) -> Result<Option<CredentialsQuery>, PreviewError> {
        let Some(provider) = &self.credentials else {
            return Ok(None);
        };
        let credentials = provider
            .provide_credentials()
            .await
            .map_err(|err| PreviewError::Credentials(err.to_string()))?;
        Ok(Some(CredentialsQuery::from(&credentials)))
    }

    /// Builds the render URL of a file around a freshly signed object URL.
    async fn render_url(&self, file: &FileHandle) -> Result<Url, PreviewError> {
        let signed = self
            .store
            .sign_url(&file.object(), self.sign_expiry)
            .await?;
        let credentials = self.credentials_query().await?;
        let url = voila_url(
            &self.registry_url,
            &signed,
            credentials.as_ref(),
            file.package.as_ref(),
        )?;
        Ok(url)
    }

    async fn load_page(&self, file: FileHandle) -> Result<PreviewData, PreviewError> {
        let src = self.render_url(&file).await?;
        wait_for_page(&self.client, &src, self.timeout).await?;
        tracing::debug!(bucket = %file.bucket, key = %file.key, "Voila page loaded");

        Ok(PreviewData::Voila {
            src,
            sandbox: IFRAME_SANDBOX_ATTRIBUTES,
            modes: vec![
                FileType::Jupyter,
                FileType::Json,
                FileType::Voila,
                FileType::Text,
            ],
        })
    }
}

impl fmt::Debug for VoilaResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoilaResource")
            .field("registry_url", &self.registry_url.as_str())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Resource for VoilaResource {
    type Input = FileHandle;
    type Key = FileHandle;
    type Output = PreviewData;

    fn name(&self) -> &str {
        VOILA_RESOURCE_NAME
    }

    fn key(&self, file: &FileHandle) -> Option<FileHandle> {
        Some(file.clone())
    }

    fn fetch(&self, file: FileHandle) -> BoxFuture<'static, Result<PreviewData, FetchError>> {
        let this = self.clone();
        async move { this.load_page(file).await.map_err(FetchError::new) }.boxed()
    }
}

/// Loads Voila previews of notebooks.
#[derive(Clone, Debug)]
pub struct VoilaLoader {
    cache: ResourceCache,
    resource: Handle<VoilaResource>,
}

impl VoilaLoader {
    /// Creates a loader that renders through the registry at `registry_url`.
    pub fn new(
        cache: ResourceCache,
        store: ObjectStoreRef,
        credentials: Option<SharedCredentialsProvider>,
        registry_url: Url,
        config: &PreviewConfig,
        client: reqwest::Client,
    ) -> Self {
        let resource = VoilaResource::new(client, store, credentials, registry_url, config);
        Self {
            cache,
            resource: create_resource(resource),
        }
    }

    /// Renders a file and waits until its page has loaded.
    ///
    /// Concurrent calls for the same file share one load, and a loaded page is not requested
    /// again.
    pub async fn load(&self, file: &FileHandle) -> Result<PreviewData, PreviewError> {
        let data = self.cache.suspend(&self.resource, file.clone()).await?;
        data.ok_or_else(|| FetchError::msg("file has no Voila page").into())
    }

    /// Returns the state of the page of `file`, starting its load if needed.
    pub fn peek(&self, file: &FileHandle) -> Entry<PreviewData> {
        self.cache.get(&self.resource, file.clone())
    }

    /// Loads the page of `file` again if it failed before.
    pub fn retry(&self, file: &FileHandle) -> Entry<PreviewData> {
        self.cache.retry(&self.resource, file.clone())
    }
}
