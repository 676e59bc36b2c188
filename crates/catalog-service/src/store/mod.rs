//! Access to the object stores that back catalog data.
//!
//! The catalog reads and writes whole objects and hands out signed URLs for them. Everything
//! else about the backends, including request signing, is left to the backend's client.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;
use url::Url;

mod filesystem;
mod s3;

pub use filesystem::FilesystemStore;
pub use s3::S3Store;

/// An error that happens when accessing an object store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The object or its bucket does not exist.
    #[error("not found")]
    NotFound,
    /// The store refused access to the object.
    ///
    /// The attached string contains the store's response.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// The store did not respond in time.
    #[error("request timed out after {}", humantime::format_duration(*.0))]
    Timeout(Duration),
    /// The request failed for another reason, like connection loss or a 5xx response.
    #[error("request failed: {0}")]
    RequestFailed(String),
    /// The object or the request for it is invalid in some way.
    #[error("malformed: {0}")]
    Malformed(String),
    /// An unexpected error in the catalog itself.
    #[error("internal error")]
    InternalError,
}

impl StoreError {
    #[track_caller]
    pub fn from_std_error<E: std::error::Error + 'static>(e: E) -> Self {
        let dynerr: &dyn std::error::Error = &e; // tracing expects a `&dyn Error`
        tracing::error!(error = dynerr);
        Self::InternalError
    }
}

impl From<io::Error> for StoreError {
    #[track_caller]
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound,
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(err.to_string()),
            _ => Self::from_std_error(err),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

/// The location of an object, optionally pinned to a version.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ObjectRef {
    /// The bucket containing the object.
    pub bucket: String,
    /// The key of the object within its bucket.
    pub key: String,
    /// The version of the object, or the latest version if absent.
    pub version: Option<String>,
}

impl ObjectRef {
    /// Refers to the latest version of `key` in `bucket`.
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            version: None,
        }
    }

    /// Pins this reference to `version`.
    pub fn with_version(mut self, version: Option<String>) -> Self {
        self.version = version;
        self
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)?;
        if let Some(version) = &self.version {
            write!(f, "?versionId={version}")?;
        }
        Ok(())
    }
}

/// A store of whole objects.
pub trait ObjectStore: fmt::Debug + Send + Sync {
    /// Reads the full contents of an object.
    fn get_object<'a>(&'a self, object: &'a ObjectRef) -> BoxFuture<'a, Result<Bytes, StoreError>>;

    /// Creates or replaces an object.
    fn put_object<'a>(
        &'a self,
        object: &'a ObjectRef,
        body: Bytes,
    ) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Returns a URL that grants read access to the object for `expires_in`.
    fn sign_url<'a>(
        &'a self,
        object: &'a ObjectRef,
        expires_in: Duration,
    ) -> BoxFuture<'a, Result<Url, StoreError>>;
}

/// A shared object store.
pub type ObjectStoreRef = Arc<dyn ObjectStore>;
