//! File previews.
//!
//! Only the Voila loader lives here: it resolves a file to the URL of its rendered dashboard
//! and makes sure that page actually loads before handing it out. Rendering is left to the
//! client.

use std::time::Duration;

use catalog_cache::FetchError;
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::store::{ObjectRef, StoreError};

mod voila;

pub use voila::*;

/// The kinds of previews a file can be shown as.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum FileType {
    Jupyter,
    Json,
    Voila,
    Text,
}

/// The result of loading a preview.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum PreviewData {
    /// A Voila dashboard, to be shown in a sandboxed iframe.
    Voila {
        /// The page to show.
        src: Url,
        /// The `sandbox` attribute of the iframe.
        sandbox: &'static str,
        /// The preview modes the user can switch between.
        modes: Vec<FileType>,
    },
}

/// Identifies a package revision.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct PackageHandle {
    pub bucket: String,
    pub name: String,
    /// The top hash of the revision.
    pub hash: String,
}

/// Identifies a file, optionally as part of a package.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct FileHandle {
    pub bucket: String,
    pub key: String,
    pub version: Option<String>,
    /// The package the file is viewed in, if any.
    pub package: Option<PackageHandle>,
}

impl FileHandle {
    /// Refers to the latest version of `key` in `bucket`.
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            version: None,
            package: None,
        }
    }

    /// The location of the file's object.
    pub fn object(&self) -> ObjectRef {
        ObjectRef::new(&self.bucket, &self.key).with_version(self.version.clone())
    }
}

/// An error that happens while loading a preview.
#[derive(Debug, Error)]
pub enum PreviewError {
    /// The page did not load in time.
    #[error("page is taking too long to load")]
    Timeout(Duration),
    /// The page responded with an error status.
    #[error("page failed to load: {0}")]
    Status(reqwest::StatusCode),
    /// The page could not be requested.
    #[error("page failed to load")]
    LoadFailed(#[from] reqwest::Error),
    /// The file could not be signed.
    #[error("failed to sign the file url")]
    Store(#[from] StoreError),
    /// The credentials for the page could not be resolved.
    #[error("failed to resolve credentials: {0}")]
    Credentials(String),
    /// The catalog has no registry to render previews.
    #[error("no registry url configured")]
    NoRegistry,
    /// The render url could not be built.
    #[error("invalid render url")]
    InvalidUrl(#[from] url::ParseError),
    /// A cached preview failed to load earlier.
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl PreviewError {
    /// Returns the load error behind a cached failure.
    pub fn cause(&self) -> &PreviewError {
        match self {
            Self::Fetch(err) => err.downcast_ref::<PreviewError>().unwrap_or(self),
            _ => self,
        }
    }

    /// Whether the preview failed because its page did not load in time.
    pub fn is_timeout(&self) -> bool {
        matches!(self.cause(), Self::Timeout(_))
    }
}
