use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// An error that happened while fetching a resource.
///
/// Fetch errors are stored in the cache and handed out to every caller waiting on the same
/// entry, so the underlying error is shared behind an [`Arc`] and cloning is cheap.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The resource's fetch function failed.
    #[error(transparent)]
    Failed(Arc<dyn StdError + Send + Sync + 'static>),
    /// The fetch task ended without producing a result, for example because it panicked or
    /// its runtime shut down.
    #[error("fetching `{0}` was interrupted")]
    Interrupted(Arc<str>),
}

impl FetchError {
    /// Wraps any error returned from a fetch function.
    pub fn new<E>(error: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Failed(Arc::from(error.into()))
    }

    /// Creates a fetch error from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(message.into())
    }

    /// Returns `true` if the fetch task died before it settled.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted(_))
    }

    /// Attempts to downcast the underlying fetch failure to a concrete error type.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            Self::Failed(err) => err.downcast_ref(),
            Self::Interrupted(_) => None,
        }
    }
}
