use crate::FetchError;

/// The state of a cache entry, as observed by a non-suspending read.
#[derive(Debug, Clone)]
pub enum Entry<T> {
    /// The resource derived no key from its input, so nothing was fetched.
    Empty,
    /// A fetch for this entry is in flight.
    Pending,
    /// The fetch succeeded, or the entry was patched afterwards.
    Ready(T),
    /// The fetch failed. The error is kept until the entry is retried.
    Failed(FetchError),
}

impl<T> Entry<T> {
    /// Returns `true` while the entry's fetch is in flight.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Returns `true` if the entry holds a value.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// Returns `true` if the entry holds a fetch error.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Returns the value of a ready entry.
    pub fn ready(self) -> Option<T> {
        match self {
            Self::Ready(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the error of a failed entry.
    pub fn error(&self) -> Option<&FetchError> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }
}
