use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::BoxFuture;

use crate::FetchError;

/// Describes a cacheable resource.
///
/// The resource is responsible for providing the actual fetch of a value, as well as
/// deriving the cache key for a fetch input.
pub trait Resource: Send + Sync + 'static {
    /// Input argument to the fetch.
    type Input: Send + 'static;
    /// Cache key for the fetched value.
    ///
    /// The same input must always map to the same key.
    type Key: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static;
    /// The value produced by a successful fetch.
    type Output: Clone + Send + Sync + 'static;

    /// A name used for logs and metrics.
    fn name(&self) -> &str;

    /// Returns the cache key corresponding to the `input`.
    ///
    /// A `None` key means there is nothing to fetch for this input.
    fn key(&self, input: &Self::Input) -> Option<Self::Key>;

    /// Fetches a new value that should be cached.
    fn fetch(&self, input: Self::Input) -> BoxFuture<'static, Result<Self::Output, FetchError>>;
}

/// A [`Resource`] built from a pair of closures.
pub struct ResourceFn<I, K, T, F, G> {
    name: Cow<'static, str>,
    fetch: F,
    key: G,
    _marker: PhantomData<fn(I) -> (K, T)>,
}

impl<I, K, T, F, G> ResourceFn<I, K, T, F, G> {
    /// Creates a resource named `name` that fetches with `fetch` and derives keys with `key`.
    pub fn new(name: impl Into<Cow<'static, str>>, fetch: F, key: G) -> Self {
        Self {
            name: name.into(),
            fetch,
            key,
            _marker: PhantomData,
        }
    }
}

impl<I, K, T, F, G> fmt::Debug for ResourceFn<I, K, T, F, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceFn")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<I, K, T, F, G, Fut> Resource for ResourceFn<I, K, T, F, G>
where
    I: Send + 'static,
    K: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    G: Fn(&I) -> Option<K> + Send + Sync + 'static,
{
    type Input = I;
    type Key = K;
    type Output = T;

    fn name(&self) -> &str {
        &self.name
    }

    fn key(&self, input: &I) -> Option<K> {
        (self.key)(input)
    }

    fn fetch(&self, input: I) -> BoxFuture<'static, Result<T, FetchError>> {
        Box::pin((self.fetch)(input))
    }
}

/// Identifies a registered resource.
///
/// Every call to [`create_resource`] produces a new id, so two resources never share cache
/// entries even if they have the same name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl ResourceId {
    fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(0);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A registered [`Resource`], used to address its entries in a
/// [`ResourceCache`](crate::ResourceCache).
pub struct Handle<R> {
    id: ResourceId,
    resource: Arc<R>,
}

impl<R> Handle<R> {
    /// The unique id of this resource.
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// The underlying resource descriptor.
    pub fn resource(&self) -> &R {
        &self.resource
    }
}

impl<R: Resource> Handle<R> {
    /// The name of the resource.
    pub fn name(&self) -> &str {
        self.resource.name()
    }
}

impl<R> Clone for Handle<R> {
    fn clone(&self) -> Self {
        // https://github.com/rust-lang/rust/issues/26925
        Self {
            id: self.id,
            resource: Arc::clone(&self.resource),
        }
    }
}

impl<R: fmt::Debug> fmt::Debug for Handle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.id)
            .field("resource", &self.resource)
            .finish()
    }
}

/// Registers a resource type.
///
/// This has no effect on any cache; the returned [`Handle`] is used to read and patch the
/// resource's entries in a [`ResourceCache`](crate::ResourceCache).
pub fn create_resource<R: Resource>(resource: R) -> Handle<R> {
    Handle {
        id: ResourceId::next(),
        resource: Arc::new(resource),
    }
}
