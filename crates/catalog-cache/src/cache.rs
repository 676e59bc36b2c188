use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;

use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};
use tracing::Instrument;

use crate::defer::defer;
use crate::{Entry, FetchError, Handle, Resource, ResourceId};

type Settled<T> = Result<T, FetchError>;
type FetchChannel<T> = Shared<oneshot::Receiver<Settled<T>>>;
type Slots<R> = HashMap<<R as Resource>::Key, Slot<<R as Resource>::Output>>;

enum Slot<T> {
    Pending {
        /// Distinguishes this fetch from earlier ones for the same key.
        generation: u64,
        channel: FetchChannel<T>,
    },
    Ready(T),
    Failed(FetchError),
}

/// The type-erased entries of a single resource.
trait SlotTable: Send {
    fn len(&self) -> usize;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<K, T> SlotTable for HashMap<K, Slot<T>>
where
    K: Send + 'static,
    T: Send + Sync + 'static,
{
    fn len(&self) -> usize {
        HashMap::len(self)
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Default)]
struct Tables {
    resources: HashMap<ResourceId, Box<dyn SlotTable>>,
    generation: u64,
}

impl Tables {
    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// The entries of a resource, creating its table if needed.
    fn slots_mut<R: Resource>(&mut self, id: ResourceId) -> &mut Slots<R> {
        let table = self
            .resources
            .entry(id)
            .or_insert_with(|| Box::new(Slots::<R>::new()));
        match table.as_any_mut().downcast_mut::<Slots<R>>() {
            Some(slots) => slots,
            None => unreachable!("resource ids are never shared between resource types"),
        }
    }

    /// The entries of a resource, if it has any.
    fn existing_slots_mut<R: Resource>(&mut self, id: ResourceId) -> Option<&mut Slots<R>> {
        self.resources
            .get_mut(&id)?
            .as_any_mut()
            .downcast_mut::<Slots<R>>()
    }

    fn len(&self) -> usize {
        self.resources.values().map(|table| table.len()).sum()
    }
}

enum Lookup<T> {
    Ready(T),
    Failed(FetchError),
    Pending(FetchChannel<T>),
}

/// An in-memory cache of resource values, keyed by resource and derived key.
///
/// The purpose of this cache is request coalescing: the first request for a key spawns the
/// resource's fetch, and every request for the same key that arrives before the fetch settles
/// shares its result. Settled results are kept, failed ones included, until the cache is
/// [cleared](Self::clear). There is no expiry.
///
/// Cloning a `ResourceCache` is cheap and yields a handle to the same entries. The cache is
/// meant to be created once per session and passed to whatever needs it.
///
/// Fetches are spawned onto the current Tokio runtime, so the cache must be used from within
/// one. A spawned fetch always runs to completion: dropping a caller that waits on it does not
/// cancel it, and the cache enforces no timeouts. Callers that need a deadline apply it to the
/// fetch itself.
///
/// Patch updaters run while the cache is locked and must not call back into the cache.
#[derive(Clone, Default)]
pub struct ResourceCache {
    tables: Arc<Mutex<Tables>>,
}

impl fmt::Debug for ResourceCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self
            .tables
            .try_lock()
            .map(|tables| tables.len())
            .unwrap_or_default();
        f.debug_struct("ResourceCache")
            .field("entries", &entries)
            .finish()
    }
}

impl ResourceCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        lock_tables(&self.tables)
    }

    /// Reads the entry for `input` without waiting for it to settle.
    ///
    /// If there is no entry yet, this spawns the fetch and reports the entry as
    /// [`Pending`](Entry::Pending). A failed entry is reported as is and not fetched again,
    /// see [`retry`](Self::retry) for that.
    pub fn get<R: Resource>(&self, resource: &Handle<R>, input: R::Input) -> Entry<R::Output> {
        let Some(key) = resource.resource().key(&input) else {
            return Entry::Empty;
        };
        self.lookup(resource, key, input, false).into_entry()
    }

    /// Reads the entry for `input`, waiting until it settles.
    ///
    /// Returns `Ok(None)` if the resource derives no key from `input`.
    ///
    /// # Errors
    ///
    /// Returns the stored error if the entry's fetch failed.
    pub async fn suspend<R: Resource>(
        &self,
        resource: &Handle<R>,
        input: R::Input,
    ) -> Result<Option<R::Output>, FetchError> {
        let Some(key) = resource.resource().key(&input) else {
            return Ok(None);
        };

        let channel = match self.lookup(resource, key, input, false) {
            Lookup::Ready(value) => return Ok(Some(value)),
            Lookup::Failed(err) => return Err(err),
            Lookup::Pending(channel) => channel,
        };

        match channel.await {
            Ok(result) => result.map(Some),
            Err(_cancelled) => Err(FetchError::Interrupted(resource.name().into())),
        }
    }

    /// Requests the entry for `input` again.
    ///
    /// A failed entry is replaced by a fresh fetch. Pending and ready entries are left as they
    /// are, so this never starts a second fetch for a key that already has one in flight.
    pub fn retry<R: Resource>(&self, resource: &Handle<R>, input: R::Input) -> Entry<R::Output> {
        let Some(key) = resource.resource().key(&input) else {
            return Entry::Empty;
        };
        self.lookup(resource, key, input, true).into_entry()
    }

    /// Replaces the value of a ready entry with `updater(current)`.
    ///
    /// Returns `false` and leaves the cache untouched if there is no ready entry for `key`.
    /// A value written before the entry was ever read is picked up by the next fetch instead.
    pub fn patch_ok<R, F>(&self, resource: &Handle<R>, key: &R::Key, updater: F) -> bool
    where
        R: Resource,
        F: FnOnce(&R::Output) -> R::Output,
    {
        let name = resource.name();
        let mut tables = self.lock();
        let slot = tables
            .existing_slots_mut::<R>(resource.id())
            .and_then(|slots| slots.get_mut(key));
        match slot {
            Some(Slot::Ready(value)) => {
                let patched = updater(value);
                *value = patched;
                metric!(counter("resources.patch") += 1, "resource" => name);
                true
            }
            _ => {
                tracing::debug!(resource = name, ?key, "Skipping patch of an entry that is not ready");
                false
            }
        }
    }

    /// Drops all entries.
    ///
    /// Fetches that are still in flight run to completion, but their results are discarded.
    pub fn clear(&self) {
        let mut tables = self.lock();
        let entries = tables.len();
        tables.resources.clear();
        tracing::debug!(entries, "Cleared resource cache");
    }

    /// The number of entries in the cache, pending ones included.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks the entry for `key` up, spawning a fetch if there is none.
    ///
    /// With `retry` set, a failed entry is treated like a missing one.
    fn lookup<R: Resource>(
        &self,
        resource: &Handle<R>,
        key: R::Key,
        input: R::Input,
        retry: bool,
    ) -> Lookup<R::Output> {
        let name = resource.name();
        metric!(counter("resources.access") += 1, "resource" => name);

        let mut tables = self.lock();
        let generation = tables.next_generation();
        let slots = tables.slots_mut::<R>(resource.id());

        match slots.get(&key) {
            Some(Slot::Ready(value)) => {
                metric!(counter("resources.memory.hit") += 1, "resource" => name);
                return Lookup::Ready(value.clone());
            }
            Some(Slot::Pending { channel, .. }) => {
                // A concurrent request was deduplicated.
                metric!(counter("resources.channel.hit") += 1, "resource" => name);
                return Lookup::Pending(channel.clone());
            }
            Some(Slot::Failed(err)) if !retry => {
                return Lookup::Failed(err.clone());
            }
            Some(Slot::Failed(_)) | None => {}
        }

        let (sender, receiver) = oneshot::channel();
        let channel = receiver.shared();
        slots.insert(
            key.clone(),
            Slot::Pending {
                generation,
                channel: channel.clone(),
            },
        );
        // The fetch settles its entry under the same lock, so release it before spawning.
        drop(tables);

        tracing::trace!(resource = name, ?key, "Spawning fetch");
        spawn_fetch(
            Arc::downgrade(&self.tables),
            resource,
            key,
            input,
            generation,
            sender,
        );
        Lookup::Pending(channel)
    }
}

impl<T> Lookup<T> {
    fn into_entry(self) -> Entry<T> {
        match self {
            Self::Ready(value) => Entry::Ready(value),
            Self::Failed(err) => Entry::Failed(err),
            Self::Pending(_) => Entry::Pending,
        }
    }
}

fn lock_tables(tables: &Mutex<Tables>) -> MutexGuard<'_, Tables> {
    tables.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Spawns the fetch of a pending entry as a separate task.
///
/// The task writes the result back into the entry before sending it to `sender`, so a woken
/// receiver never observes a stale pending entry. Must be called without holding the lock.
fn spawn_fetch<R: Resource>(
    tables: Weak<Mutex<Tables>>,
    resource: &Handle<R>,
    key: R::Key,
    input: R::Input,
    generation: u64,
    sender: oneshot::Sender<Settled<R::Output>>,
) {
    let id = resource.id();
    let name: Arc<str> = Arc::from(resource.name());
    let span = tracing::debug_span!("resource.fetch", resource = %name, ?key);

    // Fails the entry if the task goes away without settling it, e.g. on panic.
    let interrupted = {
        let tables = tables.clone();
        let key = key.clone();
        let name = Arc::clone(&name);
        defer(move || {
            let err = FetchError::Interrupted(name);
            settle::<R>(&tables, id, &key, generation, Err(err));
        })
    };
    let fetch = resource.resource().fetch(input);

    let task = async move {
        let _interrupted = interrupted;
        metric!(counter("resources.fetch") += 1, "resource" => &name);

        let start = Instant::now();
        let result = fetch.await;
        metric!(timer("resources.fetch.duration") = start.elapsed(), "resource" => &name);
        if let Err(err) = &result {
            metric!(counter("resources.fetch.failed") += 1, "resource" => &name);
            tracing::debug!(error = err as &dyn std::error::Error, "Fetch failed");
        }

        settle::<R>(&tables, id, &key, generation, result.clone());
        sender.send(result).ok();
    };
    tokio::spawn(task.instrument(span));
}

/// Stores the result of the fetch identified by `generation`.
///
/// Does nothing if the entry was cleared or has already settled.
fn settle<R: Resource>(
    tables: &Weak<Mutex<Tables>>,
    id: ResourceId,
    key: &R::Key,
    generation: u64,
    result: Settled<R::Output>,
) {
    let Some(inner) = tables.upgrade() else {
        return;
    };
    let mut tables = lock_tables(&inner);
    let Some(slot) = tables
        .existing_slots_mut::<R>(id)
        .and_then(|slots| slots.get_mut(key))
    else {
        return;
    };
    match *slot {
        Slot::Pending {
            generation: current,
            ..
        } if current == generation => {}
        _ => return,
    }
    *slot = match result {
        Ok(value) => Slot::Ready(value),
        Err(err) => Slot::Failed(err),
    };
}
