use crate::entry::CacheEntry;
use crate::error::ResolveError;
use crate::flight::FlightGuard;
use crate::loader::Loader;
use crate::policy::TtlPolicy;
use crate::resolved::{Resolved, ServedState};
use crate::shared::{CacheShared, FetchKind, Lookup};
use crate::store::EntryStore;
use crate::MetricsSnapshot;

use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// A thread-safe, blocking stale-while-revalidate cache.
///
/// Misses are fetched on the calling thread. Background refreshes of stale
/// entries run on their own OS thread, at most one per key.
pub struct SwrCache<K, V, E, H = ahash::RandomState> {
  pub(crate) shared: Arc<CacheShared<K, V, E, H>>,
}

impl<K, V, E, H> Clone for SwrCache<K, V, E, H> {
  fn clone(&self) -> Self {
    Self {
      shared: Arc::clone(&self.shared),
    }
  }
}

impl<K, V, E, H> fmt::Debug for SwrCache<K, V, E, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SwrCache")
      .field("shared", &self.shared)
      .finish()
  }
}

impl<K, V, E, H> SwrCache<K, V, E, H>
where
  K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
  V: Send + Sync + 'static,
  E: std::error::Error + Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// Resolves `key` using the loader configured on the builder.
  ///
  /// Returns [`ResolveError::NoLoader`] if the cache was built without one.
  pub fn resolve(&self, key: &K) -> Result<Resolved<V>, ResolveError<E>> {
    match &self.shared.loader {
      Some(Loader::Sync(fetch)) => {
        let fetch = Arc::clone(fetch);
        self.resolve_with(key, move |key: &K| fetch(key))
      }
      // The builder refuses async loaders for blocking caches.
      Some(Loader::Async(_)) | None => Err(ResolveError::NoLoader),
    }
  }

  /// Resolves `key`, using `fetch` if the upstream has to be called.
  ///
  /// - Fresh entry: returned without calling `fetch`.
  /// - Stale entry: returned immediately. If no refresh for the key is
  ///   running, `fetch` runs on a background thread and its result replaces
  ///   the entry; otherwise `fetch` is dropped unused.
  /// - No entry: `fetch` runs on this thread, unless another caller is
  ///   already fetching the key, in which case this call waits for and
  ///   shares that result.
  pub fn resolve_with<F>(&self, key: &K, fetch: F) -> Result<Resolved<V>, ResolveError<E>>
  where
    F: FnOnce(&K) -> Result<V, E> + Send + 'static,
  {
    let policy = Arc::clone(&self.shared.ttl_policy);
    self.resolve_inner(key, policy, fetch)
  }

  /// Like [`resolve_with`](Self::resolve_with), but the TTL of a value
  /// fetched by this call is chosen by `policy` instead of the cache's
  /// configured policy.
  pub fn resolve_with_policy<P, F>(
    &self,
    key: &K,
    policy: P,
    fetch: F,
  ) -> Result<Resolved<V>, ResolveError<E>>
  where
    P: TtlPolicy<V> + 'static,
    F: FnOnce(&K) -> Result<V, E> + Send + 'static,
  {
    self.resolve_inner(key, Arc::new(policy), fetch)
  }

  fn resolve_inner<F>(
    &self,
    key: &K,
    policy: Arc<dyn TtlPolicy<V>>,
    fetch: F,
  ) -> Result<Resolved<V>, ResolveError<E>>
  where
    F: FnOnce(&K) -> Result<V, E> + Send + 'static,
  {
    match self.shared.lookup(key) {
      Lookup::Hit(resolved) => Ok(resolved),
      Lookup::Refresh(resolved, guard) => {
        self.spawn_refresh(guard, policy, fetch);
        Ok(resolved)
      }
      Lookup::Lead(guard) => {
        // If `fetch` panics, the guard is dropped while unwinding, which
        // releases the marker and fails any joined callers.
        let result = fetch(guard.key());
        let outcome = self
          .shared
          .finish_fetch(guard, FetchKind::Miss, result, &*policy);
        self
          .shared
          .settle(outcome, ServedState::MissFetchedSynchronously)
      }
      Lookup::Join(flight) => {
        let outcome = flight.wait();
        self.shared.settle(outcome, ServedState::MissJoinedInFlight)
      }
    }
  }

  fn spawn_refresh<F>(&self, guard: FlightGuard<K, V, E, H>, policy: Arc<dyn TtlPolicy<V>>, fetch: F)
  where
    F: FnOnce(&K) -> Result<V, E> + Send + 'static,
  {
    let shared = Arc::clone(&self.shared);
    let key = guard.key().clone();
    let spawned = thread::Builder::new()
      .name("fibre-swr-refresh".into())
      .spawn(move || {
        let result = fetch(guard.key());
        shared.finish_fetch(guard, FetchKind::Refresh, result, &*policy);
      });

    // On failure the closure, and with it the guard, has been dropped, so
    // the marker is already released and the next stale read retries.
    if let Err(err) = spawned {
      tracing::warn!(key = ?key, error = %err, "failed to spawn background refresh thread");
    }
  }

  /// Writes `value` for `key` directly, bypassing the upstream.
  ///
  /// The TTL comes from the configured policy unless `ttl` is given.
  pub fn insert(&self, key: K, value: V, ttl: Option<Duration>) -> Arc<CacheEntry<V>> {
    self.shared.insert(key, value, ttl)
  }

  /// Returns the stored entry for `key` without touching the upstream or
  /// the metrics, whether fresh or stale.
  pub fn peek(&self, key: &K) -> Option<Arc<CacheEntry<V>>> {
    self.shared.store.get(key)
  }

  /// Whether an upstream fetch for `key` is running right now.
  pub fn is_refreshing(&self, key: &K) -> bool {
    self.shared.flights.contains(key)
  }

  /// The number of upstream fetches currently running.
  pub fn in_flight(&self) -> usize {
    self.shared.flights.len()
  }

  pub fn store(&self) -> &EntryStore<K, V, H> {
    &self.shared.store
  }

  pub fn len(&self) -> usize {
    self.shared.store.len()
  }

  pub fn is_empty(&self) -> bool {
    self.shared.store.is_empty()
  }

  pub fn metrics(&self) -> MetricsSnapshot {
    self.shared.metrics()
  }
}
