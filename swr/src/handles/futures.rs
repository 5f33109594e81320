use crate::entry::CacheEntry;
use crate::error::ResolveError;
use crate::flight::FlightGuard;
use crate::policy::TtlPolicy;
use crate::resolved::{Resolved, ServedState};
use crate::shared::{CacheShared, FetchKind, Lookup};
use crate::store::EntryStore;
use crate::{MetricsSnapshot, TaskSpawner};

use std::fmt;
use std::future::Future;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use std::time::Duration;

/// A thread-safe, asynchronous stale-while-revalidate cache.
///
/// Every upstream fetch, including the one for a miss, runs as a task on the
/// cache's [`TaskSpawner`]. A caller that is cancelled while waiting for a
/// miss therefore never cancels the fetch other callers are waiting on.
pub struct AsyncSwrCache<K, V, E, H = ahash::RandomState> {
  pub(crate) shared: Arc<CacheShared<K, V, E, H>>,
  pub(crate) spawner: Arc<dyn TaskSpawner>,
}

impl<K, V, E, H> Clone for AsyncSwrCache<K, V, E, H> {
  fn clone(&self) -> Self {
    Self {
      shared: Arc::clone(&self.shared),
      spawner: Arc::clone(&self.spawner),
    }
  }
}

impl<K, V, E, H> fmt::Debug for AsyncSwrCache<K, V, E, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("AsyncSwrCache")
      .field("shared", &self.shared)
      .finish_non_exhaustive()
  }
}

impl<K, V, E, H> AsyncSwrCache<K, V, E, H>
where
  K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
  V: Send + Sync + 'static,
  E: std::error::Error + Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// Resolves `key` using the loader configured on the builder.
  ///
  /// A sync `loader` is accepted too; it runs inside a spawned task.
  pub async fn resolve(&self, key: &K) -> Result<Resolved<V>, ResolveError<E>> {
    match &self.shared.loader {
      Some(loader) => {
        let loader = loader.clone();
        self
          .resolve_with(key, move |key| loader.fetch_async(key))
          .await
      }
      None => Err(ResolveError::NoLoader),
    }
  }

  /// Resolves `key`, using `fetch` if the upstream has to be called.
  ///
  /// See [`SwrCache::resolve_with`](crate::SwrCache::resolve_with) for the
  /// behavior in each state. On a miss the returned future completes once
  /// the fetch (this call's or the one it joined) has finished.
  pub async fn resolve_with<F, Fut>(
    &self,
    key: &K,
    fetch: F,
  ) -> Result<Resolved<V>, ResolveError<E>>
  where
    F: FnOnce(K) -> Fut + Send + 'static,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
  {
    let policy = Arc::clone(&self.shared.ttl_policy);
    self.resolve_inner(key, policy, fetch).await
  }

  /// Like [`resolve_with`](Self::resolve_with), with a per-call TTL policy.
  pub async fn resolve_with_policy<P, F, Fut>(
    &self,
    key: &K,
    policy: P,
    fetch: F,
  ) -> Result<Resolved<V>, ResolveError<E>>
  where
    P: TtlPolicy<V> + 'static,
    F: FnOnce(K) -> Fut + Send + 'static,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
  {
    self.resolve_inner(key, Arc::new(policy), fetch).await
  }

  async fn resolve_inner<F, Fut>(
    &self,
    key: &K,
    policy: Arc<dyn TtlPolicy<V>>,
    fetch: F,
  ) -> Result<Resolved<V>, ResolveError<E>>
  where
    F: FnOnce(K) -> Fut + Send + 'static,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
  {
    let (flight, state) = match self.shared.lookup(key) {
      Lookup::Hit(resolved) => return Ok(resolved),
      Lookup::Refresh(resolved, guard) => {
        self.spawn_fetch(guard, FetchKind::Refresh, policy, fetch);
        return Ok(resolved);
      }
      Lookup::Lead(guard) => {
        let flight = Arc::clone(guard.flight());
        self.spawn_fetch(guard, FetchKind::Miss, policy, fetch);
        (flight, ServedState::MissFetchedSynchronously)
      }
      Lookup::Join(flight) => (flight, ServedState::MissJoinedInFlight),
    };

    let outcome = (&*flight).await;
    self.shared.settle(outcome, state)
  }

  fn spawn_fetch<F, Fut>(
    &self,
    guard: FlightGuard<K, V, E, H>,
    kind: FetchKind,
    policy: Arc<dyn TtlPolicy<V>>,
    fetch: F,
  ) where
    F: FnOnce(K) -> Fut + Send + 'static,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
  {
    let shared = Arc::clone(&self.shared);
    let key = guard.key().clone();
    // If the task is dropped before it completes, so is the guard.
    self.spawner.spawn(Box::pin(async move {
      let result = fetch(key).await;
      shared.finish_fetch(guard, kind, result, &*policy);
    }));
  }

  /// Writes `value` for `key` directly, bypassing the upstream.
  pub fn insert(&self, key: K, value: V, ttl: Option<Duration>) -> Arc<CacheEntry<V>> {
    self.shared.insert(key, value, ttl)
  }

  /// Returns the stored entry for `key`, fresh or stale.
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
