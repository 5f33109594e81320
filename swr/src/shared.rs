use crate::entry::CacheEntry;
use crate::error::ResolveError;
use crate::flight::{Flight, FlightGuard, FlightTable, Outcome};
use crate::loader::Loader;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::policy::TtlPolicy;
use crate::resolved::{Resolved, ServedState};
use crate::store::EntryStore;
use crate::time::Clock;

use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use std::time::Duration;

/// The internal, thread-safe core shared by `SwrCache` and `AsyncSwrCache`.
pub(crate) struct CacheShared<K, V, E, H> {
  pub(crate) store: EntryStore<K, V, H>,
  pub(crate) flights: Arc<FlightTable<K, V, E, H>>,
  pub(crate) metrics: Metrics,
  pub(crate) clock: Arc<dyn Clock>,
  pub(crate) ttl_policy: Arc<dyn TtlPolicy<V>>,
  pub(crate) stale_hint: Option<Duration>,
  pub(crate) loader: Option<Loader<K, V, E>>,
}

impl<K, V, E, H> fmt::Debug for CacheShared<K, V, E, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheShared")
      .field("store", &self.store)
      .field("flights", &self.flights)
      .field("stale_hint", &self.stale_hint)
      .field("has_loader", &self.loader.is_some())
      .field("metrics", &self.metrics.snapshot())
      .finish_non_exhaustive()
  }
}

/// What a caller has to do after looking a key up.
pub(crate) enum Lookup<K, V, E, H>
where
  K: Eq + Hash,
  H: BuildHasher + Clone,
{
  /// Serve this value; nothing else to do.
  Hit(Resolved<V>),
  /// Serve this stale value and run the refresh owned by the guard.
  Refresh(Resolved<V>, FlightGuard<K, V, E, H>),
  /// No entry; perform the fetch owned by the guard.
  Lead(FlightGuard<K, V, E, H>),
  /// No entry; wait for someone else's fetch.
  Join(Arc<Flight<V, E>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FetchKind {
  Miss,
  Refresh,
}

enum MissStep<K, V, E, H>
where
  K: Eq + Hash,
  H: BuildHasher + Clone,
{
  Present(Arc<CacheEntry<V>>),
  Join(Arc<Flight<V, E>>),
  Lead(FlightGuard<K, V, E, H>),
}

enum RefreshStep<K, V, E, H>
where
  K: Eq + Hash,
  H: BuildHasher + Clone,
{
  Lead(FlightGuard<K, V, E, H>),
  Running,
  Replaced(Arc<CacheEntry<V>>),
}

impl<K, V, E, H> CacheShared<K, V, E, H>
where
  K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
  V: Send + Sync + 'static,
  E: std::error::Error + Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  #[inline]
  pub(crate) fn now(&self) -> Duration {
    self.clock.now()
  }

  pub(crate) fn metrics(&self) -> MetricsSnapshot {
    self.metrics.snapshot()
  }

  /// Decides how `key` will be served.
  pub(crate) fn lookup(&self, key: &K) -> Lookup<K, V, E, H> {
    // 1. Optimistic read.
    let mut entry = match self.store.get(key) {
      Some(entry) => entry,
      // 2. Miss: coalesce with any fetch already running for the key.
      None => match self.begin_miss(key) {
        MissStep::Present(entry) => entry,
        MissStep::Join(flight) => return Lookup::Join(flight),
        MissStep::Lead(guard) => return Lookup::Lead(guard),
      },
    };

    loop {
      let now = self.now();

      // 3. Fresh hit.
      if !entry.is_stale(now) {
        Metrics::incr(&self.metrics.fresh_hits);
        tracing::trace!(key = ?key, "fresh hit");
        return Lookup::Hit(Resolved::from_entry(
          &entry,
          ServedState::Fresh,
          now,
          self.stale_hint,
        ));
      }

      // 4. Stale hit: exactly one caller wins the claim and refreshes.
      match self.begin_refresh(key, &entry) {
        RefreshStep::Lead(guard) => {
          Metrics::incr(&self.metrics.stale_hits);
          Metrics::incr(&self.metrics.refreshes_started);
          tracing::debug!(key = ?key, age = ?entry.age(now), ttl = ?entry.ttl(), "serving stale entry; starting background refresh");
          let resolved = Resolved::from_entry(
            &entry,
            ServedState::StaleServedWithRefreshTriggered,
            now,
            self.stale_hint,
          );
          return Lookup::Refresh(resolved, guard);
        }
        RefreshStep::Running => {
          Metrics::incr(&self.metrics.stale_hits);
          tracing::trace!(key = ?key, "serving stale entry; refresh already running");
          return Lookup::Hit(Resolved::from_entry(
            &entry,
            ServedState::StaleServedRefreshAlreadyRunning,
            now,
            self.stale_hint,
          ));
        }
        // A refresh completed after the optimistic read; judge the new entry.
        RefreshStep::Replaced(newer) => entry = newer,
      }
    }
  }

  /// The stale path. Claims the marker only if the entry the caller judged
  /// stale is still the stored one, checked under the in-flight shard lock.
  fn begin_refresh(&self, key: &K, seen: &Arc<CacheEntry<V>>) -> RefreshStep<K, V, E, H> {
    let mut pending = self.flights.lock(key);

    if pending.contains_key(key) {
      return RefreshStep::Running;
    }

    // Refreshes store their value before releasing the marker, so with no
    // marker present the store already holds the latest completed fetch.
    if let Some(current) = self.store.get(key) {
      if !Arc::ptr_eq(&current, seen) {
        return RefreshStep::Replaced(current);
      }
    }

    RefreshStep::Lead(FlightTable::lead(&self.flights, &mut pending, key.clone()))
  }

  /// The miss path. Holds the in-flight shard lock while re-checking the
  /// store; the store lock is never held while taking an in-flight lock.
  fn begin_miss(&self, key: &K) -> MissStep<K, V, E, H> {
    let mut pending = self.flights.lock(key);

    // Another caller may have filled the entry since the optimistic read.
    if let Some(entry) = self.store.get(key) {
      return MissStep::Present(entry);
    }

    if let Some(flight) = pending.get(key) {
      Metrics::incr(&self.metrics.coalesced_misses);
      tracing::debug!(key = ?key, "miss; joining in-flight fetch");
      return MissStep::Join(flight.clone());
    }

    Metrics::incr(&self.metrics.misses);
    tracing::debug!(key = ?key, "miss; fetching from upstream");
    MissStep::Lead(FlightTable::lead(&self.flights, &mut pending, key.clone()))
  }

  /// Stores the result of a fetch, releases the marker and wakes waiters.
  ///
  /// A failed fetch stores nothing: on a miss the key stays empty, on a
  /// refresh the stale entry stays servable.
  pub(crate) fn finish_fetch(
    &self,
    guard: FlightGuard<K, V, E, H>,
    kind: FetchKind,
    result: Result<V, E>,
    policy: &dyn TtlPolicy<V>,
  ) -> Outcome<V, E> {
    let outcome = match result {
      Ok(value) => {
        let ttl = policy.ttl_for(&value);
        let entry = self.store.set(guard.key().clone(), value, ttl, self.now());
        Metrics::incr(&self.metrics.inserts);
        if kind == FetchKind::Refresh {
          Metrics::incr(&self.metrics.refreshes_succeeded);
          tracing::debug!(key = ?guard.key(), ttl = ?ttl, "background refresh stored new value");
        }
        Outcome::Loaded(entry)
      }
      Err(err) => {
        match kind {
          FetchKind::Miss => {
            Metrics::incr(&self.metrics.miss_failures);
            tracing::debug!(key = ?guard.key(), error = %err, "upstream fetch failed; nothing cached");
          }
          FetchKind::Refresh => {
            Metrics::incr(&self.metrics.refreshes_failed);
            tracing::warn!(key = ?guard.key(), error = %err, "background refresh failed; keeping stale value");
          }
        }
        Outcome::Failed(Arc::new(err))
      }
    };

    guard.finish(outcome.clone());
    outcome
  }

  /// Turns the outcome of a miss fetch into what `resolve` returns.
  pub(crate) fn settle(
    &self,
    outcome: Outcome<V, E>,
    state: ServedState,
  ) -> Result<Resolved<V>, ResolveError<E>> {
    match outcome {
      Outcome::Loaded(entry) => Ok(Resolved::from_entry(
        &entry,
        state,
        self.now(),
        self.stale_hint,
      )),
      Outcome::Failed(err) => Err(ResolveError::Upstream(err)),
      Outcome::Abandoned => Err(ResolveError::Abandoned),
    }
  }

  /// Writes `value` directly, stamped with the current time.
  pub(crate) fn insert(&self, key: K, value: V, ttl: Option<Duration>) -> Arc<CacheEntry<V>> {
    let ttl = ttl.unwrap_or_else(|| self.ttl_policy.ttl_for(&value));
    let entry = self.store.set(key, value, ttl, self.now());
    Metrics::incr(&self.metrics.inserts);
    entry
  }
}
