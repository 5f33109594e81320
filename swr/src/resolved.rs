use crate::entry::CacheEntry;

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

/// How a `resolve` call obtained the value it returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServedState {
  /// The entry was fresh; no upstream call was made.
  Fresh,
  /// The entry was stale; it was served and this call started the refresh.
  StaleServedWithRefreshTriggered,
  /// The entry was stale; it was served and a refresh was already running.
  StaleServedRefreshAlreadyRunning,
  /// There was no entry; this call performed the fetch and waited for it.
  MissFetchedSynchronously,
  /// There was no entry; another caller's fetch was already running and this
  /// call waited for its result instead of fetching again.
  MissJoinedInFlight,
}

impl ServedState {
  /// Whether the served value was past its TTL.
  pub fn is_stale(self) -> bool {
    matches!(
      self,
      ServedState::StaleServedWithRefreshTriggered | ServedState::StaleServedRefreshAlreadyRunning
    )
  }

  /// Whether the served value came from an upstream fetch made for this call
  /// (or one it joined).
  pub fn is_miss(self) -> bool {
    matches!(
      self,
      ServedState::MissFetchedSynchronously | ServedState::MissJoinedInFlight
    )
  }
}

/// The value served by `resolve` together with the metadata an HTTP layer
/// needs to set caching headers.
pub struct Resolved<V> {
  value: Arc<V>,
  state: ServedState,
  age: Duration,
  ttl: Duration,
  stale_hint: Option<Duration>,
}

impl<V> Resolved<V> {
  pub(crate) fn from_entry(
    entry: &CacheEntry<V>,
    state: ServedState,
    now: Duration,
    stale_hint: Option<Duration>,
  ) -> Self {
    Self {
      value: entry.value(),
      state,
      age: entry.age(now),
      ttl: entry.ttl(),
      stale_hint,
    }
  }

  #[inline]
  pub fn value(&self) -> &Arc<V> {
    &self.value
  }

  #[inline]
  pub fn into_value(self) -> Arc<V> {
    self.value
  }

  #[inline]
  pub fn state(&self) -> ServedState {
    self.state
  }

  /// How long ago the served value was fetched.
  #[inline]
  pub fn age(&self) -> Duration {
    self.age
  }

  /// The TTL the served value was stored with.
  #[inline]
  pub fn ttl(&self) -> Duration {
    self.ttl
  }

  /// A `Cache-Control` header value matching the cache's own freshness
  /// window, e.g. `max-age=10, stale-while-revalidate=30`.
  ///
  /// Send it together with [`age_header`](Self::age_header) so downstream
  /// caches subtract the time the value already spent here.
  pub fn cache_control(&self) -> String {
    match self.stale_hint {
      Some(window) => format!(
        "max-age={}, stale-while-revalidate={}",
        self.ttl.as_secs(),
        window.as_secs()
      ),
      None => format!("max-age={}", self.ttl.as_secs()),
    }
  }

  /// An `Age` header value: the served value's age in whole seconds.
  pub fn age_header(&self) -> String {
    self.age.as_secs().to_string()
  }
}

impl<V> Deref for Resolved<V> {
  type Target = V;

  fn deref(&self) -> &V {
    &self.value
  }
}

impl<V> Clone for Resolved<V> {
  fn clone(&self) -> Self {
    Self {
      value: self.value.clone(),
      state: self.state,
      age: self.age,
      ttl: self.ttl,
      stale_hint: self.stale_hint,
    }
  }
}

impl<V: fmt::Debug> fmt::Debug for Resolved<V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Resolved")
      .field("value", &self.value)
      .field("state", &self.state)
      .field("age", &self.age)
      .field("ttl", &self.ttl)
      .finish()
  }
}
