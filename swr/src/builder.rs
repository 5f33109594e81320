use crate::error::BuildError;
use crate::flight::FlightTable;
use crate::handles::{AsyncSwrCache, SwrCache};
use crate::loader::Loader;
use crate::metrics::Metrics;
use crate::policy::{FixedTtl, TtlPolicy};
use crate::shared::CacheShared;
use crate::store::EntryStore;
use crate::time::{Clock, SystemClock};
use crate::TaskSpawner;

use core::fmt;
use std::future::Future;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use std::time::Duration;

/// The TTL given to every value when no policy is configured.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// A builder for creating `SwrCache` and `AsyncSwrCache` instances.
///
/// `K` is the key, `V` the cached value and `E` the error the upstream fetch
/// can fail with.
pub struct CacheBuilder<K, V, E, H = ahash::RandomState> {
  pub(crate) shards: usize,
  pub(crate) hasher: H,
  pub(crate) stale_hint: Option<Duration>,
  clock: Arc<dyn Clock>,
  ttl_policy: Arc<dyn TtlPolicy<V>>,
  loader: Option<Loader<K, V, E>>,
  spawner: Option<Arc<dyn TaskSpawner>>,
}

// Manual Debug implementation for CacheBuilder.
impl<K, V, E, H> fmt::Debug for CacheBuilder<K, V, E, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheBuilder")
      .field("shards", &self.shards)
      .field("stale_hint", &self.stale_hint)
      .field("has_loader", &self.loader.is_some())
      .field("has_spawner", &self.spawner.is_some())
      .finish_non_exhaustive()
  }
}

// --- General Configuration Methods ---
impl<K, V, E, H> CacheBuilder<K, V, E, H> {
  /// Sets the number of concurrent shards to use, rounded up to a power of
  /// two. Zero is rejected when the cache is built.
  pub fn shards(mut self, shards: usize) -> Self {
    // A power of two allows fast bitwise ANDing.
    self.shards = if shards == 0 { 0 } else { shards.next_power_of_two() };
    self
  }

  /// Sets the hasher used to pick shards and index them.
  pub fn hasher(mut self, hasher: H) -> Self {
    self.hasher = hasher;
    self
  }

  /// Sets the clock used to timestamp fetches and judge staleness.
  ///
  /// Defaults to [`SystemClock`].
  pub fn clock(mut self, clock: impl Clock) -> Self {
    self.clock = Arc::new(clock);
    self
  }

  /// Sets the policy that picks the TTL of each fetched value.
  pub fn ttl_policy(mut self, policy: impl TtlPolicy<V> + 'static) -> Self {
    self.ttl_policy = Arc::new(policy);
    self
  }

  /// Gives every fetched value the same TTL. Shorthand for
  /// `ttl_policy(FixedTtl(duration))`.
  pub fn time_to_live(mut self, duration: Duration) -> Self {
    self.ttl_policy = Arc::new(FixedTtl(duration));
    self
  }

  /// Sets how long downstream caches may keep serving a value after its
  /// TTL while they revalidate. Only affects
  /// [`Resolved::cache_control`](crate::Resolved::cache_control); this cache
  /// serves stale values for as long as it has no fresher one.
  pub fn stale_hint(mut self, window: Duration) -> Self {
    self.stale_hint = Some(window);
    self
  }

  /// Sets the synchronous upstream fetch used by `resolve`.
  pub fn loader<F>(mut self, f: F) -> Self
  where
    F: Fn(&K) -> Result<V, E> + Send + Sync + 'static,
  {
    self.loader = Some(Loader::Sync(Arc::new(f)));
    self
  }

  /// Sets the asynchronous upstream fetch used by `resolve`. Only
  /// [`build_async`](Self::build_async) accepts it.
  pub fn async_loader<F, Fut>(mut self, f: F) -> Self
  where
    K: Send + 'static,
    V: Send + 'static,
    E: Send + 'static,
    F: Fn(K) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
  {
    self.loader = Some(Loader::from_async(f));
    self
  }

  /// Sets where the async cache runs its upstream fetches.
  ///
  /// With the `tokio` feature the current runtime is used when no spawner is
  /// set.
  pub fn spawner(mut self, spawner: Arc<dyn TaskSpawner>) -> Self {
    self.spawner = Some(spawner);
    self
  }

  /// Applies every value present in `config`.
  ///
  /// Tiers are not applied here since they need a classifier; see
  /// [`CacheConfig::tiered_ttl`](crate::config::CacheConfig::tiered_ttl).
  #[cfg(feature = "serde")]
  pub fn with_config(mut self, config: &crate::config::CacheConfig) -> Self {
    if let Some(shards) = config.shards {
      self = self.shards(shards);
    }
    if let Some(ttl) = config.default_ttl {
      self = self.time_to_live(ttl);
    }
    if let Some(window) = config.stale_hint {
      self.stale_hint = Some(window);
    }
    self
  }
}

// --- Default Constructor ---
impl<K, V, E, H: BuildHasher + Default> CacheBuilder<K, V, E, H> {
  /// Creates a new `CacheBuilder` with default settings.
  pub fn new() -> Self {
    Self {
      shards: (num_cpus::get() * 4).max(1).next_power_of_two(),
      hasher: H::default(),
      stale_hint: None,
      clock: Arc::new(SystemClock),
      ttl_policy: Arc::new(FixedTtl(DEFAULT_TTL)),
      loader: None,
      spawner: None,
    }
  }
}

impl<K, V, E> Default for CacheBuilder<K, V, E, ahash::RandomState> {
  fn default() -> Self {
    Self::new()
  }
}

// --- Build Methods ---
impl<K, V, E, H> CacheBuilder<K, V, E, H>
where
  K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
  V: Send + Sync + 'static,
  E: std::error::Error + Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// Builds a blocking `SwrCache`.
  pub fn build(self) -> Result<SwrCache<K, V, E, H>, BuildError> {
    self.validate()?;
    if matches!(self.loader, Some(Loader::Async(_))) {
      return Err(BuildError::AsyncLoaderOnBlockingCache);
    }
    let shared = self.build_shared_core();
    Ok(SwrCache { shared })
  }

  /// Builds an `AsyncSwrCache`.
  ///
  /// Fails with [`BuildError::SpawnerRequired`] if no spawner was set and
  /// none can be taken from a running Tokio runtime.
  pub fn build_async(mut self) -> Result<AsyncSwrCache<K, V, E, H>, BuildError> {
    self.validate()?;
    let spawner = match self.spawner.take() {
      Some(spawner) => spawner,
      None => Self::default_spawner()?,
    };
    let shared = self.build_shared_core();
    Ok(AsyncSwrCache { shared, spawner })
  }

  #[cfg(feature = "tokio")]
  fn default_spawner() -> Result<Arc<dyn TaskSpawner>, BuildError> {
    match crate::runtime::TokioSpawner::try_current() {
      Some(spawner) => Ok(Arc::new(spawner)),
      None => Err(BuildError::SpawnerRequired),
    }
  }

  #[cfg(not(feature = "tokio"))]
  fn default_spawner() -> Result<Arc<dyn TaskSpawner>, BuildError> {
    Err(BuildError::SpawnerRequired)
  }

  /// Central logic to construct the shared core of the cache.
  fn build_shared_core(self) -> Arc<CacheShared<K, V, E, H>> {
    let store = EntryStore::new(self.shards, self.hasher);
    let flights = Arc::new(FlightTable::new(
      store.num_shards(),
      store.hasher().clone(),
    ));

    tracing::debug!(shards = store.num_shards(), "building stale-while-revalidate cache");

    Arc::new(CacheShared {
      store,
      flights,
      metrics: Metrics::new(),
      clock: self.clock,
      ttl_policy: self.ttl_policy,
      stale_hint: self.stale_hint,
      loader: self.loader,
    })
  }

  /// Validates the builder configuration.
  pub(crate) fn validate(&self) -> Result<(), BuildError> {
    if self.shards == 0 {
      return Err(BuildError::ZeroShards);
    }
    Ok(())
  }
}
