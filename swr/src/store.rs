use crate::entry::CacheEntry;

use core::fmt;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_utils::CachePadded;
use parking_lot::RwLock;

type Shard<K, V, H> = CachePadded<RwLock<HashMap<K, Arc<CacheEntry<V>>, H>>>;

/// A helper function to hash a key using a `BuildHasher`.
#[inline]
pub(crate) fn hash_key<K: Hash + ?Sized, H: BuildHasher>(hasher: &H, key: &K) -> u64 {
  let mut state = hasher.build_hasher();
  key.hash(&mut state);
  state.finish()
}

/// The thread-safe map from key to its latest [`CacheEntry`].
///
/// The map is partitioned into independently locked shards so that traffic
/// on different keys rarely contends for the same lock. Every write replaces
/// the whole `Arc<CacheEntry<V>>` under the shard's write lock; readers clone
/// the `Arc` under the read lock and therefore never observe a torn entry.
pub struct EntryStore<K, V, H = ahash::RandomState> {
  shards: Box<[Shard<K, V, H>]>,
  hasher: H,
}

impl<K, V, H> fmt::Debug for EntryStore<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("EntryStore")
      .field("num_shards", &self.shards.len())
      .finish()
  }
}

impl<K, V, H> EntryStore<K, V, H>
where
  K: Eq + Hash,
  H: BuildHasher + Clone,
{
  /// Creates a store with `num_shards` shards, rounded up to a power of two.
  pub fn new(num_shards: usize, hasher: H) -> Self {
    let num_shards = num_shards.max(1).next_power_of_two();
    let mut shards = Vec::with_capacity(num_shards);
    for _ in 0..num_shards {
      let shard_map = HashMap::with_hasher(hasher.clone());
      shards.push(CachePadded::new(RwLock::new(shard_map)));
    }

    Self {
      shards: shards.into_boxed_slice(),
      hasher,
    }
  }

  #[inline]
  pub(crate) fn num_shards(&self) -> usize {
    self.shards.len()
  }

  #[inline]
  pub(crate) fn hasher(&self) -> &H {
    &self.hasher
  }

  #[inline]
  fn shard(&self, key: &K) -> &RwLock<HashMap<K, Arc<CacheEntry<V>>, H>> {
    let hash = hash_key(&self.hasher, key);
    // num_shards is a power of two.
    let index = hash as usize & (self.shards.len() - 1);
    &self.shards[index]
  }

  /// Returns a consistent snapshot of the entry for `key`, if any.
  pub fn get(&self, key: &K) -> Option<Arc<CacheEntry<V>>> {
    self.shard(key).read().get(key).cloned()
  }

  /// Installs `CacheEntry { value, fetched_at: now, ttl }` for `key`,
  /// replacing any previous entry, and returns the installed entry.
  pub fn set(&self, key: K, value: V, ttl: Duration, now: Duration) -> Arc<CacheEntry<V>> {
    let entry = Arc::new(CacheEntry::new(value, ttl, now));
    self.shard(&key).write().insert(key, entry.clone());
    entry
  }

  /// `now - entry.fetched_at > entry.ttl`.
  #[inline]
  pub fn is_stale(entry: &CacheEntry<V>, now: Duration) -> bool {
    entry.is_stale(now)
  }

  pub fn contains_key(&self, key: &K) -> bool {
    self.shard(key).read().contains_key(key)
  }

  /// Total number of entries across all shards.
  ///
  /// Shards are read one at a time, so the count is only exact when there
  /// are no concurrent writers.
  pub fn len(&self) -> usize {
    self.shards.iter().map(|shard| shard.read().len()).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.shards.iter().all(|shard| shard.read().is_empty())
  }

  /// Returns a snapshot of every key currently stored.
  pub fn keys(&self) -> Vec<K>
  where
    K: Clone,
  {
    let mut keys = Vec::new();
    for shard in self.shards.iter() {
      keys.extend(shard.read().keys().cloned());
    }
    keys
  }
}
