use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// An immutable snapshot of one cached value together with its freshness
/// metadata.
///
/// Entries are never mutated after creation. A refresh builds a new entry and
/// swaps it into the store, so a reader holding an `Arc<CacheEntry<V>>` always
/// sees a consistent `(value, fetched_at, ttl)` triple.
pub struct CacheEntry<V> {
  value: Arc<V>,
  /// When the fetch that produced `value` completed, as read from the cache's clock.
  fetched_at: Duration,
  /// How long `value` is considered fresh, measured from `fetched_at`.
  ttl: Duration,
}

impl<V> CacheEntry<V> {
  pub(crate) fn new(value: V, ttl: Duration, fetched_at: Duration) -> Self {
    Self {
      value: Arc::new(value),
      fetched_at,
      ttl,
    }
  }

  /// Returns a clone of the `Arc` containing the value.
  #[inline]
  pub fn value(&self) -> Arc<V> {
    self.value.clone()
  }

  #[inline]
  pub fn fetched_at(&self) -> Duration {
    self.fetched_at
  }

  #[inline]
  pub fn ttl(&self) -> Duration {
    self.ttl
  }

  /// The instant after which the entry is stale.
  #[inline]
  pub fn expires_at(&self) -> Duration {
    self.fetched_at.saturating_add(self.ttl)
  }

  /// Time elapsed since the fetch. A clock reading earlier than `fetched_at`
  /// yields zero.
  #[inline]
  pub fn age(&self, now: Duration) -> Duration {
    now.saturating_sub(self.fetched_at)
  }

  /// Freshness left before the entry goes stale; zero once stale.
  #[inline]
  pub fn remaining(&self, now: Duration) -> Duration {
    self.ttl.saturating_sub(self.age(now))
  }

  /// `now - fetched_at > ttl`.
  #[inline]
  pub fn is_stale(&self, now: Duration) -> bool {
    self.age(now) > self.ttl
  }
}

impl<V> fmt::Debug for CacheEntry<V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheEntry")
      .field("fetched_at", &self.fetched_at)
      .field("ttl", &self.ttl)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const TTL: Duration = Duration::from_secs(10);

  fn entry_at(secs: u64) -> CacheEntry<&'static str> {
    CacheEntry::new("v", TTL, Duration::from_secs(secs))
  }

  #[test]
  fn entry_is_fresh_until_ttl_has_fully_elapsed() {
    let entry = entry_at(100);
    assert!(!entry.is_stale(Duration::from_secs(100)));
    assert!(!entry.is_stale(Duration::from_secs(110)));
    assert!(entry.is_stale(Duration::from_millis(110_001)));
    assert_eq!(entry.expires_at(), Duration::from_secs(110));
  }

  #[test]
  fn age_and_remaining() {
    let entry = entry_at(100);
    let now = Duration::from_secs(104);
    assert_eq!(entry.age(now), Duration::from_secs(4));
    assert_eq!(entry.remaining(now), Duration::from_secs(6));
    assert_eq!(entry.remaining(Duration::from_secs(500)), Duration::ZERO);
  }

  #[test]
  fn backwards_clock_makes_entry_look_younger() {
    let entry = entry_at(100);
    let earlier = Duration::from_secs(50);
    assert_eq!(entry.age(earlier), Duration::ZERO);
    assert!(!entry.is_stale(earlier));
  }

  #[test]
  fn zero_ttl_goes_stale_as_soon_as_time_moves() {
    let entry = CacheEntry::new(1u8, Duration::ZERO, Duration::from_secs(1));
    assert!(!entry.is_stale(Duration::from_secs(1)));
    assert!(entry.is_stale(Duration::from_nanos(1_000_000_001)));
  }
}
