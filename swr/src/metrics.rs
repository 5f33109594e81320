use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crossbeam_utils::CachePadded;

/// A thread-safe, internal metrics collector for the cache.
/// All fields are atomic to allow for lock-free updates.
#[derive(Debug)]
pub struct Metrics {
  // --- Lookups ---
  pub(crate) fresh_hits: CachePadded<AtomicU64>,
  pub(crate) stale_hits: CachePadded<AtomicU64>,
  pub(crate) misses: CachePadded<AtomicU64>,
  pub(crate) coalesced_misses: CachePadded<AtomicU64>,
  pub(crate) miss_failures: CachePadded<AtomicU64>,

  // --- Background refreshes ---
  pub(crate) refreshes_started: CachePadded<AtomicU64>,
  pub(crate) refreshes_succeeded: CachePadded<AtomicU64>,
  pub(crate) refreshes_failed: CachePadded<AtomicU64>,

  // --- Writes ---
  pub(crate) inserts: CachePadded<AtomicU64>,

  created_at: Instant,
}

impl Default for Metrics {
  fn default() -> Self {
    Self {
      fresh_hits: CachePadded::new(AtomicU64::new(0)),
      stale_hits: CachePadded::new(AtomicU64::new(0)),
      misses: CachePadded::new(AtomicU64::new(0)),
      coalesced_misses: CachePadded::new(AtomicU64::new(0)),
      miss_failures: CachePadded::new(AtomicU64::new(0)),
      refreshes_started: CachePadded::new(AtomicU64::new(0)),
      refreshes_succeeded: CachePadded::new(AtomicU64::new(0)),
      refreshes_failed: CachePadded::new(AtomicU64::new(0)),
      inserts: CachePadded::new(AtomicU64::new(0)),
      created_at: Instant::now(),
    }
  }
}

impl Metrics {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  #[inline]
  pub(crate) fn incr(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
  }

  /// Creates a point-in-time snapshot of the current metrics.
  pub(crate) fn snapshot(&self) -> MetricsSnapshot {
    let fresh_hits = self.fresh_hits.load(Ordering::Relaxed);
    let stale_hits = self.stale_hits.load(Ordering::Relaxed);
    let misses = self.misses.load(Ordering::Relaxed);
    let coalesced_misses = self.coalesced_misses.load(Ordering::Relaxed);
    let served_from_cache = fresh_hits + stale_hits;
    let total_lookups = served_from_cache + misses + coalesced_misses;

    MetricsSnapshot {
      fresh_hits,
      stale_hits,
      misses,
      coalesced_misses,
      miss_failures: self.miss_failures.load(Ordering::Relaxed),
      hit_ratio: if total_lookups == 0 {
        0.0
      } else {
        served_from_cache as f64 / total_lookups as f64
      },
      refreshes_started: self.refreshes_started.load(Ordering::Relaxed),
      refreshes_succeeded: self.refreshes_succeeded.load(Ordering::Relaxed),
      refreshes_failed: self.refreshes_failed.load(Ordering::Relaxed),
      inserts: self.inserts.load(Ordering::Relaxed),
      uptime_secs: self.created_at.elapsed().as_secs(),
    }
  }
}

/// A point-in-time, public-facing snapshot of the cache's metrics.
#[derive(Clone)]
pub struct MetricsSnapshot {
  /// Lookups answered from a fresh entry.
  pub fresh_hits: u64,
  /// Lookups answered from a stale entry (with or without triggering a refresh).
  pub stale_hits: u64,
  /// Lookups that found no entry and performed the upstream fetch themselves.
  pub misses: u64,
  /// Lookups that found no entry and waited on another caller's fetch.
  pub coalesced_misses: u64,
  /// Misses whose upstream fetch failed.
  pub miss_failures: u64,
  /// The share of lookups served from an existing entry, fresh or stale.
  pub hit_ratio: f64,
  /// Background refreshes started.
  pub refreshes_started: u64,
  /// Background refreshes that stored a new value.
  pub refreshes_succeeded: u64,
  /// Background refreshes whose fetch failed; the stale value was kept.
  pub refreshes_failed: u64,
  /// Entries written, by any path.
  pub inserts: u64,
  /// The number of seconds the cache has been running.
  pub uptime_secs: u64,
}

impl fmt::Debug for MetricsSnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MetricsSnapshot")
      .field("fresh_hits", &self.fresh_hits)
      .field("stale_hits", &self.stale_hits)
      .field("misses", &self.misses)
      .field("coalesced_misses", &self.coalesced_misses)
      .field("miss_failures", &self.miss_failures)
      .field("hit_ratio", &format!("{:.2}%", self.hit_ratio * 100.0))
      .field("refreshes_started", &self.refreshes_started)
      .field("refreshes_succeeded", &self.refreshes_succeeded)
      .field("refreshes_failed", &self.refreshes_failed)
      .field("inserts", &self.inserts)
      .field("uptime_secs", &self.uptime_secs)
      .finish()
  }
}
