//! Clocks used to timestamp fetches and decide staleness.
//!
//! All timestamps are expressed as a `Duration` since an epoch chosen by the
//! clock. Staleness only ever compares two readings of the same clock, so the
//! epoch itself is irrelevant.

use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// The single, static reference point for all `SystemClock` readings.
// It is initialized lazily on its first use.
static CACHE_EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Converts an `Instant` into a `Duration` since the cache's epoch.
#[inline]
pub(crate) fn instant_to_duration(instant: Instant) -> Duration {
  instant.saturating_duration_since(*CACHE_EPOCH)
}

/// A helper to get the current time as a `Duration` since the epoch.
#[inline]
pub(crate) fn now_duration() -> Duration {
  instant_to_duration(Instant::now())
}

/// A source of timestamps for the cache.
///
/// Implementations should be monotonic, but the cache tolerates a clock that
/// moves backwards: such a reading simply makes an entry look younger than it
/// is for that one comparison.
pub trait Clock: Send + Sync + 'static {
  /// Returns the current time as a duration since this clock's epoch.
  fn now(&self) -> Duration;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
  #[inline]
  fn now(&self) -> Duration {
    (**self).now()
  }
}

/// The default clock, backed by `std::time::Instant`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
  #[inline]
  fn now(&self) -> Duration {
    now_duration()
  }
}

/// A clock that only moves when told to.
///
/// Share it with the cache through an `Arc` and call [`advance`](Self::advance)
/// to make entries go stale deterministically.
#[derive(Debug, Default)]
pub struct ManualClock {
  nanos: AtomicU64,
}

impl ManualClock {
  /// Creates a clock reading zero.
  pub fn new() -> Self {
    Self::default()
  }

  /// Creates a clock reading `start`.
  pub fn starting_at(start: Duration) -> Self {
    Self {
      nanos: AtomicU64::new(to_nanos(start)),
    }
  }

  /// Moves the clock forward by `by`.
  pub fn advance(&self, by: Duration) {
    let by = to_nanos(by);
    let _ = self
      .nanos
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_add(by)));
  }

  /// Sets the clock to an absolute reading. Moving it backwards is allowed.
  pub fn set(&self, to: Duration) {
    self.nanos.store(to_nanos(to), Ordering::SeqCst);
  }
}

// Readings past u64::MAX nanoseconds (about 584 years) pin at the maximum.
#[inline]
fn to_nanos(d: Duration) -> u64 {
  u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

impl Clock for ManualClock {
  #[inline]
  fn now(&self) -> Duration {
    Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
  }
}
