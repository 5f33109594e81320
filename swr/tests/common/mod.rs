#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use fibre_swr::{CacheBuilder, ManualClock, SwrCache};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("upstream unavailable: {0}")]
pub struct UpstreamError(pub String);

pub type TestCache = SwrCache<String, String, UpstreamError>;

pub const TTL: Duration = Duration::from_secs(10);

/// A blocking cache driven by a manual clock starting at zero.
pub fn build_test_cache() -> (TestCache, Arc<ManualClock>) {
  let clock = Arc::new(ManualClock::new());
  let cache = CacheBuilder::new()
    .shards(4)
    .clock(clock.clone())
    .time_to_live(TTL)
    .build()
    .unwrap();
  (cache, clock)
}

/// Inserts `value` for `key` and moves the clock past its TTL.
pub fn seed_stale(cache: &TestCache, clock: &ManualClock, key: &str, value: &str) {
  cache.insert(key.to_string(), value.to_string(), Some(TTL));
  clock.advance(TTL + Duration::from_secs(5));
}

/// Counts upstream calls.
#[derive(Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
  pub fn hit(&self) -> usize {
    self.0.fetch_add(1, Ordering::SeqCst) + 1
  }

  pub fn get(&self) -> usize {
    self.0.load(Ordering::SeqCst)
  }
}

/// A one-shot gate an upstream fetch can block on until the test opens it.
#[derive(Clone, Default)]
pub struct Gate(Arc<(Mutex<bool>, Condvar)>);

impl Gate {
  pub fn open(&self) {
    let (lock, cvar) = &*self.0;
    *lock.lock().unwrap() = true;
    cvar.notify_all();
  }

  pub fn wait(&self) {
    let (lock, cvar) = &*self.0;
    let mut open = lock.lock().unwrap();
    while !*open {
      open = cvar.wait(open).unwrap();
    }
  }
}

/// Polls `condition` until it holds, panicking after a generous timeout.
pub fn wait_until(mut condition: impl FnMut() -> bool) {
  let deadline = Instant::now() + Duration::from_secs(5);
  while !condition() {
    assert!(Instant::now() < deadline, "condition not met within 5s");
    thread::sleep(Duration::from_millis(5));
  }
}
