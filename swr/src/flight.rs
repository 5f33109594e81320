//! In-flight markers.
//!
//! A [`Flight`] exists for a key exactly while one upstream fetch for that key
//! is running. Claiming one is a test-and-set under the shard mutex of the
//! [`FlightTable`], and the [`FlightGuard`] handed to the claimer removes it
//! again when dropped, whether the fetch returned, failed, panicked, or its
//! task was dropped.

use crate::entry::CacheEntry;
use crate::store::hash_key;

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::hash::{BuildHasher, Hash};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::thread::{self, Thread};

use crossbeam_utils::CachePadded;
use parking_lot::{Mutex, MutexGuard};

/// How a fetch ended, as seen by callers waiting on its flight.
pub(crate) enum Outcome<V, E> {
  Loaded(Arc<CacheEntry<V>>),
  Failed(Arc<E>),
  /// The fetch panicked or its task was dropped before it finished.
  Abandoned,
}

impl<V, E> Clone for Outcome<V, E> {
  fn clone(&self) -> Self {
    match self {
      Outcome::Loaded(entry) => Outcome::Loaded(entry.clone()),
      Outcome::Failed(err) => Outcome::Failed(err.clone()),
      Outcome::Abandoned => Outcome::Abandoned,
    }
  }
}

/// Represents a waiter in the queue for a `Flight`.
enum Waiter {
  Sync(Thread),
  Async(Waker),
}

impl Waiter {
  fn wake(self) {
    match self {
      Waiter::Sync(thread) => thread.unpark(),
      Waiter::Async(waker) => waker.wake(),
    }
  }
}

enum State<V, E> {
  Running,
  Done(Outcome<V, E>),
}

struct Inner<V, E> {
  state: State<V, E>,
  waiters: VecDeque<Waiter>,
}

/// One running upstream fetch. It can be awaited by async tasks and blocked
/// on by threads at the same time.
pub(crate) struct Flight<V, E> {
  inner: Mutex<Inner<V, E>>,
}

impl<V, E> Flight<V, E> {
  fn new() -> Self {
    Self {
      inner: Mutex::new(Inner {
        state: State::Running,
        waiters: VecDeque::new(),
      }),
    }
  }

  /// Records the outcome and wakes all waiters. Only the first call has any
  /// effect; returns whether this call was it.
  fn complete(&self, outcome: Outcome<V, E>) -> bool {
    let waiters = {
      let mut inner = self.inner.lock();
      if let State::Done(_) = inner.state {
        return false;
      }
      inner.state = State::Done(outcome);
      std::mem::take(&mut inner.waiters)
    };
    for waiter in waiters {
      waiter.wake();
    }
    true
  }

  /// Blocks the current thread until the flight completes.
  pub(crate) fn wait(&self) -> Outcome<V, E> {
    let mut inner = self.inner.lock();
    loop {
      match &inner.state {
        State::Done(outcome) => return outcome.clone(),
        State::Running => {
          inner.waiters.push_back(Waiter::Sync(thread::current()));
          drop(inner); // Unlock before parking.
          thread::park();
          inner = self.inner.lock();
        }
      }
    }
  }
}

impl<V, E> Future for &Flight<V, E> {
  type Output = Outcome<V, E>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let mut inner = self.inner.lock();
    match &inner.state {
      State::Done(outcome) => Poll::Ready(outcome.clone()),
      State::Running => {
        let already_queued = inner.waiters.iter().any(|w| match w {
          Waiter::Async(waker) => waker.will_wake(cx.waker()),
          Waiter::Sync(_) => false,
        });
        if !already_queued {
          inner.waiters.push_back(Waiter::Async(cx.waker().clone()));
        }
        Poll::Pending
      }
    }
  }
}

type FlightMap<K, V, E, H> = HashMap<K, Arc<Flight<V, E>>, H>;

/// The sharded set of running fetches, keyed like the entry store.
pub(crate) struct FlightTable<K, V, E, H> {
  shards: Box<[CachePadded<Mutex<FlightMap<K, V, E, H>>>]>,
  hasher: H,
}

/// Result of trying to claim the marker for a key.
#[cfg(test)]
pub(crate) enum Claim<K, V, E, H>
where
  K: Eq + Hash,
  H: BuildHasher + Clone,
{
  /// The caller now owns the only fetch for this key.
  Leader(FlightGuard<K, V, E, H>),
  /// Another fetch for this key is already running.
  Contended,
}

impl<K, V, E, H> FlightTable<K, V, E, H>
where
  K: Eq + Hash,
  H: BuildHasher + Clone,
{
  pub(crate) fn new(num_shards: usize, hasher: H) -> Self {
    let num_shards = num_shards.max(1).next_power_of_two();
    let shards = (0..num_shards)
      .map(|_| CachePadded::new(Mutex::new(HashMap::with_hasher(hasher.clone()))))
      .collect::<Vec<_>>()
      .into_boxed_slice();
    Self { shards, hasher }
  }

  #[inline]
  fn shard(&self, key: &K) -> &Mutex<FlightMap<K, V, E, H>> {
    let hash = hash_key(&self.hasher, key);
    let index = hash as usize & (self.shards.len() - 1);
    &self.shards[index]
  }

  /// Locks the shard holding `key`. The guard must be released before any
  /// `FlightGuard` for the same shard is dropped.
  pub(crate) fn lock(&self, key: &K) -> MutexGuard<'_, FlightMap<K, V, E, H>> {
    self.shard(key).lock()
  }

  /// Atomically claims the marker for `key`.
  #[cfg(test)]
  pub(crate) fn try_claim(self: &Arc<Self>, key: &K) -> Claim<K, V, E, H>
  where
    K: Clone,
  {
    let mut pending = self.lock(key);
    if pending.contains_key(key) {
      return Claim::Contended;
    }
    Claim::Leader(Self::lead(self, &mut pending, key.clone()))
  }

  /// Inserts a new flight for `key` into an already locked shard.
  pub(crate) fn lead(
    table: &Arc<Self>,
    pending: &mut FlightMap<K, V, E, H>,
    key: K,
  ) -> FlightGuard<K, V, E, H>
  where
    K: Clone,
  {
    let flight = Arc::new(Flight::new());
    pending.insert(key.clone(), flight.clone());
    FlightGuard {
      table: Arc::clone(table),
      key,
      flight,
      outcome: None,
    }
  }

  fn release(&self, key: &K, flight: &Arc<Flight<V, E>>) {
    let mut pending = self.lock(key);
    if pending.get(key).is_some_and(|current| Arc::ptr_eq(current, flight)) {
      pending.remove(key);
    }
  }

  pub(crate) fn contains(&self, key: &K) -> bool {
    self.lock(key).contains_key(key)
  }

  pub(crate) fn len(&self) -> usize {
    self.shards.iter().map(|shard| shard.lock().len()).sum()
  }
}

/// Ownership of the in-flight marker for one key.
///
/// Dropping the guard removes the marker and then wakes anyone waiting on the
/// flight. A guard dropped without [`finish`](Self::finish) completes the
/// flight as [`Outcome::Abandoned`].
pub(crate) struct FlightGuard<K, V, E, H>
where
  K: Eq + Hash,
  H: BuildHasher + Clone,
{
  table: Arc<FlightTable<K, V, E, H>>,
  key: K,
  flight: Arc<Flight<V, E>>,
  outcome: Option<Outcome<V, E>>,
}

impl<K, V, E, H> FlightGuard<K, V, E, H>
where
  K: Eq + Hash,
  H: BuildHasher + Clone,
{
  #[inline]
  pub(crate) fn key(&self) -> &K {
    &self.key
  }

  #[inline]
  pub(crate) fn flight(&self) -> &Arc<Flight<V, E>> {
    &self.flight
  }

  /// Releases the marker and publishes `outcome` to waiters.
  pub(crate) fn finish(mut self, outcome: Outcome<V, E>) {
    self.outcome = Some(outcome);
  }
}

impl<K, V, E, H> Drop for FlightGuard<K, V, E, H>
where
  K: Eq + Hash,
  H: BuildHasher + Clone,
{
  fn drop(&mut self) {
    // The marker goes first so that a caller arriving after a failed fetch
    // starts a new one instead of joining a finished flight.
    self.table.release(&self.key, &self.flight);

    match self.outcome.take() {
      Some(outcome) => {
        self.flight.complete(outcome);
      }
      None => {
        if self.flight.complete(Outcome::Abandoned) {
          tracing::error!("upstream fetch abandoned before completing; in-flight marker released");
        }
      }
    }
  }
}

impl<K, V, E, H> fmt::Debug for FlightTable<K, V, E, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("FlightTable")
      .field("num_shards", &self.shards.len())
      .finish_non_exhaustive()
  }
}
