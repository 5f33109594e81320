//! TTL policies decide how long a freshly fetched value stays fresh.
//!
//! The cache itself is policy-agnostic: it asks the policy once per write and
//! stores the answer in the entry.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::time::Duration;

/// Maps a fetched value to the duration it should be considered fresh.
pub trait TtlPolicy<V>: Send + Sync {
  fn ttl_for(&self, value: &V) -> Duration;
}

impl<V, F> TtlPolicy<V> for F
where
  F: Fn(&V) -> Duration + Send + Sync,
{
  #[inline]
  fn ttl_for(&self, value: &V) -> Duration {
    self(value)
  }
}

/// The same TTL for every value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedTtl(pub Duration);

impl<V> TtlPolicy<V> for FixedTtl {
  #[inline]
  fn ttl_for(&self, _value: &V) -> Duration {
    self.0
  }
}

/// A policy that classifies each value into a tier and gives every tier its
/// own TTL.
///
/// The classifier is supplied by the caller; this type does not know what a
/// tier means. A typical use maps settled records to a long TTL and records
/// that are still changing to a short one:
///
/// ```
/// use std::time::Duration;
/// use fibre_swr::policy::{TieredTtl, TtlPolicy};
///
/// struct Game { status: &'static str }
///
/// let policy = TieredTtl::new(
///   |game: &Game| if game.status == "final" { "final" } else { "live" },
///   Duration::from_secs(60),
/// )
/// .tier("final", Duration::from_secs(24 * 60 * 60))
/// .tier("live", Duration::from_secs(10));
///
/// assert_eq!(policy.ttl_for(&Game { status: "final" }), Duration::from_secs(86_400));
/// assert_eq!(policy.ttl_for(&Game { status: "in_progress" }), Duration::from_secs(10));
/// ```
pub struct TieredTtl<V, C> {
  classify: Box<dyn Fn(&V) -> C + Send + Sync>,
  tiers: HashMap<C, Duration>,
  fallback: Duration,
}

impl<V, C> TieredTtl<V, C>
where
  C: Eq + Hash,
{
  /// Creates a policy with no tiers; every value gets `fallback` until tiers
  /// are added with [`tier`](Self::tier).
  pub fn new<F>(classify: F, fallback: Duration) -> Self
  where
    F: Fn(&V) -> C + Send + Sync + 'static,
  {
    Self {
      classify: Box::new(classify),
      tiers: HashMap::new(),
      fallback,
    }
  }

  /// Assigns `ttl` to values classified as `class`.
  pub fn tier(mut self, class: C, ttl: Duration) -> Self {
    self.tiers.insert(class, ttl);
    self
  }

  /// Adds every `(class, ttl)` pair from `tiers`.
  pub fn tiers<I>(mut self, tiers: I) -> Self
  where
    I: IntoIterator<Item = (C, Duration)>,
  {
    self.tiers.extend(tiers);
    self
  }

  /// Returns the tier `value` falls into.
  pub fn classify(&self, value: &V) -> C {
    (self.classify)(value)
  }

  pub fn fallback(&self) -> Duration {
    self.fallback
  }
}

impl<V, C> TtlPolicy<V> for TieredTtl<V, C>
where
  C: Eq + Hash + Send + Sync,
{
  fn ttl_for(&self, value: &V) -> Duration {
    let class = self.classify(value);
    self.tiers.get(&class).copied().unwrap_or(self.fallback)
  }
}

impl<V, C: fmt::Debug> fmt::Debug for TieredTtl<V, C> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TieredTtl")
      .field("tiers", &self.tiers)
      .field("fallback", &self.fallback)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[derive(Debug)]
  struct Event {
    state: String,
  }

  fn event(state: &str) -> Event {
    Event {
      state: state.to_string(),
    }
  }

  #[test]
  fn fixed_ttl_ignores_value() {
    let policy = FixedTtl(Duration::from_secs(5));
    assert_eq!(TtlPolicy::<u8>::ttl_for(&policy, &1), Duration::from_secs(5));
  }

  #[test]
  fn closures_are_policies() {
    let policy = |n: &u64| Duration::from_secs(*n);
    assert_eq!(TtlPolicy::<u64>::ttl_for(&policy, &7), Duration::from_secs(7));
  }

  #[test]
  fn tiered_ttl_uses_tier_then_fallback() {
    let policy = TieredTtl::new(|e: &Event| e.state.clone(), Duration::from_secs(30))
      .tier("final".to_string(), Duration::from_secs(86_400))
      .tier("live".to_string(), Duration::from_secs(10));

    assert_eq!(policy.ttl_for(&event("final")), Duration::from_secs(86_400));
    assert_eq!(policy.ttl_for(&event("live")), Duration::from_secs(10));
    assert_eq!(policy.ttl_for(&event("postponed")), Duration::from_secs(30));
  }

  #[test]
  fn tiers_can_be_bulk_loaded() {
    let policy = TieredTtl::new(|n: &u32| *n % 2 == 0, Duration::ZERO)
      .tiers([(true, Duration::from_secs(2)), (false, Duration::from_secs(1))]);
    assert_eq!(policy.ttl_for(&4), Duration::from_secs(2));
    assert_eq!(policy.ttl_for(&3), Duration::from_secs(1));
  }
}
