mod common;

use common::{build_test_cache, seed_stale, wait_until, CallCounter, UpstreamError, TTL};
use fibre_swr::{CacheBuilder, Clock, ResolveError, ServedState, SwrCache};
use std::time::Duration;

#[test]
fn test_miss_then_fresh_hit() {
  let (cache, clock) = build_test_cache();
  let calls = CallCounter::default();
  let key = "odds?sport=nba".to_string();

  let fetch = {
    let calls = calls.clone();
    move |key: &String| {
      calls.hit();
      Ok(format!("{key} v1"))
    }
  };

  let first = cache.resolve_with(&key, fetch.clone()).unwrap();
  assert_eq!(first.state(), ServedState::MissFetchedSynchronously);
  assert_eq!(*first, "odds?sport=nba v1");
  assert_eq!(first.ttl(), TTL);
  assert_eq!(calls.get(), 1);

  // Exactly at the TTL boundary an entry is still fresh.
  clock.advance(TTL);
  let second = cache.resolve_with(&key, fetch).unwrap();
  assert_eq!(second.state(), ServedState::Fresh);
  assert_eq!(second.age(), TTL);
  assert_eq!(calls.get(), 1, "fresh hit must not call upstream");

  let metrics = cache.metrics();
  assert_eq!(metrics.misses, 1);
  assert_eq!(metrics.fresh_hits, 1);
  assert_eq!(metrics.inserts, 1);
}

#[test]
fn test_stale_hit_refreshes_in_background() {
  let (cache, clock) = build_test_cache();
  let key = "standings".to_string();
  seed_stale(&cache, &clock, &key, "old");

  let resolved = cache
    .resolve_with(&key, |_: &String| Ok("new".to_string()))
    .unwrap();
  assert_eq!(resolved.state(), ServedState::StaleServedWithRefreshTriggered);
  assert_eq!(*resolved, "old");
  assert_eq!(resolved.age(), Duration::from_secs(15));

  wait_until(|| !cache.is_refreshing(&key));

  // The refreshed entry is stamped with the clock reading at completion.
  let entry = cache.peek(&key).unwrap();
  assert_eq!(*entry.value(), "new");
  assert_eq!(entry.fetched_at(), clock.now());

  let after = cache
    .resolve_with(&key, |_: &String| -> Result<String, UpstreamError> {
      panic!("fresh entry must not be fetched")
    })
    .unwrap();
  assert_eq!(after.state(), ServedState::Fresh);
  assert_eq!(*after, "new");

  let metrics = cache.metrics();
  assert_eq!(metrics.stale_hits, 1);
  assert_eq!(metrics.refreshes_started, 1);
  assert_eq!(metrics.refreshes_succeeded, 1);
}

#[test]
fn test_resolve_uses_bound_loader() {
  let calls = CallCounter::default();
  let cache: SwrCache<u32, u32, UpstreamError> = CacheBuilder::new()
    .loader({
      let calls = calls.clone();
      move |key: &u32| {
        calls.hit();
        Ok(key * 10)
      }
    })
    .build()
    .unwrap();

  assert_eq!(*cache.resolve(&4).unwrap(), 40);
  assert_eq!(*cache.resolve(&4).unwrap(), 40);
  assert_eq!(calls.get(), 1);
}

#[test]
fn test_resolve_without_loader_fails() {
  let (cache, _clock) = build_test_cache();
  let err = cache.resolve(&"anything".to_string()).unwrap_err();
  assert!(matches!(err, ResolveError::NoLoader));
  assert!(cache.is_empty());
}

#[test]
fn test_per_call_policy_overrides_configured_ttl() {
  let (cache, clock) = build_test_cache();
  let key = "final:7".to_string();

  let resolved = cache
    .resolve_with_policy(
      &key,
      |_: &String| Duration::from_secs(3600),
      |_: &String| Ok("3-2".to_string()),
    )
    .unwrap();
  assert_eq!(resolved.ttl(), Duration::from_secs(3600));

  clock.advance(Duration::from_secs(600));
  let again = cache
    .resolve_with(&key, |_: &String| Ok("ignored".to_string()))
    .unwrap();
  assert_eq!(again.state(), ServedState::Fresh);
  assert_eq!(*again, "3-2");
}

#[test]
fn test_insert_overrides_ttl() {
  let (cache, clock) = build_test_cache();
  let entry = cache.insert("k".to_string(), "v".to_string(), Some(Duration::from_secs(1)));
  assert_eq!(entry.ttl(), Duration::from_secs(1));
  assert_eq!(cache.len(), 1);

  clock.advance(Duration::from_secs(2));
  assert!(cache.peek(&"k".to_string()).unwrap().is_stale(clock.now()));
}

#[test]
fn test_cache_control_headers() {
  let clock = std::sync::Arc::new(fibre_swr::ManualClock::new());
  let cache: SwrCache<String, String, UpstreamError> = CacheBuilder::new()
    .clock(clock.clone())
    .time_to_live(Duration::from_secs(10))
    .stale_hint(Duration::from_secs(30))
    .build()
    .unwrap();

  let key = "scores".to_string();
  cache.resolve_with(&key, |_: &String| Ok("x".to_string())).unwrap();
  clock.advance(Duration::from_millis(4_500));

  let resolved = cache.resolve_with(&key, |_: &String| Ok("y".to_string())).unwrap();
  assert_eq!(resolved.cache_control(), "max-age=10, stale-while-revalidate=30");
  assert_eq!(resolved.age_header(), "4");
}
