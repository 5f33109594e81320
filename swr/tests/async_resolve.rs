mod common;

use common::{CallCounter, UpstreamError};
use fibre_swr::{AsyncSwrCache, CacheBuilder, ManualClock, ResolveError, ServedState};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Barrier;
use tokio::time::{sleep, timeout, Duration};

type AsyncTestCache = AsyncSwrCache<String, String, UpstreamError>;

fn build_async_cache() -> (AsyncTestCache, Arc<ManualClock>) {
  let clock = Arc::new(ManualClock::new());
  let cache = CacheBuilder::new()
    .clock(clock.clone())
    .time_to_live(Duration::from_secs(10))
    .build_async()
    .unwrap();
  (cache, clock)
}

async fn wait_for_refresh(cache: &AsyncTestCache, key: &String) {
  for _ in 0..1000 {
    if !cache.is_refreshing(key) {
      return;
    }
    sleep(Duration::from_millis(5)).await;
  }
  panic!("refresh did not finish in time");
}

#[tokio::test]
async fn test_async_loader_miss_then_fresh() {
  let calls = CallCounter::default();
  let cache: AsyncTestCache = CacheBuilder::new()
    .async_loader({
      let calls = calls.clone();
      move |key: String| {
        let calls = calls.clone();
        async move {
          calls.hit();
          Ok(key.repeat(2))
        }
      }
    })
    .build_async()
    .unwrap();

  let key = "ab".to_string();
  let first = cache.resolve(&key).await.unwrap();
  assert_eq!(first.state(), ServedState::MissFetchedSynchronously);
  assert_eq!(*first, "abab");

  let second = cache.resolve(&key).await.unwrap();
  assert_eq!(second.state(), ServedState::Fresh);
  assert_eq!(calls.get(), 1);
  assert_eq!(cache.metrics().inserts, 1);
}

#[tokio::test]
async fn test_async_sync_loader_is_accepted() {
  let cache: AsyncTestCache = CacheBuilder::new()
    .loader(|key: &String| Ok(key.to_uppercase()))
    .build_async()
    .unwrap();

  assert_eq!(*cache.resolve(&"nba".to_string()).await.unwrap(), "NBA");
}

#[tokio::test]
async fn test_async_resolve_without_loader_fails() {
  let (cache, _clock) = build_async_cache();
  let err = cache.resolve(&"k".to_string()).await.unwrap_err();
  assert!(matches!(err, ResolveError::NoLoader));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_async_thundering_herd_fetches_once() {
  let (cache, _clock) = build_async_cache();
  let calls = CallCounter::default();
  let num_tasks = 20;
  let barrier = Arc::new(Barrier::new(num_tasks));

  let mut tasks = vec![];
  for _ in 0..num_tasks {
    let cache = cache.clone();
    let calls = calls.clone();
    let barrier = barrier.clone();
    tasks.push(tokio::spawn(async move {
      barrier.wait().await;
      let resolved = cache
        .resolve_with(&"hot".to_string(), move |key: String| async move {
          calls.hit();
          // Simulate a slow upstream call.
          sleep(Duration::from_millis(100)).await;
          Ok(format!("{key}!"))
        })
        .await
        .unwrap();
      assert_eq!(*resolved, "hot!");
      resolved.state()
    }));
  }

  let mut leaders = 0;
  for task in tasks {
    if task.await.unwrap() == ServedState::MissFetchedSynchronously {
      leaders += 1;
    }
  }
  assert_eq!(leaders, 1);
  assert_eq!(calls.get(), 1, "loader should only be called once");
  assert_eq!(cache.metrics().misses, 1);
}

#[tokio::test]
async fn test_async_stale_read_returns_immediately() {
  let (cache, clock) = build_async_cache();
  let key = "slow".to_string();
  cache.insert(key.clone(), "stale".to_string(), None);
  clock.advance(Duration::from_secs(15));

  let calls = CallCounter::default();
  let slow_fetch = |calls: CallCounter| {
    move |_: String| async move {
      calls.hit();
      sleep(Duration::from_secs(10)).await;
      Ok::<_, UpstreamError>("eventually".to_string())
    }
  };

  let start = Instant::now();
  let first = cache.resolve_with(&key, slow_fetch(calls.clone())).await.unwrap();
  let second = cache.resolve_with(&key, slow_fetch(calls.clone())).await.unwrap();
  assert!(start.elapsed() < Duration::from_millis(50));

  assert_eq!(first.state(), ServedState::StaleServedWithRefreshTriggered);
  assert_eq!(second.state(), ServedState::StaleServedRefreshAlreadyRunning);
  assert_eq!(*second, "stale");

  // Give the spawned refresh a chance to start.
  sleep(Duration::from_millis(20)).await;
  assert_eq!(calls.get(), 1);
  assert!(cache.is_refreshing(&key));
}

#[tokio::test]
async fn test_async_failed_refresh_keeps_stale_value() {
  let (cache, clock) = build_async_cache();
  let key = "flaky".to_string();
  cache.insert(key.clone(), "last good".to_string(), None);
  clock.advance(Duration::from_secs(11));

  let resolved = cache
    .resolve_with(&key, |_: String| async {
      Err::<String, _>(UpstreamError("502".into()))
    })
    .await
    .unwrap();
  assert_eq!(*resolved, "last good");
  wait_for_refresh(&cache, &key).await;

  assert_eq!(*cache.peek(&key).unwrap().value(), "last good");
  assert_eq!(cache.metrics().refreshes_failed, 1);
}

#[tokio::test]
async fn test_async_failed_miss_propagates() {
  let (cache, _clock) = build_async_cache();
  let key = "down".to_string();

  let err = cache
    .resolve_with(&key, |_: String| async {
      Err::<String, _>(UpstreamError("down".into()))
    })
    .await
    .unwrap_err();
  assert_eq!(err.upstream(), Some(&UpstreamError("down".into())));
  assert!(cache.peek(&key).is_none());
  assert_eq!(cache.in_flight(), 0);
}

#[tokio::test]
async fn test_async_panicking_fetch_is_abandoned() {
  let (cache, _clock) = build_async_cache();
  let key = "boom".to_string();

  let err = cache
    .resolve_with(&key, |_: String| async {
      if true {
        panic!("upstream client bug");
      }
      Ok::<String, UpstreamError>(String::new())
    })
    .await
    .unwrap_err();
  assert!(matches!(err, ResolveError::Abandoned));
  assert_eq!(cache.in_flight(), 0);

  let resolved = cache
    .resolve_with(&key, |_: String| async { Ok::<_, UpstreamError>("ok".to_string()) })
    .await
    .unwrap();
  assert_eq!(resolved.state(), ServedState::MissFetchedSynchronously);
}

#[tokio::test]
async fn test_cancelled_caller_does_not_cancel_fetch() {
  let (cache, _clock) = build_async_cache();
  let key = "cancel".to_string();
  let calls = CallCounter::default();

  let fetch = {
    let calls = calls.clone();
    move |_: String| async move {
      calls.hit();
      sleep(Duration::from_millis(50)).await;
      Ok::<_, UpstreamError>("done".to_string())
    }
  };

  let cancelled = timeout(Duration::from_millis(5), cache.resolve_with(&key, fetch)).await;
  assert!(cancelled.is_err());

  wait_for_refresh(&cache, &key).await;
  let resolved = cache
    .resolve_with(&key, |_: String| async {
      Ok::<_, UpstreamError>("refetched".to_string())
    })
    .await
    .unwrap();
  assert_eq!(resolved.state(), ServedState::Fresh);
  assert_eq!(*resolved, "done");
  assert_eq!(calls.get(), 1);
}

#[test]
fn test_build_async_outside_runtime_requires_spawner() {
  let result = CacheBuilder::<String, String, UpstreamError>::new().build_async();
  assert!(matches!(result, Err(fibre_swr::BuildError::SpawnerRequired)));
}
