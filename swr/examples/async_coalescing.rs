use fibre_swr::{AsyncSwrCache, CacheBuilder, RequestKey};
use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};
use tokio::time::{sleep, Duration};

#[derive(Debug, thiserror::Error)]
#[error("rate limited by upstream")]
struct RateLimited;

// A simulated rate-limited odds provider.
async fn fetch_odds(key: RequestKey, load_count: Arc<AtomicUsize>) -> Result<String, RateLimited> {
  println!("--- Upstream: request for {key}. Simulating slow call...");
  load_count.fetch_add(1, Ordering::SeqCst);
  sleep(Duration::from_millis(500)).await;
  Ok(format!("odds for {key}"))
}

#[tokio::main]
async fn main() {
  let load_counter = Arc::new(AtomicUsize::new(0));

  let cache: AsyncSwrCache<RequestKey, String, RateLimited> = CacheBuilder::default()
    .time_to_live(Duration::from_secs(30))
    .async_loader({
      let counter = load_counter.clone();
      move |key: RequestKey| fetch_odds(key, counter.clone())
    })
    .build_async()
    .expect("Failed to build async cache");

  println!("--- Request Coalescing Demonstration ---");
  println!("Spawning 10 tasks asking for the same odds, with parameters in any order.\n");

  let mut tasks = Vec::new();
  for i in 0..10 {
    let cache = cache.clone();
    tasks.push(tokio::spawn(async move {
      let key = if i % 2 == 0 {
        RequestKey::new("/odds").param("sport", "nba").param("date", "2024-03-01")
      } else {
        RequestKey::new("/odds").param("date", "2024-03-01").param("sport", "nba")
      };
      let resolved = cache.resolve(&key).await.unwrap();
      println!("[Task {}] {:?}: {}", i, resolved.state(), *resolved);
    }));
  }

  for task in tasks {
    task.await.unwrap();
  }

  println!("\n--- Verification ---");
  println!(
    "Upstream was called {} time(s).",
    load_counter.load(Ordering::SeqCst)
  );
  assert_eq!(load_counter.load(Ordering::SeqCst), 1);
  println!("\nCache metrics: {:#?}", cache.metrics());
}
