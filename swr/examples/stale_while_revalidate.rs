use fibre_swr::{CacheBuilder, ServedState, SwrCache};
use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
struct Data {
  version: usize,
  content: String,
}

fn main() {
  let load_counter = Arc::new(AtomicUsize::new(0));

  let cache: SwrCache<String, Data, std::io::Error> = CacheBuilder::default()
    .time_to_live(Duration::from_secs(2))
    .stale_hint(Duration::from_secs(10))
    .loader({
      let counter = load_counter.clone();
      move |key: &String| {
        let version = counter.fetch_add(1, Ordering::SeqCst) + 1;
        println!("[Loader] Loading version {} for key '{}'...", version, key);
        thread::sleep(Duration::from_millis(500)); // Simulate slow upstream
        Ok(Data {
          version,
          content: format!("Content for {} - version {}", key, version),
        })
      }
    })
    .build()
    .unwrap();

  let key = "my-data".to_string();

  println!("--- Step 1: Initial Load ---");
  let value1 = cache.resolve(&key).unwrap();
  println!("Received: {:?} ({:?})", *value1, value1.state());
  assert_eq!(value1.state(), ServedState::MissFetchedSynchronously);

  println!("\n--- Step 2: Cache Hit (Fresh) ---");
  let value2 = cache.resolve(&key).unwrap();
  println!("Received: {:?} ({:?})", *value2, value2.state());
  assert_eq!(value2.version, 1);
  assert_eq!(load_counter.load(Ordering::Relaxed), 1);

  println!("\n--- Step 3: Wait for TTL to expire (3 seconds) ---");
  thread::sleep(Duration::from_secs(3));

  println!("\n--- Step 4: Stale Read ---");
  let value3 = cache.resolve(&key).unwrap();
  println!("IMMEDIATELY Received (stale): {:?} ({:?})", *value3, value3.state());
  println!("Cache-Control: {}, Age: {}", value3.cache_control(), value3.age_header());
  assert_eq!(value3.version, 1, "Should return stale version 1 immediately");

  let value4 = cache.resolve(&key).unwrap();
  println!("Second stale read: {:?}", value4.state());

  println!("\n--- Step 5: Wait for Background Refresh to Complete ---");
  thread::sleep(Duration::from_secs(1));
  assert_eq!(
    load_counter.load(Ordering::Relaxed),
    2,
    "Loader should have been called exactly one more time"
  );

  println!("\n--- Step 6: Final Read (Fresh) ---");
  let value5 = cache.resolve(&key).unwrap();
  println!("Received (refreshed): {:?}", *value5);
  assert_eq!(value5.version, 2, "Should now have the refreshed version 2");

  println!("\nCache metrics: {:#?}", cache.metrics());
}
