//! A process-local stale-while-revalidate cache for slow or rate-limited
//! upstreams.
//!
//! # Features
//! - **Stale-While-Revalidate**: Fresh values are served instantly. Stale
//!   values are served instantly too, while a single background refresh
//!   fetches a replacement.
//! - **Request Coalescing**: Concurrent callers for the same key never cause
//!   more than one upstream fetch at a time, for misses and refreshes alike.
//! - **Sync & Async**: A blocking `SwrCache` and an async `AsyncSwrCache`
//!   share the same core.
//! - **Per-Value TTLs**: A `TtlPolicy` picks the TTL of every fetched value,
//!   e.g. long for settled records and short for ones still changing.
//! - **Observability**: Emits `tracing` events and exposes lock-free metrics.
//!
//! ```
//! use std::time::Duration;
//! use fibre_swr::{CacheBuilder, ServedState, SwrCache};
//!
//! let cache: SwrCache<String, String, std::io::Error> = CacheBuilder::new()
//!   .time_to_live(Duration::from_secs(10))
//!   .loader(|key: &String| Ok(format!("payload for {key}")))
//!   .build()
//!   .unwrap();
//!
//! let first = cache.resolve(&"game:42".to_string()).unwrap();
//! assert_eq!(first.state(), ServedState::MissFetchedSynchronously);
//!
//! let second = cache.resolve(&"game:42".to_string()).unwrap();
//! assert_eq!(second.state(), ServedState::Fresh);
//! assert_eq!(*second, "payload for game:42");
//! ```

// Public modules that form the API
pub mod builder;
#[cfg(feature = "serde")]
pub mod config;
pub mod entry;
pub mod error;
pub mod handles;
pub mod key;
pub mod metrics;
pub mod policy;
pub mod resolved;
pub mod runtime;
pub mod store;
pub mod time;

// Internal, crate-only modules
mod flight;
mod loader;
mod shared;

// Re-export the primary user-facing types for convenience
pub use builder::CacheBuilder;
pub use entry::CacheEntry;
pub use error::{BuildError, ResolveError};
pub use handles::{AsyncSwrCache, SwrCache};
pub use key::RequestKey;
pub use metrics::MetricsSnapshot;
pub use policy::{FixedTtl, TieredTtl, TtlPolicy};
pub use resolved::{Resolved, ServedState};
pub use runtime::TaskSpawner;
#[cfg(feature = "tokio")]
pub use runtime::TokioSpawner;
pub use store::EntryStore;
pub use time::{Clock, ManualClock, SystemClock};
