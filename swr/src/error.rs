use std::sync::Arc;

use thiserror::Error;

/// Errors that can occur when building a cache.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
  /// The cache was configured with zero shards.
  #[error("shard count cannot be zero")]
  ZeroShards,
  /// An async cache needs somewhere to run background refreshes: either a
  /// `TaskSpawner`, or the `tokio` feature together with a running runtime.
  #[error("an async cache requires a task spawner or a running tokio runtime")]
  SpawnerRequired,
  /// A blocking cache cannot drive an `async_loader`.
  #[error("an async loader cannot be used with a blocking cache; use build_async()")]
  AsyncLoaderOnBlockingCache,
  /// A configuration value could not be used.
  #[error("invalid configuration value for '{field}': {message}")]
  InvalidConfig { field: String, message: String },
}

/// The error returned by `resolve` when no value can be served.
///
/// Failures of background refreshes never show up here: the caller already
/// got the stale value, and the failure is logged instead.
#[derive(Debug, Error)]
pub enum ResolveError<E>
where
  E: std::error::Error + 'static,
{
  /// The key was not cached and the upstream fetch failed. Nothing was stored,
  /// so the next call fetches again.
  #[error("upstream fetch failed: {0}")]
  Upstream(#[source] Arc<E>),
  /// The key was not cached and the fetch this call was waiting on panicked
  /// or was dropped before finishing.
  #[error("upstream fetch was abandoned before completing")]
  Abandoned,
  /// `resolve` was called on a cache built without a loader.
  #[error("no loader configured; use resolve_with() or set a loader on the builder")]
  NoLoader,
}

impl<E> ResolveError<E>
where
  E: std::error::Error + 'static,
{
  /// Returns the upstream error, if this failure came from the fetch itself.
  pub fn upstream(&self) -> Option<&E> {
    match self {
      ResolveError::Upstream(err) => Some(&**err),
      _ => None,
    }
  }
}
