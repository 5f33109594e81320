use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

pub(crate) type SyncFetch<K, V, E> = Arc<dyn Fn(&K) -> Result<V, E> + Send + Sync>;
pub(crate) type AsyncFetch<K, V, E> =
  Arc<dyn Fn(K) -> BoxFuture<'static, Result<V, E>> + Send + Sync>;

/// The upstream fetch function bound to a cache at construction.
///
/// `resolve` uses it for misses and background refreshes; `resolve_with`
/// bypasses it with a per-call fetch.
pub(crate) enum Loader<K, V, E> {
  Sync(SyncFetch<K, V, E>),
  Async(AsyncFetch<K, V, E>),
}

impl<K, V, E> Clone for Loader<K, V, E> {
  fn clone(&self) -> Self {
    match self {
      Loader::Sync(f) => Loader::Sync(f.clone()),
      Loader::Async(f) => Loader::Async(f.clone()),
    }
  }
}

impl<K, V, E> Loader<K, V, E>
where
  K: Send + 'static,
  V: Send + 'static,
  E: Send + 'static,
{
  pub(crate) fn from_async<F, Fut>(f: F) -> Self
  where
    F: Fn(K) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
  {
    Loader::Async(Arc::new(move |key| f(key).boxed()))
  }

  /// Produces a one-shot async fetch for `key`.
  ///
  /// A sync loader runs inline on whichever runtime worker polls the future,
  /// so it blocks that worker for the duration of the fetch.
  pub(crate) fn fetch_async(&self, key: K) -> BoxFuture<'static, Result<V, E>> {
    match self {
      Loader::Async(f) => f(key),
      Loader::Sync(f) => {
        let f = f.clone();
        async move { f(&key) }.boxed()
      }
    }
  }
}
