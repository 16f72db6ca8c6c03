use crate::error::BoxError;
use crate::runtime::TaskSpawner;

use std::collections::HashMap;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;

use futures_util::future::{self, BoxFuture, FutureExt};

/// Computes values for a synchronous loading cache.
///
/// Returning `Ok(None)` means the key has no value; nothing is cached and the
/// attempt counts as a load failure in the statistics.
pub trait CacheLoader<K, V>: Send + Sync + 'static {
  fn load(&self, key: &K) -> Result<Option<V>, BoxError>;

  /// Computes a replacement for an entry that is already cached. Used by
  /// `refresh`. Defaults to `load`.
  fn reload(&self, key: &K, old_value: &V) -> Result<Option<V>, BoxError> {
    let _ = old_value;
    self.load(key)
  }

  /// Whether `load_all` is a real bulk implementation. When `false` the cache
  /// loads missing keys one at a time.
  fn supports_bulk_load(&self) -> bool {
    false
  }

  /// Loads several keys at once. Only called when `supports_bulk_load` is
  /// `true`. The map may contain fewer keys than requested, or extra keys.
  fn load_all(&self, keys: &[K]) -> Result<HashMap<K, V>, BoxError>
  where
    K: Clone + Eq + Hash,
  {
    let mut loaded = HashMap::with_capacity(keys.len());
    for key in keys {
      if let Some(value) = self.load(key)? {
        loaded.insert(key.clone(), value);
      }
    }
    Ok(loaded)
  }
}

/// The future returned by an asynchronous load.
pub type LoadFutureOutput<V> = BoxFuture<'static, Result<Option<V>, BoxError>>;

/// Computes values for an [`AsyncLoadingCache`](crate::AsyncLoadingCache).
pub trait AsyncCacheLoader<K, V>: Send + Sync + 'static {
  fn async_load(&self, key: K) -> LoadFutureOutput<V>;

  /// Computes a replacement for an entry that already holds `old_value`.
  /// Defaults to `async_load`.
  fn async_reload(&self, key: K, old_value: Arc<V>) -> LoadFutureOutput<V> {
    drop(old_value);
    self.async_load(key)
  }

  /// Whether `async_load_all` is a real bulk implementation.
  fn supports_async_bulk_load(&self) -> bool {
    false
  }

  /// Loads several keys with one request. Only called when
  /// `supports_async_bulk_load` is `true`.
  fn async_load_all(&self, keys: Vec<K>) -> BoxFuture<'static, Result<HashMap<K, V>, BoxError>>
  where
    K: Clone + Eq + Hash + Send + 'static,
    V: Send + 'static,
  {
    let loads = keys
      .into_iter()
      .map(|key| {
        let load = self.async_load(key.clone());
        async move { (key, load.await) }
      })
      .collect::<Vec<_>>();
    async move {
      let mut loaded = HashMap::with_capacity(loads.len());
      for (key, result) in future::join_all(loads).await {
        if let Some(value) = result? {
          loaded.insert(key, value);
        }
      }
      Ok(loaded)
    }
    .boxed()
  }
}

/// Adapts a closure into a [`CacheLoader`].
pub struct FnLoader<F> {
  f: F,
}

impl<F> FnLoader<F> {
  pub fn new(f: F) -> Self {
    Self { f }
  }
}

impl<K, V, F> CacheLoader<K, V> for FnLoader<F>
where
  F: Fn(&K) -> Result<Option<V>, BoxError> + Send + Sync + 'static,
{
  fn load(&self, key: &K) -> Result<Option<V>, BoxError> {
    (self.f)(key)
  }
}

/// Adapts a closure returning a future into an [`AsyncCacheLoader`].
pub struct AsyncFnLoader<F> {
  f: F,
}

impl<F> AsyncFnLoader<F> {
  pub fn new(f: F) -> Self {
    Self { f }
  }
}

impl<K, V, F> AsyncCacheLoader<K, V> for AsyncFnLoader<F>
where
  F: Fn(K) -> LoadFutureOutput<V> + Send + Sync + 'static,
{
  fn async_load(&self, key: K) -> LoadFutureOutput<V> {
    (self.f)(key)
  }
}

/// Runs a synchronous [`CacheLoader`] as an [`AsyncCacheLoader`].
///
/// Each load is handed to the spawner's `spawn_blocking`, so a blocking
/// loader never runs on the task that requested it, nor on a Tokio worker
/// thread. Bulk support mirrors the wrapped loader.
pub struct SyncLoaderAdapter<K, V, L> {
  loader: Arc<L>,
  spawner: Arc<dyn TaskSpawner>,
  _marker: PhantomData<fn(K) -> V>,
}

impl<K, V, L> SyncLoaderAdapter<K, V, L> {
  pub(crate) fn new(loader: L, spawner: Arc<dyn TaskSpawner>) -> Self {
    Self {
      loader: Arc::new(loader),
      spawner,
      _marker: PhantomData,
    }
  }

  /// Runs `job` as a blocking job on the spawner and returns a future for its
  /// result. A panic inside `job` resumes in whoever awaits the returned
  /// future.
  fn run<T, J>(&self, job: J) -> BoxFuture<'static, Result<T, BoxError>>
  where
    T: Send + 'static,
    J: FnOnce(&L) -> Result<T, BoxError> + Send + 'static,
    L: Send + Sync + 'static,
  {
    let loader = self.loader.clone();
    let (remote, handle) = async move { job(&loader) }.remote_handle();
    self
      .spawner
      .spawn_blocking(Box::new(move || futures_executor::block_on(remote)));
    handle.boxed()
  }
}

impl<K, V, L> AsyncCacheLoader<K, V> for SyncLoaderAdapter<K, V, L>
where
  K: Clone + Eq + Hash + Send + Sync + 'static,
  V: Send + Sync + 'static,
  L: CacheLoader<K, V>,
{
  fn async_load(&self, key: K) -> LoadFutureOutput<V> {
    self.run(move |loader| loader.load(&key))
  }

  fn async_reload(&self, key: K, old_value: Arc<V>) -> LoadFutureOutput<V> {
    self.run(move |loader| loader.reload(&key, &old_value))
  }

  fn supports_async_bulk_load(&self) -> bool {
    self.loader.supports_bulk_load()
  }

  fn async_load_all(&self, keys: Vec<K>) -> BoxFuture<'static, Result<HashMap<K, V>, BoxError>> {
    self.run(move |loader| loader.load_all(&keys))
  }
}
