use crate::error::{BoxError, BuildError};
use crate::future::LoadFuture;
use crate::handles::futures::AsyncRemovalListener;
use crate::handles::{AsyncLoadingCache, Cache, LoadingCache};
use crate::listener::RemovalListener;
use crate::loader::{AsyncCacheLoader, AsyncFnLoader, CacheLoader, FnLoader, LoadFutureOutput, SyncLoaderAdapter};
use crate::runtime::{default_spawner, TaskSpawner};
use crate::shared::CacheShared;
use crate::stats::StatsRecorder;
use crate::store::ShardedStore;
use crate::time::{DisabledTicker, SystemTicker, Ticker};

use core::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

/// A builder for every cache flavor.
///
/// ```
/// use tessera_cache::CacheBuilder;
///
/// let cache = CacheBuilder::<String, u64>::new()
///   .record_stats(true)
///   .build()
///   .unwrap();
/// cache.put("answer".to_string(), 42);
/// assert_eq!(cache.get_if_present("answer").as_deref(), Some(&42));
/// ```
pub struct CacheBuilder<K: Send, V: Send + Sync, H = ahash::RandomState> {
  initial_capacity: usize,
  shards: usize,
  hasher: H,
  record_stats: bool,
  ticker: Option<Arc<dyn Ticker>>,
  listener: Option<Arc<dyn RemovalListener<K, V>>>,
  spawner: Option<Arc<dyn TaskSpawner>>,
}

// Manual Debug implementation for CacheBuilder.
impl<K: Send, V: Send + Sync, H> fmt::Debug for CacheBuilder<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheBuilder")
      .field("initial_capacity", &self.initial_capacity)
      .field("shards", &self.shards)
      .field("record_stats", &self.record_stats)
      .field("has_listener", &self.listener.is_some())
      .field("has_spawner", &self.spawner.is_some())
      .finish_non_exhaustive()
  }
}

// --- General Configuration Methods ---
impl<K: Send, V: Send + Sync, H> CacheBuilder<K, V, H> {
  /// Pre-sizes the storage for about `capacity` entries.
  pub fn initial_capacity(mut self, capacity: usize) -> Self {
    self.initial_capacity = capacity;
    self
  }

  /// Sets the number of lock shards, rounded up to a power of two. Zero is
  /// rejected when the cache is built.
  pub fn shards(mut self, shards: usize) -> Self {
    self.shards = if shards == 0 { 0 } else { shards.next_power_of_two() };
    self
  }

  /// Replaces the hasher used to pick shards and to hash keys within them.
  pub fn hasher<H2>(self, hasher: H2) -> CacheBuilder<K, V, H2> {
    CacheBuilder {
      initial_capacity: self.initial_capacity,
      shards: self.shards,
      hasher,
      record_stats: self.record_stats,
      ticker: self.ticker,
      listener: self.listener,
      spawner: self.spawner,
    }
  }

  /// Enables hit, miss and load statistics. Off by default.
  pub fn record_stats(mut self, enabled: bool) -> Self {
    self.record_stats = enabled;
    self
  }

  /// Sets the time source used to measure loads. Only consulted when
  /// statistics are enabled.
  pub fn ticker<T: Ticker>(mut self, ticker: T) -> Self {
    self.ticker = Some(Arc::new(ticker));
    self
  }

  /// Registers a listener that receives every removal and replacement.
  ///
  /// Notifications are delivered in order on a dedicated thread, after the
  /// change they describe is visible. A panicking listener is logged and
  /// does not affect the cache.
  pub fn removal_listener<L>(mut self, listener: L) -> Self
  where
    L: RemovalListener<K, V> + 'static,
  {
    self.listener = Some(Arc::new(listener));
    self
  }

  /// Sets the execution context for async loads, bulk loads and refreshes.
  ///
  /// Defaults to the current Tokio runtime when there is one (with the
  /// `tokio` feature), and to [`ThreadSpawner`](crate::ThreadSpawner)
  /// otherwise.
  pub fn spawner(mut self, spawner: Arc<dyn TaskSpawner>) -> Self {
    self.spawner = Some(spawner);
    self
  }
}

// --- Default Constructor ---
impl<K: Send, V: Send + Sync, H: BuildHasher + Default> CacheBuilder<K, V, H> {
  /// Creates a new `CacheBuilder` with default settings.
  pub fn new() -> Self {
    Self {
      initial_capacity: 0,
      shards: (num_cpus::get() * 4).max(1).next_power_of_two(),
      hasher: H::default(),
      record_stats: false,
      ticker: None,
      listener: None,
      spawner: None,
    }
  }
}

impl<K: Send, V: Send + Sync> Default for CacheBuilder<K, V, ahash::RandomState> {
  fn default() -> Self {
    Self::new()
  }
}

// --- Build Methods ---
impl<K, V, H> CacheBuilder<K, V, H>
where
  K: Clone + Eq + Hash + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// Builds a [`Cache`] whose entries are added manually.
  pub fn build(mut self) -> Result<Cache<K, V, H>, BuildError> {
    self.validate()?;
    let listener = self.listener.take();
    let spawner = self.resolve_spawner();
    Ok(Cache {
      shared: self.assemble(listener, spawner),
    })
  }

  /// Builds a [`LoadingCache`] that computes absent values with `loader`.
  pub fn build_with<L>(mut self, loader: L) -> Result<LoadingCache<K, V, H>, BuildError>
  where
    L: CacheLoader<K, V>,
  {
    self.validate()?;
    let listener = self.listener.take();
    let spawner = self.resolve_spawner();
    let shared = self.assemble(listener, spawner);
    Ok(LoadingCache::new(shared, Arc::new(loader)))
  }

  /// Like [`build_with`](Self::build_with), for a loader closure.
  pub fn build_with_fn<F>(self, f: F) -> Result<LoadingCache<K, V, H>, BuildError>
  where
    F: Fn(&K) -> Result<Option<V>, BoxError> + Send + Sync + 'static,
  {
    self.build_with(FnLoader::new(f))
  }

  /// Builds an [`AsyncLoadingCache`] that loads absent values with `loader`.
  pub fn build_async<L>(mut self, loader: L) -> Result<AsyncLoadingCache<K, V, H>, BuildError>
  where
    L: AsyncCacheLoader<K, V>,
  {
    self.validate()?;
    let spawner = self.resolve_spawner();
    self.build_async_inner(Arc::new(loader), spawner)
  }

  /// Like [`build_async`](Self::build_async), for a closure returning a boxed
  /// future.
  pub fn build_async_fn<F>(self, f: F) -> Result<AsyncLoadingCache<K, V, H>, BuildError>
  where
    F: Fn(K) -> LoadFutureOutput<V> + Send + Sync + 'static,
  {
    self.build_async(AsyncFnLoader::new(f))
  }

  /// Builds an [`AsyncLoadingCache`] around a synchronous loader. Each load
  /// runs as a task on the cache's spawner.
  pub fn build_async_from<L>(mut self, loader: L) -> Result<AsyncLoadingCache<K, V, H>, BuildError>
  where
    L: CacheLoader<K, V>,
  {
    self.validate()?;
    let spawner = self.resolve_spawner();
    let adapter = SyncLoaderAdapter::new(loader, spawner.clone());
    self.build_async_inner(Arc::new(adapter), spawner)
  }

  fn build_async_inner(
    mut self,
    loader: Arc<dyn AsyncCacheLoader<K, V>>,
    spawner: Arc<dyn TaskSpawner>,
  ) -> Result<AsyncLoadingCache<K, V, H>, BuildError> {
    let listener = self.listener.take().map(|listener| {
      Arc::new(AsyncRemovalListener::new(listener)) as Arc<dyn RemovalListener<K, LoadFuture<V>>>
    });
    let shared = self.assemble(listener, spawner);
    Ok(AsyncLoadingCache::new(shared, loader))
  }

  fn validate(&self) -> Result<(), BuildError> {
    if self.shards == 0 {
      return Err(BuildError::ZeroShards);
    }
    Ok(())
  }

  fn resolve_spawner(&mut self) -> Arc<dyn TaskSpawner> {
    self.spawner.take().unwrap_or_else(default_spawner)
  }

  /// Central logic to construct the shared core of the cache.
  fn assemble<T>(
    self,
    listener: Option<Arc<dyn RemovalListener<K, T>>>,
    spawner: Arc<dyn TaskSpawner>,
  ) -> Arc<CacheShared<K, T, H>>
  where
    T: Send + Sync + 'static,
  {
    tracing::debug!(
      shards = self.shards,
      initial_capacity = self.initial_capacity,
      record_stats = self.record_stats,
      has_listener = listener.is_some(),
      "building cache"
    );

    let ticker: Arc<dyn Ticker> = if self.record_stats {
      self.ticker.unwrap_or_else(|| Arc::new(SystemTicker))
    } else {
      Arc::new(DisabledTicker)
    };
    let stats = StatsRecorder::new(self.record_stats, ticker);
    let store = ShardedStore::new(self.shards, self.initial_capacity, self.hasher);
    Arc::new(CacheShared::new(store, stats, listener, spawner))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rejects_zero_shards() {
    let result = CacheBuilder::<u32, u32>::new().shards(0).build();
    assert_eq!(result.err(), Some(BuildError::ZeroShards));
  }

  #[test]
  fn rounds_shards_to_power_of_two() {
    let cache = CacheBuilder::<u32, u32>::new().shards(5).build().unwrap();
    assert_eq!(cache.shared.store.num_shards(), 8);
  }

  #[test]
  fn stats_follow_the_builder_flag() {
    let cache = CacheBuilder::<u32, u32>::new().build().unwrap();
    assert!(!cache.shared.stats.is_enabled());

    let cache = CacheBuilder::<u32, u32>::new().record_stats(true).build().unwrap();
    assert!(cache.shared.stats.is_enabled());
  }
}
