use crate::error::{BoxError, LoadError};
use crate::future::LoadFuture;
use crate::handles::futures::AsyncLoadingCache;
use crate::policy::UnboundedPolicy;
use crate::stats::StatsSnapshot;

use std::borrow::Borrow;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use futures_util::FutureExt;

/// A blocking view of an [`AsyncLoadingCache`].
///
/// Reads and writes go to the same storage as the asynchronous cache. Lookups
/// that have to load block the calling thread until the load settles, so the
/// view must not be used from inside an async task that the cache's spawner
/// would need to make progress.
pub struct SyncLoadingView<K: Send, V: Send + Sync, H = ahash::RandomState> {
  cache: AsyncLoadingCache<K, V, H>,
}

impl<K: Send, V: Send + Sync, H> Clone for SyncLoadingView<K, V, H> {
  fn clone(&self) -> Self {
    Self {
      cache: self.cache.clone(),
    }
  }
}

impl<K: Send, V: Send + Sync, H> fmt::Debug for SyncLoadingView<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SyncLoadingView")
      .field("cache", &self.cache)
      .finish()
  }
}

impl<K, V, H> SyncLoadingView<K, V, H>
where
  K: Clone + Eq + Hash + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  pub(crate) fn new(cache: AsyncLoadingCache<K, V, H>) -> Self {
    Self { cache }
  }

  /// Returns the value for `key` if its load has completed with one. A
  /// pending load reads as absent.
  pub fn get_if_present<Q>(&self, key: &Q) -> Option<Arc<V>>
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    self
      .cache
      .shared
      .get_if_present(key, true)
      .and_then(|future| future.value_if_ready())
  }

  /// Returns the completed values for `keys`. Keys that are absent or still
  /// loading count as misses.
  pub fn get_all_present<I>(&self, keys: I) -> HashMap<K, Arc<V>>
  where
    I: IntoIterator<Item = K>,
  {
    let shared = &self.cache.shared;
    let mut seen = HashSet::new();
    let mut result = HashMap::new();
    let mut misses = 0;
    for key in keys {
      if !seen.insert(key.clone()) {
        continue;
      }
      match shared.get(&key).and_then(|future| future.value_if_ready()) {
        Some(value) => {
          result.insert(key, value);
        }
        None => misses += 1,
      }
    }
    shared.stats.record_hits(result.len() as u64);
    shared.stats.record_misses(misses);
    result
  }

  /// Returns the value for `key`, loading it if absent and blocking until
  /// the load settles.
  pub fn get(&self, key: K) -> Result<Option<Arc<V>>, LoadError> {
    self.cache.get(key).wait()
  }

  /// Like [`get`](Self::get), computing an absent value with `f` on the
  /// cache's spawner.
  pub fn get_with<F>(&self, key: K, f: F) -> Result<Option<Arc<V>>, LoadError>
  where
    F: FnOnce(&K) -> Result<Option<V>, BoxError> + Send + 'static,
  {
    self
      .cache
      .get_with(key, move |k| {
        let k = k.clone();
        async move { f(&k) }.boxed()
      })
      .wait()
  }

  /// Returns the values for `keys`, loading the absent ones, and blocks
  /// until every load settled. Keys without a value are left out.
  pub fn get_all<I>(&self, keys: I) -> HashMap<K, Arc<V>>
  where
    I: IntoIterator<Item = K>,
  {
    futures_executor::block_on(self.cache.get_all(keys))
  }

  /// Caches `value` as an already completed load.
  pub fn put(&self, key: K, value: V) {
    let future = Arc::new(LoadFuture::completed(Ok(Some(Arc::new(value)))));
    self.cache.shared.put_arc(key, future);
  }

  pub fn put_all<I>(&self, entries: I)
  where
    I: IntoIterator<Item = (K, V)>,
  {
    for (key, value) in entries {
      self.put(key, value);
    }
  }

  pub fn invalidate<Q>(&self, key: &Q)
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    self.cache.invalidate(key);
  }

  pub fn invalidate_all<I>(&self, keys: I)
  where
    I: IntoIterator,
    I::Item: Borrow<K>,
  {
    self.cache.invalidate_all(keys);
  }

  pub fn clear(&self) {
    self.cache.clear();
  }

  pub fn estimated_size(&self) -> u64 {
    self.cache.estimated_size()
  }

  pub fn stats(&self) -> StatsSnapshot {
    self.cache.stats()
  }

  pub fn clean_up(&self) {}

  /// See [`AsyncLoadingCache::refresh`].
  pub fn refresh(&self, key: K) {
    self.cache.refresh(key);
  }

  pub fn policy(&self) -> UnboundedPolicy {
    self.cache.policy()
  }

  /// The asynchronous cache behind this view.
  pub fn as_async(&self) -> &AsyncLoadingCache<K, V, H> {
    &self.cache
  }
}
