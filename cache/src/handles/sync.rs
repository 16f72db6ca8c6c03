use crate::error::{BoxError, LoadError};
use crate::handles::map::CacheMap;
use crate::loader::CacheLoader;
use crate::policy::UnboundedPolicy;
use crate::shared::CacheShared;
use crate::stats::{LoadMode, StatsSnapshot};

use std::borrow::Borrow;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::ops::Deref;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use futures_util::FutureExt;

/// A thread-safe, synchronous cache whose entries are added manually.
pub struct Cache<K: Send, V: Send + Sync, H = ahash::RandomState> {
  pub(crate) shared: Arc<CacheShared<K, V, H>>,
}

impl<K: Send, V: Send + Sync, H> Clone for Cache<K, V, H> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

impl<K: Send, V: Send + Sync, H> fmt::Debug for Cache<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Cache").field("shared", &self.shared).finish()
  }
}

impl<K, V, H> Cache<K, V, H>
where
  K: Clone + Eq + Hash + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// Returns the value for `key` if present, recording a hit or a miss.
  pub fn get_if_present<Q>(&self, key: &Q) -> Option<Arc<V>>
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    self.shared.get_if_present(key, true)
  }

  /// Returns the value for `key`, computing it with `f` if absent.
  ///
  /// Concurrent callers for the same key wait for the single running `f`.
  /// If `f` returns `None` nothing is cached. `f` runs while the key's shard
  /// is locked and must not access this cache.
  pub fn get_with<F>(&self, key: K, f: F) -> Option<Arc<V>>
  where
    F: FnOnce(&K) -> Option<V>,
  {
    self.shared.compute_if_absent(key, f)
  }

  /// Like [`get_with`](Self::get_with), for a fallible computation. An error
  /// is returned to the caller and nothing is cached.
  pub fn try_get_with<E, F>(&self, key: K, f: F) -> Result<Option<Arc<V>>, E>
  where
    F: FnOnce(&K) -> Result<Option<V>, E>,
  {
    self.shared.try_compute_if_absent(key, f)
  }

  /// Returns the entries present for `keys`.
  pub fn get_all_present<I>(&self, keys: I) -> HashMap<K, Arc<V>>
  where
    I: IntoIterator<Item = K>,
  {
    self.shared.get_all_present(keys)
  }

  pub fn put(&self, key: K, value: V) {
    self.shared.put(key, value);
  }

  pub fn put_all<I>(&self, entries: I)
  where
    I: IntoIterator<Item = (K, V)>,
  {
    self.shared.put_all(entries);
  }

  pub fn invalidate<Q>(&self, key: &Q)
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    self.shared.remove(key);
  }

  pub fn invalidate_all<I>(&self, keys: I)
  where
    I: IntoIterator,
    I::Item: Borrow<K>,
  {
    self.shared.invalidate_all(keys);
  }

  /// Removes every entry.
  pub fn clear(&self) {
    self.shared.clear();
  }

  /// The number of entries. Exact for this cache, but may be stale by the
  /// time it is read under concurrent writes.
  pub fn estimated_size(&self) -> u64 {
    self.shared.len() as u64
  }

  pub fn stats(&self) -> StatsSnapshot {
    self.shared.stats()
  }

  /// Performs pending maintenance. This cache never has any.
  pub fn clean_up(&self) {}

  pub fn policy(&self) -> UnboundedPolicy {
    UnboundedPolicy::new(self.shared.stats.is_enabled())
  }

  /// A map view over the cache's storage. Changes through either are
  /// visible to both.
  pub fn as_map(&self) -> CacheMap<K, V, H> {
    CacheMap::new(self.shared.clone())
  }
}

/// A synchronous cache that computes missing values with a [`CacheLoader`].
///
/// Every method of [`Cache`] is available through `Deref`.
pub struct LoadingCache<K: Send, V: Send + Sync, H = ahash::RandomState> {
  cache: Cache<K, V, H>,
  loader: Arc<dyn CacheLoader<K, V>>,
}

impl<K: Send, V: Send + Sync, H> Clone for LoadingCache<K, V, H> {
  fn clone(&self) -> Self {
    Self {
      cache: self.cache.clone(),
      loader: self.loader.clone(),
    }
  }
}

impl<K: Send + 'static, V: Send + Sync + 'static, H> fmt::Debug for LoadingCache<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LoadingCache")
      .field("shared", &self.cache.shared)
      .field("bulk_load", &self.loader.supports_bulk_load())
      .finish()
  }
}

impl<K: Send, V: Send + Sync, H> Deref for LoadingCache<K, V, H> {
  type Target = Cache<K, V, H>;

  fn deref(&self) -> &Self::Target {
    &self.cache
  }
}

impl<K, V, H> LoadingCache<K, V, H>
where
  K: Clone + Eq + Hash + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  pub(crate) fn new(shared: Arc<CacheShared<K, V, H>>, loader: Arc<dyn CacheLoader<K, V>>) -> Self {
    Self {
      cache: Cache { shared },
      loader,
    }
  }

  /// Returns the value for `key`, loading it if absent.
  ///
  /// Concurrent callers for the same key share a single load. `Ok(None)`
  /// means the loader had no value; nothing is cached.
  pub fn get(&self, key: K) -> Result<Option<Arc<V>>, LoadError> {
    let loader = &self.loader;
    self
      .cache
      .shared
      .try_compute_if_absent(key, |k| loader.load(k))
      .map_err(LoadError::from)
  }

  /// Returns the values for `keys`, loading every absent one.
  ///
  /// Present keys count as hits and absent keys as misses. With a bulk
  /// loader the absent keys are loaded by a single `load_all`, and every
  /// entry it returns is cached, requested or not. Otherwise each key is
  /// loaded on its own. Keys without a value are left out of the result.
  pub fn get_all<I>(&self, keys: I) -> Result<HashMap<K, Arc<V>>, LoadError>
  where
    I: IntoIterator<Item = K>,
  {
    let shared = &self.cache.shared;
    let mut result = HashMap::new();
    let mut seen = HashSet::new();
    let mut to_load = Vec::new();
    for key in keys {
      if !seen.insert(key.clone()) {
        continue;
      }
      match shared.get(&key) {
        Some(value) => {
          result.insert(key, value);
        }
        None => to_load.push(key),
      }
    }
    shared.stats.record_hits(result.len() as u64);
    if to_load.is_empty() {
      return Ok(result);
    }

    shared.stats.record_misses(to_load.len() as u64);
    if !self.loader.supports_bulk_load() {
      for key in to_load {
        let loader = &self.loader;
        let loaded = shared
          .try_remap(key.clone(), false, LoadMode::Immediate, |k, _| {
            loader.load(k).map(|value| value.map(Arc::new))
          })
          .map_err(LoadError::from)?;
        if let Some(value) = loaded {
          result.insert(key, value);
        }
      }
      return Ok(result);
    }

    let bulk = shared.stats.observe(false, LoadMode::Immediate, || {
      let loaded = self.loader.load_all(&to_load)?;
      let loaded = loaded
        .into_iter()
        .map(|(key, value)| (key, Arc::new(value)))
        .collect::<Vec<_>>();
      let any_loaded = !loaded.is_empty();
      for (key, value) in &loaded {
        if seen.contains(key) && !result.contains_key(key) {
          result.insert(key.clone(), value.clone());
        }
      }
      shared.put_all_arc(loaded);
      Ok::<_, BoxError>(any_loaded.then_some(()))
    });
    bulk.map_err(LoadError::from)?;
    Ok(result)
  }

  /// Loads a new value for `key` in the background.
  ///
  /// Uses `load` if the key is absent and `reload` with the current value if
  /// present, through the same atomic compute as every other write. A failed
  /// or empty refresh leaves the current value in place and is only logged.
  pub fn refresh(&self, key: K) {
    let shared = self.cache.shared.clone();
    let loader = self.loader.clone();
    let task = async move {
      let outcome = catch_unwind(AssertUnwindSafe(|| {
        shared.try_remap(key, false, LoadMode::Immediate, |k, old| {
          let refreshed = match old {
            None => loader.load(k),
            Some(old) => loader.reload(k, old),
          };
          match refreshed {
            Ok(Some(value)) => Ok(Some(Arc::new(value))),
            Ok(None) => Err(LoadError::NoResult),
            Err(e) => Err(LoadError::from(e)),
          }
        })
      }));
      match outcome {
        Ok(Ok(_)) => tracing::trace!("refreshed cache entry"),
        Ok(Err(LoadError::NoResult)) => tracing::debug!("refresh produced no value, keeping the current one"),
        Ok(Err(e)) => tracing::warn!(error = %e, "exception thrown during refresh"),
        Err(payload) => {
          let e = LoadError::from_panic(payload);
          tracing::warn!(error = %e, "refresh panicked");
        }
      }
    };
    self.cache.shared.spawner.spawn(task.boxed());
  }

  /// A plain [`Cache`] handle over the same storage.
  pub fn as_cache(&self) -> &Cache<K, V, H> {
    &self.cache
  }
}
