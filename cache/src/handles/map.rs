use crate::shared::CacheShared;

use std::borrow::Borrow;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

/// A concurrent-map view over a cache's storage.
///
/// Every compound operation is atomic for its key. Writes through the view
/// emit removal notifications exactly like writes through the cache. Plain
/// reads and writes leave the statistics alone; `compute_if_absent` counts
/// as a lookup, and every call into a compute or merge function counts as a
/// load.
///
/// Functions passed to compound operations run while the key's shard is
/// locked and must not access the same cache.
pub struct CacheMap<K: Send, V: Send + Sync, H = ahash::RandomState> {
  shared: Arc<CacheShared<K, V, H>>,
}

impl<K: Send, V: Send + Sync, H> Clone for CacheMap<K, V, H> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

impl<K: Send, V: Send + Sync, H> fmt::Debug for CacheMap<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheMap").finish_non_exhaustive()
  }
}

impl<K, V, H> CacheMap<K, V, H>
where
  K: Clone + Eq + Hash + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  pub(crate) fn new(shared: Arc<CacheShared<K, V, H>>) -> Self {
    Self { shared }
  }

  pub fn get<Q>(&self, key: &Q) -> Option<Arc<V>>
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    self.shared.get(key)
  }

  pub fn contains_key<Q>(&self, key: &Q) -> bool
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    self.shared.contains_key(key)
  }

  pub fn len(&self) -> usize {
    self.shared.len()
  }

  pub fn is_empty(&self) -> bool {
    self.shared.is_empty()
  }

  /// Inserts `value`, returning the value it replaced.
  pub fn insert(&self, key: K, value: V) -> Option<Arc<V>> {
    self.shared.put(key, value)
  }

  /// Inserts `value` only if `key` is absent. Returns the existing value
  /// otherwise.
  pub fn insert_if_absent(&self, key: K, value: V) -> Option<Arc<V>> {
    self.shared.put_if_absent(key, value)
  }

  pub fn remove<Q>(&self, key: &Q) -> Option<Arc<V>>
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    self.shared.remove(key)
  }

  /// Removes the entry only if it maps to a value equal to `value`.
  pub fn remove_if<Q>(&self, key: &Q, value: &V) -> bool
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
    V: PartialEq,
  {
    self.shared.remove_if(key, value)
  }

  /// Replaces the value of a present key, returning the previous value.
  pub fn replace(&self, key: K, value: V) -> Option<Arc<V>> {
    self.shared.replace(key, value)
  }

  /// Replaces the value only if it currently equals `old_value`.
  pub fn replace_if(&self, key: K, old_value: &V, new_value: V) -> bool
  where
    V: PartialEq,
  {
    self.shared.replace_if(key, old_value, new_value)
  }

  pub fn compute_if_absent<F>(&self, key: K, f: F) -> Option<Arc<V>>
  where
    F: FnOnce(&K) -> Option<V>,
  {
    self.shared.compute_if_absent(key, f)
  }

  pub fn try_compute_if_absent<E, F>(&self, key: K, f: F) -> Result<Option<Arc<V>>, E>
  where
    F: FnOnce(&K) -> Result<Option<V>, E>,
  {
    self.shared.try_compute_if_absent(key, f)
  }

  /// Recomputes the value of a present key; `None` removes the entry.
  pub fn compute_if_present<F>(&self, key: K, f: F) -> Option<Arc<V>>
  where
    F: FnOnce(&K, &Arc<V>) -> Option<V>,
  {
    self.shared.compute_if_present(key, f)
  }

  pub fn try_compute_if_present<E, F>(&self, key: K, f: F) -> Result<Option<Arc<V>>, E>
  where
    F: FnOnce(&K, &Arc<V>) -> Result<Option<V>, E>,
  {
    self.shared.try_compute_if_present(key, f)
  }

  /// Computes a new value from the current one, if any; `None` removes the
  /// entry.
  pub fn compute<F>(&self, key: K, f: F) -> Option<Arc<V>>
  where
    F: FnOnce(&K, Option<&Arc<V>>) -> Option<V>,
  {
    self.shared.compute(key, f)
  }

  pub fn try_compute<E, F>(&self, key: K, f: F) -> Result<Option<Arc<V>>, E>
  where
    F: FnOnce(&K, Option<&Arc<V>>) -> Result<Option<V>, E>,
  {
    self.shared.try_compute(key, f)
  }

  /// Inserts `value` if absent, otherwise stores `f(current, value)`;
  /// `None` removes the entry.
  pub fn merge<F>(&self, key: K, value: V, f: F) -> Option<Arc<V>>
  where
    F: FnOnce(&Arc<V>, &V) -> Option<V>,
  {
    self.shared.merge(key, value, f)
  }

  /// Visits every entry. `f` runs under a shard read lock.
  pub fn for_each<F>(&self, f: F)
  where
    F: FnMut(&K, &Arc<V>),
  {
    self.shared.for_each(f);
  }

  /// Replaces every value with `f(key, value)`.
  pub fn replace_all<F>(&self, f: F)
  where
    F: FnMut(&K, &Arc<V>) -> V,
  {
    self.shared.replace_all(f);
  }

  /// A snapshot of the present keys.
  pub fn keys(&self) -> Vec<K> {
    self.shared.keys()
  }

  pub fn clear(&self) {
    self.shared.clear();
  }
}
