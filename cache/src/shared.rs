use crate::key_lock::{KeyLock, KeyLockMap};
use crate::listener::{RemovalCause, RemovalListener, RemovalNotification};
use crate::runtime::TaskSpawner;
use crate::stats::{LoadMode, StatsRecorder, StatsSnapshot};
use crate::store::ShardedStore;
use crate::task::notifier::{NotificationSlot, Notifier};

use std::borrow::Borrow;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

#[cfg(feature = "bulk")]
use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};

/// Unwraps the result of a compute whose function cannot fail.
#[inline]
fn infallible<T>(result: Result<T, Infallible>) -> T {
  match result {
    Ok(value) => value,
    Err(never) => match never {},
  }
}

/// The internal, thread-safe core of every cache flavor.
///
/// Compound operations hold the key's lock from a `KeyLockMap` for their
/// whole duration, so they are atomic per key and a supplied function runs
/// exactly once per call. Shard locks are only taken for single map reads and
/// writes, never while a supplied function runs, so a slow load of one key
/// blocks no other key. Removal notifications are built only when a listener
/// is registered, and handed to the notifier once the change is visible.
///
/// Functions passed to compound operations must not call back into the same
/// cache for the key they are computing.
pub(crate) struct CacheShared<K: Send, V: Send + Sync, H> {
  pub(crate) store: ShardedStore<K, V, H>,
  pub(crate) stats: StatsRecorder,
  pub(crate) spawner: Arc<dyn TaskSpawner>,
  locks: KeyLockMap<K, H>,
  notifier: Option<Notifier<K, V>>,
}

impl<K: Send, V: Send + Sync, H> fmt::Debug for CacheShared<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheShared")
      .field("store", &self.store)
      .field("stats", &self.stats)
      .field("has_listener", &self.notifier.is_some())
      .finish_non_exhaustive()
  }
}

impl<K, V, H> CacheShared<K, V, H>
where
  K: Clone + Eq + Hash + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  pub(crate) fn new(
    store: ShardedStore<K, V, H>,
    stats: StatsRecorder,
    listener: Option<Arc<dyn RemovalListener<K, V>>>,
    spawner: Arc<dyn TaskSpawner>,
  ) -> Self {
    let locks = KeyLockMap::new(store.num_shards(), store.hasher().clone());
    Self {
      store,
      stats,
      spawner,
      locks,
      notifier: listener.map(Notifier::spawn),
    }
  }

  #[inline]
  pub(crate) fn has_listener(&self) -> bool {
    self.notifier.is_some()
  }

  #[inline]
  fn notify(&self, key: K, value: Arc<V>, cause: RemovalCause) {
    if let Some(notifier) = &self.notifier {
      notifier.notify(RemovalNotification::new(key, value, cause));
    }
  }

  /// Locks `key` for writing if it is present, using the stored key so the
  /// caller only needs a borrowed form of it.
  fn lock_present<Q>(&self, key: &Q) -> Option<KeyLock<'_, K, H>>
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    let stored = self
      .store
      .get_shard(key)
      .read()
      .get_key_value(key)
      .map(|(stored, _)| stored.clone())?;
    Some(self.locks.lock(&stored))
  }

  // --- Reads ---

  /// Plain lookup. Records nothing.
  pub(crate) fn get<Q>(&self, key: &Q) -> Option<Arc<V>>
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    self.store.get_shard(key).read().get(key).cloned()
  }

  /// Lookup that records a hit or a miss when `record_stats` is set.
  pub(crate) fn get_if_present<Q>(&self, key: &Q, record_stats: bool) -> Option<Arc<V>>
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    let value = self.get(key);
    if record_stats {
      match value {
        Some(_) => self.stats.record_hits(1),
        None => self.stats.record_misses(1),
      }
    }
    value
  }

  /// Returns the present entries for `keys`, recording a hit for every
  /// distinct key found and a miss for every distinct key that was not.
  pub(crate) fn get_all_present<I>(&self, keys: I) -> HashMap<K, Arc<V>>
  where
    I: IntoIterator<Item = K>,
  {
    let mut found = HashMap::new();
    let mut missing = HashSet::new();
    for key in keys {
      if found.contains_key(&key) || missing.contains(&key) {
        continue;
      }
      match self.get(&key) {
        Some(value) => {
          found.insert(key, value);
        }
        None => {
          missing.insert(key);
        }
      }
    }
    self.stats.record_hits(found.len() as u64);
    self.stats.record_misses(missing.len() as u64);
    found
  }

  pub(crate) fn contains_key<Q>(&self, key: &Q) -> bool
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    self.store.get_shard(key).read().contains_key(key)
  }

  pub(crate) fn len(&self) -> usize {
    self.store.len()
  }

  pub(crate) fn is_empty(&self) -> bool {
    self.store.is_empty()
  }

  pub(crate) fn stats(&self) -> StatsSnapshot {
    self.stats.snapshot()
  }

  // --- Writes ---

  pub(crate) fn put(&self, key: K, value: V) -> Option<Arc<V>> {
    self.put_arc(key, Arc::new(value))
  }

  /// Inserts `value`, returning the value it replaced. Re-inserting the very
  /// same handle is not reported as a replacement.
  pub(crate) fn put_arc(&self, key: K, value: Arc<V>) -> Option<Arc<V>> {
    let _lock = self.locks.lock(&key);
    let notify_key = self.has_listener().then(|| key.clone());
    let old = self.store.get_shard(&key).write().insert(key, value.clone());

    if let (Some(key), Some(old)) = (notify_key, &old) {
      if !Arc::ptr_eq(old, &value) {
        self.notify(key, old.clone(), RemovalCause::Replaced);
      }
    }
    old
  }

  pub(crate) fn put_if_absent(&self, key: K, value: V) -> Option<Arc<V>> {
    self.put_if_absent_arc(key, Arc::new(value))
  }

  /// Inserts `value` only if `key` is absent. Returns the existing value if
  /// there was one, in which case nothing changed.
  pub(crate) fn put_if_absent_arc(&self, key: K, value: Arc<V>) -> Option<Arc<V>> {
    let _lock = self.locks.lock(&key);
    let mut shard = self.store.get_shard(&key).write();
    match shard.entry(key) {
      Entry::Occupied(occupied) => Some(occupied.get().clone()),
      Entry::Vacant(vacant) => {
        vacant.insert(value);
        None
      }
    }
  }

  pub(crate) fn put_all<I>(&self, entries: I)
  where
    I: IntoIterator<Item = (K, V)>,
  {
    self.put_all_arc(entries.into_iter().map(|(key, value)| (key, Arc::new(value))));
  }

  /// Inserts every entry. Without a listener there is nothing to order, so
  /// entries are grouped by shard and the shards are filled in parallel.
  pub(crate) fn put_all_arc<I>(&self, entries: I)
  where
    I: IntoIterator<Item = (K, Arc<V>)>,
  {
    if self.has_listener() {
      for (key, value) in entries {
        self.put_arc(key, value);
      }
      return;
    }

    let mut batches: Vec<Vec<(K, Arc<V>)>> = (0..self.store.num_shards()).map(|_| Vec::new()).collect();
    for (key, value) in entries {
      batches[self.store.shard_index(&key)].push((key, value));
    }

    #[cfg(feature = "bulk")]
    batches.into_par_iter().enumerate().for_each(|(index, batch)| {
      self.fill_shard(index, batch);
    });

    #[cfg(not(feature = "bulk"))]
    for (index, batch) in batches.into_iter().enumerate() {
      self.fill_shard(index, batch);
    }
  }

  fn fill_shard(&self, index: usize, batch: Vec<(K, Arc<V>)>) {
    let shard = self.store.shard_at(index);
    for (key, value) in batch {
      let _lock = self.locks.lock(&key);
      shard.write().insert(key, value);
    }
  }

  // --- Removals ---

  pub(crate) fn remove<Q>(&self, key: &Q) -> Option<Arc<V>>
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    let _lock = self.lock_present(key)?;
    let removed = self.store.get_shard(key).write().remove_entry(key);
    removed.map(|(key, value)| {
      if self.has_listener() {
        self.notify(key, value.clone(), RemovalCause::Explicit);
      }
      value
    })
  }

  /// Removes the entry only if it currently maps to a value equal to `value`.
  pub(crate) fn remove_if<Q>(&self, key: &Q, value: &V) -> bool
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
    V: PartialEq,
  {
    self.remove_matching(key, |current| **current == *value)
  }

  /// Removes the entry only if it currently maps to this exact handle.
  pub(crate) fn remove_if_same<Q>(&self, key: &Q, expected: &Arc<V>) -> bool
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    self.remove_matching(key, |current| Arc::ptr_eq(current, expected))
  }

  fn remove_matching<Q, F>(&self, key: &Q, matches: F) -> bool
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
    F: FnOnce(&Arc<V>) -> bool,
  {
    let Some(_lock) = self.lock_present(key) else {
      return false;
    };
    let removed = {
      let mut shard = self.store.get_shard(key).write();
      match shard.get(key) {
        Some(current) if matches(current) => shard.remove_entry(key),
        _ => None,
      }
    };
    match removed {
      Some((key, value)) => {
        self.notify(key, value, RemovalCause::Explicit);
        true
      }
      None => false,
    }
  }

  /// Replaces the value of a present key, returning the previous value.
  pub(crate) fn replace(&self, key: K, value: V) -> Option<Arc<V>> {
    let _lock = self.locks.lock(&key);
    let value = Arc::new(value);
    let previous = {
      let mut shard = self.store.get_shard(&key).write();
      shard
        .get_mut(&key)
        .map(|slot| std::mem::replace(slot, value.clone()))
    };
    if let Some(previous) = &previous {
      if self.has_listener() && !Arc::ptr_eq(previous, &value) {
        self.notify(key, previous.clone(), RemovalCause::Replaced);
      }
    }
    previous
  }

  /// Replaces the value only if it currently equals `old_value`.
  pub(crate) fn replace_if(&self, key: K, old_value: &V, new_value: V) -> bool
  where
    V: PartialEq,
  {
    let _lock = self.locks.lock(&key);
    let previous = {
      let mut shard = self.store.get_shard(&key).write();
      match shard.get_mut(&key) {
        Some(slot) if **slot == *old_value => Some(std::mem::replace(slot, Arc::new(new_value))),
        _ => None,
      }
    };
    match previous {
      Some(previous) => {
        self.notify(key, previous, RemovalCause::Replaced);
        true
      }
      None => false,
    }
  }

  /// Removes every entry, one key at a time. With a listener, each removal
  /// is reported as explicit, in visitation order.
  pub(crate) fn clear(&self) {
    let mut slot = self.notifier.as_ref().map(NotificationSlot::new);
    for shard in self.store.iter_shards() {
      let keys = shard.read().keys().cloned().collect::<Vec<_>>();
      for key in keys {
        let _lock = self.locks.lock(&key);
        let removed = shard.write().remove_entry(&key);
        if let (Some(slot), Some((key, value))) = (slot.as_mut(), removed) {
          slot.stage(RemovalNotification::new(key, value, RemovalCause::Explicit));
        }
      }
    }
  }

  pub(crate) fn invalidate_all<I>(&self, keys: I)
  where
    I: IntoIterator,
    I::Item: Borrow<K>,
  {
    for key in keys {
      self.remove(key.borrow());
    }
  }

  // --- Atomic compound operations ---

  pub(crate) fn compute_if_absent<F>(&self, key: K, f: F) -> Option<Arc<V>>
  where
    F: FnOnce(&K) -> Option<V>,
  {
    infallible(self.try_compute_if_absent(key, |k| Ok(f(k))))
  }

  /// Returns the present value, or computes, installs and returns one.
  ///
  /// A plain read is tried first and the shard is only write-locked on a
  /// miss. A hit records a hit; running `f` records a miss and the load.
  /// `Ok(None)` from `f` leaves the key absent.
  pub(crate) fn try_compute_if_absent<E, F>(&self, key: K, f: F) -> Result<Option<Arc<V>>, E>
  where
    F: FnOnce(&K) -> Result<Option<V>, E>,
  {
    self.compute_if_absent_arc(key, LoadMode::Immediate, |k| Ok(f(k)?.map(Arc::new)))
  }

  pub(crate) fn compute_if_absent_arc<E, F>(&self, key: K, mode: LoadMode, f: F) -> Result<Option<Arc<V>>, E>
  where
    F: FnOnce(&K) -> Result<Option<Arc<V>>, E>,
  {
    if let Some(value) = self.get(&key) {
      self.stats.record_hits(1);
      return Ok(Some(value));
    }

    let _lock = self.locks.lock(&key);
    if let Some(value) = self.get(&key) {
      // Lost the race to another writer; still a hit.
      self.stats.record_hits(1);
      return Ok(Some(value));
    }
    let computed = self.stats.observe(true, mode, || f(&key))?;
    if let Some(value) = &computed {
      self.store.get_shard(&key).write().insert(key, value.clone());
    }
    Ok(computed)
  }

  pub(crate) fn compute_if_present<F>(&self, key: K, f: F) -> Option<Arc<V>>
  where
    F: FnOnce(&K, &Arc<V>) -> Option<V>,
  {
    infallible(self.try_compute_if_present(key, |k, v| Ok(f(k, v))))
  }

  /// Recomputes the value of a present key. `Ok(None)` removes the entry.
  pub(crate) fn try_compute_if_present<E, F>(&self, key: K, f: F) -> Result<Option<Arc<V>>, E>
  where
    F: FnOnce(&K, &Arc<V>) -> Result<Option<V>, E>,
  {
    if !self.contains_key(&key) {
      return Ok(None);
    }
    self.remap(key, Remap::PresentOnly, false, LoadMode::Immediate, |k, old| match old {
      Some(old) => Ok(f(k, old)?.map(Arc::new)),
      None => Ok(None),
    })
  }

  pub(crate) fn compute<F>(&self, key: K, f: F) -> Option<Arc<V>>
  where
    F: FnOnce(&K, Option<&Arc<V>>) -> Option<V>,
  {
    infallible(self.try_compute(key, |k, v| Ok(f(k, v))))
  }

  /// Computes a new value from the current one, if any. `Ok(None)` removes
  /// the entry; `Err` leaves it untouched.
  pub(crate) fn try_compute<E, F>(&self, key: K, f: F) -> Result<Option<Arc<V>>, E>
  where
    F: FnOnce(&K, Option<&Arc<V>>) -> Result<Option<V>, E>,
  {
    self.try_remap(key, false, LoadMode::Immediate, |k, old| Ok(f(k, old)?.map(Arc::new)))
  }

  /// The `compute` primitive that every load path funnels through.
  ///
  /// `record_miss` records a miss when the key turns out to be absent; the
  /// load itself is recorded according to `mode`.
  pub(crate) fn try_remap<E, F>(&self, key: K, record_miss: bool, mode: LoadMode, f: F) -> Result<Option<Arc<V>>, E>
  where
    F: FnOnce(&K, Option<&Arc<V>>) -> Result<Option<Arc<V>>, E>,
  {
    self.remap(key, Remap::Any, record_miss, mode, f)
  }

  /// Inserts `value` if absent, otherwise combines the present value with it.
  /// The combination counts as a load; `None` removes the entry.
  pub(crate) fn merge<F>(&self, key: K, value: V, f: F) -> Option<Arc<V>>
  where
    F: FnOnce(&Arc<V>, &V) -> Option<V>,
  {
    let _lock = self.locks.lock(&key);
    let current = self.get(&key);
    let merged = match &current {
      None => Some(Arc::new(value)),
      Some(old) => infallible(
        self
          .stats
          .observe(false, LoadMode::Immediate, || Ok(f(old, &value).map(Arc::new))),
      ),
    };
    self.install(key, current, &merged);
    merged
  }

  fn remap<E, F>(&self, key: K, scope: Remap, record_miss: bool, mode: LoadMode, f: F) -> Result<Option<Arc<V>>, E>
  where
    F: FnOnce(&K, Option<&Arc<V>>) -> Result<Option<Arc<V>>, E>,
  {
    let _lock = self.locks.lock(&key);
    let current = self.get(&key);
    if current.is_none() && scope == Remap::PresentOnly {
      return Ok(None);
    }
    let record_miss = record_miss && current.is_none();
    let computed = self
      .stats
      .observe(record_miss, mode, || f(&key, current.as_ref()))?;
    self.install(key, current, &computed);
    Ok(computed)
  }

  /// Makes the outcome of a compute visible. The caller holds the key's lock,
  /// so `current` is still what the function saw. Returning the very same
  /// handle leaves the entry untouched and reports nothing.
  fn install(&self, key: K, current: Option<Arc<V>>, computed: &Option<Arc<V>>) {
    match (current, computed) {
      (None, None) => {}
      (None, Some(new_value)) => {
        self.store.get_shard(&key).write().insert(key, new_value.clone());
      }
      (Some(old), Some(new_value)) => {
        if Arc::ptr_eq(&old, new_value) {
          return;
        }
        let notify_key = self.has_listener().then(|| key.clone());
        self.store.get_shard(&key).write().insert(key, new_value.clone());
        if let Some(key) = notify_key {
          self.notify(key, old, RemovalCause::Replaced);
        }
      }
      (Some(old), None) => {
        let removed = self.store.get_shard(&key).write().remove_entry(&key);
        if let Some((key, _)) = removed {
          self.notify(key, old, RemovalCause::Explicit);
        }
      }
    }
  }

  // --- Traversal ---

  /// Visits every entry, one shard at a time. Each shard is copied out
  /// first, so `f` runs without holding any lock.
  pub(crate) fn for_each<F>(&self, mut f: F)
  where
    F: FnMut(&K, &Arc<V>),
  {
    for shard in self.store.iter_shards() {
      let entries = shard
        .read()
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect::<Vec<_>>();
      for (key, value) in &entries {
        f(key, value);
      }
    }
  }

  /// A snapshot of the keys currently present.
  pub(crate) fn keys(&self) -> Vec<K> {
    let mut keys = Vec::with_capacity(self.len());
    for shard in self.store.iter_shards() {
      keys.extend(shard.read().keys().cloned());
    }
    keys
  }

  /// Replaces every value with `f(key, value)`, one key at a time.
  ///
  /// With a listener, the REPLACED notification for each entry is dispatched
  /// only after the next entry has been rewritten, in visitation order.
  pub(crate) fn replace_all<F>(&self, mut f: F)
  where
    F: FnMut(&K, &Arc<V>) -> V,
  {
    let mut slot = self.notifier.as_ref().map(NotificationSlot::new);
    for shard in self.store.iter_shards() {
      let keys = shard.read().keys().cloned().collect::<Vec<_>>();
      for key in keys {
        let _lock = self.locks.lock(&key);
        let current = shard.read().get(&key).cloned();
        // Removed concurrently since the keys were collected.
        let Some(old) = current else {
          continue;
        };
        let new_value = Arc::new(f(&key, &old));
        shard.write().insert(key.clone(), new_value);
        if let Some(slot) = slot.as_mut() {
          slot.stage(RemovalNotification::new(key, old, RemovalCause::Replaced));
        }
      }
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Remap {
  Any,
  PresentOnly,
}
