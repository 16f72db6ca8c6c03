use core::fmt;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use crossbeam_utils::CachePadded;
use parking_lot::RwLock;

/// The map held by a single shard. Values are reference counted so readers
/// can hand them out after releasing the shard lock.
pub(crate) type Shard<K, V, H> = HashMap<K, Arc<V>, H>;

/// A map that is partitioned into multiple, independently locked shards.
///
/// Operations on different keys are unlikely to contend for the same lock.
/// Shard locks are only held for single map operations; compound operations
/// get their per-key atomicity from a `KeyLockMap` instead.
pub(crate) struct ShardedStore<K, V, H> {
  shards: Box<[CachePadded<RwLock<Shard<K, V, H>>>]>,
  hasher: H,
}

impl<K, V, H> fmt::Debug for ShardedStore<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ShardedStore")
      .field("num_shards", &self.shards.len())
      .finish()
  }
}

impl<K, V, H> ShardedStore<K, V, H>
where
  K: Eq + Hash,
  H: BuildHasher + Clone,
{
  /// Creates a store with `num_shards` shards, which must be a non-zero power
  /// of two. `capacity` is spread evenly across the shards.
  pub(crate) fn new(num_shards: usize, capacity: usize, hasher: H) -> Self {
    debug_assert!(num_shards.is_power_of_two());
    let per_shard = capacity.div_ceil(num_shards);

    let shards = (0..num_shards)
      .map(|_| {
        let map = HashMap::with_capacity_and_hasher(per_shard, hasher.clone());
        CachePadded::new(RwLock::new(map))
      })
      .collect::<Vec<_>>();

    Self {
      shards: shards.into_boxed_slice(),
      hasher,
    }
  }

  /// Returns the index of the shard that owns `key`.
  #[inline]
  pub(crate) fn shard_index<Q>(&self, key: &Q) -> usize
  where
    K: Borrow<Q>,
    Q: Hash + ?Sized,
  {
    let hash = self.hasher.hash_one(key);
    // The shard count is a power of two, validated by the builder.
    (hash as usize) & (self.shards.len() - 1)
  }

  /// Returns the lock guarding the shard that owns `key`.
  #[inline]
  pub(crate) fn get_shard<Q>(&self, key: &Q) -> &RwLock<Shard<K, V, H>>
  where
    K: Borrow<Q>,
    Q: Hash + ?Sized,
  {
    &self.shards[self.shard_index(key)]
  }

  #[inline]
  pub(crate) fn shard_at(&self, index: usize) -> &RwLock<Shard<K, V, H>> {
    &self.shards[index]
  }

  /// Returns an iterator over all the shard locks, in a stable order.
  pub(crate) fn iter_shards(&self) -> impl Iterator<Item = &RwLock<Shard<K, V, H>>> {
    self.shards.iter().map(|padded| &**padded)
  }

  pub(crate) fn hasher(&self) -> &H {
    &self.hasher
  }

  pub(crate) fn num_shards(&self) -> usize {
    self.shards.len()
  }

  /// Sums the shard sizes. Not a snapshot: shards are read one at a time.
  pub(crate) fn len(&self) -> usize {
    self.iter_shards().map(|shard| shard.read().len()).sum()
  }

  pub(crate) fn is_empty(&self) -> bool {
    self.iter_shards().all(|shard| shard.read().is_empty())
  }
}
