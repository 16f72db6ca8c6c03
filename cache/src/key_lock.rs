use crate::store::ShardedStore;

use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};

/// Per-key mutexes serializing the writers of each key.
///
/// A key has an entry here only while some thread holds or waits for its
/// lock, so the map stays as small as the number of keys being written.
pub(crate) struct KeyLockMap<K, H> {
  locks: ShardedStore<K, Mutex<()>, H>,
}

impl<K, H> KeyLockMap<K, H>
where
  K: Clone + Eq + Hash,
  H: BuildHasher + Clone,
{
  pub(crate) fn new(num_shards: usize, hasher: H) -> Self {
    Self {
      locks: ShardedStore::new(num_shards, 0, hasher),
    }
  }

  /// Blocks until the calling thread is the only writer of `key`.
  pub(crate) fn lock(&self, key: &K) -> KeyLock<'_, K, H> {
    let mutex = self
      .locks
      .get_shard(key)
      .write()
      .entry(key.clone())
      .or_insert_with(|| Arc::new(Mutex::new(())))
      .clone();
    let guard = mutex.lock_arc();
    KeyLock {
      map: self,
      key: key.clone(),
      guard: Some(guard),
    }
  }

  #[cfg(test)]
  pub(crate) fn is_empty(&self) -> bool {
    self.locks.is_empty()
  }
}

/// Holds the lock of one key; releases it and forgets the key on drop.
pub(crate) struct KeyLock<'a, K, H>
where
  K: Clone + Eq + Hash,
  H: BuildHasher + Clone,
{
  map: &'a KeyLockMap<K, H>,
  key: K,
  guard: Option<ArcMutexGuard<RawMutex, ()>>,
}

impl<K, H> Drop for KeyLock<'_, K, H>
where
  K: Clone + Eq + Hash,
  H: BuildHasher + Clone,
{
  fn drop(&mut self) {
    drop(self.guard.take());
    let mut shard = self.map.locks.get_shard(&self.key).write();
    // Waiters clone the mutex under this same shard lock, so a count of one
    // means nobody else wants it.
    if shard.get(&self.key).is_some_and(|mutex| Arc::strong_count(mutex) == 1) {
      shard.remove(&self.key);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicBool, Ordering};
  use std::thread;
  use std::time::Duration;

  #[test]
  fn entries_are_dropped_with_the_last_holder() {
    let map = KeyLockMap::new(4, ahash::RandomState::new());
    {
      let _first = map.lock(&1);
      let _second = map.lock(&2);
      assert!(!map.is_empty());
    }
    assert!(map.is_empty());
  }

  #[test]
  fn writers_of_one_key_are_serialized() {
    let map = Arc::new(KeyLockMap::new(1, ahash::RandomState::new()));
    let inside = Arc::new(AtomicBool::new(false));

    let guard = map.lock(&7);
    let waiter = {
      let map = map.clone();
      let inside = inside.clone();
      thread::spawn(move || {
        let _guard = map.lock(&7);
        inside.store(true, Ordering::SeqCst);
      })
    };

    // A different key in the same shard is not blocked.
    drop(map.lock(&8));
    thread::sleep(Duration::from_millis(50));
    assert!(!inside.load(Ordering::SeqCst));

    drop(guard);
    waiter.join().unwrap();
    assert!(inside.load(Ordering::SeqCst));
    assert!(map.is_empty());
  }
}
