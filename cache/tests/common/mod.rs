#![allow(dead_code)]

use std::hash::{BuildHasher, Hasher};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use tessera_cache::{BoxError, Cache, CacheBuilder, CacheLoader, RemovalCause, RemovalNotification, Ticker};

// A custom hasher that allows us to control which shard a key is assigned to.
// It simply uses the integer value of the key as its hash.
// For a 4-shard cache:
// - key 0 -> shard 0 (0 & 3 = 0)
// - key 1 -> shard 1 (1 & 3 = 1)
// - key 4 -> shard 0 (4 & 3 = 0)
#[derive(Clone, Default)]
pub struct ShardControllingHasher;
impl BuildHasher for ShardControllingHasher {
  type Hasher = TestHasher;
  fn build_hasher(&self) -> Self::Hasher {
    TestHasher(0)
  }
}
pub struct TestHasher(u64);
impl Hasher for TestHasher {
  fn finish(&self) -> u64 {
    self.0
  }
  fn write(&mut self, _: &[u8]) {
    unimplemented!()
  }
  fn write_i32(&mut self, i: i32) {
    self.0 = i as u64;
  }
}

pub fn build_test_cache(shards: usize) -> Cache<i32, String, ShardControllingHasher> {
  CacheBuilder::default()
    .shards(shards)
    .hasher(ShardControllingHasher)
    .record_stats(true)
    .build()
    .unwrap()
}

pub type Removal<V> = (i32, Arc<V>, RemovalCause);

/// Forwards every notification into a std channel.
pub fn capture_listener<V: Send + Sync + 'static>(
) -> (impl Fn(RemovalNotification<i32, V>) + Send + Sync + 'static, mpsc::Receiver<Removal<V>>) {
  let (tx, rx) = mpsc::channel();
  let tx = parking_lot::Mutex::new(tx);
  let listener = move |notification: RemovalNotification<i32, V>| {
    let (key, value, cause) = notification.into_parts();
    let _ = tx.lock().send((key, value, cause));
  };
  (listener, rx)
}

/// Receives exactly `count` notifications, failing the test if they don't
/// arrive in time.
pub fn recv_n<V>(rx: &mpsc::Receiver<Removal<V>>, count: usize) -> Vec<Removal<V>> {
  (0..count)
    .map(|_| rx.recv_timeout(Duration::from_secs(2)).expect("notification"))
    .collect()
}

/// Asserts nothing else is delivered within a short grace period.
pub fn assert_quiet<V>(rx: &mpsc::Receiver<Removal<V>>) {
  assert!(rx.recv_timeout(Duration::from_millis(100)).is_err(), "unexpected notification");
}

/// A ticker that advances by a fixed step on every read.
#[derive(Clone)]
pub struct StepTicker {
  now: Arc<AtomicU64>,
  step: u64,
}

impl StepTicker {
  pub fn new(step: u64) -> Self {
    Self {
      now: Arc::new(AtomicU64::new(0)),
      step,
    }
  }
}

impl Ticker for StepTicker {
  fn read(&self) -> u64 {
    self.now.fetch_add(self.step, Ordering::Relaxed)
  }
}

/// Loads `key * 10` for non-negative keys, nothing for negative ones, and
/// counts its calls.
#[derive(Clone, Default)]
pub struct TimesTenLoader {
  pub loads: Arc<AtomicUsize>,
  pub bulk_loads: Arc<AtomicUsize>,
  pub bulk: bool,
}

impl TimesTenLoader {
  pub fn bulk() -> Self {
    Self {
      bulk: true,
      ..Self::default()
    }
  }

  pub fn loads(&self) -> usize {
    self.loads.load(Ordering::SeqCst)
  }

  pub fn bulk_loads(&self) -> usize {
    self.bulk_loads.load(Ordering::SeqCst)
  }
}

impl CacheLoader<i32, i32> for TimesTenLoader {
  fn load(&self, key: &i32) -> Result<Option<i32>, BoxError> {
    self.loads.fetch_add(1, Ordering::SeqCst);
    Ok((*key >= 0).then_some(key * 10))
  }

  fn reload(&self, key: &i32, old_value: &i32) -> Result<Option<i32>, BoxError> {
    self.loads.fetch_add(1, Ordering::SeqCst);
    Ok(Some(old_value + key))
  }

  fn supports_bulk_load(&self) -> bool {
    self.bulk
  }

  fn load_all(&self, keys: &[i32]) -> Result<std::collections::HashMap<i32, i32>, BoxError> {
    self.bulk_loads.fetch_add(1, Ordering::SeqCst);
    Ok(
      keys
        .iter()
        .filter(|key| **key >= 0)
        .map(|key| (*key, key * 10))
        .collect(),
    )
  }
}
