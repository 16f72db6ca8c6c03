use crate::error::{BoxError, LoadError};
use crate::future::LoadFuture;
use crate::shared::CacheShared;

use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

/// Settles the proxy futures of one `get_all` bulk load.
///
/// On success, entries the loader returned for keys nobody asked for are
/// cached as completed futures, then each proxy completes with its loaded
/// value, or with no value (and is removed) if the loader left its key out.
/// On failure every proxy is removed and fails with the same error. Either way
/// exactly one load outcome is recorded for the batch.
///
/// A completer dropped before `accept` fails its proxies with `NoResult`.
pub(crate) struct AsyncBulkCompleter<K, V, H>
where
  K: Clone + Eq + Hash + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  shared: Arc<CacheShared<K, LoadFuture<V>, H>>,
  proxies: Vec<(K, Arc<LoadFuture<V>>)>,
  start: u64,
}

impl<K, V, H> AsyncBulkCompleter<K, V, H>
where
  K: Clone + Eq + Hash + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  pub(crate) fn new(shared: Arc<CacheShared<K, LoadFuture<V>, H>>, proxies: Vec<(K, Arc<LoadFuture<V>>)>) -> Self {
    let start = shared.stats.read_ticker();
    Self { shared, proxies, start }
  }

  pub(crate) fn accept(mut self, outcome: std::thread::Result<Result<HashMap<K, V>, BoxError>>) {
    match outcome {
      Ok(Ok(loaded)) => self.complete(loaded),
      Ok(Err(e)) => {
        let e = LoadError::from(e);
        tracing::warn!(error = %e, proxies = self.proxies.len(), "bulk load failed");
        self.fail(e);
      }
      Err(payload) => {
        let e = LoadError::from_panic(payload);
        tracing::warn!(error = %e, proxies = self.proxies.len(), "bulk loader panicked");
        self.fail(e);
      }
    }
  }

  fn complete(&mut self, mut loaded: HashMap<K, V>) {
    let load_time = self.shared.stats.elapsed_since(self.start);
    self.shared.stats.record_load_success(load_time);

    let settled = self
      .proxies
      .drain(..)
      .map(|(key, proxy)| {
        let value = loaded.remove(&key);
        (key, proxy, value)
      })
      .collect::<Vec<_>>();
    // Extra entries must be visible before any proxy completes.
    self.add_new_entries(loaded);
    self.fill_proxies(settled);
  }

  fn fill_proxies(&self, settled: Vec<(K, Arc<LoadFuture<V>>, Option<V>)>) {
    for (key, proxy, value) in settled {
      match value {
        Some(value) => {
          proxy.complete(Ok(Some(Arc::new(value))));
        }
        None => {
          self.shared.remove_if_same(&key, &proxy);
          proxy.complete(Ok(None));
        }
      }
    }
  }

  fn add_new_entries(&self, loaded: HashMap<K, V>) {
    for (key, value) in loaded {
      let future = Arc::new(LoadFuture::completed(Ok(Some(Arc::new(value)))));
      self.shared.put_arc(key, future);
    }
  }

  fn fail(&mut self, error: LoadError) {
    let load_time = self.shared.stats.elapsed_since(self.start);
    self.shared.stats.record_load_failure(load_time);
    for (key, proxy) in self.proxies.drain(..) {
      self.shared.remove_if_same(&key, &proxy);
      proxy.complete(Err(error.clone()));
    }
  }
}

impl<K, V, H> Drop for AsyncBulkCompleter<K, V, H>
where
  K: Clone + Eq + Hash + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  fn drop(&mut self) {
    if !self.proxies.is_empty() {
      tracing::debug!(proxies = self.proxies.len(), "bulk load task dropped before completing");
      self.fail(LoadError::NoResult);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::runtime::ThreadSpawner;
  use crate::stats::StatsRecorder;
  use crate::store::ShardedStore;
  use crate::time::SystemTicker;

  type Shared = CacheShared<u32, LoadFuture<String>, ahash::RandomState>;

  fn shared() -> Arc<Shared> {
    let store = ShardedStore::new(4, 0, ahash::RandomState::new());
    let stats = StatsRecorder::new(true, Arc::new(SystemTicker));
    Arc::new(CacheShared::new(store, stats, None, Arc::new(ThreadSpawner)))
  }

  fn install_proxies(shared: &Arc<Shared>, keys: &[u32]) -> Vec<(u32, Arc<LoadFuture<String>>)> {
    keys
      .iter()
      .map(|&key| {
        let proxy = Arc::new(LoadFuture::new());
        assert!(shared.put_if_absent_arc(key, proxy.clone()).is_none());
        (key, proxy)
      })
      .collect()
  }

  #[test]
  fn fills_proxies_and_caches_extra_entries() {
    let shared = shared();
    let proxies = install_proxies(&shared, &[1, 2]);
    let (one, two) = (proxies[0].1.clone(), proxies[1].1.clone());

    let loaded = HashMap::from([(1, "one".to_string()), (3, "three".to_string())]);
    AsyncBulkCompleter::new(shared.clone(), proxies).accept(Ok(Ok(loaded)));

    assert_eq!(one.value_if_ready().as_deref().map(String::as_str), Some("one"));
    assert!(matches!(two.peek(), Some(Ok(None))));
    assert!(shared.get(&2).is_none(), "a key the loader skipped is removed");
    let extra = shared.get(&3).and_then(|f| f.value_if_ready());
    assert_eq!(extra.as_deref().map(String::as_str), Some("three"));

    let stats = shared.stats();
    assert_eq!(stats.load_success_count, 1);
    assert_eq!(stats.load_failure_count, 0);
  }

  #[test]
  fn failure_removes_and_fails_every_proxy() {
    let shared = shared();
    let proxies = install_proxies(&shared, &[1, 2]);
    let futures = proxies.iter().map(|(_, f)| f.clone()).collect::<Vec<_>>();

    let error: BoxError = "backend down".into();
    AsyncBulkCompleter::new(shared.clone(), proxies).accept(Ok(Err(error)));

    for future in futures {
      assert!(matches!(future.peek(), Some(Err(LoadError::Loader(_)))));
    }
    assert!(shared.is_empty());
    assert_eq!(shared.stats().load_failure_count, 1);
  }

  #[test]
  fn dropped_completer_fails_with_no_result() {
    let shared = shared();
    let proxies = install_proxies(&shared, &[7]);
    let proxy = proxies[0].1.clone();

    drop(AsyncBulkCompleter::new(shared.clone(), proxies));

    assert!(matches!(proxy.peek(), Some(Err(LoadError::NoResult))));
    assert!(shared.get(&7).is_none());
  }
}
