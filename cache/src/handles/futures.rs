use crate::error::{BoxError, LoadError};
use crate::future::{CacheFuture, LoadFuture, LoadResult};
use crate::handles::bulk::AsyncBulkCompleter;
use crate::handles::view::SyncLoadingView;
use crate::listener::{RemovalListener, RemovalNotification};
use crate::loader::{AsyncCacheLoader, LoadFutureOutput};
use crate::policy::UnboundedPolicy;
use crate::shared::CacheShared;
use crate::stats::{LoadMode, StatsSnapshot};

use std::borrow::Borrow;
use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use futures_util::future::{self, BoxFuture};
use futures_util::FutureExt;

/// Converts the outcome of a loader future, panics included, into the
/// result its placeholder completes with.
pub(crate) fn into_load_result<V>(outcome: std::thread::Result<Result<Option<V>, BoxError>>) -> LoadResult<V> {
  match outcome {
    Ok(Ok(value)) => Ok(value.map(Arc::new)),
    Ok(Err(e)) => Err(LoadError::from(e)),
    Err(payload) => {
      let e = LoadError::from_panic(payload);
      tracing::warn!(error = %e, "cache loader panicked");
      Err(e)
    }
  }
}

/// A thread-safe cache that loads values asynchronously and hands out
/// [`CacheFuture`]s.
///
/// At most one load per key is in flight: the first caller for an absent key
/// installs a placeholder future and starts the load, and every concurrent
/// caller receives that same future. A load that fails or produces no value
/// is removed again, so the next caller retries.
pub struct AsyncLoadingCache<K: Send, V: Send + Sync, H = ahash::RandomState> {
  pub(crate) shared: Arc<CacheShared<K, LoadFuture<V>, H>>,
  loader: Arc<dyn AsyncCacheLoader<K, V>>,
  can_bulk_load: bool,
}

impl<K: Send, V: Send + Sync, H> Clone for AsyncLoadingCache<K, V, H> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
      loader: self.loader.clone(),
      can_bulk_load: self.can_bulk_load,
    }
  }
}

impl<K: Send, V: Send + Sync, H> fmt::Debug for AsyncLoadingCache<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("AsyncLoadingCache")
      .field("shared", &self.shared)
      .field("can_bulk_load", &self.can_bulk_load)
      .finish()
  }
}

impl<K, V, H> AsyncLoadingCache<K, V, H>
where
  K: Clone + Eq + Hash + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  pub(crate) fn new(shared: Arc<CacheShared<K, LoadFuture<V>, H>>, loader: Arc<dyn AsyncCacheLoader<K, V>>) -> Self {
    let can_bulk_load = loader.supports_async_bulk_load();
    Self {
      shared,
      loader,
      can_bulk_load,
    }
  }

  /// Returns the future stored for `key`, if any, recording a hit or a miss.
  pub fn get_if_present<Q>(&self, key: &Q) -> Option<CacheFuture<V>>
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    self
      .shared
      .get_if_present(key, true)
      .map(CacheFuture::from_inner)
  }

  /// Returns the future for `key`, starting a load with the cache's loader if
  /// the key is absent.
  pub fn get(&self, key: K) -> CacheFuture<V> {
    let loader = self.loader.clone();
    self.get_with(key, move |k| loader.async_load(k.clone()))
  }

  /// Returns the future for `key`, starting the load returned by `f` if the
  /// key is absent.
  ///
  /// `f` runs on the calling thread, after the placeholder is installed and
  /// outside of any lock. The future it returns is driven on the cache's
  /// spawner.
  pub fn get_with<F>(&self, key: K, f: F) -> CacheFuture<V>
  where
    F: FnOnce(&K) -> LoadFutureOutput<V>,
  {
    let start = self.shared.stats.read_ticker();
    let mut created = None;
    let installed = self
      .shared
      .compute_if_absent_arc(key.clone(), LoadMode::Deferred, |_| {
        let placeholder = Arc::new(LoadFuture::new());
        created = Some(placeholder.clone());
        Ok::<_, Infallible>(Some(placeholder))
      });

    if let Some(placeholder) = created {
      let load = catch_unwind(AssertUnwindSafe(|| f(&key)));
      let completer = LoadCompleter::new(self.shared.clone(), key, placeholder.clone(), start);
      match load {
        Ok(load) => self.spawn_load(completer, load),
        Err(payload) => completer.finish(into_load_result(Err(payload))),
      }
      return CacheFuture::from_inner(placeholder);
    }

    match installed {
      Ok(Some(existing)) => CacheFuture::from_inner(existing),
      Ok(None) => CacheFuture::empty(),
      Err(never) => match never {},
    }
  }

  fn spawn_load(&self, completer: LoadCompleter<K, V, H>, load: LoadFutureOutput<V>) {
    let task = async move {
      let outcome = AssertUnwindSafe(load).catch_unwind().await;
      completer.finish(into_load_result(outcome));
    };
    self.shared.spawner.spawn(task.boxed());
  }

  /// Returns the values for `keys` once every constituent load has settled.
  ///
  /// Present keys count as hits. With a bulk-capable loader, each absent key
  /// gets a proxy future and the keys whose proxy was installed are loaded by
  /// a single `async_load_all`; otherwise each absent key is loaded with
  /// `get`. Keys whose load failed or produced no value are left out of the
  /// result; the call as a whole never fails.
  pub fn get_all<I>(&self, keys: I) -> BoxFuture<'static, HashMap<K, Arc<V>>>
  where
    I: IntoIterator<Item = K>,
  {
    let mut seen = HashSet::new();
    let keys = keys
      .into_iter()
      .filter(|key| seen.insert(key.clone()))
      .collect::<Vec<_>>();

    if !self.can_bulk_load {
      let futures = keys
        .into_iter()
        .map(|key| {
          let future = self.get(key.clone());
          (key, future)
        })
        .collect();
      return compose(futures);
    }

    let mut futures = Vec::with_capacity(keys.len());
    let mut proxies = Vec::new();
    for key in keys {
      let future = match self.shared.get(&key) {
        Some(existing) => existing,
        None => {
          let proxy = Arc::new(LoadFuture::new());
          match self.shared.put_if_absent_arc(key.clone(), proxy.clone()) {
            Some(winner) => winner,
            None => {
              proxies.push((key.clone(), proxy.clone()));
              proxy
            }
          }
        }
      };
      futures.push((key, CacheFuture::from_inner(future)));
    }

    self.shared.stats.record_misses(proxies.len() as u64);
    self
      .shared
      .stats
      .record_hits((futures.len() - proxies.len()) as u64);

    if !proxies.is_empty() {
      self.spawn_bulk_load(proxies);
    }
    compose(futures)
  }

  fn spawn_bulk_load(&self, proxies: Vec<(K, Arc<LoadFuture<V>>)>) {
    let keys = proxies.iter().map(|(key, _)| key.clone()).collect::<Vec<_>>();
    let completer = AsyncBulkCompleter::new(self.shared.clone(), proxies);
    match catch_unwind(AssertUnwindSafe(|| self.loader.async_load_all(keys))) {
      Ok(load) => {
        let task = async move {
          let outcome = AssertUnwindSafe(load).catch_unwind().await;
          completer.accept(outcome);
        };
        self.shared.spawner.spawn(task.boxed());
      }
      Err(payload) => completer.accept(Err(payload)),
    }
  }

  /// Associates `future` with `key`, replacing any current entry.
  ///
  /// A future that already failed or completed without a value is not
  /// installed; it counts as a failed load and removes the current entry.
  /// Otherwise the future is visible right away, and when it settles without
  /// a value it is removed again.
  pub fn put(&self, key: K, future: CacheFuture<V>) {
    if matches!(future.now(), Some(Err(_) | Ok(None))) {
      self.shared.stats.record_load_failure(0);
      self.shared.remove(&key);
      return;
    }

    let start = self.shared.stats.read_ticker();
    let inner = future.into_inner();
    self.shared.put_arc(key.clone(), inner.clone());

    // Weak handles: a future that never settles must not keep the cache alive.
    let shared = Arc::downgrade(&self.shared);
    let target = Arc::downgrade(&inner);
    inner.on_complete(move |result| {
      let Some(shared) = shared.upgrade() else {
        return;
      };
      let load_time = shared.stats.elapsed_since(start);
      match result {
        Ok(Some(_)) => shared.stats.record_load_success(load_time),
        _ => {
          shared.stats.record_load_failure(load_time);
          if let Some(target) = Weak::upgrade(&target) {
            shared.remove_if_same(&key, &target);
          }
        }
      }
    });
  }

  /// Loads a new value for `key` in the background.
  ///
  /// Waits for the current future, then calls `async_reload` with its value,
  /// or `async_load` if there is none. The result is installed with the same
  /// atomic compute as every other write, and only if the entry is still the
  /// one the refresh started from; a write made in the meantime wins. A
  /// failed or empty refresh leaves the current entry in place and is only
  /// logged.
  pub fn refresh(&self, key: K) {
    let shared = self.shared.clone();
    let loader = self.loader.clone();
    let task = async move {
      let start = shared.stats.read_ticker();
      let current = shared.get(&key);
      let old_value = match &current {
        Some(current) => CacheFuture::from_inner(current.clone()).await.ok().flatten(),
        None => None,
      };

      let load = catch_unwind(AssertUnwindSafe(|| match old_value {
        Some(old) => loader.async_reload(key.clone(), old),
        None => loader.async_load(key.clone()),
      }));
      let outcome = match load {
        Ok(load) => AssertUnwindSafe(load).catch_unwind().await,
        Err(payload) => Err(payload),
      };

      let load_time = shared.stats.elapsed_since(start);
      match into_load_result(outcome) {
        Ok(Some(value)) => {
          shared.stats.record_load_success(load_time);
          let refreshed = Arc::new(LoadFuture::completed(Ok(Some(value))));
          let installed = shared.try_remap(key, false, LoadMode::Untracked, |_, present| {
            let unchanged = match (&current, present) {
              (Some(read), Some(present)) => Arc::ptr_eq(read, present),
              (None, None) => true,
              _ => false,
            };
            if !unchanged {
              tracing::debug!("entry changed during refresh, discarding the refreshed value");
              return Ok::<_, Infallible>(present.cloned());
            }
            Ok(Some(refreshed))
          });
          if let Err(never) = installed {
            match never {}
          }
        }
        Ok(None) => {
          shared.stats.record_load_failure(load_time);
          tracing::debug!("refresh produced no value, keeping the current one");
        }
        Err(e) => {
          shared.stats.record_load_failure(load_time);
          tracing::warn!(error = %e, "exception thrown during refresh");
        }
      }
    };
    self.shared.spawner.spawn(task.boxed());
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

  pub fn clear(&self) {
    self.shared.clear();
  }

  /// The number of entries, pending loads included.
  pub fn estimated_size(&self) -> u64 {
    self.shared.len() as u64
  }

  pub fn stats(&self) -> StatsSnapshot {
    self.shared.stats()
  }

  pub fn policy(&self) -> UnboundedPolicy {
    UnboundedPolicy::new(self.shared.stats.is_enabled())
  }

  /// A blocking view of this cache, sharing its storage.
  pub fn synchronous(&self) -> SyncLoadingView<K, V, H> {
    SyncLoadingView::new(self.clone())
  }
}

/// Settles the placeholder of a single load.
///
/// Records the outcome, drops the placeholder from the store if it produced
/// no value, then completes it. A completer dropped before `finish` (the load
/// task was never polled to the end) fails the placeholder with `NoResult`.
pub(crate) struct LoadCompleter<K, V, H>
where
  K: Clone + Eq + Hash + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  shared: Arc<CacheShared<K, LoadFuture<V>, H>>,
  key: K,
  placeholder: Arc<LoadFuture<V>>,
  start: u64,
  finished: bool,
}

impl<K, V, H> LoadCompleter<K, V, H>
where
  K: Clone + Eq + Hash + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  pub(crate) fn new(shared: Arc<CacheShared<K, LoadFuture<V>, H>>, key: K, placeholder: Arc<LoadFuture<V>>, start: u64) -> Self {
    Self {
      shared,
      key,
      placeholder,
      start,
      finished: false,
    }
  }

  pub(crate) fn finish(mut self, result: LoadResult<V>) {
    self.settle(result);
  }

  fn settle(&mut self, result: LoadResult<V>) {
    self.finished = true;
    let stats = &self.shared.stats;
    let load_time = stats.elapsed_since(self.start);
    match &result {
      Ok(Some(_)) => stats.record_load_success(load_time),
      _ => {
        stats.record_load_failure(load_time);
        self.shared.remove_if_same(&self.key, &self.placeholder);
      }
    }
    self.placeholder.complete(result);
  }
}

impl<K, V, H> Drop for LoadCompleter<K, V, H>
where
  K: Clone + Eq + Hash + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  fn drop(&mut self) {
    if !self.finished {
      tracing::debug!("load task dropped before completing");
      self.settle(Err(LoadError::NoResult));
    }
  }
}

/// Waits for every future and collects the values that loaded.
fn compose<K, V>(futures: Vec<(K, CacheFuture<V>)>) -> BoxFuture<'static, HashMap<K, Arc<V>>>
where
  K: Eq + Hash + Send + 'static,
  V: Send + Sync + 'static,
{
  let pending = futures
    .into_iter()
    .map(|(key, future)| future.map(move |result| (key, result)));
  future::join_all(pending)
    .map(|settled| {
      settled
        .into_iter()
        .filter_map(|(key, result)| match result {
          Ok(Some(value)) => Some((key, value)),
          _ => None,
        })
        .collect()
    })
    .boxed()
}

/// Forwards removals from an asynchronous cache to a listener written for
/// plain values.
///
/// Only futures that complete with a value are reported. A future removed
/// while its load is still running is reported once it completes, on the
/// thread that completes it.
pub(crate) struct AsyncRemovalListener<K, V> {
  delegate: Arc<dyn RemovalListener<K, V>>,
}

impl<K, V> AsyncRemovalListener<K, V> {
  pub(crate) fn new(delegate: Arc<dyn RemovalListener<K, V>>) -> Self {
    Self { delegate }
  }
}

impl<K, V> RemovalListener<K, LoadFuture<V>> for AsyncRemovalListener<K, V>
where
  K: Send + Sync + 'static,
  V: Send + Sync + 'static,
{
  fn on_removal(&self, notification: RemovalNotification<K, LoadFuture<V>>) {
    let (key, future, cause) = notification.into_parts();
    let delegate = self.delegate.clone();
    future.on_complete(move |result| {
      let Ok(Some(value)) = result else {
        return;
      };
      let notification = RemovalNotification::new(key, value.clone(), cause);
      if let Err(payload) = catch_unwind(AssertUnwindSafe(|| delegate.on_removal(notification))) {
        let e = LoadError::from_panic(payload);
        tracing::error!(error = %e, "removal listener panicked");
      }
    });
  }
}
