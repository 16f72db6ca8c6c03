mod common;

use common::TimesTenLoader;
use std::thread;
use std::time::{Duration, Instant};
use tessera_cache::{CacheBuilder, CacheFuture, LoadError, SyncLoadingView};

fn view(loader: TimesTenLoader) -> SyncLoadingView<i32, i32> {
  CacheBuilder::default()
    .record_stats(true)
    .build_async_from(loader)
    .unwrap()
    .synchronous()
}

#[test]
fn test_blocking_get_loads_once() {
  let loader = TimesTenLoader::default();
  let view = view(loader.clone());

  assert_eq!(*view.get(5).unwrap().unwrap(), 50);
  assert_eq!(*view.get(5).unwrap().unwrap(), 50);
  assert_eq!(view.get_if_present(&5).as_deref(), Some(&50));
  assert_eq!(loader.loads(), 1);

  let stats = view.stats();
  assert_eq!(stats.miss_count, 1);
  assert_eq!(stats.hit_count, 2);
  assert_eq!(stats.load_success_count, 1);
}

#[test]
fn test_pending_entries_read_as_absent() {
  let view = view(TimesTenLoader::default());
  let (promise, future) = CacheFuture::pending();
  view.as_async().put(1, future);

  assert!(view.get_if_present(&1).is_none());
  assert!(view.get_all_present([1]).is_empty());

  promise.succeed(11);
  assert_eq!(view.get_if_present(&1).as_deref(), Some(&11));
  assert_eq!(*view.get_all_present([1, 2])[&1], 11);

  let stats = view.stats();
  // `get_if_present` counts a stored future as a hit, ready or not;
  // `get_all_present` only counts ready values.
  assert_eq!(stats.hit_count, 3);
  assert_eq!(stats.miss_count, 2);
}

#[test]
fn test_put_and_invalidate() {
  let view = view(TimesTenLoader::default());
  view.put(1, 1);
  view.put_all([(2, 2), (3, 3)]);
  assert_eq!(view.estimated_size(), 3);
  assert_eq!(view.get_all_present([1, 2, 3]).len(), 3);

  view.invalidate(&1);
  view.invalidate_all([2]);
  assert_eq!(view.estimated_size(), 1);
  view.clear();
  view.clean_up();
  assert_eq!(view.estimated_size(), 0);
}

#[test]
fn test_get_with_and_errors() {
  let view = view(TimesTenLoader::default());
  let value = view.get_with(2, |k| Ok(Some(k * 7))).unwrap();
  assert_eq!(value.as_deref(), Some(&14));

  let err = view.get_with(3, |_| Err("unavailable".into())).unwrap_err();
  assert!(matches!(err, LoadError::Loader(_)));
  assert!(view.get_if_present(&3).is_none());
}

#[test]
fn test_get_all_blocks_for_bulk_load() {
  let loader = TimesTenLoader::bulk();
  let view = view(loader.clone());
  view.put(1, 100);

  let result = view.get_all([1, 2, 3, -1]);
  assert_eq!(result.len(), 3);
  assert_eq!(*result[&1], 100);
  assert_eq!(*result[&3], 30);
  assert_eq!(loader.bulk_loads(), 1);
}

#[test]
fn test_refresh_through_view() {
  let loader = TimesTenLoader::default();
  let view = view(loader.clone());
  view.put(2, 5);
  view.refresh(2);

  let deadline = Instant::now() + Duration::from_secs(2);
  // `reload` adds the key to the old value.
  while view.get_if_present(&2).as_deref() != Some(&7) {
    assert!(Instant::now() < deadline, "refresh did not land");
    thread::sleep(Duration::from_millis(5));
  }
  assert_eq!(loader.loads(), 1);
}
