mod common;

use common::{StepTicker, TimesTenLoader};
use std::time::Duration;
use tessera_cache::{CacheBuilder, StatsSnapshot};

#[test]
fn test_stats_disabled_by_default() {
  let cache = CacheBuilder::<i32, i32>::default().build().unwrap();
  cache.put(1, 1);
  cache.get_if_present(&1);
  cache.get_if_present(&2);
  assert_eq!(cache.stats(), StatsSnapshot::default());
  assert!(!tessera_cache::Policy::is_recording_stats(&cache.policy()));
}

#[test]
fn test_hit_and_miss_rates() {
  let cache = CacheBuilder::<i32, i32>::default()
    .record_stats(true)
    .build()
    .unwrap();
  cache.put(1, 1);
  for _ in 0..3 {
    cache.get_if_present(&1);
  }
  cache.get_if_present(&2);

  let stats = cache.stats();
  assert_eq!(stats.request_count(), 4);
  assert_eq!(stats.hit_rate(), 0.75);
  assert_eq!(stats.miss_rate(), 0.25);
}

#[test]
fn test_load_time_comes_from_the_ticker() {
  let cache = CacheBuilder::default()
    .record_stats(true)
    .ticker(StepTicker::new(1_000))
    .build_with(TimesTenLoader::default())
    .unwrap();

  cache.get(1).unwrap();
  cache.get(-1).unwrap();

  let stats = cache.stats();
  assert_eq!(stats.load_count(), 2);
  // Each load reads the ticker twice, one step apart.
  assert_eq!(stats.total_load_time, Duration::from_micros(2));
  assert_eq!(stats.average_load_penalty(), Duration::from_micros(1));
}

#[test]
fn test_panicking_loader_counts_as_failure() {
  let cache = CacheBuilder::<i32, i32>::default()
    .record_stats(true)
    .build()
    .unwrap();

  let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
    cache.get_with(1, |_| panic!("loader bug"));
  }));
  assert!(outcome.is_err());

  let stats = cache.stats();
  assert_eq!(stats.miss_count, 1);
  assert_eq!(stats.load_failure_count, 1);
  // The shard lock was released on unwind.
  cache.put(1, 1);
  assert_eq!(cache.get_if_present(&1).as_deref(), Some(&1));
}
