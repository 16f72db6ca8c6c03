use crate::time::Ticker;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_utils::CachePadded;

/// A thread-safe, internal statistics accumulator for the cache.
/// All fields are atomic to allow for lock-free updates. Counters only ever
/// grow.
#[derive(Debug, Default)]
pub struct StatsCounter {
  hits: CachePadded<AtomicU64>,
  misses: CachePadded<AtomicU64>,
  load_successes: CachePadded<AtomicU64>,
  load_failures: CachePadded<AtomicU64>,
  total_load_time: CachePadded<AtomicU64>,
}

impl StatsCounter {
  pub fn new() -> Self {
    Self::default()
  }

  #[inline]
  pub fn record_hits(&self, count: u64) {
    self.hits.fetch_add(count, Ordering::Relaxed);
  }

  #[inline]
  pub fn record_misses(&self, count: u64) {
    self.misses.fetch_add(count, Ordering::Relaxed);
  }

  /// Records a load that produced a value, and the time it took.
  #[inline]
  pub fn record_load_success(&self, load_time_nanos: u64) {
    self.load_successes.fetch_add(1, Ordering::Relaxed);
    self
      .total_load_time
      .fetch_add(load_time_nanos, Ordering::Relaxed);
  }

  /// Records a load that produced no value or failed, and the time it took.
  #[inline]
  pub fn record_load_failure(&self, load_time_nanos: u64) {
    self.load_failures.fetch_add(1, Ordering::Relaxed);
    self
      .total_load_time
      .fetch_add(load_time_nanos, Ordering::Relaxed);
  }

  /// Creates a point-in-time snapshot of the current counters.
  pub fn snapshot(&self) -> StatsSnapshot {
    StatsSnapshot {
      hit_count: self.hits.load(Ordering::Relaxed),
      miss_count: self.misses.load(Ordering::Relaxed),
      load_success_count: self.load_successes.load(Ordering::Relaxed),
      load_failure_count: self.load_failures.load(Ordering::Relaxed),
      total_load_time: Duration::from_nanos(self.total_load_time.load(Ordering::Relaxed)),
    }
  }
}

/// A point-in-time, public-facing snapshot of the cache's statistics.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StatsSnapshot {
  /// The number of lookups that found a present value.
  pub hit_count: u64,
  /// The number of lookups that found nothing and may have triggered a load.
  pub miss_count: u64,
  /// The number of loads that produced a value.
  pub load_success_count: u64,
  /// The number of loads that produced no value or failed.
  pub load_failure_count: u64,
  /// The total time spent loading, successful or not.
  pub total_load_time: Duration,
}

impl StatsSnapshot {
  pub fn request_count(&self) -> u64 {
    self.hit_count.saturating_add(self.miss_count)
  }

  pub fn load_count(&self) -> u64 {
    self
      .load_success_count
      .saturating_add(self.load_failure_count)
  }

  /// The ratio of hits to lookups, or `1.0` when there were no lookups.
  pub fn hit_rate(&self) -> f64 {
    let requests = self.request_count();
    if requests == 0 {
      1.0
    } else {
      self.hit_count as f64 / requests as f64
    }
  }

  /// The ratio of misses to lookups, or `0.0` when there were no lookups.
  pub fn miss_rate(&self) -> f64 {
    let requests = self.request_count();
    if requests == 0 {
      0.0
    } else {
      self.miss_count as f64 / requests as f64
    }
  }

  /// The mean time spent per load, or zero when nothing was loaded.
  pub fn average_load_penalty(&self) -> Duration {
    let loads = self.load_count();
    if loads == 0 {
      Duration::ZERO
    } else {
      Duration::from_nanos((self.total_load_time.as_nanos() / loads as u128) as u64)
    }
  }
}

impl fmt::Debug for StatsSnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StatsSnapshot")
      .field("hit_count", &self.hit_count)
      .field("miss_count", &self.miss_count)
      .field("hit_rate", &format!("{:.2}%", self.hit_rate() * 100.0))
      .field("load_success_count", &self.load_success_count)
      .field("load_failure_count", &self.load_failure_count)
      .field("total_load_time", &self.total_load_time)
      .finish()
  }
}

/// When a wrapped function's outcome is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoadMode {
  /// The function returns the loaded value itself.
  Immediate,
  /// The function returns a placeholder that settles later; the caller
  /// records success or failure when it does.
  Deferred,
  /// The load was already recorded by the caller; the function only
  /// installs its result.
  Untracked,
}

/// Decorates load and remap functions so that invoking them records misses,
/// load outcomes and load time.
///
/// Every call site that can trigger a load goes through `observe`. When
/// statistics are disabled the function is called directly.
pub(crate) struct StatsRecorder {
  enabled: bool,
  counter: StatsCounter,
  ticker: Arc<dyn Ticker>,
}

impl fmt::Debug for StatsRecorder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StatsRecorder")
      .field("enabled", &self.enabled)
      .finish_non_exhaustive()
  }
}

impl StatsRecorder {
  pub(crate) fn new(enabled: bool, ticker: Arc<dyn Ticker>) -> Self {
    Self {
      enabled,
      counter: StatsCounter::new(),
      ticker,
    }
  }

  #[inline]
  pub(crate) fn is_enabled(&self) -> bool {
    self.enabled
  }

  #[inline]
  pub(crate) fn read_ticker(&self) -> u64 {
    if self.enabled {
      self.ticker.read()
    } else {
      0
    }
  }

  /// Nanoseconds elapsed since `start`, a previous `read_ticker` reading.
  #[inline]
  pub(crate) fn elapsed_since(&self, start: u64) -> u64 {
    self.read_ticker().saturating_sub(start)
  }

  pub(crate) fn record_hits(&self, count: u64) {
    if self.enabled && count > 0 {
      self.counter.record_hits(count);
    }
  }

  pub(crate) fn record_misses(&self, count: u64) {
    if self.enabled && count > 0 {
      self.counter.record_misses(count);
    }
  }

  pub(crate) fn record_load_success(&self, load_time_nanos: u64) {
    if self.enabled {
      self.counter.record_load_success(load_time_nanos);
    }
  }

  pub(crate) fn record_load_failure(&self, load_time_nanos: u64) {
    if self.enabled {
      self.counter.record_load_failure(load_time_nanos);
    }
  }

  pub(crate) fn snapshot(&self) -> StatsSnapshot {
    self.counter.snapshot()
  }

  /// Runs `f` as a load attempt.
  ///
  /// Records one miss beforehand if `record_miss` is set, then exactly one of
  /// load-success (`Ok(Some)`) or load-failure (`Ok(None)`, `Err`, or a panic
  /// unwinding out of `f`). In `Deferred` mode a successful return records
  /// nothing, since the returned placeholder has not settled yet; errors and
  /// panics are still recorded as failures.
  pub(crate) fn observe<T, E, F>(&self, record_miss: bool, mode: LoadMode, f: F) -> Result<Option<T>, E>
  where
    F: FnOnce() -> Result<Option<T>, E>,
  {
    if !self.enabled || mode == LoadMode::Untracked {
      return f();
    }
    if record_miss {
      self.counter.record_misses(1);
    }

    let timer = LoadTimer {
      recorder: self,
      start: self.ticker.read(),
      armed: true,
    };
    let result = f();
    let load_time = timer.disarm();

    match (&result, mode) {
      (Ok(Some(_)), LoadMode::Immediate) => self.counter.record_load_success(load_time),
      (Ok(Some(_)), LoadMode::Deferred) => {}
      (Ok(None), LoadMode::Immediate) | (Err(_), _) => self.counter.record_load_failure(load_time),
      (Ok(None), LoadMode::Deferred) | (_, LoadMode::Untracked) => {}
    }
    result
  }
}

/// Closes the load timer. If dropped while still armed, the function it
/// guards unwound, and a load failure is recorded on the way out.
struct LoadTimer<'a> {
  recorder: &'a StatsRecorder,
  start: u64,
  armed: bool,
}

impl LoadTimer<'_> {
  fn disarm(mut self) -> u64 {
    self.armed = false;
    self.recorder.ticker.read().saturating_sub(self.start)
  }
}

impl Drop for LoadTimer<'_> {
  fn drop(&mut self) {
    if self.armed {
      let load_time = self.recorder.ticker.read().saturating_sub(self.start);
      self.recorder.counter.record_load_failure(load_time);
    }
  }
}
