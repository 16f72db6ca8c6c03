use once_cell::sync::Lazy;
use std::time::Instant;

// The single, static reference point for all tick readings in the cache.
// It is initialized lazily on its first use.
static CACHE_EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// A source of elapsed time, in nanoseconds, used to measure load durations.
///
/// Only differences between two readings are meaningful. Tests can supply a
/// manually advanced ticker through `CacheBuilder::ticker`.
pub trait Ticker: Send + Sync + 'static {
  /// Returns the number of nanoseconds elapsed since an arbitrary origin.
  fn read(&self) -> u64;
}

/// The default ticker, backed by the monotonic system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTicker;

impl Ticker for SystemTicker {
  #[inline]
  fn read(&self) -> u64 {
    Instant::now()
      .saturating_duration_since(*CACHE_EPOCH)
      .as_nanos() as u64
  }
}

/// A ticker that always reads zero. Installed when statistics are disabled
/// so no clock is ever consulted.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct DisabledTicker;

impl Ticker for DisabledTicker {
  #[inline]
  fn read(&self) -> u64 {
    0
  }
}
