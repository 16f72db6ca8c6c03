//! Read-only introspection of the policies a cache enforces.
//!
//! Caches built by this crate never evict or expire entries, so every policy
//! query answers `None`. The traits exist so callers can write code against
//! a cache's policy without knowing which flavor of cache they were given.

mod unbounded;

pub use unbounded::UnboundedPolicy;

use std::time::Duration;

/// Size-based eviction settings.
pub trait Eviction: Send + Sync {
  /// Whether entries are bounded by weight rather than by count.
  fn is_weighted(&self) -> bool;

  /// The maximum count or total weight.
  fn maximum(&self) -> u64;
}

/// Time-based expiration settings.
pub trait Expiration: Send + Sync {
  fn expires_after(&self) -> Duration;
}

/// The policies a cache enforces.
pub trait Policy: Send + Sync {
  fn is_recording_stats(&self) -> bool;

  fn eviction(&self) -> Option<&dyn Eviction> {
    None
  }

  fn expire_after_access(&self) -> Option<&dyn Expiration> {
    None
  }

  fn expire_after_write(&self) -> Option<&dyn Expiration> {
    None
  }
}
