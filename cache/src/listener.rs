use std::fmt;
use std::sync::Arc;

/// Describes the reason an entry left the cache.
///
/// This cache never evicts or expires entries, so removals are always either
/// explicit or the result of a value being overwritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RemovalCause {
  /// The entry was removed by the user, e.g. `invalidate`, `remove`, `clear`,
  /// or a compute function returning `None`.
  Explicit,
  /// The entry's value was replaced by a new value for the same key.
  Replaced,
}

impl RemovalCause {
  /// Returns `true` if the entry was removed automatically. Never the case
  /// for a non-evicting cache, but kept so listeners can be written once.
  pub fn was_evicted(&self) -> bool {
    false
  }
}

impl fmt::Display for RemovalCause {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RemovalCause::Explicit => write!(f, "explicitly removed"),
      RemovalCause::Replaced => write!(f, "replaced"),
    }
  }
}

/// An immutable record of a key/value pair leaving the cache.
///
/// It is created only after the mutation it describes has become visible to
/// readers of the cache.
#[derive(Clone)]
pub struct RemovalNotification<K, V> {
  key: K,
  value: Arc<V>,
  cause: RemovalCause,
}

impl<K, V> RemovalNotification<K, V> {
  pub(crate) fn new(key: K, value: Arc<V>, cause: RemovalCause) -> Self {
    Self { key, value, cause }
  }

  pub fn key(&self) -> &K {
    &self.key
  }

  pub fn value(&self) -> &Arc<V> {
    &self.value
  }

  pub fn cause(&self) -> RemovalCause {
    self.cause
  }

  /// Splits the notification into its parts.
  pub fn into_parts(self) -> (K, Arc<V>, RemovalCause) {
    (self.key, self.value, self.cause)
  }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for RemovalNotification<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RemovalNotification")
      .field("key", &self.key)
      .field("value", &self.value)
      .field("cause", &self.cause)
      .finish()
  }
}

/// A listener that can be registered with the cache to receive notifications
/// when entries are removed or replaced.
///
/// `on_removal` is called on the cache's dedicated notifier thread, never
/// while the cache holds any of its internal locks. A panic inside the
/// listener is caught and logged; it never reaches the mutating caller.
pub trait RemovalListener<K, V>: Send + Sync {
  fn on_removal(&self, notification: RemovalNotification<K, V>);
}

impl<K, V, F> RemovalListener<K, V> for F
where
  F: Fn(RemovalNotification<K, V>) + Send + Sync,
{
  fn on_removal(&self, notification: RemovalNotification<K, V>) {
    self(notification)
  }
}
