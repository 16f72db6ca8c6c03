use std::error::Error;
use std::sync::Arc;

/// The error type loaders hand back to the cache.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// A loader failure shared between every caller awaiting the same load.
pub type SharedError = Arc<dyn Error + Send + Sync + 'static>;

/// Errors that can occur when building a cache.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
  /// The cache was configured with zero shards, which is not allowed.
  #[error("shard count cannot be zero")]
  ZeroShards,
}

/// The reason a load did not produce a value.
///
/// A single load may be awaited by many callers, so the error is cheaply
/// cloneable and keeps the loader's original cause behind an `Arc`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LoadError {
  /// The loader returned an error.
  #[error("loader failed: {0}")]
  Loader(#[source] SharedError),
  /// The loader panicked while computing the value.
  #[error("loader panicked: {0}")]
  Panicked(String),
  /// The load settled without ever producing a result, e.g. the task that
  /// owned it was dropped, or a bulk load never reported back.
  #[error("load completed without a result")]
  NoResult,
}

impl LoadError {
  /// Returns the loader's original error, if this failure came from one.
  pub fn cause(&self) -> Option<&(dyn Error + Send + Sync + 'static)> {
    match self {
      LoadError::Loader(cause) => Some(cause.as_ref()),
      _ => None,
    }
  }

  /// Builds a `Panicked` error from the payload of a caught panic.
  pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
      (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
      s.clone()
    } else {
      "non-string panic payload".to_string()
    };
    LoadError::Panicked(message)
  }
}

impl From<BoxError> for LoadError {
  fn from(error: BoxError) -> Self {
    LoadError::Loader(Arc::from(error))
  }
}
