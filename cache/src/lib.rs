//! A concurrent, non-evicting, in-memory cache with sync and async loading.
//!
//! # Features
//! - **Sharded storage**: entries live in lock-striped hash maps; every
//!   compound operation is atomic for its key.
//! - **Load once**: concurrent lookups of an absent key share a single load,
//!   whether the loader is synchronous or returns a future.
//! - **Bulk loading**: `get_all` hands every missing key to one `load_all`
//!   call when the loader supports it.
//! - **Statistics**: optional hit, miss and load counters, including the
//!   time spent loading.
//! - **Removal notifications**: a listener receives every removal and
//!   replacement, in order, on a dedicated thread.
//! - **Non-Clone values**: values are stored as `Arc<V>`.
//!
//! Entries are never evicted or expired; they stay until they are removed
//! or replaced.

// Public modules that form the API
pub mod builder;
pub mod error;
pub mod future;
pub mod handles;
pub mod listener;
pub mod loader;
pub mod policy;
pub mod runtime;
pub mod stats;
pub mod time;

// Internal, crate-only modules
mod key_lock;
mod shared;
mod store;
mod task;

// Re-export the primary user-facing types for convenience
pub use builder::CacheBuilder;
pub use error::{BoxError, BuildError, LoadError};
pub use future::{CacheFuture, LoadPromise, LoadResult};
pub use handles::{AsyncLoadingCache, Cache, CacheMap, LoadingCache, SyncLoadingView};
pub use listener::{RemovalCause, RemovalListener, RemovalNotification};
pub use loader::{AsyncCacheLoader, AsyncFnLoader, CacheLoader, FnLoader, LoadFutureOutput, SyncLoaderAdapter};
pub use policy::{Policy, UnboundedPolicy};
pub use runtime::{BlockingJob, TaskSpawner, ThreadSpawner};
pub use stats::StatsSnapshot;
pub use time::{SystemTicker, Ticker};

#[cfg(feature = "tokio")]
pub use runtime::TokioSpawner;
