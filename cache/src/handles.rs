//! The user-facing cache handles.
//!
//! Every handle is a cheap, cloneable reference to shared storage.

mod bulk;
pub mod futures;
pub mod map;
pub mod sync;
pub mod view;

pub use futures::AsyncLoadingCache;
pub use map::CacheMap;
pub use sync::{Cache, LoadingCache};
pub use view::SyncLoadingView;
