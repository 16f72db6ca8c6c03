use std::sync::Arc;
use std::thread;

use futures_util::future::{BoxFuture, FutureExt};

/// A job that may block its thread, such as a synchronous loader call.
pub type BlockingJob = Box<dyn FnOnce() + Send + 'static>;

/// A trait for spawning a future onto an asynchronous runtime.
///
/// This is the cache's execution context: async loads, bulk loads and
/// refreshes are all scheduled through it.
pub trait TaskSpawner: Send + Sync + 'static {
  /// Spawns a type-erased future.
  fn spawn(&self, future: BoxFuture<'static, ()>);

  /// Runs a job that may block. The default wraps it in a future for
  /// `spawn`, which is only right for spawners whose tasks own a thread;
  /// runtimes with shared worker threads should hand it to their blocking
  /// pool instead.
  fn spawn_blocking(&self, job: BlockingJob) {
    self.spawn(async move { job() }.boxed());
  }
}

#[cfg(feature = "tokio")]
pub struct TokioSpawner(tokio::runtime::Handle);

#[cfg(feature = "tokio")]
impl TokioSpawner {
  /// Creates a spawner that uses the current Tokio runtime context.
  /// Panics if called outside of a Tokio runtime.
  pub fn new() -> Self {
    Self(tokio::runtime::Handle::current())
  }

  /// Creates a spawner bound to the given runtime handle.
  pub fn with_handle(handle: tokio::runtime::Handle) -> Self {
    Self(handle)
  }
}

#[cfg(feature = "tokio")]
impl TaskSpawner for TokioSpawner {
  fn spawn(&self, future: BoxFuture<'static, ()>) {
    self.0.spawn(future);
  }

  fn spawn_blocking(&self, job: BlockingJob) {
    self.0.spawn_blocking(job);
  }
}

/// A runtime-agnostic spawner that drives every task to completion on its
/// own OS thread.
///
/// Used when no Tokio runtime is available. Blocking loaders are fine here.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSpawner;

impl TaskSpawner for ThreadSpawner {
  fn spawn(&self, future: BoxFuture<'static, ()>) {
    let spawned = thread::Builder::new()
      .name("tessera-cache-task".into())
      .spawn(move || futures_executor::block_on(future));
    if let Err(e) = spawned {
      tracing::error!(error = %e, "failed to spawn cache task thread");
    }
  }
}

/// Picks the execution context used when the builder was not given one.
pub(crate) fn default_spawner() -> Arc<dyn TaskSpawner> {
  #[cfg(feature = "tokio")]
  {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
      return Arc::new(TokioSpawner::with_handle(handle));
    }
  }
  Arc::new(ThreadSpawner)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::mpsc;
  use std::time::Duration;

  #[test]
  fn thread_spawner_runs_blocking_jobs_off_the_caller() {
    let (tx, rx) = mpsc::channel();
    let caller = thread::current().id();
    ThreadSpawner.spawn_blocking(Box::new(move || {
      let _ = tx.send(thread::current().id());
    }));
    let ran_on = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_ne!(ran_on, caller);
  }

  #[cfg(feature = "tokio")]
  #[test]
  fn tokio_blocking_jobs_leave_the_workers_free() {
    let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
    let spawner = TokioSpawner::with_handle(runtime.handle().clone());
    let (input_tx, input_rx) = mpsc::channel::<i32>();
    let (output_tx, output_rx) = mpsc::channel();

    // Waits on a value that only the runtime's single worker can send.
    spawner.spawn_blocking(Box::new(move || {
      if let Ok(value) = input_rx.recv() {
        let _ = output_tx.send(value * 2);
      }
    }));
    runtime.block_on(async move {
      let sender = tokio::spawn(async move {
        let _ = input_tx.send(21);
      });
      let _ = sender.await;
    });
    assert_eq!(output_rx.recv_timeout(Duration::from_secs(2)).unwrap(), 42);
  }
}
