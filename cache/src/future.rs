use crate::error::LoadError;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::thread::{self, Thread};

use parking_lot::Mutex;

/// The outcome of a load: a value, no value, or a failure.
pub type LoadResult<V> = Result<Option<Arc<V>>, LoadError>;

type Hook<V> = Box<dyn FnOnce(&LoadResult<V>) + Send + 'static>;

/// Represents a waiter in the queue for a `LoadFuture`.
enum Waiter<V> {
  Sync(Thread),
  Async(Waker),
  Hook(Hook<V>),
}

/// The internal state of a value being loaded.
enum State<V> {
  Computing,
  Complete(LoadResult<V>),
}

struct Inner<V> {
  state: State<V>,
  waiters: Vec<Waiter<V>>,
}

/// A placeholder for a value being computed for the cache.
///
/// It is the value type stored by the asynchronous cache, and can be awaited
/// by multiple sync threads and async tasks at the same time. It completes
/// exactly once; later completions are ignored.
pub(crate) struct LoadFuture<V> {
  inner: Mutex<Inner<V>>,
}

impl<V> LoadFuture<V> {
  /// Creates a new `LoadFuture` in the "Computing" state.
  pub(crate) fn new() -> Self {
    Self {
      inner: Mutex::new(Inner {
        state: State::Computing,
        waiters: Vec::new(),
      }),
    }
  }

  pub(crate) fn completed(result: LoadResult<V>) -> Self {
    Self {
      inner: Mutex::new(Inner {
        state: State::Complete(result),
        waiters: Vec::new(),
      }),
    }
  }

  /// Completes the future, waking all waiters and then running completion
  /// hooks outside the lock. Returns `false` if it was already complete.
  pub(crate) fn complete(&self, result: LoadResult<V>) -> bool {
    let waiters = {
      let mut inner = self.inner.lock();
      if let State::Complete(_) = inner.state {
        return false;
      }
      inner.state = State::Complete(result.clone());
      std::mem::take(&mut inner.waiters)
    };

    for waiter in waiters {
      match waiter {
        Waiter::Sync(thread) => thread.unpark(),
        Waiter::Async(waker) => waker.wake(),
        Waiter::Hook(hook) => hook(&result),
      }
    }
    true
  }

  /// Registers `hook` to run once with the final result. Runs it right away,
  /// on the calling thread, if the future already completed.
  pub(crate) fn on_complete<F>(&self, hook: F)
  where
    F: FnOnce(&LoadResult<V>) + Send + 'static,
  {
    let done = {
      let mut inner = self.inner.lock();
      match &inner.state {
        State::Complete(result) => result.clone(),
        State::Computing => {
          inner.waiters.push(Waiter::Hook(Box::new(hook)));
          return;
        }
      }
    };
    hook(&done);
  }

  /// Returns the result if the future has completed.
  pub(crate) fn peek(&self) -> Option<LoadResult<V>> {
    match &self.inner.lock().state {
      State::Complete(result) => Some(result.clone()),
      State::Computing => None,
    }
  }

  pub(crate) fn is_done(&self) -> bool {
    matches!(self.inner.lock().state, State::Complete(_))
  }

  /// Returns the value if the future completed successfully with one.
  pub(crate) fn value_if_ready(&self) -> Option<Arc<V>> {
    match &self.inner.lock().state {
      State::Complete(Ok(Some(value))) => Some(value.clone()),
      _ => None,
    }
  }

  /// Blocks the calling thread until the future completes.
  pub(crate) fn wait(&self) -> LoadResult<V> {
    loop {
      {
        let mut inner = self.inner.lock();
        if let State::Complete(result) = &inner.state {
          return result.clone();
        }
        inner.waiters.push(Waiter::Sync(thread::current()));
      }
      // Spurious wakeups just loop back around and re-register.
      thread::park();
    }
  }

  fn poll_result(&self, cx: &mut Context<'_>) -> Poll<LoadResult<V>> {
    let mut inner = self.inner.lock();
    match &inner.state {
      State::Complete(result) => Poll::Ready(result.clone()),
      State::Computing => {
        let waker = cx.waker();
        let registered = inner
          .waiters
          .iter()
          .any(|w| matches!(w, Waiter::Async(existing) if existing.will_wake(waker)));
        if !registered {
          inner.waiters.push(Waiter::Async(waker.clone()));
        }
        Poll::Pending
      }
    }
  }
}

/// A shareable handle to the eventual result of a cache load.
///
/// Cloning is cheap and every clone observes the same result. It can be
/// `.await`ed, or waited on synchronously with [`CacheFuture::wait`].
pub struct CacheFuture<V> {
  inner: Arc<LoadFuture<V>>,
}

impl<V> Clone for CacheFuture<V> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
    }
  }
}

impl<V> CacheFuture<V> {
  /// A future already completed with `value`.
  pub fn ready(value: V) -> Self {
    Self::ready_arc(Arc::new(value))
  }

  pub fn ready_arc(value: Arc<V>) -> Self {
    Self::from_inner(Arc::new(LoadFuture::completed(Ok(Some(value)))))
  }

  /// A future already completed with no value.
  pub fn empty() -> Self {
    Self::from_inner(Arc::new(LoadFuture::completed(Ok(None))))
  }

  /// A future already completed with `error`.
  pub fn failed(error: impl Into<LoadError>) -> Self {
    Self::from_inner(Arc::new(LoadFuture::completed(Err(error.into()))))
  }

  /// Creates an incomplete future together with the promise that completes
  /// it. Whoever holds the promise is the only one able to settle it.
  pub fn pending() -> (LoadPromise<V>, CacheFuture<V>) {
    let inner = Arc::new(LoadFuture::new());
    let promise = LoadPromise {
      target: Some(inner.clone()),
    };
    (promise, Self::from_inner(inner))
  }

  pub fn is_done(&self) -> bool {
    self.inner.is_done()
  }

  /// Returns `true` if the future completed with an error.
  pub fn is_failed(&self) -> bool {
    matches!(self.inner.peek(), Some(Err(_)))
  }

  /// Returns the result without waiting, if there is one yet.
  pub fn now(&self) -> Option<LoadResult<V>> {
    self.inner.peek()
  }

  /// Blocks the current thread until the result is available.
  pub fn wait(&self) -> LoadResult<V> {
    self.inner.wait()
  }

  /// Returns `true` if both handles refer to the same underlying load.
  pub fn ptr_eq(&self, other: &Self) -> bool {
    Arc::ptr_eq(&self.inner, &other.inner)
  }

  pub(crate) fn from_inner(inner: Arc<LoadFuture<V>>) -> Self {
    Self { inner }
  }

  pub(crate) fn into_inner(self) -> Arc<LoadFuture<V>> {
    self.inner
  }
}

impl<V> Future for CacheFuture<V> {
  type Output = LoadResult<V>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    self.inner.poll_result(cx)
  }
}

impl<V> fmt::Debug for CacheFuture<V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = match self.inner.peek() {
      None => "pending",
      Some(Ok(Some(_))) => "ready",
      Some(Ok(None)) => "empty",
      Some(Err(_)) => "failed",
    };
    f.debug_struct("CacheFuture").field("state", &state).finish()
  }
}

/// The write side of a [`CacheFuture`].
///
/// Dropping an unfulfilled promise completes its future with
/// [`LoadError::NoResult`], so waiters are never stranded.
pub struct LoadPromise<V> {
  target: Option<Arc<LoadFuture<V>>>,
}

impl<V> LoadPromise<V> {
  /// Settles the future with `result`.
  pub fn complete(mut self, result: LoadResult<V>) {
    if let Some(target) = self.target.take() {
      target.complete(result);
    }
  }

  pub fn succeed(self, value: V) {
    self.complete(Ok(Some(Arc::new(value))));
  }

  pub fn fail(self, error: impl Into<LoadError>) {
    self.complete(Err(error.into()));
  }
}

impl<V> Drop for LoadPromise<V> {
  fn drop(&mut self) {
    if let Some(target) = self.target.take() {
      target.complete(Err(LoadError::NoResult));
    }
  }
}

impl<V> fmt::Debug for LoadPromise<V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LoadPromise")
      .field("settled", &self.target.is_none())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;

  #[test]
  fn wait_blocks_until_promise_completes() {
    let (promise, future) = CacheFuture::<u32>::pending();
    let waiter = {
      let future = future.clone();
      thread::spawn(move || future.wait())
    };

    thread::sleep(Duration::from_millis(20));
    assert!(!future.is_done());
    promise.succeed(9);

    let result = waiter.join().unwrap().unwrap();
    assert_eq!(result.as_deref(), Some(&9));
  }

  #[test]
  fn dropped_promise_fails_with_no_result() {
    let (promise, future) = CacheFuture::<u32>::pending();
    drop(promise);
    assert!(matches!(future.wait(), Err(LoadError::NoResult)));
    assert!(future.is_failed());
  }

  #[test]
  fn hooks_run_once_after_completion() {
    let calls = Arc::new(AtomicUsize::new(0));
    let load = LoadFuture::<u32>::new();
    {
      let calls = calls.clone();
      load.on_complete(move |result| {
        assert!(matches!(result, Ok(Some(_))));
        calls.fetch_add(1, Ordering::SeqCst);
      });
    }

    assert!(load.complete(Ok(Some(Arc::new(1)))));
    assert!(!load.complete(Ok(None)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // A hook registered late runs immediately.
    let calls_late = calls.clone();
    load.on_complete(move |_| {
      calls_late.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn awaiting_resolves_across_threads() {
    let (promise, future) = CacheFuture::<&'static str>::pending();
    thread::spawn(move || {
      thread::sleep(Duration::from_millis(10));
      promise.succeed("done");
    });

    let result = futures_executor::block_on(future).unwrap();
    assert_eq!(result.as_deref(), Some(&"done"));
  }
}
