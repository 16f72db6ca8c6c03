use crate::listener::{RemovalListener, RemovalNotification};

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use fibre::mpsc;

/// The background task responsible for calling the user-provided removal
/// listener.
///
/// Notifications are pushed onto a channel that a dedicated thread drains in
/// FIFO order, so listener code never runs on a thread holding a shard lock.
/// The thread exits once the notifier, the only sender, is dropped.
pub(crate) struct Notifier<K: Send, V: Send + Sync> {
  sender: mpsc::UnboundedSender<RemovalNotification<K, V>>,
}

impl<K, V> Notifier<K, V>
where
  K: Send + 'static,
  V: Send + Sync + 'static,
{
  /// Spawns a new notifier thread delivering to `listener`.
  pub(crate) fn spawn(listener: Arc<dyn RemovalListener<K, V>>) -> Self {
    let (tx, rx) = mpsc::unbounded::<RemovalNotification<K, V>>();

    let spawned = thread::Builder::new()
      .name("tessera-cache-notifier".into())
      .spawn(move || {
        tracing::trace!("removal notifier started");
        while let Ok(notification) = rx.recv() {
          let delivered = catch_unwind(AssertUnwindSafe(|| listener.on_removal(notification)));
          if let Err(payload) = delivered {
            let message = crate::error::LoadError::from_panic(payload);
            tracing::error!(error = %message, "removal listener panicked");
          }
        }
        tracing::trace!("removal notifier stopped");
      });
    if let Err(e) = spawned {
      tracing::error!(error = %e, "failed to spawn removal notifier thread");
    }

    Self { sender: tx }
  }

  /// Hands a notification to the dispatcher thread.
  #[inline]
  pub(crate) fn notify(&self, notification: RemovalNotification<K, V>) {
    if self.sender.send(notification).is_err() {
      tracing::warn!("removal notifier is gone, dropping notification");
    }
  }
}

/// Holds at most one staged notification while a traversal mutates entries.
///
/// Staging the notification for entry `i + 1` flushes the one for entry `i`,
/// so every notification goes out after its own mutation has been applied
/// and in visitation order. Whatever is still staged is flushed on drop.
pub(crate) struct NotificationSlot<'a, K, V>
where
  K: Send + 'static,
  V: Send + Sync + 'static,
{
  notifier: &'a Notifier<K, V>,
  pending: Option<RemovalNotification<K, V>>,
}

impl<'a, K, V> NotificationSlot<'a, K, V>
where
  K: Send + 'static,
  V: Send + Sync + 'static,
{
  pub(crate) fn new(notifier: &'a Notifier<K, V>) -> Self {
    Self {
      notifier,
      pending: None,
    }
  }

  /// Stages `notification`, dispatching the previously staged one.
  pub(crate) fn stage(&mut self, notification: RemovalNotification<K, V>) {
    if let Some(previous) = self.pending.replace(notification) {
      self.notifier.notify(previous);
    }
  }
}

impl<K, V> Drop for NotificationSlot<'_, K, V>
where
  K: Send + 'static,
  V: Send + Sync + 'static,
{
  fn drop(&mut self) {
    if let Some(last) = self.pending.take() {
      self.notifier.notify(last);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::listener::RemovalCause;
  use std::sync::mpsc as std_mpsc;
  use std::time::Duration;

  fn capture() -> (Notifier<u32, String>, std_mpsc::Receiver<(u32, RemovalCause)>) {
    let (tx, rx) = std_mpsc::channel();
    let tx = parking_lot::Mutex::new(tx);
    let listener = move |n: RemovalNotification<u32, String>| {
      let _ = tx.lock().send((*n.key(), n.cause()));
    };
    (Notifier::spawn(Arc::new(listener)), rx)
  }

  #[test]
  fn slot_flushes_in_staging_order() {
    let (notifier, rx) = capture();
    {
      let mut slot = NotificationSlot::new(&notifier);
      for key in 0..3 {
        slot.stage(RemovalNotification::new(
          key,
          Arc::new(key.to_string()),
          RemovalCause::Replaced,
        ));
      }
    }

    for expected in 0..3 {
      let (key, cause) = rx.recv_timeout(Duration::from_secs(1)).unwrap();
      assert_eq!(key, expected);
      assert_eq!(cause, RemovalCause::Replaced);
    }
  }

  #[test]
  fn panicking_listener_does_not_stop_dispatch() {
    let (tx, rx) = std_mpsc::channel();
    let tx = parking_lot::Mutex::new(tx);
    let listener = move |n: RemovalNotification<u32, String>| {
      if *n.key() == 0 {
        panic!("listener bug");
      }
      let _ = tx.lock().send(*n.key());
    };
    let notifier = Notifier::spawn(Arc::new(listener));

    notifier.notify(RemovalNotification::new(0, Arc::new("a".into()), RemovalCause::Explicit));
    notifier.notify(RemovalNotification::new(1, Arc::new("b".into()), RemovalCause::Explicit));

    assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 1);
  }
}
