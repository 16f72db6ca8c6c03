mod common;

use common::{assert_quiet, capture_listener, recv_n};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;
use tessera_cache::{CacheBuilder, RemovalCause, RemovalNotification};

#[test]
fn test_listener_for_invalidation() {
  let (listener, rx) = capture_listener::<String>();
  let cache = CacheBuilder::default()
    .removal_listener(listener)
    .build()
    .unwrap();

  cache.put(1, "one".to_string());
  cache.invalidate(&1);

  let (key, value, cause) = recv_n(&rx, 1).remove(0);
  assert_eq!(key, 1);
  assert_eq!(*value, "one");
  assert_eq!(cause, RemovalCause::Explicit);
  assert!(!cause.was_evicted());

  // Nothing to remove, nothing to report.
  cache.invalidate(&1);
  assert_quiet(&rx);
}

#[test]
fn test_listener_for_replacement() {
  let (listener, rx) = capture_listener::<String>();
  let cache = CacheBuilder::default()
    .removal_listener(listener)
    .build()
    .unwrap();

  cache.put(1, "one".to_string());
  assert_quiet(&rx);
  cache.put(1, "uno".to_string());

  let (key, value, cause) = recv_n(&rx, 1).remove(0);
  assert_eq!(key, 1);
  assert_eq!(*value, "one", "the replaced value is reported");
  assert_eq!(cause, RemovalCause::Replaced);
}

#[test]
fn test_listener_sees_every_entry_on_clear() {
  let (listener, rx) = capture_listener::<String>();
  let cache = CacheBuilder::default()
    .shards(4)
    .removal_listener(listener)
    .build()
    .unwrap();

  cache.put_all((0..10).map(|i| (i, i.to_string())));
  cache.clear();

  let removed = recv_n(&rx, 10);
  assert!(removed.iter().all(|(_, _, cause)| *cause == RemovalCause::Explicit));
  let keys = removed.iter().map(|(key, _, _)| *key).collect::<HashSet<_>>();
  assert_eq!(keys, (0..10).collect());
  assert_eq!(cache.estimated_size(), 0);

  // Clearing an empty cache reports nothing.
  cache.clear();
  assert_quiet(&rx);
}

#[test]
fn test_notifications_preserve_order_per_key() {
  let (listener, rx) = capture_listener::<i32>();
  let cache = CacheBuilder::default()
    .removal_listener(listener)
    .build()
    .unwrap();

  for value in 0..50 {
    cache.put(7, value);
  }
  cache.invalidate(&7);

  let removed = recv_n(&rx, 50);
  for (expected, (key, value, cause)) in removed.into_iter().enumerate() {
    assert_eq!(key, 7);
    assert_eq!(*value, expected as i32);
    let expected_cause = if expected == 49 {
      RemovalCause::Explicit
    } else {
      RemovalCause::Replaced
    };
    assert_eq!(cause, expected_cause);
  }
}

#[test]
fn test_compute_to_none_reports_explicit_removal() {
  let (listener, rx) = capture_listener::<String>();
  let cache = CacheBuilder::default()
    .removal_listener(listener)
    .build()
    .unwrap();
  let map = cache.as_map();

  map.insert(1, "one".to_string());
  assert!(map.compute(1, |_, _| None).is_none());

  let (key, value, cause) = recv_n(&rx, 1).remove(0);
  assert_eq!((key, value.as_str(), cause), (1, "one", RemovalCause::Explicit));
}

#[test]
fn test_panicking_listener_does_not_poison_the_cache() {
  let delivered = Arc::new(AtomicUsize::new(0));
  let (tx, rx) = mpsc::channel::<i32>();
  let tx = parking_lot::Mutex::new(tx);
  let cache = CacheBuilder::default()
    .removal_listener({
      let delivered = delivered.clone();
      move |notification: RemovalNotification<i32, String>| {
        delivered.fetch_add(1, Ordering::SeqCst);
        if *notification.key() == 1 {
          panic!("listener bug");
        }
        let _ = tx.lock().send(*notification.key());
      }
    })
    .build()
    .unwrap();

  cache.put(1, "one".to_string());
  cache.put(2, "two".to_string());
  cache.invalidate(&1);
  cache.invalidate(&2);

  // The second notification still arrives after the first one panicked.
  assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 2);
  assert_eq!(delivered.load(Ordering::SeqCst), 2);
  assert_eq!(cache.estimated_size(), 0);
}

#[test]
fn test_listener_observes_the_mutation_it_reports() {
  let slot = Arc::new(once_cell::sync::OnceCell::new());
  let (tx, rx) = mpsc::channel();
  let tx = parking_lot::Mutex::new(tx);
  let cache = CacheBuilder::<i32, String>::default()
    .removal_listener({
      let slot = slot.clone();
      move |notification: RemovalNotification<i32, String>| {
        let seen = slot
          .get()
          .and_then(|cache: &tessera_cache::Cache<i32, String>| cache.get_if_present(notification.key()))
          .map(|value| (*value).clone());
        let _ = tx.lock().send((notification.cause(), seen));
      }
    })
    .build()
    .unwrap();
  assert!(slot.set(cache.clone()).is_ok());

  cache.put(1, "one".to_string());
  cache.put(1, "uno".to_string());
  let replaced = rx.recv_timeout(Duration::from_secs(2)).unwrap();
  assert_eq!(replaced, (RemovalCause::Replaced, Some("uno".to_string())));

  cache.invalidate(&1);
  let removed = rx.recv_timeout(Duration::from_secs(2)).unwrap();
  assert_eq!(removed, (RemovalCause::Explicit, None));
}
