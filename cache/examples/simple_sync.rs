use tessera_cache::{BoxError, CacheBuilder, RemovalNotification};

fn main() {
  // A loading cache that records statistics and logs every removal.
  let cache = CacheBuilder::<String, usize>::default()
    .record_stats(true)
    .removal_listener(|notification: RemovalNotification<String, usize>| {
      println!(
        "--- Listener: '{}' -> {} was {}",
        notification.key(),
        notification.value(),
        notification.cause()
      );
    })
    .build_with_fn(|key: &String| -> Result<Option<usize>, BoxError> {
      println!("--- Loader: computing the length of '{}'", key);
      Ok(Some(key.len()))
    })
    .expect("Failed to build cache");

  println!("Loading 'hello'...");
  let value = cache.get("hello".to_string()).unwrap();
  println!("Got {:?}", value);

  println!("\nLoading 'hello' again. This is a cache hit.");
  let value = cache.get("hello".to_string()).unwrap();
  println!("Got {:?}", value);

  println!("\nOverwriting 'hello' with a manual value.");
  cache.put("hello".to_string(), 42);

  println!("\nUsing the map view to merge into 'hello'.");
  let map = cache.as_map();
  let merged = map.merge("hello".to_string(), 8, |old, new| Some(**old + new));
  println!("Merged value: {:?}", merged.as_deref());

  println!("\nInvalidating 'hello'.");
  cache.invalidate("hello");

  // Give the notifier thread a moment to print.
  std::thread::sleep(std::time::Duration::from_millis(50));
  println!("\nCache stats: {:#?}", cache.stats());
}
