use futures_util::FutureExt;
use std::collections::HashMap;
use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};
use tessera_cache::{AsyncCacheLoader, BoxError, CacheBuilder, LoadFutureOutput};
use tokio::time::{sleep, Duration};

// A simulated database or slow external service.
struct Database {
  queries: Arc<AtomicUsize>,
}

impl AsyncCacheLoader<i32, String> for Database {
  fn async_load(&self, key: i32) -> LoadFutureOutput<String> {
    let queries = self.queries.clone();
    async move {
      println!("--- Database: Received request for key {}. Simulating slow query...", key);
      queries.fetch_add(1, Ordering::SeqCst);
      sleep(Duration::from_millis(500)).await;
      Ok(Some(format!("value_for_{}", key)))
    }
    .boxed()
  }

  fn supports_async_bulk_load(&self) -> bool {
    true
  }

  fn async_load_all(&self, keys: Vec<i32>) -> futures_util::future::BoxFuture<'static, Result<HashMap<i32, String>, BoxError>> {
    let queries = self.queries.clone();
    async move {
      println!("--- Database: Bulk request for keys {:?}.", keys);
      queries.fetch_add(1, Ordering::SeqCst);
      sleep(Duration::from_millis(500)).await;
      Ok(keys.into_iter().map(|key| (key, format!("value_for_{}", key))).collect())
    }
    .boxed()
  }
}

#[tokio::main]
async fn main() {
  let queries = Arc::new(AtomicUsize::new(0));

  let cache = CacheBuilder::default()
    .record_stats(true)
    .build_async(Database {
      queries: queries.clone(),
    })
    .expect("Failed to build async cache");

  println!("--- Thundering Herd Demonstration ---");
  println!("Spawning 10 tasks to request the same key '42' at once.\n");

  let mut tasks = Vec::new();
  for i in 0..10 {
    let cache = cache.clone();
    tasks.push(tokio::spawn(async move {
      println!("[Task {}] Requesting key 42...", i);
      let value = cache.get(42).await.unwrap().unwrap();
      println!("[Task {}] Received value: {}", i, value);
      assert_eq!(*value, "value_for_42");
    }));
  }

  // Wait for all tasks to complete.
  for task in tasks {
    task.await.unwrap();
  }

  println!("\n--- Verification ---");
  println!("Database was queried {} time(s).", queries.load(Ordering::SeqCst));
  assert_eq!(queries.load(Ordering::SeqCst), 1);

  println!("\n--- Bulk Request ---");
  let values = cache.get_all([41, 42, 43]).await;
  println!("Received {} values; only 41 and 43 were loaded, in one query.", values.len());
  assert_eq!(queries.load(Ordering::SeqCst), 2);

  println!("\nCache stats: {:#?}", cache.stats());
}
