use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};
use tessera_cache::{Cache, CacheBuilder};

const NUM_ITEMS: u64 = 10_000;

#[derive(Debug, Clone, Copy)]
enum Op {
  GetHit,
  GetMiss,
  Put,
  GetWith,
}

fn build_cache() -> Cache<u64, u64> {
  let cache = CacheBuilder::default().initial_capacity(NUM_ITEMS as usize).build().unwrap();
  // Pre-populate in a single thread for a consistent start.
  cache.put_all((0..NUM_ITEMS).map(|i| (i, i)));
  cache
}

fn run_op(cache: &Cache<u64, u64>, op: Op, key: u64) {
  match op {
    Op::GetHit => {
      black_box(cache.get_if_present(&key));
    }
    Op::GetMiss => {
      black_box(cache.get_if_present(&(key + NUM_ITEMS)));
    }
    Op::Put => cache.put(key, key),
    Op::GetWith => {
      black_box(cache.get_with(key, |k| Some(*k)));
    }
  }
}

/// Splits the key space between `concurrency` threads and times how long all
/// of them take to run `op` over their share, `iters` times.
fn run_concurrent(cache: &Arc<Cache<u64, u64>>, op: Op, concurrency: usize, iters: u64) -> Duration {
  let barrier = Arc::new(Barrier::new(concurrency + 1));
  let handles = (0..concurrency)
    .map(|t| {
      let cache = cache.clone();
      let barrier = barrier.clone();
      thread::spawn(move || {
        barrier.wait();
        for _ in 0..iters {
          let mut key = t as u64;
          while key < NUM_ITEMS {
            run_op(&cache, op, key);
            key += concurrency as u64;
          }
        }
      })
    })
    .collect::<Vec<_>>();

  barrier.wait();
  let start = Instant::now();
  for handle in handles {
    handle.join().unwrap();
  }
  start.elapsed()
}

fn sync_basic_ops(c: &mut Criterion) {
  let mut group = c.benchmark_group("sync_basic_ops");
  group.throughput(Throughput::Elements(NUM_ITEMS));

  for op in [Op::GetHit, Op::GetMiss, Op::Put, Op::GetWith] {
    for concurrency in [1, 4, 8] {
      let cache = Arc::new(build_cache());
      group.bench_with_input(
        BenchmarkId::new(format!("{op:?}"), concurrency),
        &concurrency,
        |b, &concurrency| {
          b.iter_custom(|iters| run_concurrent(&cache, op, concurrency, iters));
        },
      );
    }
  }
  group.finish();
}

criterion_group!(benches, sync_basic_ops);
criterion_main!(benches);
