//! Bounded worker pools with a join barrier.
//!
//! Every batch of work gets its own rayon pool so the number of tasks in
//! flight never exceeds the configured parallelism, and the pool is torn
//! down together with the batch.

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};

/// Resolves a requested parallelism level. `0` means one worker per core.
pub fn effective_parallelism(requested: usize) -> usize {
    if requested > 0 {
        return requested;
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Builds a pool with exactly `threads` workers named `{name}-{index}`.
///
/// # Panics
///
/// Panics if `threads` is 0.
pub fn bounded_pool(threads: usize, name: &str) -> Result<ThreadPool, ThreadPoolBuildError> {
    assert!(threads > 0, "threads must be > 0");

    let name = name.to_string();
    ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(move |idx| format!("{name}-{idx}"))
        .build()
}

/// Runs `f` on every item inside `pool` and returns once all items are done.
///
/// Each closure call receives exclusive access to one item and its index;
/// nothing else is shared between tasks.
pub fn for_each_mut_in<T, F>(pool: &ThreadPool, items: &mut [T], f: F)
where
    T: Send,
    F: Fn(usize, &mut T) + Sync + Send,
{
    pool.install(|| {
        items
            .par_iter_mut()
            .enumerate()
            .for_each(|(idx, item)| f(idx, item))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_effective_parallelism() {
        assert_eq!(effective_parallelism(3), 3);
        assert!(effective_parallelism(0) >= 1);
    }

    #[test]
    fn test_for_each_mut_visits_every_item() {
        let pool = bounded_pool(4, "test").unwrap();
        let mut items: Vec<usize> = vec![0; 50];
        for_each_mut_in(&pool, &mut items, |idx, item| *item = idx * 2);

        let expected: Vec<usize> = (0..50).map(|i| i * 2).collect();
        assert_eq!(items, expected);
    }

    #[test]
    fn test_for_each_mut_empty() {
        let pool = bounded_pool(2, "test").unwrap();
        let mut items: Vec<i32> = vec![];
        for_each_mut_in(&pool, &mut items, |_, item| *item += 1);
        assert!(items.is_empty());
    }

    #[test]
    #[should_panic(expected = "threads must be > 0")]
    fn test_bounded_pool_zero_panics() {
        let _ = bounded_pool(0, "test");
    }

    #[test]
    fn test_bounded_pool_concurrency_cap() {
        let pool = bounded_pool(3, "cap").unwrap();
        let mut items: Vec<i32> = (0..20).collect();
        let in_flight = AtomicUsize::new(0);
        let max_observed = AtomicUsize::new(0);

        for_each_mut_in(&pool, &mut items, |_, _| {
            let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            max_observed.fetch_max(current, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(5));
            in_flight.fetch_sub(1, Ordering::SeqCst);
        });

        let max = max_observed.load(Ordering::SeqCst);
        assert!(max <= 3, "max in-flight was {max}, expected <= 3");
    }
}
