//! Fork-join scheduling over rayon.
//!
//! The engines only need two primitives from the host: the maximum
//! parallelism of a pool and "submit N indexed tasks, wait for all".
//! Both are served by rayon; `None` selects the global pool. A panicking
//! worker is caught at this boundary and surfaced as a pool failure so
//! the entry points never unwind across the caller.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use rayon::prelude::*;

use crate::error::KernelError;

/// Host thread pool handed to the entry points.
pub type ThreadPool = rayon::ThreadPool;

/// Maximum parallelism of `pool`, at least one.
pub fn max_thread_count(pool: Option<&ThreadPool>) -> usize {
    pool.map(|p| p.current_num_threads())
        .unwrap_or_else(rayon::current_num_threads)
        .max(1)
}

/// Run `routine` for every index in `[0, count)` concurrently and block
/// until all instances return.
pub(crate) fn execute_threaded<F>(
    routine: F,
    count: usize,
    pool: Option<&ThreadPool>,
) -> Result<(), KernelError>
where
    F: Fn(usize) + Sync,
{
    let run = || (0..count).into_par_iter().for_each(|index| routine(index));
    let outcome = match pool {
        Some(pool) => catch_unwind(AssertUnwindSafe(|| pool.install(run))),
        None => catch_unwind(AssertUnwindSafe(run)),
    };
    outcome.map_err(|payload| KernelError::ThreadPool(panic_message(payload)))
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn max_thread_count_is_positive() {
        assert!(max_thread_count(None) >= 1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(3)
            .build()
            .unwrap();
        assert_eq!(max_thread_count(Some(&pool)), 3);
    }

    #[test]
    fn every_index_runs_exactly_once() {
        let count = 17;
        let hits: Vec<AtomicUsize> = (0..count).map(|_| AtomicUsize::new(0)).collect();
        execute_threaded(|index| {
            hits[index].fetch_add(1, Ordering::SeqCst);
        }, count, None)
        .unwrap();
        for (index, hit) in hits.iter().enumerate() {
            assert_eq!(hit.load(Ordering::SeqCst), 1, "index {index} ran wrong number of times");
        }
    }

    #[test]
    fn worker_panic_is_reported() {
        let result = execute_threaded(
            |index| {
                if index == 1 {
                    panic!("boom");
                }
            },
            4,
            None,
        );
        match result {
            Err(KernelError::ThreadPool(message)) => assert!(message.contains("boom")),
            other => panic!("expected thread pool failure, got {other:?}"),
        }
    }
}
