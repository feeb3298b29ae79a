//! Worker pool for per-unit stages.
//!
//! Workers only compute: they return in-memory results and never touch the
//! store. A panic inside one unit's work is caught and returned as that
//! unit's error.

use crate::error::{panic_message, StageError, StageResult};
use rayon::prelude::*;
use std::panic::{self, AssertUnwindSafe};

pub struct WorkerPool {
    pool: rayon::ThreadPool,
}

impl WorkerPool {
    /// A pool of `workers` threads (at least one).
    pub fn new(workers: usize) -> StageResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|idx| format!("ekb-worker-{idx}"))
            .build()
            .map_err(|e| StageError::Pool(e.to_string()))?;
        Ok(Self { pool })
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Apply `work` to every item in parallel. Results keep input order; a
    /// panicking item yields `Err` with the panic message.
    pub fn map_units<T, R, F>(&self, items: &[T], work: F) -> Vec<Result<R, String>>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync + Send,
    {
        self.pool.install(|| {
            items
                .par_iter()
                .map(|item| {
                    panic::catch_unwind(AssertUnwindSafe(|| work(item)))
                        .map_err(|payload| panic_message(payload.as_ref()))
                })
                .collect()
        })
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn results_keep_input_order() {
        let pool = WorkerPool::new(4).expect("pool");
        let items: Vec<u32> = (0..100).collect();
        let out = pool.map_units(&items, |n| n * 2);
        let values: Vec<u32> = out.into_iter().map(|r| r.expect("ok")).collect();
        assert_eq!(values, (0..100).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[test]
    fn panics_are_isolated_per_item() {
        let pool = WorkerPool::new(2).expect("pool");
        let items = vec![1, 2, 3];
        let out = pool.map_units(&items, |n| {
            if *n == 2 {
                panic!("unit {n} exploded");
            }
            *n
        });
        assert_eq!(out[0], Ok(1));
        assert_eq!(out[1], Err("unit 2 exploded".to_string()));
        assert_eq!(out[2], Ok(3));
    }

    #[test]
    fn zero_workers_still_builds_a_pool() {
        let pool = WorkerPool::new(0).expect("pool");
        assert_eq!(pool.workers(), 1);
    }
}
