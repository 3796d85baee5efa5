//! Fork-join dispatch of independent work units onto a worker thread pool.

use crate::error::{Error, Result};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

/// Owns the worker threads of a simulation and hands out fork-join calls.
///
/// Workers are created once and live until the dispatcher is dropped; work
/// units never spawn threads themselves.
#[derive(Debug)]
pub struct ParallelDispatcher {
    pool: ThreadPool,
}

impl ParallelDispatcher {
    /// Creates a dispatcher with `threads` workers, or one worker per
    /// available core when `None`.
    ///
    /// # Errors
    ///
    /// Returns an error when the thread pool cannot be built.
    pub fn new(threads: Option<usize>) -> Result<Self> {
        let mut builder = ThreadPoolBuilder::new();
        if let Some(threads) = threads {
            builder = builder.num_threads(threads);
        }
        let pool = builder
            .build()
            .map_err(|err| Error::ThreadPool(err.to_string()))?;
        Ok(Self { pool })
    }

    /// Returns the number of worker threads.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Invokes `unit` for every index in `0..n`, each exactly once, spread
    /// over the worker threads, and blocks until all invocations finished.
    ///
    /// # Errors
    ///
    /// Returns the error of a failing work unit after the units already in
    /// flight have terminated; units not yet started are skipped.
    pub fn call<F>(&self, n: u64, unit: F) -> Result<()>
    where
        F: Fn(u64) -> Result<()> + Send + Sync,
    {
        self.pool.install(|| (0..n).into_par_iter().try_for_each(unit))
    }
}
