//! Bounded per-item concurrency for I/O- or CPU-bound stages.
//!
//! Workers run on a dedicated rayon pool of exactly `max_parallelism`
//! threads; they may read but never write the store. Results funnel through a
//! channel to a single `commit` closure, which performs the durable write for
//! each item as its worker completes. One worker's error or panic is isolated
//! to its item and never cancels siblings.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;

use postforge_common::{Error, Result};
use rayon::prelude::*;

/// Cap for the default worker-pool size; external targets and the store have
/// their own concurrency ceilings, so unbounded fan-out is disallowed.
const DEFAULT_PARALLELISM_CAP: usize = 4;

/// Number of processing units, capped.
pub fn default_parallelism() -> usize {
    num_cpus::get().clamp(1, DEFAULT_PARALLELISM_CAP)
}

/// Per-stage outcome counts from a bounded run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunnerTally {
    pub succeeded: usize,
    pub failed: usize,
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run `worker` over `items` with at most `max_parallelism` in flight,
/// committing each result durably through `commit` on a single thread.
///
/// `commit` receives the worker's result and must persist the outcome (the
/// new fields on success, the error message on failure); its own error marks
/// the item failed. An item counts as succeeded only when both its worker and
/// its commit succeed.
pub fn run_bounded<T, R, W, C>(
    items: &[T],
    max_parallelism: usize,
    worker: W,
    mut commit: C,
) -> Result<RunnerTally>
where
    T: Sync,
    R: Send,
    W: Fn(&T) -> Result<R> + Sync,
    C: FnMut(&T, Result<R>) -> Result<()>,
{
    let mut tally = RunnerTally::default();
    if items.is_empty() {
        return Ok(tally);
    }

    let parallelism = max_parallelism.max(1).min(items.len());
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(parallelism)
        .build()
        .map_err(|e| Error::internal(format!("worker pool: {e}")))?;

    let (tx, rx) = mpsc::channel::<(usize, Result<R>)>();

    std::thread::scope(|scope| {
        let worker = &worker;
        scope.spawn(move || {
            pool.install(|| {
                items
                    .par_iter()
                    .enumerate()
                    .for_each_with(tx, |tx, (idx, item)| {
                        let outcome = match catch_unwind(AssertUnwindSafe(|| worker(item))) {
                            Ok(result) => result,
                            Err(panic) => Err(Error::internal(format!(
                                "worker panicked: {}",
                                panic_message(panic.as_ref())
                            ))),
                        };
                        // Receiver gone means the commit loop bailed; workers
                        // just drain.
                        let _ = tx.send((idx, outcome));
                    });
            });
        });

        // Single-writer funnel: durable writes happen here, one at a time,
        // in completion order.
        for (idx, outcome) in rx.iter() {
            let worker_ok = outcome.is_ok();
            match commit(&items[idx], outcome) {
                Ok(()) if worker_ok => tally.succeeded += 1,
                Ok(()) => tally.failed += 1,
                Err(e) => {
                    tracing::error!("commit failed for item #{}: {}", idx, e);
                    tally.failed += 1;
                }
            }
        }
    });

    Ok(tally)
}
