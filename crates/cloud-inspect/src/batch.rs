//! Parallel per-file task execution with failure isolation.
//!
//! Tasks are submitted as they are discovered and run on a bounded worker
//! pool; outcomes stream back over a channel. A task that fails or panics
//! reports its error and never takes other tasks down with it.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::mpsc::Sender;

use tracing::debug;

use crate::error::{CloudError, CloudResult};

/// Workers reserved for the OS and the orchestrating thread.
const RESERVED_CORES: usize = 4;

/// Hard cap on pool size.
const MAX_WORKERS: usize = 100;

/// Result of one per-file task.
///
/// Errors are carried as strings because outcomes cross thread boundaries
/// and panics have no richer payload to offer.
#[derive(Debug)]
pub struct TaskOutcome {
    pub path: PathBuf,
    pub result: Result<(), String>,
}

impl TaskOutcome {
    /// True if the task completed without error.
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Worker count derived from the machine: all cores minus a reserve,
/// clamped to at least one and at most [`MAX_WORKERS`].
pub fn default_worker_count() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    cores.saturating_sub(RESERVED_CORES).clamp(1, MAX_WORKERS)
}

/// A bounded worker pool for per-file processing tasks.
pub struct BatchEngine {
    pool: rayon::ThreadPool,
    workers: usize,
}

impl BatchEngine {
    /// Build an engine with an explicit worker count.
    pub fn new(workers: usize) -> CloudResult<Self> {
        let workers = workers.clamp(1, MAX_WORKERS);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| CloudError::WorkerPool {
                details: e.to_string(),
            })?;

        debug!(workers, "worker pool ready");

        Ok(Self { pool, workers })
    }

    /// Build an engine sized by [`default_worker_count`].
    pub fn with_default_workers() -> CloudResult<Self> {
        Self::new(default_worker_count())
    }

    /// Number of workers in the pool.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Submit one task. The outcome is delivered on `outcomes`; a panicking
    /// task is converted into a failed outcome.
    ///
    /// Submission never blocks, so callers can keep discovering work while
    /// earlier tasks run.
    pub fn submit<F>(&self, path: PathBuf, outcomes: Sender<TaskOutcome>, task: F)
    where
        F: FnOnce() -> CloudResult<()> + Send + 'static,
    {
        self.pool.spawn(move || {
            let result = match catch_unwind(AssertUnwindSafe(task)) {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(format!("[{}] {}", e.code(), e)),
                // `as_ref` unwraps the box; `&panic` would downcast against
                // the `Box` itself and never match the payload.
                Err(panic) => Err(format!("task panicked: {}", panic_message(panic.as_ref()))),
            };

            // The receiver may already be gone if the caller gave up; the
            // outcome is simply dropped in that case.
            let _ = outcomes.send(TaskOutcome { path, result });
        });
    }
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn outcomes_arrive_for_every_task() {
        let engine = BatchEngine::new(4).unwrap();
        let (tx, rx) = mpsc::channel();

        for i in 0..20 {
            engine.submit(PathBuf::from(format!("file-{i}.ply")), tx.clone(), move || Ok(()));
        }
        drop(tx);

        let outcomes: Vec<TaskOutcome> = rx.iter().collect();
        assert_eq!(outcomes.len(), 20);
        assert!(outcomes.iter().all(|o| o.is_success()));
    }

    #[test]
    fn failures_are_isolated() {
        let engine = BatchEngine::new(2).unwrap();
        let (tx, rx) = mpsc::channel();

        engine.submit(PathBuf::from("good.ply"), tx.clone(), || Ok(()));
        engine.submit(PathBuf::from("bad.ply"), tx.clone(), || {
            Err(CloudError::empty_cloud("nothing to process"))
        });
        engine.submit(PathBuf::from("ugly.ply"), tx.clone(), || {
            panic!("simulated crash")
        });
        drop(tx);

        let mut outcomes: Vec<TaskOutcome> = rx.iter().collect();
        outcomes.sort_by(|a, b| a.path.cmp(&b.path));
        assert_eq!(outcomes.len(), 3);

        let bad = &outcomes[0];
        assert!(!bad.is_success());
        assert!(bad.result.as_ref().unwrap_err().contains("CLOUD-2001"));

        assert!(outcomes[1].is_success()); // good.ply

        let ugly = &outcomes[2];
        assert!(!ugly.is_success());
        assert!(ugly.result.as_ref().unwrap_err().contains("simulated crash"));
    }

    #[test]
    fn panic_payloads_surface_their_message() {
        // Payloads arrive boxed from catch_unwind; both common payload types
        // must come through, not the "unknown panic" fallback.
        let boxed: Box<dyn std::any::Any + Send> = Box::new("literal payload");
        assert_eq!(panic_message(boxed.as_ref()), "literal payload");

        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("formatted payload"));
        assert_eq!(panic_message(boxed.as_ref()), "formatted payload");
    }

    #[test]
    fn worker_count_is_clamped() {
        assert_eq!(BatchEngine::new(0).unwrap().workers(), 1);
        assert_eq!(BatchEngine::new(7).unwrap().workers(), 7);

        let n = default_worker_count();
        assert!((1..=MAX_WORKERS).contains(&n));
    }
}
