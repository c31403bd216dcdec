//! Bounded worker pool for independent mesh jobs.
//!
//! Jobs run on a dedicated rayon pool with at most
//! [`BatchConfig::max_concurrency`] threads, so a batch never starts more
//! concurrent pipelines (and external converter processes) than that. Each
//! item reports its own result: an error or panic in one item never aborts
//! its siblings.
//!
//! # Example
//!
//! ```
//! use mesh_forge::batch::{BatchConfig, run_batch};
//!
//! let report = run_batch(&[1, 2, 3], &BatchConfig::with_concurrency(2), None, |n| Ok(n * 10));
//! assert_eq!(report.succeeded, 3);
//! assert_eq!(report.results[2].as_ref().ok(), Some(&30));
//! ```

use std::panic::{AssertUnwindSafe, catch_unwind};

use rayon::prelude::*;
use thiserror::Error;
use tracing::{info, warn};

use crate::decimate::panic_message;
use crate::error::{MeshError, MeshResult};
use crate::progress::{ProgressCallback, ProgressTracker};
use crate::tracing_ext::{OperationTimer, log_progress};

/// Worker-pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct BatchConfig {
    /// Maximum items processed at once. Default: available parallelism
    pub max_concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

impl BatchConfig {
    pub fn with_concurrency(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// One item at a time.
    pub fn sequential() -> Self {
        Self::with_concurrency(1)
    }
}

/// Why a batch item produced no value.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    Failed(#[from] MeshError),

    #[error("job panicked: {0}")]
    Panicked(String),

    #[error("cancelled before it started")]
    Cancelled,
}

/// Per-item results of a batch, in input order.
#[derive(Debug)]
pub struct BatchReport<T> {
    pub results: Vec<Result<T, BatchError>>,
    pub succeeded: usize,
    /// Items that returned an error or panicked.
    pub failed: usize,
    /// Items skipped after cancellation.
    pub cancelled: usize,
}

impl<T> BatchReport<T> {
    pub fn all_succeeded(&self) -> bool {
        self.succeeded == self.results.len()
    }
}

/// Run `job` over `items` on a bounded pool.
///
/// `progress` is called after every finished item; returning `false` skips
/// the items that have not started yet.
pub fn run_batch<I, T, F>(
    items: &[I],
    config: &BatchConfig,
    progress: Option<&ProgressCallback>,
    job: F,
) -> BatchReport<T>
where
    I: Sync,
    T: Send,
    F: Fn(&I) -> MeshResult<T> + Sync,
{
    let _timer = OperationTimer::new("batch");
    let threads = config.max_concurrency.max(1);
    let tracker = ProgressTracker::new(items.len() as u64);

    let run_item = |index: usize, item: &I| -> Result<T, BatchError> {
        if tracker.is_cancelled() {
            return Err(BatchError::Cancelled);
        }
        let result = match catch_unwind(AssertUnwindSafe(|| job(item))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(BatchError::Failed(e)),
            Err(payload) => Err(BatchError::Panicked(panic_message(payload.as_ref()))),
        };
        if let Err(e) = &result {
            warn!(item = index, "Batch item failed: {}", e);
        }
        tracker.record(result.is_ok(), &format!("item {}", index), progress);
        log_progress("batch", tracker.completed() as usize, items.len());
        result
    };

    let results: Vec<Result<T, BatchError>> = match rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("mesh-batch-{}", i))
        .build()
    {
        Ok(pool) => pool.install(|| {
            items
                .par_iter()
                .enumerate()
                .map(|(i, item)| run_item(i, item))
                .collect()
        }),
        Err(e) => {
            warn!("Could not build batch pool ({}), running sequentially", e);
            items.iter().enumerate().map(|(i, item)| run_item(i, item)).collect()
        }
    };

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    let cancelled = results
        .iter()
        .filter(|r| matches!(r, Err(BatchError::Cancelled)))
        .count();
    let failed = results.len() - succeeded - cancelled;

    info!(
        items = results.len(),
        succeeded,
        failed,
        cancelled,
        threads,
        "Batch finished"
    );

    BatchReport {
        results,
        succeeded,
        failed,
        cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_results_keep_input_order() {
        let items: Vec<u64> = (0..20).collect();
        let report = run_batch(&items, &BatchConfig::with_concurrency(4), None, |&n| {
            std::thread::sleep(Duration::from_millis(20 - n));
            Ok(n * 2)
        });
        let values: Vec<u64> = report.results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, (0..20).map(|n| n * 2).collect::<Vec<_>>());
        assert_eq!(report.succeeded, 20);
    }

    #[test]
    fn test_failures_do_not_abort_siblings() {
        let items = [1, 2, 3, 4];
        let report = run_batch(&items, &BatchConfig::with_concurrency(2), None, |&n| {
            match n {
                2 => Err(MeshError::unsupported_format("xyz")),
                3 => panic!("boom"),
                _ => Ok(n),
            }
        });
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 2);
        assert!(matches!(report.results[1], Err(BatchError::Failed(_))));
        match &report.results[2] {
            Err(BatchError::Panicked(msg)) => assert_eq!(msg, "boom"),
            other => panic!("expected a panic result, got {:?}", other),
        }
        assert!(!report.all_succeeded());
    }

    #[test]
    fn test_concurrency_is_bounded() {
        let running = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let items: Vec<usize> = (0..12).collect();

        run_batch(&items, &BatchConfig::with_concurrency(2), None, |_| {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(10));
            running.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        });
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_callback_cancels_remaining_items() {
        let items: Vec<usize> = (0..10).collect();
        let callback: ProgressCallback = Box::new(|p| p.completed < 3);
        let report = run_batch(&items, &BatchConfig::sequential(), Some(&callback), |&n| Ok(n));
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.cancelled, 7);
        assert_eq!(report.failed, 0);
    }

    #[test]
    fn test_default_concurrency_is_positive() {
        assert!(BatchConfig::default().max_concurrency >= 1);
        assert_eq!(BatchConfig::with_concurrency(0).max_concurrency, 1);
    }
}
