//! Progress reporting and cancellation for batch work.
//!
//! A [`ProgressCallback`] is invoked after every finished batch item with a
//! [`Progress`] snapshot. Returning `false` cancels the items that have not
//! started yet; items already running finish normally.
//!
//! # Example
//!
//! ```
//! use mesh_forge::progress::{Progress, ProgressCallback};
//!
//! let callback: ProgressCallback = Box::new(|p: &Progress| {
//!     eprintln!("{}/{} done ({} failed): {}", p.completed, p.total, p.failed, p.message);
//!     p.failed == 0 // stop scheduling new items after the first failure
//! });
//! # let _ = callback;
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Snapshot passed to callbacks.
#[derive(Debug, Clone)]
pub struct Progress {
    /// Items finished so far, successful or not.
    pub completed: u64,
    pub total: u64,
    /// Items that returned an error or panicked.
    pub failed: u64,
    /// Label of the item that just finished.
    pub message: String,
    pub elapsed: Duration,
    /// Extrapolated from the mean time per finished item.
    pub estimated_remaining: Option<Duration>,
}

impl Progress {
    pub fn new(completed: u64, total: u64, message: impl Into<String>) -> Self {
        Self {
            completed,
            total,
            failed: 0,
            message: message.into(),
            elapsed: Duration::ZERO,
            estimated_remaining: None,
        }
    }

    /// Progress as a fraction (0.0 to 1.0).
    #[inline]
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }

    /// Progress as a percentage (0 to 100).
    #[inline]
    pub fn percent(&self) -> u32 {
        (self.fraction() * 100.0).round() as u32
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.completed >= self.total
    }
}

/// Callback for progress reporting.
///
/// Returns `true` to continue, `false` to cancel remaining items.
pub type ProgressCallback = Box<dyn Fn(&Progress) -> bool + Send + Sync>;

/// Lock-free progress counter shared by batch workers.
#[derive(Debug)]
pub struct ProgressTracker {
    completed: AtomicU64,
    failed: AtomicU64,
    total: u64,
    cancelled: AtomicBool,
    start_time: Instant,
}

impl ProgressTracker {
    pub fn new(total: u64) -> Self {
        Self {
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            total,
            cancelled: AtomicBool::new(false),
            start_time: Instant::now(),
        }
    }

    #[inline]
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn total(&self) -> u64 {
        self.total
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Estimate remaining time from the mean time per finished item.
    pub fn estimated_remaining(&self) -> Option<Duration> {
        let done = self.completed();
        if done == 0 {
            return None;
        }
        let per_item = self.start_time.elapsed().as_secs_f64() / done as f64;
        Some(Duration::from_secs_f64(
            per_item * self.total.saturating_sub(done) as f64,
        ))
    }

    /// Record one finished item and notify `callback`.
    ///
    /// Returns `false` once the batch is cancelled.
    pub fn record(&self, success: bool, label: &str, callback: Option<&ProgressCallback>) -> bool {
        let completed = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        let failed = if success {
            self.failed()
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed) + 1
        };

        let Some(callback) = callback else {
            return !self.is_cancelled();
        };

        let progress = Progress {
            completed,
            total: self.total,
            failed,
            message: label.to_string(),
            elapsed: self.start_time.elapsed(),
            estimated_remaining: self.estimated_remaining(),
        };
        if !callback(&progress) {
            self.cancel();
        }
        !self.is_cancelled()
    }
}
