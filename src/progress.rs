// src/progress.rs

//! Download progress reporting
//!
//! Progress is a `(bytes_done, bytes_total)` pair delivered to a callback.
//! [`ThrottledProgress`] keeps the reported position monotonic, clamps it to
//! the total and limits reports to one per interval while a transfer runs.
//! The final position is always flushed by [`ThrottledProgress::finish`].
//!
//! The total may change mid-transfer (a repository can hand out a new gene
//! manifest); `done` still never moves backwards.
//!
//! # Example
//!
//! ```ignore
//! use genepool::progress::{ThrottledProgress, GeneProgress};
//!
//! let progress = ThrottledProgress::new(total, interval, Arc::new(|p: GeneProgress| {
//!     println!("{}/{}", p.done, p.total);
//! }));
//! progress.increment(4096);
//! progress.finish();
//! ```

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default minimum time between two progress reports
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(10);

/// One progress report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneProgress {
    pub done: u64,
    pub total: u64,
}

impl GeneProgress {
    /// Completion as a percentage (0-100)
    pub fn percent(&self) -> u64 {
        if self.total == 0 {
            100
        } else {
            self.done.saturating_mul(100) / self.total
        }
    }
}

/// Receiver of progress reports
pub type ProgressCallback = Arc<dyn Fn(GeneProgress) + Send + Sync>;

struct Emitted {
    at: Option<Instant>,
    done: Option<u64>,
    total: u64,
}

/// Monotonic, throttled byte progress
pub struct ThrottledProgress {
    total: AtomicU64,
    position: AtomicU64,
    interval: Duration,
    emitted: Mutex<Emitted>,
    callback: ProgressCallback,
}

impl ThrottledProgress {
    pub fn new(total: u64, interval: Duration, callback: ProgressCallback) -> Self {
        Self {
            total: AtomicU64::new(total),
            position: AtomicU64::new(0),
            interval,
            emitted: Mutex::new(Emitted {
                at: None,
                done: None,
                total,
            }),
            callback,
        }
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed).min(self.total())
    }

    /// Replace the total, e.g. after the gene manifest changed
    ///
    /// The new total is reported right away.
    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
        self.report(self.position(), true);
    }

    /// Advance by `amount` bytes
    pub fn increment(&self, amount: u64) {
        let previous = self.position.fetch_add(amount, Ordering::Relaxed);
        let current = previous.saturating_add(amount).min(self.total());
        self.report(current, false);
    }

    /// Move to an absolute position; never moves backwards
    pub fn set_position(&self, position: u64) {
        let position = position.min(self.total());
        let previous = self.position.fetch_max(position, Ordering::Relaxed);
        self.report(previous.max(position), false);
    }

    /// Report the final position regardless of the throttle
    pub fn finish(&self) {
        let total = self.total();
        self.position.fetch_max(total, Ordering::Relaxed);
        self.report(total, true);
    }

    fn report(&self, done: u64, force: bool) {
        let total = self.total();
        let done = done.min(total);
        {
            let mut emitted = self.emitted.lock();
            if let Some(last) = emitted.done
                && (done < last || (done == last && total == emitted.total))
            {
                return;
            }
            let due = emitted.at.is_none_or(|at| at.elapsed() >= self.interval);
            if !force && !due {
                return;
            }
            emitted.at = Some(Instant::now());
            emitted.done = Some(done);
            emitted.total = total;
        }
        (self.callback)(GeneProgress {
            done,
            total,
        });
    }
}
