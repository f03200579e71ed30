//! Cancellable, byte-counted progress jobs.
//!
//! A [`ProgressJob`] represents one unit of measurable work: a download
//! or a local file transform. Producers accumulate byte deltas into the
//! job after every chunk and check its cancellation token at the same
//! boundary, making cancellation cooperative rather than preemptive.
//!
//! Throughput is estimated from a bounded sliding window of recent
//! `(timestamp, delta)` samples, which smooths out bursty chunk timing
//! without unbounded memory growth.
//!
//! # Example
//!
//! ```
//! use titleforge::progress::{JobStatus, ProgressJob};
//!
//! let job = ProgressJob::new(1024);
//! job.start();
//! job.update(1024);
//! job.finish();
//! assert_eq!(job.status(), JobStatus::Complete);
//! ```

use std::collections::VecDeque;
use std::time::Instant;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Maximum number of samples retained in the throughput window.
const WINDOW_CAP: usize = 50;

/// Lifecycle state of a progress job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    NotStarted,
    Running,
    Paused,
    /// Cancelled by the observer; the producer stops at the next chunk.
    Stopped,
    Failed,
    Complete,
}

/// Notification emitted to a job's observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    Started,
    Progressed { completed: u64, expected: u64 },
    Finished { status: JobStatus },
}

/// Observer callback invoked on job lifecycle events.
pub type ProgressObserver = Box<dyn Fn(ProgressEvent) + Send + Sync>;

struct Inner {
    status: JobStatus,
    expected: u64,
    completed: u64,
    window: VecDeque<(Instant, u64)>,
}

/// One cancellable unit of measurable work.
///
/// Shared between the producing transfer and its observer as
/// `Arc<ProgressJob>`; all methods take `&self`.
pub struct ProgressJob {
    inner: Mutex<Inner>,
    observer: Mutex<Option<ProgressObserver>>,
    cancel: CancellationToken,
}

impl ProgressJob {
    /// Create a job expecting `expected` bytes of work.
    pub fn new(expected: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                status: JobStatus::NotStarted,
                expected,
                completed: 0,
                window: VecDeque::with_capacity(WINDOW_CAP),
            }),
            observer: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Install the observer invoked on lifecycle events.
    pub fn set_observer(&self, observer: ProgressObserver) {
        *self.observer.lock() = Some(observer);
    }

    /// Revise the expected size once it is actually known.
    ///
    /// Resumed downloads only learn their true expected size after the
    /// first ranged response arrives.
    pub fn set_expected(&self, expected: u64) {
        self.inner.lock().expected = expected;
    }

    /// Transition to `Running` and notify the observer.
    pub fn start(&self) {
        self.inner.lock().status = JobStatus::Running;
        self.notify(ProgressEvent::Started);
    }

    pub fn pause(&self) {
        let mut inner = self.inner.lock();
        if inner.status == JobStatus::Running {
            inner.status = JobStatus::Paused;
        }
    }

    pub fn resume(&self) {
        let mut inner = self.inner.lock();
        if inner.status == JobStatus::Paused {
            inner.status = JobStatus::Running;
        }
    }

    /// Accumulate `delta` completed bytes and record a throughput sample.
    pub fn update(&self, delta: u64) {
        let event = {
            let mut inner = self.inner.lock();
            inner.completed += delta;
            if inner.window.len() == WINDOW_CAP {
                inner.window.pop_front();
            }
            inner.window.push_back((Instant::now(), delta));
            ProgressEvent::Progressed {
                completed: inner.completed,
                expected: inner.expected,
            }
        };
        self.notify(event);
    }

    /// Roll back `delta` previously counted bytes.
    ///
    /// Used when a finished transfer is discarded (digest mismatch)
    /// and its bytes will be counted again by the retry.
    pub fn retract(&self, delta: u64) {
        let event = {
            let mut inner = self.inner.lock();
            inner.completed = inner.completed.saturating_sub(delta);
            ProgressEvent::Progressed {
                completed: inner.completed,
                expected: inner.expected,
            }
        };
        self.notify(event);
    }

    /// Request cooperative cancellation.
    ///
    /// Sets status to `Stopped` and trips the cancellation token; the
    /// owning transfer observes it at its next chunk boundary. Sibling
    /// transfers with their own jobs are unaffected.
    pub fn cancel(&self) {
        self.inner.lock().status = JobStatus::Stopped;
        self.cancel.cancel();
    }

    /// Finish the job: `Complete` if all expected bytes arrived,
    /// `Failed` otherwise.
    pub fn finish(&self) {
        let status = {
            let mut inner = self.inner.lock();
            inner.status = if inner.completed == inner.expected {
                JobStatus::Complete
            } else {
                JobStatus::Failed
            };
            inner.status
        };
        self.notify(ProgressEvent::Finished { status });
    }

    /// Mark the job failed regardless of byte counts.
    pub fn fail(&self) {
        self.inner.lock().status = JobStatus::Failed;
        self.notify(ProgressEvent::Finished {
            status: JobStatus::Failed,
        });
    }

    pub fn status(&self) -> JobStatus {
        self.inner.lock().status
    }

    pub fn completed(&self) -> u64 {
        self.inner.lock().completed
    }

    pub fn expected(&self) -> u64 {
        self.inner.lock().expected
    }

    /// Token checked by the producing transfer at each chunk boundary.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Smoothed throughput in bytes per second.
    ///
    /// Computed as `sum(deltas) / timespan` over the sliding window;
    /// reported as 0.0 whenever the result is non-finite (fewer than
    /// two samples, or all samples at the same instant).
    pub fn throughput_bps(&self) -> f64 {
        let inner = self.inner.lock();
        let (first, last) = match (inner.window.front(), inner.window.back()) {
            (Some(f), Some(l)) => (f.0, l.0),
            _ => return 0.0,
        };
        let span = last.duration_since(first).as_secs_f64();
        let total: u64 = inner.window.iter().map(|(_, d)| d).sum();
        let rate = total as f64 / span;
        if rate.is_finite() {
            rate
        } else {
            0.0
        }
    }

    fn notify(&self, event: ProgressEvent) {
        if let Some(observer) = self.observer.lock().as_ref() {
            observer(event);
        }
    }
}

impl std::fmt::Debug for ProgressJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ProgressJob")
            .field("status", &inner.status)
            .field("completed", &inner.completed)
            .field("expected", &inner.expected)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_job_starts_not_started() {
        let job = ProgressJob::new(100);
        assert_eq!(job.status(), JobStatus::NotStarted);
        assert_eq!(job.completed(), 0);
        assert_eq!(job.expected(), 100);
    }

    #[test]
    fn test_job_lifecycle_complete() {
        let job = ProgressJob::new(10);
        job.start();
        assert_eq!(job.status(), JobStatus::Running);

        job.update(4);
        job.update(6);
        job.finish();

        assert_eq!(job.status(), JobStatus::Complete);
        assert_eq!(job.completed(), 10);
    }

    #[test]
    fn test_job_finish_short_is_failed() {
        let job = ProgressJob::new(10);
        job.start();
        job.update(4);
        job.finish();
        assert_eq!(job.status(), JobStatus::Failed);
    }

    #[test]
    fn test_retract_restores_completable_count() {
        let job = ProgressJob::new(10);
        job.start();
        job.update(10);
        job.retract(10);
        job.update(10);
        job.finish();
        assert_eq!(job.status(), JobStatus::Complete);
        assert_eq!(job.completed(), 10);
    }

    #[test]
    fn test_retract_saturates_at_zero() {
        let job = ProgressJob::new(10);
        job.update(4);
        job.retract(100);
        assert_eq!(job.completed(), 0);
    }

    #[test]
    fn test_job_pause_resume() {
        let job = ProgressJob::new(10);
        job.start();
        job.pause();
        assert_eq!(job.status(), JobStatus::Paused);
        job.resume();
        assert_eq!(job.status(), JobStatus::Running);
    }

    #[test]
    fn test_cancel_sets_stopped_and_trips_token() {
        let job = ProgressJob::new(10);
        job.start();
        job.cancel();

        assert_eq!(job.status(), JobStatus::Stopped);
        assert!(job.is_cancelled());
        assert!(job.cancellation_token().is_cancelled());
    }

    #[test]
    fn test_throughput_zero_without_samples() {
        let job = ProgressJob::new(10);
        assert_eq!(job.throughput_bps(), 0.0);

        // A single sample has zero timespan; the non-finite rate is
        // reported as zero.
        job.update(5);
        assert_eq!(job.throughput_bps(), 0.0);
    }

    #[test]
    fn test_throughput_positive_over_time() {
        let job = ProgressJob::new(1000);
        job.update(100);
        std::thread::sleep(std::time::Duration::from_millis(20));
        job.update(100);
        assert!(job.throughput_bps() > 0.0);
    }

    #[test]
    fn test_window_is_bounded() {
        let job = ProgressJob::new(u64::MAX);
        for _ in 0..200 {
            job.update(1);
        }
        assert_eq!(job.inner.lock().window.len(), WINDOW_CAP);
        assert_eq!(job.completed(), 200);
    }

    #[test]
    fn test_observer_receives_events() {
        let job = ProgressJob::new(2);
        let events = Arc::new(AtomicUsize::new(0));
        let events_clone = Arc::clone(&events);
        job.set_observer(Box::new(move |_| {
            events_clone.fetch_add(1, Ordering::SeqCst);
        }));

        job.start();
        job.update(2);
        job.finish();

        // Started + Progressed + Finished
        assert_eq!(events.load(Ordering::SeqCst), 3);
    }
}
