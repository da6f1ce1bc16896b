//! Cancellable delayed callbacks.
//!
//! The pending store arms one timer per quote. [`TokioScheduler`] runs timers
//! on a tokio runtime; [`ManualScheduler`] keeps a virtual clock that only
//! moves when told to, for replays and tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Cancelling is idempotent and a no-op once the task has run.
pub trait CancelHandle: Send + Sync {
    fn cancel(&self);
}

pub trait Scheduler: Send + Sync {
    fn schedule_after(&self, delay: Duration, task: Task) -> Box<dyn CancelHandle>;
}

// ---------------------------------------------------------------------------
// TokioScheduler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: tokio::runtime::Handle,
}

impl TokioScheduler {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Scheduler bound to the runtime of the calling context, if any.
    pub fn try_current() -> Option<Self> {
        tokio::runtime::Handle::try_current().ok().map(Self::new)
    }
}

struct TokioCancel(tokio::task::AbortHandle);

impl CancelHandle for TokioCancel {
    fn cancel(&self) {
        self.0.abort();
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_after(&self, delay: Duration, task: Task) -> Box<dyn CancelHandle> {
        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        });
        Box::new(TokioCancel(join.abort_handle()))
    }
}

// ---------------------------------------------------------------------------
// ManualScheduler
// ---------------------------------------------------------------------------

struct Scheduled {
    due: Duration,
    seq: u64,
    cancelled: Arc<AtomicBool>,
    task: Task,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    next_seq: u64,
    queue: Vec<Scheduled>,
}

#[derive(Default)]
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

struct ManualCancel(Arc<AtomicBool>);

impl CancelHandle for ManualCancel {
    fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time elapsed on the virtual clock.
    pub fn now(&self) -> Duration {
        self.lock().now
    }

    /// Timers still armed.
    pub fn pending(&self) -> usize {
        self.lock()
            .queue
            .iter()
            .filter(|s| !s.cancelled.load(Ordering::SeqCst))
            .count()
    }

    /// Move the clock forward by `by`, running every timer that falls due in
    /// deadline order. Tasks run without the scheduler lock held, so they may
    /// schedule or cancel timers themselves. Returns how many ran.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.lock().now.saturating_add(by);
        let mut fired = 0;

        loop {
            let next = {
                let mut state = self.lock();
                state
                    .queue
                    .retain(|s| !s.cancelled.load(Ordering::SeqCst));
                let earliest = state
                    .queue
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| s.due <= target)
                    .min_by_key(|(_, s)| (s.due, s.seq))
                    .map(|(i, _)| i);
                match earliest {
                    Some(i) => {
                        let scheduled = state.queue.swap_remove(i);
                        state.now = state.now.max(scheduled.due);
                        Some(scheduled)
                    }
                    None => {
                        state.now = target;
                        None
                    }
                }
            };

            match next {
                Some(scheduled) => {
                    // Cancellation may have landed after the lock was released.
                    if !scheduled.cancelled.load(Ordering::SeqCst) {
                        (scheduled.task)();
                        fired += 1;
                    }
                }
                None => break,
            }
        }

        fired
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_after(&self, delay: Duration, task: Task) -> Box<dyn CancelHandle> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut state = self.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        let due = state.now.saturating_add(delay);
        state.queue.push(Scheduled {
            due,
            seq,
            cancelled: cancelled.clone(),
            task,
        });
        Box::new(ManualCancel(cancelled))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter_task(counter: &Arc<AtomicUsize>) -> Task {
        let counter = counter.clone();
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn manual_fires_only_when_due() {
        let sched = ManualScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        sched.schedule_after(Duration::from_secs(10), counter_task(&hits));

        assert_eq!(sched.advance(Duration::from_secs(9)), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(sched.advance(Duration::from_secs(1)), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(sched.now(), Duration::from_secs(10));
        assert_eq!(sched.pending(), 0);
    }

    #[test]
    fn manual_cancel_is_idempotent() {
        let sched = ManualScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let handle = sched.schedule_after(Duration::from_secs(1), counter_task(&hits));
        handle.cancel();
        handle.cancel();

        assert_eq!(sched.pending(), 0);
        assert_eq!(sched.advance(Duration::from_secs(5)), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        handle.cancel();
    }

    #[test]
    fn manual_runs_in_deadline_order() {
        let sched = Arc::new(ManualScheduler::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        for (label, secs) in [("late", 30), ("early", 10), ("mid", 20)] {
            let order = order.clone();
            sched.schedule_after(
                Duration::from_secs(secs),
                Box::new(move || order.lock().unwrap().push(label)),
            );
        }
        assert_eq!(sched.advance(Duration::from_secs(60)), 3);
        assert_eq!(*order.lock().unwrap(), vec!["early", "mid", "late"]);
    }

    #[test]
    fn manual_task_may_schedule_more_work() {
        let sched = Arc::new(ManualScheduler::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let inner_sched = sched.clone();
        let inner_hits = hits.clone();
        sched.schedule_after(
            Duration::from_secs(1),
            Box::new(move || {
                inner_sched.schedule_after(Duration::from_secs(1), counter_task(&inner_hits));
            }),
        );
        assert_eq!(sched.advance(Duration::from_secs(5)), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn manual_clock_saturates_instead_of_overflowing() {
        let sched = ManualScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        sched.advance(Duration::from_secs(1));
        sched.schedule_after(Duration::from_secs(u64::MAX), counter_task(&hits));
        assert_eq!(sched.pending(), 1);

        assert_eq!(sched.advance(Duration::from_secs(u64::MAX - 10)), 0);
        assert_eq!(sched.advance(Duration::MAX), 1);
        assert_eq!(sched.now(), Duration::MAX);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_timer_fires_after_delay() {
        let sched = TokioScheduler::try_current().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        sched.schedule_after(Duration::from_secs(120), counter_task(&hits));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_cancel_prevents_firing() {
        let sched = TokioScheduler::try_current().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let handle = sched.schedule_after(Duration::from_secs(5), counter_task(&hits));
        handle.cancel();
        handle.cancel();

        tokio::time::sleep(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
