use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::task::AbortHandle;

use crate::clock::Clock;
use crate::model::Ms;

pub type TimerId = u64;

const PENDING: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerError {
    /// Called outside a tokio runtime.
    NoRuntime,
    /// The service was shut down.
    ShutDown,
}

impl std::fmt::Display for TimerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimerError::NoRuntime => write!(f, "no async runtime available"),
            TimerError::ShutDown => write!(f, "timer service shut down"),
        }
    }
}

impl std::error::Error for TimerError {}

struct TimerShared {
    status: AtomicU8,
    abort: OnceLock<AbortHandle>,
    live: Arc<AtomicUsize>,
}

impl TimerShared {
    /// Moves the timer out of `PENDING`. Exactly one of fire/cancel wins.
    fn claim(&self, to: u8) -> bool {
        let won = self
            .status
            .compare_exchange(PENDING, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            self.live.fetch_sub(1, Ordering::AcqRel);
        }
        won
    }
}

/// Roughly 30 years out, for deadlines `Instant` cannot represent.
fn far_future(now: tokio::time::Instant) -> tokio::time::Instant {
    now + std::time::Duration::from_secs(86_400 * 365 * 30)
}

/// One scheduled callback. Clones refer to the same timer.
#[derive(Clone)]
pub struct TimerHandle {
    id: TimerId,
    at: Ms,
    shared: Arc<TimerShared>,
}

impl TimerHandle {
    pub fn id(&self) -> TimerId {
        self.id
    }

    /// The instant the callback is due.
    pub fn at(&self) -> Ms {
        self.at
    }

    pub fn is_pending(&self) -> bool {
        self.shared.status.load(Ordering::Acquire) == PENDING
    }

    /// Suppress the callback. Returns `false` if it had already fired or been
    /// cancelled; a callback that won the race runs to completion.
    pub fn cancel(&self) -> bool {
        if !self.shared.claim(CANCELLED) {
            return false;
        }
        if let Some(abort) = self.shared.abort.get() {
            abort.abort();
        }
        true
    }
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHandle")
            .field("id", &self.id)
            .field("at", &self.at)
            .field("pending", &self.is_pending())
            .finish()
    }
}

/// Fires each scheduled callback at most once, on its own tokio task.
pub struct TimerService {
    clock: Clock,
    next_id: AtomicU64,
    closed: AtomicBool,
    live: Arc<AtomicUsize>,
}

impl TimerService {
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Schedule a future to run at `at`, or as soon as possible if `at` is
    /// not in the future. `callback` is handed the new timer id and builds the
    /// future immediately; the future itself is only polled on a spawned task.
    pub fn schedule<F, Fut>(&self, at: Ms, callback: F) -> Result<TimerHandle, TimerError>
    where
        F: FnOnce(TimerId) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(TimerError::ShutDown);
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| TimerError::NoRuntime)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(TimerShared {
            status: AtomicU8::new(PENDING),
            abort: OnceLock::new(),
            live: self.live.clone(),
        });
        self.live.fetch_add(1, Ordering::AcqRel);

        let fut = callback(id);
        let now = tokio::time::Instant::now();
        let deadline = now.checked_add(self.clock.until(at)).unwrap_or_else(|| far_future(now));
        let task_shared = shared.clone();
        let task = runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if task_shared.claim(FIRED) {
                fut.await;
            }
        });
        let _ = shared.abort.set(task.abort_handle());

        Ok(TimerHandle { id, at, shared })
    }

    /// Same as [`TimerHandle::cancel`].
    pub fn cancel(&self, handle: &TimerHandle) -> bool {
        handle.cancel()
    }

    /// Number of timers neither fired nor cancelled.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Refuse all further scheduling. Already scheduled timers are untouched.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use std::time::Duration;

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    fn bump(hits: Arc<AtomicUsize>) -> impl FnOnce(TimerId) -> BoxFuture<'static, ()> {
        move |_| {
            Box::pin(async move {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_at_deadline() {
        let timers = TimerService::new(Clock::starting_at(0));
        let hits = counter();
        let handle = timers.schedule(1_000, bump(hits.clone())).unwrap();
        assert_eq!(handle.at(), 1_000);
        assert_eq!(timers.live(), 1);

        tokio::time::sleep(Duration::from_millis(999)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!handle.is_pending());
        assert_eq!(timers.live(), 0);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn past_deadline_fires_asynchronously() {
        let timers = TimerService::new(Clock::starting_at(10_000));
        let hits = counter();
        timers.schedule(5_000, bump(hits.clone())).unwrap();
        // Not run on the scheduling stack.
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_fire() {
        let timers = TimerService::new(Clock::starting_at(0));
        let hits = counter();
        let handle = timers.schedule(500, bump(hits.clone())).unwrap();
        assert!(timers.cancel(&handle));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(timers.live(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_twice_is_noop() {
        let timers = TimerService::new(Clock::starting_at(0));
        let hits = counter();
        let handle = timers.schedule(500, bump(hits.clone())).unwrap();
        assert!(handle.cancel());
        assert!(!handle.cancel());
        assert!(!handle.clone().cancel());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_fire_is_noop() {
        let timers = TimerService::new(Clock::starting_at(0));
        let hits = counter();
        let handle = timers.schedule(100, bump(hits.clone())).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!handle.cancel());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn callback_receives_its_id() {
        let timers = TimerService::new(Clock::starting_at(0));
        let seen = Arc::new(AtomicU64::new(0));
        let seen2 = seen.clone();
        let handle = timers
            .schedule(10, move |id| async move {
                seen2.store(id, Ordering::SeqCst);
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(seen.load(Ordering::SeqCst), handle.id());
    }

    #[tokio::test]
    async fn closed_service_rejects() {
        let timers = TimerService::new(Clock::system());
        timers.close();
        assert!(timers.is_closed());
        let result = timers.schedule(0, |_| async {});
        assert_eq!(result.err(), Some(TimerError::ShutDown));
    }

    #[test]
    fn no_runtime_rejects() {
        let timers = TimerService::new(Clock::starting_at(0));
        let result = timers.schedule(0, |_| async {});
        assert_eq!(result.err(), Some(TimerError::NoRuntime));
        assert_eq!(timers.live(), 0);
    }
}
