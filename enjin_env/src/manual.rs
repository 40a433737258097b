//! Deterministic context backed by a manually advanced virtual clock.

use crate::types::TaskHandle;
use crate::EnjinContext;
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A parked sleeper. One entry per pending sleep, refreshed on every poll.
struct Timer {
    id: u64,
    deadline_ns: u64,
    waker: Waker,
}

/// Shared clock state. Timers are parked wakers keyed by deadline.
struct ClockState {
    /// Current virtual time (nanoseconds since context creation)
    time_ns: Mutex<u64>,

    /// Sleepers waiting for the clock to reach their deadline
    timers: Mutex<Vec<Timer>>,

    next_timer_id: AtomicU64,

    /// Epoch offset (virtual time 0 maps to this wall-clock time)
    epoch: SystemTime,
}

/// Context whose time only moves when the driver calls [`ManualContext::advance`].
///
/// `sleep` parks the calling task until the virtual clock passes its
/// deadline, so retries and simulated latencies resolve in deadline order
/// regardless of how fast the host machine is.
///
/// Spawning requires an ambient tokio runtime.
#[derive(Clone)]
pub struct ManualContext {
    state: Arc<ClockState>,
    seed: u64,
}

impl ManualContext {
    /// Creates a clock at virtual time zero.
    pub fn new(seed: u64) -> Self {
        Self {
            state: Arc::new(ClockState {
                time_ns: Mutex::new(0),
                timers: Mutex::new(Vec::new()),
                next_timer_id: AtomicU64::new(0),
                epoch: UNIX_EPOCH + Duration::from_secs(1704067200), // 2024-01-01 00:00:00 UTC
            }),
            seed,
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    /// Advances virtual time and wakes every sleeper whose deadline passed.
    pub fn advance(&self, duration: Duration) {
        let now = {
            let mut time = lock(&self.state.time_ns);
            *time = time.saturating_add(duration.as_nanos() as u64);
            *time
        };

        let due: Vec<Waker> = {
            let mut timers = lock(&self.state.timers);
            let (due, pending): (Vec<_>, Vec<_>) =
                timers.drain(..).partition(|timer| timer.deadline_ns <= now);
            *timers = pending;
            due.into_iter().map(|timer| timer.waker).collect()
        };

        for waker in due {
            waker.wake();
        }
    }

    /// Returns the current virtual time in nanoseconds.
    pub fn time_ns(&self) -> u64 {
        *lock(&self.state.time_ns)
    }

    /// Number of sleepers still parked on the clock.
    pub fn pending_timers(&self) -> usize {
        lock(&self.state.timers).len()
    }
}

/// Poisoning only happens if a holder panicked; the clock value is still valid.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Future returned by a virtual sleep.
struct VirtualSleep {
    state: Arc<ClockState>,
    id: u64,
    deadline_ns: u64,
}

impl Future for VirtualSleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        // Timers lock first: `advance` publishes the new time before it takes
        // this lock, so a registration here is always seen by the next wake pass.
        let mut timers = lock(&self.state.timers);
        let now = *lock(&self.state.time_ns);
        if now >= self.deadline_ns {
            timers.retain(|timer| timer.id != self.id);
            return Poll::Ready(());
        }

        match timers.iter_mut().find(|timer| timer.id == self.id) {
            Some(timer) => timer.waker.clone_from(cx.waker()),
            None => timers.push(Timer {
                id: self.id,
                deadline_ns: self.deadline_ns,
                waker: cx.waker().clone(),
            }),
        }
        Poll::Pending
    }
}

impl Drop for VirtualSleep {
    fn drop(&mut self) {
        lock(&self.state.timers).retain(|timer| timer.id != self.id);
    }
}

#[async_trait]
impl EnjinContext for ManualContext {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.time_ns())
    }

    fn system_time(&self) -> SystemTime {
        self.state.epoch + self.now()
    }

    async fn sleep(&self, duration: Duration) {
        let deadline_ns = self.time_ns().saturating_add(duration.as_nanos() as u64);
        VirtualSleep {
            state: Arc::clone(&self.state),
            id: self.state.next_timer_id.fetch_add(1, Ordering::Relaxed),
            deadline_ns,
        }
        .await;
    }

    fn spawn<F>(&self, name: &str, future: F) -> TaskHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        TaskHandle::new(name, tokio::spawn(future))
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_manual_context_time() {
        let ctx = ManualContext::new(42);
        assert_eq!(ctx.now(), Duration::ZERO);

        ctx.advance(Duration::from_secs(1));
        assert_eq!(ctx.now(), Duration::from_secs(1));

        ctx.advance(Duration::from_millis(500));
        assert_eq!(ctx.now(), Duration::from_millis(1500));
    }

    #[test]
    fn test_clone_shares_time() {
        let ctx1 = ManualContext::new(42);
        let ctx2 = ctx1.clone();

        ctx1.advance(Duration::from_secs(5));

        assert_eq!(ctx1.now(), ctx2.now());
    }

    #[tokio::test]
    async fn test_sleep_waits_for_virtual_deadline() {
        let ctx = ManualContext::new(1);
        let done = Arc::new(AtomicBool::new(false));

        let task_ctx = ctx.clone();
        let task_done = Arc::clone(&done);
        let handle = ctx.spawn("sleeper", async move {
            task_ctx.sleep(Duration::from_secs(5)).await;
            task_done.store(true, Ordering::SeqCst);
        });

        tokio::task::yield_now().await;
        assert!(!done.load(Ordering::SeqCst));
        assert_eq!(ctx.pending_timers(), 1);

        ctx.advance(Duration::from_secs(4));
        tokio::task::yield_now().await;
        assert!(!done.load(Ordering::SeqCst));

        ctx.advance(Duration::from_secs(1));
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert!(done.load(Ordering::SeqCst));
        assert!(handle.is_finished());
    }

    #[tokio::test]
    async fn test_repolled_sleep_keeps_one_timer() {
        let ctx = ManualContext::new(1);
        let mut sleep = ctx.sleep(Duration::from_secs(5));

        std::future::poll_fn(|cx| {
            for _ in 0..3 {
                assert!(sleep.as_mut().poll(cx).is_pending());
            }
            Poll::Ready(())
        })
        .await;
        assert_eq!(ctx.pending_timers(), 1);

        drop(sleep);
        assert_eq!(ctx.pending_timers(), 0);
    }

    #[tokio::test]
    async fn test_zero_sleep_is_immediate() {
        let ctx = ManualContext::new(1);
        ctx.sleep(Duration::ZERO).await;
        assert_eq!(ctx.pending_timers(), 0);
    }
}
