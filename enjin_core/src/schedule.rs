//! Cooperative timers driven by an external monotonic clock.
//!
//! Nothing here sleeps or spawns. The owning loop reads `EnjinContext::now()`
//! and asks each timer how many firings are due, which keeps every periodic
//! activity on the single event loop and makes teardown a plain `cancel()`.

use std::time::Duration;

/// What to do when the loop polls later than one full period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissedTicks {
    /// Deliver every elapsed period. Used where each firing carries state
    /// (playback position increments).
    CatchUp,

    /// Deliver at most one firing per poll. Used for animation frames.
    Skip,
}

/// A cancellable periodic task handle.
#[derive(Debug, Clone)]
pub struct Periodic {
    interval: Duration,
    next_due: Option<Duration>,
    policy: MissedTicks,
}

impl Periodic {
    /// Starts a timer whose first firing is one interval after `now`.
    pub fn start(now: Duration, interval: Duration, policy: MissedTicks) -> Self {
        let interval = interval.max(Duration::from_nanos(1));
        Self {
            interval,
            next_due: Some(now + interval),
            policy,
        }
    }

    /// A timer that never fires.
    pub fn inert(interval: Duration, policy: MissedTicks) -> Self {
        Self {
            interval: interval.max(Duration::from_nanos(1)),
            next_due: None,
            policy,
        }
    }

    /// Returns how many firings are due at `now` and reschedules.
    pub fn poll(&mut self, now: Duration) -> u32 {
        let Some(next) = self.next_due else {
            return 0;
        };
        if now < next {
            return 0;
        }

        let interval_ns = self.interval.as_nanos();
        let elapsed_periods = (now - next).as_nanos() / interval_ns + 1;
        let advance_ns = elapsed_periods * interval_ns;
        self.next_due = Some(next + Duration::from_nanos(advance_ns.min(u64::MAX as u128) as u64));

        match self.policy {
            MissedTicks::CatchUp => elapsed_periods.min(u32::MAX as u128) as u32,
            MissedTicks::Skip => 1,
        }
    }

    /// Re-arms the timer relative to `now`.
    pub fn restart(&mut self, now: Duration) {
        self.next_due = Some(now + self.interval);
    }

    /// Stops the timer. Idempotent.
    pub fn cancel(&mut self) {
        self.next_due = None;
    }

    pub fn is_active(&self) -> bool {
        self.next_due.is_some()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Next firing time, if armed.
    pub fn next_due(&self) -> Option<Duration> {
        self.next_due
    }
}

/// A one-shot timer.
#[derive(Debug, Clone, Default)]
pub struct Deadline {
    at: Option<Duration>,
}

impl Deadline {
    pub fn arm(&mut self, at: Duration) {
        self.at = Some(at);
    }

    pub fn disarm(&mut self) {
        self.at = None;
    }

    pub fn is_armed(&self) -> bool {
        self.at.is_some()
    }

    pub fn at(&self) -> Option<Duration> {
        self.at
    }

    /// Fires (and disarms) if the deadline has been reached.
    pub fn fire_if_due(&mut self, now: Duration) -> bool {
        match self.at {
            Some(at) if now >= at => {
                self.at = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_periodic_fires_on_interval() {
        let mut timer = Periodic::start(ms(0), ms(50), MissedTicks::CatchUp);

        assert_eq!(timer.poll(ms(49)), 0);
        assert_eq!(timer.poll(ms(50)), 1);
        assert_eq!(timer.poll(ms(60)), 0);
        assert_eq!(timer.poll(ms(100)), 1);
    }

    #[test]
    fn test_catch_up_delivers_every_missed_period() {
        let mut timer = Periodic::start(ms(0), ms(50), MissedTicks::CatchUp);

        // Loop stalled for 175ms: periods at 50, 100, 150 are due
        assert_eq!(timer.poll(ms(175)), 3);
        assert_eq!(timer.next_due(), Some(ms(200)));
    }

    #[test]
    fn test_skip_delivers_one_firing() {
        let mut timer = Periodic::start(ms(0), ms(16), MissedTicks::Skip);

        assert_eq!(timer.poll(ms(100)), 1);
        assert_eq!(timer.next_due(), Some(ms(112)));
    }

    #[test]
    fn test_cancelled_timer_never_fires() {
        let mut timer = Periodic::start(ms(0), ms(50), MissedTicks::CatchUp);
        timer.cancel();

        assert!(!timer.is_active());
        assert_eq!(timer.poll(ms(10_000)), 0);
    }

    #[test]
    fn test_deadline_one_shot() {
        let mut deadline = Deadline::default();
        assert!(!deadline.fire_if_due(ms(100)));

        deadline.arm(ms(3000));
        assert!(!deadline.fire_if_due(ms(2999)));
        assert!(deadline.fire_if_due(ms(3000)));
        assert!(!deadline.fire_if_due(ms(4000)));
    }
}
