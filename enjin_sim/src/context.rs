//! Simulation context implementing EnjinContext for deterministic testing.

use async_trait::async_trait;
use enjin_env::{EnjinContext, ManualContext, TaskHandle};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

/// Simulation context backed by a virtual clock and a seeded RNG.
///
/// This implements `EnjinContext` using:
/// - A `ManualContext` whose sleepers wake only when the runner advances time
/// - A seeded ChaCha8 RNG for fault injection and latency jitter
#[derive(Clone)]
pub struct SimContext {
    clock: ManualContext,

    /// Deterministic RNG shared by every clone
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl SimContext {
    /// Creates a new SimContext with the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            clock: ManualContext::new(seed),
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    /// Advances virtual time, waking due sleepers.
    pub fn advance_time(&self, duration: Duration) {
        self.clock.advance(duration);
    }

    /// Returns the current virtual time in nanoseconds.
    pub fn time_ns(&self) -> u64 {
        self.clock.time_ns()
    }

    /// Runs `f` against the shared RNG.
    pub fn with_rng<R>(&self, f: impl FnOnce(&mut ChaCha8Rng) -> R) -> R {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut rng)
    }
}

#[async_trait]
impl EnjinContext for SimContext {
    fn now(&self) -> Duration {
        self.clock.now()
    }

    fn system_time(&self) -> SystemTime {
        self.clock.system_time()
    }

    async fn sleep(&self, duration: Duration) {
        self.clock.sleep(duration).await;
    }

    fn spawn<F>(&self, name: &str, future: F) -> TaskHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.clock.spawn(name, future)
    }

    fn seed(&self) -> u64 {
        self.clock.seed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_sim_context_time() {
        let ctx = SimContext::new(42);
        assert_eq!(ctx.now(), Duration::ZERO);

        ctx.advance_time(Duration::from_millis(1500));
        assert_eq!(ctx.now(), Duration::from_millis(1500));
        assert_eq!(ctx.time_ns(), 1_500_000_000);
    }

    #[test]
    fn test_sim_context_deterministic_rng() {
        let a = SimContext::new(42);
        let b = SimContext::new(42);

        let xs: Vec<u64> = (0..4).map(|_| a.with_rng(|r| r.gen())).collect();
        let ys: Vec<u64> = (0..4).map(|_| b.with_rng(|r| r.gen())).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn test_clone_shares_clock_and_rng() {
        let a = SimContext::new(7);
        let b = a.clone();

        a.advance_time(Duration::from_secs(3));
        assert_eq!(b.now(), Duration::from_secs(3));
        assert_eq!(b.seed(), 7);
    }
}
