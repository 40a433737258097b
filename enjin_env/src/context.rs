//! Core environment context trait for the globe client.

use crate::types::TaskHandle;
use async_trait::async_trait;
use std::future::Future;
use std::time::{Duration, SystemTime};

/// The central interface for Environment Interaction.
///
/// This trait abstracts the "real world" so that the playback, sync and
/// render engines can run in both production (tokio) and simulation
/// (virtual clock) environments.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time`
/// - **Deterministic**: `ManualContext` - virtual clock advanced by the driver
///
/// # Determinism
///
/// Every timer in the core (playback ticks, animation frames, poll interval,
/// retry spacing, idle-before-resume) reads time through `now()`, so a
/// manual clock makes whole sessions reproducible.
#[async_trait]
pub trait EnjinContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    ///
    /// Used for internal timers and duration measurements.
    /// In simulation, this is the virtual clock time.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time.
    ///
    /// In simulation, this is derived from virtual clock + epoch offset.
    fn system_time(&self) -> SystemTime;

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: completes once the virtual clock passes the deadline
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task and returns its handle.
    ///
    /// The caller owns the handle and must cancel it on teardown.
    fn spawn<F>(&self, name: &str, future: F) -> TaskHandle
    where
        F: Future<Output = ()> + Send + 'static;

    /// Returns the context's seed (for logging/debugging).
    ///
    /// In production, returns 0 (not seeded).
    fn seed(&self) -> u64;
}
