//! Fixed tuning constants for a globe session.
//!
//! None of these are environment-driven; the structs exist so tests and the
//! simulator can shorten or stretch a single knob without touching the rest.

use crate::render::CameraPose;
use std::time::Duration;

/// Configuration for the Temporal Window Controller.
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Playback timer cadence (default: 50ms)
    pub tick_interval: Duration,

    /// Position advance per tick at 1x speed (default: 0.001)
    pub step_per_tick: f64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(50),
            step_per_tick: 0.001,
        }
    }
}

/// Configuration for the Data Synchronization Layer.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Poll interval (default: 30s)
    pub poll_interval: Duration,

    /// Identical requests inside this window are not reissued (default: 5s)
    pub dedupe_window: Duration,

    /// Retries after a failed attempt (default: 3)
    pub max_retries: u32,

    /// Spacing between retries (default: 5s)
    pub retry_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            dedupe_window: Duration::from_secs(5),
            max_retries: 3,
            retry_interval: Duration::from_secs(5),
        }
    }
}

/// Configuration for the Render/Interaction Loop.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Animation frame cadence (default: 16ms)
    pub frame_interval: Duration,

    /// Longitude advance per frame while auto-rotating, in degrees (default: 0.1)
    pub rotation_step_deg: f64,

    /// Delay after interaction ends before auto-rotation resumes (default: 3s)
    pub idle_before_resume: Duration,

    /// Starting viewpoint
    pub initial_pose: CameraPose,

    /// Click picking radius in pixels (default: 8)
    pub pick_tolerance_px: f64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(16),
            rotation_step_deg: 0.1,
            idle_before_resume: Duration::from_secs(3),
            initial_pose: CameraPose::INITIAL,
            pick_tolerance_px: 8.0,
        }
    }
}

/// Complete session configuration.
#[derive(Debug, Clone, Default)]
pub struct GlobeConfig {
    pub playback: PlaybackConfig,
    pub sync: SyncConfig,
    pub render: RenderConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_globe_config_default() {
        let config = GlobeConfig::default();
        assert_eq!(config.playback.tick_interval, Duration::from_millis(50));
        assert_eq!(config.sync.poll_interval, Duration::from_secs(30));
        assert_eq!(config.sync.dedupe_window, Duration::from_secs(5));
        assert_eq!(config.sync.max_retries, 3);
        assert_eq!(config.sync.retry_interval, Duration::from_secs(5));
        assert_eq!(config.render.idle_before_resume, Duration::from_secs(3));
    }
}
