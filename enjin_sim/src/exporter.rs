//! JSON exporter for offline inspection of a run.
//!
//! Frames capture what the viewer would have seen at each sample point.

use enjin_core::{CameraPose, PlaybackState, SyncStatus};
use serde::Serialize;
use std::fs::File;
use std::io::Write;

/// A single sample of session state.
#[derive(Debug, Clone, Serialize)]
pub struct SimFrame {
    /// Virtual time in seconds
    pub time_sec: f64,

    pub playback: PlaybackState,

    /// Displayed instant, RFC 3339
    pub displayed_at: String,

    pub camera: CameraPose,
    pub rotating: bool,

    pub points: usize,
    pub arcs: usize,

    pub status: SyncStatus,

    /// Feed batches applied so far
    pub generation: u64,

    /// Notable things that happened since the previous frame
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<String>,
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize)]
pub struct SimExport {
    pub scenario: String,
    pub seed: u64,
    pub duration_sec: f64,
    pub frames: Vec<SimFrame>,
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl SimExport {
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            duration_sec: 0.0,
            frames: Vec::new(),
            passed: false,
            failure_reason: None,
        }
    }

    pub fn add_frame(&mut self, frame: SimFrame) {
        self.duration_sec = frame.time_sec;
        self.frames.push(frame);
    }

    pub fn finalize(&mut self, passed: bool, failure_reason: Option<String>) {
        self.passed = passed;
        self.failure_reason = failure_reason;
    }

    /// Writes pretty-printed JSON to `path`.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
