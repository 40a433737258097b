//! Fault scenarios for the globe simulator.

use std::fmt;
use std::str::FromStr;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScenarioId {
    /// SIM-001: Full playback sweep against a static catalog
    PlaybackSweep,

    /// SIM-002: Consecutive transport failures inside the retry budget
    RetryStorm,

    /// SIM-003: Range changes whose responses arrive out of order
    OutOfOrder,

    /// SIM-004: Drag interactions and idle auto-rotation resume
    IdleResume,

    /// SIM-005: Catalog growth picked up by polling, with random 503s
    LiveChurn,

    /// SIM-006: Region and bounds filters narrowing the rendered set
    RegionFilter,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::PlaybackSweep,
            ScenarioId::RetryStorm,
            ScenarioId::OutOfOrder,
            ScenarioId::IdleResume,
            ScenarioId::LiveChurn,
            ScenarioId::RegionFilter,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::PlaybackSweep => "playback_sweep",
            ScenarioId::RetryStorm => "retry_storm",
            ScenarioId::OutOfOrder => "out_of_order",
            ScenarioId::IdleResume => "idle_resume",
            ScenarioId::LiveChurn => "live_churn",
            ScenarioId::RegionFilter => "region_filter",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::PlaybackSweep => "Play from 0 to 1, points only grow and playback auto-pauses at the end",
            ScenarioId::RetryStorm => "3 network failures then success, one retry budget, no error surfaced",
            ScenarioId::OutOfOrder => "Slow stale response lands after a fast fresh one and is discarded",
            ScenarioId::IdleResume => "Rotation suspends on drag and resumes 3s after the last release",
            ScenarioId::LiveChurn => "New events published mid-run appear after the next poll despite 20% 503s",
            ScenarioId::RegionFilter => "Region filter requeries, bounds filter narrows without requery",
        }
    }
}

impl fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScenarioId::all()
            .into_iter()
            .find(|id| id.name() == s.to_lowercase().replace('-', "_"))
            .ok_or_else(|| format!("Unknown scenario: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for id in ScenarioId::all() {
            assert_eq!(id.name().parse::<ScenarioId>(), Ok(id));
        }
    }

    #[test]
    fn test_parse_is_lenient_about_case_and_dashes() {
        assert_eq!("Retry-Storm".parse::<ScenarioId>(), Ok(ScenarioId::RetryStorm));
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }
}
