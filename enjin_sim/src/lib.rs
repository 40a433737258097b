//! Enjin Deterministic Simulation Harness
//!
//! Runs a complete globe session against a simulated feed service on a
//! virtual clock. Nothing in a run depends on wall time or ambient entropy:
//! - **Time**: the runner advances a `ManualContext` one frame at a time
//! - **Network**: `SimTransport` injects latency, jitter, failures and 503s
//! - **Data**: `EventOracle` generates the catalog from the run seed
//!
//! The same seed always produces the same requests, batches and frames.
//!
//! # Usage
//!
//! ```ignore
//! use enjin_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::RetryStorm);
//! assert!(result.passed);
//! ```

mod context;
mod exporter;
mod oracle;
mod runner;
mod transport;
pub mod scenarios;

pub use context::SimContext;
pub use exporter::{SimExport, SimFrame};
pub use oracle::{EventOracle, OracleConfig};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner, SimHost};
pub use transport::{FaultPlan, RequestOutcome, RequestRecord, SimTransport};
