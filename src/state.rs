//! Instrument and measurement lifecycle states.
//!
//! Two state machines are tracked. The instrument reports its own
//! [`InstrumentStatus`]:
//!
//! ```text
//!   start() ──→ Running ──→ Collecting ──→ Done
//!                  │            │
//!                  │            ├──→ Failed(reason)
//!                  │            │
//!                  └────────────┴──→ Aborted
//! ```
//!
//! The measurement runner drives the host-visible [`MeasurementState`]:
//!
//! ```text
//!   Idle ──submit()──→ Configuring ──→ Running ──→ Collecting ──→ Done
//!                           │             │            │
//!                           └─────────────┴────────────┴──→ Aborted | Error(err)
//! ```
//!
//! **Invariants:**
//! - Transitions are monotonic within a run; nothing moves backward.
//! - Terminal states (`Done`, `Aborted`, `Error`) stay until the next run.
//! - A runner that has started hardware never reports `Idle` before a
//!   terminal state.

use serde::{Deserialize, Serialize};

use crate::error::SpectrometerError;

/// Identifier of one submitted run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(pub u64);

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "run-{}", self.0)
    }
}

/// Status reported by a spectrometer implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstrumentStatus {
    /// No program loaded or started.
    Idle,
    /// Program started, excitation in progress.
    Running,
    /// Receiver is acquiring data.
    Collecting,
    /// Acquisition finished; a result is (or was) available.
    Done,
    /// The run was cancelled.
    Aborted,
    /// The device faulted during the run.
    Failed(String),
}

impl InstrumentStatus {
    /// Check if a run is in progress.
    pub fn is_active(&self) -> bool {
        matches!(self, InstrumentStatus::Running | InstrumentStatus::Collecting)
    }

    /// Check if the last run has ended.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstrumentStatus::Done | InstrumentStatus::Aborted | InstrumentStatus::Failed(_)
        )
    }
}

impl std::fmt::Display for InstrumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstrumentStatus::Idle => write!(f, "Idle"),
            InstrumentStatus::Running => write!(f, "Running"),
            InstrumentStatus::Collecting => write!(f, "Collecting"),
            InstrumentStatus::Done => write!(f, "Done"),
            InstrumentStatus::Aborted => write!(f, "Aborted"),
            InstrumentStatus::Failed(msg) => write!(f, "Failed: {msg}"),
        }
    }
}

/// Host-visible state of the measurement runner.
#[derive(Debug, Clone, PartialEq)]
pub enum MeasurementState {
    /// Ready for a new submit.
    Idle,
    /// Input accepted, instrument being configured and started.
    Configuring,
    /// Program running on the instrument.
    Running,
    /// Instrument is acquiring data.
    Collecting,
    /// Result delivered.
    Done,
    /// Run cancelled on request.
    Aborted,
    /// Run failed; carries the triggering error.
    Error(SpectrometerError),
}

impl MeasurementState {
    /// Check if a run is in progress (Configuring, Running or Collecting).
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            MeasurementState::Configuring | MeasurementState::Running | MeasurementState::Collecting
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MeasurementState::Done | MeasurementState::Aborted | MeasurementState::Error(_)
        )
    }

    /// Check if a new run may be submitted.
    pub fn accepts_submit(&self) -> bool {
        !self.is_active()
    }

    /// The error carried by the `Error` state.
    pub fn error(&self) -> Option<&SpectrometerError> {
        match self {
            MeasurementState::Error(err) => Some(err),
            _ => None,
        }
    }
}

impl std::fmt::Display for MeasurementState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MeasurementState::Idle => write!(f, "Idle"),
            MeasurementState::Configuring => write!(f, "Configuring"),
            MeasurementState::Running => write!(f, "Running"),
            MeasurementState::Collecting => write!(f, "Collecting"),
            MeasurementState::Done => write!(f, "Done"),
            MeasurementState::Aborted => write!(f, "Aborted"),
            MeasurementState::Error(err) => write!(f, "Error: {err}"),
        }
    }
}
