//! Spectrometer error types.
//!
//! Errors are categorized by where they are detected:
//!
//! | Category | Variants | Hardware touched? |
//! |----------|----------|-------------------|
//! | **Input** | `Validation`, `Configuration`, `Sequence` | No, fix input |
//! | **Device** | `Hardware` | Yes, surfaced verbatim, never retried |
//! | **Lifecycle** | `State`, `Timeout`, `Aborted` | Depends on the run |
//! | **Files** | `Persistence` | No |
//!
//! A `Timeout` only means the caller stopped waiting. The run itself keeps
//! going until someone calls `abort()`.

use thiserror::Error;

/// Errors that can occur while building sequences or driving a spectrometer.
///
/// The enum is `Clone` so that the measurement state machine can keep the
/// triggering error in its `Error` state while also returning it to the
/// caller.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum SpectrometerError {
    // ── Input errors (detected before hardware is touched) ───────────
    /// Malformed pulse sequence or pulse event.
    #[error("Invalid pulse sequence: {0}")]
    Validation(String),

    /// Unrecognized or out-of-range configuration parameter.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Conflicting events in a sequence submitted for execution.
    #[error("Sequence rejected: {0}")]
    Sequence(String),

    // ── Device errors ────────────────────────────────────────────────
    /// The device rejected a command or faulted during a run.
    #[error("Hardware error: {0}")]
    Hardware(String),

    // ── Lifecycle errors ─────────────────────────────────────────────
    /// Operation is not valid in the current state.
    #[error("Invalid state: {0}")]
    State(String),

    /// `read_result` exceeded the caller's deadline.
    #[error("Timed out after {0} ms waiting for the measurement result")]
    Timeout(u64),

    /// The run was aborted before a result was produced.
    #[error("Measurement aborted")]
    Aborted,

    // ── File errors ──────────────────────────────────────────────────
    /// Reading or writing a settings, sequence or result file failed.
    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl SpectrometerError {
    /// Returns `true` if the error was detected before any hardware was
    /// touched, i.e. the input has to be fixed.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::Configuration(_) | Self::Sequence(_)
        )
    }
}

impl From<std::io::Error> for SpectrometerError {
    fn from(err: std::io::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for SpectrometerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Result type for spectrometer operations.
pub type SpectrometerResult<T> = Result<T, SpectrometerError>;
