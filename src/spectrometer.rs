//! The spectrometer trait.
//!
//! [`Spectrometer`] is the contract every instrument driver implements,
//! whether it talks to real hardware or simulates one:
//!
//! ```text
//!   capabilities() ──→ configure() ──→ start() ──→ status() ──→ read_result()
//!    (sync, &ref)        (async)        (async)     (sync)        (async)
//!                                          │
//!                                          └──→ abort()  (async, any time)
//! ```
//!
//! ## Design principles
//!
//! - **Async-native**: everything that may touch hardware is async.
//! - **Thread-safe**: `Send + Sync`, all methods take `&self`, so `abort()`
//!   can run while another task is blocked in `read_result()`.
//! - **Infallible introspection**: `capabilities()` and `status()` never do
//!   I/O. A driver that cannot describe itself is not initialized.
//! - **Non-blocking start**: `start()` returns as soon as the program is
//!   accepted; acquisition proceeds in the background.
//!
//! ## Method table
//!
//! | Method | Kind | Required | Returns |
//! |--------|------|----------|---------|
//! | `name()` | sync | yes | `&str` |
//! | `capabilities()` | sync | yes | `&Capabilities` |
//! | `status()` | sync | yes | `InstrumentStatus` |
//! | `subscribe()` | sync | yes | `watch::Receiver<InstrumentStatus>` |
//! | `configure()` | async | yes | `SpectrometerResult<()>` |
//! | `start()` | async | yes | `SpectrometerResult<()>` |
//! | `abort()` | async | yes | `SpectrometerResult<()>` |
//! | `read_result()` | async | yes | `SpectrometerResult<MeasurementResult>` |
//! | `measure()` | async | provided | `SpectrometerResult<MeasurementResult>` |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::capability::Capabilities;
use crate::config::SpectrometerConfig;
use crate::error::SpectrometerResult;
use crate::result::MeasurementResult;
use crate::sequence::PulseSequence;
use crate::state::InstrumentStatus;

/// Trait for spectrometer drivers.
///
/// # Contract
///
/// - `capabilities()` MUST be cached at construction time.
/// - `configure()` MUST fail with `Configuration` for an unrecognized key or
///   a value outside the declared range, and with `State` while a run is
///   active.
/// - `start()` MUST fail with `Sequence` if `validate()` on the sequence
///   reports conflicts, and with `Hardware` if the device rejects the
///   program. On success the status is `Running` when it returns.
/// - `abort()` MUST be safe in any state. It is a no-op unless a run is
///   active; otherwise the status becomes `Aborted`.
/// - `read_result()` waits at most `timeout`. It returns the result of the
///   last run exactly once; a second call fails with `State`. An abort
///   makes a pending call return `Aborted` promptly. A timeout does not
///   stop the run.
#[async_trait]
pub trait Spectrometer: Send + Sync {
    /// Get the name of this instrument.
    fn name(&self) -> &str;

    /// Get the recognized parameters and channels of this instrument.
    fn capabilities(&self) -> &Capabilities;

    /// Current instrument status.
    fn status(&self) -> InstrumentStatus;

    /// Receiver notified on every status change.
    fn subscribe(&self) -> watch::Receiver<InstrumentStatus>;

    /// Apply a configuration. Keys not given keep their defaults.
    async fn configure(&self, config: &SpectrometerConfig) -> SpectrometerResult<()>;

    /// Load and start a sequence. Returns once the program runs.
    async fn start(&self, sequence: Arc<PulseSequence>) -> SpectrometerResult<()>;

    /// Cancel the active run, if any.
    async fn abort(&self) -> SpectrometerResult<()>;

    /// Wait for and take the result of the last run.
    async fn read_result(&self, timeout: Duration) -> SpectrometerResult<MeasurementResult>;

    /// Configure, start and wait for the result in one call.
    async fn measure(
        &self,
        config: &SpectrometerConfig,
        sequence: Arc<PulseSequence>,
        timeout: Duration,
    ) -> SpectrometerResult<MeasurementResult> {
        self.configure(config).await?;
        self.start(sequence).await?;
        self.read_result(timeout).await
    }
}
