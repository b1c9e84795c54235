//! NQRduck spectrometer core: pulse sequences, instrument abstraction and
//! the measurement state machine for magnetic resonance spectrometers.
//!
//! Any instrument, real or simulated, implements the [`Spectrometer`]
//! trait. The host describes what to play as a [`PulseSequence`], picks
//! settings as a [`SpectrometerConfig`], and hands both to a
//! [`MeasurementRunner`], which checks them against the instrument's
//! [`Capabilities`] and drives the run to a [`MeasurementResult`].
//!
//! # Overview
//!
//! The crate defines:
//! - [`PulseEvent`] / [`PulseSequence`] with per-channel overlap validation
//! - [`Capabilities`] / [`ParameterSpec`] declaring recognized settings and ranges
//! - The [`Spectrometer`] trait covering the run lifecycle
//! - [`MeasurementRunner`] with the [`MeasurementState`] machine
//! - [`MeasurementResult`] with time and frequency domain views
//! - [`SpectrometerError`] with categorized error variants
//! - [`SimulatedSpectrometer`], an in-process instrument for tests and demos
//!
//! # Lifecycle
//!
//! ```text
//!   capabilities() ──→ configure() ──→ start() ──→ status() ──→ read_result()
//!    (sync, &ref)        (async)        (async)     (sync)        (async)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use nqrduck_spectrometer::{
//!     MeasurementRunner, PulseEvent, PulseSequence, RunnerOptions, SimulatedSpectrometer,
//!     SpectrometerConfig,
//! };
//!
//! let mut sequence = PulseSequence::new("fid");
//! sequence.add_event(PulseEvent::transmit("pi/2", "TX", 0.0, 3.0))?;
//! sequence.add_event(PulseEvent::readout("acq", "RX", 10.0, 100.0))?;
//!
//! let runner = MeasurementRunner::new(
//!     Box::new(SimulatedSpectrometer::default()),
//!     RunnerOptions::from_env(),
//! );
//! let config = SpectrometerConfig::new().with("frequency", 10e6);
//! let result = runner.measure(&config, Arc::new(sequence), None).await?;
//! println!("{} samples at {} Hz", result.len(), result.sample_rate());
//! ```

pub mod capability;
pub mod config;
pub mod error;
pub mod pulse;
pub mod result;
pub mod runner;
pub mod sequence;
pub mod simulator;
pub mod spectrometer;
pub mod state;

pub use capability::{Capabilities, ParameterKind, ParameterSpec};
pub use config::{ParamValue, RunnerOptions, SettingsFile, SpectrometerConfig};
pub use error::{SpectrometerError, SpectrometerResult};
pub use pulse::{Channel, EventKind, PulseEvent, PulseShape};
pub use result::{MeasurementResult, ResultStatus, SequenceRef, Spectrum};
pub use runner::MeasurementRunner;
pub use sequence::{Conflict, PulseSequence, ValidationReport};
pub use simulator::{SimulatedFault, SimulatedSpectrometer, SimulatorConfig};
pub use spectrometer::Spectrometer;
pub use state::{InstrumentStatus, MeasurementState, RunId};
