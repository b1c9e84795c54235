//! Measurement result types.
//!
//! A [`MeasurementResult`] is produced once per successful run by the
//! spectrometer implementation and handed to the caller. It is immutable:
//! fields are only reachable through accessors, and the builder methods
//! consume the value, so they can only be used while it is being created.
//!
//! Samples are complex baseband values (I + jQ). The time axis is in
//! microseconds, the frequency axis in Hz.

use std::path::Path;

use chrono::{DateTime, Utc};
use num_complex::Complex64;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};

use crate::error::SpectrometerResult;
use crate::sequence::PulseSequence;

/// Read-only description of the sequence a result was acquired with.
///
/// This is a copy of identifying data, not a link that keeps the sequence
/// alive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceRef {
    /// Sequence name.
    pub name: String,
    /// Number of events in the sequence.
    pub event_count: usize,
    /// Total duration in microseconds.
    pub total_duration: f64,
}

impl From<&PulseSequence> for SequenceRef {
    fn from(sequence: &PulseSequence) -> Self {
        Self {
            name: sequence.name().to_string(),
            event_count: sequence.len(),
            total_duration: sequence.total_duration(),
        }
    }
}

/// Quality flag of an acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResultStatus {
    /// All samples within the receiver's range.
    #[default]
    Complete,
    /// At least one sample hit the receiver's full scale.
    Clipped,
}

/// Acquired samples plus metadata from one completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementResult {
    sequence: SequenceRef,
    samples: Vec<Complex64>,
    sample_rate: f64,
    #[serde(default)]
    target_frequency: f64,
    #[serde(default)]
    if_frequency: f64,
    #[serde(default = "default_averages")]
    averages: u32,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    status: ResultStatus,
    #[serde(default)]
    metadata: serde_json::Value,
}

fn default_averages() -> u32 {
    1
}

impl MeasurementResult {
    /// Create a new result stamped with the current time.
    pub fn new(sequence: &PulseSequence, samples: Vec<Complex64>, sample_rate: f64) -> Self {
        Self {
            sequence: SequenceRef::from(sequence),
            samples,
            sample_rate,
            target_frequency: 0.0,
            if_frequency: 0.0,
            averages: 1,
            timestamp: Utc::now(),
            status: ResultStatus::Complete,
            metadata: serde_json::Value::Null,
        }
    }

    /// Set the target frequency (Hz).
    pub fn with_target_frequency(mut self, frequency: f64) -> Self {
        self.target_frequency = frequency;
        self
    }

    /// Set the intermediate frequency (Hz).
    pub fn with_if_frequency(mut self, frequency: f64) -> Self {
        self.if_frequency = frequency;
        self
    }

    /// Set the number of averages the samples were accumulated over.
    pub fn with_averages(mut self, averages: u32) -> Self {
        self.averages = averages;
        self
    }

    /// Set the quality flag.
    pub fn with_status(mut self, status: ResultStatus) -> Self {
        self.status = status;
        self
    }

    /// Set instrument-specific metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// The sequence this result was acquired with.
    pub fn sequence(&self) -> &SequenceRef {
        &self.sequence
    }

    /// Complex samples.
    pub fn samples(&self) -> &[Complex64] {
        &self.samples
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Target frequency in Hz.
    pub fn target_frequency(&self) -> f64 {
        self.target_frequency
    }

    /// Intermediate frequency in Hz.
    pub fn if_frequency(&self) -> f64 {
        self.if_frequency
    }

    /// Number of averages.
    pub fn averages(&self) -> u32 {
        self.averages
    }

    /// When the acquisition finished.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Quality flag.
    pub fn status(&self) -> ResultStatus {
        self.status
    }

    /// Instrument-specific metadata.
    pub fn metadata(&self) -> &serde_json::Value {
        &self.metadata
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if no samples were acquired.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Acquisition length in microseconds.
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate * 1e6
    }

    /// Sample times in microseconds.
    #[allow(clippy::cast_precision_loss)]
    pub fn time_axis(&self) -> Vec<f64> {
        let dt = 1e6 / self.sample_rate;
        (0..self.samples.len()).map(|i| i as f64 * dt).collect()
    }

    /// Largest sample magnitude.
    pub fn max_magnitude(&self) -> f64 {
        self.samples.iter().map(|s| s.norm()).fold(0.0, f64::max)
    }

    /// Frequency-domain view of the samples.
    ///
    /// Zero frequency is centred; `frequency_shift` (Hz) is added to every
    /// bin so the axis can be expressed relative to e.g. the IF.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap)]
    pub fn spectrum(&self, frequency_shift: f64) -> Spectrum {
        let n = self.samples.len();
        if n == 0 {
            return Spectrum::default();
        }

        let mut buffer = self.samples.clone();
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(n);
        fft.process(&mut buffer);
        buffer.rotate_right(n / 2);

        let resolution = self.sample_rate / n as f64;
        let half = (n / 2) as isize;
        let frequencies = (0..n)
            .map(|i| (i as isize - half) as f64 * resolution + frequency_shift)
            .collect();

        Spectrum {
            frequencies,
            values: buffer,
        }
    }

    /// Serialize to JSON. Complex samples become `[re, im]` pairs.
    pub fn to_json(&self) -> SpectrometerResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Load from JSON.
    pub fn from_json(json: &str) -> SpectrometerResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Write the result to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> SpectrometerResult<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Read a result from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> SpectrometerResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }
}

/// FFT of a measurement, zero frequency centred.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Spectrum {
    /// Bin frequencies in Hz, ascending.
    pub frequencies: Vec<f64>,
    /// Complex bin values.
    pub values: Vec<Complex64>,
}

impl Spectrum {
    /// Bin magnitudes.
    pub fn magnitudes(&self) -> Vec<f64> {
        self.values.iter().map(|v| v.norm()).collect()
    }

    /// Frequency and magnitude of the strongest bin.
    pub fn peak(&self) -> Option<(f64, f64)> {
        self.values
            .iter()
            .map(|v| v.norm())
            .zip(self.frequencies.iter().copied())
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(mag, freq)| (freq, mag))
    }

    /// Number of bins.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the spectrum is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
