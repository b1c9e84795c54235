//! Pulse events: the smallest schedulable unit of a pulse sequence.
//!
//! All times are in **microseconds**. An event occupies the half-open
//! interval `[start_time, start_time + duration)`, so two events that
//! merely touch do not overlap.
//!
//! ```text
//!   channel "TX"  ──┤▇▇▇▇├──────────────┤▇▇├───────
//!   channel "RX"  ───────────┤░░░░░░░░░░░├─────────
//!                 0   start   end
//! ```

use std::f64::consts::PI;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::{SpectrometerError, SpectrometerResult};

/// Identifier of an output or input line of the instrument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Channel(pub String);

impl Channel {
    /// Create a new channel identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Channel {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Channel {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Envelope of a transmit pulse.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PulseShape {
    /// Constant envelope.
    #[default]
    Rectangular,
    /// Sinc envelope with three lobes either side of the centre.
    Sinc,
    /// Gaussian envelope, sigma is a sixth of the pulse duration.
    Gaussian,
    /// User supplied envelope, linearly interpolated over the duration.
    Custom {
        /// Envelope samples, equally spaced from start to end.
        samples: Vec<f64>,
    },
}

impl PulseShape {
    const SINC_LOBES: f64 = 3.0;
    const GAUSSIAN_SIGMA: f64 = 1.0 / 6.0;

    /// Relative envelope at normalized time `x` (0 = pulse start, 1 = end).
    ///
    /// Values of `x` outside `[0, 1]` are clamped.
    pub fn envelope(&self, x: f64) -> f64 {
        let x = x.clamp(0.0, 1.0);
        match self {
            PulseShape::Rectangular => 1.0,
            PulseShape::Sinc => {
                let u = (x - 0.5) * 2.0 * Self::SINC_LOBES;
                if u.abs() < 1e-12 {
                    1.0
                } else {
                    (PI * u).sin() / (PI * u)
                }
            }
            PulseShape::Gaussian => {
                let d = x - 0.5;
                (-(d * d) / (2.0 * Self::GAUSSIAN_SIGMA * Self::GAUSSIAN_SIGMA)).exp()
            }
            PulseShape::Custom { samples } => match samples.len() {
                0 => 0.0,
                1 => samples[0],
                n => {
                    let pos = x * (n - 1) as f64;
                    let i = (pos.floor() as usize).min(n - 2);
                    let frac = pos - i as f64;
                    samples[i] * (1.0 - frac) + samples[i + 1] * frac
                }
            },
        }
    }

    /// Mean of the envelope over the pulse, used to estimate the flip angle.
    pub fn area_factor(&self) -> f64 {
        const STEPS: usize = 256;
        let sum: f64 = (0..=STEPS)
            .map(|i| self.envelope(i as f64 / STEPS as f64))
            .sum();
        sum / (STEPS + 1) as f64
    }
}

/// What an event does on its channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    /// RF excitation pulse.
    Transmit {
        /// Envelope of the pulse.
        #[serde(default)]
        shape: PulseShape,
    },
    /// Receiver acquisition window.
    Readout,
    /// Gate / blanking line held active.
    Gate,
}

impl EventKind {
    /// Check whether this event excites the sample.
    pub fn is_transmit(&self) -> bool {
        matches!(self, EventKind::Transmit { .. })
    }

    /// Check whether the receiver records during this event.
    pub fn is_readout(&self) -> bool {
        matches!(self, EventKind::Readout)
    }
}

/// A single timed event on one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PulseEvent {
    /// Human-readable name of the event (e.g. "pi/2", "acq").
    pub label: String,
    /// Start time in microseconds, relative to sequence start.
    pub start_time: f64,
    /// Duration in microseconds.
    pub duration: f64,
    /// Complex amplitude relative to full scale.
    pub amplitude: Complex64,
    /// Phase in degrees.
    #[serde(default)]
    pub phase: f64,
    /// Channel this event is played on.
    pub channel: Channel,
    /// What the event does.
    #[serde(flatten)]
    pub kind: EventKind,
}

impl PulseEvent {
    /// Create a rectangular transmit pulse with full amplitude.
    pub fn transmit(
        label: impl Into<String>,
        channel: impl Into<Channel>,
        start_time: f64,
        duration: f64,
    ) -> Self {
        Self {
            label: label.into(),
            start_time,
            duration,
            amplitude: Complex64::new(1.0, 0.0),
            phase: 0.0,
            channel: channel.into(),
            kind: EventKind::Transmit {
                shape: PulseShape::Rectangular,
            },
        }
    }

    /// Create a receiver acquisition window.
    pub fn readout(
        label: impl Into<String>,
        channel: impl Into<Channel>,
        start_time: f64,
        duration: f64,
    ) -> Self {
        Self {
            label: label.into(),
            start_time,
            duration,
            amplitude: Complex64::new(0.0, 0.0),
            phase: 0.0,
            channel: channel.into(),
            kind: EventKind::Readout,
        }
    }

    /// Create a gate event.
    pub fn gate(
        label: impl Into<String>,
        channel: impl Into<Channel>,
        start_time: f64,
        duration: f64,
    ) -> Self {
        Self {
            label: label.into(),
            start_time,
            duration,
            amplitude: Complex64::new(1.0, 0.0),
            phase: 0.0,
            channel: channel.into(),
            kind: EventKind::Gate,
        }
    }

    /// Set a real amplitude.
    pub fn with_amplitude(mut self, amplitude: f64) -> Self {
        self.amplitude = Complex64::new(amplitude, 0.0);
        self
    }

    /// Set the phase in degrees.
    pub fn with_phase(mut self, phase_deg: f64) -> Self {
        self.phase = phase_deg;
        self
    }

    /// Set the envelope. Has no effect on non-transmit events.
    pub fn with_shape(mut self, shape: PulseShape) -> Self {
        if let EventKind::Transmit { shape: current } = &mut self.kind {
            *current = shape;
        }
        self
    }

    /// End time in microseconds.
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    /// Check whether two events occupy intersecting time intervals.
    ///
    /// Channels are not compared here; see [`PulseEvent::conflicts_with`].
    pub fn overlaps(&self, other: &PulseEvent) -> bool {
        self.start_time < other.end_time() && other.start_time < self.end_time()
    }

    /// Check whether two events overlap on the same channel.
    pub fn conflicts_with(&self, other: &PulseEvent) -> bool {
        self.channel == other.channel && self.overlaps(other)
    }

    /// Effective complex drive: amplitude rotated by the phase.
    pub fn drive(&self) -> Complex64 {
        self.amplitude * Complex64::from_polar(1.0, self.phase.to_radians())
    }

    /// Check the timing fields of the event in isolation.
    pub fn check_timing(&self) -> SpectrometerResult<()> {
        if !self.duration.is_finite() || self.duration <= 0.0 {
            return Err(SpectrometerError::Validation(format!(
                "event '{}' has non-positive duration {}",
                self.label, self.duration
            )));
        }
        if !self.start_time.is_finite() || self.start_time < 0.0 {
            return Err(SpectrometerError::Validation(format!(
                "event '{}' has negative start time {}",
                self.label, self.start_time
            )));
        }
        Ok(())
    }
}
