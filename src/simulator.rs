//! Simulated spectrometer.
//!
//! [`SimulatedSpectrometer`] implements the full [`Spectrometer`] contract
//! without hardware. A run goes through the same statuses a real instrument
//! reports, each phase lasting [`SimulatorConfig::phase_delay`]:
//!
//! ```text
//!   start() ──→ Running ──(delay)──→ Collecting ──(delay)──→ Done
//! ```
//!
//! The acquired signal is a free induction decay: every transmit pulse that
//! ended before a sample contributes to the flip angle, the most recent one
//! sets the phase and the decay origin. The FID precesses at
//! `resonance_offset_hz + if_frequency` and decays with `t2_star_us`.
//! Uniform noise is added, scaled down by `sqrt(averages)`. Samples are
//! taken inside readout events, or across the whole sequence if it has none.
//!
//! Faults can be injected with [`SimulatorConfig::fault`] to exercise error
//! paths of the measurement runner.

use std::f64::consts::{FRAC_PI_2, PI};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use num_complex::Complex64;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::capability::Capabilities;
use crate::config::{SpectrometerConfig, keys};
use crate::error::{SpectrometerError, SpectrometerResult};
use crate::pulse::{EventKind, PulseEvent};
use crate::result::{MeasurementResult, ResultStatus};
use crate::sequence::PulseSequence;
use crate::spectrometer::Spectrometer;
use crate::state::InstrumentStatus;

const REFERENCE_RX_GAIN_DB: f64 = 30.0;
const FALLBACK_SAMPLE_RATE: f64 = 1e6;

/// Fault to inject into a simulated run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulatedFault {
    /// `start()` fails with a hardware error.
    RejectProgram,
    /// The run fails after acquisition has begun.
    DuringAcquisition,
}

/// Behaviour of the simulated instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Time spent in each of the Running and Collecting phases.
    #[serde(with = "crate::config::duration_ms")]
    pub phase_delay: Duration,
    /// Decay constant of the FID in microseconds.
    pub t2_star_us: f64,
    /// Offset of the resonance from the target frequency in Hz.
    pub resonance_offset_hz: f64,
    /// Duration of a full-amplitude rectangular 90° pulse in microseconds.
    pub pi_half_us: f64,
    /// FID amplitude after a 90° pulse, relative to full scale.
    pub signal_amplitude: f64,
    /// Peak noise amplitude for a single scan.
    pub noise_level: f64,
    /// Seed of the noise generator. Each run uses `seed + run number`.
    pub seed: u64,
    /// Receiver full scale; larger samples are clipped.
    pub full_scale: f64,
    /// Longest program the sequencer accepts, in microseconds.
    pub max_program_us: f64,
    /// Receiver memory; `start()` refuses runs that would acquire more
    /// samples than this at the configured sample rate.
    pub max_samples: usize,
    /// Fault to inject.
    pub fault: Option<SimulatedFault>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            phase_delay: Duration::from_millis(20),
            t2_star_us: 50.0,
            resonance_offset_hz: 100e3,
            pi_half_us: 3.0,
            signal_amplitude: 0.5,
            noise_level: 0.01,
            seed: 42,
            full_scale: 1.0,
            max_program_us: 1e6,
            max_samples: 1 << 22,
            fault: None,
        }
    }
}

impl SimulatorConfig {
    /// Accumulated flip angle and phase of the transmit pulses that ended
    /// at or before `t`, plus the end of the latest one.
    fn excitation_before(&self, transmits: &[&PulseEvent], t: f64) -> Option<(f64, f64, f64)> {
        let mut flip = 0.0;
        let mut phase = 0.0;
        let mut last_end: Option<f64> = None;

        for event in transmits.iter().filter(|e| e.end_time() <= t) {
            let area = match &event.kind {
                EventKind::Transmit { shape } => shape.area_factor(),
                _ => continue,
            };
            flip += FRAC_PI_2 * event.amplitude.norm() * area * event.duration / self.pi_half_us;
            if last_end.is_none_or(|end| event.end_time() >= end) {
                last_end = Some(event.end_time());
                phase = event.drive().arg();
            }
        }

        last_end.map(|end| (flip, phase, end))
    }

    /// Noise-free FID value at time `t` (microseconds).
    fn fid_at(&self, transmits: &[&PulseEvent], t: f64, offset_hz: f64) -> Complex64 {
        let Some((flip, phase, origin)) = self.excitation_before(transmits, t) else {
            return Complex64::new(0.0, 0.0);
        };
        let tau = t - origin;
        let magnitude = self.signal_amplitude * flip.sin() * (-tau / self.t2_star_us).exp();
        let angle = 2.0 * PI * offset_hz * tau * 1e-6 + phase + FRAC_PI_2;
        Complex64::from_polar(magnitude, angle)
    }

    /// Acquisition windows in microseconds: the readout events, or the
    /// whole sequence when it has none.
    fn sample_windows(sequence: &PulseSequence) -> Vec<(f64, f64)> {
        let mut windows: Vec<(f64, f64)> = sequence
            .events()
            .iter()
            .filter(|e| e.kind.is_readout())
            .map(|e| (e.start_time, e.end_time()))
            .collect();
        if windows.is_empty() {
            windows.push((0.0, sequence.total_duration()));
        }
        windows
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn window_len(start: f64, end: f64, dt: f64) -> usize {
        ((end - start) / dt).round().max(0.0) as usize
    }

    /// Number of samples a run of `sequence` acquires at `sample_rate`.
    fn sample_count(sequence: &PulseSequence, sample_rate: f64) -> usize {
        let dt = 1e6 / sample_rate;
        Self::sample_windows(sequence)
            .into_iter()
            .map(|(start, end)| Self::window_len(start, end, dt))
            .fold(0, usize::saturating_add)
    }

    /// Produce the result of one run.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn synthesize(
        &self,
        sequence: &PulseSequence,
        config: &SpectrometerConfig,
        run: u64,
    ) -> MeasurementResult {
        let sample_rate = config.sample_rate().unwrap_or(FALLBACK_SAMPLE_RATE);
        let frequency = config.frequency().unwrap_or(0.0);
        let if_frequency = config.if_frequency().unwrap_or(0.0);
        let averages = config.averages().unwrap_or(1).max(1);
        let rx_gain = config
            .get_f64(keys::RX_GAIN)
            .unwrap_or(REFERENCE_RX_GAIN_DB);
        let gain = 10f64.powf((rx_gain - REFERENCE_RX_GAIN_DB) / 20.0);
        let offset_hz = self.resonance_offset_hz + if_frequency;

        let transmits: Vec<&PulseEvent> = sequence
            .events()
            .iter()
            .filter(|e| e.kind.is_transmit())
            .collect();
        let windows = Self::sample_windows(sequence);

        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(run));
        let noise = self.noise_level / f64::from(averages).sqrt();
        let dt = 1e6 / sample_rate;
        let full_scale = self.full_scale;
        let mut clipped = false;
        let mut samples = Vec::with_capacity(Self::sample_count(sequence, sample_rate));

        for (start, end) in windows {
            for i in 0..Self::window_len(start, end, dt) {
                let t = start + i as f64 * dt;
                let jitter = Complex64::new(rng.gen_range(-1.0..=1.0), rng.gen_range(-1.0..=1.0));
                let s = (self.fid_at(&transmits, t, offset_hz) + jitter * noise) * gain;
                if s.re.abs() > full_scale || s.im.abs() > full_scale {
                    clipped = true;
                }
                samples.push(Complex64::new(
                    s.re.clamp(-full_scale, full_scale),
                    s.im.clamp(-full_scale, full_scale),
                ));
            }
        }

        let status = if clipped {
            ResultStatus::Clipped
        } else {
            ResultStatus::Complete
        };

        MeasurementResult::new(sequence, samples, sample_rate)
            .with_target_frequency(frequency)
            .with_if_frequency(if_frequency)
            .with_averages(averages)
            .with_status(status)
            .with_metadata(serde_json::json!({
                "simulator": {
                    "run": run,
                    "seed": self.seed.wrapping_add(run),
                    "resonance_offset_hz": self.resonance_offset_hz,
                }
            }))
    }
}

struct RunSlot {
    config: SpectrometerConfig,
    generation: u64,
    result: Option<MeasurementResult>,
    task: Option<JoinHandle<()>>,
}

struct Shared {
    status: watch::Sender<InstrumentStatus>,
    slot: Mutex<RunSlot>,
}

impl Shared {
    /// Move from `from` to `to` if `generation` is still the current run.
    fn advance(&self, generation: u64, from: &InstrumentStatus, to: InstrumentStatus) -> bool {
        let slot = self.slot.lock();
        if slot.generation != generation {
            return false;
        }
        self.status.send_if_modified(|current| {
            if current == from {
                *current = to;
                true
            } else {
                false
            }
        })
    }
}

/// In-process instrument implementing [`Spectrometer`].
pub struct SimulatedSpectrometer {
    capabilities: Capabilities,
    options: SimulatorConfig,
    shared: Arc<Shared>,
}

impl SimulatedSpectrometer {
    /// Create a simulator with [`Capabilities::simulator`].
    pub fn new(options: SimulatorConfig) -> Self {
        Self::with_capabilities(Capabilities::simulator(), options)
    }

    /// Create a simulator declaring custom capabilities.
    pub fn with_capabilities(capabilities: Capabilities, options: SimulatorConfig) -> Self {
        let (status, _) = watch::channel(InstrumentStatus::Idle);
        let config = capabilities.defaults();
        Self {
            capabilities,
            options,
            shared: Arc::new(Shared {
                status,
                slot: Mutex::new(RunSlot {
                    config,
                    generation: 0,
                    result: None,
                    task: None,
                }),
            }),
        }
    }

    /// Effective configuration the next run will use.
    pub fn active_config(&self) -> SpectrometerConfig {
        self.shared.slot.lock().config.clone()
    }

    /// Number of runs started so far.
    pub fn runs_started(&self) -> u64 {
        self.shared.slot.lock().generation
    }

    async fn execute(
        shared: Arc<Shared>,
        options: SimulatorConfig,
        sequence: Arc<PulseSequence>,
        config: SpectrometerConfig,
        generation: u64,
    ) {
        tokio::time::sleep(options.phase_delay).await;
        if !shared.advance(generation, &InstrumentStatus::Running, InstrumentStatus::Collecting) {
            return;
        }
        debug!(generation, "Simulated acquisition started");

        tokio::time::sleep(options.phase_delay).await;
        if options.fault == Some(SimulatedFault::DuringAcquisition) {
            warn!(generation, "Injected fault during acquisition");
            shared.advance(
                generation,
                &InstrumentStatus::Collecting,
                InstrumentStatus::Failed("receiver overload during acquisition".into()),
            );
            return;
        }

        let result = options.synthesize(&sequence, &config, generation);
        let mut slot = shared.slot.lock();
        let current = shared.status.borrow().clone();
        if slot.generation == generation && current == InstrumentStatus::Collecting {
            debug!(generation, samples = result.len(), "Simulated acquisition finished");
            slot.result = Some(result);
            shared.status.send_replace(InstrumentStatus::Done);
        }
    }
}

impl Default for SimulatedSpectrometer {
    fn default() -> Self {
        Self::new(SimulatorConfig::default())
    }
}

#[async_trait]
impl Spectrometer for SimulatedSpectrometer {
    fn name(&self) -> &str {
        &self.capabilities.name
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn status(&self) -> InstrumentStatus {
        self.shared.status.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<InstrumentStatus> {
        self.shared.status.subscribe()
    }

    async fn configure(&self, config: &SpectrometerConfig) -> SpectrometerResult<()> {
        if self.status().is_active() {
            return Err(SpectrometerError::State(
                "cannot reconfigure while a run is active".into(),
            ));
        }
        self.capabilities.check_config(config)?;
        let resolved = self.capabilities.resolve(config);
        debug!(spectrometer = %self.name(), keys = ?config.keys(), "Configured");
        self.shared.slot.lock().config = resolved;
        Ok(())
    }

    async fn start(&self, sequence: Arc<PulseSequence>) -> SpectrometerResult<()> {
        let total = sequence.validate().into_result()?;
        self.capabilities.check_sequence(&sequence)?;

        let mut slot = self.shared.slot.lock();
        if self.shared.status.borrow().is_active() {
            return Err(SpectrometerError::State(
                "a run is already in progress".into(),
            ));
        }
        if self.options.fault == Some(SimulatedFault::RejectProgram) {
            return Err(SpectrometerError::Hardware(
                "device rejected the pulse program".into(),
            ));
        }
        if total > self.options.max_program_us {
            return Err(SpectrometerError::Hardware(format!(
                "program of {total} us exceeds sequencer memory ({} us)",
                self.options.max_program_us
            )));
        }
        let sample_rate = slot.config.sample_rate().unwrap_or(FALLBACK_SAMPLE_RATE);
        let samples = SimulatorConfig::sample_count(&sequence, sample_rate);
        if samples > self.options.max_samples {
            return Err(SpectrometerError::Hardware(format!(
                "acquisition of {samples} samples exceeds receiver memory ({} samples)",
                self.options.max_samples
            )));
        }

        slot.generation += 1;
        slot.result = None;
        let generation = slot.generation;
        self.shared.status.send_replace(InstrumentStatus::Running);

        let task = tokio::spawn(Self::execute(
            Arc::clone(&self.shared),
            self.options.clone(),
            sequence,
            slot.config.clone(),
            generation,
        ));
        slot.task = Some(task);

        info!(spectrometer = %self.name(), generation, duration_us = total, "Run started");
        Ok(())
    }

    async fn abort(&self) -> SpectrometerResult<()> {
        let mut slot = self.shared.slot.lock();
        let aborted = self.shared.status.send_if_modified(|status| {
            if status.is_active() {
                *status = InstrumentStatus::Aborted;
                true
            } else {
                false
            }
        });

        if aborted {
            if let Some(task) = slot.task.take() {
                task.abort();
            }
            info!(spectrometer = %self.name(), generation = slot.generation, "Run aborted");
        } else {
            debug!(spectrometer = %self.name(), "Abort requested with no active run");
        }
        Ok(())
    }

    async fn read_result(&self, timeout: Duration) -> SpectrometerResult<MeasurementResult> {
        let mut rx = self.shared.status.subscribe();
        {
            let slot = self.shared.slot.lock();
            let status = rx.borrow().clone();
            match status {
                InstrumentStatus::Idle => {
                    return Err(SpectrometerError::State(
                        "no measurement has been started".into(),
                    ));
                }
                InstrumentStatus::Done if slot.result.is_none() => {
                    return Err(SpectrometerError::State(
                        "measurement result was already read".into(),
                    ));
                }
                _ => {}
            }
        }

        let status = match tokio::time::timeout(timeout, rx.wait_for(InstrumentStatus::is_terminal))
            .await
        {
            Ok(Ok(status)) => status.clone(),
            Ok(Err(_)) => {
                return Err(SpectrometerError::Hardware(
                    "status channel closed".into(),
                ));
            }
            Err(_) => {
                warn!(spectrometer = %self.name(), ?timeout, "Timed out waiting for result");
                return Err(SpectrometerError::Timeout(
                    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                ));
            }
        };

        match status {
            InstrumentStatus::Done => self.shared.slot.lock().result.take().ok_or_else(|| {
                SpectrometerError::State("measurement result was already read".into())
            }),
            InstrumentStatus::Aborted => Err(SpectrometerError::Aborted),
            InstrumentStatus::Failed(reason) => Err(SpectrometerError::Hardware(reason)),
            other => Err(SpectrometerError::State(format!(
                "unexpected instrument status {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pulse::PulseShape;

    fn fast() -> SimulatorConfig {
        SimulatorConfig {
            phase_delay: Duration::from_millis(5),
            ..SimulatorConfig::default()
        }
    }

    fn fid() -> Arc<PulseSequence> {
        let mut seq = PulseSequence::new("fid");
        seq.add_event(PulseEvent::transmit("pi/2", "TX", 0.0, 3.0))
            .unwrap();
        seq.add_event(PulseEvent::readout("acq", "RX", 10.0, 40.0))
            .unwrap();
        Arc::new(seq)
    }

    #[tokio::test]
    async fn test_full_run() {
        let sim = SimulatedSpectrometer::new(fast());
        assert_eq!(sim.status(), InstrumentStatus::Idle);

        sim.configure(&SpectrometerConfig::new().with(keys::SAMPLE_RATE, 2e6))
            .await
            .unwrap();
        sim.start(fid()).await.unwrap();
        assert_eq!(sim.status(), InstrumentStatus::Running);

        let result = sim.read_result(Duration::from_secs(5)).await.unwrap();
        assert_eq!(sim.status(), InstrumentStatus::Done);
        assert_eq!(result.sample_rate(), 2e6);
        assert_eq!(result.len(), 80);
        assert_eq!(result.sequence().name, "fid");
        assert_eq!(result.target_frequency(), 10e6);
        assert_eq!(sim.runs_started(), 1);
    }

    #[tokio::test]
    async fn test_result_is_read_once() {
        let sim = SimulatedSpectrometer::new(fast());
        sim.start(fid()).await.unwrap();
        sim.read_result(Duration::from_secs(5)).await.unwrap();
        let second = sim.read_result(Duration::from_secs(5)).await;
        assert!(matches!(second, Err(SpectrometerError::State(_))));
    }

    #[tokio::test]
    async fn test_read_before_start() {
        let sim = SimulatedSpectrometer::default();
        let err = sim.read_result(Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(err, SpectrometerError::State(_)));
    }

    #[tokio::test]
    async fn test_configure_rejects_out_of_range() {
        let sim = SimulatedSpectrometer::default();
        let err = sim
            .configure(&SpectrometerConfig::new().with(keys::FREQUENCY, 50e6))
            .await
            .unwrap_err();
        assert!(matches!(err, SpectrometerError::Configuration(_)));
        assert_eq!(sim.active_config().frequency(), Some(10e6));
    }

    #[tokio::test]
    async fn test_start_rejects_conflicts() {
        let sim = SimulatedSpectrometer::default();
        let seq = PulseSequence::from_events(
            "overlap",
            vec![
                PulseEvent::transmit("a", "TX", 0.0, 10.0),
                PulseEvent::transmit("b", "TX", 5.0, 10.0),
            ],
        );
        let err = sim.start(Arc::new(seq)).await.unwrap_err();
        assert!(matches!(err, SpectrometerError::Sequence(_)));
        assert_eq!(sim.status(), InstrumentStatus::Idle);
    }

    #[tokio::test]
    async fn test_start_while_running() {
        let sim = SimulatedSpectrometer::new(SimulatorConfig {
            phase_delay: Duration::from_secs(60),
            ..SimulatorConfig::default()
        });
        sim.start(fid()).await.unwrap();
        assert!(matches!(
            sim.start(fid()).await,
            Err(SpectrometerError::State(_))
        ));
        assert!(matches!(
            sim.configure(&SpectrometerConfig::new()).await,
            Err(SpectrometerError::State(_))
        ));
        sim.abort().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_program() {
        let sim = SimulatedSpectrometer::new(SimulatorConfig {
            fault: Some(SimulatedFault::RejectProgram),
            ..fast()
        });
        let err = sim.start(fid()).await.unwrap_err();
        assert!(matches!(err, SpectrometerError::Hardware(_)));
        assert_eq!(sim.status(), InstrumentStatus::Idle);
    }

    #[tokio::test]
    async fn test_program_too_long() {
        let sim = SimulatedSpectrometer::new(SimulatorConfig {
            max_program_us: 20.0,
            ..fast()
        });
        let err = sim.start(fid()).await.unwrap_err();
        assert!(matches!(err, SpectrometerError::Hardware(_)));
    }

    #[tokio::test]
    async fn test_acquisition_exceeds_receiver_memory() {
        let sim = SimulatedSpectrometer::new(SimulatorConfig {
            max_samples: 1000,
            ..fast()
        });
        let sequence = Arc::new(PulseSequence::from_events(
            "long",
            vec![
                PulseEvent::transmit("pi/2", "TX", 0.0, 3.0),
                PulseEvent::readout("acq", "RX", 10.0, 900_000.0),
            ],
        ));
        let err = sim.start(sequence).await.unwrap_err();
        assert!(matches!(err, SpectrometerError::Hardware(_)));
        assert_eq!(sim.status(), InstrumentStatus::Idle);

        sim.start(fid()).await.unwrap();
        sim.read_result(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_fault_during_acquisition() {
        let sim = SimulatedSpectrometer::new(SimulatorConfig {
            fault: Some(SimulatedFault::DuringAcquisition),
            ..fast()
        });
        sim.start(fid()).await.unwrap();
        let err = sim.read_result(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, SpectrometerError::Hardware(_)));
        assert!(matches!(sim.status(), InstrumentStatus::Failed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_does_not_abort() {
        let sim = SimulatedSpectrometer::new(SimulatorConfig {
            phase_delay: Duration::from_secs(1),
            ..SimulatorConfig::default()
        });
        sim.start(fid()).await.unwrap();
        let err = sim.read_result(Duration::from_millis(100)).await.unwrap_err();
        assert_eq!(err, SpectrometerError::Timeout(100));
        assert!(sim.status().is_active());

        let result = sim.read_result(Duration::from_secs(10)).await.unwrap();
        assert!(!result.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_wakes_blocked_reader() {
        let sim = Arc::new(SimulatedSpectrometer::new(SimulatorConfig {
            phase_delay: Duration::from_secs(30),
            ..SimulatorConfig::default()
        }));
        sim.start(fid()).await.unwrap();

        let reader = {
            let sim = Arc::clone(&sim);
            tokio::spawn(async move { sim.read_result(Duration::from_secs(600)).await })
        };
        tokio::task::yield_now().await;

        let started = tokio::time::Instant::now();
        sim.abort().await.unwrap();
        let outcome = reader.await.unwrap();
        assert_eq!(outcome.unwrap_err(), SpectrometerError::Aborted);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(sim.status(), InstrumentStatus::Aborted);
    }

    #[tokio::test]
    async fn test_abort_is_idempotent() {
        let sim = SimulatedSpectrometer::new(SimulatorConfig {
            phase_delay: Duration::from_secs(60),
            ..SimulatorConfig::default()
        });
        sim.abort().await.unwrap();
        assert_eq!(sim.status(), InstrumentStatus::Idle);

        sim.start(fid()).await.unwrap();
        sim.abort().await.unwrap();
        sim.abort().await.unwrap();
        assert_eq!(sim.status(), InstrumentStatus::Aborted);
    }

    #[tokio::test]
    async fn test_status_subscription_sees_collecting() {
        let sim = SimulatedSpectrometer::new(fast());
        let mut rx = sim.subscribe();
        sim.start(fid()).await.unwrap();
        rx.wait_for(|s| *s == InstrumentStatus::Collecting)
            .await
            .unwrap();
        sim.read_result(Duration::from_secs(5)).await.unwrap();
    }

    #[test]
    fn test_fid_peaks_at_resonance_offset() {
        let options = SimulatorConfig {
            noise_level: 0.0,
            t2_star_us: 1e9,
            ..SimulatorConfig::default()
        };
        let config = Capabilities::simulator().resolve(
            &SpectrometerConfig::new().with(keys::SAMPLE_RATE, 1.6e6),
        );
        let seq = PulseSequence::from_events(
            "fid",
            vec![
                PulseEvent::transmit("pi/2", "TX", 0.0, 3.0),
                PulseEvent::readout("acq", "RX", 3.0, 80.0),
            ],
        );
        let result = options.synthesize(&seq, &config, 1);
        assert_eq!(result.len(), 128);
        assert_eq!(result.status(), ResultStatus::Complete);
        let (freq, _) = result.spectrum(0.0).peak().unwrap();
        assert!((freq - 100e3).abs() < 1.0);
        assert!((result.max_magnitude() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_no_readout_acquires_whole_sequence() {
        let options = SimulatorConfig::default();
        let config = Capabilities::simulator().defaults();
        let seq = PulseSequence::from_events(
            "single",
            vec![PulseEvent::transmit("p", "A", 0.0, 10.0)],
        );
        let result = options.synthesize(&seq, &config, 1);
        assert_eq!(result.len(), 50);
        assert_eq!(result.sample_rate(), 5e6);
    }

    #[test]
    fn test_high_gain_clips() {
        let options = SimulatorConfig::default();
        let config = Capabilities::simulator()
            .resolve(&SpectrometerConfig::new().with(keys::RX_GAIN, 70.0));
        let result = options.synthesize(&fid(), &config, 1);
        assert_eq!(result.status(), ResultStatus::Clipped);
        assert!(result.max_magnitude() <= 2f64.sqrt() + 1e-12);
    }

    #[test]
    fn test_shaped_pulse_flips_less() {
        let options = SimulatorConfig::default();
        let rect = PulseEvent::transmit("r", "TX", 0.0, 3.0);
        let gauss = rect.clone().with_shape(PulseShape::Gaussian);
        let (flip_rect, _, _) = options.excitation_before(&[&rect], 5.0).unwrap();
        let (flip_gauss, _, _) = options.excitation_before(&[&gauss], 5.0).unwrap();
        assert!((flip_rect - FRAC_PI_2).abs() < 1e-9);
        assert!(flip_gauss < flip_rect);
        assert!(options.excitation_before(&[&rect], 1.0).is_none());
    }
}
