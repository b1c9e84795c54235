//! Measurement state machine.
//!
//! [`MeasurementRunner`] owns one [`Spectrometer`] and drives a single run
//! at a time through the [`MeasurementState`] lifecycle:
//!
//! ```text
//!   submit() ──→ Configuring ──→ Running ──→ Collecting ──→ Done
//!                    │              │            │
//!                    └──────────────┴────────────┴──→ Aborted | Error(err)
//! ```
//!
//! Input is checked against the instrument's capabilities before anything
//! is sent to the device, so a rejected submit leaves the runner `Idle` and
//! the hardware untouched. Hardware and state faults move the runner to
//! `Error`, carrying the error. Timeouts from [`MeasurementRunner::collect`]
//! leave the run going.
//!
//! All methods take `&self`. Share the runner through an `Arc` to abort
//! from one task while another waits in `collect()`:
//!
//! ```ignore
//! let runner = Arc::new(MeasurementRunner::new(Box::new(simulator), RunnerOptions::default()));
//! runner.submit(&config, Arc::new(sequence)).await?;
//!
//! let waiter = Arc::clone(&runner);
//! let pending = tokio::spawn(async move { waiter.collect(None).await });
//! runner.abort().await?;
//! assert!(matches!(pending.await?, Err(SpectrometerError::Aborted)));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::capability::Capabilities;
use crate::config::{RunnerOptions, SpectrometerConfig};
use crate::error::{SpectrometerError, SpectrometerResult};
use crate::result::MeasurementResult;
use crate::sequence::PulseSequence;
use crate::spectrometer::Spectrometer;
use crate::state::{InstrumentStatus, MeasurementState, RunId};

/// Deadline used when `now + timeout` is not representable.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

struct CurrentRun {
    id: RunId,
    sequence: Arc<PulseSequence>,
}

/// Drives measurements on an exclusively owned spectrometer.
pub struct MeasurementRunner {
    spectrometer: Box<dyn Spectrometer>,
    options: RunnerOptions,
    state: watch::Sender<MeasurementState>,
    current: Mutex<Option<CurrentRun>>,
    next_run: AtomicU64,
    // Held for the whole of `submit()`; `abort()` never takes it.
    submitting: AsyncMutex<()>,
}

impl MeasurementRunner {
    /// Create a runner in the `Idle` state.
    pub fn new(spectrometer: Box<dyn Spectrometer>, options: RunnerOptions) -> Self {
        let (state, _) = watch::channel(MeasurementState::Idle);
        Self {
            spectrometer,
            options,
            state,
            current: Mutex::new(None),
            next_run: AtomicU64::new(1),
            submitting: AsyncMutex::new(()),
        }
    }

    /// Current state.
    pub fn state(&self) -> MeasurementState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state transition.
    pub fn subscribe(&self) -> watch::Receiver<MeasurementState> {
        self.state.subscribe()
    }

    /// Capabilities of the owned instrument.
    pub fn capabilities(&self) -> &Capabilities {
        self.spectrometer.capabilities()
    }

    /// The owned instrument.
    pub fn spectrometer(&self) -> &dyn Spectrometer {
        self.spectrometer.as_ref()
    }

    /// Options this runner was created with.
    pub fn options(&self) -> &RunnerOptions {
        &self.options
    }

    /// Id of the latest submitted run.
    pub fn run_id(&self) -> Option<RunId> {
        self.current.lock().as_ref().map(|run| run.id)
    }

    /// Sequence of the latest submitted run.
    pub fn current_sequence(&self) -> Option<Arc<PulseSequence>> {
        self.current
            .lock()
            .as_ref()
            .map(|run| Arc::clone(&run.sequence))
    }

    /// Release the instrument.
    pub fn into_spectrometer(self) -> Box<dyn Spectrometer> {
        self.spectrometer
    }

    /// Check the input, then configure the instrument and start the run.
    ///
    /// A terminal runner is reset to `Idle` first. Concurrent calls are
    /// serialized; a call that loses the race sees the winner's run as
    /// active.
    ///
    /// # Errors
    ///
    /// - `State` if a run is active.
    /// - `Configuration` / `Sequence` if the input is rejected, either here
    ///   or by the device. The runner is left `Idle`.
    /// - `Hardware` / `State` from the device. The runner moves to `Error`.
    /// - `Aborted` if [`abort`](Self::abort) was called before the run
    ///   reached `Running`.
    pub async fn submit(
        &self,
        config: &SpectrometerConfig,
        sequence: Arc<PulseSequence>,
    ) -> SpectrometerResult<RunId> {
        let _submitting = self.submitting.lock().await;
        if self.state.borrow().is_active() {
            return Err(SpectrometerError::State(
                "a measurement is already in progress".into(),
            ));
        }
        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                *state = MeasurementState::Idle;
                true
            } else {
                false
            }
        });

        if let Err(err) = self.check_input(config, &sequence) {
            warn!(spectrometer = %self.spectrometer.name(), error = %err, "Submission rejected");
            return Err(err);
        }

        let id = RunId(self.next_run.fetch_add(1, Ordering::Relaxed));
        let claimed = self.state.send_if_modified(|state| {
            if *state == MeasurementState::Idle {
                *self.current.lock() = Some(CurrentRun {
                    id,
                    sequence: Arc::clone(&sequence),
                });
                *state = MeasurementState::Configuring;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(SpectrometerError::State(
                "a measurement is already in progress".into(),
            ));
        }
        info!(
            run = %id,
            spectrometer = %self.spectrometer.name(),
            sequence = %sequence.name(),
            from = "Idle",
            to = "Configuring",
            "Measurement submitted"
        );

        if let Err(err) = self.spectrometer.configure(config).await {
            return Err(self.fail_submit(id, err));
        }
        if !self.is_configuring(id) {
            debug!(run = %id, "Aborted before the program was started");
            return Err(SpectrometerError::Aborted);
        }
        if let Err(err) = self.spectrometer.start(sequence).await {
            return Err(self.fail_submit(id, err));
        }

        if self.transition(id, MeasurementState::Running, |s| {
            *s == MeasurementState::Configuring
        }) {
            Ok(id)
        } else {
            // Aborted during start(); stop the program it loaded.
            debug!(run = %id, "Aborted while starting, stopping the instrument");
            self.spectrometer.abort().await?;
            Err(SpectrometerError::Aborted)
        }
    }

    /// Sync the state with the instrument status and return it.
    pub fn poll(&self) -> MeasurementState {
        let status = self.spectrometer.status();
        if let Some(id) = self.run_id() {
            self.sync(id, &status);
        }
        self.state()
    }

    /// Wait for and return the result of the current run.
    ///
    /// `timeout` defaults to [`RunnerOptions::read_timeout`] and bounds the
    /// whole call.
    ///
    /// # Errors
    ///
    /// - `Timeout` if no result arrived in time. The state is unchanged.
    /// - `Aborted` if the run was aborted.
    /// - `State` if there is no run to collect.
    /// - Any device error, which also moves the runner to `Error`.
    pub async fn collect(&self, timeout: Option<Duration>) -> SpectrometerResult<MeasurementResult> {
        let timeout = timeout.unwrap_or(self.options.read_timeout);
        let now = Instant::now();
        let deadline = now.checked_add(timeout).unwrap_or(now + FAR_FUTURE);
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);

        let id = self.collectable()?;

        let mut status_rx = self.spectrometer.subscribe();
        let observed = match tokio::time::timeout_at(
            deadline,
            status_rx.wait_for(|s| *s != InstrumentStatus::Running),
        )
        .await
        {
            Ok(Ok(status)) => Some(status.clone()),
            Ok(Err(_)) => None,
            Err(_) => {
                warn!(run = %id, ?timeout, "Timed out waiting for acquisition to start");
                return Err(SpectrometerError::Timeout(timeout_ms));
            }
        };
        if let Some(status) = observed {
            self.sync(id, &status);
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.spectrometer.read_result(remaining).await {
            Ok(result) => {
                if self.transition(id, MeasurementState::Done, MeasurementState::is_active) {
                    info!(run = %id, samples = result.len(), "Measurement complete");
                    Ok(result)
                } else {
                    Err(self.state().error().cloned().unwrap_or(SpectrometerError::Aborted))
                }
            }
            Err(SpectrometerError::Timeout(_)) => {
                warn!(run = %id, ?timeout, "Timed out waiting for result");
                Err(SpectrometerError::Timeout(timeout_ms))
            }
            Err(SpectrometerError::Aborted) => {
                self.transition(id, MeasurementState::Aborted, MeasurementState::is_active);
                Err(SpectrometerError::Aborted)
            }
            Err(err) => {
                warn!(run = %id, error = %err, "Reading the result failed");
                self.transition(id, MeasurementState::Error(err.clone()), MeasurementState::is_active);
                Err(err)
            }
        }
    }

    /// Submit a run and collect its result.
    pub async fn measure(
        &self,
        config: &SpectrometerConfig,
        sequence: Arc<PulseSequence>,
        timeout: Option<Duration>,
    ) -> SpectrometerResult<MeasurementResult> {
        self.submit(config, sequence).await?;
        self.collect(timeout).await
    }

    /// Cancel the active run. A no-op when nothing is active.
    ///
    /// # Errors
    ///
    /// A device error while aborting; the runner then moves to `Error`.
    pub async fn abort(&self) -> SpectrometerResult<()> {
        let Some(id) = self.run_id() else {
            debug!("Abort requested before any submission");
            return Ok(());
        };
        if !self.transition(id, MeasurementState::Aborted, MeasurementState::is_active) {
            debug!(run = %id, state = %self.state(), "Abort requested with no active run");
            return Ok(());
        }

        if let Err(err) = self.spectrometer.abort().await {
            warn!(run = %id, error = %err, "Instrument failed to abort");
            self.transition(id, MeasurementState::Error(err.clone()), |s| {
                *s == MeasurementState::Aborted
            });
            return Err(err);
        }
        Ok(())
    }

    /// Return a terminal runner to `Idle`.
    ///
    /// # Errors
    ///
    /// `State` while a run is active.
    pub fn reset(&self) -> SpectrometerResult<()> {
        let state = self.state();
        if state.is_active() {
            return Err(SpectrometerError::State(format!(
                "cannot reset while {state}"
            )));
        }
        if state.is_terminal() {
            self.state.send_replace(MeasurementState::Idle);
            debug!(from = %state, "Runner reset");
        }
        Ok(())
    }

    fn check_input(
        &self,
        config: &SpectrometerConfig,
        sequence: &PulseSequence,
    ) -> SpectrometerResult<()> {
        let capabilities = self.spectrometer.capabilities();
        capabilities.check_config(config)?;
        sequence.validate().into_result()?;
        capabilities.check_sequence(sequence)
    }

    fn is_owner(&self, id: RunId) -> bool {
        self.current.lock().as_ref().is_some_and(|run| run.id == id)
    }

    fn is_configuring(&self, id: RunId) -> bool {
        let configuring = *self.state.borrow() == MeasurementState::Configuring;
        configuring && self.is_owner(id)
    }

    fn collectable(&self) -> SpectrometerResult<RunId> {
        let state = self.state();
        let id = self.run_id();
        match (state, id) {
            (MeasurementState::Running | MeasurementState::Collecting, Some(id)) => Ok(id),
            (MeasurementState::Aborted, _) => Err(SpectrometerError::Aborted),
            (MeasurementState::Error(err), _) => Err(err),
            (MeasurementState::Done, _) => Err(SpectrometerError::State(
                "the result of this run was already collected".into(),
            )),
            (state, _) => Err(SpectrometerError::State(format!(
                "no measurement to collect while {state}"
            ))),
        }
    }

    /// Map a device failure during `submit()` to the next state.
    fn fail_submit(&self, id: RunId, err: SpectrometerError) -> SpectrometerError {
        let configuring = |s: &MeasurementState| *s == MeasurementState::Configuring;
        if err.is_input_error() {
            warn!(run = %id, error = %err, "Device rejected the input");
            self.transition(id, MeasurementState::Idle, configuring);
        } else {
            warn!(run = %id, error = %err, "Device failed while starting");
            self.transition(id, MeasurementState::Error(err.clone()), configuring);
        }
        err
    }

    /// Follow the instrument status while running.
    fn sync(&self, id: RunId, status: &InstrumentStatus) {
        let running = |s: &MeasurementState| {
            matches!(s, MeasurementState::Running | MeasurementState::Collecting)
        };
        match status {
            InstrumentStatus::Collecting | InstrumentStatus::Done => {
                self.transition(id, MeasurementState::Collecting, |s| {
                    *s == MeasurementState::Running
                });
            }
            InstrumentStatus::Aborted => {
                self.transition(id, MeasurementState::Aborted, running);
            }
            InstrumentStatus::Failed(reason) => {
                let err = SpectrometerError::Hardware(reason.clone());
                self.transition(id, MeasurementState::Error(err), running);
            }
            InstrumentStatus::Idle | InstrumentStatus::Running => {}
        }
    }

    /// Move to `to` if `id` is still the current run and the state
    /// satisfies `from`.
    fn transition(
        &self,
        id: RunId,
        to: MeasurementState,
        from: impl FnOnce(&MeasurementState) -> bool,
    ) -> bool {
        let target = to.to_string();
        let mut previous = None;
        self.state.send_if_modified(|state| {
            if self.is_owner(id) && from(state) && *state != to {
                previous = Some(std::mem::replace(state, to));
                true
            } else {
                false
            }
        });

        match previous {
            Some(previous) => {
                info!(run = %id, from = %previous, to = %target, "Measurement state changed");
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::keys;
    use crate::pulse::PulseEvent;
    use crate::simulator::{SimulatedFault, SimulatedSpectrometer, SimulatorConfig};
    use std::sync::atomic::AtomicBool;
    use tokio::sync::Semaphore;
    use tracing_test::traced_test;

    fn runner_with(options: SimulatorConfig) -> MeasurementRunner {
        MeasurementRunner::new(
            Box::new(SimulatedSpectrometer::new(options)),
            RunnerOptions::default(),
        )
    }

    fn runner() -> MeasurementRunner {
        runner_with(SimulatorConfig {
            phase_delay: Duration::from_millis(5),
            ..SimulatorConfig::default()
        })
    }

    fn slow_runner() -> MeasurementRunner {
        runner_with(SimulatorConfig {
            phase_delay: Duration::from_secs(30),
            ..SimulatorConfig::default()
        })
    }

    fn single_pulse() -> Arc<PulseSequence> {
        Arc::new(PulseSequence::from_events(
            "single",
            vec![PulseEvent::transmit("p", "A", 0.0, 10.0)],
        ))
    }

    fn scenario_config() -> SpectrometerConfig {
        SpectrometerConfig::new()
            .with(keys::FREQUENCY, 10e6)
            .with(keys::AVERAGES, 1_i64)
    }

    #[tokio::test]
    async fn test_scenario_run_reaches_done() {
        let runner = runner();
        let id = runner.submit(&scenario_config(), single_pulse()).await.unwrap();
        assert_eq!(id, RunId(1));
        assert_eq!(runner.state(), MeasurementState::Running);

        let result = runner.collect(Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(runner.state(), MeasurementState::Done);
        assert!(!result.is_empty());

        let effective = runner.capabilities().resolve(&scenario_config());
        assert_eq!(Some(result.sample_rate()), effective.sample_rate());
        assert_eq!(result.target_frequency(), 10e6);
        assert_eq!(result.averages(), 1);
    }

    #[tokio::test]
    async fn test_scenario_out_of_range_frequency() {
        let runner = runner();
        let config = SpectrometerConfig::new().with(keys::FREQUENCY, 50e6);
        let err = runner.submit(&config, single_pulse()).await.unwrap_err();
        assert!(matches!(err, SpectrometerError::Configuration(_)));
        assert_eq!(runner.state(), MeasurementState::Idle);
        assert_eq!(runner.spectrometer().status(), InstrumentStatus::Idle);
        assert_eq!(runner.run_id(), None);
    }

    #[tokio::test]
    async fn test_unknown_key_leaves_idle() {
        let runner = runner();
        for key in ["pulse_power", "Frequency", ""] {
            let config = scenario_config().with(key, 1.0);
            let err = runner.submit(&config, single_pulse()).await.unwrap_err();
            assert!(matches!(err, SpectrometerError::Configuration(_)), "{key}");
            assert_eq!(runner.state(), MeasurementState::Idle);
        }
    }

    #[tokio::test]
    async fn test_conflicting_sequence_rejected() {
        let runner = runner();
        let seq = PulseSequence::from_events(
            "overlap",
            vec![
                PulseEvent::transmit("a", "A", 0.0, 10.0),
                PulseEvent::transmit("b", "A", 5.0, 10.0),
            ],
        );
        let err = runner
            .submit(&scenario_config(), Arc::new(seq))
            .await
            .unwrap_err();
        assert!(matches!(err, SpectrometerError::Sequence(_)));
        assert_eq!(runner.state(), MeasurementState::Idle);
    }

    #[tokio::test]
    async fn test_undeclared_channel_rejected() {
        let caps = Capabilities::simulator().with_channels(["TX", "RX"]);
        let runner = MeasurementRunner::new(
            Box::new(SimulatedSpectrometer::with_capabilities(caps, SimulatorConfig::default())),
            RunnerOptions::default(),
        );
        let err = runner
            .submit(&scenario_config(), single_pulse())
            .await
            .unwrap_err();
        assert!(matches!(err, SpectrometerError::Sequence(_)));
        assert_eq!(runner.state(), MeasurementState::Idle);
    }

    #[tokio::test]
    async fn test_never_idle_between_start_and_terminal() {
        let runner = runner();
        let mut rx = runner.subscribe();
        let seen = tokio::spawn(async move {
            let mut states = vec![rx.borrow_and_update().clone()];
            while rx.changed().await.is_ok() {
                let state = rx.borrow_and_update().clone();
                let done = state.is_terminal();
                states.push(state);
                if done {
                    break;
                }
            }
            states
        });

        runner.submit(&scenario_config(), single_pulse()).await.unwrap();
        runner.collect(None).await.unwrap();
        let states = seen.await.unwrap();

        let started = states
            .iter()
            .position(|s| *s == MeasurementState::Running)
            .unwrap();
        assert!(states[started..]
            .iter()
            .all(|s| *s != MeasurementState::Idle));
        assert_eq!(states.last(), Some(&MeasurementState::Done));
    }

    #[tokio::test]
    async fn test_poll_follows_instrument() {
        let runner = runner();
        let mut status = runner.spectrometer().subscribe();
        runner.submit(&scenario_config(), single_pulse()).await.unwrap();
        status
            .wait_for(|s| *s == InstrumentStatus::Collecting)
            .await
            .unwrap();
        assert_eq!(runner.poll(), MeasurementState::Collecting);
        runner.collect(None).await.unwrap();
        assert_eq!(runner.poll(), MeasurementState::Done);
    }

    #[tokio::test]
    async fn test_abort_twice_is_noop() {
        let runner = slow_runner();
        runner.abort().await.unwrap();
        assert_eq!(runner.state(), MeasurementState::Idle);

        runner.submit(&scenario_config(), single_pulse()).await.unwrap();
        runner.abort().await.unwrap();
        assert_eq!(runner.state(), MeasurementState::Aborted);
        runner.abort().await.unwrap();
        assert_eq!(runner.state(), MeasurementState::Aborted);
        assert_eq!(runner.spectrometer().status(), InstrumentStatus::Aborted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_interrupts_collect() {
        let runner = Arc::new(slow_runner());
        runner.submit(&scenario_config(), single_pulse()).await.unwrap();

        let waiter = Arc::clone(&runner);
        let pending =
            tokio::spawn(async move { waiter.collect(Some(Duration::from_secs(600))).await });
        tokio::task::yield_now().await;

        let started = Instant::now();
        runner.abort().await.unwrap();
        let outcome = pending.await.unwrap();
        assert_eq!(outcome.unwrap_err(), SpectrometerError::Aborted);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(runner.state(), MeasurementState::Aborted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_collect_timeout_keeps_state() {
        let runner = slow_runner();
        runner.submit(&scenario_config(), single_pulse()).await.unwrap();

        let err = runner
            .collect(Some(Duration::from_millis(250)))
            .await
            .unwrap_err();
        assert_eq!(err, SpectrometerError::Timeout(250));
        assert_eq!(runner.state(), MeasurementState::Running);

        let result = runner.collect(Some(Duration::from_secs(120))).await.unwrap();
        assert!(!result.is_empty());
        assert_eq!(runner.state(), MeasurementState::Done);
    }

    #[tokio::test]
    async fn test_collect_after_done_fails() {
        let runner = runner();
        runner
            .measure(&scenario_config(), single_pulse(), None)
            .await
            .unwrap();
        let err = runner.collect(None).await.unwrap_err();
        assert!(matches!(err, SpectrometerError::State(_)));

        let err = runner
            .spectrometer()
            .read_result(Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, SpectrometerError::State(_)));
    }

    #[tokio::test]
    async fn test_submit_while_active_fails() {
        let runner = slow_runner();
        runner.submit(&scenario_config(), single_pulse()).await.unwrap();
        let err = runner
            .submit(&scenario_config(), single_pulse())
            .await
            .unwrap_err();
        assert!(matches!(err, SpectrometerError::State(_)));
        assert_eq!(runner.state(), MeasurementState::Running);
        assert!(runner.reset().is_err());
        runner.abort().await.unwrap();
    }

    #[tokio::test]
    async fn test_submit_after_terminal_starts_new_run() {
        let runner = runner();
        runner
            .measure(&scenario_config(), single_pulse(), None)
            .await
            .unwrap();
        let id = runner.submit(&scenario_config(), single_pulse()).await.unwrap();
        assert_eq!(id, RunId(2));
        runner.collect(None).await.unwrap();
        assert_eq!(runner.current_sequence().unwrap().name(), "single");
    }

    #[tokio::test]
    async fn test_rejected_program_moves_to_error() {
        let runner = runner_with(SimulatorConfig {
            fault: Some(SimulatedFault::RejectProgram),
            ..SimulatorConfig::default()
        });
        let err = runner
            .submit(&scenario_config(), single_pulse())
            .await
            .unwrap_err();
        assert!(matches!(err, SpectrometerError::Hardware(_)));
        assert_eq!(runner.state().error(), Some(&err));

        runner.reset().unwrap();
        assert_eq!(runner.state(), MeasurementState::Idle);
    }

    #[tokio::test]
    async fn test_acquisition_fault_moves_to_error() {
        let runner = runner_with(SimulatorConfig {
            phase_delay: Duration::from_millis(5),
            fault: Some(SimulatedFault::DuringAcquisition),
            ..SimulatorConfig::default()
        });
        runner.submit(&scenario_config(), single_pulse()).await.unwrap();
        let err = runner.collect(None).await.unwrap_err();
        assert!(matches!(err, SpectrometerError::Hardware(_)));
        assert!(matches!(runner.state(), MeasurementState::Error(_)));

        let again = runner.collect(None).await.unwrap_err();
        assert_eq!(again, err);
    }

    #[tokio::test]
    async fn test_program_too_long_moves_to_error() {
        let runner = runner_with(SimulatorConfig {
            max_program_us: 5.0,
            ..SimulatorConfig::default()
        });
        let err = runner
            .submit(&scenario_config(), single_pulse())
            .await
            .unwrap_err();
        assert!(matches!(err, SpectrometerError::Hardware(_)));
        assert!(matches!(runner.state(), MeasurementState::Error(_)));
    }

    /// Instrument whose synthesizer cannot reach the upper half of the
    /// declared frequency range.
    struct NarrowBand(SimulatedSpectrometer);

    #[async_trait::async_trait]
    impl Spectrometer for NarrowBand {
        fn name(&self) -> &str {
            self.0.name()
        }

        fn capabilities(&self) -> &Capabilities {
            self.0.capabilities()
        }

        fn status(&self) -> InstrumentStatus {
            self.0.status()
        }

        fn subscribe(&self) -> watch::Receiver<InstrumentStatus> {
            self.0.subscribe()
        }

        async fn configure(&self, config: &SpectrometerConfig) -> SpectrometerResult<()> {
            if config.frequency().is_some_and(|f| f > 15e6) {
                return Err(SpectrometerError::Configuration(
                    "synthesizer cannot lock above 15 MHz".into(),
                ));
            }
            self.0.configure(config).await
        }

        async fn start(&self, sequence: Arc<PulseSequence>) -> SpectrometerResult<()> {
            self.0.start(sequence).await
        }

        async fn abort(&self) -> SpectrometerResult<()> {
            self.0.abort().await
        }

        async fn read_result(&self, timeout: Duration) -> SpectrometerResult<MeasurementResult> {
            self.0.read_result(timeout).await
        }
    }

    #[tokio::test]
    async fn test_device_input_error_returns_to_idle() {
        let device = NarrowBand(SimulatedSpectrometer::new(SimulatorConfig {
            phase_delay: Duration::from_millis(5),
            ..SimulatorConfig::default()
        }));
        let runner = MeasurementRunner::new(Box::new(device), RunnerOptions::default());

        let config = SpectrometerConfig::new().with(keys::FREQUENCY, 18e6);
        let err = runner.submit(&config, single_pulse()).await.unwrap_err();
        assert!(matches!(err, SpectrometerError::Configuration(_)));
        assert_eq!(runner.state(), MeasurementState::Idle);
        assert_eq!(runner.run_id(), Some(RunId(1)));

        runner
            .measure(&scenario_config(), single_pulse(), None)
            .await
            .unwrap();
        assert_eq!(runner.state(), MeasurementState::Done);
    }

    struct Gate {
        configure: AtomicBool,
        start: AtomicBool,
        entered: Semaphore,
        release: Semaphore,
    }

    impl Gate {
        fn new() -> Self {
            Self {
                configure: AtomicBool::new(false),
                start: AtomicBool::new(false),
                entered: Semaphore::new(0),
                release: Semaphore::new(0),
            }
        }

        async fn pass(&self, armed: &AtomicBool) {
            if armed.swap(false, Ordering::SeqCst) {
                self.entered.add_permits(1);
                self.release.acquire().await.unwrap().forget();
            }
        }
    }

    /// Instrument that can be held inside `configure()` or `start()` until
    /// the test releases it.
    struct Gated {
        inner: SimulatedSpectrometer,
        gate: Arc<Gate>,
    }

    #[async_trait::async_trait]
    impl Spectrometer for Gated {
        fn name(&self) -> &str {
            self.inner.name()
        }

        fn capabilities(&self) -> &Capabilities {
            self.inner.capabilities()
        }

        fn status(&self) -> InstrumentStatus {
            self.inner.status()
        }

        fn subscribe(&self) -> watch::Receiver<InstrumentStatus> {
            self.inner.subscribe()
        }

        async fn configure(&self, config: &SpectrometerConfig) -> SpectrometerResult<()> {
            self.gate.pass(&self.gate.configure).await;
            self.inner.configure(config).await
        }

        async fn start(&self, sequence: Arc<PulseSequence>) -> SpectrometerResult<()> {
            self.gate.pass(&self.gate.start).await;
            self.inner.start(sequence).await
        }

        async fn abort(&self) -> SpectrometerResult<()> {
            self.inner.abort().await
        }

        async fn read_result(&self, timeout: Duration) -> SpectrometerResult<MeasurementResult> {
            self.inner.read_result(timeout).await
        }
    }

    fn gated_runner() -> (Arc<MeasurementRunner>, Arc<Gate>) {
        let gate = Arc::new(Gate::new());
        let device = Gated {
            inner: SimulatedSpectrometer::new(SimulatorConfig {
                phase_delay: Duration::from_secs(30),
                ..SimulatorConfig::default()
            }),
            gate: Arc::clone(&gate),
        };
        let runner = MeasurementRunner::new(Box::new(device), RunnerOptions::default());
        (Arc::new(runner), gate)
    }

    fn named_pulse(name: &str) -> Arc<PulseSequence> {
        Arc::new(PulseSequence::from_events(
            name,
            vec![PulseEvent::transmit("p", "A", 0.0, 10.0)],
        ))
    }

    #[tokio::test]
    async fn test_abort_during_configure_does_not_start() {
        let (runner, gate) = gated_runner();
        gate.configure.store(true, Ordering::SeqCst);

        let submitting = {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move { runner.submit(&scenario_config(), single_pulse()).await })
        };
        gate.entered.acquire().await.unwrap().forget();
        runner.abort().await.unwrap();
        gate.release.add_permits(1);

        let err = submitting.await.unwrap().unwrap_err();
        assert!(matches!(err, SpectrometerError::Aborted));
        assert_eq!(runner.state(), MeasurementState::Aborted);
        assert_eq!(runner.spectrometer().status(), InstrumentStatus::Idle);
    }

    #[tokio::test]
    async fn test_abort_during_start_stops_instrument() {
        let (runner, gate) = gated_runner();
        gate.start.store(true, Ordering::SeqCst);

        let submitting = {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move { runner.submit(&scenario_config(), single_pulse()).await })
        };
        gate.entered.acquire().await.unwrap().forget();
        runner.abort().await.unwrap();
        gate.release.add_permits(1);

        let err = submitting.await.unwrap().unwrap_err();
        assert!(matches!(err, SpectrometerError::Aborted));
        assert_eq!(runner.state(), MeasurementState::Aborted);
        assert_eq!(runner.spectrometer().status(), InstrumentStatus::Aborted);
    }

    #[tokio::test]
    async fn test_resubmit_during_aborted_configure_keeps_new_run() {
        let (runner, gate) = gated_runner();
        gate.configure.store(true, Ordering::SeqCst);

        let first = {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move { runner.submit(&scenario_config(), named_pulse("first")).await })
        };
        gate.entered.acquire().await.unwrap().forget();
        runner.abort().await.unwrap();

        let second = {
            let runner = Arc::clone(&runner);
            tokio::spawn(
                async move { runner.submit(&scenario_config(), named_pulse("second")).await },
            )
        };
        tokio::task::yield_now().await;
        gate.release.add_permits(1);

        let err = first.await.unwrap().unwrap_err();
        assert!(matches!(err, SpectrometerError::Aborted));
        assert_eq!(second.await.unwrap().unwrap(), RunId(2));

        assert_eq!(runner.state(), MeasurementState::Running);
        assert_eq!(runner.run_id(), Some(RunId(2)));
        assert_eq!(runner.current_sequence().unwrap().name(), "second");
        assert_eq!(runner.spectrometer().status(), InstrumentStatus::Running);

        runner.abort().await.unwrap();
        assert_eq!(runner.state(), MeasurementState::Aborted);
    }

    #[tokio::test]
    async fn test_collect_with_unbounded_timeout() {
        let runner = runner();
        runner.submit(&scenario_config(), single_pulse()).await.unwrap();
        let result = runner.collect(Some(Duration::MAX)).await.unwrap();
        assert!(!result.is_empty());
        assert_eq!(runner.state(), MeasurementState::Done);
    }

    #[tokio::test]
    async fn test_collect_without_submit() {
        let runner = runner();
        let err = runner.collect(None).await.unwrap_err();
        assert!(matches!(err, SpectrometerError::State(_)));
        assert_eq!(runner.state(), MeasurementState::Idle);
    }

    #[tokio::test]
    async fn test_into_spectrometer_releases_instrument() {
        let runner = runner();
        runner
            .measure(&scenario_config(), single_pulse(), None)
            .await
            .unwrap();
        let instrument = runner.into_spectrometer();
        assert_eq!(instrument.status(), InstrumentStatus::Done);
        assert_eq!(instrument.name(), "simulator");
    }

    #[tokio::test]
    #[traced_test]
    async fn test_transitions_are_logged() {
        let runner = runner();
        runner
            .measure(&scenario_config(), single_pulse(), None)
            .await
            .unwrap();
        assert!(logs_contain("Measurement submitted"));
        assert!(logs_contain("Measurement state changed"));
        assert!(logs_contain("run=run-1"));
        assert!(logs_contain("Measurement complete"));
    }
}
