//! End-to-end run on the simulated spectrometer.
//!
//! Builds a free induction decay sequence, submits it through the
//! measurement runner and prints the acquired signal and its spectrum.
//! Set `RUST_LOG=debug` to see every state transition.

use std::sync::Arc;
use std::time::Duration;

use nqrduck_spectrometer::{
    MeasurementRunner, PulseEvent, PulseSequence, RunnerOptions, SimulatedSpectrometer,
    SimulatorConfig, Spectrometer, SpectrometerConfig, config::keys,
};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();

    let simulator = SimulatedSpectrometer::new(SimulatorConfig {
        phase_delay: Duration::from_millis(50),
        ..SimulatorConfig::default()
    });

    println!("Spectrometer: {}", simulator.name());
    for category in simulator.capabilities().categories() {
        println!("  [{category}]");
        for spec in simulator
            .capabilities()
            .parameters
            .iter()
            .filter(|p| p.category == category)
        {
            println!("    {:<14} default {}", spec.name, spec.default);
        }
    }
    println!();

    let mut sequence = PulseSequence::new("fid");
    sequence
        .add_event(PulseEvent::transmit("pi/2", "TX", 0.0, 3.0))?
        .add_event(PulseEvent::readout("acq", "RX", 10.0, 200.0))?;

    let report = sequence.validate();
    println!(
        "Sequence '{}': {} events, {} us, valid: {}",
        sequence.name(),
        sequence.len(),
        report.total_duration,
        report.is_valid()
    );

    let runner = MeasurementRunner::new(Box::new(simulator), RunnerOptions::from_env());
    let config = SpectrometerConfig::new()
        .with(keys::FREQUENCY, 10e6)
        .with(keys::AVERAGES, 16_i64)
        .with(keys::SAMPLE_RATE, 2e6);

    let run = runner.submit(&config, Arc::new(sequence)).await?;
    info!(run = %run, "Submitted");

    let result = runner.collect(None).await?;
    println!(
        "Acquired {} samples at {} MHz ({:?})",
        result.len(),
        result.sample_rate() / 1e6,
        result.status()
    );
    println!("Peak magnitude: {:.4}", result.max_magnitude());

    let spectrum = result.spectrum(result.target_frequency());
    if let Some((frequency, magnitude)) = spectrum.peak() {
        println!("Spectral peak: {:.3} MHz ({magnitude:.2})", frequency / 1e6);
    }
    println!("Final state: {}", runner.state());

    Ok(())
}
