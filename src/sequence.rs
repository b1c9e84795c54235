//! Pulse sequences.
//!
//! A [`PulseSequence`] is an ordered list of [`PulseEvent`]s (list order is
//! execution order) with a name. Two build paths exist:
//!
//! - [`PulseSequence::add_event`] checks every event as it is added and
//!   refuses anything that would overlap on its channel.
//! - [`PulseSequence::from_events`] takes events as-is (this is what loading
//!   from JSON does). Conflicts are then reported by
//!   [`PulseSequence::validate`].
//!
//! Once a sequence is handed to the measurement runner it lives behind an
//! `Arc` and can no longer be edited; [`PulseSequence::rebuild`] gives back
//! an editable copy.

use std::path::Path;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{SpectrometerError, SpectrometerResult};
use crate::pulse::{Channel, PulseEvent};

/// An ordered program of timed events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PulseSequence {
    name: String,
    events: Vec<PulseEvent>,
}

impl PulseSequence {
    /// Create an empty sequence.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            events: Vec::new(),
        }
    }

    /// Build a sequence from events without checking them.
    pub fn from_events(name: impl Into<String>, events: Vec<PulseEvent>) -> Self {
        Self {
            name: name.into(),
            events,
        }
    }

    /// Name of the sequence.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Events in execution order.
    pub fn events(&self) -> &[PulseEvent] {
        &self.events
    }

    /// Number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Check if the sequence has no events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Labels of all events, in execution order.
    pub fn event_names(&self) -> Vec<&str> {
        self.events.iter().map(|e| e.label.as_str()).collect()
    }

    /// Distinct channels used by the sequence, in order of first use.
    pub fn channels(&self) -> Vec<&Channel> {
        let mut seen: Vec<&Channel> = Vec::new();
        for event in &self.events {
            if !seen.contains(&&event.channel) {
                seen.push(&event.channel);
            }
        }
        seen
    }

    /// Events played on `channel`, in execution order.
    pub fn events_on<'a>(&'a self, channel: &'a Channel) -> impl Iterator<Item = &'a PulseEvent> {
        self.events.iter().filter(move |e| &e.channel == channel)
    }

    /// Total duration in microseconds: the latest end time of any event.
    pub fn total_duration(&self) -> f64 {
        self.events
            .iter()
            .map(PulseEvent::end_time)
            .fold(0.0, f64::max)
    }

    /// Append an event.
    ///
    /// # Errors
    ///
    /// `Validation` if the event has a non-positive duration, a negative
    /// start time, or overlaps an existing event on the same channel.
    pub fn add_event(&mut self, event: PulseEvent) -> SpectrometerResult<&mut Self> {
        event.check_timing()?;

        if let Some(existing) = self.events.iter().find(|e| e.conflicts_with(&event)) {
            return Err(SpectrometerError::Validation(format!(
                "event '{}' [{}-{} us] overlaps '{}' [{}-{} us] on channel {}",
                event.label,
                event.start_time,
                event.end_time(),
                existing.label,
                existing.start_time,
                existing.end_time(),
                event.channel,
            )));
        }

        self.events.push(event);
        Ok(self)
    }

    /// Editable copy of this sequence.
    pub fn rebuild(&self) -> PulseSequence {
        self.clone()
    }

    /// Full validation of the sequence.
    ///
    /// Recomputes the total duration and reports every pair of events that
    /// overlap on a shared channel (each pair once, earlier index first) and
    /// every event with invalid timing.
    pub fn validate(&self) -> ValidationReport {
        let mut invalid_events = Vec::new();
        let mut by_channel: FxHashMap<&Channel, Vec<usize>> = FxHashMap::default();

        for (index, event) in self.events.iter().enumerate() {
            if let Err(err) = event.check_timing() {
                invalid_events.push(err.to_string());
                continue;
            }
            by_channel.entry(&event.channel).or_default().push(index);
        }

        let mut conflicts = Vec::new();
        for indices in by_channel.values() {
            for (pos, &i) in indices.iter().enumerate() {
                for &j in &indices[pos + 1..] {
                    let (a, b) = (&self.events[i], &self.events[j]);
                    if a.overlaps(b) {
                        conflicts.push(Conflict {
                            first: i,
                            second: j,
                            first_label: a.label.clone(),
                            second_label: b.label.clone(),
                            channel: a.channel.clone(),
                            overlap_start: a.start_time.max(b.start_time),
                            overlap_end: a.end_time().min(b.end_time()),
                        });
                    }
                }
            }
        }
        conflicts.sort_by_key(|c| (c.first, c.second));

        ValidationReport {
            total_duration: self.total_duration(),
            conflicts,
            invalid_events,
        }
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> SpectrometerResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load from JSON. Events are not checked; call [`PulseSequence::validate`].
    pub fn from_json(json: &str) -> SpectrometerResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Write the sequence to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> SpectrometerResult<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Read a sequence from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> SpectrometerResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }
}

/// Two events overlapping on one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Conflict {
    /// Index of the earlier event in the sequence.
    pub first: usize,
    /// Index of the later event in the sequence.
    pub second: usize,
    /// Label of the earlier event.
    pub first_label: String,
    /// Label of the later event.
    pub second_label: String,
    /// Channel both events are on.
    pub channel: Channel,
    /// Start of the overlapping interval (microseconds).
    pub overlap_start: f64,
    /// End of the overlapping interval (microseconds).
    pub overlap_end: f64,
}

impl std::fmt::Display for Conflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "events #{} '{}' and #{} '{}' overlap on channel {} during [{}-{} us]",
            self.first,
            self.first_label,
            self.second,
            self.second_label,
            self.channel,
            self.overlap_start,
            self.overlap_end
        )
    }
}

/// Outcome of [`PulseSequence::validate`].
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    /// Recomputed total duration in microseconds.
    pub total_duration: f64,
    /// Overlapping event pairs.
    pub conflicts: Vec<Conflict>,
    /// Events whose own timing is invalid (non-positive duration etc).
    pub invalid_events: Vec<String>,
}

impl ValidationReport {
    /// Check if the sequence can be executed.
    pub fn is_valid(&self) -> bool {
        self.conflicts.is_empty() && self.invalid_events.is_empty()
    }

    /// Convert into a `Sequence` error if the report has any findings.
    pub fn into_result(self) -> SpectrometerResult<f64> {
        if self.is_valid() {
            return Ok(self.total_duration);
        }
        let reasons: Vec<String> = self
            .invalid_events
            .into_iter()
            .chain(self.conflicts.iter().map(ToString::to_string))
            .collect();
        Err(SpectrometerError::Sequence(reasons.join("; ")))
    }
}
