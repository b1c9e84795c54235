//! Configuration: instrument parameters, settings files and runner options.
//!
//! Three layers of configuration live here:
//!
//! 1. [`SpectrometerConfig`]: the named parameters a host submits with a
//!    run (frequency, averages, gains ...). Checked against the active
//!    instrument's [`Capabilities`](crate::capability::Capabilities).
//! 2. [`SettingsFile`]: a snapshot of a configuration tied to one
//!    instrument name, persisted as JSON.
//! 3. [`RunnerOptions`]: how the measurement runner itself behaves, with
//!    defaults overridable from the environment (`NQRDUCK_*`).

use std::env;
use std::path::Path;
use std::time::Duration;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::capability::Capabilities;
use crate::error::{SpectrometerError, SpectrometerResult};

/// Well-known parameter keys.
pub mod keys {
    /// Target (Larmor / quadrupole) frequency in Hz.
    pub const FREQUENCY: &str = "frequency";
    /// Number of averaged scans.
    pub const AVERAGES: &str = "averages";
    /// Receiver sample rate in Hz.
    pub const SAMPLE_RATE: &str = "sample_rate";
    /// Intermediate frequency in Hz.
    pub const IF_FREQUENCY: &str = "if_frequency";
    /// Transmit gain in dB.
    pub const TX_GAIN: &str = "tx_gain";
    /// Receive gain in dB.
    pub const RX_GAIN: &str = "rx_gain";
}

/// A single parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Boolean flag.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Real value.
    Float(f64),
    /// Free text, selection option or address.
    Text(String),
}

impl ParamValue {
    /// Numeric view of the value (integers are widened).
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v),
            ParamValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Integer view of the value. Floats are accepted when integral.
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            ParamValue::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            _ => None,
        }
    }

    /// Boolean view of the value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Text view of the value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Short name of the variant, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            ParamValue::Bool(_) => "bool",
            ParamValue::Int(_) => "int",
            ParamValue::Float(_) => "float",
            ParamValue::Text(_) => "text",
        }
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Text(v) => write!(f, "{v}"),
        }
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<u32> for ParamValue {
    fn from(v: u32) -> Self {
        ParamValue::Int(i64::from(v))
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Text(v)
    }
}

/// Named instrument parameters for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpectrometerConfig {
    values: FxHashMap<String, ParamValue>,
}

impl SpectrometerConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.set(key, value);
        self
    }

    /// Insert or replace a parameter.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) {
        self.values.insert(key.into(), value.into());
    }

    /// Get a parameter.
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.values.get(key)
    }

    /// Check if a parameter is present.
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Iterate over (key, value) pairs in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.values.iter()
    }

    /// Parameter keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.values.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the configuration is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Overlay `other` on top of `self`; keys in `other` win.
    pub fn merged(mut self, other: &SpectrometerConfig) -> Self {
        for (k, v) in &other.values {
            self.values.insert(k.clone(), v.clone());
        }
        self
    }

    /// Numeric parameter, if present.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(ParamValue::as_f64)
    }

    /// Target frequency in Hz.
    pub fn frequency(&self) -> Option<f64> {
        self.get_f64(keys::FREQUENCY)
    }

    /// Receiver sample rate in Hz.
    pub fn sample_rate(&self) -> Option<f64> {
        self.get_f64(keys::SAMPLE_RATE)
    }

    /// Intermediate frequency in Hz.
    pub fn if_frequency(&self) -> Option<f64> {
        self.get_f64(keys::IF_FREQUENCY)
    }

    /// Number of averages.
    pub fn averages(&self) -> Option<u32> {
        self.get(keys::AVERAGES)
            .and_then(ParamValue::as_i64)
            .and_then(|v| u32::try_from(v).ok())
    }
}

impl<K: Into<String>, V: Into<ParamValue>> FromIterator<(K, V)> for SpectrometerConfig {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut config = Self::new();
        for (k, v) in iter {
            config.set(k, v);
        }
        config
    }
}

/// A configuration saved for one specific instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsFile {
    /// Name of the instrument the settings were written for.
    pub spectrometer: String,
    /// The saved parameter values.
    pub values: SpectrometerConfig,
}

impl SettingsFile {
    /// Snapshot `values` for the instrument named `spectrometer`.
    pub fn new(spectrometer: impl Into<String>, values: SpectrometerConfig) -> Self {
        Self {
            spectrometer: spectrometer.into(),
            values,
        }
    }

    /// Write the settings to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> SpectrometerResult<()> {
        let path = path.as_ref();
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        debug!(path = %path.display(), spectrometer = %self.spectrometer, "Saved settings");
        Ok(())
    }

    /// Read settings from a JSON file without checking them.
    pub fn load(path: impl AsRef<Path>) -> SpectrometerResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Apply the file to an instrument.
    ///
    /// Returns the effective configuration (instrument defaults overlaid
    /// with the saved values) and the keys the instrument declares but the
    /// file does not contain.
    ///
    /// # Errors
    ///
    /// `Configuration` if the file was written for a different instrument or
    /// holds a value the instrument does not accept.
    pub fn apply_to(
        &self,
        capabilities: &Capabilities,
    ) -> SpectrometerResult<(SpectrometerConfig, Vec<String>)> {
        if self.spectrometer != capabilities.name {
            return Err(SpectrometerError::Configuration(format!(
                "settings were saved for '{}', not compatible with '{}'",
                self.spectrometer, capabilities.name
            )));
        }
        capabilities.check_config(&self.values)?;

        let missing: Vec<String> = capabilities
            .parameter_names()
            .into_iter()
            .filter(|name| !self.values.contains(name))
            .map(ToString::to_string)
            .collect();
        for name in &missing {
            warn!(setting = %name, spectrometer = %self.spectrometer, "Setting not found in settings file, using default");
        }

        Ok((capabilities.resolve(&self.values), missing))
    }
}

/// Behaviour of the measurement runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerOptions {
    /// Default deadline for `collect()` when the caller gives none.
    #[serde(default = "default_read_timeout", with = "duration_ms")]
    pub read_timeout: Duration,
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            read_timeout: default_read_timeout(),
        }
    }
}

impl RunnerOptions {
    /// Environment variable overriding [`RunnerOptions::read_timeout`].
    pub const READ_TIMEOUT_ENV: &'static str = "NQRDUCK_READ_TIMEOUT_MS";

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        options.apply_env_overrides();
        options
    }

    /// Apply environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var(Self::READ_TIMEOUT_ENV) {
            match val.parse::<u64>() {
                Ok(ms) => self.read_timeout = Duration::from_millis(ms),
                Err(_) => warn!(var = Self::READ_TIMEOUT_ENV, value = %val, "Ignoring unparsable override"),
            }
        }
    }
}

pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
