//! Instrument capability introspection.
//!
//! [`Capabilities`] is what a spectrometer declares about itself: the
//! parameters it recognizes (with their types, ranges and defaults) and the
//! channels a pulse sequence may use. The measurement runner uses it to
//! reject bad input before any hardware is touched.
//!
//! Parameter kinds:
//! - [`ParameterKind::Float`] / [`ParameterKind::Int`]: inclusive ranges,
//!   either bound optional
//! - [`ParameterKind::Bool`]
//! - [`ParameterKind::Selection`]: one of a fixed list of options
//! - [`ParameterKind::Text`]: any string
//! - [`ParameterKind::IpAddress`]: an IPv4 or IPv6 address

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::config::{ParamValue, SpectrometerConfig, keys};
use crate::error::{SpectrometerError, SpectrometerResult};
use crate::pulse::Channel;
use crate::sequence::PulseSequence;

/// Capabilities of a spectrometer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capabilities {
    /// Name of the instrument.
    pub name: String,
    /// Whether this is a simulator (not real hardware).
    pub is_simulator: bool,
    /// Channels a sequence may use. Empty means any channel is accepted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<Channel>,
    /// Recognized parameters, in display order.
    pub parameters: Vec<ParameterSpec>,
}

impl Capabilities {
    /// Create capabilities with no parameters.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_simulator: false,
            channels: vec![],
            parameters: vec![],
        }
    }

    /// Capabilities of the built-in simulated instrument.
    ///
    /// Accepts any channel; frequency 1-20 MHz.
    pub fn simulator() -> Self {
        Self {
            name: "simulator".into(),
            is_simulator: true,
            channels: vec![],
            parameters: vec![
                ParameterSpec::float(keys::FREQUENCY, 10e6, Some(1e6), Some(20e6))
                    .describe("Target frequency in Hz")
                    .in_category("Acquisition"),
                ParameterSpec::int(keys::AVERAGES, 1, Some(1), Some(100_000))
                    .describe("Number of averaged scans")
                    .in_category("Acquisition"),
                ParameterSpec::float(keys::SAMPLE_RATE, 5e6, Some(1e5), Some(100e6))
                    .describe("Receiver sample rate in Hz")
                    .in_category("Receiver"),
                ParameterSpec::float(keys::IF_FREQUENCY, 0.0, Some(0.0), Some(10e6))
                    .describe("Intermediate frequency in Hz")
                    .in_category("Receiver"),
                ParameterSpec::float(keys::RX_GAIN, 30.0, Some(0.0), Some(70.0))
                    .describe("Receive gain in dB")
                    .in_category("Receiver"),
                ParameterSpec::float(keys::TX_GAIN, 40.0, Some(0.0), Some(70.0))
                    .describe("Transmit gain in dB")
                    .in_category("Transmitter"),
            ],
        }
    }

    /// Restrict the channels a sequence may use.
    pub fn with_channels(mut self, channels: impl IntoIterator<Item = impl Into<Channel>>) -> Self {
        self.channels = channels.into_iter().map(Into::into).collect();
        self
    }

    /// Declare a parameter, replacing one with the same name.
    pub fn with_parameter(mut self, spec: ParameterSpec) -> Self {
        self.parameters.retain(|p| p.name != spec.name);
        self.parameters.push(spec);
        self
    }

    /// Look up a parameter declaration.
    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Names of all recognized parameters, in declaration order.
    pub fn parameter_names(&self) -> Vec<&str> {
        self.parameters.iter().map(|p| p.name.as_str()).collect()
    }

    /// Distinct parameter categories, in declaration order.
    pub fn categories(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for p in &self.parameters {
            if !out.contains(&p.category.as_str()) {
                out.push(&p.category);
            }
        }
        out
    }

    /// Check a configuration against the declared parameters.
    ///
    /// # Errors
    ///
    /// `Configuration` for the first unrecognized key (in sorted key order)
    /// or value that is out of range / of the wrong type.
    pub fn check_config(&self, config: &SpectrometerConfig) -> SpectrometerResult<()> {
        for key in config.keys() {
            let spec = self.parameter(key).ok_or_else(|| {
                SpectrometerError::Configuration(format!(
                    "'{key}' is not a recognized setting of {}",
                    self.name
                ))
            })?;
            if let Some(value) = config.get(key) {
                spec.check(value)?;
            }
        }
        Ok(())
    }

    /// Configuration holding every parameter's default.
    pub fn defaults(&self) -> SpectrometerConfig {
        self.parameters
            .iter()
            .map(|p| (p.name.clone(), p.default.clone()))
            .collect()
    }

    /// Effective configuration: defaults overlaid with `config`.
    pub fn resolve(&self, config: &SpectrometerConfig) -> SpectrometerConfig {
        self.defaults().merged(config)
    }

    /// Check that a sequence only uses declared channels.
    ///
    /// # Errors
    ///
    /// `Sequence` naming the first undeclared channel.
    pub fn check_sequence(&self, sequence: &PulseSequence) -> SpectrometerResult<()> {
        if self.channels.is_empty() {
            return Ok(());
        }
        for channel in sequence.channels() {
            if !self.channels.contains(channel) {
                return Err(SpectrometerError::Sequence(format!(
                    "channel {channel} is not available on {}",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// Declaration of one recognized parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Parameter key.
    pub name: String,
    /// Type and valid range.
    pub kind: ParameterKind,
    /// Value used when a configuration omits the key.
    pub default: ParamValue,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Grouping used by host UIs.
    #[serde(default)]
    pub category: String,
}

impl ParameterSpec {
    fn new(name: impl Into<String>, kind: ParameterKind, default: ParamValue) -> Self {
        Self {
            name: name.into(),
            kind,
            default,
            description: String::new(),
            category: "General".into(),
        }
    }

    /// Real parameter with an optional inclusive range.
    pub fn float(name: impl Into<String>, default: f64, min: Option<f64>, max: Option<f64>) -> Self {
        Self::new(name, ParameterKind::Float { min, max }, ParamValue::Float(default))
    }

    /// Integer parameter with an optional inclusive range.
    pub fn int(name: impl Into<String>, default: i64, min: Option<i64>, max: Option<i64>) -> Self {
        Self::new(name, ParameterKind::Int { min, max }, ParamValue::Int(default))
    }

    /// Boolean parameter.
    pub fn boolean(name: impl Into<String>, default: bool) -> Self {
        Self::new(name, ParameterKind::Bool, ParamValue::Bool(default))
    }

    /// Selection among fixed options. `default` should be one of them.
    pub fn selection(
        name: impl Into<String>,
        options: impl IntoIterator<Item = impl Into<String>>,
        default: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            ParameterKind::Selection {
                options: options.into_iter().map(Into::into).collect(),
            },
            ParamValue::Text(default.into()),
        )
    }

    /// Free text parameter.
    pub fn text(name: impl Into<String>, default: impl Into<String>) -> Self {
        Self::new(name, ParameterKind::Text, ParamValue::Text(default.into()))
    }

    /// IP address parameter.
    pub fn ip_address(name: impl Into<String>, default: impl Into<String>) -> Self {
        Self::new(name, ParameterKind::IpAddress, ParamValue::Text(default.into()))
    }

    /// Set the description.
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the category.
    pub fn in_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Check a value against this declaration.
    pub fn check(&self, value: &ParamValue) -> SpectrometerResult<()> {
        let name = &self.name;
        let wrong_type = || {
            SpectrometerError::Configuration(format!(
                "'{name}' expects {}, got {} ({value})",
                self.kind.type_name(),
                value.type_name()
            ))
        };
        let out_of_range = |min: String, max: String| {
            SpectrometerError::Configuration(format!(
                "'{name}' = {value} is outside the valid range [{min}, {max}]"
            ))
        };
        let bound = |b: Option<String>| b.unwrap_or_else(|| "..".into());

        match &self.kind {
            ParameterKind::Float { min, max } => {
                let v = value.as_f64().ok_or_else(wrong_type)?;
                let below = min.is_some_and(|m| v < m);
                let above = max.is_some_and(|m| v > m);
                if !v.is_finite() || below || above {
                    return Err(out_of_range(
                        bound(min.map(|m| m.to_string())),
                        bound(max.map(|m| m.to_string())),
                    ));
                }
            }
            ParameterKind::Int { min, max } => {
                let v = value.as_i64().ok_or_else(wrong_type)?;
                if min.is_some_and(|m| v < m) || max.is_some_and(|m| v > m) {
                    return Err(out_of_range(
                        bound(min.map(|m| m.to_string())),
                        bound(max.map(|m| m.to_string())),
                    ));
                }
            }
            ParameterKind::Bool => {
                value.as_bool().ok_or_else(wrong_type)?;
            }
            ParameterKind::Selection { options } => {
                let v = value.as_str().ok_or_else(wrong_type)?;
                if !options.iter().any(|o| o == v) {
                    return Err(SpectrometerError::Configuration(format!(
                        "'{name}' = {v} is not one of {options:?}"
                    )));
                }
            }
            ParameterKind::Text => {
                value.as_str().ok_or_else(wrong_type)?;
            }
            ParameterKind::IpAddress => {
                let v = value.as_str().ok_or_else(wrong_type)?;
                if v.parse::<IpAddr>().is_err() {
                    return Err(SpectrometerError::Configuration(format!(
                        "'{name}' = {v} is not a valid IP address"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Type and valid range of a parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum ParameterKind {
    /// Real number within an inclusive range.
    Float {
        /// Lower bound.
        min: Option<f64>,
        /// Upper bound.
        max: Option<f64>,
    },
    /// Integer within an inclusive range.
    Int {
        /// Lower bound.
        min: Option<i64>,
        /// Upper bound.
        max: Option<i64>,
    },
    /// Boolean flag.
    Bool,
    /// One of a fixed set of strings.
    Selection {
        /// Allowed values.
        options: Vec<String>,
    },
    /// Any string.
    Text,
    /// IPv4 or IPv6 address.
    IpAddress,
}

impl ParameterKind {
    /// Short name of the expected type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            ParameterKind::Float { .. } => "a number",
            ParameterKind::Int { .. } => "an integer",
            ParameterKind::Bool => "a bool",
            ParameterKind::Selection { .. } => "an option",
            ParameterKind::Text => "text",
            ParameterKind::IpAddress => "an IP address",
        }
    }
}
