// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Configuration management for the AWG compiler.
//!
//! Configuration is loaded from multiple sources with the following priority
//! (later sources override earlier ones):
//!
//! 1. Built-in defaults
//! 2. awg.yaml file
//! 3. Environment variables (QUBITOS_*)
//! 4. CLI arguments

use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

use crate::device::DeviceProperties;
use crate::error::{Error, Result};
use crate::program::SegmentConstraints;
use crate::tabor::instrument::{InstrumentOptions, DEFAULT_IDLE_SEGMENT_LENGTH};
use crate::validation::{
    validate_device_properties, validate_idle_segment_length, validate_memory_capacity,
    validate_output_settings,
};

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Instrument configuration
    #[serde(default)]
    pub device: DeviceConfig,

    /// Segment sampling settings
    #[serde(default)]
    pub sampling: SamplingConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file and environment.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut config = Config::default();

        // Load from file if specified
        if let Some(path) = config_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                config = serde_yaml::from_str(&content)?;
            }
        } else {
            // Try default locations
            for path in &["awg.yaml", "awg.yml", "/etc/qubitos/awg.yaml"] {
                let path = Path::new(path);
                if path.exists() {
                    let content = std::fs::read_to_string(path)?;
                    config = serde_yaml::from_str(&content)?;
                    break;
                }
            }
        }

        // Override with environment variables
        config.apply_env_overrides();

        Ok(config)
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("QUBITOS_AWG_IDENTIFIER") {
            self.device.identifier = val;
        }
        if let Ok(val) = env::var("QUBITOS_AWG_SAMPLE_RATE") {
            if let Ok(rate) = val.parse() {
                self.device.sample_rate = rate;
            }
        }
        if let Ok(val) = env::var("QUBITOS_AWG_AMPLITUDE") {
            if let Ok(amplitude) = val.parse() {
                self.device.amplitude = amplitude;
            }
        }
        if let Ok(val) = env::var("QUBITOS_AWG_COUPLED") {
            self.device.coupled = val.to_lowercase() == "true" || val == "1";
        }
        if let Ok(val) = env::var("QUBITOS_AWG_MAX_ARB_MEM") {
            if let Ok(points) = val.parse() {
                self.device.properties.max_arb_mem = points;
            }
        }
        if let Ok(val) = env::var("QUBITOS_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = env::var("QUBITOS_LOG_FORMAT") {
            self.logging.format = val;
        }
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.device.identifier.trim().is_empty() {
            return Err(Error::Config("device identifier cannot be empty".into()));
        }
        validate_device_properties(&self.device.properties)?;
        validate_output_settings(
            self.device.sample_rate,
            self.device.amplitude,
            self.device.offset,
        )?;
        validate_idle_segment_length(
            self.sampling.idle_segment_length,
            &self.sampling.constraints(),
        )?;
        validate_memory_capacity(&self.device.properties, self.sampling.idle_segment_length)?;

        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            return Err(Error::Config(format!(
                "log format must be json or pretty, got '{}'",
                self.logging.format
            )));
        }
        if self.device.mirrors > 0 {
            tracing::debug!(mirrors = self.device.mirrors, "Mirroring every command");
        }
        Ok(())
    }

    /// Options for connecting to the instrument.
    pub fn instrument_options(&self) -> InstrumentOptions {
        InstrumentOptions {
            identifier: self.device.identifier.clone(),
            reset: self.device.reset,
            constraints: self.sampling.constraints(),
            idle_segment_length: self.sampling.idle_segment_length,
        }
    }
}

/// Instrument configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Name used in logs and channel pair names
    #[serde(default = "default_identifier")]
    pub identifier: String,

    /// Hardware limits
    #[serde(default)]
    pub properties: DeviceProperties,

    /// Sample rate in samples per second
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,

    /// Peak-to-peak output amplitude in volts
    #[serde(default = "default_amplitude")]
    pub amplitude: f64,

    /// Output offset in volts
    #[serde(default)]
    pub offset: f64,

    /// Switch all four outputs together
    #[serde(default)]
    pub coupled: bool,

    /// Reset the instrument on connect
    #[serde(default)]
    pub reset: bool,

    /// Number of additional instruments mirroring every command
    #[serde(default)]
    pub mirrors: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            identifier: default_identifier(),
            properties: DeviceProperties::default(),
            sample_rate: default_sample_rate(),
            amplitude: default_amplitude(),
            offset: 0.0,
            coupled: false,
            reset: false,
            mirrors: 0,
        }
    }
}

fn default_identifier() -> String {
    "tabor".into()
}

fn default_sample_rate() -> f64 {
    1e9
}

fn default_amplitude() -> f64 {
    1.0
}

/// Segment sampling configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Minimal segment length in samples
    #[serde(default = "default_minimal_length")]
    pub minimal_length: u64,

    /// Segment length granularity in samples
    #[serde(default = "default_quantum")]
    pub quantum: u64,

    /// Length of the idle segment in samples
    #[serde(default = "default_idle_segment_length")]
    pub idle_segment_length: usize,
}

impl SamplingConfig {
    /// Segment length constraints.
    pub fn constraints(&self) -> SegmentConstraints {
        SegmentConstraints {
            minimal_length: self.minimal_length,
            quantum: self.quantum,
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            minimal_length: default_minimal_length(),
            quantum: default_quantum(),
            idle_segment_length: default_idle_segment_length(),
        }
    }
}

fn default_minimal_length() -> u64 {
    SegmentConstraints::default().minimal_length
}

fn default_quantum() -> u64 {
    SegmentConstraints::default().quantum
}

fn default_idle_segment_length() -> usize {
    DEFAULT_IDLE_SEGMENT_LENGTH
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}
