// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Sample clock arithmetic.
//!
//! All durations in this crate are nanoseconds stored as `f64`. A
//! [`SampleClock`] converts them into sample counts at the AWG sample rate and
//! decides whether a duration lands on the sample grid.
//!
//! Integer checks use an absolute tolerance of [`INTEGER_TOLERANCE`] scaled by
//! the magnitude of the value, so that products such as `160 ns × 1.2 GS/s`
//! still count as exactly 192 samples.

use crate::error::ProgramError;

/// Maximum deviation from the nearest integer that still counts as integral.
pub const INTEGER_TOLERANCE: f64 = 1e-10;

/// Whether `value` is within tolerance of an integer.
pub fn is_integer(value: f64) -> bool {
    value.is_finite() && (value - value.round()).abs() <= INTEGER_TOLERANCE * value.abs().max(1.0)
}

/// Round `value` to the nearest integer, failing if it is not integral.
pub fn checked_int_cast(value: f64) -> Option<i64> {
    if is_integer(value) {
        Some(value.round() as i64)
    } else {
        None
    }
}

/// AWG sample clock.
///
/// # Invariants
///
/// - `sample_rate_ghz > 0.0`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleClock {
    /// Sample rate in GHz (samples per nanosecond).
    pub sample_rate_ghz: f64,
}

impl SampleClock {
    /// Create a clock from a sample rate in GHz.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the rate is not a positive finite number.
    pub fn new(sample_rate_ghz: f64) -> Result<Self, String> {
        if !(sample_rate_ghz.is_finite() && sample_rate_ghz > 0.0) {
            return Err(format!(
                "sample_rate_ghz must be positive, got {sample_rate_ghz}"
            ));
        }
        Ok(Self { sample_rate_ghz })
    }

    /// Create a clock from a device rate in samples per second.
    pub fn from_samples_per_second(rate: f64) -> Result<Self, String> {
        Self::new(rate * 1e-9)
    }

    /// Sample period in nanoseconds.
    pub fn sample_period_ns(&self) -> f64 {
        1.0 / self.sample_rate_ghz
    }

    /// Fractional number of samples covering `duration_ns`.
    pub fn samples(&self, duration_ns: f64) -> f64 {
        duration_ns * self.sample_rate_ghz
    }

    /// Exact number of samples covering `duration_ns`.
    ///
    /// # Errors
    ///
    /// [`ProgramError::SamplingDomain`] if the duration is not an integer
    /// number of samples or is not positive.
    pub fn checked_samples(&self, duration_ns: f64) -> Result<u64, ProgramError> {
        let samples = self.samples(duration_ns);
        match checked_int_cast(samples) {
            Some(n) if n > 0 => Ok(n as u64),
            Some(n) => Err(ProgramError::SamplingDomain(format!(
                "duration {duration_ns} ns yields {n} samples"
            ))),
            None => Err(ProgramError::SamplingDomain(format!(
                "duration {duration_ns} ns is {samples} samples, not an integer"
            ))),
        }
    }

    /// Sample times (relative to waveform start) for `count` samples.
    pub fn sample_times(&self, count: usize) -> Vec<f64> {
        let period = self.sample_period_ns();
        (0..count).map(|i| i as f64 * period).collect()
    }
}
