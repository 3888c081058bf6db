// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Waveforms: the atomic content referenced by loop tree leaves.
//!
//! A [`Waveform`] is produced outside this crate and treated as immutable. It
//! is identified by content, never by identity: [`content_key`] feeds the
//! duration and the per-channel content of the requested channels into a
//! SHA-256 digest, so two separately built waveforms with identical samples
//! on the used channels deduplicate to one device segment.
//!
//! The composite waveforms [`SequenceWaveform`] and [`RepetitionWaveform`] are
//! built by the compatibility transform when a subtree has to be collapsed
//! into data. [`SubsetWaveform`] restricts a waveform to the channels a
//! channel pair actually plays.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ProgramError;

/// Identifier of a logical channel or marker.
pub type ChannelId = String;

/// Shared handle to an immutable waveform.
pub type WaveformRef = Arc<dyn Waveform>;

/// SHA-256 content digest of a waveform restricted to a channel set.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WaveformKey(pub [u8; 32]);

impl fmt::Debug for WaveformKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WaveformKey(")?;
        for byte in &self.0[..6] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..)")
    }
}

/// An immutable multi-channel waveform.
pub trait Waveform: fmt::Debug + Send + Sync {
    /// Duration in nanoseconds.
    fn duration_ns(&self) -> f64;

    /// Channels this waveform defines.
    fn defined_channels(&self) -> BTreeSet<ChannelId>;

    /// Sample `channel` at `times_ns` into `output`.
    ///
    /// Times are relative to the waveform start and sorted ascending;
    /// `output` has the same length as `times_ns`.
    fn sample_channel(
        &self,
        channel: &str,
        times_ns: &[f64],
        output: &mut [f64],
    ) -> Result<(), ProgramError>;

    /// Feed the content of one channel into `state`.
    fn hash_channel(&self, channel: &str, state: &mut Sha256);
}

/// Content key of `waveform` restricted to `channels`.
pub fn content_key(waveform: &dyn Waveform, channels: &BTreeSet<ChannelId>) -> WaveformKey {
    let mut state = Sha256::new();
    state.update(waveform.duration_ns().to_bits().to_le_bytes());
    for channel in channels {
        state.update(channel.as_bytes());
        state.update([0u8]);
        waveform.hash_channel(channel, &mut state);
    }
    WaveformKey(state.finalize().into())
}

/// Content key over all defined channels.
pub fn full_content_key(waveform: &dyn Waveform) -> WaveformKey {
    content_key(waveform, &waveform.defined_channels())
}

/// Restrict `waveform` to `channels`.
///
/// Returns the waveform itself when it already defines exactly `channels`.
pub fn subset_for_channels(
    waveform: &WaveformRef,
    channels: &BTreeSet<ChannelId>,
) -> Result<WaveformRef, ProgramError> {
    if &waveform.defined_channels() == channels {
        return Ok(Arc::clone(waveform));
    }
    Ok(Arc::new(SubsetWaveform::new(Arc::clone(waveform), channels.clone())?))
}

fn missing_channels(
    defined: &BTreeSet<ChannelId>,
    requested: &BTreeSet<ChannelId>,
) -> Result<(), ProgramError> {
    let missing: Vec<String> = requested.difference(defined).cloned().collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ProgramError::MissingChannels { missing })
    }
}

// =============================================================================
// SubsetWaveform
// =============================================================================

/// A waveform restricted to a subset of its channels.
#[derive(Debug, Clone)]
pub struct SubsetWaveform {
    inner: WaveformRef,
    channels: BTreeSet<ChannelId>,
}

impl SubsetWaveform {
    /// Restrict `inner` to `channels`.
    ///
    /// # Errors
    ///
    /// [`ProgramError::MissingChannels`] if `inner` lacks any requested channel.
    pub fn new(inner: WaveformRef, channels: BTreeSet<ChannelId>) -> Result<Self, ProgramError> {
        missing_channels(&inner.defined_channels(), &channels)?;
        Ok(Self { inner, channels })
    }
}

impl Waveform for SubsetWaveform {
    fn duration_ns(&self) -> f64 {
        self.inner.duration_ns()
    }

    fn defined_channels(&self) -> BTreeSet<ChannelId> {
        self.channels.clone()
    }

    fn sample_channel(
        &self,
        channel: &str,
        times_ns: &[f64],
        output: &mut [f64],
    ) -> Result<(), ProgramError> {
        if !self.channels.contains(channel) {
            return Err(ProgramError::MissingChannels {
                missing: vec![channel.to_string()],
            });
        }
        self.inner.sample_channel(channel, times_ns, output)
    }

    fn hash_channel(&self, channel: &str, state: &mut Sha256) {
        self.inner.hash_channel(channel, state);
    }
}

// =============================================================================
// SequenceWaveform
// =============================================================================

/// Concatenation of waveforms defining the same channels.
#[derive(Debug, Clone)]
pub struct SequenceWaveform {
    children: Vec<WaveformRef>,
    duration_ns: f64,
    channels: BTreeSet<ChannelId>,
}

impl SequenceWaveform {
    /// Concatenate `children` in order.
    ///
    /// # Errors
    ///
    /// - `children` is empty
    /// - children define different channel sets
    pub fn new(children: Vec<WaveformRef>) -> Result<Self, ProgramError> {
        let first = children.first().ok_or(ProgramError::MissingWaveform)?;
        let channels = first.defined_channels();
        for child in &children[1..] {
            let other = child.defined_channels();
            if other != channels {
                return Err(ProgramError::ChannelMismatch(format!(
                    "{channels:?} vs {other:?}"
                )));
            }
        }
        let duration_ns = children.iter().map(|c| c.duration_ns()).sum();
        Ok(Self {
            children,
            duration_ns,
            channels,
        })
    }

    /// Sequenced waveforms in order.
    pub fn children(&self) -> &[WaveformRef] {
        &self.children
    }
}

impl Waveform for SequenceWaveform {
    fn duration_ns(&self) -> f64 {
        self.duration_ns
    }

    fn defined_channels(&self) -> BTreeSet<ChannelId> {
        self.channels.clone()
    }

    fn sample_channel(
        &self,
        channel: &str,
        times_ns: &[f64],
        output: &mut [f64],
    ) -> Result<(), ProgramError> {
        let mut start = 0;
        let mut offset = 0.0;
        let mut local = Vec::new();
        for (n, child) in self.children.iter().enumerate() {
            let end_time = offset + child.duration_ns();
            let stop = if n + 1 == self.children.len() {
                times_ns.len()
            } else {
                start + times_ns[start..].partition_point(|&t| t < end_time)
            };
            local.clear();
            local.extend(times_ns[start..stop].iter().map(|t| t - offset));
            child.sample_channel(channel, &local, &mut output[start..stop])?;
            start = stop;
            offset = end_time;
        }
        Ok(())
    }

    fn hash_channel(&self, channel: &str, state: &mut Sha256) {
        state.update(b"sequence");
        state.update((self.children.len() as u64).to_le_bytes());
        for child in &self.children {
            state.update(child.duration_ns().to_bits().to_le_bytes());
            child.hash_channel(channel, state);
        }
    }
}

// =============================================================================
// RepetitionWaveform
// =============================================================================

/// A waveform played `repetition_count` times back to back.
#[derive(Debug, Clone)]
pub struct RepetitionWaveform {
    body: WaveformRef,
    repetition_count: u64,
}

impl RepetitionWaveform {
    /// Repeat `body` `repetition_count` times.
    pub fn new(body: WaveformRef, repetition_count: u64) -> Result<Self, ProgramError> {
        if repetition_count == 0 {
            return Err(ProgramError::ZeroRepetition);
        }
        Ok(Self {
            body,
            repetition_count,
        })
    }

    /// Repeated waveform.
    pub fn body(&self) -> &WaveformRef {
        &self.body
    }

    /// Number of repetitions.
    pub fn repetition_count(&self) -> u64 {
        self.repetition_count
    }
}

impl Waveform for RepetitionWaveform {
    fn duration_ns(&self) -> f64 {
        self.body.duration_ns() * self.repetition_count as f64
    }

    fn defined_channels(&self) -> BTreeSet<ChannelId> {
        self.body.defined_channels()
    }

    fn sample_channel(
        &self,
        channel: &str,
        times_ns: &[f64],
        output: &mut [f64],
    ) -> Result<(), ProgramError> {
        let body_duration = self.body.duration_ns();
        let mut start = 0;
        let mut local = Vec::new();
        for repetition in 0..self.repetition_count {
            if start == times_ns.len() {
                break;
            }
            let offset = repetition as f64 * body_duration;
            let stop = if repetition + 1 == self.repetition_count {
                times_ns.len()
            } else {
                let end_time = offset + body_duration;
                start + times_ns[start..].partition_point(|&t| t < end_time)
            };
            local.clear();
            local.extend(times_ns[start..stop].iter().map(|t| t - offset));
            self.body
                .sample_channel(channel, &local, &mut output[start..stop])?;
            start = stop;
        }
        Ok(())
    }

    fn hash_channel(&self, channel: &str, state: &mut Sha256) {
        state.update(b"repetition");
        state.update(self.repetition_count.to_le_bytes());
        self.body.hash_channel(channel, state);
    }
}

// =============================================================================
// TableWaveform
// =============================================================================

/// Piecewise-linear waveform defined by `(time_ns, value)` points per channel.
///
/// Values before the first point hold the first value, values after the last
/// point hold the last value. Two points at the same time form a jump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableWaveform {
    duration_ns: f64,
    channels: BTreeMap<ChannelId, Vec<(f64, f64)>>,
}

impl TableWaveform {
    /// Create a table waveform.
    ///
    /// # Errors
    ///
    /// - `duration_ns` is not positive
    /// - no channels, or a channel without points
    /// - point times not ascending or outside `[0, duration_ns]`
    pub fn new(
        duration_ns: f64,
        channels: BTreeMap<ChannelId, Vec<(f64, f64)>>,
    ) -> Result<Self, ProgramError> {
        if !(duration_ns.is_finite() && duration_ns > 0.0) {
            return Err(ProgramError::SamplingDomain(format!(
                "waveform duration must be positive, got {duration_ns}"
            )));
        }
        if channels.is_empty() {
            return Err(ProgramError::InvalidChannelAssignment(
                "table waveform defines no channels".into(),
            ));
        }
        for (channel, points) in &channels {
            if points.is_empty() {
                return Err(ProgramError::InvalidChannelAssignment(format!(
                    "channel '{channel}' has no table entries"
                )));
            }
            let ascending = points.windows(2).all(|w| w[0].0 <= w[1].0);
            let in_range = points.iter().all(|&(t, _)| (0.0..=duration_ns).contains(&t));
            if !ascending || !in_range {
                return Err(ProgramError::InvalidChannelAssignment(format!(
                    "channel '{channel}' entries must be ascending within [0, {duration_ns}]"
                )));
            }
        }
        Ok(Self {
            duration_ns,
            channels,
        })
    }

    /// A waveform holding a constant value on every given channel.
    pub fn constant<I, S>(duration_ns: f64, values: I) -> Result<Self, ProgramError>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<ChannelId>,
    {
        let channels = values
            .into_iter()
            .map(|(channel, value)| (channel.into(), vec![(0.0, value)]))
            .collect();
        Self::new(duration_ns, channels)
    }

    fn value_at(points: &[(f64, f64)], t: f64) -> f64 {
        let upper = points.partition_point(|&(time, _)| time <= t);
        if upper == 0 {
            return points[0].1;
        }
        if upper == points.len() {
            return points[points.len() - 1].1;
        }
        let (t0, v0) = points[upper - 1];
        let (t1, v1) = points[upper];
        if t1 <= t0 {
            return v1;
        }
        v0 + (v1 - v0) * (t - t0) / (t1 - t0)
    }
}

impl Waveform for TableWaveform {
    fn duration_ns(&self) -> f64 {
        self.duration_ns
    }

    fn defined_channels(&self) -> BTreeSet<ChannelId> {
        self.channels.keys().cloned().collect()
    }

    fn sample_channel(
        &self,
        channel: &str,
        times_ns: &[f64],
        output: &mut [f64],
    ) -> Result<(), ProgramError> {
        let points = self
            .channels
            .get(channel)
            .ok_or_else(|| ProgramError::MissingChannels {
                missing: vec![channel.to_string()],
            })?;
        for (out, &t) in output.iter_mut().zip(times_ns) {
            *out = Self::value_at(points, t);
        }
        Ok(())
    }

    fn hash_channel(&self, channel: &str, state: &mut Sha256) {
        state.update(b"table");
        if let Some(points) = self.channels.get(channel) {
            for &(t, v) in points {
                state.update(t.to_bits().to_le_bytes());
                state.update(v.to_bits().to_le_bytes());
            }
        }
    }
}
