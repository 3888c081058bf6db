// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Segment sampling.
//!
//! A [`TaborSegment`] is the device representation of one waveform: two
//! channels of 14-bit voltage codes, with the two marker bits packed into
//! bits 14 and 15 of channel A. Segments are identified by a SHA-256 hash of
//! their sample data.
//!
//! Segment data is transferred in the combined format: both channels are
//! interleaved in blocks of [`SEGMENT_QUANTUM`] samples, channel B first.
//! Several segments can be transferred at once, separated by one block of
//! padding.

use std::fmt;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::clock::SampleClock;
use crate::error::ProgramError;
use crate::program::compatibility::SegmentConstraints;
use crate::program::waveform::{ChannelId, Waveform};

/// Voltage resolution of the DAC in bits.
pub const RESOLUTION_BITS: u32 = 14;

/// Code of zero volts at zero offset.
pub const ZERO_VOLT_CODE: u16 = 1 << (RESOLUTION_BITS - 1);

/// Block size of the combined transfer format.
pub const SEGMENT_QUANTUM: usize = 16;

/// Maps a waveform value to the voltage put out by a channel.
pub type VoltageTransform = Arc<dyn Fn(f64) -> f64 + Send + Sync>;

/// Transform that passes values through unchanged.
pub fn identity_transform() -> VoltageTransform {
    Arc::new(|v: f64| v)
}

/// Convert a voltage into a DAC code.
///
/// The output range `offset ± amplitude` is mapped linearly onto
/// `0..=2^resolution - 1`, rounding half to even. A non-positive amplitude
/// has no output range and rejects every voltage.
pub fn voltage_to_uint16(
    voltage: f64,
    amplitude: f64,
    offset: f64,
    resolution: u32,
) -> Result<u16, ProgramError> {
    let non_dc = voltage - offset;
    if !amplitude.is_finite()
        || amplitude <= 0.0
        || !non_dc.is_finite()
        || non_dc.abs() > amplitude
    {
        return Err(ProgramError::VoltageOutOfRange {
            voltage,
            offset,
            amplitude,
        });
    }
    let full_scale = f64::from((1u32 << resolution) - 1);
    let code = ((non_dc + amplitude) * full_scale / (2.0 * amplitude)).round_ties_even();
    Ok(code as u16)
}

/// SHA-256 digest of a segment's sample data.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentHash(pub [u8; 32]);

impl fmt::Debug for SegmentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SegmentHash(")?;
        for byte in &self.0[..6] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..)")
    }
}

/// Sample data of one segment.
///
/// # Invariants
///
/// - both channels have the same, non-zero length
#[derive(Clone, PartialEq, Eq)]
pub struct TaborSegment {
    channel_a: Vec<u16>,
    channel_b: Vec<u16>,
}

impl TaborSegment {
    /// Create a segment from the codes of both channels.
    pub fn new(channel_a: Vec<u16>, channel_b: Vec<u16>) -> Result<Self, ProgramError> {
        if channel_a.is_empty() {
            return Err(ProgramError::SamplingDomain("empty segment".into()));
        }
        if channel_a.len() != channel_b.len() {
            return Err(ProgramError::SamplingDomain(format!(
                "channel lengths differ: {} vs {}",
                channel_a.len(),
                channel_b.len()
            )));
        }
        Ok(Self {
            channel_a,
            channel_b,
        })
    }

    /// Segment holding the zero-volt code on both channels.
    pub fn idle(num_points: usize) -> Self {
        Self {
            channel_a: vec![ZERO_VOLT_CODE; num_points.max(1)],
            channel_b: vec![ZERO_VOLT_CODE; num_points.max(1)],
        }
    }

    /// Number of samples per channel.
    pub fn num_points(&self) -> u32 {
        self.channel_a.len() as u32
    }

    /// Codes of channel A including marker bits.
    pub fn channel_a(&self) -> &[u16] {
        &self.channel_a
    }

    /// Codes of channel B.
    pub fn channel_b(&self) -> &[u16] {
        &self.channel_b
    }

    /// Content hash.
    pub fn hash(&self) -> SegmentHash {
        let mut state = Sha256::new();
        for code in self.channel_a.iter().chain(&self.channel_b) {
            state.update(code.to_le_bytes());
        }
        SegmentHash(state.finalize().into())
    }

    /// Data in the combined transfer format.
    pub fn to_binary(&self) -> Vec<u16> {
        make_combined_wave(std::slice::from_ref(self))
    }
}

impl fmt::Debug for TaborSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaborSegment")
            .field("num_points", &self.num_points())
            .field("hash", &self.hash())
            .finish()
    }
}

/// Interleave segments into one combined transfer.
///
/// Consecutive segments are separated by one block of zero-volt codes.
pub fn make_combined_wave(segments: &[TaborSegment]) -> Vec<u16> {
    let total: usize = segments
        .iter()
        .map(|s| s.channel_a.len() + SEGMENT_QUANTUM)
        .sum::<usize>()
        .saturating_sub(SEGMENT_QUANTUM);
    let mut combined = Vec::with_capacity(2 * total);
    for (n, segment) in segments.iter().enumerate() {
        if n > 0 {
            combined.extend(std::iter::repeat(ZERO_VOLT_CODE).take(2 * SEGMENT_QUANTUM));
        }
        for (block_a, block_b) in segment
            .channel_a
            .chunks(SEGMENT_QUANTUM)
            .zip(segment.channel_b.chunks(SEGMENT_QUANTUM))
        {
            combined.extend_from_slice(block_b);
            combined.extend_from_slice(block_a);
        }
    }
    combined
}

/// Split combined data back into channel A and channel B codes.
pub fn split_combined_wave(data: &[u16]) -> (Vec<u16>, Vec<u16>) {
    let mut channel_a = Vec::with_capacity(data.len() / 2);
    let mut channel_b = Vec::with_capacity(data.len() / 2);
    for pair in data.chunks(2 * SEGMENT_QUANTUM) {
        let (block_b, block_a) = pair.split_at(pair.len() / 2);
        channel_b.extend_from_slice(block_b);
        channel_a.extend_from_slice(block_a);
    }
    (channel_a, channel_b)
}

/// Renders waveforms into segments for one channel pair.
#[derive(Clone)]
pub struct SegmentSampler {
    /// Sample clock of the channel pair
    pub clock: SampleClock,
    /// Segment length constraints
    pub constraints: SegmentConstraints,
    /// Output amplitude per channel (half the peak-to-peak range)
    pub amplitudes: [f64; 2],
    /// Output offset per channel
    pub offsets: [f64; 2],
    /// Voltage transform per channel
    pub transforms: [VoltageTransform; 2],
}

impl SegmentSampler {
    /// Sampler with identity transforms and zero offsets.
    pub fn new(clock: SampleClock, constraints: SegmentConstraints, amplitudes: [f64; 2]) -> Self {
        Self {
            clock,
            constraints,
            amplitudes,
            offsets: [0.0, 0.0],
            transforms: [identity_transform(), identity_transform()],
        }
    }

    /// Number of samples of `waveform`.
    ///
    /// # Errors
    ///
    /// [`ProgramError::SamplingDomain`] if the length is not integral,
    /// not positive, not a multiple of the quantum or below the minimum.
    pub fn segment_length(&self, waveform: &dyn Waveform) -> Result<u32, ProgramError> {
        let samples = self.clock.checked_samples(waveform.duration_ns())?;
        if samples % self.constraints.quantum != 0 || samples < self.constraints.minimal_length {
            return Err(ProgramError::SamplingDomain(format!(
                "waveform of {samples} samples is shorter than {} or not a multiple of {}",
                self.constraints.minimal_length, self.constraints.quantum
            )));
        }
        u32::try_from(samples)
            .map_err(|_| ProgramError::SamplingDomain(format!("{samples} samples do not fit a segment")))
    }

    /// Sample `waveform` into a segment.
    ///
    /// `channels[i]` is played on output `i`, unassigned outputs hold the
    /// zero-volt code. A marker is high wherever its channel is non-zero.
    pub fn sample(
        &self,
        waveform: &dyn Waveform,
        channels: &[Option<ChannelId>],
        markers: &[Option<ChannelId>],
    ) -> Result<TaborSegment, ProgramError> {
        let length = self.segment_length(waveform)? as usize;
        let times = self.clock.sample_times(length);
        let mut values = vec![0.0; length];

        let mut codes: [Vec<u16>; 2] = [Vec::new(), Vec::new()];
        for (output, codes) in codes.iter_mut().enumerate() {
            match channels.get(output).and_then(Option::as_ref) {
                Some(channel) => {
                    waveform.sample_channel(channel, &times, &mut values)?;
                    let transform = &self.transforms[output];
                    *codes = values
                        .iter()
                        .map(|&v| {
                            voltage_to_uint16(
                                transform(v),
                                self.amplitudes[output],
                                self.offsets[output],
                                RESOLUTION_BITS,
                            )
                        })
                        .collect::<Result<_, _>>()?;
                }
                None => *codes = vec![ZERO_VOLT_CODE; length],
            }
        }

        let [mut channel_a, channel_b] = codes;
        for (index, marker) in markers.iter().enumerate().take(2) {
            if let Some(marker) = marker {
                waveform.sample_channel(marker, &times, &mut values)?;
                let bit = 1u16 << (RESOLUTION_BITS as usize + index);
                for (code, &v) in channel_a.iter_mut().zip(&values) {
                    if v != 0.0 {
                        *code |= bit;
                    }
                }
            }
        }

        TaborSegment::new(channel_a, channel_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::waveform::TableWaveform;
    use std::collections::BTreeMap;

    fn sampler() -> SegmentSampler {
        SegmentSampler::new(
            SampleClock::new(1.0).unwrap(),
            SegmentConstraints::default(),
            [1.0, 1.0],
        )
    }

    fn some(names: &[&str]) -> Vec<Option<ChannelId>> {
        names.iter().map(|n| Some(n.to_string())).collect()
    }

    // =========================================================================
    // voltage_to_uint16
    // =========================================================================

    #[test]
    fn test_voltage_to_uint16_range() {
        assert_eq!(voltage_to_uint16(-1.0, 1.0, 0.0, 14).unwrap(), 0);
        assert_eq!(voltage_to_uint16(1.0, 1.0, 0.0, 14).unwrap(), 16383);
        assert_eq!(voltage_to_uint16(0.0, 0.5, 0.0, 14).unwrap(), ZERO_VOLT_CODE);
    }

    #[test]
    fn test_voltage_to_uint16_offset() {
        assert_eq!(voltage_to_uint16(0.5, 0.5, 0.5, 14).unwrap(), ZERO_VOLT_CODE);
    }

    #[test]
    fn test_voltage_to_uint16_out_of_range() {
        let err = voltage_to_uint16(1.5, 1.0, 0.0, 14).unwrap_err();
        assert!(matches!(err, ProgramError::VoltageOutOfRange { .. }));
        assert!(voltage_to_uint16(f64::NAN, 1.0, 0.0, 14).is_err());
    }

    #[test]
    fn test_voltage_to_uint16_zero_amplitude() {
        for amplitude in [0.0, -0.5, f64::NAN] {
            let err = voltage_to_uint16(0.0, amplitude, 0.0, 14).unwrap_err();
            assert!(matches!(err, ProgramError::VoltageOutOfRange { .. }));
        }
    }

    // =========================================================================
    // TaborSegment
    // =========================================================================

    #[test]
    fn test_segment_rejects_mismatched_lengths() {
        assert!(TaborSegment::new(vec![1, 2], vec![1]).is_err());
        assert!(TaborSegment::new(vec![], vec![]).is_err());
    }

    #[test]
    fn test_segment_hash_by_content() {
        let a = TaborSegment::new(vec![1; 16], vec![2; 16]).unwrap();
        let b = TaborSegment::new(vec![1; 16], vec![2; 16]).unwrap();
        let swapped = TaborSegment::new(vec![2; 16], vec![1; 16]).unwrap();
        assert_eq!(a.hash(), b.hash());
        assert_ne!(a.hash(), swapped.hash());
    }

    #[test]
    fn test_idle_segment() {
        let idle = TaborSegment::idle(192);
        assert_eq!(idle.num_points(), 192);
        assert!(idle.channel_a().iter().all(|&c| c == ZERO_VOLT_CODE));
    }

    // =========================================================================
    // Combined transfer format
    // =========================================================================

    #[test]
    fn test_combined_wave_block_order() {
        let a: Vec<u16> = (0..32).collect();
        let b: Vec<u16> = (100..132).collect();
        let segment = TaborSegment::new(a.clone(), b.clone()).unwrap();
        let combined = segment.to_binary();
        assert_eq!(combined.len(), 64);
        assert_eq!(&combined[..16], &b[..16]);
        assert_eq!(&combined[16..32], &a[..16]);
        assert_eq!(&combined[32..48], &b[16..]);
        assert_eq!(&combined[48..], &a[16..]);
    }

    #[test]
    fn test_combined_wave_padding_between_segments() {
        let first = TaborSegment::new(vec![1; 32], vec![2; 32]).unwrap();
        let second = TaborSegment::new(vec![3; 16], vec![4; 16]).unwrap();
        let combined = make_combined_wave(&[first, second]);
        assert_eq!(combined.len(), 2 * (32 + 16 + 16));
        assert!(combined[64..96].iter().all(|&c| c == ZERO_VOLT_CODE));

        let (a, b) = split_combined_wave(&combined);
        assert_eq!(a.len(), 64);
        assert_eq!(&a[..32], &[1; 32]);
        assert_eq!(&b[48..], &[4; 16]);
    }

    // =========================================================================
    // SegmentSampler
    // =========================================================================

    #[test]
    fn test_sample_channels_and_markers() {
        let waveform = TableWaveform::new(
            192.0,
            BTreeMap::from([
                ("X".to_string(), vec![(0.0, 1.0)]),
                ("Y".to_string(), vec![(0.0, -1.0)]),
                ("M".to_string(), vec![(0.0, 1.0), (16.0, 1.0), (16.0, 0.0)]),
            ]),
        )
        .unwrap();
        let segment = sampler()
            .sample(&waveform, &some(&["X", "Y"]), &[None, Some("M".into())])
            .unwrap();
        assert_eq!(segment.num_points(), 192);
        assert_eq!(segment.channel_b()[0], 0);
        assert_eq!(segment.channel_a()[0], 16383 | 0x8000);
        assert_eq!(segment.channel_a()[15], 16383 | 0x8000);
        assert_eq!(segment.channel_a()[16], 16383);
    }

    #[test]
    fn test_sample_unassigned_channel_is_mid_scale() {
        let waveform = TableWaveform::constant(192.0, [("X", 0.5)]).unwrap();
        let segment = sampler()
            .sample(&waveform, &[Some("X".into()), None], &[None, None])
            .unwrap();
        assert!(segment.channel_b().iter().all(|&c| c == ZERO_VOLT_CODE));
    }

    #[test]
    fn test_sample_applies_transform() {
        let waveform = TableWaveform::constant(192.0, [("X", 0.5), ("Y", 0.5)]).unwrap();
        let mut sampler = sampler();
        sampler.transforms[1] = Arc::new(|v: f64| -v);
        let segment = sampler
            .sample(&waveform, &some(&["X", "Y"]), &[None, None])
            .unwrap();
        assert!(segment.channel_a()[0] > ZERO_VOLT_CODE);
        assert!(segment.channel_b()[0] < ZERO_VOLT_CODE);
    }

    #[test]
    fn test_sample_rejects_bad_lengths() {
        let s = sampler();
        let short = TableWaveform::constant(176.0, [("X", 0.0)]).unwrap();
        let unaligned = TableWaveform::constant(200.0, [("X", 0.0)]).unwrap();
        let fractional = TableWaveform::constant(192.5, [("X", 0.0)]).unwrap();
        for waveform in [short, unaligned, fractional] {
            let err = s.sample(&waveform, &[Some("X".into()), None], &[None, None]);
            assert!(matches!(err, Err(ProgramError::SamplingDomain(_))));
        }
    }

    #[test]
    fn test_sample_missing_channel() {
        let waveform = TableWaveform::constant(192.0, [("X", 0.0)]).unwrap();
        let err = sampler()
            .sample(&waveform, &some(&["X", "Z"]), &[None, None])
            .unwrap_err();
        assert!(matches!(err, ProgramError::MissingChannels { .. }));
    }

    #[test]
    fn test_sample_voltage_out_of_range() {
        let waveform = TableWaveform::constant(192.0, [("X", 2.0)]).unwrap();
        let err = sampler()
            .sample(&waveform, &[Some("X".into()), None], &[None, None])
            .unwrap_err();
        assert!(matches!(err, ProgramError::VoltageOutOfRange { .. }));
    }

    #[test]
    fn test_sample_zero_amplitude_rejected() {
        let waveform = TableWaveform::constant(192.0, [("X", 0.0)]).unwrap();
        let muted = SegmentSampler::new(
            SampleClock::new(1.0).unwrap(),
            SegmentConstraints::default(),
            [0.0, 1.0],
        );
        let err = muted
            .sample(&waveform, &[Some("X".into()), None], &[None, None])
            .unwrap_err();
        assert!(matches!(err, ProgramError::VoltageOutOfRange { .. }));
    }
}
