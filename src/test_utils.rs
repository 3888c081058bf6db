// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Shared test fixtures.

use std::sync::Arc;

use crate::device::{DeviceProperties, SimulatedDevice};
use crate::program::{ChannelId, TableWaveform, WaveformRef};
use crate::tabor::instrument::{InstrumentOptions, TaborAwg};
use crate::tabor::segment::TaborSegment;

/// Constant waveform of `duration` ns with `value` on channels `A` and `B`.
pub fn constant_waveform(duration: f64, value: f64) -> WaveformRef {
    two_channel_waveform(duration, value, value)
}

/// Constant waveform with separate values on channels `A` and `B`.
pub fn two_channel_waveform(duration: f64, a: f64, b: f64) -> WaveformRef {
    Arc::new(TableWaveform::constant(duration, [("A", a), ("B", b)]).unwrap())
}

/// Channels `A` and `B` on the two outputs, no markers.
pub fn pair_channels() -> (Vec<Option<ChannelId>>, Vec<Option<ChannelId>>) {
    (vec![Some("A".into()), Some("B".into())], vec![None, None])
}

/// Segment of `len` points holding `value` on both channels.
pub fn segment(len: usize, value: u16) -> TaborSegment {
    TaborSegment::new(vec![value; len], vec![value; len]).unwrap()
}

/// Simulated instrument with default limits at 1 GS/s, so one sample per ns.
pub fn simulator() -> SimulatedDevice {
    SimulatedDevice::new("sim", DeviceProperties::default()).with_sample_rate(1e9)
}

/// Connected instrument on top of [`simulator`].
pub fn simulated_awg() -> TaborAwg<SimulatedDevice> {
    TaborAwg::connect(simulator(), &InstrumentOptions::default()).unwrap()
}
