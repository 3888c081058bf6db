// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Hardware-independent program representation.
//!
//! This module provides:
//! - The loop tree ([`Loop`]) with its restructuring operations
//! - The waveform boundary ([`Waveform`]) and the composite waveforms
//! - The compatibility transform ([`make_compatible`])
//! - Program description files ([`ProgramDescription`])

pub mod compatibility;
pub mod description;
pub mod loop_tree;
pub mod waveform;

pub use compatibility::{
    classify, make_compatible, to_waveform, CompatibilityLevel, SegmentConstraints,
};
pub use description::{LoopDescription, ProgramDescription, TableDescription};
pub use loop_tree::{checked_repetition, Loop};
pub use waveform::{
    content_key, full_content_key, subset_for_channels, ChannelId, RepetitionWaveform,
    SequenceWaveform, SubsetWaveform, TableWaveform, Waveform, WaveformKey, WaveformRef,
};
