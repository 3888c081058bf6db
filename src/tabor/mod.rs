// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Tabor AWG driver.
//!
//! - [`program`]: compile a loop tree into sequencer tables
//! - [`segment`]: sample waveforms into two-channel segments
//! - [`memory`]: place segments into device memory slots
//! - [`registry`]: programs uploaded to a channel pair
//! - [`channel_pair`]: upload, arm and run programs on one pair
//! - [`instrument`]: the four channel instrument

pub mod channel_pair;
pub mod guard;
pub mod instrument;
pub mod memory;
pub mod program;
pub mod registry;
pub mod segment;

pub use channel_pair::TaborChannelPair;
pub use guard::ConfigurationGuard;
pub use instrument::{InstrumentOptions, SharedDevice, TaborAwg};
pub use memory::{Placement, SegmentMemory, SlotAssignment, SlotInfo};
pub use program::{ProgramSummary, TaborProgram, WaveformMode};
pub use registry::{ProgramMemory, ProgramRegistry};
pub use segment::{identity_transform, SegmentSampler, TaborSegment, VoltageTransform};
