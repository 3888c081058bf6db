// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! AWG transport layer.
//!
//! The [`AwgDevice`] trait is the boundary to the instrument. It carries SCPI
//! commands, queries and the binary transfers (segment data, segment length
//! table, sequencer tables). Implementations:
//!
//! - [`SimulatedDevice`]: in-memory instrument for tests and dry runs
//! - [`MirroredDevice`]: fans every command out to several instruments

pub mod mirror;
pub mod properties;
pub mod simulator;
pub mod r#trait;

pub use mirror::MirroredDevice;
pub use properties::DeviceProperties;
pub use r#trait::{AwgDevice, TableEntry};
pub use simulator::{OutputCoupling, SimulatedDevice};
