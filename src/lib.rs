// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! QubitOS AWG program compiler
//!
//! This crate turns nested pulse programs into the sequencer tables and
//! sample segments of a two-channel AWG channel pair, and manages the
//! segment memory of the instrument across uploads.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Loop tree + waveforms             │
//! ├─────────────────────────────────────────┤
//! │   Compatibility transform (quantize)     │
//! ├──────────────────┬──────────────────────┤
//! │ Program compiler │   Segment sampler    │
//! │ (SINGLE/ADVANCED)│   (DAC codes)        │
//! ├──────────────────┴──────────────────────┤
//! │  Channel pair: memory, registry, arming  │
//! ├─────────────────────────────────────────┤
//! │      AwgDevice (simulated, mirrored)     │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`program`]: Loop tree, waveforms and the compatibility transform
//! - [`tabor`]: Compiler, sampler, memory allocator and channel pairs
//! - [`device`]: Device transport trait and implementations
//! - [`config`]: Configuration management
//! - [`validation`]: Input validation utilities
//! - [`error`]: Error types

pub mod clock;
pub mod config;
pub mod device;
pub mod error;
pub mod program;
pub mod tabor;
pub mod validation;

pub use config::Config;
pub use error::{Error, Result};
pub use program::Loop;
pub use tabor::{TaborAwg, TaborChannelPair, TaborProgram};

#[cfg(test)]
pub mod test_utils;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
