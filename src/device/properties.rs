// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Hardware limits of an AWG.

use serde::{Deserialize, Serialize};

/// Fixed hardware limits, queried once per device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProperties {
    /// Output channels per channel pair
    #[serde(default = "default_chan_per_part")]
    pub chan_per_part: usize,

    /// Minimal number of entries of a sequencer table
    #[serde(default = "default_min_seq_len")]
    pub min_seq_len: usize,

    /// Maximal number of entries of a sequencer table
    #[serde(default = "default_max_seq_len")]
    pub max_seq_len: usize,

    /// Minimal number of entries of the advanced sequencer table
    #[serde(default = "default_min_aseq_len")]
    pub min_aseq_len: usize,

    /// Maximal number of entries of the advanced sequencer table
    #[serde(default = "default_max_aseq_len")]
    pub max_aseq_len: usize,

    /// Arbitrary waveform memory in samples, shared by both channels of a pair
    #[serde(default = "default_max_arb_mem")]
    pub max_arb_mem: u64,
}

impl DeviceProperties {
    /// Sample points available to one channel pair.
    pub fn total_capacity(&self) -> u64 {
        self.max_arb_mem / 2
    }
}

impl Default for DeviceProperties {
    fn default() -> Self {
        Self {
            chan_per_part: default_chan_per_part(),
            min_seq_len: default_min_seq_len(),
            max_seq_len: default_max_seq_len(),
            min_aseq_len: default_min_aseq_len(),
            max_aseq_len: default_max_aseq_len(),
            max_arb_mem: default_max_arb_mem(),
        }
    }
}

fn default_chan_per_part() -> usize {
    2
}

fn default_min_seq_len() -> usize {
    3
}

fn default_max_seq_len() -> usize {
    48 * 1024
}

fn default_min_aseq_len() -> usize {
    3
}

fn default_max_aseq_len() -> usize {
    1000
}

fn default_max_arb_mem() -> u64 {
    32_000_000
}
