// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! AWG transport trait definition.

use serde::{Deserialize, Serialize};

use crate::device::DeviceProperties;
use crate::error::DeviceError;

/// One entry of a sequencer or advanced sequencer table.
///
/// In a sequencer table `element_number` is a 1-based segment number, in the
/// advanced sequencer table a 1-based sequence number. While a program is
/// compiled, sequencer table entries hold 0-based waveform indices instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableEntry {
    /// How often the element is played
    pub repetition_count: u64,
    /// Played segment, sequence or waveform
    pub element_number: u64,
    /// Wait for a jump event after this entry
    pub jump_flag: u8,
}

impl TableEntry {
    /// Entry without jump flag.
    pub fn new(repetition_count: u64, element_number: u64) -> Self {
        Self {
            repetition_count,
            element_number,
            jump_flag: 0,
        }
    }

    /// Entry waiting for a jump event.
    pub fn with_jump(repetition_count: u64, element_number: u64) -> Self {
        Self {
            repetition_count,
            element_number,
            jump_flag: 1,
        }
    }
}

impl From<(u64, u64, u8)> for TableEntry {
    fn from((repetition_count, element_number, jump_flag): (u64, u64, u8)) -> Self {
        Self {
            repetition_count,
            element_number,
            jump_flag,
        }
    }
}

/// Command transport to an AWG.
///
/// Implementations own the connection; callers serialize access.
/// Commands are SCPI strings, several commands may be joined with `;`.
pub trait AwgDevice: Send {
    /// Identifier used in logs.
    fn name(&self) -> &str;

    /// Hardware limits.
    fn dev_properties(&self) -> &DeviceProperties;

    /// Send one or more commands.
    fn send_cmd(&mut self, command: &str) -> Result<(), DeviceError>;

    /// Send commands ending in a query and return the answer.
    fn send_query(&mut self, query: &str) -> Result<String, DeviceError>;

    /// Send binary sample data to the selected segment.
    fn send_binary_data(&mut self, prefix: &str, data: &[u16]) -> Result<(), DeviceError>;

    /// Replace the segment table with segments of the given lengths.
    fn download_segment_lengths(&mut self, lengths: &[u32]) -> Result<(), DeviceError>;

    /// Write the selected sequencer table.
    fn download_sequencer_table(&mut self, table: &[TableEntry]) -> Result<(), DeviceError>;

    /// Write the advanced sequencer table.
    fn download_adv_seq_table(&mut self, table: &[TableEntry]) -> Result<(), DeviceError>;
}

impl<D: AwgDevice + ?Sized> AwgDevice for Box<D> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn dev_properties(&self) -> &DeviceProperties {
        (**self).dev_properties()
    }

    fn send_cmd(&mut self, command: &str) -> Result<(), DeviceError> {
        (**self).send_cmd(command)
    }

    fn send_query(&mut self, query: &str) -> Result<String, DeviceError> {
        (**self).send_query(query)
    }

    fn send_binary_data(&mut self, prefix: &str, data: &[u16]) -> Result<(), DeviceError> {
        (**self).send_binary_data(prefix, data)
    }

    fn download_segment_lengths(&mut self, lengths: &[u32]) -> Result<(), DeviceError> {
        (**self).download_segment_lengths(lengths)
    }

    fn download_sequencer_table(&mut self, table: &[TableEntry]) -> Result<(), DeviceError> {
        (**self).download_sequencer_table(table)
    }

    fn download_adv_seq_table(&mut self, table: &[TableEntry]) -> Result<(), DeviceError> {
        (**self).download_adv_seq_table(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_entry_constructors() {
        assert_eq!(TableEntry::new(3, 2), TableEntry::from((3, 2, 0)));
        assert_eq!(TableEntry::with_jump(1, 1).jump_flag, 1);
    }

    #[test]
    fn test_table_entry_serialization() {
        let json = serde_json::to_string(&TableEntry::new(2, 5)).unwrap();
        assert_eq!(
            json,
            r#"{"repetition_count":2,"element_number":5,"jump_flag":0}"#
        );
    }
}
