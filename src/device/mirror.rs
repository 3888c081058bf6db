// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Mirrored instruments.
//!
//! Several physical AWGs can be driven as one: every command and every data
//! transfer goes to all of them, queries are answered by the primary.

use tracing::debug;

use crate::device::{AwgDevice, DeviceProperties, TableEntry};
use crate::error::DeviceError;

/// A primary device plus any number of mirrors.
#[derive(Debug)]
pub struct MirroredDevice<D> {
    primary: D,
    mirrors: Vec<D>,
}

impl<D: AwgDevice> MirroredDevice<D> {
    /// Drive `mirrors` with everything sent to `primary`.
    pub fn new(primary: D, mirrors: Vec<D>) -> Self {
        debug!(
            primary = %primary.name(),
            mirrors = mirrors.len(),
            "Creating mirrored device"
        );
        Self { primary, mirrors }
    }

    /// The device answering queries.
    pub fn primary(&self) -> &D {
        &self.primary
    }

    /// The mirrored devices.
    pub fn mirrors(&self) -> &[D] {
        &self.mirrors
    }

    /// All devices, primary first.
    pub fn all(&self) -> impl Iterator<Item = &D> {
        std::iter::once(&self.primary).chain(&self.mirrors)
    }

    fn for_each(
        &mut self,
        mut op: impl FnMut(&mut D) -> Result<(), DeviceError>,
    ) -> Result<(), DeviceError> {
        op(&mut self.primary)?;
        for mirror in &mut self.mirrors {
            op(mirror)?;
        }
        Ok(())
    }
}

impl<D: AwgDevice> AwgDevice for MirroredDevice<D> {
    fn name(&self) -> &str {
        self.primary.name()
    }

    fn dev_properties(&self) -> &DeviceProperties {
        self.primary.dev_properties()
    }

    fn send_cmd(&mut self, command: &str) -> Result<(), DeviceError> {
        self.for_each(|d| d.send_cmd(command))
    }

    fn send_query(&mut self, query: &str) -> Result<String, DeviceError> {
        self.primary.send_query(query)
    }

    fn send_binary_data(&mut self, prefix: &str, data: &[u16]) -> Result<(), DeviceError> {
        self.for_each(|d| d.send_binary_data(prefix, data))
    }

    fn download_segment_lengths(&mut self, lengths: &[u32]) -> Result<(), DeviceError> {
        self.for_each(|d| d.download_segment_lengths(lengths))
    }

    fn download_sequencer_table(&mut self, table: &[TableEntry]) -> Result<(), DeviceError> {
        self.for_each(|d| d.download_sequencer_table(table))
    }

    fn download_adv_seq_table(&mut self, table: &[TableEntry]) -> Result<(), DeviceError> {
        self.for_each(|d| d.download_adv_seq_table(table))
    }
}
