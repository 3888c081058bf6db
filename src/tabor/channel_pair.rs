// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! One channel pair of a Tabor instrument.
//!
//! A channel pair owns the segment memory, the registry of uploaded
//! programs and a cache of the sequencer tables resident on the device.
//! Segment 1 always holds the idle waveform and sequence 1 always plays it,
//! so the device has something to loop over while no program is armed.
//!
//! Operations that touch memory or tables run in configuration mode. They
//! may call each other; only the outermost call switches modes, see
//! [`TaborChannelPair::with_configuration_guard`].

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::clock::SampleClock;
use crate::device::{AwgDevice, TableEntry};
use crate::error::{
    DeviceError, Error, MemoryError, ProgramError, RegistryError, Result, ValidationError,
};
use crate::program::{make_compatible, ChannelId, Loop, SegmentConstraints};
use crate::tabor::guard::ConfigurationGuard;
use crate::tabor::instrument::SharedDevice;
use crate::tabor::memory::{Placement, SegmentMemory};
use crate::tabor::program::{TaborProgram, WaveformMode};
use crate::tabor::registry::{ProgramMemory, ProgramRegistry};
use crate::tabor::segment::{SegmentHash, SegmentSampler, TaborSegment, VoltageTransform};
use crate::validation::validate_idle_segment_length;

/// Channel pair with its memory, programs and armed state.
#[derive(Debug)]
pub struct TaborChannelPair<D: AwgDevice> {
    shared: Arc<SharedDevice<D>>,
    channels: (u8, u8),
    /// 0 for channels 1 and 2, 1 for channels 3 and 4
    index: usize,
    identifier: String,
    memory: SegmentMemory,
    registry: ProgramRegistry,
    guard: ConfigurationGuard,
    constraints: SegmentConstraints,
    idle_segment: TaborSegment,
    /// Sequencer tables last written to the device, sequence 1 first
    sequencer_tables: Vec<Vec<TableEntry>>,
    advanced_sequencer_table: Vec<TableEntry>,
}

impl<D: AwgDevice> TaborChannelPair<D> {
    /// Create the pair on `channels` and clear it.
    pub(crate) fn new(
        shared: Arc<SharedDevice<D>>,
        channels: (u8, u8),
        identifier: String,
        constraints: SegmentConstraints,
        idle_segment_length: usize,
    ) -> Result<Self> {
        let index = match channels {
            (1, 2) => 0,
            (3, 4) => 1,
            _ => {
                return Err(ValidationError::Field {
                    field: "channels".into(),
                    message: format!("{channels:?} is not (1, 2) or (3, 4)"),
                }
                .into())
            }
        };
        validate_idle_segment_length(idle_segment_length, &constraints)?;

        let total_capacity = shared.properties().total_capacity();
        let mut pair = Self {
            shared,
            channels,
            index,
            identifier,
            memory: SegmentMemory::new(total_capacity),
            registry: ProgramRegistry::new(),
            guard: ConfigurationGuard::new(),
            constraints,
            idle_segment: TaborSegment::idle(idle_segment_length),
            sequencer_tables: Vec::new(),
            advanced_sequencer_table: Vec::new(),
        };
        pair.clear()?;
        debug!(identifier = %pair.identifier, total_capacity, "Channel pair ready");
        Ok(pair)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Name of the pair, `<instrument>_AB` or `<instrument>_CD`.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Instrument channel numbers of the two outputs.
    pub fn channels(&self) -> (u8, u8) {
        self.channels
    }

    /// Segment memory bookkeeping.
    pub fn memory(&self) -> &SegmentMemory {
        &self.memory
    }

    /// Uploaded programs.
    pub fn registry(&self) -> &ProgramRegistry {
        &self.registry
    }

    /// Names of the uploaded programs.
    pub fn programs(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Compiled program registered under `name`.
    pub fn program(&self, name: &str) -> Result<&TaborProgram> {
        Ok(&self.registry.get(name)?.program)
    }

    /// Name of the armed program.
    pub fn armed_program(&self) -> Option<&str> {
        self.registry.armed()
    }

    /// Segment length constraints.
    pub fn constraints(&self) -> &SegmentConstraints {
        &self.constraints
    }

    /// The idle segment stored in slot 0.
    pub fn idle_segment(&self) -> &TaborSegment {
        &self.idle_segment
    }

    /// Sequencer tables as last written, sequence 1 first.
    pub fn sequencer_tables(&self) -> &[Vec<TableEntry>] {
        &self.sequencer_tables
    }

    /// Advanced sequencer table as last written.
    pub fn advanced_sequencer_table(&self) -> &[TableEntry] {
        &self.advanced_sequencer_table
    }

    /// Whether the pair is in configuration mode.
    pub fn is_in_config_mode(&self) -> bool {
        self.shared.in_config_mode(self.index)
    }

    /// Sample rate of the pair in samples per second.
    pub fn sample_rate(&self) -> Result<u64> {
        Ok(self.shared.sample_rate(self.channels.0)?)
    }

    /// Run `f` with exclusive access to the transport.
    pub fn with_device<R>(&self, f: impl FnOnce(&mut D) -> R) -> R {
        self.shared.with_device(f)
    }

    /// Select the first channel of the pair.
    pub fn select(&self) -> Result<()> {
        Ok(self.shared.select_channel(self.channels.0)?)
    }

    // =========================================================================
    // Configuration mode
    // =========================================================================

    /// Run `f` in configuration mode.
    ///
    /// Only the outermost call enters and leaves configuration mode. Leaving
    /// happens even when `f` fails; the error of `f` is returned in that case.
    pub fn with_configuration_guard<R>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<R> {
        if self.guard.acquire() {
            if let Err(e) = self.enter_config_mode() {
                self.guard.release();
                return Err(e);
            }
        }

        let result = f(self);

        let exited = if self.guard.release() {
            self.exit_config_mode()
        } else {
            Ok(())
        };

        match (result, exited) {
            (Err(e), Err(exit_error)) => {
                warn!(
                    identifier = %self.identifier,
                    error = %exit_error,
                    "Leaving configuration mode failed"
                );
                Err(e)
            }
            (Err(e), Ok(())) | (Ok(_), Err(e)) => Err(e),
            (Ok(value), Ok(())) => Ok(value),
        }
    }

    fn enter_config_mode(&mut self) -> Result<()> {
        if self.shared.in_config_mode(self.index) {
            return Ok(());
        }
        debug!(identifier = %self.identifier, "Entering configuration mode");

        if self.shared.is_coupled()? {
            self.shared.send_cmd(":OUTP:ALL OFF")?;
        } else {
            let (a, b) = self.channels;
            self.shared
                .send_cmd(&format!(":INST:SEL {a}; :OUTP OFF; :INST:SEL {b}; :OUTP OFF"))?;
        }
        self.set_marker_state(false)?;
        self.shared.send_cmd(":SOUR:FUNC:MODE FIX")?;
        self.shared.set_config_mode(self.index, true);
        Ok(())
    }

    fn exit_config_mode(&mut self) -> Result<()> {
        debug!(identifier = %self.identifier, "Leaving configuration mode");
        self.select()?;

        if self.shared.is_coupled()? {
            // Outputs are switched together, the sibling may still be writing.
            if !self.shared.in_config_mode(1 - self.index) {
                self.shared.send_cmd(":SOUR:FUNC:MODE ASEQ")?;
                self.shared.send_cmd(":SEQ:SEL 1")?;
                self.shared.send_cmd(":OUTP:ALL ON")?;
            }
        } else {
            let (a, b) = self.channels;
            self.shared.send_cmd(":SOUR:FUNC:MODE ASEQ")?;
            self.shared.send_cmd(":SEQ:SEL 1")?;
            self.shared
                .send_cmd(&format!(":INST:SEL {a}; :OUTP ON; :INST:SEL {b}; :OUTP ON"))?;
        }

        self.set_marker_state(true)?;
        self.shared.set_config_mode(self.index, false);
        Ok(())
    }

    // =========================================================================
    // Upload
    // =========================================================================

    /// Compile, sample and store `program` under `name`.
    ///
    /// `channels` and `markers` name the program channel played on each
    /// output and marker of the pair; `transforms` map voltages per output.
    /// With `force` an existing program of the same name is replaced. If
    /// the replacement fails before anything is written, the previous
    /// program is restored with its references and armed state. If a device
    /// write fails, the previous program is restored disarmed as long as
    /// none of its slots were overwritten.
    pub fn upload(
        &mut self,
        name: &str,
        program: Loop,
        channels: &[Option<ChannelId>],
        markers: &[Option<ChannelId>],
        transforms: &[VoltageTransform],
        force: bool,
    ) -> Result<()> {
        let chan_per_part = self.shared.properties().chan_per_part;
        for (what, count) in [
            ("channels", channels.len()),
            ("markers", markers.len()),
            ("voltage transforms", transforms.len()),
        ] {
            if count != chan_per_part {
                return Err(ProgramError::InvalidChannelAssignment(format!(
                    "expected {chan_per_part} {what}, got {count}"
                ))
                .into());
            }
        }
        let transforms: [VoltageTransform; 2] =
            transforms.to_vec().try_into().map_err(|t: Vec<_>| {
                ProgramError::InvalidChannelAssignment(format!(
                    "a channel pair has 2 outputs, got {} voltage transforms",
                    t.len()
                ))
            })?;

        self.with_configuration_guard(|pair| {
            pair.select()?;
            pair.upload_configured(name, program, channels, markers, transforms, force)
        })
    }

    fn upload_configured(
        &mut self,
        name: &str,
        mut program: Loop,
        channels: &[Option<ChannelId>],
        markers: &[Option<ChannelId>],
        transforms: [VoltageTransform; 2],
        force: bool,
    ) -> Result<()> {
        let clock = self.sample_clock()?;
        make_compatible(&mut program, &self.constraints, &clock)?;

        let previous = if self.registry.contains(name) {
            if !force {
                return Err(RegistryError::DuplicateProgramName(name.to_string()).into());
            }
            let slots = self.registry.get(name)?.waveform_to_segment.clone();
            self.memory.release(&slots)?;
            Some(self.registry.remove(name)?)
        } else {
            None
        };
        let resident = previous
            .as_ref()
            .map(|entry| self.resident_hashes(&entry.waveform_to_segment))
            .unwrap_or_default();

        let prepared = self
            .prepare_upload(program, channels, markers, transforms, clock)
            .and_then(|prepared| {
                // The placement may overwrite slots of the armed program.
                if previous.is_some() && self.registry.is_armed(name) {
                    self.change_armed_program(None)?;
                }
                Ok(prepared)
            });

        let (program, segments, placement) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                if let Some(entry) = previous {
                    self.restore_replaced(name, entry, &resident, &e)?;
                }
                return Err(e);
            }
        };

        let committed = self
            .shared
            .with_device(|device| self.memory.commit(device, &placement, &segments));
        let waveform_to_segment = match committed {
            Ok(slots) => slots,
            Err(e) => {
                if let Some(entry) = previous {
                    self.restore_replaced(name, entry, &resident, &e)?;
                }
                return Err(e);
            }
        };

        info!(
            identifier = %self.identifier,
            program = %name,
            mode = %program.mode(),
            waveforms = waveform_to_segment.len(),
            replaced = previous.is_some(),
            "Uploaded program"
        );
        self.registry.insert(
            name,
            ProgramMemory {
                waveform_to_segment,
                program,
            },
        )?;
        Ok(())
    }

    fn resident_hashes(&self, slots: &[usize]) -> Vec<Option<SegmentHash>> {
        slots
            .iter()
            .map(|&slot| self.memory.hashes().get(slot).copied().flatten())
            .collect()
    }

    /// Re-register `entry` after a failed replacement if every slot still
    /// holds the segment it held before.
    fn restore_replaced(
        &mut self,
        name: &str,
        entry: ProgramMemory,
        resident: &[Option<SegmentHash>],
        error: &Error,
    ) -> Result<()> {
        let current = self.resident_hashes(&entry.waveform_to_segment);
        if current.len() != resident.len()
            || current.iter().zip(resident).any(|(c, r)| c.is_none() || c != r)
        {
            warn!(
                identifier = %self.identifier,
                program = %name,
                error = %error,
                "Upload failed, previous program was overwritten"
            );
            return Ok(());
        }
        warn!(
            identifier = %self.identifier,
            program = %name,
            error = %error,
            "Upload failed, restoring previous program"
        );
        self.memory.reference(&entry.waveform_to_segment)?;
        self.registry.insert(name, entry)?;
        Ok(())
    }

    /// Compile, sample and place without touching the device.
    fn prepare_upload(
        &self,
        program: Loop,
        channels: &[Option<ChannelId>],
        markers: &[Option<ChannelId>],
        transforms: [VoltageTransform; 2],
        clock: SampleClock,
    ) -> Result<(TaborProgram, Vec<TaborSegment>, Placement)> {
        let program = TaborProgram::compile(program, self.shared.properties(), channels, markers)?;

        let amplitudes = [
            self.shared.amplitude(self.channels.0)? / 2.0,
            self.shared.amplitude(self.channels.1)? / 2.0,
        ];
        let mut sampler = SegmentSampler::new(clock, self.constraints, amplitudes);
        sampler.transforms = transforms;

        let (segments, _) = program.sampled_segments(&sampler)?;
        let placement = self.memory.place(&segments)?;
        Ok((program, segments, placement))
    }

    fn sample_clock(&self) -> Result<SampleClock> {
        let rate = self.shared.sample_rate(self.channels.0)?;
        SampleClock::from_samples_per_second(rate as f64).map_err(|message| {
            DeviceError::InvalidResponse {
                query: ":FREQ:RAST?".into(),
                response: message,
            }
            .into()
        })
    }

    // =========================================================================
    // Removal
    // =========================================================================

    /// Unregister `name` and release its slots.
    ///
    /// The device is disarmed first if `name` is armed. Slots keep their
    /// content until reused or cleaned up.
    pub fn free(&mut self, name: &str) -> Result<ProgramMemory> {
        let slots = self.registry.get(name)?.waveform_to_segment.clone();
        if self.registry.is_armed(name) {
            self.change_armed_program(None)?;
        }
        self.memory.release(&slots)?;
        let entry = self.registry.remove(name)?;
        info!(identifier = %self.identifier, program = %name, "Freed program");
        Ok(entry)
    }

    /// Free `name` and delete trailing unreferenced segments.
    pub fn remove(&mut self, name: &str) -> Result<()> {
        self.free(name)?;
        self.cleanup()
    }

    /// Delete unreferenced segments after the last referenced one.
    pub fn cleanup(&mut self) -> Result<()> {
        self.with_configuration_guard(|pair| {
            pair.select()?;
            pair.shared.with_device(|device| pair.memory.cleanup(device))
        })
    }

    /// Delete every program, segment and table and rearm the idle program.
    pub fn clear(&mut self) -> Result<()> {
        self.with_configuration_guard(|pair| {
            pair.select()?;
            pair.shared.with_device(|device| -> Result<()> {
                pair.memory.clear(device, &pair.idle_segment)?;
                device.send_cmd(":SOUR:SEQ:DEL:ALL")?;
                device.send_cmd(":ASEQ:DEL")?;
                Ok(())
            })?;
            pair.sequencer_tables.clear();
            pair.advanced_sequencer_table.clear();
            pair.registry.clear();
            info!(identifier = %pair.identifier, "Cleared channel pair");
            pair.change_armed_program(None)
        })
    }

    // =========================================================================
    // Arming
    // =========================================================================

    /// Arm `name`, or the idle program for `None`.
    ///
    /// Re-arming the armed program only selects sequence 1 again.
    pub fn arm(&mut self, name: Option<&str>) -> Result<()> {
        if self.registry.armed() == name {
            self.select()?;
            self.shared.send_cmd("SEQ:SEL 1")?;
            Ok(())
        } else {
            self.change_armed_program(name)
        }
    }

    /// Arm the idle program.
    pub fn disarm(&mut self) -> Result<()> {
        self.change_armed_program(None)
    }

    /// Write the tables for `name`, or the idle program for `None`.
    ///
    /// Sequence 1 is the idle sequence; the tables of the program follow.
    /// Only sequencer tables differing from the resident ones are written.
    pub fn change_armed_program(&mut self, name: Option<&str>) -> Result<()> {
        self.with_configuration_guard(|pair| {
            pair.select()?;
            pair.write_tables(name)
        })
    }

    fn write_tables(&mut self, name: Option<&str>) -> Result<()> {
        let properties = self.shared.properties();
        let (min_seq_len, min_aseq_len, max_aseq_len) = (
            properties.min_seq_len,
            properties.min_aseq_len,
            properties.max_aseq_len,
        );

        let idle_table = vec![TableEntry::new(1, 1); min_seq_len];
        let (tables, mut advanced) = match name {
            None => (vec![idle_table], vec![TableEntry::new(1, 1)]),
            Some(name) => {
                let entry = self.registry.get(name)?;
                let mut tables = vec![idle_table];
                for table in entry.program.sequencer_tables() {
                    tables.push(device_table(table, &entry.waveform_to_segment)?);
                }
                if entry.program.mode() == WaveformMode::Single {
                    if let Some(table) = tables.get_mut(1) {
                        if table.len() < min_seq_len {
                            table.resize(min_seq_len, TableEntry::new(1, 1));
                        }
                    }
                }
                let advanced = entry
                    .program
                    .advanced_sequencer_table()
                    .iter()
                    .map(|e| TableEntry {
                        element_number: e.element_number + 1,
                        ..*e
                    })
                    .collect();
                (tables, advanced)
            }
        };

        advanced.insert(0, TableEntry::with_jump(1, 1));
        if advanced.len() < min_aseq_len {
            advanced.resize(min_aseq_len, TableEntry::new(1, 1));
        }
        if advanced.len() > max_aseq_len {
            return Err(ProgramError::ConstraintInfeasible(format!(
                "advanced sequencer table has {} entries, at most {max_aseq_len} are allowed",
                advanced.len()
            ))
            .into());
        }

        let table_count = tables.len();
        let resident = &mut self.sequencer_tables;
        let written = self.shared.with_device(|device| -> Result<usize> {
            let mut written = 0;
            for (i, table) in tables.into_iter().enumerate() {
                if resident.get(i) != Some(&table) {
                    // Unknown until the download succeeds.
                    if let Some(stale) = resident.get_mut(i) {
                        stale.clear();
                    }
                    device.send_cmd(&format!("SEQ:SEL {}", i + 1))?;
                    device.download_sequencer_table(&table)?;
                    written += 1;
                }
                match resident.get_mut(i) {
                    Some(slot) => *slot = table,
                    None => resident.push(table),
                }
            }
            resident.truncate(table_count);

            device.send_cmd("SEQ:SEL 1")?;
            device.download_adv_seq_table(&advanced)?;
            Ok(written)
        })?;

        self.advanced_sequencer_table = advanced;
        self.registry.set_armed(name.map(str::to_string));
        info!(
            identifier = %self.identifier,
            program = name.unwrap_or("<idle>"),
            sequencer_tables = table_count,
            written,
            "Armed program"
        );
        Ok(())
    }

    /// Trigger the armed program.
    pub fn run_current_program(&self) -> Result<()> {
        if self.registry.armed().is_none() {
            return Err(RegistryError::NoProgramArmed.into());
        }
        self.select()?;
        Ok(self.shared.send_cmd(":TRIG")?)
    }

    // =========================================================================
    // Outputs
    // =========================================================================

    /// Switch the user markers of the pair.
    pub fn set_marker_state(&self, active: bool) -> Result<()> {
        let state = if active { "ON" } else { "OFF" };
        self.shared.send_cmd(&format!(
            ":INST:SEL {}; :SOUR:MARK:SEL 1; :SOUR:MARK:SOUR USER; :SOUR:MARK:STAT {state}",
            self.channels.0
        ))?;
        Ok(())
    }

    /// Switch output `channel` (0 or 1) of the pair.
    pub fn set_channel_state(&self, channel: usize, active: bool) -> Result<()> {
        let number = match channel {
            0 => self.channels.0,
            1 => self.channels.1,
            _ => return Err(DeviceError::InvalidChannel(channel.min(u8::MAX as usize) as u8).into()),
        };
        let state = if active { "ON" } else { "OFF" };
        self.shared
            .send_cmd(&format!(":INST:SEL {number}; :OUTP {state}"))?;
        Ok(())
    }
}

/// Replace waveform indices by 1-based segment numbers.
fn device_table(table: &[TableEntry], waveform_to_segment: &[usize]) -> Result<Vec<TableEntry>> {
    table
        .iter()
        .map(|entry| -> Result<TableEntry> {
            let waveform = entry.element_number as usize;
            let slot = waveform_to_segment
                .get(waveform)
                .ok_or(MemoryError::InvalidSlot(waveform))?;
            Ok(TableEntry {
                element_number: *slot as u64 + 1,
                ..*entry
            })
        })
        .collect()
}
