// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! In-memory AWG simulator.
//!
//! [`SimulatedDevice`] interprets the SCPI subset used by the channel pair
//! driver and keeps enough state to inspect what a real instrument would
//! hold: segment memory per channel pair, sequencer tables, the advanced
//! sequencer table, output and marker states.
//!
//! Segment memory is modelled as one linear sample buffer per channel pair.
//! A segment occupies `capacity` samples at its offset and is followed by
//! one quantum of padding. Shortening the last segment releases memory,
//! shortening any other segment only changes its length.

use std::collections::BTreeMap;

use tracing::trace;

use crate::device::{AwgDevice, DeviceProperties, TableEntry};
use crate::error::DeviceError;
use crate::tabor::segment::{split_combined_wave, SEGMENT_QUANTUM, ZERO_VOLT_CODE};

/// Output coupling of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputCoupling {
    /// DC coupled output, amplitude via `:VOLT`
    Dc,
    /// High-voltage output, amplitude via `:VOLT:HV`
    Hv,
}

/// Analog settings of one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSettings {
    /// Sample rate in samples per second
    pub sample_rate: f64,
    /// Peak-to-peak amplitude in volts
    pub amplitude: f64,
    /// DC offset in volts
    pub offset: f64,
    /// Output coupling
    pub coupling: OutputCoupling,
    /// Output enabled
    pub output: bool,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            sample_rate: 2e9,
            amplitude: 1.0,
            offset: 0.0,
            coupling: OutputCoupling::Dc,
            output: false,
        }
    }
}

/// Location of one segment in the simulated memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatedSegment {
    /// First sample
    pub offset: usize,
    /// Reserved samples
    pub capacity: usize,
    /// Declared length
    pub length: usize,
}

/// State shared by the two channels of a pair.
#[derive(Debug, Clone, Default)]
pub struct PairState {
    /// Segment table indexed by segment number - 1
    pub segments: Vec<Option<SimulatedSegment>>,
    /// Linear sample memory of channel A
    pub memory_a: Vec<u16>,
    /// Linear sample memory of channel B
    pub memory_b: Vec<u16>,
    /// Sequencer tables by sequence number
    pub sequencer_tables: BTreeMap<usize, Vec<TableEntry>>,
    /// Advanced sequencer table
    pub advanced_sequencer_table: Vec<TableEntry>,
    /// Selected segment number
    pub selected_segment: usize,
    /// Selected sequence number
    pub selected_sequence: usize,
    /// Function mode (`FIX`, `USER`, `SEQ`, `ASEQ`)
    pub function_mode: String,
    /// Marker outputs enabled
    pub markers_enabled: bool,
}

impl PairState {
    fn end_of_memory(&self) -> usize {
        self.segments
            .iter()
            .flatten()
            .map(|s| s.offset + s.capacity + SEGMENT_QUANTUM)
            .max()
            .unwrap_or(0)
    }

    fn last_segment_index(&self) -> Option<usize> {
        self.segments.iter().rposition(Option::is_some)
    }

    /// Sample data of a segment.
    pub fn segment_data(&self, segment_number: usize) -> Option<(&[u16], &[u16])> {
        let segment = self.segments.get(segment_number.checked_sub(1)?)?.as_ref()?;
        let range = segment.offset..segment.offset + segment.length;
        Some((
            self.memory_a.get(range.clone())?,
            self.memory_b.get(range)?,
        ))
    }

    /// Number of defined segments.
    pub fn segment_count(&self) -> usize {
        self.segments.iter().flatten().count()
    }

    fn ensure_memory(&mut self, end: usize) {
        if self.memory_a.len() < end {
            self.memory_a.resize(end, ZERO_VOLT_CODE);
            self.memory_b.resize(end, ZERO_VOLT_CODE);
        }
    }
}

/// In-memory AWG with four channels in two pairs.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    name: String,
    properties: DeviceProperties,
    channels: [ChannelSettings; 4],
    pairs: [PairState; 2],
    selected_channel: usize,
    coupled: bool,
    triggers: usize,
    commands: Vec<String>,
    fail_on: Option<String>,
}

impl SimulatedDevice {
    /// Create a simulator with the given limits.
    pub fn new(name: impl Into<String>, properties: DeviceProperties) -> Self {
        Self {
            name: name.into(),
            properties,
            channels: Default::default(),
            pairs: Default::default(),
            selected_channel: 1,
            coupled: false,
            triggers: 0,
            commands: Vec::new(),
            fail_on: None,
        }
    }

    /// Set the sample rate of all channels in samples per second.
    pub fn with_sample_rate(mut self, sample_rate: f64) -> Self {
        for channel in &mut self.channels {
            channel.sample_rate = sample_rate;
        }
        self
    }

    /// Set the peak-to-peak amplitude of all channels.
    pub fn with_amplitude(mut self, amplitude: f64) -> Self {
        for channel in &mut self.channels {
            channel.amplitude = amplitude;
        }
        self
    }

    /// Couple all four channels.
    pub fn with_coupling(mut self, coupled: bool) -> Self {
        self.coupled = coupled;
        self
    }

    /// Make every command starting with `prefix` fail.
    ///
    /// The prefix is compared without leading `:` and case-insensitively.
    pub fn fail_on(&mut self, prefix: Option<&str>) {
        self.fail_on = prefix.map(normalize);
    }

    /// All commands sent so far, in order.
    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    /// Forget the command log.
    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Analog settings of channel `1..=4`.
    pub fn channel(&self, channel: usize) -> Option<&ChannelSettings> {
        self.channels.get(channel.checked_sub(1)?)
    }

    /// Mutable analog settings of channel `1..=4`.
    pub fn channel_mut(&mut self, channel: usize) -> Option<&mut ChannelSettings> {
        self.channels.get_mut(channel.checked_sub(1)?)
    }

    /// State of the pair containing channel `1..=4`.
    pub fn pair(&self, channel: usize) -> &PairState {
        &self.pairs[pair_index(channel)]
    }

    /// Number of triggers received.
    pub fn triggers(&self) -> usize {
        self.triggers
    }

    /// Whether the channels are coupled.
    pub fn is_coupled(&self) -> bool {
        self.coupled
    }

    fn selected_pair(&mut self) -> &mut PairState {
        &mut self.pairs[pair_index(self.selected_channel)]
    }

    fn check_failure(&self, command: &str) -> Result<(), DeviceError> {
        match &self.fail_on {
            Some(prefix) if normalize(command).starts_with(prefix.as_str()) => {
                Err(DeviceError::CommandFailed {
                    command: command.to_string(),
                    message: "-200 execution error (simulated)".into(),
                })
            }
            _ => Ok(()),
        }
    }

    fn execute(&mut self, part: &str) -> Result<Option<String>, DeviceError> {
        let normalized = normalize(part);
        if normalized.is_empty() {
            return Ok(None);
        }
        self.check_failure(part)?;

        let (header, argument) = match normalized.split_once(' ') {
            Some((h, a)) => (h.to_string(), a.trim().to_string()),
            None => (normalized.clone(), String::new()),
        };

        if let Some(query) = header.strip_suffix('?') {
            return self.answer(query, part).map(Some);
        }

        let invalid = |message: &str| DeviceError::CommandFailed {
            command: part.to_string(),
            message: message.to_string(),
        };
        let number = |arg: &str| -> Result<usize, DeviceError> {
            arg.trim()
                .parse::<usize>()
                .map_err(|_| invalid("-104 data type error"))
        };
        let on_off = |arg: &str| -> Result<bool, DeviceError> {
            match arg {
                "ON" | "1" => Ok(true),
                "OFF" | "0" => Ok(false),
                _ => Err(invalid("-224 illegal parameter value")),
            }
        };

        match header.as_str() {
            "INST:SEL" | "INST" => {
                let channel = number(&argument)?;
                if !(1..=4).contains(&channel) {
                    return Err(invalid("-222 data out of range"));
                }
                self.selected_channel = channel;
            }
            "INST:COUP:STAT" => self.coupled = on_off(&argument)?,
            "OUTP" => {
                let state = on_off(&argument)?;
                self.channels[self.selected_channel - 1].output = state;
            }
            "OUTP:ALL" => {
                let state = on_off(&argument)?;
                for channel in &mut self.channels {
                    channel.output = state;
                }
            }
            "SOUR:MARK:SEL" | "SOUR:MARK:SOUR" => {}
            "SOUR:MARK:STAT" => {
                let state = on_off(&argument)?;
                self.selected_pair().markers_enabled = state;
            }
            "SOUR:FUNC:MODE" | "FUNC:MODE" => {
                self.selected_pair().function_mode = argument;
            }
            "FREQ:RAST" => {
                let rate: f64 = argument
                    .parse()
                    .map_err(|_| invalid("-104 data type error"))?;
                self.channels[self.selected_channel - 1].sample_rate = rate;
            }
            "VOLT" | "VOLT:HV" => {
                let amplitude: f64 = argument
                    .parse()
                    .map_err(|_| invalid("-104 data type error"))?;
                self.channels[self.selected_channel - 1].amplitude = amplitude;
            }
            "TRAC:DEF" => {
                let (number_arg, length_arg) = argument
                    .split_once(',')
                    .ok_or_else(|| invalid("-109 missing parameter"))?;
                let segment_number = number(number_arg)?;
                let length = number(length_arg)?;
                self.define_segment(segment_number, length)
                    .map_err(|m| invalid(&m))?;
            }
            "TRAC:SEL" => {
                let segment_number = number(&argument)?;
                self.selected_pair().selected_segment = segment_number;
            }
            "TRAC:MODE" => {}
            "TRAC:DEL" => {
                let segment_number = number(&argument)?;
                let pair = self.selected_pair();
                let index = segment_number
                    .checked_sub(1)
                    .filter(|&i| i < pair.segments.len() && pair.segments[i].is_some())
                    .ok_or_else(|| invalid("-222 data out of range"))?;
                pair.segments[index] = None;
                while matches!(pair.segments.last(), Some(None)) {
                    pair.segments.pop();
                }
                let end = pair.end_of_memory();
                pair.memory_a.truncate(end);
                pair.memory_b.truncate(end);
            }
            "TRAC:DEL:ALL" => {
                let pair = self.selected_pair();
                pair.segments.clear();
                pair.memory_a.clear();
                pair.memory_b.clear();
            }
            "SEQ:SEL" | "SOUR:SEQ:SEL" => {
                let sequence = number(&argument)?;
                self.selected_pair().selected_sequence = sequence;
            }
            "SEQ:DEL:ALL" | "SOUR:SEQ:DEL:ALL" => self.selected_pair().sequencer_tables.clear(),
            "ASEQ:DEL" => self.selected_pair().advanced_sequencer_table.clear(),
            "TRIG" => self.triggers += 1,
            "RES" | "*RST" => {
                let properties = self.properties.clone();
                let name = std::mem::take(&mut self.name);
                let commands = std::mem::take(&mut self.commands);
                let fail_on = self.fail_on.take();
                *self = SimulatedDevice::new(name, properties);
                self.commands = commands;
                self.fail_on = fail_on;
            }
            "ENAB" | "ABOR" | "INIT:GATE" | "INIT:CONT" | "INIT:CONT:ENAB" | "INIT:CONT:ENAB:SOUR"
            | "SOUR:SEQ:JUMP:EVEN" | "*CLS" => {}
            _ => return Err(invalid("-113 undefined header")),
        }
        Ok(None)
    }

    fn answer(&mut self, query: &str, part: &str) -> Result<String, DeviceError> {
        let channel = &self.channels[self.selected_channel - 1];
        let answer = match query {
            "INST:COUP:STAT" => if self.coupled { "ON" } else { "OFF" }.to_string(),
            "INST:SEL" | "INST" => self.selected_channel.to_string(),
            "FREQ:RAST" => format!("{}", channel.sample_rate),
            "OUTP:COUP" => match channel.coupling {
                OutputCoupling::Dc => "DC".to_string(),
                OutputCoupling::Hv => "HV".to_string(),
            },
            "VOLT" | "VOLT:HV" => format!("{}", channel.amplitude),
            "VOLT:OFFS" => format!("{}", channel.offset),
            "OUTP" => if channel.output { "ON" } else { "OFF" }.to_string(),
            "TRAC:SEL" => self.pairs[pair_index(self.selected_channel)]
                .selected_segment
                .to_string(),
            "SEQ:SEL" => self.pairs[pair_index(self.selected_channel)]
                .selected_sequence
                .to_string(),
            "SOUR:FUNC:MODE" | "FUNC:MODE" => self.pairs[pair_index(self.selected_channel)]
                .function_mode
                .clone(),
            "*OPC" => "1".to_string(),
            "SYST:ERR" => "0, no error".to_string(),
            _ => {
                return Err(DeviceError::CommandFailed {
                    command: part.to_string(),
                    message: "-113 undefined header".into(),
                })
            }
        };
        Ok(answer)
    }

    fn define_segment(&mut self, segment_number: usize, length: usize) -> Result<(), String> {
        let index = segment_number
            .checked_sub(1)
            .ok_or_else(|| "-222 data out of range".to_string())?;
        let pair = self.selected_pair();
        let last = pair.last_segment_index();

        match pair.segments.get(index).copied().flatten() {
            Some(segment) if Some(index) == last => {
                pair.segments[index] = Some(SimulatedSegment {
                    capacity: length,
                    length,
                    ..segment
                });
                pair.ensure_memory(segment.offset + length);
            }
            Some(segment) => {
                if length > segment.capacity {
                    return Err("-222 segment does not fit".into());
                }
                pair.segments[index] = Some(SimulatedSegment { length, ..segment });
            }
            None => {
                let offset = pair.end_of_memory();
                if pair.segments.len() <= index {
                    pair.segments.resize(index + 1, None);
                }
                pair.segments[index] = Some(SimulatedSegment {
                    offset,
                    capacity: length,
                    length,
                });
                pair.ensure_memory(offset + length);
            }
        }
        Ok(())
    }
}

impl AwgDevice for SimulatedDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn dev_properties(&self) -> &DeviceProperties {
        &self.properties
    }

    fn send_cmd(&mut self, command: &str) -> Result<(), DeviceError> {
        trace!(device = %self.name, command, "send_cmd");
        self.commands.push(command.to_string());
        for part in command.split(';') {
            self.execute(part)?;
        }
        Ok(())
    }

    fn send_query(&mut self, query: &str) -> Result<String, DeviceError> {
        trace!(device = %self.name, query, "send_query");
        self.commands.push(query.to_string());
        let mut answers = Vec::new();
        for part in query.split(';') {
            if let Some(answer) = self.execute(part)? {
                answers.push(answer);
            }
        }
        if answers.is_empty() {
            return Err(DeviceError::InvalidResponse {
                query: query.to_string(),
                response: String::new(),
            });
        }
        Ok(answers.join(";"))
    }

    fn send_binary_data(&mut self, prefix: &str, data: &[u16]) -> Result<(), DeviceError> {
        self.commands
            .push(format!("{prefix} <{} words>", data.len()));
        self.check_failure(prefix)?;
        let (channel_a, channel_b) = split_combined_wave(data);
        let pair = self.selected_pair();
        let segment = pair
            .selected_segment
            .checked_sub(1)
            .and_then(|i| pair.segments.get(i).copied().flatten())
            .ok_or_else(|| DeviceError::CommandFailed {
                command: prefix.to_string(),
                message: "-221 no segment selected".into(),
            })?;
        if channel_a.len() > segment.capacity {
            return Err(DeviceError::CommandFailed {
                command: prefix.to_string(),
                message: format!(
                    "-223 {} samples exceed segment capacity {}",
                    channel_a.len(),
                    segment.capacity
                ),
            });
        }
        let range = segment.offset..segment.offset + channel_a.len();
        pair.memory_a[range.clone()].copy_from_slice(&channel_a);
        pair.memory_b[range].copy_from_slice(&channel_b);
        Ok(())
    }

    fn download_segment_lengths(&mut self, lengths: &[u32]) -> Result<(), DeviceError> {
        self.commands
            .push(format!(":SEGM:DATA <{} lengths>", lengths.len()));
        self.check_failure(":SEGM:DATA")?;
        let pair = self.selected_pair();
        let mut offset = 0;
        pair.segments = lengths
            .iter()
            .map(|&length| {
                let length = length as usize;
                let segment = SimulatedSegment {
                    offset,
                    capacity: length,
                    length,
                };
                offset += length + SEGMENT_QUANTUM;
                Some(segment)
            })
            .collect();
        let end = pair.end_of_memory();
        pair.ensure_memory(end);
        Ok(())
    }

    fn download_sequencer_table(&mut self, table: &[TableEntry]) -> Result<(), DeviceError> {
        self.commands
            .push(format!(":SEQ:DATA <{} entries>", table.len()));
        self.check_failure(":SEQ:DATA")?;
        if table.len() < self.properties.min_seq_len || table.len() > self.properties.max_seq_len {
            return Err(DeviceError::CommandFailed {
                command: ":SEQ:DATA".into(),
                message: format!("-222 sequence table length {} out of range", table.len()),
            });
        }
        let pair = self.selected_pair();
        let sequence = pair.selected_sequence;
        pair.sequencer_tables.insert(sequence, table.to_vec());
        Ok(())
    }

    fn download_adv_seq_table(&mut self, table: &[TableEntry]) -> Result<(), DeviceError> {
        self.commands
            .push(format!(":ASEQ:DATA <{} entries>", table.len()));
        self.check_failure(":ASEQ:DATA")?;
        if table.len() < self.properties.min_aseq_len {
            return Err(DeviceError::CommandFailed {
                command: ":ASEQ:DATA".into(),
                message: format!("-222 advanced sequence length {} too short", table.len()),
            });
        }
        self.selected_pair().advanced_sequencer_table = table.to_vec();
        Ok(())
    }
}

fn pair_index(channel: usize) -> usize {
    if channel >= 3 {
        1
    } else {
        0
    }
}

fn normalize(command: &str) -> String {
    command.trim().trim_start_matches(':').to_ascii_uppercase()
}
