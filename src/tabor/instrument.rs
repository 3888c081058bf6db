// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Tabor instrument with two channel pairs.
//!
//! [`TaborAwg`] owns the transport behind a [`SharedDevice`] and hands a
//! clone of it to each [`TaborChannelPair`]. All SCPI traffic goes through
//! the shared handle, which serializes access with a mutex.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::device::{AwgDevice, DeviceProperties};
use crate::error::{DeviceError, Result, ValidationError};
use crate::program::SegmentConstraints;
use crate::tabor::channel_pair::TaborChannelPair;

/// Commands sent to each channel pair on initialization.
const INITIALIZATION_COMMANDS: &str = ":INIT:GATE OFF; :INIT:CONT ON; :INIT:CONT:ENAB SELF; \
     :INIT:CONT:ENAB:SOUR BUS; :SOUR:MARK:SOUR USER; :SOUR:SEQ:JUMP:EVEN BUS ";

/// Length of the idle segment in samples.
pub const DEFAULT_IDLE_SEGMENT_LENGTH: usize = 192;

/// Transport shared by the instrument and its channel pairs.
pub struct SharedDevice<D> {
    device: Mutex<D>,
    properties: DeviceProperties,
    identifier: String,
    /// Configuration mode per channel pair
    config_mode: [AtomicBool; 2],
}

impl<D: AwgDevice> SharedDevice<D> {
    fn new(device: D, identifier: String) -> Self {
        let properties = device.dev_properties().clone();
        Self {
            device: Mutex::new(device),
            properties,
            identifier,
            config_mode: [AtomicBool::new(false), AtomicBool::new(false)],
        }
    }

    /// Hardware limits.
    pub fn properties(&self) -> &DeviceProperties {
        &self.properties
    }

    /// Instrument identifier.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Run `f` with exclusive access to the transport.
    ///
    /// `f` must not call back into this handle.
    pub fn with_device<R>(&self, f: impl FnOnce(&mut D) -> R) -> R {
        let mut device = self.device.lock();
        f(&mut device)
    }

    /// Send one or more commands.
    pub fn send_cmd(&self, command: &str) -> std::result::Result<(), DeviceError> {
        self.device.lock().send_cmd(command)
    }

    /// Send a query.
    pub fn send_query(&self, query: &str) -> std::result::Result<String, DeviceError> {
        self.device.lock().send_query(query)
    }

    /// Select channel `1..=4`.
    pub fn select_channel(&self, channel: u8) -> std::result::Result<(), DeviceError> {
        check_channel(channel)?;
        self.send_cmd(&format!(":INST:SEL {channel}"))
    }

    /// Select marker `1..=2` of the selected channel.
    pub fn select_marker(&self, marker: u8) -> Result<()> {
        if !(1..=2).contains(&marker) {
            return Err(ValidationError::Field {
                field: "marker".into(),
                message: format!("{marker} is not 1 or 2"),
            }
            .into());
        }
        Ok(self.send_cmd(&format!(":SOUR:MARK:SEL {marker}"))?)
    }

    /// Sample rate of `channel` in samples per second.
    pub fn sample_rate(&self, channel: u8) -> std::result::Result<u64, DeviceError> {
        check_channel(channel)?;
        let query = format!(":INST:SEL {channel}; :FREQ:RAST?");
        let response = self.send_query(&query)?;
        Ok(parse_float(&query, &response)?.trunc() as u64)
    }

    /// Peak-to-peak amplitude of `channel` for its output coupling.
    pub fn amplitude(&self, channel: u8) -> std::result::Result<f64, DeviceError> {
        check_channel(channel)?;
        let mut device = self.device.lock();
        let coupling_query = format!(":INST:SEL {channel}; :OUTP:COUP?");
        let coupling = device.send_query(&coupling_query)?;
        let query = match coupling.trim() {
            "DC" => ":VOLT?",
            "HV" => ":VOLT:HV?",
            other => {
                return Err(DeviceError::InvalidResponse {
                    query: coupling_query,
                    response: other.to_string(),
                })
            }
        };
        let response = device.send_query(query)?;
        parse_float(query, &response)
    }

    /// Offset of `channel` in volts.
    pub fn offset(&self, channel: u8) -> std::result::Result<f64, DeviceError> {
        check_channel(channel)?;
        let query = format!(":INST:SEL {channel}; :VOLT:OFFS?");
        let response = self.send_query(&query)?;
        parse_float(&query, &response)
    }

    /// Whether all four channels are coupled.
    pub fn is_coupled(&self) -> std::result::Result<bool, DeviceError> {
        Ok(self.send_query(":INST:COUP:STAT?")?.trim() == "ON")
    }

    /// Whether channel pair `pair` is in configuration mode.
    pub fn in_config_mode(&self, pair: usize) -> bool {
        self.config_mode
            .get(pair)
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    pub(crate) fn set_config_mode(&self, pair: usize, active: bool) {
        if let Some(flag) = self.config_mode.get(pair) {
            flag.store(active, Ordering::SeqCst);
        }
    }
}

impl<D> std::fmt::Debug for SharedDevice<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedDevice")
            .field("identifier", &self.identifier)
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}

fn check_channel(channel: u8) -> std::result::Result<(), DeviceError> {
    if (1..=4).contains(&channel) {
        Ok(())
    } else {
        Err(DeviceError::InvalidChannel(channel))
    }
}

fn parse_float(query: &str, response: &str) -> std::result::Result<f64, DeviceError> {
    response
        .trim()
        .parse::<f64>()
        .map_err(|_| DeviceError::InvalidResponse {
            query: query.to_string(),
            response: response.to_string(),
        })
}

/// Options for connecting to an instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentOptions {
    /// Name used in logs and as prefix of the channel pair names
    #[serde(default = "default_identifier")]
    pub identifier: String,

    /// Send `:RES` before initialization
    #[serde(default)]
    pub reset: bool,

    /// Segment length constraints
    #[serde(default)]
    pub constraints: SegmentConstraints,

    /// Length of the idle segment in samples
    #[serde(default = "default_idle_segment_length")]
    pub idle_segment_length: usize,
}

fn default_identifier() -> String {
    "tabor".to_string()
}

fn default_idle_segment_length() -> usize {
    DEFAULT_IDLE_SEGMENT_LENGTH
}

impl Default for InstrumentOptions {
    fn default() -> Self {
        Self {
            identifier: default_identifier(),
            reset: false,
            constraints: SegmentConstraints::default(),
            idle_segment_length: default_idle_segment_length(),
        }
    }
}

/// Four channel Tabor AWG.
#[derive(Debug)]
pub struct TaborAwg<D: AwgDevice> {
    shared: Arc<SharedDevice<D>>,
    channel_pair_ab: TaborChannelPair<D>,
    channel_pair_cd: TaborChannelPair<D>,
}

impl<D: AwgDevice> TaborAwg<D> {
    /// Initialize `device` and clear both channel pairs.
    #[instrument(skip(device), fields(identifier = %options.identifier))]
    pub fn connect(device: D, options: &InstrumentOptions) -> Result<Self> {
        info!(device = %device.name(), "Connecting to AWG");
        let shared = Arc::new(SharedDevice::new(device, options.identifier.clone()));
        if options.reset {
            shared.send_cmd(":RES")?;
        }
        initialize(&shared)?;

        let channel_pair_ab = TaborChannelPair::new(
            Arc::clone(&shared),
            (1, 2),
            format!("{}_AB", options.identifier),
            options.constraints,
            options.idle_segment_length,
        )?;
        let channel_pair_cd = TaborChannelPair::new(
            Arc::clone(&shared),
            (3, 4),
            format!("{}_CD", options.identifier),
            options.constraints,
            options.idle_segment_length,
        )?;

        info!("AWG ready");
        Ok(Self {
            shared,
            channel_pair_ab,
            channel_pair_cd,
        })
    }

    /// Instrument identifier.
    pub fn identifier(&self) -> &str {
        self.shared.identifier()
    }

    /// Hardware limits.
    pub fn properties(&self) -> &DeviceProperties {
        self.shared.properties()
    }

    /// Channels 1 and 2.
    pub fn channel_pair_ab(&self) -> &TaborChannelPair<D> {
        &self.channel_pair_ab
    }

    /// Channels 1 and 2, mutable.
    pub fn channel_pair_ab_mut(&mut self) -> &mut TaborChannelPair<D> {
        &mut self.channel_pair_ab
    }

    /// Channels 3 and 4.
    pub fn channel_pair_cd(&self) -> &TaborChannelPair<D> {
        &self.channel_pair_cd
    }

    /// Channels 3 and 4, mutable.
    pub fn channel_pair_cd_mut(&mut self) -> &mut TaborChannelPair<D> {
        &mut self.channel_pair_cd
    }

    /// Both channel pairs, mutable.
    pub fn channel_pairs_mut(&mut self) -> (&mut TaborChannelPair<D>, &mut TaborChannelPair<D>) {
        (&mut self.channel_pair_ab, &mut self.channel_pair_cd)
    }

    /// Channel pair by name suffix (`AB` or `CD`).
    pub fn channel_pair_mut(&mut self, pair: &str) -> Result<&mut TaborChannelPair<D>> {
        match pair.to_ascii_uppercase().as_str() {
            "AB" => Ok(&mut self.channel_pair_ab),
            "CD" => Ok(&mut self.channel_pair_cd),
            _ => Err(ValidationError::Field {
                field: "channel_pair".into(),
                message: format!("'{pair}' is not AB or CD"),
            }
            .into()),
        }
    }

    /// Run `f` with exclusive access to the transport.
    pub fn with_device<R>(&self, f: impl FnOnce(&mut D) -> R) -> R {
        self.shared.with_device(f)
    }

    /// Send the initialization commands to both channel pairs.
    pub fn initialize(&self) -> Result<()> {
        initialize(&self.shared)
    }

    /// Reset the instrument and clear both channel pairs.
    pub fn reset(&mut self) -> Result<()> {
        info!(identifier = %self.identifier(), "Resetting AWG");
        self.shared.send_cmd(":RES")?;
        initialize(&self.shared)?;
        self.channel_pair_ab.clear()?;
        self.channel_pair_cd.clear()
    }

    /// Send a bus trigger.
    pub fn trigger(&self) -> Result<()> {
        Ok(self.shared.send_cmd(":TRIG")?)
    }

    /// Enable the outputs of the selected channel.
    pub fn enable(&self) -> Result<()> {
        Ok(self.shared.send_cmd(":ENAB")?)
    }

    /// Abort the running sequence.
    pub fn abort(&self) -> Result<()> {
        Ok(self.shared.send_cmd(":ABOR")?)
    }

    /// Select channel `1..=4`.
    pub fn select_channel(&self, channel: u8) -> Result<()> {
        Ok(self.shared.select_channel(channel)?)
    }

    /// Select marker `1..=2`.
    pub fn select_marker(&self, marker: u8) -> Result<()> {
        self.shared.select_marker(marker)
    }

    /// Sample rate of `channel` in samples per second.
    pub fn sample_rate(&self, channel: u8) -> Result<u64> {
        Ok(self.shared.sample_rate(channel)?)
    }

    /// Peak-to-peak amplitude of `channel`.
    pub fn amplitude(&self, channel: u8) -> Result<f64> {
        Ok(self.shared.amplitude(channel)?)
    }

    /// Offset of `channel`.
    pub fn offset(&self, channel: u8) -> Result<f64> {
        Ok(self.shared.offset(channel)?)
    }
}

fn initialize<D: AwgDevice>(shared: &SharedDevice<D>) -> Result<()> {
    debug!(identifier = %shared.identifier(), "Initializing channel pairs");
    shared.with_device(|device| -> std::result::Result<(), DeviceError> {
        device.send_cmd(":INST:SEL 1")?;
        device.send_cmd(INITIALIZATION_COMMANDS)?;
        device.send_cmd(":INST:SEL 3")?;
        device.send_cmd(INITIALIZATION_COMMANDS)
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{MirroredDevice, OutputCoupling, SimulatedDevice, TableEntry};
    use crate::error::Error;
    use crate::program::Loop;
    use crate::tabor::segment::identity_transform;
    use crate::test_utils::{constant_waveform, pair_channels, simulated_awg, simulator};

    // =========================================================================
    // Connection tests
    // =========================================================================

    #[test]
    fn test_connect_initializes_both_pairs() {
        let awg = simulated_awg();
        awg.with_device(|device| {
            let commands = device.commands();
            assert_eq!(commands[0], ":INST:SEL 1");
            assert!(commands[1].starts_with(":INIT:GATE OFF"));
            assert_eq!(commands[2], ":INST:SEL 3");
            assert!(!commands.iter().any(|c| c == ":RES"));

            for channel in [1, 3] {
                let pair = device.pair(channel);
                assert_eq!(pair.segment_count(), 1);
                assert_eq!(pair.function_mode, "ASEQ");
                assert!(pair.markers_enabled);
                assert_eq!(
                    pair.advanced_sequencer_table,
                    vec![
                        TableEntry::with_jump(1, 1),
                        TableEntry::new(1, 1),
                        TableEntry::new(1, 1)
                    ]
                );
            }
            for channel in 1..=4 {
                assert!(device.channel(channel).unwrap().output);
            }
        });
        assert_eq!(awg.channel_pair_ab().identifier(), "tabor_AB");
        assert_eq!(awg.channel_pair_cd().identifier(), "tabor_CD");
    }

    #[test]
    fn test_connect_with_reset() {
        let options = InstrumentOptions {
            reset: true,
            ..Default::default()
        };
        let awg = TaborAwg::connect(simulator(), &options).unwrap();
        awg.with_device(|device| assert_eq!(device.commands()[0], ":RES"));
    }

    #[test]
    fn test_reset_clears_programs() {
        let mut awg = simulated_awg();
        let (channels, markers) = pair_channels();
        let program = Loop::leaf(constant_waveform(192.0, 0.1), 1).unwrap();
        awg.channel_pair_ab_mut()
            .upload(
                "p",
                program,
                &channels,
                &markers,
                &[identity_transform(), identity_transform()],
                false,
            )
            .unwrap();
        awg.reset().unwrap();
        assert!(awg.channel_pair_ab().programs().is_empty());
        assert_eq!(awg.channel_pair_ab().memory().len(), 1);
    }

    // =========================================================================
    // Query tests
    // =========================================================================

    #[test]
    fn test_queries() {
        let awg = simulated_awg();
        assert_eq!(awg.sample_rate(1).unwrap(), 1_000_000_000);
        assert_eq!(awg.amplitude(2).unwrap(), 1.0);
        assert_eq!(awg.offset(3).unwrap(), 0.0);
    }

    #[test]
    fn test_amplitude_follows_coupling() {
        let awg = simulated_awg();
        awg.with_device(|device| {
            let channel = device.channel_mut(2).unwrap();
            channel.coupling = OutputCoupling::Hv;
            channel.amplitude = 4.0;
            device.clear_commands();
        });
        assert_eq!(awg.amplitude(2).unwrap(), 4.0);
        awg.with_device(|device| assert_eq!(device.commands()[1], ":VOLT:HV?"));
    }

    #[test]
    fn test_invalid_channel() {
        let awg = simulated_awg();
        assert!(matches!(
            awg.sample_rate(5),
            Err(Error::Device(DeviceError::InvalidChannel(5)))
        ));
        assert!(matches!(
            awg.select_channel(0),
            Err(Error::Device(DeviceError::InvalidChannel(0)))
        ));
    }

    #[test]
    fn test_select_marker() {
        let awg = simulated_awg();
        awg.select_marker(2).unwrap();
        assert!(matches!(awg.select_marker(3), Err(Error::Validation(_))));
    }

    #[test]
    fn test_simple_commands() {
        let awg = simulated_awg();
        awg.with_device(|device| device.clear_commands());
        awg.enable().unwrap();
        awg.abort().unwrap();
        awg.trigger().unwrap();
        awg.with_device(|device| {
            assert_eq!(device.commands(), &[":ENAB", ":ABOR", ":TRIG"]);
            assert_eq!(device.triggers(), 1);
        });
    }

    #[test]
    fn test_channel_pair_by_name() {
        let mut awg = simulated_awg();
        assert_eq!(awg.channel_pair_mut("cd").unwrap().identifier(), "tabor_CD");
        assert!(awg.channel_pair_mut("EF").is_err());
    }

    #[test]
    fn test_mirrored_upload_reaches_all_devices() {
        let device = MirroredDevice::new(simulator(), vec![simulator()]);
        let mut awg = TaborAwg::connect(device, &InstrumentOptions::default()).unwrap();
        let (channels, markers) = pair_channels();
        let program = Loop::leaf(constant_waveform(192.0, 0.1), 1).unwrap();
        awg.channel_pair_ab_mut()
            .upload(
                "p",
                program,
                &channels,
                &markers,
                &[identity_transform(), identity_transform()],
                false,
            )
            .unwrap();
        awg.with_device(|device| {
            for simulated in device.all() {
                assert_eq!(simulated.pair(1).segment_count(), 2);
            }
        });
    }

    #[test]
    fn test_options_deserialize_defaults() {
        let options: InstrumentOptions = serde_yaml::from_str("identifier: lab").unwrap();
        assert_eq!(options.identifier, "lab");
        assert_eq!(options.idle_segment_length, DEFAULT_IDLE_SEGMENT_LENGTH);
        assert!(!options.reset);
    }

    fn assert_send<T: Send>() {}

    #[test]
    fn test_awg_is_send() {
        assert_send::<TaborAwg<SimulatedDevice>>();
    }
}
