// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error types for the AWG program compiler and memory manager.

use thiserror::Error;

/// Result type alias for AWG operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
    /// Program construction or compilation error
    #[error("Program error: {0}")]
    Program(#[from] ProgramError),
    /// Segment memory error
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),
    /// Program registry error
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
    /// Device transport error
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),
    /// Input or configuration validation error
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Errors raised while building, transforming, compiling or sampling a program.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProgramError {
    /// Repetition count is not within 1e-10 of an integer
    #[error("Repetition count was not an integer: {0}")]
    NonIntegerRepetition(f64),
    /// Repetition count would drop below one
    #[error("Repetition count must be at least 1")]
    ZeroRepetition,
    /// Operation needs a parent but was applied to a root
    #[error("Loop has no parent")]
    NoParent,
    /// Location does not address a node of the tree
    #[error("Invalid loop location {0:?}")]
    InvalidLocation(Vec<usize>),
    /// No child is eligible for splitting
    #[error("There is no child with repetition count > 1{}", .0.map(|i| format!(" at index {i}")).unwrap_or_default())]
    NoSplittableChild(Option<usize>),
    /// A leaf without waveform was found where one is required
    #[error("Loop leaf has no waveform")]
    MissingWaveform,
    /// A waveform does not define channels the program needs
    #[error("Waveform does not define channels {missing:?}")]
    MissingChannels {
        /// Channels requested but not defined
        missing: Vec<String>,
    },
    /// Waveforms combined into a sequence define different channels
    #[error("Sequenced waveforms define different channels: {0}")]
    ChannelMismatch(String),
    /// Wrong number of channels, markers or transforms
    #[error("Invalid channel assignment: {0}")]
    InvalidChannelAssignment(String),
    /// Program duration cannot be quantized to the device constraints
    #[error("The program cannot be made compatible to restrictions: {0}")]
    Incompatible(String),
    /// Sequence tables cannot be reshaped into the allowed length range
    #[error("Sequence table constraints cannot be met: {0}")]
    ConstraintInfeasible(String),
    /// Waveform length is not a valid sample count
    #[error("Invalid waveform sampling: {0}")]
    SamplingDomain(String),
    /// Sampled voltage exceeds the output range
    #[error("Voltage {voltage} out of range (offset {offset}, amplitude {amplitude})")]
    VoltageOutOfRange {
        /// Offending voltage
        voltage: f64,
        /// Output offset
        offset: f64,
        /// Output amplitude
        amplitude: f64,
    },
}

/// Segment memory errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    /// Not enough free capacity in total
    #[error("Not enough free memory: required {required}, available {available}")]
    OutOfMemory {
        /// Points required including per-segment padding
        required: u64,
        /// Free points in total
        available: u64,
    },
    /// Enough capacity exists but not contiguously at the end of the table
    #[error("Fragmentation does not allow upload: required {required}, available at end {available_at_end}")]
    FragmentationOutOfMemory {
        /// Points that must be appended
        required: u64,
        /// Free points after the last referenced slot
        available_at_end: u64,
    },
    /// Slot is still referenced
    #[error("Reference count of slot {slot} is {references}, not zero")]
    SlotInUse {
        /// Slot index
        slot: usize,
        /// Current reference count
        references: u32,
    },
    /// Slot capacity is smaller than the segment
    #[error("Cannot upload segment of length {length} into slot {slot} with capacity {capacity}")]
    SlotTooSmall {
        /// Slot index
        slot: usize,
        /// Slot capacity
        capacity: u32,
        /// Segment length
        length: u32,
    },
    /// Slot index is past the end of the table
    #[error("Slot {0} does not exist")]
    InvalidSlot(usize),
}

/// Program registry errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Upload without force against an existing name
    #[error("Program '{0}' is already known")]
    DuplicateProgramName(String),
    /// Name not present in the registry
    #[error("Unknown program '{0}'")]
    UnknownProgramName(String),
    /// Run requested while only the idle program is armed
    #[error("No program active")]
    NoProgramArmed,
}

/// Device transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// Command rejected by the device
    #[error("Cannot execute command '{command}': {message}")]
    CommandFailed {
        /// Command string
        command: String,
        /// Device message
        message: String,
    },
    /// Query answer could not be parsed
    #[error("Invalid response to '{query}': {response}")]
    InvalidResponse {
        /// Query string
        query: String,
        /// Raw response
        response: String,
    },
    /// Channel number outside 1..=4
    #[error("Invalid channel: {0}")]
    InvalidChannel(u8),
    /// Transport failure
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Field validation failed
    #[error("Field '{field}': {message}")]
    Field {
        /// Field name
        field: String,
        /// What is wrong with it
        message: String,
    },
    /// A hardware limit was exceeded
    #[error("Limit exceeded for {resource}: requested {requested}, limit {limit}")]
    ResourceLimit {
        /// Limited resource
        resource: String,
        /// Maximum allowed
        limit: u64,
        /// Requested amount
        requested: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    // =========================================================================
    // Error Display tests
    // =========================================================================

    #[test]
    fn test_error_display_config() {
        let e = Error::Config("bad sample rate".into());
        assert_eq!(e.to_string(), "Configuration error: bad sample rate");
    }

    #[test]
    fn test_error_display_program() {
        let e = Error::Program(ProgramError::NoParent);
        assert_eq!(e.to_string(), "Program error: Loop has no parent");
    }

    #[test]
    fn test_error_display_memory() {
        let e = Error::Memory(MemoryError::OutOfMemory {
            required: 400,
            available: 200,
        });
        assert_eq!(
            e.to_string(),
            "Memory error: Not enough free memory: required 400, available 200"
        );
    }

    #[test]
    fn test_error_display_registry() {
        let e = Error::Registry(RegistryError::UnknownProgramName("rabi".into()));
        assert_eq!(e.to_string(), "Registry error: Unknown program 'rabi'");
    }

    #[test]
    fn test_error_display_device() {
        let e = Error::Device(DeviceError::InvalidChannel(7));
        assert_eq!(e.to_string(), "Device error: Invalid channel: 7");
    }

    #[test]
    fn test_error_display_validation() {
        let e = Error::Validation(ValidationError::Field {
            field: "quantum".into(),
            message: "must be greater than 0".into(),
        });
        assert_eq!(
            e.to_string(),
            "Validation error: Field 'quantum': must be greater than 0"
        );
    }

    #[test]
    fn test_resource_limit_display() {
        let e = ValidationError::ResourceLimit {
            resource: "sequence table length".into(),
            limit: 49152,
            requested: 50000,
        };
        assert_eq!(
            e.to_string(),
            "Limit exceeded for sequence table length: requested 50000, limit 49152"
        );
    }

    #[test]
    fn test_error_display_serialization() {
        let e = Error::Serialization("invalid yaml".into());
        assert_eq!(e.to_string(), "Serialization error: invalid yaml");
    }

    // =========================================================================
    // Nested error Display tests
    // =========================================================================

    #[test]
    fn test_no_splittable_child_display() {
        assert_eq!(
            ProgramError::NoSplittableChild(None).to_string(),
            "There is no child with repetition count > 1"
        );
        assert_eq!(
            ProgramError::NoSplittableChild(Some(3)).to_string(),
            "There is no child with repetition count > 1 at index 3"
        );
    }

    #[test]
    fn test_fragmentation_display() {
        let e = MemoryError::FragmentationOutOfMemory {
            required: 1000,
            available_at_end: 500,
        };
        assert!(e.to_string().contains("Fragmentation"));
        assert!(e.to_string().contains("500"));
    }

    #[test]
    fn test_duplicate_program_display() {
        let e = RegistryError::DuplicateProgramName("ramsey".into());
        assert_eq!(e.to_string(), "Program 'ramsey' is already known");
    }

    #[test]
    fn test_command_failed_display() {
        let e = DeviceError::CommandFailed {
            command: ":TRAC:DEF 1, 192".into(),
            message: "-222 data out of range".into(),
        };
        assert_eq!(
            e.to_string(),
            "Cannot execute command ':TRAC:DEF 1, 192': -222 data out of range"
        );
    }

    // =========================================================================
    // Error::source() and From impls
    // =========================================================================

    #[test]
    fn test_error_source_io() {
        let e = Error::Io(std::io::Error::other("disk"));
        assert!(e.source().is_some());
    }

    #[test]
    fn test_error_source_none_for_config() {
        let e = Error::Config("x".into());
        assert!(e.source().is_none());
    }

    #[test]
    fn test_from_memory_error() {
        let e: Error = MemoryError::InvalidSlot(3).into();
        assert!(matches!(e, Error::Memory(MemoryError::InvalidSlot(3))));
    }

    #[test]
    fn test_from_registry_error() {
        let e: Error = RegistryError::NoProgramArmed.into();
        assert!(matches!(e, Error::Registry(RegistryError::NoProgramArmed)));
    }

    #[test]
    fn test_from_serde_yaml_error() {
        let yaml_err = serde_yaml::from_str::<serde_yaml::Value>("{{{{").unwrap_err();
        let e: Error = yaml_err.into();
        assert!(matches!(e, Error::Serialization(_)));
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad}").unwrap_err();
        let e: Error = json_err.into();
        assert!(matches!(e, Error::Serialization(_)));
    }
}
