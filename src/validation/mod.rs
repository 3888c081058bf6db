// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Input validation for device limits, sampling settings and channel
//! assignments.

use crate::device::DeviceProperties;
use crate::error::{Result, ValidationError};
use crate::program::{ChannelId, SegmentConstraints};

/// Outputs per channel pair.
pub const CHANNELS_PER_PAIR: usize = 2;

/// Validate hardware limits before they are used for compilation.
pub fn validate_device_properties(properties: &DeviceProperties) -> Result<()> {
    if properties.chan_per_part != CHANNELS_PER_PAIR {
        return Err(ValidationError::Field {
            field: "chan_per_part".into(),
            message: format!(
                "channel pairs have {} outputs, got {}",
                CHANNELS_PER_PAIR, properties.chan_per_part
            ),
        }
        .into());
    }

    if properties.min_seq_len == 0 {
        return Err(ValidationError::Field {
            field: "min_seq_len".into(),
            message: "must be greater than 0".into(),
        }
        .into());
    }

    if properties.max_seq_len < properties.min_seq_len {
        return Err(ValidationError::Field {
            field: "max_seq_len".into(),
            message: format!(
                "{} is smaller than min_seq_len {}",
                properties.max_seq_len, properties.min_seq_len
            ),
        }
        .into());
    }

    if properties.min_aseq_len == 0 {
        return Err(ValidationError::Field {
            field: "min_aseq_len".into(),
            message: "must be greater than 0".into(),
        }
        .into());
    }

    // One entry is always taken by the idle sequence.
    if properties.max_aseq_len < properties.min_aseq_len.max(2) {
        return Err(ValidationError::Field {
            field: "max_aseq_len".into(),
            message: format!(
                "{} leaves no room next to the idle entry and min_aseq_len {}",
                properties.max_aseq_len, properties.min_aseq_len
            ),
        }
        .into());
    }

    if properties.max_arb_mem == 0 {
        return Err(ValidationError::Field {
            field: "max_arb_mem".into(),
            message: "must be greater than 0".into(),
        }
        .into());
    }

    Ok(())
}

/// Validate segment length constraints.
pub fn validate_segment_constraints(constraints: &SegmentConstraints) -> Result<()> {
    if constraints.quantum == 0 {
        return Err(ValidationError::Field {
            field: "quantum".into(),
            message: "must be greater than 0".into(),
        }
        .into());
    }

    if constraints.minimal_length == 0 {
        return Err(ValidationError::Field {
            field: "minimal_length".into(),
            message: "must be greater than 0".into(),
        }
        .into());
    }

    if constraints.minimal_length % constraints.quantum != 0 {
        return Err(ValidationError::Field {
            field: "minimal_length".into(),
            message: format!(
                "{} is not a multiple of the quantum {}",
                constraints.minimal_length, constraints.quantum
            ),
        }
        .into());
    }

    Ok(())
}

/// Validate the length of the idle segment against `constraints`.
pub fn validate_idle_segment_length(length: usize, constraints: &SegmentConstraints) -> Result<()> {
    validate_segment_constraints(constraints)?;
    let length = length as u64;
    if length < constraints.minimal_length || length % constraints.quantum != 0 {
        return Err(ValidationError::Field {
            field: "idle_segment_length".into(),
            message: format!(
                "{} is shorter than {} or not a multiple of {}",
                length, constraints.minimal_length, constraints.quantum
            ),
        }
        .into());
    }
    Ok(())
}

/// Validate the idle segment fits the memory of one channel pair.
pub fn validate_memory_capacity(properties: &DeviceProperties, idle_segment_length: usize) -> Result<()> {
    let required = idle_segment_length as u64 + crate::tabor::memory::SEGMENT_PADDING;
    if required > properties.total_capacity() {
        return Err(ValidationError::ResourceLimit {
            resource: "segment memory".into(),
            limit: properties.total_capacity(),
            requested: required,
        }
        .into());
    }
    Ok(())
}

/// Validate program channels assigned to the outputs and markers of a pair.
pub fn validate_channel_assignment(
    channels: &[Option<ChannelId>],
    markers: &[Option<ChannelId>],
) -> Result<()> {
    for (field, assignment) in [("channels", channels), ("markers", markers)] {
        if assignment.len() != CHANNELS_PER_PAIR {
            return Err(ValidationError::Field {
                field: field.into(),
                message: format!(
                    "expected {} entries, got {}",
                    CHANNELS_PER_PAIR,
                    assignment.len()
                ),
            }
            .into());
        }
        if let Some(i) = assignment
            .iter()
            .position(|c| c.as_deref().is_some_and(|name| name.trim().is_empty()))
        {
            return Err(ValidationError::Field {
                field: field.into(),
                message: format!("empty channel name at index {}", i),
            }
            .into());
        }
    }
    Ok(())
}

/// Validate analog output settings of a channel.
pub fn validate_output_settings(sample_rate: f64, amplitude: f64, offset: f64) -> Result<()> {
    if !(sample_rate.is_finite() && sample_rate > 0.0) {
        return Err(ValidationError::Field {
            field: "sample_rate".into(),
            message: format!("must be positive, got {}", sample_rate),
        }
        .into());
    }

    if !(amplitude.is_finite() && amplitude > 0.0) {
        return Err(ValidationError::Field {
            field: "amplitude".into(),
            message: format!("must be positive, got {}", amplitude),
        }
        .into());
    }

    if !offset.is_finite() {
        return Err(ValidationError::Field {
            field: "offset".into(),
            message: format!("must be finite, got {}", offset),
        }
        .into());
    }

    Ok(())
}
