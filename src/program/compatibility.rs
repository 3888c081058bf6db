// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Compatibility transform.
//!
//! Rewrites a loop tree so every node that will become a hardware segment
//! has a length of at least `minimal_length` samples and a multiple of
//! `quantum` samples. Parts of the tree that cannot be represented
//! structurally are collapsed into composite waveforms.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::{checked_int_cast, is_integer, SampleClock};
use crate::error::ProgramError;
use crate::program::loop_tree::Loop;
use crate::program::waveform::{RepetitionWaveform, SequenceWaveform, WaveformRef};

/// Minimal segment length of Tabor channel pairs in samples.
pub const TABOR_MINIMAL_LENGTH: u64 = 192;

/// Segment length granularity of Tabor channel pairs in samples.
pub const TABOR_QUANTUM: u64 = 16;

/// Length constraints a segment must satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentConstraints {
    /// Minimal segment length in samples
    #[serde(default = "default_minimal_length")]
    pub minimal_length: u64,
    /// Segment length must be a multiple of this many samples
    #[serde(default = "default_quantum")]
    pub quantum: u64,
}

fn default_minimal_length() -> u64 {
    TABOR_MINIMAL_LENGTH
}

fn default_quantum() -> u64 {
    TABOR_QUANTUM
}

impl Default for SegmentConstraints {
    fn default() -> Self {
        Self {
            minimal_length: default_minimal_length(),
            quantum: default_quantum(),
        }
    }
}

impl SegmentConstraints {
    /// Whether `samples` (possibly fractional) is a valid segment length.
    pub fn conforms(&self, samples: f64) -> bool {
        is_integer(samples / self.quantum as f64) && samples >= self.minimal_length as f64
    }
}

/// Result of classifying a loop node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompatibilityLevel {
    /// Node can be played as is
    Compatible,
    /// Node total length conforms but its structure must be collapsed
    ActionRequired,
    /// Node total length can never conform
    Incompatible,
}

/// Classify `program` against `constraints` at `clock`.
pub fn classify(
    program: &Loop,
    constraints: &SegmentConstraints,
    clock: &SampleClock,
) -> CompatibilityLevel {
    let samples = match checked_int_cast(clock.samples(program.duration_ns())) {
        Some(n) => n,
        None => return CompatibilityLevel::Incompatible,
    };
    if samples < constraints.minimal_length as i64 || samples % constraints.quantum as i64 != 0 {
        return CompatibilityLevel::Incompatible;
    }

    if program.is_leaf() {
        let waveform_samples = clock.samples(program.body_duration_ns());
        if constraints.conforms(waveform_samples) {
            CompatibilityLevel::Compatible
        } else {
            CompatibilityLevel::ActionRequired
        }
    } else if program
        .children()
        .iter()
        .all(|c| classify(c, constraints, clock) == CompatibilityLevel::Compatible)
    {
        CompatibilityLevel::Compatible
    } else {
        CompatibilityLevel::ActionRequired
    }
}

/// Compose the waveform played by `program`, repetition included.
pub fn to_waveform(program: &Loop) -> Result<WaveformRef, ProgramError> {
    let body: WaveformRef = if program.is_leaf() {
        Arc::clone(program.waveform().ok_or(ProgramError::MissingWaveform)?)
    } else if program.len() == 1 {
        to_waveform(&program.children()[0])?
    } else {
        let children = program
            .children()
            .iter()
            .map(to_waveform)
            .collect::<Result<Vec<_>, _>>()?;
        Arc::new(SequenceWaveform::new(children)?)
    };

    if program.repetition_count() > 1 {
        Ok(Arc::new(RepetitionWaveform::new(
            body,
            program.repetition_count(),
        )?))
    } else {
        Ok(body)
    }
}

/// Make `program` satisfy `constraints`.
///
/// # Errors
///
/// [`ProgramError::Incompatible`] if the total program length cannot
/// conform.
pub fn make_compatible(
    program: &mut Loop,
    constraints: &SegmentConstraints,
    clock: &SampleClock,
) -> Result<(), ProgramError> {
    match classify(program, constraints, clock) {
        CompatibilityLevel::Compatible => Ok(()),
        CompatibilityLevel::ActionRequired => rewrite(program, constraints, clock),
        CompatibilityLevel::Incompatible => Err(ProgramError::Incompatible(format!(
            "{} samples at {} GHz, need a multiple of {} and at least {}",
            clock.samples(program.duration_ns()),
            clock.sample_rate_ghz,
            constraints.quantum,
            constraints.minimal_length
        ))),
    }
}

fn rewrite(
    program: &mut Loop,
    constraints: &SegmentConstraints,
    clock: &SampleClock,
) -> Result<(), ProgramError> {
    if program.is_leaf() {
        let waveform = to_waveform(program)?;
        program.set_waveform(Some(waveform));
        program.set_repetition_count(1)?;
        return Ok(());
    }

    let levels: Vec<CompatibilityLevel> = program
        .children()
        .iter()
        .map(|c| classify(c, constraints, clock))
        .collect();

    if levels.contains(&CompatibilityLevel::Incompatible) {
        let repetition_count = program.repetition_count();
        let body_conforms = constraints.conforms(clock.samples(program.body_duration_ns()));

        let waveform = if body_conforms {
            program.set_repetition_count(1)?;
            let body = to_waveform(program);
            program.set_repetition_count(repetition_count)?;
            body?
        } else {
            let folded = to_waveform(program)?;
            program.set_repetition_count(1)?;
            folded
        };
        debug!(
            children = program.len(),
            repetition_count = program.repetition_count(),
            "Collapsed loop into a single waveform"
        );
        program.set_waveform(Some(waveform));
        program.children_mut().clear();
        return Ok(());
    }

    for (child, level) in program.children_mut().iter_mut().zip(levels) {
        if level == CompatibilityLevel::ActionRequired {
            rewrite(child, constraints, clock)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::constant_waveform;

    fn clock() -> SampleClock {
        SampleClock::new(1.0).unwrap()
    }

    fn leaf(duration: f64, rep: u64) -> Loop {
        Loop::leaf(constant_waveform(duration, 0.5), rep).unwrap()
    }

    fn node(children: Vec<Loop>, rep: u64) -> Loop {
        Loop::new(children, rep).unwrap()
    }

    // =========================================================================
    // Classification
    // =========================================================================

    #[test]
    fn test_classify_compatible_leaf() {
        let c = SegmentConstraints::default();
        assert_eq!(
            classify(&leaf(192.0, 3), &c, &clock()),
            CompatibilityLevel::Compatible
        );
    }

    #[test]
    fn test_classify_short_leaf_with_repetition() {
        let c = SegmentConstraints::default();
        assert_eq!(
            classify(&leaf(64.0, 3), &c, &clock()),
            CompatibilityLevel::ActionRequired
        );
    }

    #[test]
    fn test_classify_incompatible() {
        let c = SegmentConstraints::default();
        assert_eq!(
            classify(&leaf(100.0, 1), &c, &clock()),
            CompatibilityLevel::Incompatible
        );
        assert_eq!(
            classify(&leaf(200.0, 1), &c, &clock()),
            CompatibilityLevel::Incompatible
        );
        let fractional = SampleClock::new(1.0 / 3.0).unwrap();
        assert_eq!(
            classify(&leaf(577.0, 1), &c, &fractional),
            CompatibilityLevel::Incompatible
        );
    }

    #[test]
    fn test_classify_internal_action_required() {
        let c = SegmentConstraints::default();
        let tree = node(vec![leaf(192.0, 1), leaf(96.0, 2)], 1);
        assert_eq!(classify(&tree, &c, &clock()), CompatibilityLevel::ActionRequired);
    }

    // =========================================================================
    // to_waveform
    // =========================================================================

    #[test]
    fn test_to_waveform_preserves_duration() {
        let tree = node(vec![leaf(16.0, 2), node(vec![leaf(32.0, 1)], 3)], 2);
        let wf = to_waveform(&tree).unwrap();
        assert_eq!(wf.duration_ns(), tree.duration_ns());
    }

    #[test]
    fn test_to_waveform_missing_waveform() {
        let tree = node(vec![Loop::root()], 1);
        assert_eq!(
            to_waveform(&tree).unwrap_err(),
            ProgramError::MissingWaveform
        );
    }

    // =========================================================================
    // make_compatible
    // =========================================================================

    #[test]
    fn test_make_compatible_noop() {
        let c = SegmentConstraints::default();
        let mut tree = node(vec![leaf(192.0, 1), leaf(208.0, 4)], 1);
        let before = tree.clone();
        make_compatible(&mut tree, &c, &clock()).unwrap();
        assert_eq!(tree, before);
    }

    #[test]
    fn test_make_compatible_incompatible_program() {
        let c = SegmentConstraints::default();
        let mut tree = node(vec![leaf(100.0, 1)], 1);
        assert!(matches!(
            make_compatible(&mut tree, &c, &clock()),
            Err(ProgramError::Incompatible(_))
        ));
    }

    #[test]
    fn test_make_compatible_leaf_collapses_repetition() {
        let c = SegmentConstraints::default();
        let mut tree = node(vec![leaf(192.0, 1), leaf(64.0, 3)], 1);
        make_compatible(&mut tree, &c, &clock()).unwrap();
        let collapsed = &tree.children()[1];
        assert_eq!(collapsed.repetition_count(), 1);
        assert_eq!(collapsed.waveform().unwrap().duration_ns(), 192.0);
        assert_eq!(tree.children()[0].repetition_count(), 1);
        assert_eq!(tree.duration_ns(), 384.0);
    }

    #[test]
    fn test_make_compatible_keeps_repetition_when_body_conforms() {
        let c = SegmentConstraints::default();
        let inner = node(vec![leaf(100.0, 1), leaf(92.0, 1)], 2);
        let mut tree = node(vec![leaf(192.0, 1), inner], 1);
        make_compatible(&mut tree, &c, &clock()).unwrap();
        let collapsed = &tree.children()[1];
        assert!(collapsed.is_leaf());
        assert_eq!(collapsed.repetition_count(), 2);
        assert_eq!(collapsed.waveform().unwrap().duration_ns(), 192.0);
        assert_eq!(tree.duration_ns(), 576.0);
    }

    #[test]
    fn test_make_compatible_folds_repetition_when_body_too_short() {
        let c = SegmentConstraints::default();
        let inner = node(vec![leaf(40.0, 1), leaf(24.0, 1)], 3);
        let mut tree = node(vec![leaf(192.0, 1), inner], 1);
        make_compatible(&mut tree, &c, &clock()).unwrap();
        let collapsed = &tree.children()[1];
        assert!(collapsed.is_leaf());
        assert_eq!(collapsed.repetition_count(), 1);
        assert_eq!(collapsed.waveform().unwrap().duration_ns(), 192.0);
        assert_eq!(tree.duration_ns(), 384.0);
    }

    #[test]
    fn test_make_compatible_leaves_compatible_siblings_untouched() {
        let c = SegmentConstraints::default();
        let good = node(vec![leaf(192.0, 2), leaf(208.0, 1)], 5);
        let bad = node(vec![leaf(40.0, 1), leaf(24.0, 1)], 3);
        let mut tree = node(vec![good.clone(), bad], 1);
        make_compatible(&mut tree, &c, &clock()).unwrap();
        assert_eq!(tree.children()[0], good);
    }

    #[test]
    fn test_make_compatible_root_collapse() {
        let c = SegmentConstraints::default();
        let mut tree = node(vec![leaf(100.0, 1), leaf(92.0, 1)], 4);
        make_compatible(&mut tree, &c, &clock()).unwrap();
        assert!(tree.is_leaf());
        assert_eq!(tree.repetition_count(), 4);
        assert_eq!(tree.duration_ns(), 768.0);
    }
}
