// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Program compiler.
//!
//! Turns a compatible loop tree into the tables a Tabor channel pair plays:
//!
//! - **Single mode** (tree depth ≤ 1): one sequencer table with one entry per
//!   top-level child and a one-entry advanced sequencer table.
//! - **Advanced mode** (tree depth > 1): the tree is flattened to depth two.
//!   Every second-level node becomes a sequencer table, the root's children
//!   become the advanced sequencer table.
//!
//! Sequencer tables must hold between `min_seq_len` and `max_seq_len`
//! entries. Short tables are repaired by merging neighbors, unrolling
//! repetitions or borrowing one repetition from a neighbor.

use std::collections::BTreeSet;
use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::debug;

use crate::device::{DeviceProperties, TableEntry};
use crate::error::ProgramError;
use crate::program::loop_tree::Loop;
use crate::program::waveform::{
    content_key, subset_for_channels, ChannelId, WaveformKey, WaveformRef,
};
use crate::tabor::segment::{SegmentSampler, TaborSegment};

/// Sequencing mode of a compiled program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WaveformMode {
    /// One sequencer table
    Single,
    /// Several sequencer tables selected by the advanced sequencer table
    Advanced,
}

impl fmt::Display for WaveformMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaveformMode::Single => write!(f, "single"),
            WaveformMode::Advanced => write!(f, "advanced"),
        }
    }
}

/// A program compiled for one channel pair.
///
/// Sequencer table entries hold 0-based indices into [`waveforms`];
/// advanced sequencer table entries hold 1-based sequencer table numbers.
///
/// [`waveforms`]: TaborProgram::waveforms
#[derive(Debug, Clone)]
pub struct TaborProgram {
    program: Loop,
    mode: WaveformMode,
    channels: Vec<Option<ChannelId>>,
    markers: Vec<Option<ChannelId>>,
    used_channels: BTreeSet<ChannelId>,
    waveforms: Vec<WaveformRef>,
    sequencer_tables: Vec<Vec<TableEntry>>,
    advanced_sequencer_table: Vec<TableEntry>,
}

impl TaborProgram {
    /// Compile `program` for a channel pair playing `channels` on its two
    /// outputs and `markers` on its two markers.
    ///
    /// # Errors
    ///
    /// - [`ProgramError::InvalidChannelAssignment`] if the number of channels
    ///   or markers differs from `chan_per_part`
    /// - [`ProgramError::MissingChannels`] if a waveform lacks a used channel
    /// - [`ProgramError::ConstraintInfeasible`] if the sequencer tables cannot
    ///   be brought into the allowed length range
    pub fn compile(
        mut program: Loop,
        properties: &DeviceProperties,
        channels: &[Option<ChannelId>],
        markers: &[Option<ChannelId>],
    ) -> Result<Self, ProgramError> {
        if channels.len() != properties.chan_per_part {
            return Err(ProgramError::InvalidChannelAssignment(format!(
                "expected {} channels, got {}",
                properties.chan_per_part,
                channels.len()
            )));
        }
        if markers.len() != properties.chan_per_part {
            return Err(ProgramError::InvalidChannelAssignment(format!(
                "expected {} markers, got {}",
                properties.chan_per_part,
                markers.len()
            )));
        }
        let used_channels: BTreeSet<ChannelId> =
            channels.iter().chain(markers).flatten().cloned().collect();

        if program.repetition_count() > 1 {
            program.encapsulate();
        }

        let mut waveforms = IndexMap::new();
        let (mode, sequencer_tables, advanced_sequencer_table) = if program.depth() > 1 {
            program.flatten_and_balance(2);
            repair_sequence_tables(&mut program, properties)?;

            let mut sequencer_tables: Vec<Vec<TableEntry>> = Vec::new();
            let mut advanced_sequencer_table = Vec::with_capacity(program.len());
            for node in program.children() {
                let table = sequencer_table(node, &used_channels, &mut waveforms)?;
                let sequence_number = match sequencer_tables.iter().position(|t| *t == table) {
                    Some(index) => index + 1,
                    None => {
                        sequencer_tables.push(table);
                        sequencer_tables.len()
                    }
                };
                advanced_sequencer_table.push(TableEntry::new(
                    node.repetition_count(),
                    sequence_number as u64,
                ));
            }
            (
                WaveformMode::Advanced,
                sequencer_tables,
                advanced_sequencer_table,
            )
        } else {
            if program.depth() == 0 {
                program.encapsulate();
            }
            if program.len() > properties.max_seq_len {
                return Err(ProgramError::ConstraintInfeasible(format!(
                    "{} entries exceed the maximal sequencer table length {}",
                    program.len(),
                    properties.max_seq_len
                )));
            }
            let table = sequencer_table(&program, &used_channels, &mut waveforms)?;
            (
                WaveformMode::Single,
                vec![table],
                vec![TableEntry::new(program.repetition_count(), 1)],
            )
        };

        debug!(
            mode = %mode,
            waveforms = waveforms.len(),
            sequencer_tables = sequencer_tables.len(),
            "Compiled program"
        );

        Ok(Self {
            program,
            mode,
            channels: channels.to_vec(),
            markers: markers.to_vec(),
            used_channels,
            waveforms: waveforms.into_values().collect(),
            sequencer_tables,
            advanced_sequencer_table,
        })
    }

    /// The restructured loop tree.
    pub fn program(&self) -> &Loop {
        &self.program
    }

    /// Sequencing mode.
    pub fn mode(&self) -> WaveformMode {
        self.mode
    }

    /// Channel played on each output.
    pub fn channels(&self) -> &[Option<ChannelId>] {
        &self.channels
    }

    /// Channel driving each marker.
    pub fn markers(&self) -> &[Option<ChannelId>] {
        &self.markers
    }

    /// All assigned channels and markers.
    pub fn used_channels(&self) -> &BTreeSet<ChannelId> {
        &self.used_channels
    }

    /// Distinct waveforms in first-use order.
    pub fn waveforms(&self) -> &[WaveformRef] {
        &self.waveforms
    }

    /// Sequencer tables referencing waveform indices.
    pub fn sequencer_tables(&self) -> &[Vec<TableEntry>] {
        &self.sequencer_tables
    }

    /// Advanced sequencer table referencing 1-based sequencer table numbers.
    pub fn advanced_sequencer_table(&self) -> &[TableEntry] {
        &self.advanced_sequencer_table
    }

    /// Total duration in nanoseconds.
    pub fn duration_ns(&self) -> f64 {
        self.program.duration_ns()
    }

    /// Sample every waveform.
    ///
    /// Returns the segments and their lengths in waveform order.
    pub fn sampled_segments(
        &self,
        sampler: &SegmentSampler,
    ) -> Result<(Vec<TaborSegment>, Vec<u32>), ProgramError> {
        let segments = self
            .waveforms
            .iter()
            .map(|w| sampler.sample(w.as_ref(), &self.channels, &self.markers))
            .collect::<Result<Vec<_>, _>>()?;
        let lengths = segments.iter().map(TaborSegment::num_points).collect();
        Ok((segments, lengths))
    }

    /// Serializable overview of the compiled tables.
    pub fn summary(&self) -> ProgramSummary {
        ProgramSummary {
            mode: self.mode,
            duration_ns: self.duration_ns(),
            channels: self.channels.clone(),
            markers: self.markers.clone(),
            waveform_durations_ns: self.waveforms.iter().map(|w| w.duration_ns()).collect(),
            sequencer_tables: self.sequencer_tables.clone(),
            advanced_sequencer_table: self.advanced_sequencer_table.clone(),
        }
    }
}

/// Overview of a compiled program, used for reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgramSummary {
    /// Sequencing mode
    pub mode: WaveformMode,
    /// Total duration in nanoseconds
    pub duration_ns: f64,
    /// Channel per output
    pub channels: Vec<Option<ChannelId>>,
    /// Channel per marker
    pub markers: Vec<Option<ChannelId>>,
    /// Duration of each distinct waveform
    pub waveform_durations_ns: Vec<f64>,
    /// Sequencer tables
    pub sequencer_tables: Vec<Vec<TableEntry>>,
    /// Advanced sequencer table
    pub advanced_sequencer_table: Vec<TableEntry>,
}

fn sequencer_table(
    node: &Loop,
    used_channels: &BTreeSet<ChannelId>,
    waveforms: &mut IndexMap<WaveformKey, WaveformRef>,
) -> Result<Vec<TableEntry>, ProgramError> {
    node.children()
        .iter()
        .map(|leaf| {
            let waveform = leaf.waveform().ok_or(ProgramError::MissingWaveform)?;
            let subset = subset_for_channels(waveform, used_channels)?;
            let key = content_key(subset.as_ref(), used_channels);
            let index = match waveforms.get_index_of(&key) {
                Some(index) => index,
                None => {
                    waveforms.insert(key, subset);
                    waveforms.len() - 1
                }
            };
            Ok(TableEntry::new(leaf.repetition_count(), index as u64))
        })
        .collect()
}

/// Bring every second-level node into `[min_seq_len, max_seq_len]`.
///
/// Walks the root's children with a cursor. The cursor only advances past a
/// node whose length is in range; after any structural change the node at
/// the cursor is evaluated again.
fn repair_sequence_tables(
    program: &mut Loop,
    properties: &DeviceProperties,
) -> Result<(), ProgramError> {
    let min_len = properties.min_seq_len;
    let max_len = properties.max_seq_len;

    let mut i = 0;
    while i < program.len() {
        let node = &program.children()[i];
        let len = node.len();
        if len > max_len {
            return Err(ProgramError::ConstraintInfeasible(format!(
                "sequence table {i} has {len} entries, at most {max_len} are allowed"
            )));
        }
        if len >= min_len {
            i += 1;
            continue;
        }

        if node.repetition_count() == 1 {
            if i > 0 && merge_with_next(program, i - 1, max_len) {
                debug!(table = i, "Merged sequence table into previous");
                continue;
            }
            if i + 1 < program.len() && merge_with_next(program, i, max_len) {
                debug!(table = i, "Merged next sequence table");
                continue;
            }
            if partial_unroll(&mut program.children_mut()[i], min_len)? {
                debug!(table = i, "Unrolled sequence table");
                continue;
            }
            if i > 0 && borrow_repetition(program, i, i - 1, max_len)? {
                debug!(table = i, "Borrowed repetition from previous sequence table");
                continue;
            }
            if i + 1 < program.len() && borrow_repetition(program, i, i + 1, max_len)? {
                debug!(table = i, "Borrowed repetition from next sequence table");
                continue;
            }
        } else if partial_unroll(&mut program.children_mut()[i], min_len)? {
            debug!(table = i, "Unrolled repeated sequence table");
            continue;
        }

        return Err(ProgramError::ConstraintInfeasible(format!(
            "sequence table {i} has {len} entries and cannot be extended to {min_len}"
        )));
    }

    if let Some(node) = program
        .children()
        .iter()
        .find(|n| n.len() < min_len || n.len() > max_len)
    {
        return Err(ProgramError::ConstraintInfeasible(format!(
            "sequence table with {} entries left outside [{min_len}, {max_len}]",
            node.len()
        )));
    }
    Ok(())
}

/// Append the children of node `n + 1` to node `n` if both play once.
fn merge_with_next(program: &mut Loop, n: usize, max_len: usize) -> bool {
    let children = program.children_mut();
    let (first, second) = (&children[n], &children[n + 1]);
    if first.repetition_count() != 1
        || second.repetition_count() != 1
        || first.len() + second.len() > max_len
    {
        return false;
    }
    let mut next = children.remove(n + 1);
    children[n].children_mut().append(next.children_mut());
    true
}

/// Lengthen `node` by unrolling its repetitions into its child list.
fn partial_unroll(node: &mut Loop, min_len: usize) -> Result<bool, ProgramError> {
    let unrolled = node.unrolled_child_count();
    if unrolled.saturating_mul(node.repetition_count()) < min_len as u64 {
        return Ok(false);
    }
    if unrolled < min_len as u64 {
        node.unroll_children();
    }
    while node.len() < min_len {
        node.split_one_child(None)?;
    }
    Ok(true)
}

/// Move one repetition of node `donor` into node `target`.
fn borrow_repetition(
    program: &mut Loop,
    target: usize,
    donor: usize,
    max_len: usize,
) -> Result<bool, ProgramError> {
    let children = program.children_mut();
    let donor_repetitions = children[donor].repetition_count();
    if donor_repetitions < 2 || children[target].len() + children[donor].len() > max_len {
        return Ok(false);
    }
    let copy = children[donor].copy_tree_structure();
    children[donor].set_repetition_count(donor_repetitions - 1)?;

    let body = children[target].children_mut();
    if donor < target {
        body.splice(0..0, copy.children().iter().cloned());
    } else {
        body.extend(copy.children().iter().cloned());
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SampleClock;
    use crate::program::compatibility::SegmentConstraints;
    use crate::test_utils::{constant_waveform, pair_channels};

    fn props() -> DeviceProperties {
        DeviceProperties {
            min_seq_len: 3,
            max_seq_len: 1000,
            ..Default::default()
        }
    }

    fn leaf(value: f64, rep: u64) -> Loop {
        Loop::leaf(constant_waveform(192.0, value), rep).unwrap()
    }

    fn node(children: Vec<Loop>, rep: u64) -> Loop {
        Loop::new(children, rep).unwrap()
    }

    fn compile(program: Loop, props: &DeviceProperties) -> Result<TaborProgram, ProgramError> {
        let (channels, markers) = pair_channels();
        TaborProgram::compile(program, props, &channels, &markers)
    }

    fn entries(raw: &[(u64, u64)]) -> Vec<TableEntry> {
        raw.iter().map(|&(r, e)| TableEntry::new(r, e)).collect()
    }

    // =========================================================================
    // Single mode
    // =========================================================================

    #[test]
    fn test_single_mode_three_leaves() {
        let program = node(vec![leaf(0.1, 1), leaf(0.2, 1), leaf(0.3, 1)], 1);
        let compiled = compile(program, &props()).unwrap();
        assert_eq!(compiled.mode(), WaveformMode::Single);
        assert_eq!(compiled.sequencer_tables().len(), 1);
        assert_eq!(
            compiled.sequencer_tables()[0],
            entries(&[(1, 0), (1, 1), (1, 2)])
        );
        assert_eq!(compiled.advanced_sequencer_table(), &entries(&[(1, 1)])[..]);
        assert_eq!(compiled.waveforms().len(), 3);
    }

    #[test]
    fn test_single_mode_deduplicates_waveforms() {
        let program = node(vec![leaf(0.1, 2), leaf(0.2, 1), leaf(0.1, 3)], 1);
        let compiled = compile(program, &props()).unwrap();
        assert_eq!(
            compiled.sequencer_tables()[0],
            entries(&[(2, 0), (1, 1), (3, 0)])
        );
        assert_eq!(compiled.waveforms().len(), 2);
    }

    #[test]
    fn test_single_mode_from_leaf_root() {
        let compiled = compile(leaf(0.1, 4), &props()).unwrap();
        assert_eq!(compiled.mode(), WaveformMode::Single);
        assert_eq!(compiled.sequencer_tables()[0], entries(&[(4, 0)]));
        assert_eq!(compiled.advanced_sequencer_table(), &entries(&[(1, 1)])[..]);
        assert_eq!(compiled.duration_ns(), 4.0 * 192.0);
    }

    #[test]
    fn test_single_mode_too_long() {
        let props = DeviceProperties {
            max_seq_len: 2,
            ..props()
        };
        let program = node(vec![leaf(0.1, 1), leaf(0.2, 1), leaf(0.3, 1)], 1);
        assert!(matches!(
            compile(program, &props),
            Err(ProgramError::ConstraintInfeasible(_))
        ));
    }

    // =========================================================================
    // Channel assignment
    // =========================================================================

    #[test]
    fn test_wrong_channel_count() {
        let program = node(vec![leaf(0.1, 1)], 1);
        let err = TaborProgram::compile(program, &props(), &[Some("A".into())], &[None, None])
            .unwrap_err();
        assert!(matches!(err, ProgramError::InvalidChannelAssignment(_)));
    }

    #[test]
    fn test_wrong_marker_count() {
        let program = node(vec![leaf(0.1, 1)], 1);
        let err = TaborProgram::compile(
            program,
            &props(),
            &[Some("A".into()), Some("B".into())],
            &[None],
        )
        .unwrap_err();
        assert!(matches!(err, ProgramError::InvalidChannelAssignment(_)));
    }

    #[test]
    fn test_missing_channel_reported() {
        let program = node(vec![leaf(0.1, 1)], 1);
        let err = TaborProgram::compile(
            program,
            &props(),
            &[Some("A".into()), Some("Z".into())],
            &[None, None],
        )
        .unwrap_err();
        assert_eq!(
            err,
            ProgramError::MissingChannels {
                missing: vec!["Z".into()]
            }
        );
    }

    #[test]
    fn test_unused_channels_do_not_split_waveforms() {
        // Waveforms differing only on channel B compile to one waveform when
        // B is not played.
        let a = crate::test_utils::two_channel_waveform(192.0, 0.1, 0.2);
        let b = crate::test_utils::two_channel_waveform(192.0, 0.1, 0.3);
        let program = node(
            vec![Loop::leaf(a, 1).unwrap(), Loop::leaf(b, 1).unwrap()],
            1,
        );
        let compiled =
            TaborProgram::compile(program, &props(), &[Some("A".into()), None], &[None, None])
                .unwrap();
        assert_eq!(compiled.waveforms().len(), 1);
        assert_eq!(compiled.sequencer_tables()[0], entries(&[(1, 0), (1, 0)]));
    }

    // =========================================================================
    // Advanced mode
    // =========================================================================

    #[test]
    fn test_root_repetition_becomes_advanced_entry() {
        let program = node(vec![leaf(0.1, 1), leaf(0.2, 1), leaf(0.3, 1)], 5);
        let compiled = compile(program, &props()).unwrap();
        assert_eq!(compiled.mode(), WaveformMode::Advanced);
        assert_eq!(
            compiled.sequencer_tables(),
            &[entries(&[(1, 0), (1, 1), (1, 2)])]
        );
        assert_eq!(compiled.advanced_sequencer_table(), &entries(&[(5, 1)])[..]);
    }

    #[test]
    fn test_advanced_deduplicates_sequencer_tables() {
        let body = || node(vec![leaf(0.1, 1), leaf(0.2, 1), leaf(0.3, 1)], 2);
        let other = node(vec![leaf(0.3, 1), leaf(0.2, 1), leaf(0.1, 1)], 1);
        let program = node(vec![body(), other, body()], 1);
        let compiled = compile(program, &props()).unwrap();
        assert_eq!(compiled.sequencer_tables().len(), 2);
        assert_eq!(compiled.sequencer_tables()[1], entries(&[(1, 2), (1, 1), (1, 0)]));
        assert_eq!(
            compiled.advanced_sequencer_table(),
            &entries(&[(2, 1), (1, 2), (2, 1)])[..]
        );
        assert_eq!(compiled.waveforms().len(), 3);
    }

    #[test]
    fn test_advanced_flattens_deep_tree() {
        let deep = node(
            vec![node(vec![leaf(0.1, 1), leaf(0.2, 1)], 3), leaf(0.3, 1)],
            2,
        );
        let program = node(
            vec![deep, node(vec![leaf(0.1, 1), leaf(0.2, 1), leaf(0.3, 1)], 1)],
            1,
        );
        let duration = program.duration_ns();
        let compiled = compile(program, &props()).unwrap();
        assert_eq!(compiled.program().duration_ns(), duration);
        assert_eq!(compiled.program().depth(), 2);
        assert_eq!(compiled.sequencer_tables()[0].len(), 7);
        assert_eq!(compiled.advanced_sequencer_table()[0].repetition_count, 2);
    }

    // =========================================================================
    // Repair pass
    // =========================================================================

    #[test]
    fn test_repair_merges_into_previous() {
        let program = node(
            vec![
                node(vec![leaf(0.1, 1), leaf(0.2, 1), leaf(0.3, 1)], 1),
                node(vec![leaf(0.4, 1)], 1),
                node(vec![leaf(0.1, 1), leaf(0.2, 1), leaf(0.3, 1)], 2),
            ],
            1,
        );
        let compiled = compile(program, &props()).unwrap();
        assert_eq!(compiled.sequencer_tables()[0].len(), 4);
        assert_eq!(
            compiled.advanced_sequencer_table(),
            &entries(&[(1, 1), (2, 2)])[..]
        );
    }

    #[test]
    fn test_repair_merges_next() {
        let program = node(
            vec![
                node(vec![leaf(0.4, 1)], 1),
                node(vec![leaf(0.1, 1), leaf(0.2, 1), leaf(0.3, 1)], 1),
                node(vec![leaf(0.1, 1), leaf(0.2, 1), leaf(0.3, 1)], 4),
            ],
            1,
        );
        let compiled = compile(program, &props()).unwrap();
        assert_eq!(
            compiled.sequencer_tables()[0],
            entries(&[(1, 0), (1, 1), (1, 2), (1, 3)])
        );
        assert_eq!(compiled.advanced_sequencer_table().len(), 2);
    }

    #[test]
    fn test_repair_unrolls_repetition() {
        let program = node(
            vec![
                node(vec![leaf(0.1, 2)], 2),
                node(vec![leaf(0.1, 1), leaf(0.2, 1), leaf(0.3, 1)], 3),
            ],
            1,
        );
        let duration = program.duration_ns();
        let compiled = compile(program, &props()).unwrap();
        assert_eq!(
            compiled.sequencer_tables()[0],
            entries(&[(2, 0), (1, 0), (1, 0)])
        );
        assert_eq!(compiled.advanced_sequencer_table()[0], TableEntry::new(1, 1));
        assert_eq!(compiled.duration_ns(), duration);
    }

    #[test]
    fn test_repair_splits_without_unrolling() {
        let program = node(
            vec![
                node(vec![leaf(0.1, 2), leaf(0.2, 2)], 3),
                node(vec![leaf(0.1, 1), leaf(0.2, 1), leaf(0.3, 1)], 3),
            ],
            1,
        );
        let compiled = compile(program, &props()).unwrap();
        assert_eq!(
            compiled.sequencer_tables()[0],
            entries(&[(2, 0), (1, 1), (1, 1)])
        );
        assert_eq!(compiled.advanced_sequencer_table()[0], TableEntry::new(3, 1));
    }

    #[test]
    fn test_repair_borrows_from_previous() {
        let program = node(
            vec![
                node(vec![leaf(0.1, 1), leaf(0.2, 1), leaf(0.3, 1)], 3),
                node(vec![leaf(0.4, 1)], 1),
            ],
            1,
        );
        let duration = program.duration_ns();
        let compiled = compile(program, &props()).unwrap();
        assert_eq!(
            compiled.sequencer_tables()[1],
            entries(&[(1, 0), (1, 1), (1, 2), (1, 3)])
        );
        assert_eq!(
            compiled.advanced_sequencer_table(),
            &entries(&[(2, 1), (1, 2)])[..]
        );
        assert_eq!(compiled.duration_ns(), duration);
    }

    #[test]
    fn test_repair_borrows_from_next() {
        let program = node(
            vec![
                node(vec![leaf(0.4, 1)], 1),
                node(vec![leaf(0.1, 1), leaf(0.2, 1), leaf(0.3, 1)], 2),
            ],
            1,
        );
        let compiled = compile(program, &props()).unwrap();
        assert_eq!(
            compiled.sequencer_tables()[0],
            entries(&[(1, 0), (1, 1), (1, 2), (1, 3)])
        );
        assert_eq!(
            compiled.advanced_sequencer_table(),
            &entries(&[(1, 1), (1, 2)])[..]
        );
    }

    #[test]
    fn test_repair_infeasible() {
        let program = node(
            vec![node(vec![leaf(0.1, 1)], 1), node(vec![leaf(0.2, 1)], 1)],
            1,
        );
        assert!(matches!(
            compile(program, &props()),
            Err(ProgramError::ConstraintInfeasible(_))
        ));
    }

    #[test]
    fn test_repair_rejects_long_table() {
        let props = DeviceProperties {
            max_seq_len: 2,
            ..props()
        };
        let program = node(
            vec![node(vec![leaf(0.1, 1), leaf(0.2, 1), leaf(0.3, 1)], 2)],
            1,
        );
        assert!(matches!(
            compile(program, &props),
            Err(ProgramError::ConstraintInfeasible(_))
        ));
    }

    #[test]
    fn test_repaired_tables_within_limits() {
        let props = props();
        let program = node(
            vec![
                node(vec![leaf(0.1, 1)], 4),
                node(vec![leaf(0.2, 1), leaf(0.3, 1)], 1),
                node(vec![leaf(0.4, 7)], 1),
                node(vec![leaf(0.1, 1), leaf(0.2, 1)], 3),
            ],
            1,
        );
        let duration = program.duration_ns();
        let compiled = compile(program, &props).unwrap();
        for table in compiled.sequencer_tables() {
            assert!(table.len() >= props.min_seq_len);
            assert!(table.len() <= props.max_seq_len);
        }
        assert_eq!(compiled.duration_ns(), duration);
    }

    // =========================================================================
    // Sampling and summary
    // =========================================================================

    #[test]
    fn test_sampled_segments() {
        let program = node(vec![leaf(0.1, 1), leaf(0.2, 1), leaf(0.1, 1)], 1);
        let compiled = compile(program, &props()).unwrap();
        let sampler = SegmentSampler::new(
            SampleClock::new(1.0).unwrap(),
            SegmentConstraints::default(),
            [0.5, 0.5],
        );
        let (segments, lengths) = compiled.sampled_segments(&sampler).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(lengths, vec![192, 192]);
        assert_ne!(segments[0].hash(), segments[1].hash());
    }

    #[test]
    fn test_summary_serializes() {
        let program = node(vec![leaf(0.1, 1), leaf(0.2, 1), leaf(0.3, 1)], 1);
        let summary = compile(program, &props()).unwrap().summary();
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["mode"], "single");
        assert_eq!(json["waveform_durations_ns"].as_array().unwrap().len(), 3);
    }
}
