// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Segment memory of one channel pair.
//!
//! The device stores segments in a table of numbered slots laid out back to
//! back in sample memory, each followed by [`SEGMENT_PADDING`] points.
//! [`SegmentMemory`] mirrors that table: capacity, used length, content hash
//! and reference count per slot.
//!
//! Placement resolves a batch of segments in four steps:
//!
//! 1. content already resident in any slot is reused
//! 2. free slots before the last referenced slot with exactly the needed
//!    capacity are filled
//! 3. remaining segments, largest first, go into the largest free slot if
//!    it is big enough
//! 4. everything else is appended after the last referenced slot
//!
//! [`SegmentMemory::place`] only plans; [`SegmentMemory::commit`] writes.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::device::AwgDevice;
use crate::error::{MemoryError, Result};
use crate::tabor::segment::{make_combined_wave, SegmentHash, TaborSegment};

/// Memory points consumed by each segment in addition to its capacity.
pub const SEGMENT_PADDING: u64 = 16;

/// Where one segment of a batch ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotAssignment {
    /// Identical content is already stored in this slot
    Reuse(usize),
    /// Upload into this unreferenced slot
    Insert(usize),
    /// Append after the last referenced slot
    Append,
    /// Same content as the segment at this batch index
    SameAs(usize),
}

/// Result of planning a batch of segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    assignments: Vec<SlotAssignment>,
    append_at: usize,
}

impl Placement {
    /// Assignment per input segment.
    pub fn assignments(&self) -> &[SlotAssignment] {
        &self.assignments
    }

    /// Distinct slots whose content is reused.
    pub fn reused_slots(&self) -> Vec<usize> {
        let slots: BTreeSet<usize> = self
            .assignments
            .iter()
            .filter_map(|a| match a {
                SlotAssignment::Reuse(slot) => Some(*slot),
                _ => None,
            })
            .collect();
        slots.into_iter().collect()
    }

    /// `(segment index, slot)` pairs to upload into free slots.
    pub fn inserts(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.assignments
            .iter()
            .enumerate()
            .filter_map(|(i, a)| match a {
                SlotAssignment::Insert(slot) => Some((i, *slot)),
                _ => None,
            })
    }

    /// Indices of segments to append.
    pub fn appends(&self) -> Vec<usize> {
        self.assignments
            .iter()
            .enumerate()
            .filter(|(_, a)| **a == SlotAssignment::Append)
            .map(|(i, _)| i)
            .collect()
    }

    /// Slot index the first appended segment will occupy.
    pub fn append_at(&self) -> usize {
        self.append_at
    }
}

/// State of one slot, for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotInfo {
    /// 0-based slot index (device segment number - 1)
    pub index: usize,
    /// Reserved points
    pub capacity: u32,
    /// Used points
    pub length: u32,
    /// Programs referencing the slot
    pub references: u32,
}

/// Local model of the segment table of a channel pair.
///
/// # Invariants
///
/// - all four per-slot vectors have the same length
/// - `capacities[i] >= lengths[i]`
/// - `hashes[i]` is `None` while the content of slot `i` is unknown
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentMemory {
    capacities: Vec<u32>,
    lengths: Vec<u32>,
    hashes: Vec<Option<SegmentHash>>,
    references: Vec<u32>,
    total_capacity: u64,
}

impl SegmentMemory {
    /// Empty table over `total_capacity` points.
    pub fn new(total_capacity: u64) -> Self {
        Self {
            capacities: Vec::new(),
            lengths: Vec::new(),
            hashes: Vec::new(),
            references: Vec::new(),
            total_capacity,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.capacities.len()
    }

    /// Whether the table has no slots.
    pub fn is_empty(&self) -> bool {
        self.capacities.is_empty()
    }

    /// Points addressable by this channel pair.
    pub fn total_capacity(&self) -> u64 {
        self.total_capacity
    }

    /// Capacity per slot.
    pub fn capacities(&self) -> &[u32] {
        &self.capacities
    }

    /// Used length per slot.
    pub fn lengths(&self) -> &[u32] {
        &self.lengths
    }

    /// Content hash per slot.
    pub fn hashes(&self) -> &[Option<SegmentHash>] {
        &self.hashes
    }

    /// Reference count per slot.
    pub fn references(&self) -> &[u32] {
        &self.references
    }

    /// Per-slot overview.
    pub fn slots(&self) -> Vec<SlotInfo> {
        (0..self.len())
            .map(|index| SlotInfo {
                index,
                capacity: self.capacities[index],
                length: self.lengths[index],
                references: self.references[index],
            })
            .collect()
    }

    /// One past the highest referenced slot.
    pub fn referenced_end(&self) -> usize {
        end_of_references(&self.references)
    }

    /// Points not held by referenced slots.
    pub fn free_points_in_total(&self) -> u64 {
        let reserved: u64 = self
            .capacities
            .iter()
            .zip(&self.references)
            .filter(|(_, &r)| r > 0)
            .map(|(&c, _)| u64::from(c))
            .sum();
        self.total_capacity.saturating_sub(reserved)
    }

    /// Points available after the highest referenced slot.
    pub fn free_points_at_end(&self) -> u64 {
        let used: u64 = self.capacities[..self.referenced_end()]
            .iter()
            .map(|&c| u64::from(c))
            .sum();
        self.total_capacity.saturating_sub(used)
    }

    // =========================================================================
    // Planning
    // =========================================================================

    /// Plan where to store `segments`.
    ///
    /// The table is not modified.
    ///
    /// # Errors
    ///
    /// - [`MemoryError::OutOfMemory`] if the new segments exceed the total
    ///   free memory
    /// - [`MemoryError::FragmentationOutOfMemory`] if the segments to append
    ///   do not fit behind the last referenced slot
    pub fn place(&self, segments: &[TaborSegment]) -> std::result::Result<Placement, MemoryError> {
        let hashes: Vec<SegmentHash> = segments.iter().map(TaborSegment::hash).collect();
        let lengths: Vec<u32> = segments.iter().map(TaborSegment::num_points).collect();

        let mut assignments = Vec::with_capacity(segments.len());
        let mut new_references = self.references.clone();
        let mut reused = BTreeSet::new();
        let mut unknown = Vec::new();

        for (i, hash) in hashes.iter().enumerate() {
            if let Some(slot) = self.hashes.iter().position(|h| h.as_ref() == Some(hash)) {
                if reused.insert(slot) {
                    new_references[slot] += 1;
                }
                assignments.push(SlotAssignment::Reuse(slot));
            } else if let Some(&first) = unknown.iter().find(|&&j| hashes[j] == *hash) {
                assignments.push(SlotAssignment::SameAs(first));
            } else {
                unknown.push(i);
                assignments.push(SlotAssignment::Append);
            }
        }

        let required = padded_size(unknown.iter().map(|&i| lengths[i]));
        let available = self.free_points_in_total();
        if required > available {
            return Err(MemoryError::OutOfMemory {
                required,
                available,
            });
        }

        let append_at = end_of_references(&new_references);
        let mut free: Vec<bool> = new_references[..append_at]
            .iter()
            .map(|&r| r == 0)
            .collect();

        // Exact capacity, first fit.
        for &i in &unknown {
            if let Some(slot) = (0..append_at).find(|&s| free[s] && self.capacities[s] == lengths[i]) {
                free[slot] = false;
                assignments[i] = SlotAssignment::Insert(slot);
            }
        }

        // Larger slots, largest segments first.
        let mut remaining: Vec<usize> = unknown
            .iter()
            .copied()
            .filter(|&i| assignments[i] == SlotAssignment::Append)
            .collect();
        remaining.sort_by(|&a, &b| lengths[b].cmp(&lengths[a]));
        for i in remaining {
            let largest = (0..append_at)
                .filter(|&s| free[s])
                .max_by(|&a, &b| self.capacities[a].cmp(&self.capacities[b]).then(b.cmp(&a)));
            match largest {
                Some(slot) if self.capacities[slot] >= lengths[i] => {
                    free[slot] = false;
                    assignments[i] = SlotAssignment::Insert(slot);
                }
                Some(_) => {}
                None => break,
            }
        }

        let appended = padded_size(
            assignments
                .iter()
                .zip(&lengths)
                .filter(|(a, _)| **a == SlotAssignment::Append)
                .map(|(_, &l)| l),
        );
        let used: u64 = self.capacities[..append_at]
            .iter()
            .map(|&c| u64::from(c))
            .sum();
        let available_at_end = self.total_capacity.saturating_sub(used);
        if appended > available_at_end {
            return Err(MemoryError::FragmentationOutOfMemory {
                required: appended,
                available_at_end,
            });
        }

        let placement = Placement {
            assignments,
            append_at,
        };
        debug!(
            segments = segments.len(),
            reused = placement.reused_slots().len(),
            inserts = placement.inserts().count(),
            appends = placement.appends().len(),
            "Planned segment placement"
        );
        Ok(placement)
    }

    /// Execute `placement` for `segments` and return the slot per segment.
    ///
    /// Every slot used by the batch gains exactly one reference. If a device
    /// write fails, the batch's references are withdrawn again; slots it
    /// already wrote stay in the table unreferenced.
    pub fn commit<D: AwgDevice + ?Sized>(
        &mut self,
        device: &mut D,
        placement: &Placement,
        segments: &[TaborSegment],
    ) -> Result<Vec<usize>> {
        let references = self.references.clone();
        let result = self.write_placement(device, placement, segments);
        if let Err(e) = &result {
            // Cleanup only drops unreferenced slots, so surviving slots keep
            // their index and slots past the old end are new.
            let kept = references.len().min(self.references.len());
            self.references[..kept].copy_from_slice(&references[..kept]);
            self.references[kept..].fill(0);
            warn!(error = %e, "Segment upload failed, references withdrawn");
        }
        result
    }

    fn write_placement<D: AwgDevice + ?Sized>(
        &mut self,
        device: &mut D,
        placement: &Placement,
        segments: &[TaborSegment],
    ) -> Result<Vec<usize>> {
        for slot in placement.reused_slots() {
            self.references[slot] += 1;
        }

        let mut slots = vec![0; segments.len()];
        for (i, slot) in placement.inserts() {
            self.upload_segment(device, slot, &segments[i])?;
            slots[i] = slot;
        }

        let appends = placement.appends();
        if !appends.is_empty() {
            if self.len() > placement.append_at() {
                self.cleanup(device)?;
            }
            let batch: Vec<TaborSegment> = appends.iter().map(|&i| segments[i].clone()).collect();
            let new_slots = self.amend_segments(device, &batch)?;
            for (&i, slot) in appends.iter().zip(new_slots) {
                slots[i] = slot;
            }
        }

        for (i, assignment) in placement.assignments().iter().enumerate() {
            match *assignment {
                SlotAssignment::Reuse(slot) => slots[i] = slot,
                SlotAssignment::SameAs(first) => slots[i] = slots[first],
                SlotAssignment::Insert(_) | SlotAssignment::Append => {}
            }
        }
        Ok(slots)
    }

    // =========================================================================
    // Device writes
    // =========================================================================

    /// Write `segment` into the unreferenced slot `slot`.
    pub fn upload_segment<D: AwgDevice + ?Sized>(
        &mut self,
        device: &mut D,
        slot: usize,
        segment: &TaborSegment,
    ) -> Result<()> {
        if slot >= self.len() {
            return Err(MemoryError::InvalidSlot(slot).into());
        }
        if self.references[slot] > 0 {
            return Err(MemoryError::SlotInUse {
                slot,
                references: self.references[slot],
            }
            .into());
        }
        let length = segment.num_points();
        if length > self.capacities[slot] {
            return Err(MemoryError::SlotTooSmall {
                slot,
                capacity: self.capacities[slot],
                length,
            }
            .into());
        }

        let segment_no = slot + 1;
        self.hashes[slot] = None;
        device.send_cmd(&format!(":TRAC:DEF {segment_no}, {length}"))?;
        self.lengths[slot] = length;
        device.send_cmd(&format!(":TRAC:SEL {segment_no}"))?;
        device.send_cmd(":TRAC:MODE COMB")?;
        device.send_binary_data(":TRAC:DATA", &segment.to_binary())?;

        self.references[slot] = 1;
        self.hashes[slot] = Some(segment.hash());
        debug!(slot, length, "Uploaded segment");
        Ok(())
    }

    /// Append `segments` as new slots in one combined transfer.
    ///
    /// Returns the new slot indices.
    pub fn amend_segments<D: AwgDevice + ?Sized>(
        &mut self,
        device: &mut D,
        segments: &[TaborSegment],
    ) -> Result<Vec<usize>> {
        let data = make_combined_wave(segments);
        let trace_length = data.len() / 2;
        let first_slot = self.len();
        let first_segment_no = first_slot + 1;

        device.send_cmd(&format!(":TRAC:DEF {first_segment_no},{trace_length}"))?;
        device.send_cmd(&format!(":TRAC:SEL {first_segment_no}"))?;
        device.send_cmd(":TRAC:MODE COMB")?;
        device.send_binary_data(":TRAC:DATA", &data)?;

        let old_to_update = self
            .capacities
            .iter()
            .zip(&self.lengths)
            .filter(|(c, l)| c != l)
            .count();

        for segment in segments {
            self.capacities.push(segment.num_points());
            self.lengths.push(segment.num_points());
            self.hashes.push(Some(segment.hash()));
            self.references.push(1);
        }

        if segments.len() < old_to_update {
            for (i, segment) in segments.iter().enumerate() {
                device.send_cmd(&format!(
                    ":TRAC:DEF {},{}",
                    first_segment_no + i,
                    segment.num_points()
                ))?;
            }
        } else {
            device.download_segment_lengths(&self.capacities)?;
            for (i, (&capacity, &length)) in self.capacities.iter().zip(&self.lengths).enumerate() {
                if capacity != length {
                    device.send_cmd(&format!(":TRAC:DEF {},{length}", i + 1))?;
                }
            }
        }

        debug!(
            first_slot,
            segments = segments.len(),
            points = trace_length,
            "Appended segments"
        );
        Ok((first_slot..first_slot + segments.len()).collect())
    }

    /// Delete all unreferenced slots after the last referenced one.
    pub fn cleanup<D: AwgDevice + ?Sized>(&mut self, device: &mut D) -> Result<()> {
        let old_end = self.len();
        let new_end = self.referenced_end();
        if new_end == old_end {
            return Ok(());
        }

        let command = (new_end..old_end)
            .map(|i| format!("TRAC:DEL {}", i + 1))
            .collect::<Vec<_>>()
            .join("; ");
        device.send_cmd(&command)?;

        self.capacities.truncate(new_end);
        self.lengths.truncate(new_end);
        self.hashes.truncate(new_end);
        self.references.truncate(new_end);
        info!(deleted = old_end - new_end, "Cleaned up segment memory");
        Ok(())
    }

    /// Delete every segment and store `idle` as the only, permanently
    /// referenced, slot.
    pub fn clear<D: AwgDevice + ?Sized>(&mut self, device: &mut D, idle: &TaborSegment) -> Result<()> {
        device.send_cmd(":TRAC:DEL:ALL")?;
        device.send_cmd(&format!(":TRAC:DEF 1, {}", idle.num_points()))?;
        device.send_cmd(":TRAC:SEL 1")?;
        device.send_cmd(":TRAC:MODE COMB")?;
        device.send_binary_data(":TRAC:DATA", &idle.to_binary())?;

        self.capacities = vec![idle.num_points()];
        self.lengths = vec![idle.num_points()];
        self.hashes = vec![Some(idle.hash())];
        self.references = vec![1];
        Ok(())
    }

    // =========================================================================
    // Reference counting
    // =========================================================================

    /// Add one reference to each distinct slot in `slots`.
    pub fn reference(&mut self, slots: &[usize]) -> std::result::Result<(), MemoryError> {
        for slot in self.distinct(slots)? {
            self.references[slot] += 1;
        }
        Ok(())
    }

    /// Remove one reference from each distinct slot in `slots`.
    pub fn release(&mut self, slots: &[usize]) -> std::result::Result<(), MemoryError> {
        for slot in self.distinct(slots)? {
            self.references[slot] = self.references[slot].saturating_sub(1);
        }
        Ok(())
    }

    fn distinct(&self, slots: &[usize]) -> std::result::Result<BTreeSet<usize>, MemoryError> {
        let distinct: BTreeSet<usize> = slots.iter().copied().collect();
        match distinct.iter().find(|&&s| s >= self.len()) {
            Some(&slot) => Err(MemoryError::InvalidSlot(slot)),
            None => Ok(distinct),
        }
    }
}

fn end_of_references(references: &[u32]) -> usize {
    references
        .iter()
        .rposition(|&r| r > 0)
        .map_or(0, |last| last + 1)
}

fn padded_size(lengths: impl Iterator<Item = u32>) -> u64 {
    lengths.map(|l| u64::from(l) + SEGMENT_PADDING).sum()
}
