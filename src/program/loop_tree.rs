// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Loop tree: nested repetition and sequencing of waveforms.
//!
//! A [`Loop`] is either a leaf playing one waveform or an internal node
//! playing its children in order; either way the whole node is played
//! `repetition_count` times.
//!
//! Children are owned by value. Operations that restructure a node within
//! its parent ([`Loop::unroll_child`], [`Loop::unroll_at`]) are invoked on an
//! owning ancestor and address the node by index or location path, so a tree
//! can never contain a cycle and a root can never be unrolled.
//!
//! ```text
//! LOOP 2 times:
//!   ->EXEC wf_a 1 times
//!   ->LOOP 3 times:
//!       ->EXEC wf_b 1 times
//! ```

use std::fmt;

use crate::clock::INTEGER_TOLERANCE;
use crate::error::ProgramError;
use crate::program::waveform::{full_content_key, WaveformRef};

/// Validate a floating-point repetition count.
///
/// # Errors
///
/// - [`ProgramError::NonIntegerRepetition`] if `value` deviates from the
///   nearest integer by more than 1e-10
/// - [`ProgramError::ZeroRepetition`] if the integer is below one
pub fn checked_repetition(value: f64) -> Result<u64, ProgramError> {
    let rounded = value.round();
    if !value.is_finite() || (value - rounded).abs() > INTEGER_TOLERANCE {
        return Err(ProgramError::NonIntegerRepetition(value));
    }
    if rounded < 1.0 {
        return Err(ProgramError::ZeroRepetition);
    }
    Ok(rounded as u64)
}

/// A node of the loop tree.
///
/// # Invariants
///
/// - `repetition_count >= 1`
#[derive(Debug, Clone)]
pub struct Loop {
    waveform: Option<WaveformRef>,
    repetition_count: u64,
    children: Vec<Loop>,
}

impl Loop {
    /// Create a leaf playing `waveform` `repetition_count` times.
    pub fn leaf(waveform: WaveformRef, repetition_count: u64) -> Result<Self, ProgramError> {
        Self::with_parts(Some(waveform), repetition_count, Vec::new())
    }

    /// Create an internal node playing `children` `repetition_count` times.
    pub fn new(children: Vec<Loop>, repetition_count: u64) -> Result<Self, ProgramError> {
        Self::with_parts(None, repetition_count, children)
    }

    /// Create a node from its raw parts.
    pub fn with_parts(
        waveform: Option<WaveformRef>,
        repetition_count: u64,
        children: Vec<Loop>,
    ) -> Result<Self, ProgramError> {
        if repetition_count == 0 {
            return Err(ProgramError::ZeroRepetition);
        }
        Ok(Self {
            waveform,
            repetition_count,
            children,
        })
    }

    /// Empty root node with repetition one.
    pub fn root() -> Self {
        Self {
            waveform: None,
            repetition_count: 1,
            children: Vec::new(),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Waveform played by a leaf.
    pub fn waveform(&self) -> Option<&WaveformRef> {
        self.waveform.as_ref()
    }

    /// Replace the waveform.
    pub fn set_waveform(&mut self, waveform: Option<WaveformRef>) {
        self.waveform = waveform;
    }

    /// Number of times this node is played.
    pub fn repetition_count(&self) -> u64 {
        self.repetition_count
    }

    /// Set the repetition count.
    ///
    /// # Errors
    ///
    /// [`ProgramError::ZeroRepetition`] if `count` is zero.
    pub fn set_repetition_count(&mut self, count: u64) -> Result<(), ProgramError> {
        if count == 0 {
            return Err(ProgramError::ZeroRepetition);
        }
        self.repetition_count = count;
        Ok(())
    }

    /// Child nodes in play order.
    pub fn children(&self) -> &[Loop] {
        &self.children
    }

    /// Mutable access to the child list.
    pub fn children_mut(&mut self) -> &mut Vec<Loop> {
        &mut self.children
    }

    /// Append a child.
    pub fn push_child(&mut self, child: Loop) {
        self.children.push(child);
    }

    /// Number of direct children.
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Whether the node has no children.
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Whether the node is a leaf.
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Total duration in nanoseconds including this node's repetition.
    ///
    /// A leaf without waveform has zero duration.
    pub fn duration_ns(&self) -> f64 {
        self.repetition_count as f64 * self.body_duration_ns()
    }

    /// Duration of a single run of this node.
    pub fn body_duration_ns(&self) -> f64 {
        if self.is_leaf() {
            self.waveform.as_ref().map_or(0.0, |w| w.duration_ns())
        } else {
            self.children.iter().map(Loop::duration_ns).sum()
        }
    }

    /// Sum of the children's repetition counts.
    ///
    /// This is the length of the node's child list after unrolling each
    /// child once.
    pub fn unrolled_child_count(&self) -> u64 {
        self.children.iter().map(|c| c.repetition_count).sum()
    }

    /// Height of the subtree: zero for a leaf.
    pub fn depth(&self) -> usize {
        self.children
            .iter()
            .map(|c| 1 + c.depth())
            .max()
            .unwrap_or(0)
    }

    /// Whether every leaf lies at the same depth.
    pub fn is_balanced(&self) -> bool {
        match self.children.first() {
            None => true,
            Some(first) => {
                let depth = first.depth();
                self.children
                    .iter()
                    .all(|c| c.depth() == depth && c.is_balanced())
            }
        }
    }

    /// Node at `location`, a path of child indices.
    pub fn locate(&self, location: &[usize]) -> Option<&Loop> {
        match location.split_first() {
            None => Some(self),
            Some((&first, rest)) => self.children.get(first)?.locate(rest),
        }
    }

    /// Mutable node at `location`.
    pub fn locate_mut(&mut self, location: &[usize]) -> Option<&mut Loop> {
        match location.split_first() {
            None => Some(self),
            Some((&first, rest)) => self.children.get_mut(first)?.locate_mut(rest),
        }
    }

    /// Leaves in depth-first play order.
    pub fn leaves(&self) -> Leaves<'_> {
        Leaves { stack: vec![self] }
    }

    // =========================================================================
    // Restructuring
    // =========================================================================

    /// Replace the child at `index` by `repetition_count` copies of its
    /// own children.
    ///
    /// A leaf child is replaced by `repetition_count` single runs of its
    /// waveform.
    pub fn unroll_child(&mut self, index: usize) -> Result<(), ProgramError> {
        if index >= self.children.len() {
            return Err(ProgramError::InvalidLocation(vec![index]));
        }
        let child = self.children.remove(index);
        let expanded = child.repeated_children();
        self.children.splice(index..index, expanded);
        Ok(())
    }

    /// Unroll the node at `location` within its parent.
    ///
    /// # Errors
    ///
    /// - [`ProgramError::NoParent`] for the empty location
    /// - [`ProgramError::InvalidLocation`] if the path does not exist
    pub fn unroll_at(&mut self, location: &[usize]) -> Result<(), ProgramError> {
        let (&index, parent_path) = location.split_last().ok_or(ProgramError::NoParent)?;
        let parent = self
            .locate_mut(parent_path)
            .ok_or_else(|| ProgramError::InvalidLocation(location.to_vec()))?;
        parent
            .unroll_child(index)
            .map_err(|_| ProgramError::InvalidLocation(location.to_vec()))
    }

    /// Repeat the child list `repetition_count` times and reset the
    /// repetition count to one.
    ///
    /// A leaf becomes a node with `repetition_count` single-run children
    /// playing its waveform.
    pub fn unroll_children(&mut self) {
        let children = self.take_body();
        let count = self.repetition_count as usize;
        let mut expanded = Vec::with_capacity(children.len() * count);
        for _ in 1..count {
            expanded.extend(children.iter().cloned());
        }
        expanded.extend(children);
        self.children = expanded;
        self.repetition_count = 1;
    }

    /// Move this node's content into a single new child.
    ///
    /// The child takes over the repetition count, the waveform and the
    /// children; this node becomes a repetition-one wrapper.
    pub fn encapsulate(&mut self) {
        let inner = Loop {
            waveform: self.waveform.take(),
            repetition_count: self.repetition_count,
            children: std::mem::take(&mut self.children),
        };
        self.children = vec![inner];
        self.repetition_count = 1;
    }

    /// Peel one repetition off a child into a repetition-one copy inserted
    /// right after it.
    ///
    /// Without `index` the last child with a repetition count above one is
    /// split.
    pub fn split_one_child(&mut self, index: Option<usize>) -> Result<(), ProgramError> {
        let index = match index {
            Some(i) => {
                let child = self
                    .children
                    .get(i)
                    .ok_or_else(|| ProgramError::InvalidLocation(vec![i]))?;
                if child.repetition_count < 2 {
                    return Err(ProgramError::NoSplittableChild(Some(i)));
                }
                i
            }
            None => self
                .children
                .iter()
                .rposition(|c| c.repetition_count > 1)
                .ok_or(ProgramError::NoSplittableChild(None))?,
        };

        let child = &mut self.children[index];
        child.repetition_count -= 1;
        let mut copy = child.clone();
        copy.repetition_count = 1;
        self.children.insert(index + 1, copy);
        Ok(())
    }

    /// Deep copy of the subtree.
    pub fn copy_tree_structure(&self) -> Loop {
        self.clone()
    }

    /// Restructure the subtree so every leaf lies exactly `depth` levels
    /// below this node.
    ///
    /// Shallow children are encapsulated, unbalanced children are balanced
    /// recursively, single-child chains are collapsed by multiplying their
    /// repetition counts and any other excess depth is unrolled. A depth of
    /// zero leaves the node unchanged.
    pub fn flatten_and_balance(&mut self, depth: usize) {
        if depth == 0 {
            return;
        }
        let target = depth - 1;
        let mut i = 0;
        while i < self.children.len() {
            let child = &mut self.children[i];
            let child_depth = child.depth();

            if child_depth < target {
                child.encapsulate();
            } else if target >= 1 && !child.is_balanced() {
                child.flatten_and_balance(target);
            } else if child_depth == target {
                i += 1;
            } else if child.children.len() == 1 && child.children[0].children.len() == 1 {
                let grandchild = child.children.remove(0);
                child.repetition_count *= grandchild.repetition_count;
                child.waveform = grandchild.waveform;
                child.children = grandchild.children;
            } else {
                let child = self.children.remove(i);
                let expanded = child.repeated_children();
                self.children.splice(i..i, expanded);
            }
        }
    }

    fn repeated_children(mut self) -> Vec<Loop> {
        let count = self.repetition_count as usize;
        let children = self.take_body();
        let mut expanded = Vec::with_capacity(children.len() * count);
        for _ in 1..count {
            expanded.extend(children.iter().cloned());
        }
        expanded.extend(children);
        expanded
    }

    /// Children played by one run of this node; a leaf yields a single
    /// run of its waveform.
    fn take_body(&mut self) -> Vec<Loop> {
        if self.is_leaf() {
            match self.waveform.take() {
                Some(waveform) => vec![Loop {
                    waveform: Some(waveform),
                    repetition_count: 1,
                    children: Vec::new(),
                }],
                None => Vec::new(),
            }
        } else {
            std::mem::take(&mut self.children)
        }
    }
}

impl PartialEq for Loop {
    /// Structural equality with waveforms compared by content.
    fn eq(&self, other: &Self) -> bool {
        let same_waveform = match (&self.waveform, &other.waveform) {
            (None, None) => true,
            (Some(a), Some(b)) => full_content_key(a.as_ref()) == full_content_key(b.as_ref()),
            _ => false,
        };
        same_waveform
            && self.repetition_count == other.repetition_count
            && self.children == other.children
    }
}

impl fmt::Display for Loop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_leaf() {
            match &self.waveform {
                Some(w) => write!(
                    f,
                    "EXEC {:?} {} times",
                    full_content_key(w.as_ref()),
                    self.repetition_count
                ),
                None => write!(f, "EXEC <none> {} times", self.repetition_count),
            }
        } else {
            write!(f, "LOOP {} times:", self.repetition_count)?;
            for child in &self.children {
                let rendered = child.to_string();
                let mut lines = rendered.lines();
                if let Some(first) = lines.next() {
                    write!(f, "\n  ->{first}")?;
                }
                for line in lines {
                    write!(f, "\n    {line}")?;
                }
            }
            Ok(())
        }
    }
}

/// Depth-first iterator over the leaves of a loop tree.
pub struct Leaves<'a> {
    stack: Vec<&'a Loop>,
}

impl<'a> Iterator for Leaves<'a> {
    type Item = &'a Loop;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(node) = self.stack.pop() {
            if node.is_leaf() {
                return Some(node);
            }
            self.stack.extend(node.children.iter().rev());
        }
        None
    }
}
