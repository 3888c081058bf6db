// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Reentrant configuration guard.
//!
//! Mutating channel pair operations call each other freely. Only the
//! outermost acquire switches the device into configuration mode and only
//! the matching outermost release switches it back.

/// Nesting counter for configuration mode.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConfigurationGuard {
    depth: usize,
}

impl ConfigurationGuard {
    /// Guard outside configuration mode.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter one level. Returns `true` for the outermost level.
    pub fn acquire(&mut self) -> bool {
        self.depth += 1;
        self.depth == 1
    }

    /// Leave one level. Returns `true` when the outermost level is left.
    ///
    /// Releasing an inactive guard is a no-op returning `false`.
    pub fn release(&mut self) -> bool {
        match self.depth {
            0 => false,
            depth => {
                self.depth = depth - 1;
                self.depth == 0
            }
        }
    }

    /// Current nesting depth.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Whether any level is held.
    pub fn is_active(&self) -> bool {
        self.depth > 0
    }
}
