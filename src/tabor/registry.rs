// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Registry of the programs uploaded to a channel pair.
//!
//! Each entry pairs a compiled program with the slot holding each of its
//! waveforms. The registry also tracks which program is armed; it does not
//! touch reference counts, that is left to the channel pair.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::error::RegistryError;
use crate::tabor::program::TaborProgram;

/// A program resident in device memory.
#[derive(Debug, Clone)]
pub struct ProgramMemory {
    /// Slot index per waveform index of the program
    pub waveform_to_segment: Vec<usize>,
    /// The compiled program
    pub program: TaborProgram,
}

/// Named programs of one channel pair.
#[derive(Debug, Default)]
pub struct ProgramRegistry {
    /// Programs by name
    programs: BTreeMap<String, ProgramMemory>,

    /// Armed program, `None` while the idle program plays
    armed: Option<String>,
}

impl ProgramRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `entry` under `name`.
    pub fn insert(&mut self, name: &str, entry: ProgramMemory) -> Result<(), RegistryError> {
        if self.programs.contains_key(name) {
            return Err(RegistryError::DuplicateProgramName(name.to_string()));
        }
        info!(
            program = %name,
            waveforms = entry.waveform_to_segment.len(),
            "Registering program"
        );
        self.programs.insert(name.to_string(), entry);
        Ok(())
    }

    /// Remove and return the entry under `name`.
    ///
    /// The armed pointer is left alone.
    pub fn remove(&mut self, name: &str) -> Result<ProgramMemory, RegistryError> {
        let entry = self
            .programs
            .remove(name)
            .ok_or_else(|| RegistryError::UnknownProgramName(name.to_string()))?;
        info!(program = %name, "Removed program");
        Ok(entry)
    }

    /// Entry under `name`.
    pub fn get(&self, name: &str) -> Result<&ProgramMemory, RegistryError> {
        self.programs
            .get(name)
            .ok_or_else(|| RegistryError::UnknownProgramName(name.to_string()))
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.programs.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.programs.keys().cloned().collect()
    }

    /// Iterate over all entries.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ProgramMemory)> {
        self.programs.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of registered programs.
    pub fn len(&self) -> usize {
        self.programs.len()
    }

    /// Whether no program is registered.
    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Name of the armed program.
    pub fn armed(&self) -> Option<&str> {
        self.armed.as_deref()
    }

    /// Whether `name` is the armed program.
    pub fn is_armed(&self, name: &str) -> bool {
        self.armed.as_deref() == Some(name)
    }

    /// Record the armed program.
    pub fn set_armed(&mut self, name: Option<String>) {
        debug!(program = ?name, "Armed program changed");
        self.armed = name;
    }

    /// Forget all programs and disarm.
    pub fn clear(&mut self) {
        if !self.programs.is_empty() {
            warn!(programs = self.programs.len(), "Clearing program registry");
        }
        self.programs.clear();
        self.armed = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceProperties;
    use crate::program::Loop;
    use crate::test_utils::{constant_waveform, pair_channels};

    fn entry(slots: Vec<usize>) -> ProgramMemory {
        let (channels, markers) = pair_channels();
        let program = Loop::leaf(constant_waveform(192.0, 0.1), 1).unwrap();
        ProgramMemory {
            waveform_to_segment: slots,
            program: TaborProgram::compile(program, &DeviceProperties::default(), &channels, &markers)
                .unwrap(),
        }
    }

    #[test]
    fn test_insert_and_get() {
        let mut registry = ProgramRegistry::new();
        registry.insert("a", entry(vec![1])).unwrap();
        assert!(registry.contains("a"));
        assert_eq!(registry.get("a").unwrap().waveform_to_segment, vec![1]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_name() {
        let mut registry = ProgramRegistry::new();
        registry.insert("a", entry(vec![1])).unwrap();
        assert_eq!(
            registry.insert("a", entry(vec![2])).unwrap_err(),
            RegistryError::DuplicateProgramName("a".into())
        );
        assert_eq!(registry.get("a").unwrap().waveform_to_segment, vec![1]);
    }

    #[test]
    fn test_unknown_name() {
        let mut registry = ProgramRegistry::new();
        assert_eq!(
            registry.remove("nope").unwrap_err(),
            RegistryError::UnknownProgramName("nope".into())
        );
        assert!(registry.get("nope").is_err());
    }

    #[test]
    fn test_names_sorted() {
        let mut registry = ProgramRegistry::new();
        for name in ["c", "a", "b"] {
            registry.insert(name, entry(vec![1])).unwrap();
        }
        registry.remove("a").unwrap();
        assert_eq!(registry.names(), vec!["b", "c"]);
    }

    #[test]
    fn test_armed_pointer() {
        let mut registry = ProgramRegistry::new();
        registry.insert("a", entry(vec![1])).unwrap();
        assert_eq!(registry.armed(), None);
        registry.set_armed(Some("a".into()));
        assert!(registry.is_armed("a"));

        // Removing leaves the pointer to the caller.
        registry.remove("a").unwrap();
        assert!(registry.is_armed("a"));

        registry.clear();
        assert_eq!(registry.armed(), None);
        assert!(registry.is_empty());
    }
}
