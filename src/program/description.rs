// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Program description files.
//!
//! A description names its table waveforms once and builds the loop tree
//! from nested `{ repetition_count, children | waveform }` entries:
//!
//! ```yaml
//! channels: [X, Y]
//! markers: [M, null]
//! waveforms:
//!   ramp:
//!     duration_ns: 192
//!     channels:
//!       X: [[0, 0.0], [192, 0.5]]
//!       Y: [[0, 0.0]]
//!       M: [[0, 1.0], [16, 0.0]]
//! program:
//!   repetition_count: 2
//!   children:
//!     - waveform: ramp
//!       repetition_count: 3
//! ```
//!
//! JSON files with the same structure are accepted as well.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, ProgramError, Result};
use crate::program::loop_tree::{checked_repetition, Loop};
use crate::program::waveform::{ChannelId, TableWaveform, WaveformRef};

/// Top-level program description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramDescription {
    /// Logical channel played on each output of the pair (`null` = unused)
    #[serde(default)]
    pub channels: Vec<Option<ChannelId>>,

    /// Logical channel driving each marker of the pair (`null` = unused)
    #[serde(default)]
    pub markers: Vec<Option<ChannelId>>,

    /// Named waveforms
    #[serde(default)]
    pub waveforms: BTreeMap<String, TableDescription>,

    /// Root of the loop tree
    pub program: LoopDescription,
}

/// A piecewise-linear waveform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescription {
    /// Duration in nanoseconds
    pub duration_ns: f64,
    /// `(time_ns, value)` points per channel
    pub channels: BTreeMap<ChannelId, Vec<(f64, f64)>>,
}

/// One loop node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopDescription {
    /// Number of repetitions; must be integral
    #[serde(default = "default_repetition_count")]
    pub repetition_count: f64,

    /// Name of the waveform played by a leaf
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waveform: Option<String>,

    /// Children of an internal node
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<LoopDescription>,
}

fn default_repetition_count() -> f64 {
    1.0
}

impl ProgramDescription {
    /// Load a description from a YAML or JSON file.
    ///
    /// Files ending in `.json` are parsed as JSON, everything else as YAML.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(serde_yaml::from_str(&content)?)
        }
    }

    /// Build the loop tree.
    ///
    /// Identical waveform names share one waveform instance.
    pub fn to_loop(&self) -> Result<Loop> {
        let mut waveforms = BTreeMap::new();
        for (name, table) in &self.waveforms {
            let waveform: WaveformRef = Arc::new(TableWaveform::new(
                table.duration_ns,
                table.channels.clone(),
            )?);
            waveforms.insert(name.as_str(), waveform);
        }
        build_loop(&self.program, &waveforms)
    }
}

fn build_loop(description: &LoopDescription, waveforms: &BTreeMap<&str, WaveformRef>) -> Result<Loop> {
    let repetition_count = checked_repetition(description.repetition_count)?;

    match (&description.waveform, description.children.is_empty()) {
        (Some(name), true) => {
            let waveform = waveforms
                .get(name.as_str())
                .ok_or_else(|| Error::Serialization(format!("unknown waveform '{name}'")))?;
            Ok(Loop::leaf(Arc::clone(waveform), repetition_count)?)
        }
        (None, false) => {
            let children = description
                .children
                .iter()
                .map(|child| build_loop(child, waveforms))
                .collect::<Result<Vec<_>>>()?;
            Ok(Loop::new(children, repetition_count)?)
        }
        (None, true) => Err(ProgramError::MissingWaveform.into()),
        (Some(name), false) => Err(Error::Serialization(format!(
            "loop with waveform '{name}' must not have children"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const YAML: &str = r#"
channels: [X, Y]
markers: [M, null]
waveforms:
  ramp:
    duration_ns: 192
    channels:
      X: [[0, 0.0], [192, 0.5]]
      Y: [[0, 0.0]]
      M: [[0, 1.0], [16, 0.0]]
  flat:
    duration_ns: 208
    channels:
      X: [[0, 0.1]]
      Y: [[0, 0.1]]
      M: [[0, 0.0]]
program:
  repetition_count: 2
  children:
    - waveform: ramp
      repetition_count: 3
    - children:
        - waveform: flat
        - waveform: ramp
"#;

    #[test]
    fn test_parse_yaml_description() {
        let description: ProgramDescription = serde_yaml::from_str(YAML).unwrap();
        assert_eq!(description.channels, vec![Some("X".into()), Some("Y".into())]);
        assert_eq!(description.markers, vec![Some("M".into()), None]);
        assert_eq!(description.waveforms.len(), 2);

        let program = description.to_loop().unwrap();
        assert_eq!(program.repetition_count(), 2);
        assert_eq!(program.len(), 2);
        assert_eq!(program.children()[0].repetition_count(), 3);
        assert_eq!(program.duration_ns(), 2.0 * (3.0 * 192.0 + 208.0 + 192.0));
    }

    #[test]
    fn test_shared_waveforms_compare_equal() {
        let description: ProgramDescription = serde_yaml::from_str(YAML).unwrap();
        let program = description.to_loop().unwrap();
        let first = program.children()[0].waveform().unwrap();
        let second = program.children()[1].children()[1].waveform().unwrap();
        assert!(Arc::ptr_eq(first, second));
    }

    #[test]
    fn test_non_integer_repetition() {
        let yaml = r#"
waveforms:
  w: { duration_ns: 192, channels: { X: [[0, 0.0]] } }
program:
  repetition_count: 2.5
  children: [{ waveform: w }]
"#;
        let description: ProgramDescription = serde_yaml::from_str(yaml).unwrap();
        let err = description.to_loop().unwrap_err();
        assert!(matches!(
            err,
            Error::Program(ProgramError::NonIntegerRepetition(_))
        ));
    }

    #[test]
    fn test_unknown_waveform() {
        let yaml = "program: { children: [{ waveform: nope }] }";
        let description: ProgramDescription = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            description.to_loop(),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_empty_leaf() {
        let yaml = "program: { children: [{ repetition_count: 2 }] }";
        let description: ProgramDescription = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            description.to_loop(),
            Err(Error::Program(ProgramError::MissingWaveform))
        ));
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        file.write_all(YAML.as_bytes()).unwrap();
        let description = ProgramDescription::from_file(file.path()).unwrap();
        assert_eq!(description.program.children.len(), 2);
    }

    #[test]
    fn test_from_json_file() {
        let description: ProgramDescription = serde_yaml::from_str(YAML).unwrap();
        let json = serde_json::to_string(&description).unwrap();
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        file.write_all(json.as_bytes()).unwrap();
        let loaded = ProgramDescription::from_file(file.path()).unwrap();
        assert_eq!(loaded, description);
    }
}
