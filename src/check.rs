//! Node-reported update status.
//!
//! The check document prints a JSON object describing the node's update
//! state and the OS image version of the partition it booted from. Only the
//! fields the orchestrator reads are modeled here; anything else the node
//! prints is ignored.

use std::fmt;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Update state reported by the node's update API.
///
/// Only `Idle`, `Available` and `Ready` have defined transitions in the
/// update driver. Every other state, including states this tool does not
/// know about, causes the instance to be skipped.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum UpdateState {
    /// No update in progress
    Idle,
    /// A newer OS image is available to download
    Available,
    /// An update image is written to the inactive partition
    Staged,
    /// The staged update is marked for the next boot
    Ready,
    /// Any state this tool has no transition for
    #[serde(untagged)]
    Other(String),
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateState::Idle => f.write_str("Idle"),
            UpdateState::Available => f.write_str("Available"),
            UpdateState::Staged => f.write_str("Staged"),
            UpdateState::Ready => f.write_str("Ready"),
            UpdateState::Other(state) => f.write_str(state),
        }
    }
}

/// Parsed stdout of one check invocation.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckOutput {
    pub update_state: UpdateState,
    pub active_partition: ActivePartition,
}

/// The partition set the node currently runs from.
#[derive(Debug, Clone, Deserialize)]
pub struct ActivePartition {
    pub image: PartitionImage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartitionImage {
    /// Semantic version of the booted OS image
    pub version: String,
}

impl CheckOutput {
    /// Parse the stdout content of a check invocation.
    ///
    /// Empty or malformed output means the node's report cannot be trusted;
    /// the error asks for manual verification rather than guessing.
    pub fn parse(stdout: &str) -> Result<Self> {
        serde_json::from_str(stdout).map_err(|source| Error::ParseCommandOutput {
            output: stdout.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_state() {
        let out = CheckOutput::parse(
            r#"{"update_state": "Available", "active_partition": { "image": { "version": "1.19.2"}}}"#,
        )
        .unwrap();
        assert_eq!(out.update_state, UpdateState::Available);
        assert_eq!(out.active_partition.image.version, "1.19.2");
    }

    #[test]
    fn extra_fields_are_ignored() {
        let out = CheckOutput::parse(
            r#"{"update_state": "Idle", "most_recent_command": {"cmd_type": "refresh"}, "active_partition": { "image": { "version": "1.19.2", "arch": "x86_64"}}}"#,
        )
        .unwrap();
        assert_eq!(out.update_state, UpdateState::Idle);
    }

    #[test]
    fn unknown_state_is_preserved() {
        let out = CheckOutput::parse(
            r#"{"update_state": "PerformingUpdate", "active_partition": { "image": { "version": "1.19.2"}}}"#,
        )
        .unwrap();
        assert_eq!(
            out.update_state,
            UpdateState::Other("PerformingUpdate".to_string())
        );
        assert_eq!(out.update_state.to_string(), "PerformingUpdate");
    }

    #[test]
    fn empty_output_demands_manual_verification() {
        let err = CheckOutput::parse("").unwrap_err();
        assert!(err
            .to_string()
            .contains("failed to parse command output , manual verification required"));
    }

    #[test]
    fn missing_field_is_a_parse_error() {
        let err = CheckOutput::parse(r#"{"update_state": "Idle"}"#).unwrap_err();
        assert!(matches!(err, Error::ParseCommandOutput { .. }));
    }
}
