//! Core data types shared across the filevault library
//!
//! The serialized forms here define the on-disk metadata layout:
//!
//! ```text
//! <root>/.vault/config.json                    VaultConfig
//! <root>/.vault/commits/<id>/metadata.json     CommitRecord
//! <root>/.vault/branches/<name>/state.json     BranchState
//! ```
//!
//! Path→digest mappings are always serialized as JSON objects with string
//! keys, including when empty (`{}`, never `null`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Mapping of tracked relative paths to content digests.
///
/// `BTreeMap` keeps serialization order deterministic, which matters for
/// test reproducibility and stable on-disk output.
pub type FileStateMap = BTreeMap<String, String>;

/// An immutable commit record as persisted in the journal
///
/// A commit captures a message, a millisecond timestamp and the full mapping
/// of staged paths to content digests at commit time. There is no explicit
/// parent pointer: ordering between commits is derived from timestamps when
/// history is displayed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitRecord {
    /// Opaque unique identifier
    pub commit_id: String,
    /// User-supplied commit message
    pub message: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    /// Paths committed, mapped to their content digests
    pub files: FileStateMap,
}

impl CommitRecord {
    /// First eight characters of the id, for log output
    pub fn short_id(&self) -> &str {
        &self.commit_id[..self.commit_id.len().min(8)]
    }
}

/// One entry in a single file's version history, newest first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileVersion {
    /// Content digest the file had in this commit
    pub digest: String,
    /// Commit timestamp in milliseconds since epoch
    pub timestamp: i64,
    /// Commit message
    pub message: String,
}

/// Last-materialized file state of a branch (`state.json`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BranchState {
    /// Tracked paths and their digests; `{}` when the branch never committed
    pub files: FileStateMap,
}

/// Vault configuration written once at initialization (`config.json`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Format version
    pub version: String,
}

impl VaultConfig {
    /// Current on-disk format version
    pub const FORMAT_VERSION: &'static str = "1.0";

    /// Build a config stamped with the current time
    pub fn new() -> Self {
        Self {
            created_at: Utc::now(),
            version: Self::FORMAT_VERSION.to_string(),
        }
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-side status of a file during reconciliation, recomputed every pass
#[derive(Debug, Clone)]
pub struct FileStatus {
    /// Absolute path that was probed
    pub path: PathBuf,
    /// Whether the path exists as a regular file
    pub exists: bool,
    /// Content digest, empty when the file is absent
    pub digest: String,
}

impl FileStatus {
    /// Status for a path that does not exist
    pub fn absent(path: PathBuf) -> Self {
        Self {
            path,
            exists: false,
            digest: String::new(),
        }
    }
}
