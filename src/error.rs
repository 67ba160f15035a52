//! Error types for the filevault library
//!
//! Every public operation returns a typed, discriminated error rather than an
//! opaque failure. Authorization failures are always checked before any side
//! effect, so observing [`VaultError::Unauthorized`] guarantees that no
//! on-disk state was touched by the call.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the filevault library
pub type Result<T> = std::result::Result<T, VaultError>;

/// Main error type for all vault operations
#[derive(Debug, Error)]
pub enum VaultError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The current identity lacks the capability required by the operation
    #[error("Unauthorized: {operation} capability required")]
    Unauthorized {
        /// Capability that was checked ("read" or "write")
        operation: &'static str,
    },

    /// Branch not found in the ledger
    #[error("Branch not found: {0}")]
    BranchNotFound(String),

    /// A branch with this name already exists
    #[error("Branch already exists: {0}")]
    BranchAlreadyExists(String),

    /// Commit not found in the journal
    #[error("Commit not found: {0}")]
    CommitNotFound(String),

    /// Object not found in content-addressed storage
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    /// The commit exists but does not record the requested path
    #[error("File {path:?} not present in commit {commit_id}")]
    FileNotInCommit {
        /// Requested path
        path: PathBuf,
        /// Commit that was inspected
        commit_id: String,
    },

    /// A path given to `stage` does not exist on disk
    #[error("File not found: {0:?}")]
    FileNotFound(PathBuf),

    /// Commit attempted with an empty staging set
    #[error("Nothing staged for commit")]
    NothingStaged,

    /// Roll-forward attempted with an empty forward-history stack
    #[error("No forward history available")]
    NoForwardHistory,

    /// Rollback index past the end of the branch history
    #[error("History index {index} out of range ({len} commits)")]
    HistoryIndexOutOfRange {
        /// Requested index
        index: usize,
        /// Number of commits in the branch
        len: usize,
    },

    /// Storage-related errors (blob or metadata I/O)
    #[error("Storage error: {0}")]
    Storage(String),

    /// A guarded state application failed and was rolled back from backups
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Vault already exists at the target location
    #[error("Vault already exists at {0:?}")]
    VaultAlreadyExists(PathBuf),

    /// No vault present at the target location
    #[error("Vault not initialized at {0:?}")]
    VaultNotInitialized(PathBuf),

    /// Synchronization source directory is missing
    #[error("Sync source directory does not exist: {0:?}")]
    SourceMissing(PathBuf),

    /// Synchronization pair has not been initialized
    #[error("Sync not initialized: call initialize_sync first")]
    SyncNotInitialized,
}

impl VaultError {
    /// Create a storage error with a custom message
    pub fn storage(msg: impl Into<String>) -> Self {
        VaultError::Storage(msg.into())
    }

    /// Create a read-capability authorization error
    pub fn read_denied() -> Self {
        VaultError::Unauthorized { operation: "read" }
    }

    /// Create a write-capability authorization error
    pub fn write_denied() -> Self {
        VaultError::Unauthorized { operation: "write" }
    }

    /// Check if this error is an authorization failure
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, VaultError::Unauthorized { .. })
    }

    /// Check if this error means a referenced entity is absent
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            VaultError::BranchNotFound(_)
                | VaultError::CommitNotFound(_)
                | VaultError::ObjectNotFound(_)
                | VaultError::FileNotInCommit { .. }
                | VaultError::FileNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = VaultError::BranchNotFound("feature".to_string());
        assert_eq!(err.to_string(), "Branch not found: feature");

        let err = VaultError::read_denied();
        assert_eq!(err.to_string(), "Unauthorized: read capability required");
    }

    #[test]
    fn test_error_classification() {
        assert!(VaultError::write_denied().is_unauthorized());
        assert!(VaultError::CommitNotFound("abc".to_string()).is_not_found());
        assert!(!VaultError::NothingStaged.is_not_found());
    }
}
