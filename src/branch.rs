//! Branch ledger: named branches, head pointers and materialized file state
//!
//! Each branch is a directory under `.vault/branches/<name>/` holding two
//! files:
//!
//! - `HEAD` — raw text containing the id of the branch's head commit
//! - `state.json` — the last file-state mapping materialized on the branch
//!
//! The ledger also owns the process-wide "current branch" pointer. A switch
//! validates branch existence and applies the optional head update before
//! the pointer moves, so a failed switch leaves the caller's view unchanged.

use crate::auth::AuthGate;
use crate::error::{Result, VaultError};
use crate::types::{BranchState, FileStateMap};
use parking_lot::RwLock;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Durable record of branches plus the current-branch pointer
pub struct BranchLedger {
    /// Directory holding one subdirectory per branch
    branches_dir: PathBuf,
    /// Name of the currently selected branch
    current: RwLock<String>,
    /// Authorization gate consulted before every operation
    auth: Arc<AuthGate>,
}

impl std::fmt::Debug for BranchLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BranchLedger")
            .field("branches_dir", &self.branches_dir)
            .field("current", &*self.current.read())
            .finish()
    }
}

impl BranchLedger {
    /// Default branch created implicitly at vault initialization
    pub const DEFAULT_BRANCH: &'static str = "master";

    /// Open the ledger rooted at `branches_dir` (created if absent)
    ///
    /// The current-branch pointer starts at `master`; it is in-memory state
    /// scoped to this ledger instance, not persisted.
    pub fn open(branches_dir: PathBuf, auth: Arc<AuthGate>) -> Result<Self> {
        fs::create_dir_all(&branches_dir)?;
        Ok(Self {
            branches_dir,
            current: RwLock::new(Self::DEFAULT_BRANCH.to_string()),
            auth,
        })
    }

    /// Create a branch with an empty file state
    pub fn create(&self, name: &str) -> Result<()> {
        self.auth.require_write()?;
        let branch_dir = self.branch_dir(name);
        if branch_dir.exists() {
            return Err(VaultError::BranchAlreadyExists(name.to_string()));
        }
        fs::create_dir_all(&branch_dir)?;
        self.save_file_state(name, &FileStateMap::new())?;
        info!("Created branch {}", name);
        Ok(())
    }

    /// Check whether a branch exists
    pub fn exists(&self, name: &str) -> bool {
        self.branch_dir(name).exists()
    }

    /// Write the branch's head pointer
    pub fn set_head(&self, name: &str, commit_id: &str) -> Result<()> {
        self.auth.require_write()?;
        let branch_dir = self.branch_dir(name);
        if !branch_dir.exists() {
            return Err(VaultError::BranchNotFound(name.to_string()));
        }
        fs::write(branch_dir.join("HEAD"), commit_id)?;
        debug!("Branch {} head -> {}", name, &commit_id[..commit_id.len().min(8)]);
        Ok(())
    }

    /// Read the branch's head commit id, if one has been recorded
    pub fn head(&self, name: &str) -> Result<Option<String>> {
        self.auth.require_read()?;
        let head_path = self.branch_dir(name).join("HEAD");
        if !head_path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(head_path)?;
        let id = contents.trim().to_string();
        Ok(if id.is_empty() { None } else { Some(id) })
    }

    /// Switch the current-branch pointer, optionally advancing the head
    ///
    /// Existence is validated and the head update applied before the
    /// pointer moves, so the switch never partially applies from the
    /// caller's observable viewpoint.
    pub fn switch_to(&self, name: &str, commit_id: Option<&str>) -> Result<()> {
        self.auth.require_write()?;
        if !self.exists(name) {
            return Err(VaultError::BranchNotFound(name.to_string()));
        }
        if let Some(id) = commit_id {
            self.set_head(name, id)?;
        }
        *self.current.write() = name.to_string();
        debug!("Switched to branch {}", name);
        Ok(())
    }

    /// Name of the currently selected branch
    pub fn current(&self) -> Result<String> {
        self.auth.require_read()?;
        Ok(self.current.read().clone())
    }

    /// List branch names, sorted for deterministic output
    pub fn list(&self) -> Result<Vec<String>> {
        self.auth.require_read()?;
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.branches_dir)? {
            let entry = entry?;
            if entry.path().is_dir() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Persist the branch's materialized file state
    pub fn save_file_state(&self, name: &str, files: &FileStateMap) -> Result<()> {
        self.auth.require_write()?;
        let branch_dir = self.branch_dir(name);
        fs::create_dir_all(&branch_dir)?;
        let state = BranchState { files: files.clone() };
        let json = serde_json::to_string_pretty(&state)?;
        fs::write(branch_dir.join("state.json"), json)?;
        Ok(())
    }

    /// Load the branch's materialized file state
    ///
    /// A branch that has never committed yields an empty mapping, not an
    /// error.
    pub fn load_file_state(&self, name: &str) -> Result<FileStateMap> {
        self.auth.require_read()?;
        let state_path = self.branch_dir(name).join("state.json");
        if !state_path.exists() {
            return Ok(FileStateMap::new());
        }
        let contents = fs::read_to_string(state_path)?;
        let state: BranchState = serde_json::from_str(&contents)?;
        Ok(state.files)
    }

    fn branch_dir(&self, name: &str) -> PathBuf {
        self.branches_dir.join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ledger() -> (BranchLedger, Arc<AuthGate>, TempDir) {
        let dir = TempDir::new().unwrap();
        let auth = Arc::new(AuthGate::open(dir.path()).unwrap());
        let ledger = BranchLedger::open(dir.path().join("branches"), auth.clone()).unwrap();
        (ledger, auth, dir)
    }

    #[test]
    fn test_create_and_list() {
        let (ledger, _auth, _dir) = ledger();
        ledger.create("master").unwrap();
        ledger.create("feature").unwrap();
        assert_eq!(ledger.list().unwrap(), vec!["feature", "master"]);
    }

    #[test]
    fn test_duplicate_create_fails() {
        let (ledger, _auth, _dir) = ledger();
        ledger.create("master").unwrap();
        let err = ledger.create("master").unwrap_err();
        assert!(matches!(err, VaultError::BranchAlreadyExists(_)));
    }

    #[test]
    fn test_head_round_trip() {
        let (ledger, _auth, _dir) = ledger();
        ledger.create("master").unwrap();
        assert_eq!(ledger.head("master").unwrap(), None);
        ledger.set_head("master", "abc123").unwrap();
        assert_eq!(ledger.head("master").unwrap().as_deref(), Some("abc123"));
    }

    #[test]
    fn test_switch_validates_existence() {
        let (ledger, _auth, _dir) = ledger();
        ledger.create("master").unwrap();
        let err = ledger.switch_to("nope", None).unwrap_err();
        assert!(matches!(err, VaultError::BranchNotFound(_)));
        // Failed switch must not move the pointer.
        assert_eq!(ledger.current().unwrap(), "master");
    }

    #[test]
    fn test_switch_updates_head_and_pointer() {
        let (ledger, _auth, _dir) = ledger();
        ledger.create("master").unwrap();
        ledger.create("dev").unwrap();
        ledger.switch_to("dev", Some("c1")).unwrap();
        assert_eq!(ledger.current().unwrap(), "dev");
        assert_eq!(ledger.head("dev").unwrap().as_deref(), Some("c1"));
    }

    #[test]
    fn test_file_state_defaults_to_empty() {
        let (ledger, _auth, _dir) = ledger();
        ledger.create("master").unwrap();
        assert!(ledger.load_file_state("master").unwrap().is_empty());

        let mut files = FileStateMap::new();
        files.insert("a.txt".to_string(), "d1".to_string());
        ledger.save_file_state("master", &files).unwrap();
        assert_eq!(ledger.load_file_state("master").unwrap(), files);
    }

    #[test]
    fn test_mutations_require_write() {
        let (ledger, auth, _dir) = ledger();
        ledger.create("master").unwrap();
        auth.logout();
        assert!(ledger.create("x").unwrap_err().is_unauthorized());
        assert!(ledger.set_head("master", "c").unwrap_err().is_unauthorized());
        assert!(ledger.list().unwrap_err().is_unauthorized());
    }
}
