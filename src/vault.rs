//! Vault facade: composition root and public API surface
//!
//! [`Vault`] owns one instance of every manager, wires their shared
//! dependencies (the authorization gate and the forward-history stack are
//! single instances handed to every collaborator at construction) and
//! exposes the whole capability surface behind one type.
//!
//! Layout under the vault root:
//!
//! ```text
//! <root>/.vault/config.json
//! <root>/.vault/objects/<digest>
//! <root>/.vault/commits/<id>/metadata.json
//! <root>/.vault/branches/<name>/{HEAD,state.json}
//! <root>/.vault/users.json
//! ```
//!
//! Thread-safety contract: the individual managers guard their own state
//! with internal locks, but the semantic operations (commit, rollback,
//! synchronize) assume a single mutating agent at a time. An embedder that
//! runs the change watcher while also issuing foreground writes must
//! serialize the two externally.

use crate::auth::{AuthGate, UserRole};
use crate::branch::BranchLedger;
use crate::commit::CommitJournal;
use crate::error::{Result, VaultError};
use crate::object_store::ObjectStore;
use crate::rollback::{CommitState, ForwardHistory, RollbackEngine};
use crate::sync::SyncReconciler;
use crate::types::{CommitRecord, FileVersion, VaultConfig};
use crate::watcher::{ChangeWatcher, DEFAULT_POLL_INTERVAL};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Name of the internal storage directory under the vault root
pub const VAULT_DIR: &str = ".vault";

/// A versioned, synchronizable directory
pub struct Vault {
    /// Root of the tracked working directory
    root: PathBuf,
    auth: Arc<AuthGate>,
    store: Arc<ObjectStore>,
    branches: Arc<BranchLedger>,
    journal: Arc<CommitJournal>,
    rollback: RollbackEngine,
    sync: Arc<SyncReconciler>,
    watcher: ChangeWatcher,
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault").field("root", &self.root).finish()
    }
}

impl Vault {
    /// Initialize a new vault at `root`
    ///
    /// Creates the internal storage skeleton, writes the config file and
    /// creates the `master` branch. Fails if a vault already exists there.
    pub fn init(root: &Path) -> Result<Self> {
        let vault_dir = root.join(VAULT_DIR);
        if vault_dir.exists() {
            return Err(VaultError::VaultAlreadyExists(root.to_path_buf()));
        }
        fs::create_dir_all(&vault_dir)?;

        let config = VaultConfig::new();
        let json = serde_json::to_string_pretty(&config)?;
        fs::write(vault_dir.join("config.json"), json)?;

        let vault = Self::wire(root.to_path_buf())?;
        vault.branches.create(BranchLedger::DEFAULT_BRANCH)?;
        info!("Initialized vault at {:?}", root);
        Ok(vault)
    }

    /// Open an existing vault at `root`
    pub fn open(root: &Path) -> Result<Self> {
        if !Self::is_initialized(root) {
            return Err(VaultError::VaultNotInitialized(root.to_path_buf()));
        }
        Self::wire(root.to_path_buf())
    }

    /// Whether `root` holds an initialized vault
    pub fn is_initialized(root: &Path) -> bool {
        root.join(VAULT_DIR).join("config.json").exists()
    }

    fn wire(root: PathBuf) -> Result<Self> {
        let vault_dir = root.join(VAULT_DIR);
        let auth = Arc::new(AuthGate::open(&vault_dir)?);
        let store = Arc::new(ObjectStore::new(vault_dir.join("objects"), auth.clone())?);
        let branches = Arc::new(BranchLedger::open(vault_dir.join("branches"), auth.clone())?);
        let forward_history = ForwardHistory::new();
        let journal = Arc::new(CommitJournal::open(
            root.clone(),
            vault_dir.join("commits"),
            store.clone(),
            branches.clone(),
            auth.clone(),
            forward_history.clone(),
        )?);
        let rollback = RollbackEngine::new(
            store.clone(),
            journal.clone(),
            branches.clone(),
            auth.clone(),
            forward_history,
        );
        let sync = Arc::new(SyncReconciler::new(
            store.clone(),
            journal.clone(),
            auth.clone(),
        ));
        let watcher = ChangeWatcher::new(root.clone(), sync.clone(), DEFAULT_POLL_INTERVAL);
        Ok(Self {
            root,
            auth,
            store,
            branches,
            journal,
            rollback,
            sync,
            watcher,
        })
    }

    /// Root of the tracked working directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The vault's authorization gate
    pub fn auth(&self) -> &Arc<AuthGate> {
        &self.auth
    }

    // --- version control -------------------------------------------------

    /// Queue a file for the next commit
    pub fn stage(&self, path: &Path) -> Result<()> {
        self.journal.stage(path)
    }

    /// Commit everything staged
    pub fn commit(&self, message: &str) -> Result<CommitRecord> {
        self.journal.commit(message)
    }

    /// Version history of a single path, newest first
    pub fn file_history(&self, path: &Path) -> Result<Vec<FileVersion>> {
        self.journal.history(path)
    }

    /// Restore a path's content from a specific commit
    pub fn checkout_file(&self, path: &Path, commit_id: &str) -> Result<()> {
        self.journal.checkout(path, commit_id)
    }

    // --- branches --------------------------------------------------------

    /// Create a branch with an empty file state
    pub fn create_branch(&self, name: &str) -> Result<()> {
        self.branches.create(name)
    }

    /// Switch the current branch
    pub fn switch_branch(&self, name: &str) -> Result<()> {
        self.branches.switch_to(name, None)
    }

    /// List branch names
    pub fn list_branches(&self) -> Result<Vec<String>> {
        self.branches.list()
    }

    /// Name of the current branch
    pub fn current_branch(&self) -> Result<String> {
        self.branches.current()
    }

    // --- rollback --------------------------------------------------------

    /// Roll the working directory back to the commit at `index`
    /// (newest-first: 0 is the latest commit)
    pub fn rollback_to_commit(&self, index: usize) -> Result<()> {
        self.rollback.rollback_to_commit(index)
    }

    /// Undo the most recent rollback
    pub fn roll_forward(&self) -> Result<()> {
        self.rollback.roll_forward()
    }

    /// Whether a roll-forward is currently possible
    pub fn can_roll_forward(&self) -> bool {
        self.rollback.can_roll_forward()
    }

    /// Discard all roll-forward capability
    pub fn clear_forward_history(&self) -> Result<()> {
        self.rollback.clear_forward_history()
    }

    /// The current branch's commits, newest first
    pub fn commit_history(&self) -> Result<Vec<CommitState>> {
        let branch = self.branches.current()?;
        self.rollback.commits_in_branch(&branch)
    }

    /// Render the current branch's history for display
    pub fn format_history(&self) -> Result<String> {
        self.rollback.format_history()
    }

    // --- synchronization -------------------------------------------------

    /// Set up synchronization between the vault root and a mirror directory
    ///
    /// The vault's working directory is always the source side: reconciled
    /// changes are committed into this vault's history.
    pub fn initialize_sync(&self, dest: &Path) -> Result<()> {
        self.sync.initialize(&self.root, dest)
    }

    /// Run a full reconciliation pass; `Ok(false)` reports partial failure
    pub fn synchronize(&self) -> Result<bool> {
        self.sync.synchronize()
    }

    /// Reconcile a single relative path
    pub fn synchronize_path(&self, rel: &str) -> Result<()> {
        self.sync.synchronize_path(rel)
    }

    /// Relative paths differing between the two trees
    pub fn modified_files(&self) -> Result<Vec<String>> {
        self.sync.modified_files()
    }

    /// Paths present on both sides with differing content
    pub fn conflicting_files(&self) -> Result<Vec<String>> {
        self.sync.conflicting_files()
    }

    /// Overwrite one side of a conflict with the other
    pub fn resolve_conflict(&self, rel: &str, use_source: bool) -> Result<()> {
        self.sync.resolve_conflict(rel, use_source)
    }

    // --- watching --------------------------------------------------------

    /// Start the background change watcher over the vault root
    pub fn start_watch(&self) -> Result<()> {
        self.watcher.start()
    }

    /// Stop the watcher, blocking until its thread has exited
    pub fn stop_watch(&self) {
        self.watcher.stop()
    }

    /// Whether the watcher is running
    pub fn is_watching(&self) -> bool {
        self.watcher.is_running()
    }

    // --- identities ------------------------------------------------------

    /// Establish the current identity from credentials
    pub fn authenticate(&self, username: &str, password: &str) -> bool {
        self.auth.authenticate(username, password)
    }

    /// Drop the current identity; subsequent operations are unauthorized
    pub fn logout(&self) {
        self.auth.logout()
    }

    /// Create a user; fails if the name is taken
    pub fn create_user(&self, username: &str, password: &str, role: UserRole) -> Result<()> {
        self.auth.create_user(username, password, role)
    }

    /// Username of the current identity, if any
    pub fn current_username(&self) -> Option<String> {
        self.auth.current_username()
    }

    // --- maintenance -----------------------------------------------------

    /// Delete every blob unreferenced by any commit or branch state
    ///
    /// The live set is the union of digests across all commit records and
    /// all branch states; everything else in the object store is swept.
    /// Returns the number of blobs removed.
    pub fn collect_garbage(&self) -> Result<usize> {
        self.auth.require_write()?;
        let mut live: HashSet<String> = HashSet::new();
        for record in self.journal.load_all_records()? {
            live.extend(record.files.into_values());
        }
        for branch in self.branches.list()? {
            live.extend(self.branches.load_file_state(&branch)?.into_values());
        }
        let removed = self.store.collect_garbage(&live)?;
        if removed > 0 {
            info!("Garbage collection removed {} unreferenced blobs", removed);
        }
        Ok(removed)
    }
}

impl Drop for Vault {
    fn drop(&mut self) {
        self.watcher.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_creates_skeleton_and_master() {
        let dir = TempDir::new().unwrap();
        let vault = Vault::init(dir.path()).unwrap();

        assert!(dir.path().join(".vault/config.json").exists());
        assert!(dir.path().join(".vault/objects").exists());
        assert!(dir.path().join(".vault/commits").exists());
        assert_eq!(vault.list_branches().unwrap(), vec!["master"]);
        assert_eq!(vault.current_branch().unwrap(), "master");
    }

    #[test]
    fn test_double_init_fails() {
        let dir = TempDir::new().unwrap();
        let _vault = Vault::init(dir.path()).unwrap();
        let err = Vault::init(dir.path()).unwrap_err();
        assert!(matches!(err, VaultError::VaultAlreadyExists(_)));
    }

    #[test]
    fn test_open_requires_initialization() {
        let dir = TempDir::new().unwrap();
        let err = Vault::open(dir.path()).unwrap_err();
        assert!(matches!(err, VaultError::VaultNotInitialized(_)));

        let _vault = Vault::init(dir.path()).unwrap();
        assert!(Vault::is_initialized(dir.path()));
    }

    #[test]
    fn test_open_sees_existing_history() {
        let dir = TempDir::new().unwrap();
        let commit_id = {
            let vault = Vault::init(dir.path()).unwrap();
            fs::write(dir.path().join("a.txt"), "v1").unwrap();
            vault.stage(&dir.path().join("a.txt")).unwrap();
            vault.commit("c1").unwrap().commit_id
        };

        let vault = Vault::open(dir.path()).unwrap();
        // Reopening establishes no identity; log back in first.
        assert!(vault.authenticate("admin", "admin123"));
        let history = vault.commit_history().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].commit_id, commit_id);
        // Forward history is in-memory only and does not survive reopen.
        assert!(!vault.can_roll_forward());
    }

    #[test]
    fn test_collect_garbage_sweeps_unreferenced_blobs() {
        let dir = TempDir::new().unwrap();
        let vault = Vault::init(dir.path()).unwrap();

        let file = dir.path().join("a.txt");
        fs::write(&file, "orphaned").unwrap();
        let digest = vault.store.put_file(&file).unwrap();

        fs::write(&file, "committed").unwrap();
        vault.stage(&file).unwrap();
        let record = vault.commit("c1").unwrap();
        let live_digest = record.files.get("a.txt").unwrap();

        assert_eq!(vault.collect_garbage().unwrap(), 1);
        assert!(!vault.store.exists(&digest));
        assert!(vault.store.exists(live_digest));
    }

    #[test]
    fn test_branch_switching_round_trip() {
        let dir = TempDir::new().unwrap();
        let vault = Vault::init(dir.path()).unwrap();

        vault.create_branch("feature").unwrap();
        vault.switch_branch("feature").unwrap();
        assert_eq!(vault.current_branch().unwrap(), "feature");

        let err = vault.switch_branch("missing").unwrap_err();
        assert!(matches!(err, VaultError::BranchNotFound(_)));
        assert_eq!(vault.current_branch().unwrap(), "feature");
    }
}
