//! Commit journal: staging set and durable, append-only commit records
//!
//! Each commit lives at `.vault/commits/<id>/metadata.json` and captures a
//! message, a millisecond timestamp and the full path→digest mapping of the
//! staged files. Records are immutable once written.
//!
//! The commit pipeline maintains a strict ordering so a crash partway
//! through is recoverable to "nothing happened": blobs are written before
//! the commit record references them, the record is durable before the
//! branch ledger moves, and the staging set is cleared only after every
//! prior step succeeded. A failed commit therefore leaves the staging set
//! intact for retry.

use crate::auth::AuthGate;
use crate::branch::BranchLedger;
use crate::error::{Result, VaultError};
use crate::object_store::ObjectStore;
use crate::rollback::ForwardHistory;
use crate::types::{CommitRecord, FileStateMap, FileVersion};
use chrono::Utc;
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Staging set plus append-only commit storage
pub struct CommitJournal {
    /// Root of the tracked working directory
    work_root: PathBuf,
    /// Directory holding one subdirectory per commit
    commits_dir: PathBuf,
    /// Relative paths queued for the next commit
    staged: Mutex<Vec<String>>,
    /// Blob storage for committed content
    store: Arc<ObjectStore>,
    /// Branch ledger advanced on every commit
    branches: Arc<BranchLedger>,
    /// Authorization gate consulted before every operation
    auth: Arc<AuthGate>,
    /// Undo stack invalidated by every successful commit
    forward_history: ForwardHistory,
}

impl std::fmt::Debug for CommitJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitJournal")
            .field("work_root", &self.work_root)
            .field("commits_dir", &self.commits_dir)
            .field("staged", &self.staged.lock().len())
            .finish()
    }
}

impl CommitJournal {
    /// Open the journal rooted at `commits_dir` (created if absent)
    pub fn open(
        work_root: PathBuf,
        commits_dir: PathBuf,
        store: Arc<ObjectStore>,
        branches: Arc<BranchLedger>,
        auth: Arc<AuthGate>,
        forward_history: ForwardHistory,
    ) -> Result<Self> {
        fs::create_dir_all(&commits_dir)?;
        Ok(Self {
            work_root,
            commits_dir,
            staged: Mutex::new(Vec::new()),
            store,
            branches,
            auth,
            forward_history,
        })
    }

    /// Queue a path for the next commit
    ///
    /// The path must exist in the working directory. Staging the same path
    /// twice is harmless: it is recorded once.
    pub fn stage(&self, path: &Path) -> Result<()> {
        self.auth.require_write()?;
        let rel = self.relative_path(path);
        if !self.work_root.join(&rel).exists() {
            return Err(VaultError::FileNotFound(path.to_path_buf()));
        }
        let mut staged = self.staged.lock();
        if !staged.contains(&rel) {
            debug!("Staged {}", rel);
            staged.push(rel);
        }
        Ok(())
    }

    /// Snapshot of the current staging set
    pub fn staged(&self) -> Result<Vec<String>> {
        self.auth.require_read()?;
        Ok(self.staged.lock().clone())
    }

    /// Create a commit from the staged files
    ///
    /// Fails closed when nothing is staged. On success the branch ledger
    /// records the new file state, the branch head advances to the new
    /// commit, any forward history from earlier rollbacks is discarded, and
    /// the staging set is cleared. On failure the staging set is left
    /// untouched so the caller can retry the same files.
    pub fn commit(&self, message: &str) -> Result<CommitRecord> {
        self.auth.require_write()?;

        let staged = self.staged.lock().clone();
        if staged.is_empty() {
            return Err(VaultError::NothingStaged);
        }

        let mut record = CommitRecord {
            commit_id: new_commit_id(),
            message: message.to_string(),
            timestamp: Utc::now().timestamp_millis(),
            files: FileStateMap::new(),
        };

        // Blobs must be durable before the record references them.
        for rel in &staged {
            let abs = self.work_root.join(rel);
            let digest = self.store.put_file(&abs)?;
            record.files.insert(rel.clone(), digest);
        }

        self.save_record(&record)?;

        let branch = self.branches.current()?;
        self.branches.save_file_state(&branch, &record.files)?;
        self.branches.set_head(&branch, &record.commit_id)?;

        // Forward snapshots reference state this commit has superseded.
        self.forward_history.clear();

        self.staged.lock().clear();
        info!(
            "Created commit {} on branch {} ({} files)",
            record.short_id(),
            branch,
            record.files.len()
        );
        Ok(record)
    }

    /// Version history of a single path, newest first
    pub fn history(&self, path: &Path) -> Result<Vec<FileVersion>> {
        self.auth.require_read()?;
        let rel = self.relative_path(path);
        let mut versions: Vec<FileVersion> = self
            .load_all_records()?
            .into_iter()
            .filter_map(|record| {
                record.files.get(&rel).map(|digest| FileVersion {
                    digest: digest.clone(),
                    timestamp: record.timestamp,
                    message: record.message.clone(),
                })
            })
            .collect();
        versions.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(versions)
    }

    /// Restore a path's content as recorded in a specific commit
    ///
    /// Overwrites any existing content at the working path.
    pub fn checkout(&self, path: &Path, commit_id: &str) -> Result<()> {
        self.auth.require_read()?;
        let rel = self.relative_path(path);
        let record = self.load_record(commit_id)?;
        let digest = record
            .files
            .get(&rel)
            .ok_or_else(|| VaultError::FileNotInCommit {
                path: PathBuf::from(&rel),
                commit_id: commit_id.to_string(),
            })?;
        self.store.materialize(digest, &self.work_root.join(&rel))?;
        debug!("Checked out {} from commit {}", rel, &commit_id[..commit_id.len().min(8)]);
        Ok(())
    }

    /// Load a single commit record by id
    pub fn load_record(&self, commit_id: &str) -> Result<CommitRecord> {
        let metadata_path = self.commits_dir.join(commit_id).join("metadata.json");
        if !metadata_path.exists() {
            return Err(VaultError::CommitNotFound(commit_id.to_string()));
        }
        let contents = fs::read_to_string(metadata_path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Load every commit record in the journal, in no particular order
    pub fn load_all_records(&self) -> Result<Vec<CommitRecord>> {
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.commits_dir)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().to_string();
            match self.load_record(&id) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unreadable commit {}: {}", id, e),
            }
        }
        Ok(records)
    }

    /// Root of the tracked working directory
    pub fn work_root(&self) -> &Path {
        &self.work_root
    }

    /// Normalize a path to the relative string form used as a commit key
    fn relative_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.work_root)
            .unwrap_or(path)
            .to_string_lossy()
            .to_string()
    }
}

/// Generate a unique commit id: hex millisecond timestamp plus a random
/// disambiguator. Uniqueness, not ordering, is the requirement.
fn new_commit_id() -> String {
    let millis = Utc::now().timestamp_millis();
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    format!("{:x}-{}", millis, &nonce[..6])
}

impl CommitJournal {
    fn save_record(&self, record: &CommitRecord) -> Result<()> {
        let commit_dir = self.commits_dir.join(&record.commit_id);
        fs::create_dir_all(&commit_dir)?;
        let json = serde_json::to_string_pretty(record)?;
        fs::write(commit_dir.join("metadata.json"), json)?;
        Ok(())
    }
}
