//! Rollback and roll-forward over commit history
//!
//! The engine derives an ordered, newest-first commit list for the current
//! branch and can move the working directory (and the branch ledger) to any
//! entry in that list. Before mutating anything it captures the live state
//! of every tracked file and pushes it onto a LIFO forward-history stack, so
//! a single roll-forward exactly undoes the most recent rollback.
//!
//! Two deliberate asymmetries are part of the contract:
//!
//! - A failed state application restores the working directory from backups,
//!   but the forward-history push that preceded it is *not* popped.
//! - Every successful commit clears the forward-history stack (the snapshots
//!   reference state the commit has superseded), so roll-forward is an undo
//!   for rollbacks only, never a general redo.
//!
//! Branch history here is a flat scan of the whole journal sorted by
//! timestamp: commits carry no parent pointers, so branches do not isolate
//! history created on other branches.

use crate::auth::AuthGate;
use crate::branch::BranchLedger;
use crate::commit::CommitJournal;
use crate::error::{Result, VaultError};
use crate::object_store::ObjectStore;
use crate::txn::BackupGuard;
use crate::types::{CommitRecord, FileStateMap};
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fs;
use std::sync::Arc;
use tracing::{debug, info};

/// A point-in-time file-state snapshot, either loaded from a commit record
/// or captured live before a rollback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitState {
    /// Commit this state is attributed to; for pre-rollback snapshots this
    /// is the newest commit's id, not a fresh one
    pub commit_id: String,
    /// Message of the commit, or a fixed marker for live snapshots
    pub message: String,
    /// Milliseconds since epoch
    pub timestamp: i64,
    /// Tracked paths and their digests
    pub file_states: FileStateMap,
}

impl From<CommitRecord> for CommitState {
    fn from(record: CommitRecord) -> Self {
        Self {
            commit_id: record.commit_id,
            message: record.message,
            timestamp: record.timestamp,
            file_states: record.files,
        }
    }
}

/// Shared LIFO stack of pre-rollback snapshots
///
/// Cloneable handle: the rollback engine pushes and pops, the commit
/// journal clears it on every successful commit. In-memory only — forward
/// history does not survive a process restart.
#[derive(Debug, Clone, Default)]
pub struct ForwardHistory {
    stack: Arc<Mutex<Vec<CommitState>>>,
}

impl ForwardHistory {
    /// Create an empty stack
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a snapshot
    pub fn push(&self, state: CommitState) {
        self.stack.lock().push(state);
    }

    /// Pop the most recent snapshot
    pub fn pop(&self) -> Option<CommitState> {
        self.stack.lock().pop()
    }

    /// Discard all snapshots
    pub fn clear(&self) {
        self.stack.lock().clear();
    }

    /// Whether the stack holds no snapshots
    pub fn is_empty(&self) -> bool {
        self.stack.lock().is_empty()
    }

    /// Number of snapshots on the stack
    pub fn len(&self) -> usize {
        self.stack.lock().len()
    }
}

/// State-transition engine over the commit journal and branch ledger
pub struct RollbackEngine {
    /// Blob storage, used to digest live files for snapshots
    store: Arc<ObjectStore>,
    /// Commit journal providing records and checkouts
    journal: Arc<CommitJournal>,
    /// Branch ledger advanced by every applied state
    branches: Arc<BranchLedger>,
    /// Authorization gate consulted before every operation
    auth: Arc<AuthGate>,
    /// Undo stack shared with the journal
    forward_history: ForwardHistory,
}

impl std::fmt::Debug for RollbackEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollbackEngine")
            .field("forward_history_len", &self.forward_history.len())
            .finish()
    }
}

impl RollbackEngine {
    /// Wire the engine to its collaborators
    pub fn new(
        store: Arc<ObjectStore>,
        journal: Arc<CommitJournal>,
        branches: Arc<BranchLedger>,
        auth: Arc<AuthGate>,
        forward_history: ForwardHistory,
    ) -> Self {
        Self {
            store,
            journal,
            branches,
            auth,
            forward_history,
        }
    }

    /// Ordered commit list for a branch, newest first
    ///
    /// Flat scan over the whole journal: every commit record is considered
    /// regardless of which branch created it.
    pub fn commits_in_branch(&self, _branch: &str) -> Result<Vec<CommitState>> {
        self.auth.require_read()?;
        let mut commits: Vec<CommitState> = self
            .journal
            .load_all_records()?
            .into_iter()
            .map(CommitState::from)
            .collect();
        commits.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(commits)
    }

    /// Union of every path ever committed on the branch
    pub fn tracked_files(&self, branch: &str) -> Result<BTreeSet<String>> {
        let mut tracked = BTreeSet::new();
        for commit in self.commits_in_branch(branch)? {
            tracked.extend(commit.file_states.into_keys());
        }
        Ok(tracked)
    }

    /// Snapshot the live digests of every tracked path that exists on disk
    ///
    /// The snapshot is the undo point for returning to "where we were"; the
    /// caller tags it with the newest commit's id before pushing it.
    pub fn current_commit_state(&self) -> Result<CommitState> {
        self.auth.require_read()?;
        let branch = self.branches.current()?;
        let mut file_states = FileStateMap::new();
        for rel in self.tracked_files(&branch)? {
            let abs = self.journal.work_root().join(&rel);
            if abs.exists() {
                let digest = self.store.digest_file(&abs)?;
                file_states.insert(rel, digest);
            }
        }
        Ok(CommitState {
            commit_id: String::new(),
            message: "Current state before rollback".to_string(),
            timestamp: Utc::now().timestamp_millis(),
            file_states,
        })
    }

    /// Move the working directory and branch to the commit at `index`
    ///
    /// `index` is newest-first: 0 is the latest commit. The live state is
    /// pushed onto the forward-history stack before anything mutates, so a
    /// following [`RollbackEngine::roll_forward`] undoes this call exactly.
    pub fn rollback_to_commit(&self, index: usize) -> Result<()> {
        self.auth.require_write()?;

        let branch = self.branches.current()?;
        let commits = self.commits_in_branch(&branch)?;
        if index >= commits.len() {
            return Err(VaultError::HistoryIndexOutOfRange {
                index,
                len: commits.len(),
            });
        }

        let mut snapshot = self.current_commit_state()?;
        snapshot.commit_id = commits[0].commit_id.clone();

        // Uncommitted edits have digests no commit references yet; persist
        // their blobs so roll-forward can materialize the exact bytes.
        for (rel, digest) in &snapshot.file_states {
            if !self.store.exists(digest) {
                self.store.put(&self.journal.work_root().join(rel), digest)?;
            }
        }
        self.forward_history.push(snapshot);

        info!(
            "Rolling back branch {} to commit {} (index {})",
            branch,
            &commits[index].commit_id[..commits[index].commit_id.len().min(8)],
            index
        );
        self.apply_commit_state(&commits[index])
    }

    /// Undo the most recent rollback by reapplying its snapshot
    pub fn roll_forward(&self) -> Result<()> {
        self.auth.require_write()?;
        let state = self
            .forward_history
            .pop()
            .ok_or(VaultError::NoForwardHistory)?;
        info!("Rolling forward to commit {}", state.commit_id);
        self.apply_commit_state(&state)
    }

    /// Whether a roll-forward is currently possible
    pub fn can_roll_forward(&self) -> bool {
        self.auth.require_read().is_ok() && !self.forward_history.is_empty()
    }

    /// Intentionally discard all undo capability
    pub fn clear_forward_history(&self) -> Result<()> {
        self.auth.require_write()?;
        self.forward_history.clear();
        Ok(())
    }

    /// Apply a target state transactionally over the working directory
    ///
    /// Every currently tracked file is backed up first; the target's paths
    /// are then deleted (restore must not merge with stale content) and
    /// materialized from the digests the state itself records, so applying
    /// a pre-rollback snapshot reproduces that exact working state even
    /// where it differed from the tagged commit. Any failure restores all
    /// backups and leaves the working directory bit-identical to its
    /// pre-call state. On success the branch ledger records the applied
    /// state and the head moves to the state's commit.
    pub fn apply_commit_state(&self, state: &CommitState) -> Result<()> {
        self.auth.require_write()?;
        let branch = self.branches.current()?;
        let root = self.journal.work_root().to_path_buf();
        let tracked = self.tracked_files(&branch)?;

        let guard = BackupGuard::snapshot(tracked.iter().map(|rel| root.join(rel)))?;
        debug!(
            "Applying state of commit {} ({} files, {} backed up)",
            state.commit_id,
            state.file_states.len(),
            guard.len()
        );

        guard.apply(|| {
            // Clean slate before restore.
            for rel in state.file_states.keys() {
                let abs = root.join(rel);
                if abs.exists() {
                    fs::remove_file(&abs)?;
                }
            }
            for (rel, digest) in &state.file_states {
                self.store.materialize(digest, &root.join(rel))?;
            }
            self.branches.save_file_state(&branch, &state.file_states)?;
            self.branches.set_head(&branch, &state.commit_id)?;
            Ok(())
        })
    }

    /// Render the branch's commit history, newest first
    ///
    /// The newest entry is marked as the current state while forward
    /// history is pending, mirroring what an interactive caller needs to
    /// pick a rollback index.
    pub fn format_history(&self) -> Result<String> {
        self.auth.require_read()?;
        let branch = self.branches.current()?;
        let commits = self.commits_in_branch(&branch)?;

        let mut out = format!("Commit history for branch '{}':\n", branch);
        for (i, commit) in commits.iter().enumerate() {
            let when = Utc
                .timestamp_millis_opt(commit.timestamp)
                .single()
                .map(|dt| dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
                .unwrap_or_else(|| commit.timestamp.to_string());
            out.push_str(&format!(
                "[{}] {} - {} - {}",
                i, when, commit.commit_id, commit.message
            ));
            if i == 0 && self.can_roll_forward() {
                out.push_str(" (current state)");
            }
            out.push('\n');
        }
        Ok(out)
    }
}
