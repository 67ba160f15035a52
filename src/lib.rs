//! # Filevault - Versioned, synchronizable directories
//!
//! A file-based version control and directory synchronization library: a
//! content-addressed object store, a commit journal with branches, a
//! transactional rollback engine and a digest-driven mirror reconciler,
//! all gated by role-based authorization.
//!
//! ## Overview
//!
//! Filevault turns any directory into a vault, allowing you to:
//! - Stage files and record immutable commits of their content
//! - Keep named branches with independent head pointers and file state
//! - Roll the working directory back to any earlier commit, and roll
//!   forward again to undo the rollback
//! - Mirror the vault into a second directory tree bidirectionally, with
//!   deletion propagation and conflict detection
//! - Watch the vault for changes in the background and reconcile them
//!   automatically
//! - Restrict every operation by per-user roles (read-only, write, admin)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use filevault::Vault;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Turn a directory into a vault (creates ./.vault and a master branch)
//! let vault = Vault::init(Path::new("./my_project"))?;
//!
//! // Record a commit
//! vault.stage(Path::new("./my_project/notes.txt"))?;
//! let commit = vault.commit("first version")?;
//! println!("Created commit {}", commit.commit_id);
//!
//! // Change the file, commit again, then travel back
//! vault.stage(Path::new("./my_project/notes.txt"))?;
//! vault.commit("second version")?;
//! vault.rollback_to_commit(1)?; // newest-first: index 1 is "first version"
//! vault.roll_forward()?;        // and back again
//!
//! // Mirror the vault into another tree
//! vault.initialize_sync(Path::new("./my_project_mirror"))?;
//! vault.synchronize()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Key Concepts
//!
//! ### Commits
//!
//! A commit is an immutable record of a message, a timestamp and a mapping
//! of relative paths to content digests. Commits have no parent pointers;
//! history is ordered by timestamp, newest first.
//!
//! ### Content addressing
//!
//! File content is stored once under its SHA-256 digest. Identical content
//! across files or commits shares a single blob. Blobs are immutable and
//! only ever deleted by the explicit garbage-collection pass.
//!
//! ### Rollback and roll-forward
//!
//! Rolling back captures the live state of every tracked file first, so a
//! roll-forward restores exactly what the rollback replaced. A new commit
//! discards pending roll-forward state, making roll-forward an undo for
//! rollbacks only, never a general redo.
//!
//! ### Synchronization
//!
//! Reconciliation compares content digests between the vault and a mirror
//! tree. Source changes flow forward, brand-new mirror files flow backward,
//! and a file deleted from the vault after being committed is deleted from
//! the mirror rather than resurrected. Every reconciled change becomes a
//! commit.
//!
//! ### Authorization
//!
//! Every operation checks the current identity against its required
//! capability before any side effect. With no identity established, every
//! operation is denied. A fresh vault seeds an `admin` user.
//!
//! ## Concurrency Contract
//!
//! The change watcher runs on its own thread and shares the reconciler,
//! journal and ledger with foreground callers. Individual components guard
//! their state with internal locks, but the multi-step semantic operations
//! (commit, rollback, synchronize) assume one mutating agent at a time;
//! embedders driving foreground writes while the watcher runs must
//! serialize the two externally.
//!
//! ## Module Organization
//!
//! - [`vault`]: the [`Vault`] facade wiring everything together
//! - [`object_store`]: content-addressed blob storage
//! - [`commit`]: staging set and commit journal
//! - [`branch`]: branch ledger and current-branch pointer
//! - [`rollback`]: rollback/roll-forward engine and forward history
//! - [`sync`]: bidirectional mirror reconciliation
//! - [`watcher`]: background polling change watcher
//! - [`auth`]: users, roles and the authorization gate
//! - [`types`]: shared data types and on-disk metadata formats
//! - [`error`]: error types and handling

pub mod auth;
pub mod branch;
pub mod commit;
pub mod error;
pub mod object_store;
pub mod rollback;
pub mod sync;
pub mod types;
pub mod vault;
pub mod watcher;

mod txn;

// Re-export main types for convenience
pub use auth::{AuthGate, Operation, UserRole};
pub use branch::BranchLedger;
pub use commit::CommitJournal;
pub use error::{Result, VaultError};
pub use object_store::ObjectStore;
pub use rollback::{CommitState, ForwardHistory, RollbackEngine};
pub use sync::SyncReconciler;
pub use types::{BranchState, CommitRecord, FileStateMap, FileStatus, FileVersion, VaultConfig};
pub use vault::Vault;
pub use watcher::ChangeWatcher;
