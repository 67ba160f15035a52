//! Bidirectional reconciliation between a source tree and a mirror
//!
//! The source directory is the vault's working directory; the destination
//! is a plain mirror tree with no vault of its own. Reconciliation works on
//! relative paths and compares content digests, never timestamps, so a
//! touched-but-unchanged file is a no-op.
//!
//! The commit journal doubles as the deletion oracle: a path that appears
//! anywhere in commit history was once in the source, so its absence from
//! the source now is an intentional deletion and propagates to the mirror.
//! A path with no history that shows up only in the mirror is new work from
//! the destination side and flows backward into the source.
//!
//! A full pass uses best-effort, partial-success semantics: one file's copy
//! or commit failure is logged and recorded in the boolean result, but the
//! remaining files are still reconciled. Callers re-run to converge.

use crate::auth::AuthGate;
use crate::commit::CommitJournal;
use crate::error::{Result, VaultError};
use crate::object_store::ObjectStore;
use crate::types::FileStatus;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Directory name of the vault's internal storage, excluded from scans
const INTERNAL_DIR: &str = ".vault";

/// Source and destination roots recorded by a successful initialization
#[derive(Debug, Clone)]
struct SyncRoots {
    source: PathBuf,
    dest: PathBuf,
}

/// Digest-driven reconciler over two directory trees
pub struct SyncReconciler {
    /// Blob storage, used only for digest computation
    store: Arc<ObjectStore>,
    /// Journal used to commit reconciled changes and to answer history
    journal: Arc<CommitJournal>,
    /// Authorization gate consulted before every operation
    auth: Arc<AuthGate>,
    /// Roots, set once by [`SyncReconciler::initialize`]
    roots: RwLock<Option<SyncRoots>>,
}

impl std::fmt::Debug for SyncReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncReconciler")
            .field("roots", &*self.roots.read())
            .finish()
    }
}

impl SyncReconciler {
    /// Wire the reconciler to its collaborators; roots are set separately
    pub fn new(store: Arc<ObjectStore>, journal: Arc<CommitJournal>, auth: Arc<AuthGate>) -> Self {
        Self {
            store,
            journal,
            auth,
            roots: RwLock::new(None),
        }
    }

    /// Record the source and destination roots
    ///
    /// The source must exist; the destination is created if absent.
    pub fn initialize(&self, source: &Path, dest: &Path) -> Result<()> {
        self.auth.require_write()?;
        if !source.exists() {
            return Err(VaultError::SourceMissing(source.to_path_buf()));
        }
        fs::create_dir_all(dest)?;
        *self.roots.write() = Some(SyncRoots {
            source: source.to_path_buf(),
            dest: dest.to_path_buf(),
        });
        info!("Sync initialized: {:?} <-> {:?}", source, dest);
        Ok(())
    }

    /// Full reconciliation pass over both trees
    ///
    /// Returns `Ok(true)` when every per-file operation succeeded and
    /// `Ok(false)` when at least one failed; failures are logged and the
    /// pass continues. An `Err` is reserved for conditions that invalidate
    /// the whole pass, such as missing initialization or authorization.
    pub fn synchronize(&self) -> Result<bool> {
        self.auth.require_write()?;
        let roots = self.roots()?;
        let source_files = scan_tree(&roots.source)?;
        let dest_files = scan_tree(&roots.dest)?;
        let mut success = true;

        // Destination-only paths first: deletions propagate, new mirror-side
        // files flow backward.
        for rel in dest_files.difference(&source_files) {
            if self.was_file_in_source(rel)? {
                let dest_full = roots.dest.join(rel);
                debug!("Propagating deletion of {}", rel);
                if let Err(e) = remove_if_present(&dest_full) {
                    warn!("Cannot delete {:?}: {}", dest_full, e);
                    success = false;
                }
            } else if let Err(e) = self.reconcile_file(rel) {
                warn!("Cannot reconcile {}: {}", rel, e);
                success = false;
            }
        }

        // Then every source path: covers new, changed and unchanged cases.
        for rel in &source_files {
            if let Err(e) = self.reconcile_file(rel) {
                warn!("Cannot reconcile {}: {}", rel, e);
                success = false;
            }
        }

        Ok(success)
    }

    /// Reconcile a single relative path between the two trees
    ///
    /// Source content wins whenever the source copy exists and differs from
    /// the mirror. A mirror-only path with no commit history flows backward
    /// into the source. Either direction stages and commits the source copy
    /// so the change enters version history.
    pub fn reconcile_file(&self, rel: &str) -> Result<()> {
        let roots = self.roots()?;
        let source_full = roots.source.join(rel);
        let dest_full = roots.dest.join(rel);

        let source_status = self.file_status(&source_full)?;
        let dest_status = self.file_status(&dest_full)?;

        let changed = if source_status.exists
            && (!dest_status.exists || source_status.digest != dest_status.digest)
        {
            copy_overwriting(&source_full, &dest_full)?;
            true
        } else if !source_status.exists && dest_status.exists && !self.was_file_in_source(rel)? {
            copy_overwriting(&dest_full, &source_full)?;
            true
        } else {
            false
        };

        if changed {
            self.journal.stage(&source_full)?;
            self.journal.commit(&format!("Sync: Updated {}", rel))?;
            info!("Synchronized and committed {}", rel);
        }
        Ok(())
    }

    /// Targeted reconciliation of one path, used by the change watcher
    pub fn synchronize_path(&self, rel: &str) -> Result<()> {
        self.auth.require_write()?;
        self.reconcile_file(rel)
    }

    /// Relative paths whose content differs between the two trees
    ///
    /// One-sided existence counts as a difference.
    pub fn modified_files(&self) -> Result<Vec<String>> {
        self.auth.require_read()?;
        let roots = self.roots()?;
        let mut all = scan_tree(&roots.source)?;
        all.extend(scan_tree(&roots.dest)?);

        let mut modified = Vec::new();
        for rel in all {
            let source_status = self.file_status(&roots.source.join(&rel))?;
            let dest_status = self.file_status(&roots.dest.join(&rel))?;
            if source_status.digest != dest_status.digest {
                modified.push(rel);
            }
        }
        Ok(modified)
    }

    /// Paths present in both trees with differing content
    ///
    /// A strict subset of [`SyncReconciler::modified_files`]: one-sided
    /// new or deleted files are not conflicts.
    pub fn conflicting_files(&self) -> Result<Vec<String>> {
        self.auth.require_read()?;
        let roots = self.roots()?;
        let source_files = scan_tree(&roots.source)?;
        let dest_files = scan_tree(&roots.dest)?;

        let mut conflicts = Vec::new();
        for rel in source_files.intersection(&dest_files) {
            let source_status = self.file_status(&roots.source.join(rel))?;
            let dest_status = self.file_status(&roots.dest.join(rel))?;
            if source_status.digest != dest_status.digest {
                conflicts.push(rel.clone());
            }
        }
        Ok(conflicts)
    }

    /// Overwrite one side of a conflict with the other
    ///
    /// Does not commit; a following [`SyncReconciler::synchronize`] pass
    /// records the resolution in history.
    pub fn resolve_conflict(&self, rel: &str, use_source: bool) -> Result<()> {
        self.auth.require_write()?;
        let roots = self.roots()?;
        let source_full = roots.source.join(rel);
        let dest_full = roots.dest.join(rel);
        if use_source {
            copy_overwriting(&source_full, &dest_full)
        } else {
            copy_overwriting(&dest_full, &source_full)
        }
    }

    /// Whether a path has ever appeared in commit history
    pub fn was_file_in_source(&self, rel: &str) -> Result<bool> {
        Ok(!self.journal.history(Path::new(rel))?.is_empty())
    }

    /// Existence and digest of a path, recomputed on every call
    pub fn file_status(&self, path: &Path) -> Result<FileStatus> {
        if !path.is_file() {
            return Ok(FileStatus::absent(path.to_path_buf()));
        }
        Ok(FileStatus {
            path: path.to_path_buf(),
            exists: true,
            digest: self.store.digest_file(path)?,
        })
    }

    fn roots(&self) -> Result<SyncRoots> {
        self.roots
            .read()
            .clone()
            .ok_or(VaultError::SyncNotInitialized)
    }
}

/// Relative paths of every regular file under `root`, excluding the vault's
/// internal storage area. A missing root yields an empty set.
pub fn scan_tree(root: &Path) -> Result<BTreeSet<String>> {
    let mut files = BTreeSet::new();
    if !root.exists() {
        return Ok(files);
    }
    for entry in walkdir::WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.file_name() != INTERNAL_DIR)
    {
        let entry = entry.map_err(|e| VaultError::storage(format!("scan failed: {}", e)))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .to_string();
        files.insert(rel);
    }
    Ok(files)
}

fn copy_overwriting(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(from, to)
        .map_err(|e| VaultError::storage(format!("cannot copy {:?} to {:?}: {}", from, to, e)))?;
    Ok(())
}

fn remove_if_present(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_file(path)?;
    }
    Ok(())
}
