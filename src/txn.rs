//! Guarded apply: backup-and-restore pseudo-transactions
//!
//! The vault has no central transaction log, so multi-file mutations of the
//! working directory approximate atomicity by copying every affected file to
//! a sibling backup before touching anything. If the mutation fails, the
//! backups are restored byte-identically; if it succeeds, they are removed.
//!
//! Backups use a `.backup` suffix next to the original file. A stale backup
//! left over from an earlier crash is cleared before a new one is taken.

use crate::error::{Result, VaultError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Suffix appended to a file's name for its backup sibling
const BACKUP_SUFFIX: &str = ".backup";

/// Snapshot of a set of files, restorable on failure
#[derive(Debug, Default)]
pub struct BackupGuard {
    /// (original, backup) pairs for every file that existed at snapshot time
    backups: Vec<(PathBuf, PathBuf)>,
}

impl BackupGuard {
    /// Snapshot every existing path in `paths`
    ///
    /// Paths that do not exist are skipped; they have no prior content to
    /// protect.
    pub fn snapshot<I, P>(paths: I) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut guard = Self::default();
        for path in paths {
            let path = path.as_ref();
            if !path.exists() {
                continue;
            }
            let backup = backup_path(path);
            if backup.exists() {
                fs::remove_file(&backup)?;
            }
            fs::copy(path, &backup).map_err(|e| {
                VaultError::storage(format!("cannot back up {:?}: {}", path, e))
            })?;
            guard.backups.push((path.to_path_buf(), backup));
        }
        debug!("Backed up {} files", guard.backups.len());
        Ok(guard)
    }

    /// Run `mutation`; restore every backup if it fails
    ///
    /// On success the backups are discarded and the mutation's value is
    /// returned. On failure the originals are restored byte-identically and
    /// the error is wrapped in [`VaultError::TransactionFailed`].
    pub fn apply<T, F>(self, mutation: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        match mutation() {
            Ok(value) => {
                self.discard();
                Ok(value)
            }
            Err(e) => {
                self.restore_all();
                Err(VaultError::TransactionFailed(e.to_string()))
            }
        }
    }

    /// Restore every backed-up file and remove the backups
    pub fn restore_all(self) {
        for (original, backup) in &self.backups {
            if original.exists() {
                if let Err(e) = fs::remove_file(original) {
                    warn!("Cannot clear {:?} during restore: {}", original, e);
                }
            }
            if backup.exists() {
                if let Err(e) = fs::copy(backup, original) {
                    warn!("Cannot restore {:?} from backup: {}", original, e);
                }
                let _ = fs::remove_file(backup);
            }
        }
    }

    /// Remove all backups, keeping the mutated files
    pub fn discard(self) {
        for (_, backup) in &self.backups {
            if backup.exists() {
                let _ = fs::remove_file(backup);
            }
        }
    }

    /// Number of files under guard
    pub fn len(&self) -> usize {
        self.backups.len()
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_apply_success_removes_backups() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, "before").unwrap();

        let guard = BackupGuard::snapshot([&file]).unwrap();
        assert_eq!(guard.len(), 1);
        guard
            .apply(|| {
                fs::write(&file, "after")?;
                Ok(())
            })
            .unwrap();

        assert_eq!(fs::read_to_string(&file).unwrap(), "after");
        assert!(!backup_path(&file).exists());
    }

    #[test]
    fn test_apply_failure_restores_originals() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        fs::write(&a, "a-original").unwrap();
        fs::write(&b, "b-original").unwrap();

        let guard = BackupGuard::snapshot([&a, &b]).unwrap();
        let err = guard
            .apply(|| {
                fs::write(&a, "a-mangled")?;
                fs::remove_file(&b)?;
                Err::<(), _>(VaultError::storage("simulated failure"))
            })
            .unwrap_err();

        assert!(matches!(err, VaultError::TransactionFailed(_)));
        assert_eq!(fs::read_to_string(&a).unwrap(), "a-original");
        assert_eq!(fs::read_to_string(&b).unwrap(), "b-original");
        assert!(!backup_path(&a).exists());
        assert!(!backup_path(&b).exists());
    }

    #[test]
    fn test_snapshot_skips_missing_and_clears_stale_backups() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, "current").unwrap();
        fs::write(backup_path(&file), "stale").unwrap();

        let guard = BackupGuard::snapshot([&file, &dir.path().join("missing.txt")]).unwrap();
        assert_eq!(guard.len(), 1);
        assert_eq!(fs::read_to_string(backup_path(&file)).unwrap(), "current");
        guard.discard();
    }
}
