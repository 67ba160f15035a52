//! Content-addressed object store
//!
//! Blobs live under `.vault/objects/<digest>` where the digest is the
//! hex-encoded SHA-256 of the file's raw bytes. Identical content is stored
//! once; a second `put` of the same digest is a no-op. Blobs are immutable
//! once published and are never deleted inline by normal operations — the
//! only deletion path is the explicit [`ObjectStore::collect_garbage`] pass.
//!
//! Publication is atomic: content is written to a temporary file in the
//! objects directory and renamed into place, so a crashed or failed write
//! can never leave a partial blob visible under its final digest name.

use crate::auth::AuthGate;
use crate::error::{Result, VaultError};
use sha2::{Digest as _, Sha256};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace};

/// Chunk size for streamed digest computation
const HASH_CHUNK_SIZE: usize = 8192;

/// Content-addressed blob storage under the vault's objects directory
pub struct ObjectStore {
    /// Directory holding one file per digest
    objects_dir: PathBuf,
    /// Authorization gate consulted before every operation
    auth: Arc<AuthGate>,
}

impl std::fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStore")
            .field("objects_dir", &self.objects_dir)
            .finish()
    }
}

impl ObjectStore {
    /// Create a store rooted at `objects_dir` (created if absent)
    pub fn new(objects_dir: PathBuf, auth: Arc<AuthGate>) -> Result<Self> {
        fs::create_dir_all(&objects_dir)?;
        Ok(Self { objects_dir, auth })
    }

    /// Compute the digest of a file's content with fixed-size chunked reads
    ///
    /// Streaming keeps memory bounded for large files and the result is
    /// deterministic across platforms.
    pub fn digest_file(&self, path: &Path) -> Result<String> {
        self.auth.require_read()?;
        let mut file = File::open(path).map_err(|e| {
            VaultError::storage(format!("cannot open {:?} for hashing: {}", path, e))
        })?;
        let mut hasher = Sha256::new();
        let mut buffer = [0u8; HASH_CHUNK_SIZE];
        loop {
            let read = file.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    /// Compute the digest of an in-memory byte slice
    pub fn digest_bytes(&self, bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    /// Store a file's content under the given digest
    ///
    /// Returns immediately if the blob already exists (idempotent dedup).
    /// The write goes through a temporary file and an atomic rename so a
    /// failure partway never publishes a truncated blob.
    pub fn put(&self, source: &Path, digest: &str) -> Result<()> {
        self.auth.require_write()?;
        let object_path = self.object_path(digest);
        if object_path.exists() {
            trace!("Object {} already stored", &digest[..digest.len().min(8)]);
            return Ok(());
        }

        let mut reader = File::open(source).map_err(|e| {
            VaultError::storage(format!("cannot read {:?} for storage: {}", source, e))
        })?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.objects_dir)
            .map_err(|e| VaultError::storage(format!("cannot create temp object: {}", e)))?;
        std::io::copy(&mut reader, tmp.as_file_mut())?;
        tmp.as_file_mut().flush()?;
        tmp.persist(&object_path)
            .map_err(|e| VaultError::storage(format!("cannot publish object {}: {}", digest, e)))?;

        trace!("Stored object {}", &digest[..digest.len().min(8)]);
        Ok(())
    }

    /// Digest and store a file in one call, returning the digest
    pub fn put_file(&self, source: &Path) -> Result<String> {
        let digest = self.digest_file(source)?;
        self.put(source, &digest)?;
        Ok(digest)
    }

    /// Load a blob's content by digest
    pub fn get(&self, digest: &str) -> Result<Vec<u8>> {
        self.auth.require_read()?;
        let object_path = self.object_path(digest);
        if !object_path.exists() {
            return Err(VaultError::ObjectNotFound(digest.to_string()));
        }
        Ok(fs::read(&object_path)?)
    }

    /// Check whether a blob exists
    pub fn exists(&self, digest: &str) -> bool {
        self.object_path(digest).exists()
    }

    /// Copy a blob's content to `dest`, overwriting any existing file
    ///
    /// Parent directories of `dest` are created as needed.
    pub fn materialize(&self, digest: &str, dest: &Path) -> Result<()> {
        self.auth.require_read()?;
        let object_path = self.object_path(digest);
        if !object_path.exists() {
            return Err(VaultError::ObjectNotFound(digest.to_string()));
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&object_path, dest).map_err(|e| {
            VaultError::storage(format!("cannot materialize {} at {:?}: {}", digest, dest, e))
        })?;
        trace!("Materialized object {} at {:?}", &digest[..digest.len().min(8)], dest);
        Ok(())
    }

    /// List every digest currently stored
    pub fn list(&self) -> Result<Vec<String>> {
        self.auth.require_read()?;
        let mut digests = Vec::new();
        for entry in fs::read_dir(&self.objects_dir)? {
            let entry = entry?;
            if entry.path().is_file() {
                digests.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        digests.sort();
        Ok(digests)
    }

    /// Delete every blob whose digest is not in `live`
    ///
    /// This is the explicit mark-and-sweep pass: callers compute the live
    /// set from all commit records and branch states first. Returns the
    /// number of blobs removed.
    pub fn collect_garbage(&self, live: &HashSet<String>) -> Result<usize> {
        self.auth.require_write()?;
        let mut removed = 0;
        for digest in self.list()? {
            if !live.contains(&digest) {
                fs::remove_file(self.object_path(&digest))?;
                debug!("Swept unreferenced object {}", &digest[..digest.len().min(8)]);
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn object_path(&self, digest: &str) -> PathBuf {
        self.objects_dir.join(digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (ObjectStore, Arc<AuthGate>, TempDir) {
        let dir = TempDir::new().unwrap();
        let auth = Arc::new(AuthGate::open(dir.path()).unwrap());
        let store = ObjectStore::new(dir.path().join("objects"), auth.clone()).unwrap();
        (store, auth, dir)
    }

    fn write_file(dir: &TempDir, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_put_get_round_trip() {
        let (store, _auth, dir) = store();
        let file = write_file(&dir, "a.txt", b"hello vault");

        let digest = store.put_file(&file).unwrap();
        assert_eq!(digest.len(), 64);
        assert!(store.exists(&digest));
        assert_eq!(store.get(&digest).unwrap(), b"hello vault");
    }

    #[test]
    fn test_put_is_idempotent() {
        let (store, _auth, dir) = store();
        let file = write_file(&dir, "a.txt", b"same bytes");

        let digest = store.put_file(&file).unwrap();
        // Second put of identical content must not corrupt the first blob.
        store.put(&file, &digest).unwrap();
        assert_eq!(store.get(&digest).unwrap(), b"same bytes");
    }

    #[test]
    fn test_identical_content_shares_one_object() {
        let (store, _auth, dir) = store();
        let a = write_file(&dir, "a.txt", b"dup");
        let b = write_file(&dir, "b.txt", b"dup");

        let da = store.put_file(&a).unwrap();
        let db = store.put_file(&b).unwrap();
        assert_eq!(da, db);
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_streamed_digest_matches_in_memory() {
        let (store, _auth, dir) = store();
        let content: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let file = write_file(&dir, "big.bin", &content);

        assert_eq!(store.digest_file(&file).unwrap(), store.digest_bytes(&content));
    }

    #[test]
    fn test_get_missing_object() {
        let (store, _auth, _dir) = store();
        let err = store.get(&"0".repeat(64)).unwrap_err();
        assert!(matches!(err, VaultError::ObjectNotFound(_)));
    }

    #[test]
    fn test_materialize_creates_parents() {
        let (store, _auth, dir) = store();
        let file = write_file(&dir, "a.txt", b"content");
        let digest = store.put_file(&file).unwrap();

        let dest = dir.path().join("nested/deep/out.txt");
        store.materialize(&digest, &dest).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"content");
    }

    #[test]
    fn test_unauthorized_put() {
        let (store, auth, dir) = store();
        let file = write_file(&dir, "a.txt", b"content");
        auth.logout();
        assert!(store.put_file(&file).unwrap_err().is_unauthorized());
    }

    #[test]
    fn test_collect_garbage_spares_live_objects() {
        let (store, _auth, dir) = store();
        let a = write_file(&dir, "a.txt", b"keep");
        let b = write_file(&dir, "b.txt", b"sweep");
        let keep = store.put_file(&a).unwrap();
        let sweep = store.put_file(&b).unwrap();

        let live: HashSet<String> = [keep.clone()].into_iter().collect();
        assert_eq!(store.collect_garbage(&live).unwrap(), 1);
        assert!(store.exists(&keep));
        assert!(!store.exists(&sweep));
    }

    #[test]
    fn test_collect_garbage_sweeps_short_stray_names() {
        let (store, _auth, dir) = store();
        // A stray file shorter than a digest must be swept, not panic the
        // log formatting.
        fs::write(dir.path().join("objects/stray"), b"junk").unwrap();
        assert_eq!(store.collect_garbage(&HashSet::new()).unwrap(), 1);
        assert!(store.list().unwrap().is_empty());
    }
}
