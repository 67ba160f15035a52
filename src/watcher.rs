//! Polling change watcher over the working directory
//!
//! A single background thread re-lists the watched tree at a fixed cadence
//! and compares modification times against the previous cycle. A new or
//! changed path triggers a targeted reconciliation of just that path; a
//! previously seen path that has vanished triggers a full reconciliation
//! pass, since deletion handling needs the whole-tree view.
//!
//! The timestamp map is in-memory only: rebuilt from scratch on every
//! [`ChangeWatcher::start`] and discarded on [`ChangeWatcher::stop`].
//! Changes made while the watcher is stopped are picked up by the next
//! explicit synchronize, not by the watcher.
//!
//! The watcher shares the reconciler (and through it the journal and
//! ledger) with foreground callers. Those components assume a single
//! mutating agent at a time; an embedder driving foreground writes while
//! the watcher runs must serialize the two externally.

use crate::error::Result;
use crate::sync::{scan_tree, SyncReconciler};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Default pause between polling cycles
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Background poller that feeds changes into the reconciler
pub struct ChangeWatcher {
    /// Directory whose regular files are tracked
    watched: PathBuf,
    /// Pause between polling cycles
    interval: Duration,
    /// Reconciler invoked on every detected change
    sync: Arc<SyncReconciler>,
    /// Loop-exit flag shared with the polling thread
    running: Arc<AtomicBool>,
    /// Handle of the polling thread while it runs
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ChangeWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeWatcher")
            .field("watched", &self.watched)
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish()
    }
}

impl ChangeWatcher {
    /// Create a stopped watcher over `watched`
    pub fn new(watched: PathBuf, sync: Arc<SyncReconciler>, interval: Duration) -> Self {
        Self {
            watched,
            interval,
            sync,
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    /// Start the polling thread
    ///
    /// The timestamp baseline is rebuilt before the first cycle, so files
    /// already on disk do not register as changes. Starting an already
    /// running watcher is a no-op.
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut states = match poll_mtimes(&self.watched) {
            Ok(states) => states,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        let watched = self.watched.clone();
        let interval = self.interval;
        let sync = Arc::clone(&self.sync);
        let running = Arc::clone(&self.running);

        info!("Watching {:?} every {:?}", watched, interval);
        let handle = std::thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                if let Err(e) = check_changes(&watched, &sync, &mut states) {
                    warn!("Polling cycle failed: {}", e);
                }
                std::thread::sleep(interval);
            }
        });
        *self.handle.lock() = Some(handle);
        Ok(())
    }

    /// Signal the loop to exit and block until the thread is gone
    ///
    /// Safe to call from any thread, and idempotent. The loop only checks
    /// the flag between cycles, so stop can block for up to one interval.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                warn!("Watcher thread panicked before joining");
            }
            info!("Stopped watching {:?}", self.watched);
        }
    }

    /// Whether the polling thread is active
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One polling cycle: detect new/changed paths, then vanished ones
fn check_changes(
    watched: &Path,
    sync: &SyncReconciler,
    states: &mut HashMap<String, SystemTime>,
) -> Result<()> {
    let current = poll_mtimes(watched)?;

    for (rel, mtime) in &current {
        if states.get(rel) != Some(mtime) {
            debug!("Change detected in {}", rel);
            if let Err(e) = sync.synchronize_path(rel) {
                warn!("Cannot reconcile {}: {}", rel, e);
            }
            states.insert(rel.clone(), *mtime);
        }
    }

    // A vanished path needs the whole-tree pass: deletion propagation
    // depends on comparing both trees, not one path.
    let vanished: Vec<String> = states
        .keys()
        .filter(|rel| !current.contains_key(*rel))
        .cloned()
        .collect();
    if !vanished.is_empty() {
        debug!("{} tracked files vanished, running full pass", vanished.len());
        if let Err(e) = sync.synchronize() {
            warn!("Full reconciliation failed: {}", e);
        }
        for rel in vanished {
            states.remove(&rel);
        }
    }

    Ok(())
}

/// Relative path → last-modified time for every regular file under `root`
fn poll_mtimes(root: &Path) -> Result<HashMap<String, SystemTime>> {
    let mut states = HashMap::new();
    for rel in scan_tree(root)? {
        if let Ok(metadata) = std::fs::metadata(root.join(&rel)) {
            if let Ok(mtime) = metadata.modified() {
                states.insert(rel, mtime);
            }
        }
    }
    Ok(states)
}
