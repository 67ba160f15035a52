//! Role-based authorization gate
//!
//! Every mutating or history-revealing vault operation consults this gate
//! before doing anything else. The gate tracks a set of users persisted in
//! `.vault/users.json` and at most one "current" identity; with no current
//! identity every capability check fails.
//!
//! The gate is an explicit, injected object shared by all managers via
//! `Arc` rather than process-global state, so independently constructed
//! vaults never observe each other's sessions.
//!
//! Password hashing here is deliberately minimal (single SHA-256, matching
//! the stored `users.json` format); the vault treats credential strength as
//! an external concern and only consumes the capability check.

use crate::error::{Result, VaultError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Name of the user store file inside the vault directory
const USERS_FILE: &str = "users.json";

/// Capability consulted by the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// History-revealing operations (listing, status, checkout source reads)
    Read,
    /// Any operation that mutates vault or working-directory state
    Write,
}

/// Role granted to a user
///
/// Serialized as an integer (`0`/`1`/`2`) in `users.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum UserRole {
    /// May read history and state, never mutate
    ReadOnly,
    /// May read and mutate vault state
    Write,
    /// Full access including user administration
    Admin,
}

impl From<UserRole> for u8 {
    fn from(role: UserRole) -> u8 {
        match role {
            UserRole::ReadOnly => 0,
            UserRole::Write => 1,
            UserRole::Admin => 2,
        }
    }
}

impl TryFrom<u8> for UserRole {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(UserRole::ReadOnly),
            1 => Ok(UserRole::Write),
            2 => Ok(UserRole::Admin),
            other => Err(format!("unknown role value: {}", other)),
        }
    }
}

/// A user record as persisted in `users.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserRecord {
    username: String,
    password_hash: String,
    role: UserRole,
}

/// Role-based authorization gate shared by all vault managers
pub struct AuthGate {
    /// Vault directory holding `users.json`
    vault_dir: PathBuf,
    /// All known users keyed by username
    users: RwLock<BTreeMap<String, UserRecord>>,
    /// Username of the established identity, if any
    current: RwLock<Option<String>>,
}

impl std::fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGate")
            .field("vault_dir", &self.vault_dir)
            .field("user_count", &self.users.read().len())
            .field("current", &*self.current.read())
            .finish()
    }
}

impl AuthGate {
    /// Open the gate backed by `<vault_dir>/users.json`
    ///
    /// Loads the user store if present. An empty store is seeded with a
    /// default `admin` user (password `admin123`) which also becomes the
    /// current identity, so a freshly initialized vault is usable without a
    /// separate bootstrap step.
    pub fn open(vault_dir: &Path) -> Result<Self> {
        let gate = Self {
            vault_dir: vault_dir.to_path_buf(),
            users: RwLock::new(BTreeMap::new()),
            current: RwLock::new(None),
        };

        gate.load_users()?;

        if gate.users.read().is_empty() {
            info!("Seeding default admin user");
            let admin = UserRecord {
                username: "admin".to_string(),
                password_hash: hash_password("admin123"),
                role: UserRole::Admin,
            };
            gate.users.write().insert("admin".to_string(), admin);
            gate.save_users()?;
            *gate.current.write() = Some("admin".to_string());
        }

        Ok(gate)
    }

    /// Check whether the current identity is authorized for `operation`
    ///
    /// No current identity means no capability at all, including read.
    pub fn is_authorized(&self, operation: Operation) -> bool {
        let current = self.current.read();
        let users = self.users.read();
        let Some(user) = current.as_deref().and_then(|name| users.get(name)) else {
            return false;
        };

        match user.role {
            UserRole::ReadOnly => operation == Operation::Read,
            UserRole::Write => true,
            UserRole::Admin => true,
        }
    }

    /// Fail with [`VaultError::Unauthorized`] unless read-capable
    pub fn require_read(&self) -> Result<()> {
        if self.is_authorized(Operation::Read) {
            Ok(())
        } else {
            Err(VaultError::read_denied())
        }
    }

    /// Fail with [`VaultError::Unauthorized`] unless write-capable
    pub fn require_write(&self) -> Result<()> {
        if self.is_authorized(Operation::Write) {
            Ok(())
        } else {
            Err(VaultError::write_denied())
        }
    }

    /// Establish `username` as the current identity if the password matches
    pub fn authenticate(&self, username: &str, password: &str) -> bool {
        let users = self.users.read();
        match users.get(username) {
            Some(user) if user.password_hash == hash_password(password) => {
                drop(users);
                *self.current.write() = Some(username.to_string());
                debug!("Authenticated user {}", username);
                true
            }
            _ => {
                warn!("Failed authentication attempt for {}", username);
                false
            }
        }
    }

    /// Drop the current identity; all subsequent capability checks fail
    pub fn logout(&self) {
        *self.current.write() = None;
    }

    /// Create a new user; fails if the name is taken
    pub fn create_user(&self, username: &str, password: &str, role: UserRole) -> Result<()> {
        let mut users = self.users.write();
        if users.contains_key(username) {
            return Err(VaultError::storage(format!(
                "user already exists: {}",
                username
            )));
        }
        users.insert(
            username.to_string(),
            UserRecord {
                username: username.to_string(),
                password_hash: hash_password(password),
                role,
            },
        );
        drop(users);
        self.save_users()
    }

    /// Change a user's role; requires the current identity to be an admin
    pub fn change_role(&self, username: &str, role: UserRole) -> Result<()> {
        self.require_admin()?;
        let mut users = self.users.write();
        let user = users
            .get_mut(username)
            .ok_or_else(|| VaultError::storage(format!("no such user: {}", username)))?;
        user.role = role;
        drop(users);
        self.save_users()
    }

    /// Delete a user; requires the current identity to be an admin
    pub fn delete_user(&self, username: &str) -> Result<()> {
        self.require_admin()?;
        let removed = self.users.write().remove(username).is_some();
        if !removed {
            return Err(VaultError::storage(format!("no such user: {}", username)));
        }
        self.save_users()
    }

    /// List usernames; requires the current identity to be an admin
    pub fn list_users(&self) -> Result<Vec<String>> {
        self.require_admin()?;
        Ok(self.users.read().keys().cloned().collect())
    }

    /// Username of the current identity, if one is established
    pub fn current_username(&self) -> Option<String> {
        self.current.read().clone()
    }

    /// Role of the current identity, if one is established
    pub fn current_role(&self) -> Option<UserRole> {
        let current = self.current.read();
        let users = self.users.read();
        current.as_deref().and_then(|name| users.get(name)).map(|u| u.role)
    }

    fn require_admin(&self) -> Result<()> {
        match self.current_role() {
            Some(UserRole::Admin) => Ok(()),
            _ => Err(VaultError::write_denied()),
        }
    }

    fn users_path(&self) -> PathBuf {
        self.vault_dir.join(USERS_FILE)
    }

    fn load_users(&self) -> Result<()> {
        let path = self.users_path();
        if !path.exists() {
            return Ok(());
        }
        let contents = fs::read_to_string(&path)?;
        if contents.trim().is_empty() {
            return Ok(());
        }
        let loaded: BTreeMap<String, UserRecord> = serde_json::from_str(&contents)?;
        *self.users.write() = loaded;
        debug!("Loaded {} users", self.users.read().len());
        Ok(())
    }

    fn save_users(&self) -> Result<()> {
        let users = self.users.read();
        let json = serde_json::to_string_pretty(&*users)?;
        fs::write(self.users_path(), json)?;
        Ok(())
    }
}

/// Hex-encoded SHA-256 of a password
fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn gate() -> (AuthGate, TempDir) {
        let dir = TempDir::new().unwrap();
        let gate = AuthGate::open(dir.path()).unwrap();
        (gate, dir)
    }

    #[test]
    fn test_seeds_admin_and_authorizes_everything() {
        let (gate, _dir) = gate();
        assert_eq!(gate.current_username().as_deref(), Some("admin"));
        assert!(gate.is_authorized(Operation::Read));
        assert!(gate.is_authorized(Operation::Write));
    }

    #[test]
    fn test_no_identity_denies_everything() {
        let (gate, _dir) = gate();
        gate.logout();
        assert!(!gate.is_authorized(Operation::Read));
        assert!(!gate.is_authorized(Operation::Write));
        assert!(gate.require_read().unwrap_err().is_unauthorized());
    }

    #[test]
    fn test_read_only_role() {
        let (gate, _dir) = gate();
        gate.create_user("viewer", "secret", UserRole::ReadOnly).unwrap();
        assert!(gate.authenticate("viewer", "secret"));
        assert!(gate.is_authorized(Operation::Read));
        assert!(!gate.is_authorized(Operation::Write));
        assert!(gate.require_write().unwrap_err().is_unauthorized());
    }

    #[test]
    fn test_authentication_failure_keeps_session() {
        let (gate, _dir) = gate();
        assert!(!gate.authenticate("admin", "wrong"));
        // Failed attempt must not clobber the established identity.
        assert_eq!(gate.current_username().as_deref(), Some("admin"));
    }

    #[test]
    fn test_users_persist_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let gate = AuthGate::open(dir.path()).unwrap();
            gate.create_user("dev", "pw", UserRole::Write).unwrap();
        }
        let gate = AuthGate::open(dir.path()).unwrap();
        // Reopened store already has users, so no identity is established.
        assert_eq!(gate.current_username(), None);
        assert!(gate.authenticate("dev", "pw"));
        assert!(gate.is_authorized(Operation::Write));
    }

    #[test]
    fn test_admin_only_operations() {
        let (gate, _dir) = gate();
        gate.create_user("dev", "pw", UserRole::Write).unwrap();
        gate.authenticate("dev", "pw");
        assert!(gate.list_users().is_err());
        assert!(gate.change_role("admin", UserRole::Write).is_err());

        gate.authenticate("admin", "admin123");
        assert_eq!(gate.list_users().unwrap(), vec!["admin", "dev"]);
        gate.change_role("dev", UserRole::ReadOnly).unwrap();
        gate.delete_user("dev").unwrap();
        assert_eq!(gate.list_users().unwrap(), vec!["admin"]);
    }
}
