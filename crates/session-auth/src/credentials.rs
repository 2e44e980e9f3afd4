//! Credential pair storage
//!
//! The store is a plain key-value holder for the access and renewal tokens; it
//! has no opinion on when they change. Two implementations:
//!
//! - `MemoryCredentialStore`: process-local, lost on exit.
//! - `FileCredentialStore`: JSON file, written atomically (temp file + rename)
//!   with 0600 permissions after every mutation. The in-memory copy is the
//!   read path so lookups never touch the disk.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Key-value persistence for the credential pair.
///
/// Setters report persistence failures; callers decide whether a failed write
/// is fatal (the pipeline logs and keeps going with the in-memory value).
///
/// The `*_if_renewal` methods check and write under one lock. A renewal that
/// finishes after sign-out, or after a new sign-in, finds a different renewal
/// token and leaves the store alone.
pub trait CredentialStore: Send + Sync {
    fn access(&self) -> Option<String>;

    fn renewal(&self) -> Option<String>;

    fn set_access(&self, access: String) -> Result<()>;

    fn set_renewal(&self, renewal: String) -> Result<()>;

    /// Drop both tokens (sign-out).
    fn clear(&self) -> Result<()>;

    /// Store a renewed access token, and the rotated renewal token if any,
    /// provided `expected` is still the stored renewal token. Returns whether
    /// the write happened.
    fn renew_if_renewal(
        &self,
        expected: &str,
        access: String,
        rotated: Option<String>,
    ) -> Result<bool>;

    /// Drop both tokens, provided `expected` is still the stored renewal token.
    fn clear_if_renewal(&self, expected: &str) -> Result<bool>;
}

#[derive(Default, Clone, Serialize, Deserialize)]
struct StoredCredentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    renewal: Option<String>,
}

impl StoredCredentials {
    fn holds_renewal(&self, expected: &str) -> bool {
        self.renewal.as_deref() == Some(expected)
    }

    fn apply_renewal(&mut self, access: String, rotated: Option<String>) {
        self.access = Some(access);
        if let Some(rotated) = rotated {
            self.renewal = Some(rotated);
        }
    }
}

/// Process-local credential store.
#[derive(Default)]
pub struct MemoryCredentialStore {
    state: RwLock<StoredCredentials>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with a pair, as if the user had just signed in.
    pub fn with_pair(access: impl Into<String>, renewal: Option<String>) -> Self {
        Self {
            state: RwLock::new(StoredCredentials {
                access: Some(access.into()),
                renewal,
            }),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn access(&self) -> Option<String> {
        self.state.read().access.clone()
    }

    fn renewal(&self) -> Option<String> {
        self.state.read().renewal.clone()
    }

    fn set_access(&self, access: String) -> Result<()> {
        self.state.write().access = Some(access);
        Ok(())
    }

    fn set_renewal(&self, renewal: String) -> Result<()> {
        self.state.write().renewal = Some(renewal);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.state.write() = StoredCredentials::default();
        Ok(())
    }

    fn renew_if_renewal(
        &self,
        expected: &str,
        access: String,
        rotated: Option<String>,
    ) -> Result<bool> {
        let mut state = self.state.write();
        if !state.holds_renewal(expected) {
            return Ok(false);
        }
        state.apply_renewal(access, rotated);
        Ok(true)
    }

    fn clear_if_renewal(&self, expected: &str) -> Result<bool> {
        let mut state = self.state.write();
        if !state.holds_renewal(expected) {
            return Ok(false);
        }
        *state = StoredCredentials::default();
        Ok(true)
    }
}

/// Credential store persisted to a JSON file.
pub struct FileCredentialStore {
    path: PathBuf,
    state: RwLock<StoredCredentials>,
}

impl FileCredentialStore {
    /// Load the credential file, creating it as `{}` if it does not exist.
    pub fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
            let stored: StoredCredentials = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing credential file: {e}")))?;
            info!(
                path = %path.display(),
                has_access = stored.access.is_some(),
                has_renewal = stored.renewal.is_some(),
                "loaded credentials"
            );
            stored
        } else {
            info!(path = %path.display(), "credential file not found, starting signed out");
            let stored = StoredCredentials::default();
            write_atomic(&path, &stored)?;
            stored
        };

        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    fn update(&self, mutate: impl FnOnce(&mut StoredCredentials)) -> Result<()> {
        let mut state = self.state.write();
        mutate(&mut state);
        write_atomic(&self.path, &state)
    }

    fn update_if_renewal(
        &self,
        expected: &str,
        mutate: impl FnOnce(&mut StoredCredentials),
    ) -> Result<bool> {
        let mut state = self.state.write();
        if !state.holds_renewal(expected) {
            return Ok(false);
        }
        mutate(&mut state);
        write_atomic(&self.path, &state)?;
        Ok(true)
    }
}

impl CredentialStore for FileCredentialStore {
    fn access(&self) -> Option<String> {
        self.state.read().access.clone()
    }

    fn renewal(&self) -> Option<String> {
        self.state.read().renewal.clone()
    }

    fn set_access(&self, access: String) -> Result<()> {
        self.update(|s| s.access = Some(access))
    }

    fn set_renewal(&self, renewal: String) -> Result<()> {
        self.update(|s| s.renewal = Some(renewal))
    }

    fn clear(&self) -> Result<()> {
        self.update(|s| *s = StoredCredentials::default())
    }

    fn renew_if_renewal(
        &self,
        expected: &str,
        access: String,
        rotated: Option<String>,
    ) -> Result<bool> {
        self.update_if_renewal(expected, |s| s.apply_renewal(access, rotated))
    }

    fn clear_if_renewal(&self, expected: &str) -> Result<bool> {
        self.update_if_renewal(expected, |s| *s = StoredCredentials::default())
    }
}

/// Write the credential file atomically.
///
/// Writes a temp file in the same directory and renames it over the target,
/// so a crash mid-write never leaves a truncated file. Permissions are 0600
/// since the file holds bearer tokens.
fn write_atomic(path: &Path, data: &StoredCredentials) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::CredentialParse(format!("serializing credentials: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".credentials.tmp.{}", std::process::id()));

    std::fs::write(&tmp_path, json.as_bytes())
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    std::fs::rename(&tmp_path, path)
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credentials");
    Ok(())
}
