// crates/core/src/auth/store.rs
//! Persistence of the credential pair between runs.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fedwatch_types::StoredCredentials;

use crate::error::AuthError;

/// Fixed application key the credentials are stored under.
pub const APP_KEY: &str = "fedwatch-auth";

/// Where the token pair lives between runs.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<Option<StoredCredentials>, AuthError>;
    fn save(&self, credentials: &StoredCredentials) -> Result<(), AuthError>;
    fn clear(&self) -> Result<(), AuthError>;
}

/// JSON file under the user's local data directory.
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<data dir>/fedwatch/fedwatch-auth.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_local_dir().map(|d| d.join("fedwatch").join(format!("{APP_KEY}.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<StoredCredentials>, AuthError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AuthError::Storage(format!("{}: {e}", self.path.display()))),
        };
        match serde_json::from_slice(&bytes) {
            Ok(creds) => Ok(Some(creds)),
            Err(e) => {
                // A corrupt file is the same as no session.
                tracing::warn!(path = %self.path.display(), error = %e, "discarding unreadable credential file");
                Ok(None)
            }
        }
    }

    fn save(&self, credentials: &StoredCredentials) -> Result<(), AuthError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AuthError::Storage(format!("{}: {e}", parent.display())))?;
        }
        let json = serde_json::to_vec(credentials).map_err(|e| AuthError::Storage(e.to_string()))?;
        // Write-then-rename so a crash never leaves half a token pair on disk.
        let tmp = self.path.with_extension("json.tmp");
        write_private(&tmp, &json)
            .and_then(|_| std::fs::rename(&tmp, &self.path))
            .map_err(|e| AuthError::Storage(format!("{}: {e}", self.path.display())))
    }

    fn clear(&self) -> Result<(), AuthError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AuthError::Storage(format!("{}: {e}", self.path.display()))),
        }
    }
}

/// Create `path` readable by the owner only and write `bytes` to it.
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    // A leftover from an interrupted save may carry wider permissions.
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e),
        _ => {}
    }
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// In-process store; nothing survives the process.
#[derive(Default)]
pub struct MemoryCredentialStore {
    slot: Mutex<Option<StoredCredentials>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(credentials: StoredCredentials) -> Self {
        Self {
            slot: Mutex::new(Some(credentials)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<StoredCredentials>, AuthError> {
        Ok(self.slot.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn save(&self, credentials: &StoredCredentials) -> Result<(), AuthError> {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(credentials.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), AuthError> {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}
