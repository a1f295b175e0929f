//! Credential persistence
//!
//! Durable key-value storage for the bearer token and the user email.
//! Each key is independently settable; a missing key means "absent",
//! never corruption.

use crate::error::{AuthError, AuthResult};
use crate::session::{BearerToken, CredentialRecord};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable overriding the credential file location.
pub const CREDENTIALS_PATH_ENV: &str = "MAILGATE_CREDENTIALS_PATH";

/// The persisted keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredentials {
    /// Bearer token key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt_token: Option<BearerToken>,

    /// User email key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
}

impl StoredCredentials {
    /// Whether both keys are absent.
    pub fn is_empty(&self) -> bool {
        self.jwt_token.is_none() && self.user_email.is_none()
    }
}

/// Synchronous, durable credential storage.
///
/// The session manager is the only writer; the API gateway only reads.
pub trait CredentialStore: Send + Sync {
    /// Read both keys.
    fn load(&self) -> AuthResult<StoredCredentials>;

    /// Replace both keys.
    fn save(&self, credentials: &StoredCredentials) -> AuthResult<()>;

    /// Read the credential record; absent when no bearer token is stored.
    fn get(&self) -> AuthResult<Option<CredentialRecord>> {
        let stored = self.load()?;
        Ok(stored
            .jwt_token
            .map(|token| CredentialRecord::new(token, stored.user_email)))
    }

    /// Persist a credential record.
    fn set(&self, record: &CredentialRecord) -> AuthResult<()> {
        self.save(&StoredCredentials {
            jwt_token: Some(record.bearer_token.clone()),
            user_email: record.user_email.clone(),
        })
    }

    /// Remove both keys.
    fn clear(&self) -> AuthResult<()> {
        self.save(&StoredCredentials::default())
    }

    /// Set or clear only the bearer token key.
    fn set_bearer_token(&self, token: Option<&BearerToken>) -> AuthResult<()> {
        let mut stored = self.load()?;
        stored.jwt_token = token.cloned();
        self.save(&stored)
    }

    /// Set or clear only the user email key.
    fn set_user_email(&self, email: Option<&str>) -> AuthResult<()> {
        let mut stored = self.load()?;
        stored.user_email = email.map(str::to_string);
        self.save(&stored)
    }

    /// Current bearer token, treating read failures as absent.
    fn bearer_token(&self) -> Option<BearerToken> {
        self.load().ok().and_then(|stored| stored.jwt_token)
    }
}

/// In-memory credential store for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    inner: Mutex<StoredCredentials>,
}

impl MemoryCredentialStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with a record.
    pub fn with_record(record: CredentialRecord) -> Self {
        Self {
            inner: Mutex::new(StoredCredentials {
                jwt_token: Some(record.bearer_token),
                user_email: record.user_email,
            }),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> AuthResult<StoredCredentials> {
        Ok(self.inner.lock().clone())
    }

    fn save(&self, credentials: &StoredCredentials) -> AuthResult<()> {
        *self.inner.lock() = credentials.clone();
        Ok(())
    }
}

/// JSON file credential store.
///
/// Writes go to a temporary sibling and are renamed into place. The mutex
/// serializes writers that share this instance.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileCredentialStore {
    /// Create a store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Store at [`FileCredentialStore::default_path`].
    pub fn open_default() -> AuthResult<Self> {
        Ok(Self::new(Self::default_path()?))
    }

    /// `$MAILGATE_CREDENTIALS_PATH`, else `<data dir>/mailgate/credentials.json`.
    pub fn default_path() -> AuthResult<PathBuf> {
        if let Ok(path) = std::env::var(CREDENTIALS_PATH_ENV) {
            if !path.trim().is_empty() {
                return Ok(PathBuf::from(path));
            }
        }
        dirs::data_dir()
            .map(|dir| dir.join("mailgate").join("credentials.json"))
            .ok_or_else(|| AuthError::ConfigError("no data directory available".to_string()))
    }

    /// Backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_atomic(&self, contents: &str) -> AuthResult<()> {
        let parent = self
            .path
            .parent()
            .ok_or_else(|| AuthError::Storage("invalid credentials path".to_string()))?;
        fs::create_dir_all(parent).map_err(storage_error)?;

        let file_name = self
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| AuthError::Storage("invalid credentials path".to_string()))?;
        let tmp_path = parent.join(format!("{}.tmp.{}", file_name, uuid::Uuid::now_v7()));

        let result = fs::write(&tmp_path, contents)
            .map_err(storage_error)
            .and_then(|()| self.replace_with(&tmp_path));
        if result.is_err() {
            if let Err(e) = fs::remove_file(&tmp_path) {
                if e.kind() != ErrorKind::NotFound {
                    warn!(path = %tmp_path.display(), error = %e, "Failed to remove temporary credentials file");
                }
            }
        }
        result
    }

    fn replace_with(&self, tmp_path: &Path) -> AuthResult<()> {
        restrict_permissions(tmp_path)?;
        if cfg!(windows) && self.path.exists() {
            fs::remove_file(&self.path).map_err(storage_error)?;
        }
        fs::rename(tmp_path, &self.path).map_err(storage_error)
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> AuthResult<StoredCredentials> {
        let _guard = self.lock.lock();
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(StoredCredentials::default()),
            Err(e) => return Err(storage_error(e)),
        };
        if contents.trim().is_empty() {
            return Ok(StoredCredentials::default());
        }
        serde_json::from_str(&contents)
            .map_err(|e| AuthError::Storage(format!("unreadable credentials file: {}", e)))
    }

    fn save(&self, credentials: &StoredCredentials) -> AuthResult<()> {
        let _guard = self.lock.lock();
        if credentials.is_empty() {
            match fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(storage_error(e)),
            }
            debug!(path = %self.path.display(), "cleared stored credentials");
            return Ok(());
        }

        let contents = serde_json::to_string_pretty(credentials)
            .map_err(|e| AuthError::Storage(e.to_string()))?;
        self.write_atomic(&contents)?;
        debug!(path = %self.path.display(), "stored credentials");
        Ok(())
    }
}

fn storage_error(e: std::io::Error) -> AuthError {
    AuthError::Storage(e.to_string())
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> AuthResult<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(storage_error)
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> AuthResult<()> {
    Ok(())
}
