use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use davmirror_core::{Credentials, DavError, account_root_path};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

const SERVICE_NAME: &str = "davmirror";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),
    #[error("session file I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("session file is malformed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no saved password for {0}")]
    PasswordNotFound(String),
}

/// Where the password is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretBackend {
    /// OS secret service via `keyring`.
    Keyring,
    /// Inside the session file (created with mode 0600 on unix).
    File,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub account_url: String,
    pub username: String,
    pub user_id: String,
    pub password: String,
    pub start_folder: String,
    pub work_offline: bool,
}

impl Session {
    pub fn new(
        account_url: impl Into<String>,
        username: impl Into<String>,
        user_id: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            account_url: account_url.into(),
            username: username.into(),
            user_id: user_id.into(),
            password: password.into(),
            start_folder: String::new(),
            work_offline: false,
        }
    }

    pub fn account_root(&self) -> String {
        account_root_path(&self.user_id)
    }

    pub fn credentials(&self) -> Result<Credentials, DavError> {
        Credentials::new(&self.account_url, &self.username, &self.password)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("account_url", &self.account_url)
            .field("username", &self.username)
            .field("user_id", &self.user_id)
            .field("password", &"<redacted>")
            .field("start_folder", &self.start_folder)
            .field("work_offline", &self.work_offline)
            .finish()
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionRecord {
    #[serde(rename = "accountURL")]
    account_url: String,
    username: String,
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    start_folder: String,
    #[serde(default)]
    work_offline: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    password: Option<String>,
}

/// Persists the session; the record's absence means logged out.
pub struct SessionStore {
    path: PathBuf,
    backend: SecretBackend,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>, backend: SecretBackend) -> Self {
        Self {
            path: path.into(),
            backend,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn has_session(&self) -> bool {
        self.path.is_file()
    }

    pub fn load(&self) -> Result<Option<Session>, StorageError> {
        let Some(record) = self.read_record()? else {
            return Ok(None);
        };
        let password = match (self.backend, record.password) {
            (SecretBackend::File, Some(password)) => password,
            (SecretBackend::File, None) => {
                return Err(StorageError::PasswordNotFound(record.username));
            }
            (SecretBackend::Keyring, _) => match keyring_entry(&record.username)?.get_password() {
                Ok(password) => password,
                Err(keyring::Error::NoEntry) => {
                    return Err(StorageError::PasswordNotFound(record.username));
                }
                Err(err) => return Err(err.into()),
            },
        };
        let user_id = if record.user_id.is_empty() {
            record.username.clone()
        } else {
            record.user_id
        };

        Ok(Some(Session {
            account_url: record.account_url,
            username: record.username,
            user_id,
            password,
            start_folder: record.start_folder,
            work_offline: record.work_offline,
        }))
    }

    /// User id of the stored account without touching the secret store.
    pub fn stored_user_id(&self) -> Result<Option<String>, StorageError> {
        Ok(self.read_record()?.map(|record| {
            if record.user_id.is_empty() {
                record.username
            } else {
                record.user_id
            }
        }))
    }

    pub fn save(&self, session: &Session) -> Result<(), StorageError> {
        if self.backend == SecretBackend::Keyring {
            keyring_entry(&session.username)?.set_password(&session.password)?;
        }
        self.write_record(session)
    }

    /// Rewrites the non-secret fields only.
    pub fn update(&self, session: &Session) -> Result<(), StorageError> {
        self.write_record(session)
    }

    /// Removes the record and its secret. A malformed record is still removed;
    /// its keyring entry cannot be located and is left in place.
    pub fn clear(&self) -> Result<(), StorageError> {
        match self.read_record() {
            Ok(Some(record)) if self.backend == SecretBackend::Keyring => {
                match keyring_entry(&record.username)?.delete_credential() {
                    Ok(()) | Err(keyring::Error::NoEntry) => {}
                    Err(err) => return Err(err.into()),
                }
            }
            Ok(_) => {}
            Err(StorageError::Json(err)) => {
                warn!(path = %self.path.display(), error = %err, "removing malformed session file");
            }
            Err(err) => return Err(err),
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "removed session file");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn read_record(&self) -> Result<Option<SessionRecord>, StorageError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn write_record(&self, session: &Session) -> Result<(), StorageError> {
        let record = SessionRecord {
            account_url: session.account_url.clone(),
            username: session.username.clone(),
            user_id: session.user_id.clone(),
            start_folder: session.start_folder.clone(),
            work_offline: session.work_offline,
            password: (self.backend == SecretBackend::File).then(|| session.password.clone()),
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_vec_pretty(&record)?)?;
        restrict_permissions(&self.path)?;
        Ok(())
    }
}

fn keyring_entry(username: &str) -> Result<Entry, keyring::Error> {
    Entry::new(SERVICE_NAME, username)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}
