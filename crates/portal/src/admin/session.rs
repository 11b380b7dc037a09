//! Admin session storage.
//!
//! The admin area authenticates with a bearer token kept on the client. The
//! store is cleared on sign-out and whenever an authenticated call comes
//! back 401.

use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from persisting the admin session.
#[derive(Debug, Error)]
pub enum SessionStoreError {
    /// Reading or writing the session file failed.
    #[error("session file error: {0}")]
    Io(#[from] std::io::Error),

    /// The session file is not valid JSON.
    #[error("session file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Bearer token storage with an explicit lifecycle.
pub trait SessionStore: Send + Sync {
    /// Current token, if signed in.
    fn token(&self) -> Option<SecretString>;

    /// Email of the signed-in admin, if known.
    fn email(&self) -> Option<String>;

    /// Store a token after sign-in.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be persisted.
    fn set_token(&self, token: SecretString, email: Option<String>)
    -> Result<(), SessionStoreError>;

    /// Forget the token and email.
    ///
    /// # Errors
    ///
    /// Returns an error if persisted state cannot be removed.
    fn clear(&self) -> Result<(), SessionStoreError>;
}

struct StoredSession {
    token: SecretString,
    email: Option<String>,
}

/// Session store living for the duration of the process.
#[derive(Default)]
pub struct MemorySessionStore {
    session: RwLock<Option<StoredSession>>,
}

impl std::fmt::Debug for MemorySessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySessionStore")
            .field("token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn token(&self) -> Option<SecretString> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|s| s.token.clone())
    }

    fn email(&self) -> Option<String> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(|s| s.email.clone())
    }

    fn set_token(
        &self,
        token: SecretString,
        email: Option<String>,
    ) -> Result<(), SessionStoreError> {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) =
            Some(StoredSession { token, email });
        Ok(())
    }

    fn clear(&self) -> Result<(), SessionStoreError> {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct SessionFile {
    token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    email: Option<String>,
}

/// Session store persisted as a small JSON file, so operator tooling stays
/// signed in between runs.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Option<SessionFile> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to read session file");
                return None;
            }
        };
        serde_json::from_str(&contents)
            .inspect_err(|e| {
                tracing::warn!(path = %self.path.display(), error = %e, "Ignoring corrupt session file");
            })
            .ok()
    }
}

impl SessionStore for FileSessionStore {
    fn token(&self) -> Option<SecretString> {
        self.load()
            .filter(|s| !s.token.is_empty())
            .map(|s| SecretString::from(s.token))
    }

    fn email(&self) -> Option<String> {
        self.load().and_then(|s| s.email)
    }

    fn set_token(
        &self,
        token: SecretString,
        email: Option<String>,
    ) -> Result<(), SessionStoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = SessionFile {
            token: token.expose_secret().to_owned(),
            email,
        };
        std::fs::write(&self.path, serde_json::to_vec(&file)?)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), SessionStoreError> {
        match std::fs::remove_file(&self.path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}
