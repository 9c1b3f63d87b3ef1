//! The signed-in user, shared by the cloud service and HTTP backends.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

/// Authenticated identity with its bearer token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub uid: String,
    pub email: String,
    pub token: String,
}

/// Cloneable handle to the current session
#[derive(Debug, Clone, Default)]
pub struct Session {
    user: Arc<RwLock<Option<AuthUser>>>,
    file: Option<PathBuf>,
}

impl Session {
    /// In-memory session, signed out.
    pub fn new() -> Self {
        Self::default()
    }

    /// Session persisted to `path`. A missing or unreadable file starts
    /// signed out.
    pub fn load(path: &Path) -> Self {
        let user = match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<AuthUser>(&content) {
                Ok(user) => Some(user),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "Ignoring corrupt session file");
                    None
                }
            },
            Err(_) => None,
        };

        Self {
            user: Arc::new(RwLock::new(user)),
            file: Some(path.to_path_buf()),
        }
    }

    pub fn current(&self) -> Option<AuthUser> {
        self.user
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn uid(&self) -> Option<String> {
        self.current().map(|user| user.uid)
    }

    pub fn is_signed_in(&self) -> bool {
        self.current().is_some()
    }

    /// Replace the current user.
    pub fn open(&self, user: AuthUser) {
        self.persist(Some(&user));
        *self.user.write().unwrap_or_else(PoisonError::into_inner) = Some(user);
    }

    pub fn close(&self) {
        self.persist(None);
        *self.user.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn persist(&self, user: Option<&AuthUser>) {
        let Some(path) = &self.file else {
            return;
        };

        let result = match user {
            Some(user) => serde_json::to_string_pretty(user)
                .map_err(std::io::Error::other)
                .and_then(|json| {
                    if let Some(parent) = path.parent()
                        && !parent.as_os_str().is_empty()
                    {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(path, json)
                }),
            None => match std::fs::remove_file(path) {
                Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(err),
                _ => Ok(()),
            },
        };

        if let Err(err) = result {
            tracing::warn!(path = %path.display(), error = %err, "Failed to persist session");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> AuthUser {
        AuthUser {
            uid: "u-1".into(),
            email: "alice@example.com".into(),
            token: "tms_abc".into(),
        }
    }

    #[test]
    fn open_and_close() {
        let session = Session::new();
        assert!(!session.is_signed_in());

        session.open(alice());
        assert_eq!(session.uid().as_deref(), Some("u-1"));

        let shared = session.clone();
        shared.close();
        assert!(session.current().is_none());
    }

    #[test]
    fn persisted_session_survives_reload() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("session.json");

        Session::load(&path).open(alice());
        assert_eq!(Session::load(&path).current(), Some(alice()));

        Session::load(&path).close();
        assert!(!path.exists());
        assert!(Session::load(&path).current().is_none());
    }
}
