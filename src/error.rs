//! Error types for the task core

use crate::models::{TaskId, TransitionError};

/// Local store failure. Always surfaced to the caller.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("local store lock poisoned")]
    Poisoned,

    #[error("invalid stored task data: {0}")]
    InvalidData(String),

    #[error("failed to create database directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("background store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Remote document service failure
#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("cloud service returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid document: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid document path `{0}`")]
    InvalidPath(String),

    #[error("batch of {0} writes exceeds the limit of {max}", max = crate::cloud::MAX_BATCH_WRITES)]
    BatchTooLarge(usize),

    #[error("not signed in")]
    Unauthenticated,
}

pub type CloudResult<T> = Result<T, CloudError>;

/// Account and credential failures
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("an account already exists for {0}")]
    EmailInUse(String),

    #[error("not signed in")]
    NotSignedIn,

    #[error("re-authentication failed")]
    ReauthenticationFailed,

    #[error("no profile stored for user {0}")]
    ProfileMissing(String),

    #[error("auth service error: {0}")]
    Backend(String),

    #[error(transparent)]
    Cloud(#[from] CloudError),
}

pub type AuthResult<T> = Result<T, AuthError>;

/// Repository failure
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("cloud sync failed: {0}")]
    Cloud(#[from] CloudError),
}

pub type RepoResult<T> = Result<T, RepoError>;
