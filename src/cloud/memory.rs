//! In-process cloud backends, used offline and in tests.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{Document, DocumentStore, Fields, MAX_BATCH_WRITES};
use crate::account::{AuthBackend, generate_token, hash_secret, verify_secret};
use crate::error::{AuthError, AuthResult, CloudError, CloudResult};
use crate::session::AuthUser;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Document store kept in a sorted map keyed by full path
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: Mutex<BTreeMap<String, Fields>>,
    batches: Mutex<Vec<usize>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.documents).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sizes of every batch delete received so far.
    pub fn batch_sizes(&self) -> Vec<usize> {
        lock(&self.batches).clone()
    }
}

fn check_document(path: &str) -> CloudResult<()> {
    if super::is_document_path(path) {
        Ok(())
    } else {
        Err(CloudError::InvalidPath(path.to_string()))
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get_document(&self, path: &str) -> CloudResult<Option<Fields>> {
        check_document(path)?;
        Ok(lock(&self.documents).get(path).cloned())
    }

    async fn merge_document(&self, path: &str, fields: Fields) -> CloudResult<()> {
        check_document(path)?;
        lock(&self.documents)
            .entry(path.to_string())
            .or_default()
            .extend(fields);
        Ok(())
    }

    async fn delete_document(&self, path: &str) -> CloudResult<()> {
        check_document(path)?;
        lock(&self.documents).remove(path);
        Ok(())
    }

    async fn list_documents(&self, collection: &str) -> CloudResult<Vec<Document>> {
        if !super::is_collection_path(collection) {
            return Err(CloudError::InvalidPath(collection.to_string()));
        }

        let prefix = format!("{collection}/");
        let documents = lock(&self.documents)
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .filter_map(|(path, fields)| {
                let id = &path[prefix.len()..];
                (!id.contains('/')).then(|| Document {
                    id: id.to_string(),
                    fields: fields.clone(),
                })
            })
            .collect();
        Ok(documents)
    }

    async fn batch_delete(&self, paths: &[String]) -> CloudResult<()> {
        if paths.len() > MAX_BATCH_WRITES {
            return Err(CloudError::BatchTooLarge(paths.len()));
        }
        for path in paths {
            check_document(path)?;
        }

        let mut documents = lock(&self.documents);
        for path in paths {
            documents.remove(path);
        }
        lock(&self.batches).push(paths.len());
        Ok(())
    }
}

#[derive(Debug)]
struct Identity {
    uid: String,
    password_hash: String,
}

/// Auth backend holding argon2-hashed identities in memory
#[derive(Debug, Default)]
pub struct MemoryAuthBackend {
    identities: Mutex<HashMap<String, Identity>>,
}

impl MemoryAuthBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, email: &str) -> bool {
        lock(&self.identities).contains_key(email)
    }

    fn session_for(uid: &str, email: &str) -> AuthUser {
        AuthUser {
            uid: uid.to_string(),
            email: email.to_string(),
            token: generate_token(),
        }
    }
}

#[async_trait]
impl AuthBackend for MemoryAuthBackend {
    async fn sign_up(&self, email: &str, password: &str) -> AuthResult<AuthUser> {
        let password_hash = hash_secret(password)?;
        let mut identities = lock(&self.identities);
        if identities.contains_key(email) {
            return Err(AuthError::EmailInUse(email.to_string()));
        }

        let uid = uuid::Uuid::new_v4().to_string();
        identities.insert(
            email.to_string(),
            Identity {
                uid: uid.clone(),
                password_hash,
            },
        );
        Ok(Self::session_for(&uid, email))
    }

    async fn sign_in(&self, email: &str, password: &str) -> AuthResult<AuthUser> {
        let identities = lock(&self.identities);
        match identities.get(email) {
            Some(identity) if verify_secret(password, &identity.password_hash) => {
                Ok(Self::session_for(&identity.uid, email))
            }
            _ => Err(AuthError::InvalidCredentials),
        }
    }

    async fn reauthenticate(&self, user: &AuthUser, password: &str) -> AuthResult<()> {
        let identities = lock(&self.identities);
        match identities.get(&user.email) {
            Some(identity)
                if identity.uid == user.uid && verify_secret(password, &identity.password_hash) =>
            {
                Ok(())
            }
            _ => Err(AuthError::ReauthenticationFailed),
        }
    }

    async fn delete_identity(&self, user: &AuthUser) -> AuthResult<()> {
        let mut identities = lock(&self.identities);
        match identities.get(&user.email) {
            Some(identity) if identity.uid == user.uid => {
                identities.remove(&user.email);
                Ok(())
            }
            _ => Err(AuthError::NotSignedIn),
        }
    }
}
