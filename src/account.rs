//! Account lifecycle: sign-up, login, sign-out and account deletion.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;

use crate::cloud::{TaskCloudService, to_fields, user_path};
use crate::error::{AuthError, AuthResult};
use crate::models::{UserProfile, now_millis};
use crate::session::{AuthUser, Session};

/// Identity provider
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Create an identity and return a live session for it.
    async fn sign_up(&self, email: &str, password: &str) -> AuthResult<AuthUser>;

    async fn sign_in(&self, email: &str, password: &str) -> AuthResult<AuthUser>;

    /// Confirm the signed-in user still knows the password.
    async fn reauthenticate(&self, user: &AuthUser, password: &str) -> AuthResult<()>;

    /// Destroy the identity. Must run last during account deletion.
    async fn delete_identity(&self, user: &AuthUser) -> AuthResult<()>;
}

/// Hash a password or token using argon2
pub fn hash_secret(secret: &str) -> AuthResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Backend(format!("failed to hash secret: {e}")))
}

/// Check a secret against an argon2 hash. Malformed hashes never match.
pub fn verify_secret(secret: &str, hash: &str) -> bool {
    PasswordHash::new(hash).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(secret.as_bytes(), &parsed)
            .is_ok()
    })
}

/// Random bearer token, `tms_` followed by 32 alphanumerics
pub fn generate_token() -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    let body: String = bytes
        .iter()
        .map(|b| ALPHABET[usize::from(*b) % ALPHABET.len()] as char)
        .collect();

    format!("tms_{body}")
}

/// Orchestrates identities, profiles and the session
#[derive(Clone)]
pub struct AccountService {
    auth: Arc<dyn AuthBackend>,
    cloud: TaskCloudService,
}

impl AccountService {
    pub fn new(auth: Arc<dyn AuthBackend>, cloud: TaskCloudService) -> Self {
        Self { auth, cloud }
    }

    fn session(&self) -> &Session {
        self.cloud.session()
    }

    pub fn current_user(&self) -> Option<AuthUser> {
        self.session().current()
    }

    /// Create the identity, open a session and store the profile document.
    pub async fn sign_up(&self, name: &str, email: &str, password: &str) -> AuthResult<UserProfile> {
        let user = self.auth.sign_up(email, password).await?;
        self.session().open(user.clone());

        let profile = UserProfile {
            uid: user.uid.clone(),
            name: name.to_string(),
            email: user.email.clone(),
            created_at: now_millis(),
        };
        self.cloud
            .documents()
            .merge_document(&user_path(&user.uid), to_fields(&profile)?)
            .await?;

        tracing::info!(uid = %user.uid, "Account created");
        Ok(profile)
    }

    /// Verify credentials, then load the profile keyed by the identity id.
    pub async fn login(&self, email: &str, password: &str) -> AuthResult<UserProfile> {
        let user = self.auth.sign_in(email, password).await?;
        self.session().open(user.clone());

        match self.load_profile(&user.uid).await {
            Ok(profile) => {
                tracing::info!(uid = %user.uid, "Signed in");
                Ok(profile)
            }
            Err(err) => {
                self.session().close();
                Err(err)
            }
        }
    }

    async fn load_profile(&self, uid: &str) -> AuthResult<UserProfile> {
        let fields = self
            .cloud
            .documents()
            .get_document(&user_path(uid))
            .await?
            .ok_or_else(|| AuthError::ProfileMissing(uid.to_string()))?;

        serde_json::from_value(serde_json::Value::Object(fields))
            .map_err(|err| AuthError::Cloud(err.into()))
    }

    pub fn sign_out(&self) {
        self.session().close();
    }

    /// Tear the account down: re-authenticate, delete all task documents,
    /// delete the profile, delete the identity. Stops at the first failure;
    /// earlier steps are not undone.
    pub async fn delete_account(&self, password: &str) -> AuthResult<()> {
        let user = self.current_user().ok_or(AuthError::NotSignedIn)?;

        self.auth.reauthenticate(&user, password).await?;

        let deleted = self.cloud.delete_all_tasks(&user.uid).await?;
        tracing::info!(uid = %user.uid, deleted, "Deleted cloud tasks");

        self.cloud
            .documents()
            .delete_document(&user_path(&user.uid))
            .await?;

        self.auth.delete_identity(&user).await?;

        self.session().close();
        tracing::info!(uid = %user.uid, "Account deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_prefixed_and_unique() {
        let a = generate_token();
        let b = generate_token();
        assert!(a.starts_with("tms_"));
        assert_eq!(a.len(), 36);
        assert_ne!(a, b);
    }

    #[test]
    fn hashed_secret_verifies() {
        let hash = hash_secret("correct horse").unwrap();
        assert!(verify_secret("correct horse", &hash));
        assert!(!verify_secret("battery staple", &hash));
        assert!(!verify_secret("correct horse", "not-a-hash"));
    }
}
