use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use taskmate::cloud::{Document, Fields, MemoryAuthBackend, MemoryDocumentStore};
use taskmate::error::{AuthResult, CloudError, CloudResult};
use taskmate::{
    AccountService, AuthBackend, AuthError, AuthUser, DocumentStore, Session, Task,
    TaskCloudService,
};

type Log = Arc<Mutex<Vec<String>>>;

/// Document store that logs mutating calls and can refuse batch deletes
struct LoggedStore {
    inner: MemoryDocumentStore,
    log: Log,
    fail_batches: bool,
}

#[async_trait]
impl DocumentStore for LoggedStore {
    async fn get_document(&self, path: &str) -> CloudResult<Option<Fields>> {
        self.inner.get_document(path).await
    }

    async fn merge_document(&self, path: &str, fields: Fields) -> CloudResult<()> {
        self.inner.merge_document(path, fields).await
    }

    async fn delete_document(&self, path: &str) -> CloudResult<()> {
        self.log.lock().unwrap().push(format!("delete {path}"));
        self.inner.delete_document(path).await
    }

    async fn list_documents(&self, collection: &str) -> CloudResult<Vec<Document>> {
        self.inner.list_documents(collection).await
    }

    async fn batch_delete(&self, paths: &[String]) -> CloudResult<()> {
        if self.fail_batches {
            return Err(CloudError::Status {
                status: 500,
                message: "batch rejected".into(),
            });
        }
        self.log.lock().unwrap().push(format!("batch {}", paths.len()));
        self.inner.batch_delete(paths).await
    }
}

struct LoggedAuth {
    inner: MemoryAuthBackend,
    log: Log,
}

#[async_trait]
impl AuthBackend for LoggedAuth {
    async fn sign_up(&self, email: &str, password: &str) -> AuthResult<AuthUser> {
        self.inner.sign_up(email, password).await
    }

    async fn sign_in(&self, email: &str, password: &str) -> AuthResult<AuthUser> {
        self.inner.sign_in(email, password).await
    }

    async fn reauthenticate(&self, user: &AuthUser, password: &str) -> AuthResult<()> {
        self.log.lock().unwrap().push("reauthenticate".into());
        self.inner.reauthenticate(user, password).await
    }

    async fn delete_identity(&self, user: &AuthUser) -> AuthResult<()> {
        self.log.lock().unwrap().push("delete identity".into());
        self.inner.delete_identity(user).await
    }
}

struct Harness {
    accounts: AccountService,
    cloud: TaskCloudService,
    store: Arc<LoggedStore>,
    auth: Arc<LoggedAuth>,
    log: Log,
}

impl Harness {
    fn new(fail_batches: bool) -> Self {
        let log = Log::default();
        let store = Arc::new(LoggedStore {
            inner: MemoryDocumentStore::new(),
            log: log.clone(),
            fail_batches,
        });
        let auth = Arc::new(LoggedAuth {
            inner: MemoryAuthBackend::new(),
            log: log.clone(),
        });
        let cloud = TaskCloudService::new(store.clone(), Session::new());
        let accounts = AccountService::new(auth.clone(), cloud.clone());
        Self {
            accounts,
            cloud,
            store,
            auth,
            log,
        }
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    async fn seed_tasks(&self, count: u64) {
        for id in 1..=count {
            self.cloud
                .save_task(&Task { id, ..Task::new(format!("task {id}")) })
                .await
                .unwrap();
        }
    }
}

#[tokio::test]
async fn sign_up_stores_profile_and_opens_session() {
    let h = Harness::new(false);

    let profile = h
        .accounts
        .sign_up("Ada", "ada@example.com", "hunter22")
        .await
        .unwrap();

    let user = h.accounts.current_user().unwrap();
    assert_eq!(user.uid, profile.uid);
    assert_eq!(profile.name, "Ada");

    let stored = h
        .store
        .get_document(&format!("users/{}", profile.uid))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored["email"], "ada@example.com");
    assert_eq!(stored["name"], "Ada");
}

#[tokio::test]
async fn duplicate_sign_up_is_rejected() {
    let h = Harness::new(false);
    h.accounts
        .sign_up("Ada", "ada@example.com", "hunter22")
        .await
        .unwrap();

    let err = h
        .accounts
        .sign_up("Other", "ada@example.com", "whatever")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::EmailInUse(_)));
}

#[tokio::test]
async fn login_loads_the_profile_by_uid() {
    let h = Harness::new(false);
    let created = h
        .accounts
        .sign_up("Ada", "ada@example.com", "hunter22")
        .await
        .unwrap();
    h.accounts.sign_out();
    assert!(h.accounts.current_user().is_none());

    let profile = h
        .accounts
        .login("ada@example.com", "hunter22")
        .await
        .unwrap();
    assert_eq!(profile, created);
    assert!(h.accounts.current_user().is_some());
}

#[tokio::test]
async fn wrong_password_leaves_session_closed() {
    let h = Harness::new(false);
    h.accounts
        .sign_up("Ada", "ada@example.com", "hunter22")
        .await
        .unwrap();
    h.accounts.sign_out();

    let err = h
        .accounts
        .login("ada@example.com", "nope-nope")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidCredentials));
    assert!(h.accounts.current_user().is_none());
}

#[tokio::test]
async fn delete_account_tears_down_in_order() {
    let h = Harness::new(false);
    let profile = h
        .accounts
        .sign_up("Ada", "ada@example.com", "hunter22")
        .await
        .unwrap();
    h.seed_tasks(1203).await;

    h.accounts.delete_account("hunter22").await.unwrap();

    assert_eq!(
        h.log(),
        vec![
            "reauthenticate".to_string(),
            "batch 500".into(),
            "batch 500".into(),
            "batch 203".into(),
            format!("delete users/{}", profile.uid),
            "delete identity".into(),
        ]
    );
    assert!(h.store.inner.is_empty());
    assert!(!h.auth.inner.contains("ada@example.com"));
    assert!(h.accounts.current_user().is_none());
}

#[tokio::test]
async fn failed_reauthentication_changes_nothing() {
    let h = Harness::new(false);
    h.accounts
        .sign_up("Ada", "ada@example.com", "hunter22")
        .await
        .unwrap();
    h.seed_tasks(3).await;

    let err = h.accounts.delete_account("wrong-password").await.unwrap_err();
    assert!(matches!(err, AuthError::ReauthenticationFailed));

    assert_eq!(h.log(), vec!["reauthenticate".to_string()]);
    assert_eq!(h.store.inner.len(), 4);
    assert!(h.auth.inner.contains("ada@example.com"));
    assert!(h.accounts.current_user().is_some());
}

#[tokio::test]
async fn failed_task_deletion_keeps_profile_and_identity() {
    let h = Harness::new(true);
    let profile = h
        .accounts
        .sign_up("Ada", "ada@example.com", "hunter22")
        .await
        .unwrap();
    h.seed_tasks(2).await;

    let err = h.accounts.delete_account("hunter22").await.unwrap_err();
    assert!(matches!(err, AuthError::Cloud(_)));

    assert_eq!(h.log(), vec!["reauthenticate".to_string()]);
    assert!(
        h.store
            .get_document(&format!("users/{}", profile.uid))
            .await
            .unwrap()
            .is_some()
    );
    assert!(h.auth.inner.contains("ada@example.com"));
}

#[tokio::test]
async fn delete_account_requires_a_session() {
    let h = Harness::new(false);
    let err = h.accounts.delete_account("hunter22").await.unwrap_err();
    assert!(matches!(err, AuthError::NotSignedIn));
    assert!(h.log().is_empty());
}
