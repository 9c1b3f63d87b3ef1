//! Per-user cloud copy of the task collection.
//!
//! Tasks live at `users/{uid}/tasks/{id}` on a [`DocumentStore`]. Every
//! call made while signed out is a silent no-op.

pub mod http;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::error::{CloudError, CloudResult};
use crate::models::{MAX_TASK_ID, Task, TaskDocument, TaskId};
use crate::session::Session;

pub use http::{HttpAuthBackend, HttpDocumentStore};
pub use memory::{MemoryAuthBackend, MemoryDocumentStore};

/// Upper bound on writes in a single batch request.
pub const MAX_BATCH_WRITES: usize = 500;

/// Top-level fields of a document
pub type Fields = Map<String, Value>;

/// A document returned from a collection listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

pub fn user_path(uid: &str) -> String {
    format!("users/{uid}")
}

pub fn task_collection_path(uid: &str) -> String {
    format!("users/{uid}/tasks")
}

pub fn task_document_path(uid: &str, id: TaskId) -> String {
    format!("users/{uid}/tasks/{id}")
}

fn segments(path: &str) -> Option<Vec<&str>> {
    let parts: Vec<&str> = path.split('/').collect();
    parts
        .iter()
        .all(|part| !part.is_empty() && *part != "." && *part != "..")
        .then_some(parts)
}

/// `collection/doc[/collection/doc...]`
pub fn is_document_path(path: &str) -> bool {
    segments(path).is_some_and(|parts| parts.len() % 2 == 0)
}

/// `collection[/doc/collection...]`
pub fn is_collection_path(path: &str) -> bool {
    segments(path).is_some_and(|parts| parts.len() % 2 == 1)
}

/// Serialize any struct into top-level document fields.
pub fn to_fields<T: Serialize>(value: &T) -> CloudResult<Fields> {
    match serde_json::to_value(value)? {
        Value::Object(fields) => Ok(fields),
        other => Err(CloudError::Serialization(serde::ser::Error::custom(format!(
            "expected an object, got {other}"
        )))),
    }
}

/// Remote document database
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_document(&self, path: &str) -> CloudResult<Option<Fields>>;

    /// Upsert with merge semantics: fields not present in `fields` keep
    /// their stored value.
    async fn merge_document(&self, path: &str, fields: Fields) -> CloudResult<()>;

    async fn delete_document(&self, path: &str) -> CloudResult<()>;

    /// All documents directly under `collection`; empty when absent.
    async fn list_documents(&self, collection: &str) -> CloudResult<Vec<Document>>;

    /// Delete up to [`MAX_BATCH_WRITES`] documents in one request.
    async fn batch_delete(&self, paths: &[String]) -> CloudResult<()>;
}

/// Maps tasks to and from the signed-in user's documents
#[derive(Clone)]
pub struct TaskCloudService {
    documents: Arc<dyn DocumentStore>,
    session: Session,
}

impl TaskCloudService {
    pub fn new(documents: Arc<dyn DocumentStore>, session: Session) -> Self {
        Self { documents, session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn documents(&self) -> &Arc<dyn DocumentStore> {
        &self.documents
    }

    /// Merge the task into `users/{uid}/tasks/{id}`.
    pub async fn save_task(&self, task: &Task) -> CloudResult<()> {
        let Some(uid) = self.session.uid() else {
            tracing::debug!(task_id = task.id, "Signed out, skipping cloud save");
            return Ok(());
        };

        let fields = to_fields(&TaskDocument::from(task))?;
        self.documents
            .merge_document(&task_document_path(&uid, task.id), fields)
            .await
    }

    pub async fn delete_task(&self, task: &Task) -> CloudResult<()> {
        let Some(uid) = self.session.uid() else {
            tracing::debug!(task_id = task.id, "Signed out, skipping cloud delete");
            return Ok(());
        };

        self.documents
            .delete_document(&task_document_path(&uid, task.id))
            .await
    }

    /// Every task stored for the current user. Undecodable documents are
    /// skipped.
    pub async fn get_all_tasks(&self) -> CloudResult<Vec<Task>> {
        let Some(uid) = self.session.uid() else {
            return Ok(Vec::new());
        };

        let documents = self
            .documents
            .list_documents(&task_collection_path(&uid))
            .await?;

        let mut tasks = Vec::with_capacity(documents.len());
        for document in documents {
            match decode_task(document) {
                Ok(task) => tasks.push(task),
                Err(reason) => tracing::warn!(%reason, "Skipping undecodable cloud task"),
            }
        }
        Ok(tasks)
    }

    /// Remove every task document of `uid` in batches. Returns the number of
    /// deleted documents.
    pub async fn delete_all_tasks(&self, uid: &str) -> CloudResult<usize> {
        let documents = self
            .documents
            .list_documents(&task_collection_path(uid))
            .await?;

        let collection = task_collection_path(uid);
        let paths: Vec<String> = documents
            .iter()
            .map(|doc| format!("{collection}/{}", doc.id))
            .collect();

        for chunk in paths.chunks(MAX_BATCH_WRITES) {
            self.documents.batch_delete(chunk).await?;
            tracing::debug!(uid, deleted = chunk.len(), "Deleted batch of cloud tasks");
        }

        Ok(paths.len())
    }
}

fn decode_task(document: Document) -> Result<Task, String> {
    let doc_id = document
        .id
        .parse::<TaskId>()
        .ok()
        .filter(|id| (1..=MAX_TASK_ID).contains(id))
        .ok_or_else(|| format!("document id `{}` is not a task id", document.id))?;

    let mut decoded: TaskDocument = serde_json::from_value(Value::Object(document.fields))
        .map_err(|err| format!("document {doc_id}: {err}"))?;

    match decoded.id {
        0 => decoded.id = doc_id,
        id if id != doc_id => {
            return Err(format!("document {doc_id} carries mismatched id {id}"));
        }
        _ => {}
    }
    Ok(decoded.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Transition;
    use crate::session::AuthUser;

    fn signed_in(store: Arc<MemoryDocumentStore>) -> TaskCloudService {
        let session = Session::new();
        session.open(AuthUser {
            uid: "u1".into(),
            email: "u1@example.com".into(),
            token: "t".into(),
        });
        TaskCloudService::new(store, session)
    }

    #[test]
    fn path_shapes() {
        assert!(is_document_path("users/u1"));
        assert!(is_document_path("users/u1/tasks/9"));
        assert!(is_collection_path("users/u1/tasks"));
        assert!(!is_document_path("users/u1/tasks"));
        assert!(!is_document_path("users//tasks/1"));
        assert!(!is_collection_path("users/../tasks"));
    }

    #[tokio::test]
    async fn signed_out_calls_are_no_ops() {
        let store = Arc::new(MemoryDocumentStore::new());
        let cloud = TaskCloudService::new(store.clone(), Session::new());
        let task = Task {
            id: 3,
            ..Task::new("offline")
        };

        cloud.save_task(&task).await.unwrap();
        cloud.delete_task(&task).await.unwrap();
        assert!(cloud.get_all_tasks().await.unwrap().is_empty());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn save_merges_into_existing_document() {
        let store = Arc::new(MemoryDocumentStore::new());
        let cloud = signed_in(store.clone());

        let mut extra = Fields::new();
        extra.insert("sharedWith".into(), Value::from("bob"));
        store
            .merge_document(&task_document_path("u1", 8), extra)
            .await
            .unwrap();

        let mut task = Task {
            id: 8,
            ..Task::new("Pay rent")
        };
        task.apply(Transition::Complete, 5).unwrap();
        cloud.save_task(&task).await.unwrap();

        let stored = store
            .get_document("users/u1/tasks/8")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored["sharedWith"], "bob");
        assert_eq!(stored["isCompleted"], true);

        assert_eq!(cloud.get_all_tasks().await.unwrap(), vec![task]);
    }

    #[tokio::test]
    async fn undecodable_documents_are_skipped() {
        let store = Arc::new(MemoryDocumentStore::new());
        let cloud = signed_in(store.clone());

        let mut bad = Fields::new();
        bad.insert("title".into(), Value::from(12));
        store.merge_document("users/u1/tasks/1", bad).await.unwrap();

        let mut missing_id = Fields::new();
        missing_id.insert("title".into(), Value::from("legacy"));
        store
            .merge_document("users/u1/tasks/2", missing_id)
            .await
            .unwrap();

        let tasks = cloud.get_all_tasks().await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, 2);
        assert_eq!(tasks[0].title, "legacy");
    }

    #[tokio::test]
    async fn out_of_range_and_mismatched_ids_are_skipped() {
        let store = Arc::new(MemoryDocumentStore::new());
        let cloud = signed_in(store.clone());

        let titled = |title: &str, id: Option<u64>| {
            let mut fields = Fields::new();
            fields.insert("title".into(), Value::from(title));
            if let Some(id) = id {
                fields.insert("id".into(), Value::from(id));
            }
            fields
        };

        store
            .merge_document("users/u1/tasks/18446744073709551615", titled("too big", None))
            .await
            .unwrap();
        store
            .merge_document("users/u1/tasks/0", titled("zero", None))
            .await
            .unwrap();
        store
            .merge_document("users/u1/tasks/5", titled("mismatch", Some(6)))
            .await
            .unwrap();
        store
            .merge_document("users/u1/tasks/2", titled("valid", Some(2)))
            .await
            .unwrap();

        let tasks = cloud.get_all_tasks().await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, 2);
        assert_eq!(tasks[0].title, "valid");
    }

    #[tokio::test]
    async fn delete_all_tasks_uses_bounded_batches() {
        let store = Arc::new(MemoryDocumentStore::new());
        let cloud = signed_in(store.clone());

        for id in 1..=1203 {
            cloud
                .save_task(&Task {
                    id,
                    ..Task::new("bulk")
                })
                .await
                .unwrap();
        }

        assert_eq!(cloud.delete_all_tasks("u1").await.unwrap(), 1203);
        assert!(cloud.get_all_tasks().await.unwrap().is_empty());
        assert_eq!(store.batch_sizes(), vec![500, 500, 203]);
    }
}
