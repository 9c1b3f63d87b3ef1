//! Task repository: the single read/write path over the local store and
//! the cloud copy.
//!
//! Every mutation is applied locally first and then written through to the
//! cloud. Local failures are returned; cloud failures are logged and never
//! roll back the local result. Nothing makes the two steps atomic, so an
//! interrupted write leaves the cloud stale until the next write-through or
//! [`TaskRepository::sync_from_cloud`].

use std::sync::Arc;

use crate::cloud::TaskCloudService;
use crate::db::{LocalStore, TaskFilter};
use crate::error::{RepoError, RepoResult, StoreResult};
use crate::live::LiveQuery;
use crate::models::{Task, TaskId, Transition, generate_task_id, now_millis};

/// A cloud task written over the local store during sync
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedTask {
    /// Local copy before the merge, `None` when the task was new here
    pub previous: Option<Task>,
    pub task: Task,
}

pub struct TaskRepository {
    store: Arc<LocalStore>,
    cloud: TaskCloudService,
}

impl TaskRepository {
    pub fn new(store: Arc<LocalStore>, cloud: TaskCloudService) -> Self {
        Self { store, cloud }
    }

    pub fn cloud(&self) -> &TaskCloudService {
        &self.cloud
    }

    /// Run a store call on the blocking pool.
    async fn local<T, F>(&self, call: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&LocalStore) -> StoreResult<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || call(&store)).await?
    }

    async fn write_through(&self, task: &Task) {
        if let Err(err) = self.cloud.save_task(task).await {
            tracing::warn!(task_id = task.id, error = %err, "Cloud write-through failed");
        }
    }

    /// Store a new task, assigning a random id when `task.id == 0`.
    pub async fn add_task(&self, mut task: Task) -> RepoResult<Task> {
        if task.id == 0 {
            task.id = generate_task_id();
        }

        let row = task.clone();
        self.local(move |store| store.insert(&row)).await?;
        tracing::debug!(task_id = task.id, "Task added");

        self.write_through(&task).await;
        Ok(task)
    }

    /// Live view for an arbitrary filter
    pub fn live(&self, filter: TaskFilter) -> LiveQuery<Vec<Task>> {
        LiveQuery::new(Arc::clone(&self.store), move |store| store.list(&filter))
    }

    pub fn get_tasks(&self) -> LiveQuery<Vec<Task>> {
        self.live(TaskFilter::All)
    }

    pub fn get_pending_tasks(&self) -> LiveQuery<Vec<Task>> {
        self.live(TaskFilter::Pending)
    }

    pub fn get_completed_tasks(&self) -> LiveQuery<Vec<Task>> {
        self.live(TaskFilter::Completed)
    }

    pub fn get_deleted_tasks(&self) -> LiveQuery<Vec<Task>> {
        self.live(TaskFilter::Deleted)
    }

    pub fn get_finished_tasks(&self) -> LiveQuery<Vec<Task>> {
        self.live(TaskFilter::Finished)
    }

    pub fn get_tasks_with_reminders(&self) -> LiveQuery<Vec<Task>> {
        self.live(TaskFilter::WithReminders)
    }

    pub fn get_tasks_by_label(&self, label: impl Into<String>) -> LiveQuery<Vec<Task>> {
        self.live(TaskFilter::Label(label.into()))
    }

    pub fn get_all_labels(&self) -> LiveQuery<Vec<String>> {
        LiveQuery::new(Arc::clone(&self.store), LocalStore::labels)
    }

    pub fn get_task_by_id(&self, id: TaskId) -> LiveQuery<Option<Task>> {
        LiveQuery::new(Arc::clone(&self.store), move |store| store.get(id))
    }

    /// Point-in-time read of one task
    pub async fn task(&self, id: TaskId) -> RepoResult<Option<Task>> {
        Ok(self.local(move |store| store.get(id)).await?)
    }

    /// Point-in-time read of a view
    pub async fn tasks(&self, filter: TaskFilter) -> RepoResult<Vec<Task>> {
        Ok(self.local(move |store| store.list(&filter)).await?)
    }

    pub async fn soft_delete_task(&self, id: TaskId) -> RepoResult<Task> {
        self.transition(id, Transition::SoftDelete).await
    }

    pub async fn mark_task_completed(&self, id: TaskId) -> RepoResult<Task> {
        self.transition(id, Transition::Complete).await
    }

    pub async fn mark_task_pending(&self, id: TaskId) -> RepoResult<Task> {
        self.transition(id, Transition::MarkPending).await
    }

    pub async fn restore_task(&self, id: TaskId) -> RepoResult<Task> {
        self.transition(id, Transition::Restore).await
    }

    /// Flip the flag pair locally, read the record back, write it through.
    async fn transition(&self, id: TaskId, transition: Transition) -> RepoResult<Task> {
        let mut task = self.task(id).await?.ok_or(RepoError::NotFound(id))?;

        if task.apply(transition, now_millis())? {
            self.local(move |store| store.write_state(&task)).await?;
        }

        let stored = self.task(id).await?.ok_or(RepoError::NotFound(id))?;
        tracing::debug!(task_id = id, ?transition, state = %stored.state, "Task state changed");

        self.write_through(&stored).await;
        Ok(stored)
    }

    /// Overwrite the whole record. Completion and deletion dates are brought
    /// in line with the state the caller supplies.
    pub async fn update_task(&self, mut task: Task) -> RepoResult<Task> {
        task.align_dates(now_millis());
        let row = task.clone();
        if !self.local(move |store| store.update(&row)).await? {
            return Err(RepoError::NotFound(task.id));
        }

        self.write_through(&task).await;
        Ok(task)
    }

    /// Permanently delete a task locally and remotely.
    pub async fn delete_task(&self, task: &Task) -> RepoResult<()> {
        let id = task.id;
        self.local(move |store| store.delete(id)).await?;

        if let Err(err) = self.cloud.delete_task(task).await {
            tracing::warn!(task_id = id, error = %err, "Cloud delete failed");
        }
        Ok(())
    }

    /// Upsert every cloud task into the local store. Local-only tasks are
    /// kept. Returns the number of merged tasks.
    pub async fn sync_from_cloud(&self) -> RepoResult<usize> {
        Ok(self.pull_from_cloud().await?.len())
    }

    /// Like [`TaskRepository::sync_from_cloud`], but reports each merged task
    /// next to the local copy it replaced.
    pub async fn pull_from_cloud(&self) -> RepoResult<Vec<MergedTask>> {
        let remote = self.cloud.get_all_tasks().await?;

        let merged = self
            .local(move |store| {
                let mut merged = Vec::with_capacity(remote.len());
                for task in remote {
                    let previous = store.get(task.id)?;
                    store.upsert(&task)?;
                    merged.push(MergedTask { previous, task });
                }
                Ok(merged)
            })
            .await?;

        tracing::info!(merged = merged.len(), "Synced tasks from cloud");
        Ok(merged)
    }

    /// Wipe the local table only (sign-out, account switch).
    pub async fn clear_local_tasks(&self) -> RepoResult<usize> {
        let removed = self.local(LocalStore::clear).await?;
        tracing::info!(removed, "Cleared local tasks");
        Ok(removed)
    }
}
