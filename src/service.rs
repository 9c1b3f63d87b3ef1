//! Task service: the caller-facing layer that keeps reminders in step with
//! repository mutations.

use std::sync::Arc;

use crate::db::TaskFilter;
use crate::error::RepoResult;
use crate::models::{Task, TaskId, now_millis};
use crate::reminder::ReminderScheduler;
use crate::repository::{MergedTask, TaskRepository};

#[derive(Clone)]
pub struct TaskService {
    repository: Arc<TaskRepository>,
    scheduler: Arc<dyn ReminderScheduler>,
    notifications_enabled: bool,
}

impl TaskService {
    pub fn new(
        repository: Arc<TaskRepository>,
        scheduler: Arc<dyn ReminderScheduler>,
        notifications_enabled: bool,
    ) -> Self {
        Self {
            repository,
            scheduler,
            notifications_enabled,
        }
    }

    pub fn repository(&self) -> &Arc<TaskRepository> {
        &self.repository
    }

    fn schedule(&self, task: &Task) {
        if self.notifications_enabled
            && !task.state.is_finished()
            && task.pending_reminder(now_millis()).is_some()
        {
            self.scheduler.schedule(task);
        }
    }

    fn cancel(&self, task: &Task) {
        if task.reminder_time.is_some() {
            self.scheduler.cancel(task);
        }
    }

    pub async fn add_task(&self, task: Task) -> RepoResult<Task> {
        let stored = self.repository.add_task(task).await?;
        self.schedule(&stored);
        Ok(stored)
    }

    /// Replace the record; the previous reminder is cancelled before the new
    /// one is registered.
    pub async fn update_task(&self, task: Task) -> RepoResult<Task> {
        let previous = self.repository.task(task.id).await?;
        let stored = self.repository.update_task(task).await?;

        if let Some(previous) = previous {
            self.cancel(&previous);
        }
        self.schedule(&stored);
        Ok(stored)
    }

    /// Soft delete. The reminder is cancelled before the flag flips.
    pub async fn soft_delete_task(&self, id: TaskId) -> RepoResult<Task> {
        if let Some(task) = self.repository.task(id).await? {
            self.cancel(&task);
        }
        self.repository.soft_delete_task(id).await
    }

    pub async fn mark_task_completed(&self, id: TaskId) -> RepoResult<Task> {
        if let Some(task) = self.repository.task(id).await? {
            self.cancel(&task);
        }
        self.repository.mark_task_completed(id).await
    }

    pub async fn mark_task_pending(&self, id: TaskId) -> RepoResult<Task> {
        let task = self.repository.mark_task_pending(id).await?;
        self.schedule(&task);
        Ok(task)
    }

    pub async fn restore_task(&self, id: TaskId) -> RepoResult<Task> {
        let task = self.repository.restore_task(id).await?;
        self.schedule(&task);
        Ok(task)
    }

    /// Hard delete, cancelling any reminder first.
    pub async fn delete_task(&self, task: &Task) -> RepoResult<()> {
        self.cancel(task);
        self.repository.delete_task(task).await
    }

    /// Pull the cloud copy and bring reminders in line with it. A local
    /// trigger is cancelled when the remote copy finished the task or moved
    /// or dropped its reminder.
    pub async fn sync_from_cloud(&self) -> RepoResult<usize> {
        let merged = self.repository.pull_from_cloud().await?;

        for MergedTask { previous, task } in &merged {
            if let Some(previous) = previous
                && (task.state.is_finished() || task.reminder_time != previous.reminder_time)
            {
                self.cancel(previous);
            }
            self.schedule(task);
        }
        Ok(merged.len())
    }

    /// Schedule every active task with a future reminder. Returns how many
    /// were scheduled.
    pub async fn reschedule_all(&self) -> RepoResult<usize> {
        if !self.notifications_enabled {
            return Ok(0);
        }

        let now = now_millis();
        let due: Vec<Task> = self
            .repository
            .tasks(TaskFilter::Pending)
            .await?
            .into_iter()
            .filter(|task| task.pending_reminder(now).is_some())
            .collect();

        for task in &due {
            self.scheduler.schedule(task);
        }
        Ok(due.len())
    }
}
