//! Task entity, lifecycle state machine and the wire types shared by the
//! client and the cloud server.
//!
//! Storage keeps the historical pair of flags (`deleted`, `completed`);
//! in memory a task carries exactly one [`TaskState`].

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Identity of a task. `0` means "not assigned yet".
pub type TaskId = u64;

/// Largest id that still fits a signed 64-bit SQLite integer.
pub const MAX_TASK_ID: TaskId = (1 << 63) - 1;

/// Generate a random 63-bit task id (never zero).
pub fn generate_task_id() -> TaskId {
    rand::rng().random_range(1..=MAX_TASK_ID)
}

/// Current time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Logical lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    #[default]
    Active,
    Completed,
    Deleted,
}

impl TaskState {
    /// Decode the stored flag pair. Deletion wins when both are set.
    pub fn from_flags(is_deleted: bool, is_completed: bool) -> Self {
        if is_deleted {
            Self::Deleted
        } else if is_completed {
            Self::Completed
        } else {
            Self::Active
        }
    }

    pub fn is_deleted(self) -> bool {
        self == Self::Deleted
    }

    pub fn is_completed(self) -> bool {
        self == Self::Completed
    }

    /// Completed or deleted.
    pub fn is_finished(self) -> bool {
        self != Self::Active
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Deleted => "deleted",
        };
        f.write_str(name)
    }
}

/// A lifecycle move requested by a caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Complete,
    MarkPending,
    SoftDelete,
    Restore,
}

impl Transition {
    /// Resolve the target state, `None` when the task is already there.
    fn target(self, from: TaskState) -> Result<Option<TaskState>, TransitionError> {
        use TaskState::{Active, Completed, Deleted};

        let to = match (self, from) {
            (Self::Complete, Active) => Completed,
            (Self::MarkPending, Completed) | (Self::Restore, Deleted) => Active,
            (Self::SoftDelete, Active | Completed) => Deleted,
            (Self::Complete, Completed)
            | (Self::MarkPending, Active)
            | (Self::SoftDelete, Deleted)
            | (Self::Restore, Active) => return Ok(None),
            (transition, from) => return Err(TransitionError { transition, from }),
        };
        Ok(Some(to))
    }
}

/// Rejected lifecycle move
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot {transition:?} a {from} task")]
pub struct TransitionError {
    pub transition: Transition,
    pub from: TaskState,
}

/// A task/todo item
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub date: String,
    pub address: String,
    pub priority: String,
    pub deadline: String,
    pub label: String,
    pub state: TaskState,
    pub deletion_date: Option<i64>,
    pub completion_date: Option<i64>,
    pub reminder_time: Option<i64>,
    pub reminder_text: Option<String>,
}

impl Task {
    /// New active task with an unassigned id.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.state.is_deleted()
    }

    pub fn is_completed(&self) -> bool {
        self.state.is_completed()
    }

    /// Reminder time if it lies strictly after `now`.
    pub fn pending_reminder(&self, now: i64) -> Option<i64> {
        self.reminder_time.filter(|at| *at > now)
    }

    /// Make the date columns agree with `state`: the date of the current
    /// state is filled in when missing, dates of states the task is not in
    /// are cleared. A deleted task keeps its completion date.
    pub fn align_dates(&mut self, now: i64) {
        match self.state {
            TaskState::Active => {
                self.completion_date = None;
                self.deletion_date = None;
            }
            TaskState::Completed => {
                self.completion_date.get_or_insert(now);
                self.deletion_date = None;
            }
            TaskState::Deleted => {
                self.deletion_date.get_or_insert(now);
            }
        }
    }

    /// Apply a lifecycle move. Returns `false` when the task was already in
    /// the target state.
    pub fn apply(&mut self, transition: Transition, now: i64) -> Result<bool, TransitionError> {
        let Some(to) = transition.target(self.state)? else {
            return Ok(false);
        };

        match transition {
            Transition::Complete => self.completion_date = Some(now),
            Transition::MarkPending => self.completion_date = None,
            Transition::SoftDelete => self.deletion_date = Some(now),
            Transition::Restore => self.deletion_date = None,
        }
        self.state = to;
        Ok(true)
    }
}

/// Remote representation of a task (`users/{uid}/tasks/{id}`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskDocument {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub date: String,
    pub address: String,
    pub priority: String,
    pub deadline: String,
    pub is_deleted: bool,
    pub deletion_date: Option<i64>,
    pub is_completed: bool,
    pub completion_date: Option<i64>,
    pub label: String,
    pub reminder_time: Option<i64>,
    pub reminder_text: Option<String>,
}

impl From<&Task> for TaskDocument {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id,
            title: task.title.clone(),
            description: task.description.clone(),
            date: task.date.clone(),
            address: task.address.clone(),
            priority: task.priority.clone(),
            deadline: task.deadline.clone(),
            is_deleted: task.is_deleted(),
            deletion_date: task.deletion_date,
            is_completed: task.is_completed(),
            completion_date: task.completion_date,
            label: task.label.clone(),
            reminder_time: task.reminder_time,
            reminder_text: task.reminder_text.clone(),
        }
    }
}

impl From<TaskDocument> for Task {
    fn from(doc: TaskDocument) -> Self {
        Self {
            id: doc.id,
            title: doc.title,
            description: doc.description,
            date: doc.date,
            address: doc.address,
            priority: doc.priority,
            deadline: doc.deadline,
            label: doc.label,
            state: TaskState::from_flags(doc.is_deleted, doc.is_completed),
            deletion_date: doc.deletion_date,
            completion_date: doc.completion_date,
            reminder_time: doc.reminder_time,
            reminder_text: doc.reminder_text,
        }
    }
}

/// Account profile stored at `users/{uid}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub uid: String,
    pub name: String,
    pub email: String,
    pub created_at: i64,
}

/// Sign-up and login request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// Re-authentication request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReauthRequest {
    pub password: String,
}

/// Batched document deletion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchDeleteRequest {
    pub paths: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_nonzero_and_fit_sqlite() {
        for _ in 0..1000 {
            let id = generate_task_id();
            assert!(id > 0);
            assert!(i64::try_from(id).is_ok());
        }
    }

    #[test]
    fn complete_then_mark_pending() {
        let mut task = Task::new("Water plants");

        assert!(task.apply(Transition::Complete, 10).unwrap());
        assert_eq!(task.state, TaskState::Completed);
        assert_eq!(task.completion_date, Some(10));

        assert!(task.apply(Transition::MarkPending, 20).unwrap());
        assert_eq!(task.state, TaskState::Active);
        assert_eq!(task.completion_date, None);
    }

    #[test]
    fn repeated_moves_are_no_ops() {
        let mut task = Task::new("Call mum");
        task.apply(Transition::SoftDelete, 5).unwrap();

        assert!(!task.apply(Transition::SoftDelete, 9).unwrap());
        assert_eq!(task.deletion_date, Some(5));
    }

    #[test]
    fn deleted_task_cannot_be_completed() {
        let mut task = Task::new("Old errand");
        task.apply(Transition::SoftDelete, 1).unwrap();

        let err = task.apply(Transition::Complete, 2).unwrap_err();
        assert_eq!(err.from, TaskState::Deleted);
        assert_eq!(err.transition, Transition::Complete);

        assert!(task.apply(Transition::MarkPending, 2).is_err());
    }

    #[test]
    fn restore_only_applies_to_deleted_tasks() {
        let mut task = Task::new("Finished report");
        task.apply(Transition::Complete, 1).unwrap();
        assert!(task.apply(Transition::Restore, 2).is_err());

        task.apply(Transition::SoftDelete, 3).unwrap();
        assert!(task.apply(Transition::Restore, 4).unwrap());
        assert_eq!(task.state, TaskState::Active);
        assert_eq!(task.deletion_date, None);
    }

    #[test]
    fn aligned_dates_follow_the_state() {
        let mut task = Task {
            state: TaskState::Completed,
            deletion_date: Some(3),
            ..Task::new("Edited by hand")
        };
        task.align_dates(50);
        assert_eq!(task.completion_date, Some(50));
        assert_eq!(task.deletion_date, None);

        task.align_dates(60);
        assert_eq!(task.completion_date, Some(50));

        task.state = TaskState::Deleted;
        task.align_dates(70);
        assert_eq!(task.deletion_date, Some(70));
        assert_eq!(task.completion_date, Some(50));

        task.state = TaskState::Active;
        task.align_dates(80);
        assert_eq!((task.completion_date, task.deletion_date), (None, None));
    }

    #[test]
    fn both_flags_decode_as_deleted() {
        assert_eq!(TaskState::from_flags(true, true), TaskState::Deleted);
        assert_eq!(TaskState::from_flags(false, true), TaskState::Completed);
        assert_eq!(TaskState::from_flags(false, false), TaskState::Active);
    }

    #[test]
    fn document_uses_camel_case_flags() {
        let mut task = Task::new("Pay rent");
        task.id = 42;
        task.reminder_time = Some(1_700_000_000_000);
        task.apply(Transition::Complete, 7).unwrap();

        let value = serde_json::to_value(TaskDocument::from(&task)).unwrap();
        assert_eq!(value["isCompleted"], true);
        assert_eq!(value["isDeleted"], false);
        assert_eq!(value["reminderTime"], 1_700_000_000_000_i64);
        assert_eq!(value["completionDate"], 7);

        let doc: TaskDocument = serde_json::from_value(value).unwrap();
        assert_eq!(Task::from(doc), task);
    }

    #[test]
    fn pending_reminder_ignores_past_times() {
        let mut task = Task::new("Stand-up");
        task.reminder_time = Some(100);
        assert_eq!(task.pending_reminder(50), Some(100));
        assert_eq!(task.pending_reminder(100), None);
    }
}
