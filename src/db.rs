//! Local task store backed by SQLite

use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;

use crate::error::{StoreError, StoreResult};
use crate::models::{Task, TaskId, TaskState};

const TASK_COLUMNS: &str = r#"id, "task-title", "task-description", "task-date", "task-address",
    "task-priority", "task-deadline", "task-deleted", "task-deletion-date", "task-completed",
    "task-completion-date", "task-label", "task-reminder-time", "task-reminder-text""#;

/// Named views over the task table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskFilter {
    All,
    Pending,
    Completed,
    Deleted,
    /// Completed or deleted
    Finished,
    WithReminders,
    Label(String),
}

impl TaskFilter {
    fn where_clause(&self) -> &'static str {
        match self {
            Self::All => "1 = 1",
            Self::Pending => r#""task-deleted" = 0 AND "task-completed" = 0"#,
            Self::Completed => r#""task-deleted" = 0 AND "task-completed" = 1"#,
            Self::Deleted => r#""task-deleted" = 1"#,
            Self::Finished => r#"("task-deleted" = 1 OR "task-completed" = 1)"#,
            Self::WithReminders => r#""task-reminder-time" IS NOT NULL AND "task-deleted" = 0"#,
            Self::Label(_) => r#""task-label" = ?1 AND "task-deleted" = 0"#,
        }
    }

    /// Whether a task belongs to this view.
    pub fn matches(&self, task: &Task) -> bool {
        match self {
            Self::All => true,
            Self::Pending => task.state == TaskState::Active,
            Self::Completed => task.is_completed(),
            Self::Deleted => task.is_deleted(),
            Self::Finished => task.state.is_finished(),
            Self::WithReminders => task.reminder_time.is_some() && !task.is_deleted(),
            Self::Label(label) => task.label == *label && !task.is_deleted(),
        }
    }
}

/// Thread-safe local store with change notification
pub struct LocalStore {
    conn: Mutex<Connection>,
    changes: watch::Sender<u64>,
}

impl LocalStore {
    /// Open or create the database
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        let (changes, _) = watch::channel(0);
        let store = Self {
            conn: Mutex::new(conn),
            changes,
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS "task-table" (
                id INTEGER PRIMARY KEY,
                "task-title" TEXT NOT NULL DEFAULT '',
                "task-description" TEXT NOT NULL DEFAULT '',
                "task-date" TEXT NOT NULL DEFAULT '',
                "task-address" TEXT NOT NULL DEFAULT '',
                "task-priority" TEXT NOT NULL DEFAULT '',
                "task-deadline" TEXT NOT NULL DEFAULT '',
                "task-deleted" INTEGER NOT NULL DEFAULT 0,
                "task-deletion-date" INTEGER,
                "task-completed" INTEGER NOT NULL DEFAULT 0,
                "task-completion-date" INTEGER,
                "task-label" TEXT NOT NULL DEFAULT '',
                "task-reminder-time" INTEGER,
                "task-reminder-text" TEXT
            );

            CREATE INDEX IF NOT EXISTS "idx-task-label" ON "task-table"("task-label");
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn notify(&self) {
        self.changes.send_modify(|version| *version = version.wrapping_add(1));
    }

    /// Receiver that ticks after every mutation
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Insert a new task. An existing id is a constraint violation.
    pub fn insert(&self, task: &Task) -> StoreResult<()> {
        self.write_row("INSERT INTO", task)?;
        self.notify();
        Ok(())
    }

    /// Insert or replace by id
    pub fn upsert(&self, task: &Task) -> StoreResult<()> {
        self.write_row("INSERT OR REPLACE INTO", task)?;
        self.notify();
        Ok(())
    }

    fn write_row(&self, verb: &str, task: &Task) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            &format!(
                r#"{verb} "task-table" ({TASK_COLUMNS})
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"#
            ),
            params![
                sql_id(task.id)?,
                &task.title,
                &task.description,
                &task.date,
                &task.address,
                &task.priority,
                &task.deadline,
                task.is_deleted(),
                task.deletion_date,
                task.is_completed(),
                task.completion_date,
                &task.label,
                task.reminder_time,
                &task.reminder_text,
            ],
        )?;
        Ok(())
    }

    /// Overwrite every column of an existing task. Returns `false` when the
    /// id is unknown.
    pub fn update(&self, task: &Task) -> StoreResult<bool> {
        let changed = {
            let conn = self.conn()?;
            conn.execute(
                r#"UPDATE "task-table" SET "task-title" = ?2, "task-description" = ?3,
                   "task-date" = ?4, "task-address" = ?5, "task-priority" = ?6,
                   "task-deadline" = ?7, "task-deleted" = ?8, "task-deletion-date" = ?9,
                   "task-completed" = ?10, "task-completion-date" = ?11, "task-label" = ?12,
                   "task-reminder-time" = ?13, "task-reminder-text" = ?14
                   WHERE id = ?1"#,
                params![
                    sql_id(task.id)?,
                    &task.title,
                    &task.description,
                    &task.date,
                    &task.address,
                    &task.priority,
                    &task.deadline,
                    task.is_deleted(),
                    task.deletion_date,
                    task.is_completed(),
                    task.completion_date,
                    &task.label,
                    task.reminder_time,
                    &task.reminder_text,
                ],
            )?
        };

        if changed > 0 {
            self.notify();
        }
        Ok(changed > 0)
    }

    /// Write only the lifecycle flag pairs of a task.
    pub fn write_state(&self, task: &Task) -> StoreResult<bool> {
        let changed = {
            let conn = self.conn()?;
            conn.execute(
                r#"UPDATE "task-table" SET "task-deleted" = ?2, "task-deletion-date" = ?3,
                   "task-completed" = ?4, "task-completion-date" = ?5
                   WHERE id = ?1"#,
                params![
                    sql_id(task.id)?,
                    task.is_deleted(),
                    task.deletion_date,
                    task.is_completed(),
                    task.completion_date,
                ],
            )?
        };

        if changed > 0 {
            self.notify();
        }
        Ok(changed > 0)
    }

    /// Remove a task permanently
    pub fn delete(&self, id: TaskId) -> StoreResult<bool> {
        let changed = {
            let conn = self.conn()?;
            conn.execute(r#"DELETE FROM "task-table" WHERE id = ?1"#, params![sql_id(id)?])?
        };

        if changed > 0 {
            self.notify();
        }
        Ok(changed > 0)
    }

    /// Wipe the table. Returns the number of removed rows.
    pub fn clear(&self) -> StoreResult<usize> {
        let removed = {
            let conn = self.conn()?;
            conn.execute(r#"DELETE FROM "task-table""#, [])?
        };
        self.notify();
        Ok(removed)
    }

    pub fn get(&self, id: TaskId) -> StoreResult<Option<Task>> {
        let conn = self.conn()?;
        let task = conn
            .query_row(
                &format!(r#"SELECT {TASK_COLUMNS} FROM "task-table" WHERE id = ?1"#),
                params![sql_id(id)?],
                task_from_row,
            )
            .optional()?;
        Ok(task)
    }

    pub fn list(&self, filter: &TaskFilter) -> StoreResult<Vec<Task>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"SELECT {TASK_COLUMNS} FROM "task-table" WHERE {} ORDER BY id"#,
            filter.where_clause()
        ))?;

        let rows = match filter {
            TaskFilter::Label(label) => stmt.query_map(params![label], task_from_row)?,
            _ => stmt.query_map([], task_from_row)?,
        };

        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Distinct non-empty labels of tasks that are not deleted, sorted
    pub fn labels(&self) -> StoreResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT DISTINCT "task-label" FROM "task-table"
               WHERE "task-label" != '' AND "task-deleted" = 0
               ORDER BY "task-label""#,
        )?;
        let labels = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(labels)
    }
}

fn sql_id(id: TaskId) -> StoreResult<i64> {
    i64::try_from(id).map_err(|_| StoreError::InvalidData(format!("task id {id} exceeds 63 bits")))
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let raw_id: i64 = row.get(0)?;
    let id = TaskId::try_from(raw_id)
        .map_err(|_| rusqlite::Error::IntegralValueOutOfRange(0, raw_id))?;

    Ok(Task {
        id,
        title: row.get(1)?,
        description: row.get(2)?,
        date: row.get(3)?,
        address: row.get(4)?,
        priority: row.get(5)?,
        deadline: row.get(6)?,
        state: TaskState::from_flags(row.get(7)?, row.get(9)?),
        deletion_date: row.get(8)?,
        completion_date: row.get(10)?,
        label: row.get(11)?,
        reminder_time: row.get(12)?,
        reminder_text: row.get(13)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Transition;

    fn task(id: TaskId, title: &str) -> Task {
        Task {
            id,
            ..Task::new(title)
        }
    }

    #[test]
    fn insert_and_get_roundtrip() {
        let store = LocalStore::open_in_memory().unwrap();
        let task = Task {
            id: 77,
            title: "Pay rent".into(),
            description: "Transfer before the 5th".into(),
            date: "2026-11-01".into(),
            address: "12 Elm St".into(),
            priority: "high".into(),
            deadline: "2026-11-05".into(),
            label: "home".into(),
            reminder_time: Some(1_800_000_000_000),
            reminder_text: Some("rent!".into()),
            ..Task::default()
        };

        store.insert(&task).unwrap();
        assert_eq!(store.get(77).unwrap(), Some(task));
    }

    #[test]
    fn duplicate_insert_is_an_error() {
        let store = LocalStore::open_in_memory().unwrap();
        store.insert(&task(1, "a")).unwrap();

        let err = store.insert(&task(1, "b")).unwrap_err();
        assert!(matches!(err, StoreError::Sqlite(_)));
    }

    #[test]
    fn filters_follow_lifecycle_state() {
        let store = LocalStore::open_in_memory().unwrap();

        let active = task(1, "active");
        let mut completed = task(2, "completed");
        completed.apply(Transition::Complete, 10).unwrap();
        let mut deleted = task(3, "deleted");
        deleted.apply(Transition::SoftDelete, 10).unwrap();

        for t in [&active, &completed, &deleted] {
            store.insert(t).unwrap();
        }

        let ids = |filter: TaskFilter| -> Vec<TaskId> {
            store.list(&filter).unwrap().iter().map(|t| t.id).collect()
        };

        assert_eq!(ids(TaskFilter::All), vec![1, 2, 3]);
        assert_eq!(ids(TaskFilter::Pending), vec![1]);
        assert_eq!(ids(TaskFilter::Completed), vec![2]);
        assert_eq!(ids(TaskFilter::Deleted), vec![3]);
        assert_eq!(ids(TaskFilter::Finished), vec![2, 3]);
    }

    #[test]
    fn filter_matches_agrees_with_sql() {
        let store = LocalStore::open_in_memory().unwrap();
        let mut tasks = Vec::new();
        for (id, label) in [(1, "work"), (2, "home"), (3, "work")] {
            let mut t = task(id, "t");
            t.label = label.into();
            t.reminder_time = (id != 2).then_some(5);
            tasks.push(t);
        }
        tasks[2].apply(Transition::SoftDelete, 1).unwrap();
        for t in &tasks {
            store.insert(t).unwrap();
        }

        for filter in [
            TaskFilter::WithReminders,
            TaskFilter::Label("work".into()),
            TaskFilter::Finished,
        ] {
            let from_sql: Vec<_> = store.list(&filter).unwrap();
            let from_memory: Vec<_> = tasks.iter().filter(|t| filter.matches(t)).cloned().collect();
            assert_eq!(from_sql, from_memory, "{filter:?}");
        }
    }

    #[test]
    fn labels_are_distinct_and_sorted() {
        let store = LocalStore::open_in_memory().unwrap();
        for (id, label) in [(1, "work"), (2, ""), (3, "errands"), (4, "work")] {
            let mut t = task(id, "t");
            t.label = label.into();
            store.insert(&t).unwrap();
        }

        assert_eq!(store.labels().unwrap(), vec!["errands", "work"]);
    }

    #[test]
    fn write_state_touches_only_flags() {
        let store = LocalStore::open_in_memory().unwrap();
        let mut t = task(5, "original");
        store.insert(&t).unwrap();

        t.title = "not persisted".into();
        t.apply(Transition::Complete, 99).unwrap();
        assert!(store.write_state(&t).unwrap());

        let stored = store.get(5).unwrap().unwrap();
        assert_eq!(stored.title, "original");
        assert_eq!(stored.state, TaskState::Completed);
        assert_eq!(stored.completion_date, Some(99));
    }

    #[test]
    fn update_unknown_id_reports_false() {
        let store = LocalStore::open_in_memory().unwrap();
        assert!(!store.update(&task(9, "ghost")).unwrap());
    }

    #[test]
    fn mutations_bump_change_counter() {
        let store = LocalStore::open_in_memory().unwrap();
        let rx = store.subscribe();
        let start = *rx.borrow();

        store.insert(&task(1, "a")).unwrap();
        store.upsert(&task(1, "b")).unwrap();
        store.delete(1).unwrap();

        assert_eq!(*rx.borrow(), start + 3);
    }

    #[test]
    fn open_creates_parent_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("tasks.sqlite");

        let store = LocalStore::open(&path).unwrap();
        store.insert(&task(3, "persisted")).unwrap();
        drop(store);

        let reopened = LocalStore::open(&path).unwrap();
        assert_eq!(reopened.get(3).unwrap().unwrap().title, "persisted");
    }
}
