//! Reminder scheduling

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::models::{Task, TaskId, now_millis};

/// A reminder that reached its trigger time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reminder {
    pub task_id: TaskId,
    pub title: String,
    pub text: Option<String>,
}

/// One-shot time triggers keyed by task identity
pub trait ReminderScheduler: Send + Sync {
    /// Register a trigger at `task.reminder_time`, replacing any earlier one
    /// for the same task. No-op without a future reminder time.
    fn schedule(&self, task: &Task);

    /// Drop the trigger registered for this task, if any.
    fn cancel(&self, task: &Task);
}

/// A sleeping trigger; `generation` tells a rescheduled trigger from the
/// one it replaced.
struct Trigger {
    generation: u64,
    handle: JoinHandle<()>,
}

type Pending = Arc<Mutex<HashMap<TaskId, Trigger>>>;

/// Remove the entry for `task_id` only if it still belongs to `generation`.
fn retire(pending: &mut HashMap<TaskId, Trigger>, task_id: TaskId, generation: u64) -> bool {
    if pending
        .get(&task_id)
        .is_some_and(|trigger| trigger.generation == generation)
    {
        pending.remove(&task_id);
        true
    } else {
        false
    }
}

/// Scheduler backed by sleeping tokio tasks
pub struct TokioReminderScheduler {
    pending: Pending,
    generations: AtomicU64,
    fired: mpsc::UnboundedSender<Reminder>,
}

impl TokioReminderScheduler {
    /// Create the scheduler and the receiver fired reminders arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Reminder>) {
        let (fired, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            pending: Arc::default(),
            generations: AtomicU64::new(0),
            fired,
        };
        (scheduler, rx)
    }

    /// Number of triggers waiting to fire
    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl ReminderScheduler for TokioReminderScheduler {
    fn schedule(&self, task: &Task) {
        let Some(at) = task.pending_reminder(now_millis()) else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(task_id = task.id, "No async runtime, reminder not scheduled");
            return;
        };

        let delay = Duration::from_millis(u64::try_from(at - now_millis()).unwrap_or(0));
        let reminder = Reminder {
            task_id: task.id,
            title: task.title.clone(),
            text: task.reminder_text.clone(),
        };
        let pending = Arc::clone(&self.pending);
        let fired = self.fired.clone();
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);

        let mut guard = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let current = retire(
                &mut pending.lock().unwrap_or_else(PoisonError::into_inner),
                reminder.task_id,
                generation,
            );
            // Superseded or cancelled while waking up.
            if !current {
                return;
            }
            tracing::info!(task_id = reminder.task_id, "Reminder fired");
            let _ = fired.send(reminder);
        });

        if let Some(previous) = guard.insert(task.id, Trigger { generation, handle }) {
            previous.handle.abort();
        }
        tracing::debug!(task_id = task.id, at, "Reminder scheduled");
    }

    fn cancel(&self, task: &Task) {
        let removed = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&task.id);

        if let Some(trigger) = removed {
            trigger.handle.abort();
            tracing::debug!(task_id = task.id, "Reminder cancelled");
        }
    }
}

impl Drop for TokioReminderScheduler {
    fn drop(&mut self) {
        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        for trigger in pending.values() {
            trigger.handle.abort();
        }
    }
}
