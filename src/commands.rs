//! Client-side command handlers

use anyhow::{Context, Result, bail};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use taskmate::cloud::{HttpAuthBackend, HttpDocumentStore, MemoryDocumentStore};
use taskmate::config::Config;
use taskmate::models::{Task, TaskId, now_millis};
use taskmate::{
    AccountService, DocumentStore, LocalStore, Reminder, Session, TaskCloudService,
    TaskRepository, TaskService, TokioReminderScheduler,
};

use crate::{Commands, TaskFields};

/// Everything a client command needs, wired once per process
pub struct App {
    service: TaskService,
    accounts: Option<AccountService>,
    reminders: mpsc::UnboundedReceiver<Reminder>,
}

impl App {
    pub fn open(config: &Config) -> Result<Self> {
        let store = Arc::new(
            LocalStore::open(&config.client.local_db).context("Failed to open local task store")?,
        );
        // Local-only mode never signs in.
        let session = match config.client.cloud_url {
            Some(_) => Session::load(&config.client.session_file),
            None => Session::new(),
        };

        let documents: Arc<dyn DocumentStore> = match &config.client.cloud_url {
            Some(url) => Arc::new(HttpDocumentStore::new(url, session.clone())),
            None => Arc::new(MemoryDocumentStore::new()),
        };

        let cloud = TaskCloudService::new(documents, session);
        let accounts = config
            .client
            .cloud_url
            .as_deref()
            .map(|url| AccountService::new(Arc::new(HttpAuthBackend::new(url)), cloud.clone()));

        let repository = Arc::new(TaskRepository::new(store, cloud));
        let (scheduler, reminders) = TokioReminderScheduler::new();
        let service = TaskService::new(
            repository,
            Arc::new(scheduler),
            config.settings.notifications_enabled,
        );

        Ok(Self {
            service,
            accounts,
            reminders,
        })
    }

    fn accounts(&self) -> Result<&AccountService> {
        self.accounts
            .as_ref()
            .context("No cloud_url configured; add one under [client] in the config")
    }

    async fn require(&self, id: TaskId) -> Result<Task> {
        self.service
            .repository()
            .task(id)
            .await?
            .with_context(|| format!("No task with id {id}"))
    }
}

fn apply_fields(task: &mut Task, fields: TaskFields) -> Result<()> {
    let TaskFields {
        description,
        label,
        priority,
        date,
        deadline,
        address,
        remind_in,
        remind_text,
    } = fields;

    if let Some(v) = description {
        task.description = v;
    }
    if let Some(v) = label {
        task.label = v;
    }
    if let Some(v) = priority {
        task.priority = v;
    }
    if let Some(v) = date {
        task.date = v;
    }
    if let Some(v) = deadline {
        task.deadline = v;
    }
    if let Some(v) = address {
        task.address = v;
    }
    if let Some(minutes) = remind_in {
        let at = minutes
            .checked_mul(60_000)
            .and_then(|offset| now_millis().checked_add(offset))
            .with_context(|| format!("Reminder {minutes} minutes out is out of range"))?;
        task.reminder_time = Some(at);
    }
    if remind_text.is_some() {
        task.reminder_text = remind_text;
    }
    Ok(())
}

fn format_reminder(at: i64) -> String {
    chrono::DateTime::from_timestamp_millis(at)
        .map(|dt| dt.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| at.to_string())
}

fn print_task(task: &Task) {
    let mark = match task.state {
        taskmate::TaskState::Active => "[ ]",
        taskmate::TaskState::Completed => "[x]",
        taskmate::TaskState::Deleted => "[-]",
    };

    let mut line = format!("{mark} {:>19}  {}", task.id, task.title);
    if !task.label.is_empty() {
        line.push_str(&format!("  #{}", task.label));
    }
    if !task.priority.is_empty() {
        line.push_str(&format!("  !{}", task.priority));
    }
    if let Some(at) = task.reminder_time {
        line.push_str(&format!("  @{}", format_reminder(at)));
    }
    println!("{line}");
}

fn print_details(task: &Task) {
    print_task(task);
    for (name, value) in [
        ("description", &task.description),
        ("date", &task.date),
        ("deadline", &task.deadline),
        ("address", &task.address),
    ] {
        if !value.is_empty() {
            println!("    {name}: {value}");
        }
    }
    if let Some(text) = &task.reminder_text {
        println!("    reminder text: {text}");
    }
    println!("    state: {}", task.state);
}

fn print_list(tasks: &[Task]) {
    if tasks.is_empty() {
        println!("No tasks.");
    }
    for task in tasks {
        print_task(task);
    }
}

pub async fn run(app: App, command: Commands) -> Result<()> {
    let service = app.service.clone();
    let repository = Arc::clone(service.repository());

    match command {
        Commands::Add { title, fields } => {
            let mut task = Task::new(title);
            apply_fields(&mut task, fields)?;
            let task = service.add_task(task).await?;
            println!("Added task {}", task.id);
        }

        Commands::List { view, label } => {
            print_list(&repository.tasks(view.filter(label)).await?);
        }

        Commands::Show { id } => print_details(&app.require(id).await?),

        Commands::Edit {
            id,
            title,
            fields,
            clear_reminder,
        } => {
            let mut task = app.require(id).await?;
            if let Some(title) = title {
                task.title = title;
            }
            apply_fields(&mut task, fields)?;
            if clear_reminder {
                task.reminder_time = None;
                task.reminder_text = None;
            }
            print_task(&service.update_task(task).await?);
        }

        Commands::Complete { id } => print_task(&service.mark_task_completed(id).await?),
        Commands::Reopen { id } => print_task(&service.mark_task_pending(id).await?),
        Commands::Delete { id } => print_task(&service.soft_delete_task(id).await?),
        Commands::Restore { id } => print_task(&service.restore_task(id).await?),

        Commands::Purge { id } => {
            let task = app.require(id).await?;
            service.delete_task(&task).await?;
            println!("Permanently deleted task {id}");
        }

        Commands::Labels => {
            for label in repository.get_all_labels().snapshot().await? {
                println!("{label}");
            }
        }

        Commands::Sync => {
            app.accounts()?;
            if !repository.cloud().session().is_signed_in() {
                bail!("Not signed in; run `taskmate login` first");
            }
            let merged = service.sync_from_cloud().await?;
            println!("Merged {merged} task(s) from the cloud");
        }

        Commands::Watch {
            view,
            label,
            sync_every,
        } => watch(app, view.filter(label), sync_every).await?,

        Commands::Signup {
            email,
            name,
            password,
        } => {
            let profile = app.accounts()?.sign_up(&name, &email, &password).await?;
            println!("Created account {} ({})", profile.email, profile.uid);
        }

        Commands::Login { email, password } => {
            let accounts = app.accounts()?;
            let previous = accounts.current_user().map(|user| user.uid);

            let profile = accounts.login(&email, &password).await?;
            if previous.is_some_and(|uid| uid != profile.uid) {
                repository.clear_local_tasks().await?;
            }

            let merged = service.sync_from_cloud().await?;
            println!("Signed in as {} ({merged} task(s) synced)", profile.email);
        }

        Commands::Logout => {
            app.accounts()?.sign_out();
            let removed = repository.clear_local_tasks().await?;
            println!("Signed out, removed {removed} local task(s)");
        }

        Commands::DeleteAccount { password } => {
            app.accounts()?.delete_account(&password).await?;
            repository.clear_local_tasks().await?;
            println!("Account deleted");
        }

        Commands::Serve { .. } | Commands::Init { .. } => {
            bail!("not a client command")
        }
    }

    Ok(())
}

async fn watch(mut app: App, filter: taskmate::TaskFilter, sync_every: Option<u64>) -> Result<()> {
    let service = app.service.clone();
    let repository = Arc::clone(service.repository());
    let mut live = repository.live(filter);

    let scheduled = service.reschedule_all().await?;
    tracing::info!(scheduled, "Watching tasks");

    let mut ticker = tokio::time::interval(Duration::from_secs(sync_every.unwrap_or(3600).max(1)));
    ticker.tick().await;

    loop {
        tokio::select! {
            tasks = live.next() => {
                println!("--- {} ---", chrono::Local::now().format("%H:%M:%S"));
                print_list(&tasks?);
            }
            Some(reminder) = app.reminders.recv() => {
                let text = reminder.text.unwrap_or_default();
                println!("*** Reminder: {} {text}", reminder.title);
            }
            _ = ticker.tick(), if sync_every.is_some() => {
                if let Err(err) = service.sync_from_cloud().await {
                    tracing::warn!(error = %err, "Periodic sync failed");
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskmate::AuthUser;

    #[test]
    fn remind_in_sets_a_future_reminder() {
        let mut task = Task::new("soon");
        let before = now_millis();
        apply_fields(
            &mut task,
            TaskFields {
                remind_in: Some(15),
                ..TaskFields::default()
            },
        )
        .unwrap();

        let at = task.reminder_time.unwrap();
        assert!(at >= before + 15 * 60_000);
    }

    #[test]
    fn overflowing_remind_in_is_an_error() {
        let mut task = Task::new("never");
        let err = apply_fields(
            &mut task,
            TaskFields {
                remind_in: Some(i64::MAX / 1000),
                ..TaskFields::default()
            },
        )
        .unwrap_err();

        assert!(err.to_string().contains("out of range"));
        assert_eq!(task.reminder_time, None);
    }

    #[test]
    fn local_only_config_ignores_a_saved_session() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.client.local_db = dir.path().join("tasks.sqlite");
        config.client.session_file = dir.path().join("session.json");

        Session::load(&config.client.session_file).open(AuthUser {
            uid: "u1".into(),
            email: "u1@example.com".into(),
            token: "tms_old".into(),
        });

        let app = App::open(&config).unwrap();
        assert!(!app.service.repository().cloud().session().is_signed_in());
        assert!(app.accounts().is_err());
    }
}
