//! taskmate - personal task manager with reminders and self-hosted sync
//!
//! One binary for both sides: the task client (`add`, `list`, `watch`, ...)
//! and the cloud server (`serve`).

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

mod commands;

use taskmate::TaskFilter;
use taskmate::config::Config;
use taskmate::models::TaskId;

#[derive(Parser)]
#[command(name = "taskmate")]
#[command(about = "Personal task manager with reminders and self-hosted sync")]
#[command(version)]
struct Cli {
    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Named task views
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum View {
    All,
    Pending,
    Completed,
    Deleted,
    Finished,
    Reminders,
}

impl View {
    pub fn filter(self, label: Option<String>) -> TaskFilter {
        if let Some(label) = label {
            return TaskFilter::Label(label);
        }
        match self {
            Self::All => TaskFilter::All,
            Self::Pending => TaskFilter::Pending,
            Self::Completed => TaskFilter::Completed,
            Self::Deleted => TaskFilter::Deleted,
            Self::Finished => TaskFilter::Finished,
            Self::Reminders => TaskFilter::WithReminders,
        }
    }
}

/// Editable task fields
#[derive(Debug, Default, Args)]
pub struct TaskFields {
    /// Longer description
    #[arg(short, long)]
    pub description: Option<String>,

    /// Label used for grouping
    #[arg(short, long)]
    pub label: Option<String>,

    /// Priority indicator (free text, e.g. low/high)
    #[arg(short, long)]
    pub priority: Option<String>,

    /// Date the task is planned for
    #[arg(long)]
    pub date: Option<String>,

    /// Deadline
    #[arg(long)]
    pub deadline: Option<String>,

    /// Location
    #[arg(long)]
    pub address: Option<String>,

    /// Remind me in this many minutes
    #[arg(long, value_name = "MINUTES")]
    pub remind_in: Option<i64>,

    /// Text shown when the reminder fires
    #[arg(long)]
    pub remind_text: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the cloud server
    Serve {
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Bind address (overrides config)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Initialize a new config file
    Init {
        /// Output path for config file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Add a task
    Add {
        title: String,

        #[command(flatten)]
        fields: TaskFields,
    },

    /// List tasks
    List {
        #[arg(value_enum, default_value = "pending")]
        view: View,

        /// Only tasks with this label
        #[arg(long)]
        label: Option<String>,
    },

    /// Show one task
    Show { id: TaskId },

    /// Edit a task
    Edit {
        id: TaskId,

        /// New title
        #[arg(short, long)]
        title: Option<String>,

        #[command(flatten)]
        fields: TaskFields,

        /// Remove the reminder
        #[arg(long, conflicts_with = "remind_in")]
        clear_reminder: bool,
    },

    /// Mark a task completed
    Complete { id: TaskId },

    /// Mark a completed task pending again
    Reopen { id: TaskId },

    /// Move a task to the trash
    Delete { id: TaskId },

    /// Restore a task from the trash
    Restore { id: TaskId },

    /// Permanently delete a task, locally and in the cloud
    Purge { id: TaskId },

    /// List labels in use
    Labels,

    /// Merge the cloud copy into the local store
    Sync,

    /// Follow a view live and print reminders as they fire
    Watch {
        #[arg(value_enum, default_value = "pending")]
        view: View,

        /// Only tasks with this label
        #[arg(long)]
        label: Option<String>,

        /// Pull from the cloud every N seconds
        #[arg(long, value_name = "SECONDS")]
        sync_every: Option<u64>,
    },

    /// Create a cloud account
    Signup {
        email: String,

        /// Display name
        #[arg(short, long, default_value = "")]
        name: String,

        #[arg(long, env = "TASKMATE_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Sign in to the cloud
    Login {
        email: String,

        #[arg(long, env = "TASKMATE_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Sign out and clear local tasks
    Logout,

    /// Delete the cloud account and all of its tasks
    DeleteAccount {
        #[arg(long, env = "TASKMATE_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("taskmate=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let cfg = if let Some(path) = &cli.config {
        Config::load_from(path)?
    } else {
        Config::load()?
    };

    match cli.command {
        Commands::Serve { port, bind } => {
            let mut cfg = cfg;

            // Override with CLI args
            if let Some(p) = port {
                cfg.server.port = p;
            }
            if let Some(b) = bind {
                cfg.server.bind = b;
            }

            taskmate::server::run_server(cfg).await
        }

        Commands::Init { output } => {
            let path = output.unwrap_or_else(|| PathBuf::from("config.toml"));
            Config::default().save_to(&path)?;

            println!("Created config file: {}", path.display());
            println!();
            println!("Next steps:");
            println!("  1. Start a server: taskmate serve --config {}", path.display());
            println!("  2. Set [client] cloud_url in the config");
            println!("  3. Create an account: taskmate signup you@example.com");

            Ok(())
        }

        command => {
            let app = commands::App::open(&cfg)?;
            commands::run(app, command).await
        }
    }
}
