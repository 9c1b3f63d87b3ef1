//! taskmate - personal task manager with reminders and self-hosted sync
//!
//! Tasks live in a local SQLite store and are written through to a per-user
//! document collection on the cloud server whenever someone is signed in.

pub mod account;
pub mod cloud;
pub mod config;
pub mod db;
pub mod error;
pub mod live;
pub mod models;
pub mod reminder;
pub mod repository;
pub mod server;
pub mod service;
pub mod session;

pub use account::{AccountService, AuthBackend};
pub use cloud::{DocumentStore, TaskCloudService};
pub use db::{LocalStore, TaskFilter};
pub use error::{AuthError, CloudError, RepoError, StoreError};
pub use live::LiveQuery;
pub use models::{Task, TaskId, TaskState, Transition, UserProfile};
pub use reminder::{Reminder, ReminderScheduler, TokioReminderScheduler};
pub use repository::{MergedTask, TaskRepository};
pub use service::TaskService;
pub use session::{AuthUser, Session};
