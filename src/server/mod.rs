//! Self-hosted cloud backend: per-user document collections and accounts.

pub mod api;
pub mod db;

pub use api::{AppState, create_router};
pub use db::ServerDb;

use anyhow::{Context, Result};

use crate::config::Config;

/// Open the server database and serve the API until the process exits.
pub async fn run_server(config: Config) -> Result<()> {
    let db = ServerDb::open(&config.database.path).context("Failed to open database")?;

    let state = AppState::new(db);
    let app = create_router(state);

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("taskmate cloud server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
