//! Configuration for the taskmate client and cloud server

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub settings: Settings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the server's SQLite database file
    #[serde(default = "default_server_db_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Local task database
    #[serde(default = "default_local_db")]
    pub local_db: PathBuf,

    /// Cloud server URL. Without it the client works local-only.
    #[serde(default)]
    pub cloud_url: Option<String>,

    /// Where the signed-in session is kept
    #[serde(default = "default_session_file")]
    pub session_file: PathBuf,
}

/// User preferences that affect the task core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Gates reminder scheduling
    #[serde(default = "default_true")]
    pub notifications_enabled: bool,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3030
}

fn default_true() -> bool {
    true
}

fn default_server_db_path() -> PathBuf {
    PathBuf::from("taskmate-server.sqlite")
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("taskmate"))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_local_db() -> PathBuf {
    data_dir().join("tasks.sqlite")
}

fn default_session_file() -> PathBuf {
    data_dir().join("session.json")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_server_db_path(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            local_db: default_local_db(),
            cloud_url: None,
            session_file: default_session_file(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            notifications_enabled: true,
        }
    }
}

impl Config {
    /// Where to look for a config file, most specific first: the
    /// `TASKMATE_CONFIG` variable, `./config.toml`, then the user config dir.
    fn candidates() -> Vec<PathBuf> {
        let mut paths = Vec::with_capacity(3);
        if let Some(explicit) = std::env::var_os("TASKMATE_CONFIG") {
            paths.push(PathBuf::from(explicit));
        }
        paths.push(PathBuf::from("config.toml"));
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("taskmate").join("config.toml"));
        }
        paths
    }

    /// The config file `load` reads: an explicit `TASKMATE_CONFIG` always
    /// wins, otherwise the first candidate that exists.
    pub fn default_path() -> Result<PathBuf> {
        if let Some(explicit) = std::env::var_os("TASKMATE_CONFIG") {
            return Ok(PathBuf::from(explicit));
        }

        let candidates = Self::candidates();
        candidates
            .iter()
            .find(|path| path.exists())
            .or_else(|| candidates.last())
            .cloned()
            .context("Could not determine config directory")
    }

    /// Load from [`Config::default_path`], falling back to defaults when no
    /// file exists yet.
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        match path.try_exists() {
            Ok(true) => Self::load_from(&path),
            _ => {
                tracing::debug!(path = %path.display(), "No config file, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Write the config as TOML behind a short header.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        let body = toml::to_string_pretty(self).context("Failed to serialize config")?;
        let document = format!("{CONFIG_HEADER}\n{body}");

        std::fs::write(path, document)
            .with_context(|| format!("Failed to write config file {}", path.display()))
    }
}

const CONFIG_HEADER: &str = "# taskmate configuration
# [client] cloud_url enables sync; leave it out to stay local-only.
";
