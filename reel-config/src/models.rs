use std::path::PathBuf;

use reel_core::scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};

/// Default SQLite database, relative to the working directory.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://reel-queue.db";

/// Where the effective configuration came from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigSource {
    #[default]
    Default,
    /// Path passed explicitly, e.g. `--config`.
    Explicit(PathBuf),
    /// `$REEL_CONFIG_PATH`.
    EnvPath(PathBuf),
    /// `$REEL_CONFIG_JSON`.
    EnvInline,
    /// First default file found.
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfigMetadata {
    pub source: ConfigSource,
    pub env_file_loaded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `sqlite://` URL of the job store.
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_owned(),
            max_connections: 5,
        }
    }
}

/// Effective configuration of a reel process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub database: DatabaseConfig,
    #[serde(skip)]
    pub metadata: ConfigMetadata,
}
