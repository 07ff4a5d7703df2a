use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use tracing::{debug, info, warn};

use crate::models::{Config, ConfigMetadata, ConfigSource};
use crate::validation::{ConfigWarnings, validate};

pub const CONFIG_PATH_VAR: &str = "REEL_CONFIG_PATH";
pub const CONFIG_JSON_VAR: &str = "REEL_CONFIG_JSON";
pub const DATABASE_URL_VAR: &str = "REEL_DATABASE_URL";
pub const THREAD_POOL_SIZE_VAR: &str = "REEL_THREAD_POOL_SIZE";

/// Files probed, in order, relative to the base directory.
pub const DEFAULT_CONFIG_FILES: [&str; 4] = [
    "reel.toml",
    "reel.json",
    "config/reel.toml",
    "config/reel.json",
];

/// Effective configuration plus the warnings collected while loading it.
#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

enum EnvLookup {
    Process,
    Fixed(HashMap<String, String>),
}

impl EnvLookup {
    fn get(&self, key: &str) -> Option<String> {
        let value = match self {
            Self::Process => std::env::var(key).ok(),
            Self::Fixed(vars) => vars.get(key).cloned(),
        };
        value.filter(|value| !value.trim().is_empty())
    }
}

/// Resolves the configuration from, in order: an explicit path,
/// `$REEL_CONFIG_PATH`, `$REEL_CONFIG_JSON`, the default files and the
/// built-in defaults. Environment overrides are applied on top.
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    env_file: Option<PathBuf>,
    load_env_file: bool,
    base_dir: PathBuf,
    database_url: Option<String>,
    env: EnvLookup,
}

impl fmt::Debug for ConfigLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigLoader")
            .field("config_path", &self.config_path)
            .field("env_file", &self.env_file)
            .field("load_env_file", &self.load_env_file)
            .field("base_dir", &self.base_dir)
            .field("database_url", &self.database_url)
            .finish_non_exhaustive()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            config_path: None,
            env_file: None,
            load_env_file: true,
            base_dir: PathBuf::from("."),
            database_url: None,
            env: EnvLookup::Process,
        }
    }

    /// Takes precedence over every other source.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Load this file instead of the nearest `.env`.
    pub fn with_env_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.env_file = Some(path.into());
        self
    }

    pub fn skip_env_file(mut self) -> Self {
        self.load_env_file = false;
        self
    }

    /// Directory the default files are looked up in.
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    /// Wins over `$REEL_DATABASE_URL` and the file.
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    /// Read variables from `vars` instead of the process environment. No
    /// `.env` file is loaded.
    pub fn with_env_vars<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env = EnvLookup::Fixed(
            vars.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        );
        self.load_env_file = false;
        self
    }

    pub fn load(&self) -> anyhow::Result<ConfigLoad> {
        let env_file_loaded = self.load_dotenv();
        let (mut config, source) = self.resolve()?;

        if let Some(url) = self.env.get(DATABASE_URL_VAR) {
            debug!(target: "reel::config", "database url taken from {DATABASE_URL_VAR}");
            config.database.url = url;
        }
        if let Some(raw) = self.env.get(THREAD_POOL_SIZE_VAR) {
            config.scheduler.thread_pool_size =
                raw.trim().parse().with_context(|| {
                    format!("{THREAD_POOL_SIZE_VAR} must be an integer, got {raw:?}")
                })?;
        }
        if let Some(url) = self.database_url.as_ref() {
            config.database.url = url.clone();
        }

        config.metadata = ConfigMetadata {
            source,
            env_file_loaded,
        };

        let warnings = validate(&config)?;
        for warning in warnings.iter() {
            warn!(target: "reel::config", field = %warning.field, "{}", warning.message);
        }
        info!(
            target: "reel::config",
            source = ?config.metadata.source,
            env_file_loaded,
            "configuration loaded"
        );

        Ok(ConfigLoad { config, warnings })
    }

    fn load_dotenv(&self) -> bool {
        if !self.load_env_file {
            return false;
        }
        let outcome = match self.env_file.as_ref() {
            Some(path) => dotenvy::from_path(path).map(|_| path.clone()),
            None => dotenvy::dotenv(),
        };
        match outcome {
            Ok(path) => {
                debug!(target: "reel::config", path = %path.display(), "loaded env file");
                true
            }
            Err(err) if err.not_found() => false,
            Err(err) => {
                warn!(target: "reel::config", error = %err, "failed to load env file");
                false
            }
        }
    }

    fn resolve(&self) -> anyhow::Result<(Config, ConfigSource)> {
        if let Some(path) = self.config_path.as_ref() {
            let config = load_from_file(path)?;
            return Ok((config, ConfigSource::Explicit(path.clone())));
        }

        if let Some(raw) = self.env.get(CONFIG_PATH_VAR) {
            let path = PathBuf::from(raw);
            let config = load_from_file(&path)?;
            return Ok((config, ConfigSource::EnvPath(path)));
        }

        if let Some(raw) = self.env.get(CONFIG_JSON_VAR) {
            let config = serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse {CONFIG_JSON_VAR}"))?;
            return Ok((config, ConfigSource::EnvInline));
        }

        if let Some(path) = self.find_default_file() {
            let config = load_from_file(&path)?;
            return Ok((config, ConfigSource::File(path)));
        }

        Ok((Config::default(), ConfigSource::Default))
    }

    fn find_default_file(&self) -> Option<PathBuf> {
        DEFAULT_CONFIG_FILES
            .iter()
            .map(|name| self.base_dir.join(name))
            .find(|candidate| candidate.is_file())
    }
}

pub fn load_from_file(path: &Path) -> anyhow::Result<Config> {
    let contents = fs::read_to_string(path).with_context(|| {
        format!("failed to read config from {}", path.display())
    })?;

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => serde_json::from_str(&contents)
            .with_context(|| format!("invalid config {}", path.display())),
        Some("toml") => toml::from_str(&contents).map_err(|err| {
            anyhow!("invalid config {}: {}", path.display(), err)
        }),
        _ => parse_from_str(&contents, &path.display().to_string()),
    }
}

/// TOML first, then JSON.
pub fn parse_from_str(contents: &str, origin: &str) -> anyhow::Result<Config> {
    toml::from_str(contents).or_else(|toml_err| {
        serde_json::from_str(contents).map_err(|json_err| {
            anyhow!(
                "failed to parse config {}: toml error: {}; json error: {}",
                origin,
                toml_err,
                json_err
            )
        })
    })
}
