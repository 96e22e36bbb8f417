//! Configuration loaded from layered JSON files and the environment.
//!
//! For an application named `name`, these files are read in order when they
//! exist; a later file replaces an earlier file's top-level keys:
//!
//! 1. `$COURIER_CONFIG_FILE`
//! 2. `$<NAME>_CONFIG_FILE`
//! 3. `./<name>.json`
//! 4. `./courier.json`
//!
//! `COURIER_BUS_ADDRESS`, `COURIER_BUS_PASSWORD` and `COURIER_BUS_DB` are
//! applied last.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::app::RunnerSettings;

pub const ENV_PREFIX: &str = "COURIER";
pub const DEFAULT_FILE: &str = "courier.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{path} must contain a JSON object")]
    NotAnObject { path: PathBuf },

    #[error("invalid configuration: {0}")]
    Invalid(#[source] serde_json::Error),

    #[error("invalid value for {var}: {value:?}")]
    Env { var: String, value: String },
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bus: BusConfig,
    pub runner: RunnerConfig,
}

/// Broker connection settings. An empty address (or `memory://`) selects
/// the in-process broker, `redis://` a Redis server; `db` and
/// `password` only apply to Redis.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub address: String,
    pub password: String,
    pub db: u32,
}

impl fmt::Debug for BusConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let password = if self.password.is_empty() { "" } else { "***" };
        f.debug_struct("BusConfig")
            .field("address", &self.address)
            .field("password", &password)
            .field("db", &self.db)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub poll_interval_ms: u64,
    pub resubscribe_delay_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            resubscribe_delay_ms: 1000,
        }
    }
}

impl RunnerConfig {
    pub fn settings(&self) -> RunnerSettings {
        RunnerSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            resubscribe_delay: Duration::from_millis(self.resubscribe_delay_ms),
        }
    }
}

impl Config {
    /// Load using the process environment.
    pub fn load(name: &str) -> Result<Self, ConfigError> {
        Self::load_with(name, |var| std::env::var(var).ok())
    }

    /// Load with `env` standing in for the process environment.
    pub fn load_with<F>(name: &str, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut merged = Map::new();
        for path in candidate_files(name, &env) {
            if !path.exists() {
                continue;
            }
            debug!(path = %path.display(), "loading config layer");
            merged.extend(read_layer(&path)?);
        }

        let mut config: Config =
            serde_json::from_value(Value::Object(merged)).map_err(ConfigError::Invalid)?;
        config.apply_env(&env)?;
        Ok(config)
    }

    fn apply_env<F>(&mut self, env: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| format!("{ENV_PREFIX}_BUS_{key}");
        if let Some(address) = env(&var("ADDRESS")) {
            self.bus.address = address;
        }
        if let Some(password) = env(&var("PASSWORD")) {
            self.bus.password = password;
        }
        if let Some(db) = env(&var("DB")) {
            self.bus.db = db.trim().parse().map_err(|_| ConfigError::Env {
                var: var("DB"),
                value: db,
            })?;
        }
        Ok(())
    }
}

/// `my-app.v2` → `MY_APP_V2`
pub fn env_prefix(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '.' | '-' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect()
}

/// Layer paths in increasing precedence.
pub fn candidate_files<F>(name: &str, env: &F) -> Vec<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    let mut files = Vec::with_capacity(4);
    let mut from_env = |var: String| {
        if let Some(path) = env(&var).filter(|p| !p.is_empty()) {
            files.push(PathBuf::from(path));
        }
    };
    from_env(format!("{ENV_PREFIX}_CONFIG_FILE"));
    from_env(format!("{}_CONFIG_FILE", env_prefix(name)));
    files.push(PathBuf::from(format!("{name}.json")));
    files.push(PathBuf::from(DEFAULT_FILE));
    files
}

fn read_layer(path: &Path) -> Result<Map<String, Value>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    match serde_json::from_str(&text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ConfigError::NotAnObject {
            path: path.to_path_buf(),
        }),
        Err(source) => Err(ConfigError::Json {
            path: path.to_path_buf(),
            source,
        }),
    }
}
