//! Runtime configuration.
//!
//! Values come from an optional YAML file named by `SKILL_RUNTIME_CONFIG`,
//! then environment variables override individual fields:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `PORT` | `port` |
//! | `SKILL_RUNTIME_STORE` | `store` (`file`, `sqlite`, `postgres`) |
//! | `SKILLS_DIR` | `skills_dir` |
//! | `SKILL_RUNTIME_DB` | `sqlite_path` |
//! | `DATABASE_URL` | `database_url` |
//! | `SKILL_RUNTIME_BACKEND` | `backend` (`anthropic`, `static`) |
//! | `ANTHROPIC_API_KEY` | `anthropic_api_key` |
//! | `SKILL_RUNTIME_CACHE` | `engine.cache_enabled` (`on`, `off`) |
//! | `SKILL_RUNTIME_AUDIT` | `engine.audit_mode` (`inline`, `background`) |

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::skills::EngineConfig;

pub const CONFIG_ENV: &str = "SKILL_RUNTIME_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid value {value:?} for {var}")]
    InvalidValue { var: &'static str, value: String },

    #[error("{0}")]
    Missing(String),
}

/// Where definitions, bindings and audit records live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Definitions from `skills_dir`; bindings and audit in SQLite.
    #[default]
    File,
    Sqlite,
    Postgres,
}

impl FromStr for StoreKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(StoreKind::File),
            "sqlite" => Ok(StoreKind::Sqlite),
            "postgres" | "postgresql" => Ok(StoreKind::Postgres),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Anthropic,
    /// Canned `static_response` for every call.
    Static,
}

impl FromStr for BackendKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" => Ok(BackendKind::Anthropic),
            "static" => Ok(BackendKind::Static),
            _ => Err(()),
        }
    }
}

/// Everything the server needs to assemble an engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub port: u16,
    pub store: StoreKind,
    pub skills_dir: PathBuf,
    pub sqlite_path: PathBuf,
    pub database_url: Option<String>,
    pub backend: BackendKind,
    #[serde(skip_serializing)]
    pub anthropic_api_key: Option<String>,
    pub static_response: String,
    pub engine: EngineConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            store: StoreKind::default(),
            skills_dir: PathBuf::from("skills"),
            sqlite_path: PathBuf::from("skill_runtime.db"),
            database_url: None,
            backend: BackendKind::default(),
            anthropic_api_key: None,
            static_response: "{}".to_string(),
            engine: EngineConfig::default(),
        }
    }
}

fn parse_var<T: FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidValue { var, value })
}

fn parse_switch(var: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "1" | "yes" => Ok(true),
        "off" | "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue { var, value }),
    }
}

impl RuntimeConfig {
    /// Read a YAML config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&text).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// File named by `SKILL_RUNTIME_CONFIG` (if any) plus process env.
    pub fn load() -> Result<Self, ConfigError> {
        let base = match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        base.with_env(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an environment lookup.
    pub fn with_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("PORT") {
            self.port = parse_var("PORT", v)?;
        }
        if let Some(v) = lookup("SKILL_RUNTIME_STORE") {
            self.store = parse_var("SKILL_RUNTIME_STORE", v)?;
        }
        if let Some(v) = lookup("SKILLS_DIR") {
            self.skills_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("SKILL_RUNTIME_DB") {
            self.sqlite_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("DATABASE_URL") {
            self.database_url = Some(v);
        }
        if let Some(v) = lookup("SKILL_RUNTIME_BACKEND") {
            self.backend = parse_var("SKILL_RUNTIME_BACKEND", v)?;
        }
        if let Some(v) = lookup("ANTHROPIC_API_KEY") {
            self.anthropic_api_key = Some(v);
        }
        if let Some(v) = lookup("SKILL_RUNTIME_CACHE") {
            self.engine.cache_enabled = parse_switch("SKILL_RUNTIME_CACHE", v)?;
        }
        if let Some(v) = lookup("SKILL_RUNTIME_AUDIT") {
            self.engine.audit_mode = parse_var("SKILL_RUNTIME_AUDIT", v)?;
        }
        Ok(self)
    }

    /// Check cross-field requirements.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store == StoreKind::Postgres && self.database_url.is_none() {
            return Err(ConfigError::Missing(
                "SKILL_RUNTIME_STORE=postgres requires DATABASE_URL".to_string(),
            ));
        }
        if self.backend == BackendKind::Anthropic && self.anthropic_api_key.is_none() {
            log::warn!("ANTHROPIC_API_KEY not set; invocations will fail at the backend stage");
        }
        Ok(())
    }
}
