use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_FEATURES_DB: &str = "features";
pub const IN_MEMORY_PATH: &str = ":memory:";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("db-host `{host}` should be one of {known:?}")]
    UnknownHost { host: String, known: Vec<String> },
    #[error("no database hosts configured")]
    NoHosts,
    #[error("invalid host entry `{0}` (expected alias=path)")]
    BadHostEntry(String),
    #[error("read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Directory holding one `<db>.sqlite` file per database, or `:memory:`.
    pub path: PathBuf,
}

impl HostConfig {
    pub fn is_in_memory(&self) -> bool {
        self.path.as_os_str() == IN_MEMORY_PATH
    }

    pub fn db_file(&self, db_name: &str) -> PathBuf {
        self.path.join(format!("{db_name}.sqlite"))
    }
}

/// Passed explicitly to every connection call; nothing is read from globals
/// after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub hosts: BTreeMap<String, HostConfig>,
    #[serde(default = "default_features_db")]
    pub features_db: String,
    #[serde(default)]
    pub default_host: Option<String>,
}

fn default_features_db() -> String {
    DEFAULT_FEATURES_DB.to_string()
}

impl StoreConfig {
    pub fn single_host(alias: &str, path: impl Into<PathBuf>) -> Self {
        let mut hosts = BTreeMap::new();
        hosts.insert(alias.to_string(), HostConfig { path: path.into() });
        Self {
            hosts,
            features_db: default_features_db(),
            default_host: Some(alias.to_string()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg = serde_json::from_str::<Self>(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if cfg.hosts.is_empty() {
            return Err(ConfigError::NoHosts);
        }
        Ok(cfg)
    }

    /// `FEATURES_DB_HOSTS=local=./data,archive=/mnt/archive`, plus optional
    /// `FEATURES_DB_NAME` and `FEATURES_DB_HOST`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw = env::var("FEATURES_DB_HOSTS").unwrap_or_default();
        let hosts = parse_hosts(&raw)?;
        if hosts.is_empty() {
            return Err(ConfigError::NoHosts);
        }
        let features_db = env::var("FEATURES_DB_NAME")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(default_features_db);
        let default_host = env::var("FEATURES_DB_HOST")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        Ok(Self {
            hosts,
            features_db,
            default_host,
        })
    }

    /// An explicit config file, else `FEATURES_DB_HOSTS`, else a single `local`
    /// host under the user data directory.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        match Self::from_env() {
            Err(ConfigError::NoHosts) => default_store_dir()
                .map(|dir| Self::single_host("local", dir))
                .ok_or(ConfigError::NoHosts),
            other => other,
        }
    }

    pub fn host(&self, alias: &str) -> Result<&HostConfig, ConfigError> {
        self.hosts
            .get(alias)
            .ok_or_else(|| ConfigError::UnknownHost {
                host: alias.to_string(),
                known: self.hosts.keys().cloned().collect(),
            })
    }

    /// Explicit alias, then the configured default, then the only host if there is one.
    pub fn resolve_host_alias(&self, requested: Option<&str>) -> Result<String, ConfigError> {
        if let Some(alias) = requested.or(self.default_host.as_deref()) {
            self.host(alias)?;
            return Ok(alias.to_string());
        }
        match self.hosts.keys().next() {
            Some(only) if self.hosts.len() == 1 => Ok(only.clone()),
            _ => Err(ConfigError::UnknownHost {
                host: String::new(),
                known: self.hosts.keys().cloned().collect(),
            }),
        }
    }
}

pub fn default_store_dir() -> Option<PathBuf> {
    if let Ok(base) = env::var("XDG_DATA_HOME")
        && !base.trim().is_empty()
    {
        return Some(PathBuf::from(base).join("pregame_features"));
    }
    let home = env::var("HOME").ok()?;
    if home.trim().is_empty() {
        return None;
    }
    Some(
        PathBuf::from(home)
            .join(".local")
            .join("share")
            .join("pregame_features"),
    )
}

fn parse_hosts(raw: &str) -> Result<BTreeMap<String, HostConfig>, ConfigError> {
    let mut out = BTreeMap::new();
    for entry in raw.split([',', ';']).map(str::trim).filter(|s| !s.is_empty()) {
        let Some((alias, path)) = entry.split_once('=') else {
            return Err(ConfigError::BadHostEntry(entry.to_string()));
        };
        let (alias, path) = (alias.trim(), path.trim());
        if alias.is_empty() || path.is_empty() {
            return Err(ConfigError::BadHostEntry(entry.to_string()));
        }
        out.insert(
            alias.to_string(),
            HostConfig {
                path: PathBuf::from(path),
            },
        );
    }
    Ok(out)
}
