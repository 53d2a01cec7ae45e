use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::instance::{Instance, ValidationError};

pub const SETTING_NAMES: [&str; 9] = [
    "refresh-rate",
    "errlog-refresh-rate",
    "default-group",
    "max-processlist-len",
    "max-errlog-len",
    "case-sensitive-filters",
    "rate-limiter",
    "connect-timeout",
    "fetch-timeout",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config directory is unavailable for this platform")]
    ConfigDirUnavailable,
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid connection `{name}` in {path}: {source}")]
    InvalidInstance {
        path: PathBuf,
        name: String,
        #[source]
        source: ValidationError,
    },
    #[error("failed to create config directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize config: {source}")]
    Serialize {
        #[source]
        source: toml::ser::Error,
    },
    #[error("failed to write config file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to move unreadable config aside to {path}: {source}")]
    Backup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unknown setting `{0}`")]
    UnknownSetting(String),
    #[error("invalid value `{value}` for setting `{name}`")]
    InvalidSetting { name: String, value: String },
}

/// Tunables persisted in the `[settings]` section. Durations are milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Settings {
    pub refresh_rate: u64,
    pub errlog_refresh_rate: u64,
    pub default_group: String,
    pub max_processlist_len: usize,
    pub max_errlog_len: usize,
    pub case_sensitive_filters: bool,
    pub rate_limiter: u64,
    pub connect_timeout: u64,
    pub fetch_timeout: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            refresh_rate: 1_000,
            errlog_refresh_rate: 5_000,
            default_group: String::new(),
            max_processlist_len: 200,
            max_errlog_len: 100,
            case_sensitive_filters: false,
            rate_limiter: 150,
            connect_timeout: 5_000,
            fetch_timeout: 3_000,
        }
    }
}

impl Settings {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<String> {
        let value = match name {
            "refresh-rate" => self.refresh_rate.to_string(),
            "errlog-refresh-rate" => self.errlog_refresh_rate.to_string(),
            "default-group" => self.default_group.clone(),
            "max-processlist-len" => self.max_processlist_len.to_string(),
            "max-errlog-len" => self.max_errlog_len.to_string(),
            "case-sensitive-filters" => self.case_sensitive_filters.to_string(),
            "rate-limiter" => self.rate_limiter.to_string(),
            "connect-timeout" => self.connect_timeout.to_string(),
            "fetch-timeout" => self.fetch_timeout.to_string(),
            _ => return None,
        };
        Some(value)
    }

    pub fn set(&mut self, name: &str, value: &str) -> Result<(), ConfigError> {
        let trimmed = value.trim();
        let invalid = || ConfigError::InvalidSetting {
            name: name.to_string(),
            value: value.to_string(),
        };
        match name {
            "refresh-rate" => self.refresh_rate = parse_interval(trimmed).ok_or_else(invalid)?,
            "errlog-refresh-rate" => {
                self.errlog_refresh_rate = parse_interval(trimmed).ok_or_else(invalid)?;
            }
            "default-group" => self.default_group = trimmed.to_string(),
            "max-processlist-len" => {
                self.max_processlist_len = trimmed.parse().map_err(|_| invalid())?;
            }
            "max-errlog-len" => self.max_errlog_len = trimmed.parse().map_err(|_| invalid())?,
            "case-sensitive-filters" => {
                self.case_sensitive_filters = trimmed.parse().map_err(|_| invalid())?;
            }
            "rate-limiter" => self.rate_limiter = trimmed.parse().map_err(|_| invalid())?,
            "connect-timeout" => {
                self.connect_timeout = parse_interval(trimmed).ok_or_else(invalid)?;
            }
            "fetch-timeout" => self.fetch_timeout = parse_interval(trimmed).ok_or_else(invalid)?,
            _ => return Err(ConfigError::UnknownSetting(name.to_string())),
        }
        Ok(())
    }

    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_rate.max(1))
    }

    #[must_use]
    pub fn errlog_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.errlog_refresh_rate.max(1))
    }

    #[must_use]
    pub fn rate_limit(&self) -> Duration {
        Duration::from_millis(self.rate_limiter)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout.max(1))
    }

    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout.max(1))
    }

    #[must_use]
    pub fn default_group(&self) -> Option<&str> {
        let group = self.default_group.trim();
        (!group.is_empty()).then_some(group)
    }
}

// Zero would turn the poller into a busy loop.
fn parse_interval(raw: &str) -> Option<u64> {
    raw.parse::<u64>().ok().filter(|millis| *millis > 0)
}

pub trait ConfigStore {
    fn load_instances(&self) -> Result<Vec<Instance>, ConfigError>;
    fn save_instances(&mut self, instances: &[Instance]) -> Result<(), ConfigError>;
    fn get_setting(&self, name: &str) -> Option<String>;
    fn settings(&self) -> &Settings;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ConfigDocument {
    #[serde(default)]
    settings: Settings,
    #[serde(default)]
    connections: Vec<Instance>,
}

impl ConfigDocument {
    fn normalize(&mut self) {
        let mut by_name = BTreeMap::new();
        for instance in self.connections.drain(..) {
            by_name.insert(instance.connection_name.clone(), instance);
        }
        self.connections = by_name.into_values().collect();
    }

    fn validate(&self, path: &Path) -> Result<(), ConfigError> {
        for instance in &self.connections {
            instance
                .validate()
                .map_err(|source| ConfigError::InvalidInstance {
                    path: path.to_path_buf(),
                    name: instance.connection_name.clone(),
                    source,
                })?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
    settings: Settings,
    connections: Vec<Instance>,
    backup_before_write: bool,
}

impl FileConfigStore {
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path()?;
        Self::load_from_path(path)
    }

    pub fn load_from_path(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self::empty(path));
        }

        let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;

        if raw.trim().is_empty() {
            return Ok(Self::empty(path));
        }

        let mut doc: ConfigDocument =
            toml::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?;
        doc.validate(&path)?;
        doc.normalize();

        Ok(Self {
            path,
            settings: doc.settings,
            connections: doc.connections,
            backup_before_write: false,
        })
    }

    /// Empty store for a file that failed to load. The first persist moves
    /// the unreadable file to `<name>.bak` instead of overwriting it.
    #[must_use]
    pub fn recovering(path: impl Into<PathBuf>) -> Self {
        Self {
            backup_before_write: true,
            ..Self::empty(path.into())
        }
    }

    fn empty(path: PathBuf) -> Self {
        Self {
            path,
            settings: Settings::default(),
            connections: Vec::new(),
            backup_before_write: false,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn connections(&self) -> &[Instance] {
        &self.connections
    }

    pub fn set_setting(&mut self, name: &str, value: &str) -> Result<(), ConfigError> {
        self.settings.set(name, value)
    }

    pub fn persist(&mut self) -> Result<(), ConfigError> {
        if let Some(parent_dir) = self.path.parent() {
            fs::create_dir_all(parent_dir).map_err(|source| ConfigError::CreateDir {
                path: parent_dir.to_path_buf(),
                source,
            })?;
        }

        if self.backup_before_write && self.path.exists() {
            let backup = backup_path(&self.path);
            fs::rename(&self.path, &backup)
                .map_err(|source| ConfigError::Backup { path: backup, source })?;
        }
        self.backup_before_write = false;

        let mut doc = ConfigDocument {
            settings: self.settings.clone(),
            connections: self.connections.clone(),
        };
        doc.normalize();
        let rendered =
            toml::to_string_pretty(&doc).map_err(|source| ConfigError::Serialize { source })?;

        fs::write(&self.path, rendered).map_err(|source| ConfigError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

impl ConfigStore for FileConfigStore {
    fn load_instances(&self) -> Result<Vec<Instance>, ConfigError> {
        Ok(self.connections.clone())
    }

    fn save_instances(&mut self, instances: &[Instance]) -> Result<(), ConfigError> {
        self.connections = instances.to_vec();
        self.persist()
    }

    fn get_setting(&self, name: &str) -> Option<String> {
        self.settings.get(name)
    }

    fn settings(&self) -> &Settings {
        &self.settings
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".bak");
    path.with_file_name(name)
}

pub fn default_config_dir() -> Result<PathBuf, ConfigError> {
    if let Some(custom) = env::var_os("NEXTOP_CONFIG_DIR") {
        return Ok(PathBuf::from(custom));
    }

    let base_dir = if cfg!(target_os = "windows") {
        env::var_os("APPDATA")
            .map(PathBuf::from)
            .ok_or(ConfigError::ConfigDirUnavailable)?
    } else if let Some(xdg_config_home) = env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config_home)
    } else {
        let home = env::var_os("HOME").ok_or(ConfigError::ConfigDirUnavailable)?;
        PathBuf::from(home).join(".config")
    };

    Ok(base_dir.join("nextop"))
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    Ok(default_config_dir()?.join("nextop.toml"))
}
