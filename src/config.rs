//! Configuration - run settings, time units and the on-disk config file

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const LOCAL_CONFIG: &str = "forkflow.json";
const DEFAULT_CAPTURE_LIMIT: usize = 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown time unit format: {0}")]
    UnknownTimeUnit(String),

    #[error("Unknown log level {0}")]
    UnknownLogLevel(String),

    #[error("Unsupported log level: {0}")]
    UnsupportedLogLevel(String),

    #[error("Error opening file {}: {source}", .path.display())]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Error decoding config file: {0}")]
    Decode(String),

    #[error("Error unmarshaling config changes: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("Error marshaling updated config: {0}")]
    Marshal(String),
}

/// Unit the timeout and delays are expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(try_from = "String", into = "String")]
pub enum TimeUnit {
    Hours,
    Minutes,
    #[default]
    Seconds,
    Millis,
    Micros,
}

impl TimeUnit {
    /// Duration of `amount` units
    pub fn duration(self, amount: u64) -> Duration {
        match self {
            Self::Hours => Duration::from_secs(amount.saturating_mul(3600)),
            Self::Minutes => Duration::from_secs(amount.saturating_mul(60)),
            Self::Seconds => Duration::from_secs(amount),
            Self::Millis => Duration::from_millis(amount),
            Self::Micros => Duration::from_micros(amount),
        }
    }
}

impl FromStr for TimeUnit {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "h" => Ok(Self::Hours),
            "m" => Ok(Self::Minutes),
            "s" => Ok(Self::Seconds),
            "ms" => Ok(Self::Millis),
            "micros" => Ok(Self::Micros),
            other => Err(ConfigError::UnknownTimeUnit(other.to_string())),
        }
    }
}

impl TryFrom<String> for TimeUnit {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeUnit> for String {
    fn from(unit: TimeUnit) -> Self {
        unit.to_string()
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hours => write!(f, "h"),
            Self::Minutes => write!(f, "m"),
            Self::Seconds => write!(f, "s"),
            Self::Millis => write!(f, "ms"),
            Self::Micros => write!(f, "micros"),
        }
    }
}

/// Scalar settings the engine runs under
#[derive(Debug, Clone)]
pub struct Settings {
    /// Worker count; zero or negative means one worker per command instance
    pub thread_count: i32,
    /// Feed each command's captured output into its dependents
    pub pipeline: bool,
    pub verbose: bool,
    /// Hard deadline for each command instance
    pub timeout: Duration,
    /// Unit of the per-command delays
    pub time_unit: TimeUnit,
    /// Make dependents wait for their dependency to finish even without pipelining
    pub wait_for_dependencies: bool,
    /// Bytes taken from the first read of a command's output for its dependents
    pub capture_limit: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            thread_count: 0,
            pipeline: false,
            verbose: false,
            timeout: Duration::from_secs(10),
            time_unit: TimeUnit::Seconds,
            wait_for_dependencies: false,
            capture_limit: DEFAULT_CAPTURE_LIMIT,
        }
    }
}

impl Settings {
    /// Number of workers to create for `instances` command instances
    pub fn worker_count(&self, instances: usize) -> usize {
        if self.thread_count <= 0 {
            instances
        } else {
            (self.thread_count as usize).min(instances)
        }
    }

    /// Delay of a command expressed as a duration
    pub fn delay_duration(&self, delay: u64) -> Duration {
        self.time_unit.duration(delay)
    }
}

/// Contents of the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub short_desc: String,
    #[serde(default)]
    pub long_desc: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, rename = "timeunit")]
    pub time_unit: TimeUnit,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_capture_limit")]
    pub capture_limit: usize,
    #[serde(default)]
    pub wait_for_dependencies: bool,
}

fn default_name() -> String {
    env!("CARGO_PKG_NAME").to_string()
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_timeout() -> u64 {
    10
}

fn default_capture_limit() -> usize {
    DEFAULT_CAPTURE_LIMIT
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: default_name(),
            short_desc: String::new(),
            long_desc: String::new(),
            version: default_version(),
            time_unit: TimeUnit::default(),
            timeout: default_timeout(),
            capture_limit: default_capture_limit(),
            wait_for_dependencies: false,
        }
    }
}

impl Config {
    /// Path of the per-user config file
    pub fn user_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".forkflow")
            .join("config.json")
    }

    /// Load config from a JSON or YAML file, chosen by extension
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileOpen {
            path: path.to_path_buf(),
            source,
        })?;

        if is_yaml(path) {
            serde_yaml::from_str(&content).map_err(|e| ConfigError::Decode(e.to_string()))
        } else {
            serde_json::from_str(&content).map_err(|e| ConfigError::Decode(e.to_string()))
        }
    }

    /// Locate the config file to use
    /// Priority:
    /// 1. explicit path
    /// 2. ./forkflow.json
    /// 3. ~/.forkflow/config.json
    pub fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }

        let local = PathBuf::from(LOCAL_CONFIG);
        if local.exists() {
            return Some(local);
        }

        let user = Self::user_path();
        if user.exists() {
            return Some(user);
        }

        None
    }

    /// Load the located config file, falling back to built-in defaults
    pub fn auto_load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match Self::locate(explicit) {
            Some(path) => {
                log::debug!("Loading config from {}", path.display());
                Self::from_file(&path)
            }
            None => {
                log::debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Engine settings seeded from this config
    pub fn settings(&self) -> Settings {
        Settings {
            timeout: self.time_unit.duration(self.timeout),
            time_unit: self.time_unit,
            wait_for_dependencies: self.wait_for_dependencies,
            capture_limit: self.capture_limit,
            ..Settings::default()
        }
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yml") | Some("yaml")
    )
}

/// Overwrite keys of an existing config file with values from `changes`
///
/// `changes` is always a JSON object; the file keeps its own format. Only
/// keys already present in the file are touched; unknown keys in `changes`
/// are ignored.
pub fn apply_changes(path: &Path, changes: &str) -> Result<(), ConfigError> {
    let changes: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(changes).map_err(ConfigError::Parse)?;

    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileOpen {
        path: path.to_path_buf(),
        source,
    })?;

    let updated = if is_yaml(path) {
        rewrite_yaml(&content, &changes)?
    } else {
        rewrite_json(&content, &changes)?
    };

    std::fs::write(path, updated).map_err(|source| ConfigError::FileOpen {
        path: path.to_path_buf(),
        source,
    })
}

fn rewrite_json(
    content: &str,
    changes: &serde_json::Map<String, serde_json::Value>,
) -> Result<String, ConfigError> {
    let mut settings: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(content).map_err(|e| ConfigError::Decode(e.to_string()))?;

    for (name, value) in settings.iter_mut() {
        if let Some(change) = changes.get(name) {
            log::debug!("Config {}: {} -> {}", name, value, change);
            *value = change.clone();
        }
    }

    serde_json::to_string_pretty(&settings).map_err(|e| ConfigError::Marshal(e.to_string()))
}

fn rewrite_yaml(
    content: &str,
    changes: &serde_json::Map<String, serde_json::Value>,
) -> Result<String, ConfigError> {
    let mut settings: serde_yaml::Mapping =
        serde_yaml::from_str(content).map_err(|e| ConfigError::Decode(e.to_string()))?;

    for (name, value) in settings.iter_mut() {
        let Some(change) = name.as_str().and_then(|name| changes.get(name)) else {
            continue;
        };
        log::debug!("Config {:?}: {:?} -> {}", name, value, change);
        *value = serde_yaml::to_value(change).map_err(|e| ConfigError::Marshal(e.to_string()))?;
    }

    serde_yaml::to_string(&settings).map_err(|e| ConfigError::Marshal(e.to_string()))
}

/// Parse a user supplied log level, accepting only INFO, DEBUG, WARN and ERROR
pub fn parse_log_level(level: &str) -> Result<log::LevelFilter, ConfigError> {
    let parsed: log::LevelFilter = level
        .parse()
        .map_err(|_| ConfigError::UnknownLogLevel(level.to_string()))?;

    match parsed {
        log::LevelFilter::Error
        | log::LevelFilter::Warn
        | log::LevelFilter::Info
        | log::LevelFilter::Debug => Ok(parsed),
        _ => Err(ConfigError::UnsupportedLogLevel(level.to_string())),
    }
}
