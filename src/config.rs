//! Configuration management for servermgr.
use regex::{Captures, Regex};
use serde::Deserialize;
use std::{
    env, fs,
    path::Path,
    sync::LazyLock,
    time::Duration,
};

use crate::{
    constants::{DEFAULT_READY_TIMEOUT, READY_POLL_INTERVAL, STOP_GRACE_PERIOD},
    error::{ConfigError, WorkerError},
    manager::{Manager, Worker},
    nameservice::{NameServerSettings, NameServerWorker},
    workers::{
        AppServer, AppServerSettings, Database, DatabaseSettings, ProxyServer, ProxySettings,
    },
};

static ENV_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("environment reference pattern")
});

static DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+(?:\.\d+)?)\s*(ms|s|m|h)?\s*$").expect("duration pattern")
});

/// Represents the structure of the configuration file.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Configuration version.
    pub version: String,
    /// Timings applied to every worker.
    #[serde(default)]
    pub supervision: SupervisionConfig,
    /// Workers, started in this order and stopped in reverse.
    pub workers: Vec<WorkerEntry>,
}

/// A duration written either as a number of seconds or with a unit suffix.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DurationValue {
    Seconds(f64),
    Text(String),
}

impl DurationValue {
    pub fn resolve(&self) -> Result<Duration, ConfigError> {
        match self {
            DurationValue::Seconds(secs) => Duration::try_from_secs_f64(*secs)
                .map_err(|_| ConfigError::InvalidDuration(secs.to_string())),
            DurationValue::Text(text) => parse_duration(text),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SupervisionConfig {
    pub ready_timeout: Option<DurationValue>,
    pub poll_interval: Option<DurationValue>,
    pub stop_grace: Option<DurationValue>,
}

/// Resolved supervision timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub ready_timeout: Duration,
    pub poll_interval: Duration,
    pub stop_grace: Duration,
}

impl SupervisionConfig {
    pub fn timings(&self) -> Result<Timings, ConfigError> {
        let resolve = |value: &Option<DurationValue>, default: Duration| {
            value.as_ref().map_or(Ok(default), DurationValue::resolve)
        };

        Ok(Timings {
            ready_timeout: resolve(&self.ready_timeout, DEFAULT_READY_TIMEOUT)?,
            poll_interval: resolve(&self.poll_interval, READY_POLL_INTERVAL)?,
            stop_grace: resolve(&self.stop_grace, STOP_GRACE_PERIOD)?,
        })
    }
}

/// One configured worker.
#[derive(Debug, Deserialize)]
pub struct WorkerEntry {
    /// Manager name; defaults to the worker type's name.
    pub name: Option<String>,
    #[serde(flatten)]
    pub worker: WorkerConfig,
}

/// Kind-specific worker settings.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerConfig {
    Database(DatabaseSettings),
    Proxy(ProxySettings),
    AppServer(AppServerSettings),
    NameServer(NameServerSettings),
}

impl WorkerConfig {
    pub fn default_name(&self) -> &'static str {
        match self {
            WorkerConfig::Database(_) => Database::DEFAULT_NAME,
            WorkerConfig::Proxy(_) => ProxyServer::DEFAULT_NAME,
            WorkerConfig::AppServer(_) => AppServer::DEFAULT_NAME,
            WorkerConfig::NameServer(_) => NameServerWorker::DEFAULT_NAME,
        }
    }

    /// Constructs the worker. Database and proxy workers validate their
    /// environment here.
    pub fn build(&self) -> Result<Box<dyn Worker>, WorkerError> {
        let worker: Box<dyn Worker> = match self {
            WorkerConfig::Database(settings) => Box::new(Database::new(settings.clone())?),
            WorkerConfig::Proxy(settings) => Box::new(ProxyServer::new(settings.clone())?),
            WorkerConfig::AppServer(settings) => Box::new(AppServer::new(settings.clone())),
            WorkerConfig::NameServer(settings) => {
                Box::new(NameServerWorker::new(settings.clone()))
            }
        };
        Ok(worker)
    }
}

impl WorkerEntry {
    pub fn name(&self) -> &str {
        self.name
            .as_deref()
            .unwrap_or_else(|| self.worker.default_name())
    }
}

impl Config {
    pub fn timings(&self) -> Result<Timings, ConfigError> {
        self.supervision.timings()
    }

    /// Builds one manager per configured worker, in file order.
    pub fn build_managers(&self) -> Result<Vec<Manager<Box<dyn Worker>>>, WorkerError> {
        let timings = self
            .timings()
            .map_err(|err| WorkerError::setup("config", err.to_string()))?;

        self.workers
            .iter()
            .map(|entry| -> Result<_, WorkerError> {
                Ok(Manager::new(entry.name(), entry.worker.build()?)
                    .with_poll_interval(timings.poll_interval)
                    .with_stop_grace(timings.stop_grace))
            })
            .collect()
    }
}

/// Parses `500ms`, `10s`, `5m`, `1h` or a bare number of seconds.
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidDuration(input.to_string());
    let caps = DURATION.captures(input).ok_or_else(invalid)?;
    let value: f64 = caps[1].parse().map_err(|_| invalid())?;

    let secs = match caps.get(2).map(|unit| unit.as_str()) {
        Some("ms") => value / 1000.0,
        Some("m") => value * 60.0,
        Some("h") => value * 3600.0,
        _ => value,
    };
    Duration::try_from_secs_f64(secs).map_err(|_| invalid())
}

/// Expands `${VAR}` references from the process environment.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut missing = None;
    let result = ENV_VAR.replace_all(input, |caps: &Captures| {
        let var_name = &caps[1];
        env::var(var_name).unwrap_or_else(|_| {
            missing.get_or_insert_with(|| var_name.to_string());
            String::new()
        })
    });

    match missing {
        Some(var_name) => Err(ConfigError::MissingEnvVar(var_name)),
        None => Ok(result.into_owned()),
    }
}

/// Parses configuration text, expanding environment references first.
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let expanded = expand_env_vars(content)?;
    let config: Config = serde_yaml::from_str(&expanded)?;
    config.timings()?;
    Ok(config)
}

/// Loads and parses the configuration file.
pub fn load_config(config_path: &Path) -> Result<Config, ConfigError> {
    let content = fs::read_to_string(config_path).map_err(|e| {
        ConfigError::Read(std::io::Error::new(
            e.kind(),
            format!("{} ({})", e, config_path.display()),
        ))
    })?;

    parse_config(&content)
}
