//! Error handling for servermgr.
use std::{process::ExitStatus, time::Duration};

use strum_macros::{AsRefStr, Display};
use thiserror::Error;

/// Boxed lower-level failure carried by a health probe error.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure raised while supervising a worker process.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// `ready_wait` was invoked on a manager that owns no process.
    #[error("{name}: no subprocess")]
    NoSubprocess {
        /// Manager name.
        name: String,
    },

    /// A listener already accepts connections on the address the worker wants.
    #[error("address already in use: {host}:{port}")]
    AddressInUse {
        /// Host that was probed.
        host: String,
        /// Port that was probed.
        port: u16,
    },

    /// A single readiness probe failed. Retried by the polling loop.
    #[error("health check failed: {source}")]
    HealthCheckFailure {
        /// What the probe ran into.
        #[source]
        source: BoxError,
    },

    /// The worker never became healthy; it has been terminated.
    #[error("{name}: taking too long to start (waited {timeout:?})")]
    StartupTimeout {
        /// Manager name.
        name: String,
        /// Readiness budget that expired.
        timeout: Duration,
    },

    /// The worker exited before it ever reported healthy.
    #[error("{name}: process exited unexpectedly ({})", describe_status(.status))]
    ProcessExitedUnexpectedly {
        /// Manager name.
        name: String,
        /// Exit status, when the OS reported one.
        status: Option<ExitStatus>,
        /// Captured standard error of the worker.
        #[source]
        stderr: Option<CapturedOutput>,
    },

    /// `start` was called while a worker is still owned.
    #[error("{name}: worker is already running")]
    AlreadyRunning {
        /// Manager name.
        name: String,
    },

    /// Worker-specific preparation failed before anything was launched.
    #[error("{name}: {message}")]
    Setup {
        /// Worker name.
        name: String,
        /// What went wrong.
        message: String,
    },

    /// OS-level failure, typically from spawning the worker. Never rewrapped.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Coarse classification of a [`WorkerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum WorkerErrorKind {
    NoSubprocess,
    AddressInUse,
    HealthCheckFailure,
    StartupTimeout,
    ProcessExitedUnexpectedly,
    AlreadyRunning,
    Setup,
    Io,
}

impl WorkerError {
    /// Wraps a probe failure as a [`WorkerError::HealthCheckFailure`].
    pub fn health(source: impl Into<BoxError>) -> Self {
        WorkerError::HealthCheckFailure {
            source: source.into(),
        }
    }

    /// Builds a [`WorkerError::Setup`] for the given worker.
    pub fn setup(name: impl Into<String>, message: impl Into<String>) -> Self {
        WorkerError::Setup {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> WorkerErrorKind {
        match self {
            Self::NoSubprocess { .. } => WorkerErrorKind::NoSubprocess,
            Self::AddressInUse { .. } => WorkerErrorKind::AddressInUse,
            Self::HealthCheckFailure { .. } => WorkerErrorKind::HealthCheckFailure,
            Self::StartupTimeout { .. } => WorkerErrorKind::StartupTimeout,
            Self::ProcessExitedUnexpectedly { .. } => {
                WorkerErrorKind::ProcessExitedUnexpectedly
            }
            Self::AlreadyRunning { .. } => WorkerErrorKind::AlreadyRunning,
            Self::Setup { .. } => WorkerErrorKind::Setup,
            Self::Io(_) => WorkerErrorKind::Io,
        }
    }

    /// Name of the manager or worker the error refers to, if it carries one.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::NoSubprocess { name }
            | Self::StartupTimeout { name, .. }
            | Self::ProcessExitedUnexpectedly { name, .. }
            | Self::AlreadyRunning { name }
            | Self::Setup { name, .. } => Some(name),
            _ => None,
        }
    }
}

fn describe_status(status: &Option<ExitStatus>) -> String {
    match status {
        Some(status) => status.to_string(),
        None => "exit status unavailable".into(),
    }
}

/// Standard error text captured from a worker that died during startup.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct CapturedOutput(pub String);

impl CapturedOutput {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Errors raised while loading a supervision configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error reading or accessing a configuration file.
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    /// Error parsing YAML configuration.
    #[error("Invalid YAML format: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A `${VAR}` reference named a variable that is not set.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// A duration string could not be understood.
    #[error("Invalid duration value: '{0}'")]
    InvalidDuration(String),
}

/// Errors raised by the name-service client and server.
#[derive(Debug, Error)]
pub enum NameServiceError {
    #[error("name service I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode name service message: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("name '{0}' is not registered")]
    NotFound(String),

    #[error("name server reported error: {0}")]
    Server(String),

    #[error("unexpected response from {0}")]
    UnexpectedResponse(String),
}
