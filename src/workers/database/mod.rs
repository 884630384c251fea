//! PostgreSQL server worker.
pub mod install;
pub mod wire;

use std::{
    path::PathBuf,
    process::{Command, Stdio},
};

use serde::Deserialize;
use tracing::debug;

use crate::{
    constants::{POSTGRES_INSTALL_ROOT, POSTGRES_SOCKET_DIR},
    error::WorkerError,
    manager::Worker,
    probe,
    process::ProcessHandle,
};

use self::wire::StartupReply;

fn default_host() -> String {
    "localhost".into()
}

fn default_port() -> u16 {
    15432
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/tmp/pg_data")
}

fn default_install_root() -> PathBuf {
    PathBuf::from(POSTGRES_INSTALL_ROOT)
}

fn default_socket_dir() -> PathBuf {
    PathBuf::from(POSTGRES_SOCKET_DIR)
}

fn default_role() -> String {
    "postgres".into()
}

/// Settings for a [`Database`].
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Run `initdb` when `data_dir` does not exist yet.
    #[serde(default)]
    pub initialize: bool,
    /// Installed version to run; discovered under `install_root` when unset.
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default = "default_install_root")]
    pub install_root: PathBuf,
    #[serde(default = "default_socket_dir")]
    pub socket_dir: PathBuf,
    /// Role named in the readiness probe.
    #[serde(default = "default_role")]
    pub user: String,
    /// Database named in the readiness probe.
    #[serde(default = "default_role")]
    pub database: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
            initialize: false,
            version: None,
            install_root: default_install_root(),
            socket_dir: default_socket_dir(),
            user: default_role(),
            database: default_role(),
        }
    }
}

/// A PostgreSQL server running on a private data directory.
pub struct Database {
    settings: DatabaseSettings,
    version: String,
}

impl Database {
    pub const DEFAULT_NAME: &'static str = "Postgres";

    /// Validates the environment, selects a version and, if requested,
    /// initializes the data directory.
    pub fn new(settings: DatabaseSettings) -> Result<Self, WorkerError> {
        install::check_socket_dir(&settings.socket_dir)?;

        let version = match settings.version.clone().filter(|v| !v.is_empty()) {
            Some(version) => version,
            None => install::discover_version(&settings.install_root).ok_or_else(|| {
                WorkerError::setup(
                    Self::DEFAULT_NAME,
                    format!(
                        "could not select a version of postgres to use under {}",
                        settings.install_root.display()
                    ),
                )
            })?,
        };
        debug!("Using postgres {version}");

        let database = Self { settings, version };
        if database.settings.initialize && !database.settings.data_dir.exists() {
            install::initialize_data_dir(&database.settings.data_dir, &database.bin_dir())?;
        }
        Ok(database)
    }

    pub fn settings(&self) -> &DatabaseSettings {
        &self.settings
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn bin_dir(&self) -> PathBuf {
        install::bin_dir(&self.settings.install_root, &self.version)
    }

    /// Server command line; `PATH` is extended on this command only.
    pub fn command(&self) -> Result<Command, WorkerError> {
        let s = &self.settings;
        let mut cmd = Command::new("postgres");
        cmd.arg("-D")
            .arg(&s.data_dir)
            .arg("-h")
            .arg(&s.host)
            .arg("-p")
            .arg(s.port.to_string())
            .arg("-k")
            .arg(&s.socket_dir)
            .env("PATH", install::path_with(&self.bin_dir())?)
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        Ok(cmd)
    }
}

impl Worker for Database {
    fn health(&self) -> Result<(), WorkerError> {
        let s = &self.settings;
        match wire::probe(&s.host, s.port, &s.user, &s.database).map_err(WorkerError::health)? {
            StartupReply::NotReady { message } => Err(WorkerError::health(message)),
            StartupReply::Refused { code, message } => {
                debug!("Postgres answered startup with {code}: {message}");
                Ok(())
            }
            StartupReply::Accepting => Ok(()),
        }
    }

    fn launch(&self) -> Result<ProcessHandle, WorkerError> {
        probe::assert_free(&self.settings.host, self.settings.port)?;
        Ok(ProcessHandle::spawn(Self::DEFAULT_NAME, &mut self.command()?)?)
    }
}
