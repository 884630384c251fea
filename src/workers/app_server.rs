//! FastCGI application server worker (a Django project run through `manage.py`).
use std::{
    os::unix::process::CommandExt,
    path::PathBuf,
    process::{Command, Stdio},
};

use serde::Deserialize;

use crate::{
    constants::PROBE_CONNECT_TIMEOUT,
    error::WorkerError,
    manager::Worker,
    probe,
    process::ProcessHandle,
};

fn default_host() -> String {
    "localhost".into()
}

fn default_port() -> u16 {
    8001
}

fn default_python() -> PathBuf {
    PathBuf::from("python3")
}

fn default_pool_size() -> u32 {
    2
}

/// Settings for an [`AppServer`].
#[derive(Debug, Clone, Deserialize)]
pub struct AppServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Dotted name of the settings module.
    pub settings: String,
    /// Project directory; added to the Python path and used as working directory.
    pub app_dir: PathBuf,
    #[serde(default = "default_python")]
    pub python: PathBuf,
    /// Management script, defaults to `<app_dir>/manage.py`.
    #[serde(default)]
    pub manage_script: Option<PathBuf>,
    /// Shown as argv[0] in `ps`.
    #[serde(default)]
    pub process_name: Option<String>,
    #[serde(default = "default_pool_size")]
    pub max_children: u32,
    #[serde(default = "default_pool_size")]
    pub max_spare: u32,
}

/// Runs the project's FastCGI server with a small prefork pool.
pub struct AppServer {
    settings: AppServerSettings,
}

impl AppServer {
    pub const DEFAULT_NAME: &'static str = "DjangoApp";

    pub fn new(settings: AppServerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &AppServerSettings {
        &self.settings
    }

    /// Command line used to launch the worker.
    pub fn command(&self) -> Command {
        let s = &self.settings;
        let script = s
            .manage_script
            .clone()
            .unwrap_or_else(|| s.app_dir.join("manage.py"));

        let mut cmd = Command::new(&s.python);
        if let Some(name) = &s.process_name {
            cmd.arg0(name);
        }
        cmd.arg(script)
            .arg("runfcgi")
            .arg(format!("--settings={}", s.settings))
            .arg(format!("--pythonpath={}", s.app_dir.display()))
            .arg(format!("host={}", s.host))
            .arg(format!("port={}", s.port))
            .arg("method=prefork")
            .arg("daemonize=false")
            .arg(format!("maxchildren={}", s.max_children))
            .arg(format!("maxspare={}", s.max_spare))
            .current_dir(&s.app_dir)
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd
    }
}

impl Worker for AppServer {
    fn health(&self) -> Result<(), WorkerError> {
        probe::connect(&self.settings.host, self.settings.port, PROBE_CONNECT_TIMEOUT)
            .map(drop)
            .map_err(WorkerError::health)
    }

    fn launch(&self) -> Result<ProcessHandle, WorkerError> {
        Ok(ProcessHandle::spawn(Self::DEFAULT_NAME, &mut self.command())?)
    }
}
