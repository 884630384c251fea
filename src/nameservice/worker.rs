use std::{
    env,
    os::unix::process::CommandExt,
    path::PathBuf,
    process::{Command, Stdio},
};

use serde::Deserialize;

use super::client::NameClient;
use crate::{
    constants::NAME_SERVER_ENTRY, error::WorkerError, manager::Worker, process::ProcessHandle,
};

fn default_host() -> String {
    "localhost".into()
}

fn default_port() -> u16 {
    7604
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("/tmp")
}

/// Settings for a [`NameServerWorker`].
#[derive(Debug, Clone, Deserialize)]
pub struct NameServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory holding the persisted registry.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
    /// Executable providing `serve-names`; the running executable when unset.
    #[serde(default)]
    pub program: Option<PathBuf>,
    #[serde(default)]
    pub process_name: Option<String>,
}

impl Default for NameServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            storage_dir: default_storage_dir(),
            program: None,
            process_name: None,
        }
    }
}

/// Runs the name server as a separate program.
pub struct NameServerWorker {
    settings: NameServerSettings,
    client: NameClient,
}

impl NameServerWorker {
    pub const DEFAULT_NAME: &'static str = "NameServer";

    pub fn new(settings: NameServerSettings) -> Self {
        let client = NameClient::new(settings.host.clone(), settings.port);
        Self { settings, client }
    }

    pub fn settings(&self) -> &NameServerSettings {
        &self.settings
    }

    /// A client for the server this worker runs.
    pub fn client(&self) -> &NameClient {
        &self.client
    }

    pub fn command(&self) -> Result<Command, WorkerError> {
        let s = &self.settings;
        let program = match &s.program {
            Some(program) => program.clone(),
            None => env::current_exe()?,
        };

        let mut cmd = Command::new(program);
        if let Some(name) = &s.process_name {
            cmd.arg0(name);
        }
        cmd.arg("serve-names")
            .arg("--host")
            .arg(&s.host)
            .arg("--port")
            .arg(s.port.to_string())
            .arg("--storage-dir")
            .arg(&s.storage_dir)
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        Ok(cmd)
    }
}

impl Worker for NameServerWorker {
    fn health(&self) -> Result<(), WorkerError> {
        self.client
            .lookup(NAME_SERVER_ENTRY)
            .map(drop)
            .map_err(WorkerError::health)
    }

    fn launch(&self) -> Result<ProcessHandle, WorkerError> {
        Ok(ProcessHandle::spawn(Self::DEFAULT_NAME, &mut self.command()?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_dir_travels_on_the_command_line() {
        let worker = NameServerWorker::new(NameServerSettings {
            port: 7605,
            storage_dir: PathBuf::from("/var/tmp/names"),
            program: Some(PathBuf::from("/usr/local/bin/servermgr")),
            ..NameServerSettings::default()
        });

        let cmd = worker.command().unwrap();
        assert_eq!(cmd.get_program(), "/usr/local/bin/servermgr");
        let args: Vec<_> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            [
                "serve-names",
                "--host",
                "localhost",
                "--port",
                "7605",
                "--storage-dir",
                "/var/tmp/names"
            ]
        );
        assert_eq!(cmd.get_envs().count(), 0);
    }

    #[test]
    fn health_fails_without_a_server() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let worker = NameServerWorker::new(NameServerSettings {
            host: "127.0.0.1".into(),
            port,
            ..NameServerSettings::default()
        });
        assert!(worker.health().is_err());
    }
}
