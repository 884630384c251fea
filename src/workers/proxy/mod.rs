//! nginx as a dedicated reverse proxy and static file server.
pub mod config;

use std::{
    fs,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::debug;

use crate::{
    constants::{NGINX_STATUS_PATH, NGINX_STATUS_PREFIX, PROBE_CONNECT_TIMEOUT},
    error::WorkerError,
    manager::Worker,
    process::ProcessHandle,
};

pub use config::{Mapping, ProxyLayout};

fn default_host() -> String {
    "localhost".into()
}

fn default_port() -> u16 {
    8080
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("/var/tmp/nginx")
}

fn default_program() -> PathBuf {
    PathBuf::from("nginx")
}

/// Settings for a [`ProxyServer`].
#[derive(Debug, Clone, Deserialize)]
pub struct ProxySettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Holds the generated configuration, logs, pid file and temp files.
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    /// Document root; defaults to `base_dir`.
    #[serde(default)]
    pub http_root: Option<PathBuf>,
    #[serde(default = "default_program")]
    pub program: PathBuf,
    #[serde(default)]
    pub mappings: Vec<Mapping>,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_dir: default_base_dir(),
            http_root: None,
            program: default_program(),
            mappings: Vec::new(),
        }
    }
}

pub struct ProxyServer {
    settings: ProxySettings,
    layout: ProxyLayout,
    client: Client,
}

impl ProxyServer {
    pub const DEFAULT_NAME: &'static str = "Nginx";

    pub fn new(mut settings: ProxySettings) -> Result<Self, WorkerError> {
        settings.mappings = settings
            .mappings
            .into_iter()
            .map(|mapping| match mapping {
                Mapping::Filesystem {
                    url_prefix,
                    directory,
                } => Mapping::filesystem(url_prefix, directory),
                other => other,
            })
            .collect();

        let client = Client::builder()
            .timeout(PROBE_CONNECT_TIMEOUT)
            .no_proxy()
            .build()
            .map_err(|err| {
                WorkerError::setup(Self::DEFAULT_NAME, format!("HTTP client unavailable: {err}"))
            })?;

        Ok(Self {
            layout: ProxyLayout::new(&settings.base_dir),
            settings,
            client,
        })
    }

    pub fn settings(&self) -> &ProxySettings {
        &self.settings
    }

    pub fn layout(&self) -> &ProxyLayout {
        &self.layout
    }

    fn http_root(&self) -> &Path {
        self.settings
            .http_root
            .as_deref()
            .unwrap_or(&self.settings.base_dir)
    }

    /// The configuration file contents this proxy runs with.
    pub fn render_config(&self) -> String {
        config::render(
            &self.layout,
            self.http_root(),
            self.settings.port,
            &self.settings.mappings,
        )
    }

    /// Creates the directory layout and writes the configuration file.
    pub fn write_config(&self) -> Result<PathBuf, WorkerError> {
        self.layout.create()?;
        let path = self.layout.config_file();
        fs::write(&path, self.render_config())?;
        debug!("Wrote nginx configuration to {}", path.display());
        Ok(path)
    }

    fn status_url(&self) -> String {
        format!(
            "http://{}:{}{}",
            self.settings.host, self.settings.port, NGINX_STATUS_PATH
        )
    }
}

impl Worker for ProxyServer {
    fn health(&self) -> Result<(), WorkerError> {
        let body = self
            .client
            .get(self.status_url())
            .send()
            .and_then(|response| response.text())
            .map_err(WorkerError::health)?;

        if body.starts_with(NGINX_STATUS_PREFIX) {
            Ok(())
        } else {
            Err(WorkerError::health(format!(
                "unexpected status page: {}",
                body.lines().next().unwrap_or_default()
            )))
        }
    }

    fn launch(&self) -> Result<ProcessHandle, WorkerError> {
        let config_file = self.write_config()?;

        let mut cmd = Command::new(&self.settings.program);
        cmd.arg("-c")
            .arg(&config_file)
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        Ok(ProcessHandle::spawn(Self::DEFAULT_NAME, &mut cmd)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkerErrorKind;
    use std::{
        io::{Read, Write},
        net::TcpListener,
        thread,
    };

    fn serve_once(body: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf);
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).unwrap();
        });
        port
    }

    fn proxy(port: u16, base_dir: PathBuf) -> ProxyServer {
        ProxyServer::new(ProxySettings {
            host: "127.0.0.1".into(),
            port,
            base_dir,
            mappings: vec![Mapping::Filesystem {
                url_prefix: "/static".into(),
                directory: "/srv/static".into(),
            }],
            ..ProxySettings::default()
        })
        .unwrap()
    }

    #[test]
    fn healthy_status_page() {
        let dir = tempfile::tempdir().unwrap();
        let port = serve_once("Active connections: 1 \nserver accepts handled requests\n");
        assert!(proxy(port, dir.path().into()).health().is_ok());
    }

    #[test]
    fn unexpected_status_page_is_unhealthy() {
        let dir = tempfile::tempdir().unwrap();
        let port = serve_once("<html>Welcome to nginx!</html>");
        let err = proxy(port, dir.path().into()).health().unwrap_err();
        assert_eq!(err.kind(), WorkerErrorKind::HealthCheckFailure);
    }

    #[test]
    fn write_config_lays_out_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let proxy = proxy(8080, dir.path().into());

        let path = proxy.write_config().unwrap();
        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("listen 8080;"));
        assert!(written.contains("alias /srv/static/;"));
        assert!(written.contains(&format!("root {};", dir.path().display())));
        assert!(dir.path().join("logs/nginx").is_dir());
    }
}
