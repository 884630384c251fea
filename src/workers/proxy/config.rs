//! Generation of the nginx configuration file for a dedicated proxy instance.
use std::{
    fmt::Write as _,
    fs, io,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::constants::NGINX_STATUS_PATH;

/// How requests under a URL prefix are served.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Mapping {
    /// Serve files from a directory, with autoindex.
    Filesystem { url_prefix: String, directory: String },
    /// Rewrite matching URLs and answer with a permanent redirect.
    Redirect {
        url_prefix: String,
        pattern: String,
        rewrite: String,
    },
    /// Pass requests to a FastCGI server at `destination` (`host:port`).
    #[serde(rename = "fastcgi")]
    FastCgi {
        url_prefix: String,
        destination: String,
    },
    /// Reverse proxy to another HTTP server.
    Http {
        url_prefix: String,
        destination: String,
    },
}

impl Mapping {
    /// Filesystem mapping; the directory always ends with `/`.
    pub fn filesystem(url_prefix: impl Into<String>, directory: impl Into<String>) -> Self {
        let mut directory = directory.into();
        if !directory.ends_with('/') {
            directory.push('/');
        }
        Mapping::Filesystem {
            url_prefix: url_prefix.into(),
            directory,
        }
    }

    pub fn redirect(
        url_prefix: impl Into<String>,
        pattern: impl Into<String>,
        rewrite: impl Into<String>,
    ) -> Self {
        Mapping::Redirect {
            url_prefix: url_prefix.into(),
            pattern: pattern.into(),
            rewrite: rewrite.into(),
        }
    }

    pub fn fastcgi(url_prefix: impl Into<String>, destination: impl Into<String>) -> Self {
        Mapping::FastCgi {
            url_prefix: url_prefix.into(),
            destination: destination.into(),
        }
    }

    pub fn http(url_prefix: impl Into<String>, destination: impl Into<String>) -> Self {
        Mapping::Http {
            url_prefix: url_prefix.into(),
            destination: destination.into(),
        }
    }

    fn render(&self, out: &mut String) {
        // Writing into a String cannot fail.
        let _ = match self {
            Mapping::Filesystem {
                url_prefix,
                directory,
            } => write!(
                out,
                r#"
    location {url_prefix} {{
      alias {directory};
      autoindex on;
    }}
"#
            ),
            Mapping::Redirect {
                url_prefix,
                pattern,
                rewrite,
            } => write!(
                out,
                r#"
    location {url_prefix} {{
      rewrite {pattern} {rewrite} permanent;
    }}
"#
            ),
            Mapping::FastCgi {
                url_prefix,
                destination,
            } => write!(
                out,
                r#"
    location {url_prefix} {{
      fastcgi_buffers 256 8k;
      fastcgi_max_temp_file_size 0;
      fastcgi_pass {destination};
      fastcgi_param PATH_INFO $fastcgi_script_name;
      fastcgi_param REQUEST_METHOD $request_method;
      fastcgi_param QUERY_STRING $query_string;
      fastcgi_param CONTENT_TYPE $content_type;
      fastcgi_param CONTENT_LENGTH $content_length;
      fastcgi_param SERVER_NAME $server_name;
      fastcgi_param SERVER_PORT $server_port;
      fastcgi_param SERVER_PROTOCOL $server_protocol;
      fastcgi_pass_header Authorization;
      fastcgi_intercept_errors off;
    }}
"#
            ),
            Mapping::Http {
                url_prefix,
                destination,
            } => write!(
                out,
                r#"
    location {url_prefix} {{
      proxy_set_header X-Forwarded-Host $host;
      proxy_set_header X-Forwarded-Server $host;
      proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
      proxy_pass {destination};
    }}
"#
            ),
        };
    }
}

/// Directory layout of one proxy instance under its base directory.
#[derive(Debug, Clone)]
pub struct ProxyLayout {
    pub etc_dir: PathBuf,
    pub log_dir: PathBuf,
    pub run_dir: PathBuf,
    pub tmp_dir: PathBuf,
}

impl ProxyLayout {
    pub fn new(base_dir: &Path) -> Self {
        Self {
            etc_dir: base_dir.join("etc").join("nginx"),
            log_dir: base_dir.join("logs").join("nginx"),
            run_dir: base_dir.join("run"),
            tmp_dir: base_dir.join("tmp").join("nginx"),
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.etc_dir.join("nginx.conf")
    }

    pub fn create(&self) -> io::Result<()> {
        for dir in [&self.etc_dir, &self.log_dir, &self.run_dir, &self.tmp_dir] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Renders a complete nginx configuration.
pub fn render(layout: &ProxyLayout, http_root: &Path, port: u16, mappings: &[Mapping]) -> String {
    let mut blocks = String::new();
    for mapping in mappings {
        mapping.render(&mut blocks);
    }

    let log_dir = layout.log_dir.display();
    let run_dir = layout.run_dir.display();
    let tmp_dir = layout.tmp_dir.display();
    let root = http_root.display();

    format!(
        r#"
daemon off;
error_log  {log_dir}/error.log;
pid        {run_dir}/nginx.pid;

events {{
  worker_connections 1024;
}}

http {{
  access_log {log_dir}/access.log;
  client_body_temp_path {tmp_dir} 1 2;
  fastcgi_temp_path {tmp_dir}/fastcgi;
  proxy_temp_path {tmp_dir}/proxy;
  root {root};
  server_name_in_redirect off;

  server {{
    listen {port};

    location {NGINX_STATUS_PATH} {{
      stub_status on;
      access_log off;
      allow 127.0.0.1;
      deny all;
    }}
{blocks}
  }}
}}
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filesystem_directory_gains_trailing_slash() {
        assert_eq!(
            Mapping::filesystem("/static", "/srv/static"),
            Mapping::Filesystem {
                url_prefix: "/static".into(),
                directory: "/srv/static/".into(),
            }
        );
        assert_eq!(
            Mapping::filesystem("/media", "/srv/media/"),
            Mapping::filesystem("/media", "/srv/media")
        );
    }

    #[test]
    fn render_includes_status_location_and_mappings() {
        let layout = ProxyLayout::new(Path::new("/var/tmp/nginx"));
        let config = render(
            &layout,
            Path::new("/srv/www"),
            8080,
            &[
                Mapping::filesystem("/static", "/srv/static"),
                Mapping::fastcgi("/app", "localhost:8001"),
                Mapping::http("/api/", "http://localhost:9000/"),
                Mapping::redirect("/old", "^/old/(.*)$", "/new/$1"),
            ],
        );

        assert!(config.contains("daemon off;"));
        assert!(config.contains("listen 8080;"));
        assert!(config.contains("location /nginx_status {"));
        assert!(config.contains("stub_status on;"));
        assert!(config.contains("error_log  /var/tmp/nginx/logs/nginx/error.log;"));
        assert!(config.contains("pid        /var/tmp/nginx/run/nginx.pid;"));
        assert!(config.contains("root /srv/www;"));
        assert!(config.contains("alias /srv/static/;"));
        assert!(config.contains("fastcgi_pass localhost:8001;"));
        assert!(config.contains("fastcgi_param PATH_INFO $fastcgi_script_name;"));
        assert!(config.contains("proxy_pass http://localhost:9000/;"));
        assert!(config.contains("rewrite ^/old/(.*)$ /new/$1 permanent;"));
    }

    #[test]
    fn mappings_deserialize_from_yaml() {
        let yaml = r#"
- type: filesystem
  url_prefix: /static
  directory: /srv/static/
- type: fastcgi
  url_prefix: /app
  destination: localhost:8001
"#;
        let mappings: Vec<Mapping> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(mappings[1], Mapping::fastcgi("/app", "localhost:8001"));
    }

    #[test]
    fn layout_creates_all_directories() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ProxyLayout::new(dir.path());
        layout.create().unwrap();

        assert!(layout.etc_dir.is_dir());
        assert!(layout.log_dir.is_dir());
        assert!(layout.run_dir.is_dir());
        assert!(layout.tmp_dir.is_dir());
        assert_eq!(layout.config_file(), dir.path().join("etc/nginx/nginx.conf"));
    }
}
