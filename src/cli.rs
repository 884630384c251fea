//! Command-line interface for servermgr.
use std::{path::PathBuf, str::FromStr, time::Duration};

use clap::{Parser, Subcommand};
use tracing::{info, level_filters::LevelFilter, warn};

use crate::{config::parse_duration, workers::proxy::Mapping};

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            let level = match number {
                0 => LevelFilter::OFF,
                1 => LevelFilter::ERROR,
                2 => LevelFilter::WARN,
                3 => LevelFilter::INFO,
                4 => LevelFilter::DEBUG,
                5 => LevelFilter::TRACE,
                _ => {
                    return Err(format!(
                        "unsupported log level number '{number}' (expected 0-5)"
                    ));
                }
            };

            return Ok(LogLevelArg(level));
        }

        let lowercase = trimmed.to_ascii_lowercase();
        let level = match lowercase.as_str() {
            "off" => Some(LevelFilter::OFF),
            "error" | "err" => Some(LevelFilter::ERROR),
            "warn" | "warning" => Some(LevelFilter::WARN),
            "info" | "information" => Some(LevelFilter::INFO),
            "debug" => Some(LevelFilter::DEBUG),
            "trace" => Some(LevelFilter::TRACE),
            _ => None,
        }
        .ok_or_else(|| format!("invalid log level '{trimmed}'"))?;

        Ok(LogLevelArg(level))
    }
}

fn parse_timeout(value: &str) -> Result<Duration, String> {
    parse_duration(value).map_err(|err| err.to_string())
}

/// Command-line interface for servermgr.
#[derive(Parser)]
#[command(name = "servermgr", version, author)]
#[command(about = "Start, health-check and stop the servers an application depends on", long_about = None)]
pub struct Cli {
    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevelArg>,

    /// How long to wait for each worker to become ready (e.g., "10", "500ms", "1m").
    #[arg(long, value_name = "DURATION", global = true, value_parser = parse_timeout)]
    pub timeout: Option<Duration>,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for servermgr.
#[derive(Subcommand)]
pub enum Commands {
    /// Start every worker in a configuration file and supervise them until interrupted.
    Up {
        /// Path to the configuration file.
        #[arg(short, long, default_value = "servermgr.yaml")]
        config: PathBuf,
    },

    /// Run a PostgreSQL server on a private data directory.
    Database {
        /// Listener hostname.
        #[arg(short = 'H', long, default_value = "localhost")]
        host: String,

        /// Listener port.
        #[arg(short, long, default_value_t = 15432)]
        port: u16,

        /// Data directory.
        #[arg(short, long, env = "POSTGRES_DATA", default_value = "/var/tmp/pg_data")]
        data_dir: PathBuf,

        /// Initialize the data directory if it does not exist.
        #[arg(short, long)]
        init: bool,

        /// PostgreSQL version to run (defaults to the newest installed).
        #[arg(long = "pg-version", env = "POSTGRES_VERSION")]
        pg_version: Option<String>,

        /// Directory for the server's unix socket and lock file.
        #[arg(long, default_value = crate::constants::POSTGRES_SOCKET_DIR)]
        socket_dir: PathBuf,

        /// Root of the versioned PostgreSQL installations.
        #[arg(long, default_value = crate::constants::POSTGRES_INSTALL_ROOT)]
        install_root: PathBuf,
    },

    /// Run nginx as a reverse proxy and static file server.
    #[command(after_help = PROXY_MAPPING_HELP)]
    Proxy {
        /// Listener hostname.
        #[arg(short = 'H', long, default_value = "localhost")]
        host: String,

        /// Listener port.
        #[arg(short, long, default_value_t = 8080)]
        port: u16,

        /// Directory for the config file, log files and temp files.
        #[arg(short, long, default_value = "/var/tmp/nginx")]
        data_dir: PathBuf,

        /// Add a filesystem mapping: PREFIX,DIRECTORY.
        #[arg(long, value_name = "MAPPING")]
        fsmap: Vec<String>,

        /// Add a redirect: PREFIX,PATTERN,REWRITE.
        #[arg(long, value_name = "MAPPING")]
        redirect: Vec<String>,

        /// Add a FastCGI mapping: PREFIX,HOST:PORT.
        #[arg(long, value_name = "MAPPING")]
        fcgi: Vec<String>,

        /// Add an HTTP reverse proxy mapping: PREFIX,URL.
        #[arg(long, value_name = "MAPPING")]
        http: Vec<String>,

        /// nginx executable.
        #[arg(long, default_value = "nginx")]
        program: PathBuf,

        /// Print the generated config file and exit.
        #[arg(long)]
        config: bool,
    },

    /// Run a Django project as a FastCGI server.
    App {
        /// Listener hostname.
        #[arg(short = 'H', long, default_value = "localhost")]
        host: String,

        /// Listener port.
        #[arg(short, long, default_value_t = 8001)]
        port: u16,

        /// Settings module name.
        #[arg(short, long)]
        settings: String,

        /// Project directory containing `manage.py`.
        #[arg(short, long)]
        app_dir: PathBuf,

        /// Python interpreter.
        #[arg(long, default_value = "python3")]
        python: PathBuf,

        /// Process name shown by `ps`.
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Run the name server and supervise it.
    Nameserver {
        /// Listener hostname.
        #[arg(short = 'H', long, default_value = "localhost")]
        host: String,

        /// Listener port.
        #[arg(short, long, default_value_t = 7604)]
        port: u16,

        /// Directory holding the registry.
        #[arg(short, long, default_value = "/tmp")]
        data_dir: PathBuf,
    },

    /// Serve the name registry in the foreground.
    #[command(hide = true)]
    ServeNames {
        #[arg(long, default_value = "localhost")]
        host: String,

        #[arg(long, default_value_t = 7604)]
        port: u16,

        #[arg(long, default_value = "/tmp")]
        storage_dir: PathBuf,
    },
}

const PROXY_MAPPING_HELP: &str = "\
Mappings:
  --fsmap=/some_url_prefix,/some_directory       serve files from a directory
  --fcgi=/some_url_prefix,host:port              pass requests to a FastCGI server
  --http=/url_prefix,http://other_server/        reverse proxy to another HTTP server
  --redirect=/url_prefix,pattern,rewrite         rewrite and redirect";

/// Turns `--fsmap`, `--redirect`, `--fcgi` and `--http` values into mappings.
///
/// Values with the wrong number of comma-separated parts are skipped with a
/// warning.
pub fn proxy_mappings(
    fsmap: &[String],
    redirect: &[String],
    fcgi: &[String],
    http: &[String],
) -> Vec<Mapping> {
    let mut mappings = Vec::new();

    for value in fsmap {
        if let &[prefix, directory] = split_parts(value, 2).as_slice() {
            info!("mapping url prefix '{prefix}' to directory '{directory}'");
            mappings.push(Mapping::filesystem(prefix, directory));
        }
    }

    for value in redirect {
        if let &[prefix, pattern, rewrite] = split_parts(value, 3).as_slice() {
            info!("with url prefix '{prefix}', mapping pattern '{pattern}' to target '{rewrite}'");
            mappings.push(Mapping::redirect(prefix, pattern, rewrite));
        }
    }

    for value in http {
        if let &[prefix, destination] = split_parts(value, 2).as_slice() {
            let prefix = with_trailing_slash(prefix);
            let destination = with_trailing_slash(destination);
            info!("reverse proxy url prefix '{prefix}' to '{destination}'");
            mappings.push(Mapping::http(prefix, destination));
        }
    }

    for value in fcgi {
        if let &[prefix, destination] = split_parts(value, 2).as_slice() {
            info!("FastCGI url prefix '{prefix}' to '{destination}'");
            mappings.push(Mapping::fastcgi(prefix, destination));
        }
    }

    mappings
}

fn split_parts(value: &str, expected: usize) -> Vec<&str> {
    let parts: Vec<&str> = value.split(',').collect();
    if parts.len() != expected {
        warn!("cannot process parameter '{value}', skipping...");
        return Vec::new();
    }
    parts
}

fn with_trailing_slash(value: &str) -> String {
    if value.ends_with('/') {
        value.to_string()
    } else {
        format!("{value}/")
    }
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::env_lock;

    #[test]
    fn log_level_accepts_names_and_numbers() {
        assert_eq!(LogLevelArg::from_str("4").unwrap().as_str(), "debug");
        assert_eq!(LogLevelArg::from_str(" Warning ").unwrap().as_str(), "warn");
        assert!(LogLevelArg::from_str("9").is_err());
        assert!(LogLevelArg::from_str("loud").is_err());
    }

    #[test]
    fn timeout_is_global() {
        let cli = Cli::try_parse_from(["servermgr", "nameserver", "--timeout", "2m"]).unwrap();
        assert_eq!(cli.timeout, Some(Duration::from_secs(120)));
        assert!(Cli::try_parse_from(["servermgr", "--timeout", "soon", "nameserver"]).is_err());
    }

    #[test]
    fn database_defaults() {
        let _guard = env_lock();
        unsafe {
            std::env::remove_var("POSTGRES_DATA");
            std::env::remove_var("POSTGRES_VERSION");
        }

        let cli = Cli::try_parse_from(["servermgr", "database"]).unwrap();
        match cli.command {
            Commands::Database {
                host,
                port,
                data_dir,
                init,
                pg_version,
                ..
            } => {
                assert_eq!(host, "localhost");
                assert_eq!(port, 15432);
                assert_eq!(data_dir, PathBuf::from("/var/tmp/pg_data"));
                assert!(!init);
                assert_eq!(pg_version, None);
            }
            _ => panic!("expected database command"),
        }
    }

    #[test]
    fn database_reads_environment() {
        let _guard = env_lock();
        unsafe {
            std::env::set_var("POSTGRES_DATA", "/srv/pg");
            std::env::set_var("POSTGRES_VERSION", "15");
        }

        let cli = Cli::try_parse_from(["servermgr", "database", "--init"]).unwrap();
        unsafe {
            std::env::remove_var("POSTGRES_DATA");
            std::env::remove_var("POSTGRES_VERSION");
        }

        match cli.command {
            Commands::Database {
                data_dir,
                init,
                pg_version,
                ..
            } => {
                assert_eq!(data_dir, PathBuf::from("/srv/pg"));
                assert!(init);
                assert_eq!(pg_version.as_deref(), Some("15"));
            }
            _ => panic!("expected database command"),
        }
    }

    #[test]
    fn proxy_accepts_repeated_mappings() {
        let cli = Cli::try_parse_from([
            "servermgr",
            "proxy",
            "--fsmap",
            "/static,/srv/static",
            "--fsmap=/media,/srv/media",
            "--fcgi",
            "/app,localhost:8001",
        ])
        .unwrap();
        match cli.command {
            Commands::Proxy { fsmap, fcgi, .. } => {
                assert_eq!(fsmap.len(), 2);
                assert_eq!(fcgi, vec!["/app,localhost:8001".to_string()]);
            }
            _ => panic!("expected proxy command"),
        }
    }

    #[test]
    fn malformed_mappings_are_skipped() {
        let mappings = proxy_mappings(
            &["/static,/srv/static".into(), "/broken".into()],
            &["/old,^/old/(.*)$,/new/$1".into(), "/old,only-pattern".into()],
            &["/app,localhost:8001,extra".into()],
            &["/api,http://localhost:9000".into()],
        );

        assert_eq!(
            mappings,
            vec![
                Mapping::filesystem("/static", "/srv/static/"),
                Mapping::redirect("/old", "^/old/(.*)$", "/new/$1"),
                Mapping::http("/api/", "http://localhost:9000/"),
            ]
        );
    }

    #[test]
    fn serve_names_is_hidden_but_parses() {
        let cli = Cli::try_parse_from([
            "servermgr",
            "serve-names",
            "--port",
            "7605",
            "--storage-dir",
            "/var/tmp/names",
        ])
        .unwrap();
        match cli.command {
            Commands::ServeNames {
                port, storage_dir, ..
            } => {
                assert_eq!(port, 7605);
                assert_eq!(storage_dir, PathBuf::from("/var/tmp/names"));
            }
            _ => panic!("expected serve-names command"),
        }
    }
}
