#[path = "common/mod.rs"]
mod common;

use std::{fs, io, net::TcpListener, path::PathBuf, time::Duration};

use servermgr::{
    error::{WorkerError, WorkerErrorKind},
    manager::{Manager, ManagerState, Worker},
    workers::{
        AppServer, AppServerSettings, Database, DatabaseSettings, ProxyServer, ProxySettings,
        proxy::Mapping,
    },
};
use tempfile::tempdir;

#[test]
fn database_reports_address_in_use_before_spawning() {
    let temp = tempdir().expect("failed to create tempdir");
    let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind");
    let port = listener.local_addr().unwrap().port();

    let database = Database::new(DatabaseSettings {
        host: "127.0.0.1".into(),
        port,
        data_dir: temp.path().join("data"),
        version: Some("15".into()),
        install_root: temp.path().join("install"),
        socket_dir: temp.path().to_path_buf(),
        ..DatabaseSettings::default()
    })
    .expect("database settings are valid");

    let mut manager = Manager::new(Database::DEFAULT_NAME, database);
    let err = manager
        .start(true, Duration::from_secs(1))
        .expect_err("port is taken");

    assert_eq!(err.kind(), WorkerErrorKind::AddressInUse);
    assert!(err.to_string().contains(&format!("127.0.0.1:{port}")));
    assert!(manager.pid().is_none());
    assert_eq!(manager.state(), ManagerState::Idle);
}

#[test]
fn database_requires_writable_socket_dir() {
    let temp = tempdir().expect("failed to create tempdir");
    let err = Database::new(DatabaseSettings {
        version: Some("15".into()),
        socket_dir: temp.path().join("missing"),
        ..DatabaseSettings::default()
    })
    .err()
    .expect("socket dir is missing");

    assert_eq!(err.kind(), WorkerErrorKind::Setup);
}

#[test]
fn missing_program_surfaces_the_os_error() {
    let app = AppServer::new(AppServerSettings {
        host: "127.0.0.1".into(),
        port: common::free_port(),
        settings: "hello.settings".into(),
        app_dir: PathBuf::from("/"),
        python: PathBuf::from("/nonexistent/python3"),
        manage_script: None,
        process_name: None,
        max_children: 2,
        max_spare: 2,
    });

    let mut manager = Manager::new(AppServer::DEFAULT_NAME, app);
    let err = manager
        .start(true, Duration::from_secs(1))
        .expect_err("python is missing");

    let WorkerError::Io(io_err) = &err else {
        panic!("expected an I/O error, got {err:?}");
    };
    assert_eq!(io_err.kind(), io::ErrorKind::NotFound);
    assert_eq!(err.to_string(), io_err.to_string());
    assert!(manager.process().is_none());
}

#[test]
fn proxy_writes_its_config_before_launching() {
    let temp = tempdir().expect("failed to create tempdir");
    let proxy = ProxyServer::new(ProxySettings {
        host: "127.0.0.1".into(),
        port: common::free_port(),
        base_dir: temp.path().to_path_buf(),
        program: PathBuf::from("/nonexistent/nginx"),
        mappings: vec![Mapping::fastcgi("/app", "localhost:8001")],
        ..ProxySettings::default()
    })
    .expect("proxy settings are valid");

    let mut manager: Manager<Box<dyn Worker>> =
        Manager::new(ProxyServer::DEFAULT_NAME, Box::new(proxy));
    let err = manager
        .start(false, Duration::from_secs(1))
        .expect_err("nginx is missing");
    assert_eq!(err.kind(), WorkerErrorKind::Io);

    let config = fs::read_to_string(temp.path().join("etc/nginx/nginx.conf"))
        .expect("config written");
    assert!(config.contains("fastcgi_pass localhost:8001;"));
    assert!(temp.path().join("tmp/nginx").is_dir());
}

#[test]
fn unexpected_exit_carries_stderr() {
    let temp = tempdir().expect("failed to create tempdir");

    // `sh` stands in for the interpreter; it fails on the runfcgi arguments.
    let app = AppServer::new(AppServerSettings {
        host: "127.0.0.1".into(),
        port: common::free_port(),
        settings: "hello.settings".into(),
        app_dir: temp.path().to_path_buf(),
        python: PathBuf::from("sh"),
        manage_script: Some(PathBuf::from("/nonexistent/manage.py")),
        process_name: None,
        max_children: 2,
        max_spare: 2,
    });

    let mut manager = Manager::new(AppServer::DEFAULT_NAME, app)
        .with_poll_interval(Duration::from_millis(50));
    let err = manager
        .start(true, Duration::from_secs(5))
        .expect_err("script cannot run");

    match &err {
        WorkerError::ProcessExitedUnexpectedly { name, status, .. } => {
            assert_eq!(name, "DjangoApp");
            assert!(status.is_some_and(|s| !s.success()));
        }
        other => panic!("expected unexpected exit, got {other:?}"),
    }
    assert!(err.to_string().starts_with("DjangoApp: process exited unexpectedly"));
    assert_eq!(manager.state(), ManagerState::Failed);
}
