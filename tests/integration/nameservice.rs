#[path = "common/mod.rs"]
mod common;

use std::{path::PathBuf, time::Duration};

use serde_json::{Value, json};
use servermgr::{
    constants::NAME_SERVER_ENTRY,
    error::BoxError,
    manager::{Manager, ManagerState},
    nameservice::{
        NameClient, NameServerSettings, NameServerWorker, RegisteredService, Service,
        ServiceProxy,
    },
};
use tempfile::tempdir;

struct Echo;

impl Service for Echo {
    fn call(&self, method: &str, params: Value) -> Result<Value, BoxError> {
        match method {
            "echo" => Ok(params),
            "pid" => Ok(json!(std::process::id())),
            other => Err(format!("unknown method '{other}'").into()),
        }
    }
}

fn name_server(port: u16, storage_dir: PathBuf) -> Manager<NameServerWorker> {
    let worker = NameServerWorker::new(NameServerSettings {
        host: "127.0.0.1".into(),
        port,
        storage_dir,
        program: Some(PathBuf::from(env!("CARGO_BIN_EXE_servermgr"))),
        process_name: None,
    });
    Manager::new(NameServerWorker::DEFAULT_NAME, worker)
        .with_poll_interval(Duration::from_millis(100))
}

#[test]
fn registered_service_is_reachable_by_name() {
    let temp = tempdir().expect("failed to create tempdir");
    let port = common::free_port();

    let mut names = name_server(port, temp.path().to_path_buf());
    names
        .start(true, Duration::from_secs(10))
        .expect("name server starts");
    assert_eq!(names.state(), ManagerState::Ready);

    let client = NameClient::new("127.0.0.1", port);
    let mut service = Manager::new(
        "echo",
        RegisteredService::new("test.echo", Echo, client.clone()),
    )
    .with_poll_interval(Duration::from_millis(100));
    service
        .start(true, Duration::from_secs(10))
        .expect("service starts");

    let proxy = ServiceProxy::locate(&client, "test.echo").expect("service registered");
    assert_eq!(
        proxy.call("echo", json!({"hello": "world"})).unwrap(),
        json!({"hello": "world"})
    );
    assert_eq!(
        proxy.call("pid", Value::Null).unwrap(),
        json!(service.pid().unwrap())
    );
    assert!(proxy.call("explode", Value::Null).is_err());

    let registered = client.list().unwrap();
    assert!(registered.contains(&"test.echo".to_string()));
    assert!(registered.contains(&NAME_SERVER_ENTRY.to_string()));

    let service_pid = service.pid().unwrap();
    service.stop(true);
    common::wait_until("service exit", || !common::is_alive(service_pid));
    names.stop(true);
}

#[test]
fn registrations_survive_a_restart() {
    let temp = tempdir().expect("failed to create tempdir");
    let port = common::free_port();

    {
        let mut names = name_server(port, temp.path().to_path_buf());
        names
            .start(true, Duration::from_secs(10))
            .expect("name server starts");
        NameClient::new("127.0.0.1", port)
            .register("test.kept", "127.0.0.1:41000")
            .unwrap();
    }

    let mut names = name_server(port, temp.path().to_path_buf());
    names
        .start(true, Duration::from_secs(10))
        .expect("name server restarts");
    assert_eq!(
        NameClient::new("127.0.0.1", port)
            .lookup("test.kept")
            .unwrap(),
        "127.0.0.1:41000"
    );
}
