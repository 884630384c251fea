use assert_cmd::Command;
use predicates::prelude::*;
use predicates::str::contains;
use std::fs;
use tempfile::tempdir;

#[test]
fn proxy_prints_generated_config() {
    let temp = tempdir().expect("failed to create tempdir");

    Command::new(assert_cmd::cargo::cargo_bin!("servermgr"))
        .arg("proxy")
        .arg("--data-dir")
        .arg(temp.path())
        .arg("--fsmap")
        .arg("/static,/srv/static")
        .arg("--http")
        .arg("/api,http://localhost:9000")
        .arg("--fcgi")
        .arg("/broken")
        .arg("--config")
        .assert()
        .success()
        .stdout(
            contains("Generated config file:")
                .and(contains("listen 8080;"))
                .and(contains("alias /srv/static/;"))
                .and(contains("proxy_pass http://localhost:9000/;"))
                .and(contains("location /nginx_status"))
                .and(contains("fastcgi_pass").not()),
        )
        .stderr(contains("cannot process parameter '/broken'"));

    assert!(!temp.path().join("etc").exists());
}

#[test]
fn help_lists_launchers_but_not_internal_commands() {
    Command::new(assert_cmd::cargo::cargo_bin!("servermgr"))
        .arg("--help")
        .assert()
        .success()
        .stdout(
            contains("database")
                .and(contains("proxy"))
                .and(contains("nameserver"))
                .and(contains("serve-names").not()),
        );
}

#[test]
fn database_rejects_unwritable_socket_dir() {
    let temp = tempdir().expect("failed to create tempdir");

    Command::new(assert_cmd::cargo::cargo_bin!("servermgr"))
        .arg("database")
        .arg("--socket-dir")
        .arg(temp.path().join("missing"))
        .arg("--pg-version")
        .arg("15")
        .assert()
        .failure()
        .stderr(contains("write access"));
}

#[test]
fn up_reports_missing_config() {
    let temp = tempdir().expect("failed to create tempdir");

    Command::new(assert_cmd::cargo::cargo_bin!("servermgr"))
        .arg("up")
        .arg("--config")
        .arg(temp.path().join("absent.yaml"))
        .assert()
        .failure()
        .stderr(contains("absent.yaml"));
}

#[test]
fn up_reports_missing_environment_variable() {
    let temp = tempdir().expect("failed to create tempdir");
    let config = temp.path().join("servermgr.yaml");
    fs::write(
        &config,
        r#"version: "1"
workers:
  - kind: name_server
    storage_dir: ${SERVERMGR_CLI_TEST_UNSET}
"#,
    )
    .expect("failed to write config");

    Command::new(assert_cmd::cargo::cargo_bin!("servermgr"))
        .arg("up")
        .arg("-c")
        .arg(&config)
        .env_remove("SERVERMGR_CLI_TEST_UNSET")
        .assert()
        .failure()
        .stderr(contains("SERVERMGR_CLI_TEST_UNSET"));
}
