//! Locating a PostgreSQL installation and preparing data directories.
use std::{
    env,
    ffi::OsString,
    fs, io,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use nix::unistd::{AccessFlags, access};
use tracing::{debug, info};

use crate::error::WorkerError;

use super::Database;

/// Picks the numerically highest version directory under `install_root`.
///
/// Directory names that are not dotted numbers are ignored.
pub fn discover_version(install_root: &Path) -> Option<String> {
    let entries = fs::read_dir(install_root).ok()?;

    entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter_map(|name| parse_version(&name).map(|key| (key, name)))
        .max()
        .map(|(_, name)| name)
}

fn parse_version(name: &str) -> Option<Vec<u64>> {
    name.split('.').map(|part| part.parse().ok()).collect()
}

/// Directory holding the binaries of one installed version.
pub fn bin_dir(install_root: &Path, version: &str) -> PathBuf {
    install_root.join(version).join("bin")
}

/// The current `PATH` with `bin_dir` appended, for a child command's environment.
pub fn path_with(bin_dir: &Path) -> Result<OsString, WorkerError> {
    let mut paths: Vec<PathBuf> = env::var_os("PATH")
        .map(|path| env::split_paths(&path).collect())
        .unwrap_or_default();
    paths.push(bin_dir.to_path_buf());

    env::join_paths(paths).map_err(|err| {
        WorkerError::setup(
            Database::DEFAULT_NAME,
            format!("cannot add {} to PATH: {err}", bin_dir.display()),
        )
    })
}

/// Fails unless the server will be able to create its socket and lock files.
pub fn check_socket_dir(socket_dir: &Path) -> Result<(), WorkerError> {
    access(socket_dir, AccessFlags::W_OK).map_err(|_| {
        WorkerError::setup(
            Database::DEFAULT_NAME,
            format!(
                "write access to the socket directory {} is required",
                socket_dir.display()
            ),
        )
    })
}

/// Runs `initdb` for `data_dir` and returns its informational output.
///
/// Warnings on stderr are folded into the returned messages; any other stderr
/// output or a failed exit is reported as a setup error.
pub fn initialize_data_dir(data_dir: &Path, bin_dir: &Path) -> Result<String, WorkerError> {
    info!("Initializing database directory {}", data_dir.display());

    let output = Command::new("initdb")
        .arg("-D")
        .arg(data_dir)
        .env("PATH", path_with(bin_dir)?)
        .stdin(Stdio::null())
        .output()
        .map_err(|err| {
            io::Error::new(
                err.kind(),
                format!("initdb: {err}; added path element: {}", bin_dir.display()),
            )
        })?;

    let mut messages = String::from_utf8_lossy(&output.stdout).into_owned();
    let mut errors = String::from_utf8_lossy(&output.stderr).into_owned();
    if errors.contains("WARNING") {
        messages.push_str(&errors);
        errors.clear();
    }

    if !errors.trim().is_empty() {
        return Err(WorkerError::setup(Database::DEFAULT_NAME, errors.trim()));
    }
    if !output.status.success() {
        return Err(WorkerError::setup(
            Database::DEFAULT_NAME,
            format!("initdb failed ({})", output.status),
        ));
    }

    debug!("initdb output: {messages}");
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkerErrorKind;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    fn fake_initdb(install_root: &Path, version: &str, script: &str) -> PathBuf {
        let bin = bin_dir(install_root, version);
        fs::create_dir_all(&bin).unwrap();
        let path = bin.join("initdb");
        fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        bin
    }

    #[test]
    fn highest_numeric_version_wins() {
        let root = tempdir().unwrap();
        for name in ["9.6", "12", "10", "14beta", "lib"] {
            fs::create_dir(root.path().join(name)).unwrap();
        }
        fs::write(root.path().join("99"), "not a directory").unwrap();

        assert_eq!(discover_version(root.path()).as_deref(), Some("12"));
    }

    #[test]
    fn no_version_without_numeric_directories() {
        let root = tempdir().unwrap();
        fs::create_dir(root.path().join("common")).unwrap();

        assert_eq!(discover_version(root.path()), None);
        assert_eq!(discover_version(&root.path().join("missing")), None);
    }

    #[test]
    fn bin_dir_is_appended_to_path() {
        let bin = Path::new("/usr/lib/postgresql/15/bin");
        let path = path_with(bin).unwrap();
        let last = env::split_paths(&path).last().unwrap();
        assert_eq!(last, bin);
    }

    #[test]
    fn unwritable_socket_dir_is_rejected() {
        let root = tempdir().unwrap();
        assert!(check_socket_dir(root.path()).is_ok());

        let err = check_socket_dir(&root.path().join("missing")).unwrap_err();
        assert_eq!(err.kind(), WorkerErrorKind::Setup);
        assert!(err.to_string().starts_with("Postgres: write access"));
    }

    #[test]
    fn initdb_warnings_are_informational() {
        let root = tempdir().unwrap();
        let bin = fake_initdb(
            root.path(),
            "15",
            r#"mkdir -p "$2"; echo "files belong to $USER"; echo "WARNING: enabling trust" >&2"#,
        );
        let data_dir = root.path().join("data");

        let messages = initialize_data_dir(&data_dir, &bin).unwrap();
        assert!(messages.contains("WARNING: enabling trust"));
        assert!(data_dir.is_dir());
    }

    #[test]
    fn initdb_errors_are_setup_failures() {
        let root = tempdir().unwrap();
        let bin = fake_initdb(
            root.path(),
            "15",
            r#"echo "initdb: directory exists but is not empty" >&2; exit 1"#,
        );

        let err = initialize_data_dir(&root.path().join("data"), &bin).unwrap_err();
        assert_eq!(err.kind(), WorkerErrorKind::Setup);
        assert!(err.to_string().contains("not empty"));
    }
}
