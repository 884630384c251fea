//! Constants shared by the supervision core and the concrete workers.

use std::time::Duration;

// ============================================================================
// Readiness and Shutdown Timing
// ============================================================================

/// Default budget for a worker to become healthy after launch.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between liveness/health polls while waiting for readiness.
pub const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How long `stop(true)` waits after SIGTERM before escalating to SIGKILL.
pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Polling interval used by bounded waits on a single process.
pub const PROCESS_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// Connect timeout for TCP address probes.
pub const PROBE_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Read timeout for protocol-level health probes.
pub const PROBE_READ_TIMEOUT: Duration = Duration::from_secs(1);

// ============================================================================
// Diagnostics
// ============================================================================

/// Number of trailing stderr lines retained per worker.
pub const STDERR_TAIL_LINES: usize = 50;

/// How long to wait for a dead worker's stderr reader to drain the pipe.
pub const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// Exit code of a forked worker whose body panicked.
pub const FORKED_PANIC_EXIT_CODE: i32 = 101;

// ============================================================================
// Worker Defaults
// ============================================================================

/// Default name-server registry entry under which the server registers itself.
pub const NAME_SERVER_ENTRY: &str = "servermgr.NameServer";

/// File inside the name-server storage directory holding registrations.
pub const REGISTRY_FILE_NAME: &str = "registry.json";

/// Literal prefix of a healthy nginx `stub_status` page.
pub const NGINX_STATUS_PREFIX: &str = "Active connections:";

/// Status location served by the generated nginx configuration.
pub const NGINX_STATUS_PATH: &str = "/nginx_status";

/// Where Debian-style PostgreSQL installations keep versioned binaries.
pub const POSTGRES_INSTALL_ROOT: &str = "/usr/lib/postgresql";

/// Default unix socket / lock file directory for PostgreSQL.
pub const POSTGRES_SOCKET_DIR: &str = "/var/run/postgresql";

// ============================================================================
// Name Service
// ============================================================================

/// Connect and read timeout for name-service and registered-service clients.
pub const NAME_SERVICE_TIMEOUT: Duration = Duration::from_secs(2);

/// How long the name server waits for a client to send its next request.
pub const NAME_SERVER_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Interface registered services listen on.
pub const SERVICE_BIND_HOST: &str = "127.0.0.1";
