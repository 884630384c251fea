//! servermgr starts, health-checks and stops the external servers an application
//! depends on: a FastCGI application server, an nginx proxy, a PostgreSQL
//! database and a small name service. Every worker is supervised by the same
//! [`Manager`](manager::Manager) state machine, which turns "the process is
//! running" into "the process is accepting requests" and cleans up on drop.

/// CLI interface.
pub mod cli;

/// Configuration management.
pub mod config;

/// Shared timing and naming constants.
pub mod constants;

/// Error handling.
pub mod error;

/// Worker output capture.
pub mod logs;

/// Supervision state machine.
pub mod manager;

/// Name-lookup service and registered services.
pub mod nameservice;

/// TCP address probes.
pub mod probe;

/// Process handles for spawned and forked workers.
pub mod process;

#[doc(hidden)]
pub mod test_utils;

/// Concrete workers.
pub mod workers;
