//! Concrete workers for the external servers an application depends on.

/// FastCGI application server.
pub mod app_server;

/// PostgreSQL database server.
pub mod database;

/// nginx reverse proxy.
pub mod proxy;

pub use app_server::{AppServer, AppServerSettings};
pub use database::{Database, DatabaseSettings};
pub use proxy::{ProxyServer, ProxySettings};
