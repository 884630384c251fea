//! A small name-lookup service and the services that register with it.
//!
//! The [`NameServer`] maps names to `host:port` addresses and persists them in
//! its storage directory. [`NameServerWorker`] supervises it as an external
//! program, and [`RegisteredService`] runs an in-process [`Service`] in a forked
//! worker that registers itself under a name.
pub mod client;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod service;
pub mod worker;

pub use client::NameClient;
pub use server::NameServer;
pub use service::{RegisteredService, Service, ServiceProxy};
pub use worker::{NameServerSettings, NameServerWorker};
