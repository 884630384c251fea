//! TCP address probes used as preconditions and health checks.
use std::{
    io,
    net::{TcpStream, ToSocketAddrs},
    time::Duration,
};

use tracing::trace;

use crate::{constants::PROBE_CONNECT_TIMEOUT, error::WorkerError};

/// Opens a TCP connection to `host:port`, trying every resolved address.
pub fn connect(host: &str, port: u16, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_err = None;
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                trace!("connect to {addr} failed: {err}");
                last_err = Some(err);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("{host}:{port} did not resolve to any address"),
        )
    }))
}

/// Returns `true` if something currently accepts connections on `host:port`.
pub fn is_listening(host: &str, port: u16) -> bool {
    connect(host, port, PROBE_CONNECT_TIMEOUT).is_ok()
}

/// Fails with [`WorkerError::AddressInUse`] if `host:port` already has a listener.
///
/// The check and the worker's later bind are not atomic; two callers may both
/// observe the address as free.
pub fn assert_free(host: &str, port: u16) -> Result<(), WorkerError> {
    if is_listening(host, port) {
        return Err(WorkerError::AddressInUse {
            host: host.to_string(),
            port,
        });
    }
    Ok(())
}
