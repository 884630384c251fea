use std::{
    io::{BufReader, ErrorKind},
    net::{SocketAddr, TcpListener, TcpStream},
    path::Path,
};

use tracing::{debug, info, warn};

use super::{
    protocol::{self, Request, Response},
    registry::Registry,
};
use crate::{
    constants::{NAME_SERVER_ENTRY, NAME_SERVER_READ_TIMEOUT},
    error::NameServiceError,
};

/// Registry server. Connections are served one at a time.
pub struct NameServer {
    listener: TcpListener,
    registry: Registry,
}

impl NameServer {
    /// Binds `host:port`, loads the registry from `storage_dir` and registers
    /// the server under its well-known name.
    pub fn bind(host: &str, port: u16, storage_dir: &Path) -> Result<Self, NameServiceError> {
        let listener = TcpListener::bind((host, port))?;
        let registry = Registry::open(storage_dir)?;
        Self::with_registry(listener, registry)
    }

    pub fn with_registry(
        listener: TcpListener,
        mut registry: Registry,
    ) -> Result<Self, NameServiceError> {
        let address = listener.local_addr()?;
        registry.register(NAME_SERVER_ENTRY, &address.to_string())?;
        info!("Name server listening on {address}");
        Ok(Self { listener, registry })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NameServiceError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Accepts and serves connections until accepting fails.
    pub fn serve(&mut self) -> Result<(), NameServiceError> {
        loop {
            let (stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            };

            if let Err(err) = self.serve_connection(stream) {
                debug!("Connection from {peer} ended: {err}");
            }
        }
    }

    fn serve_connection(&mut self, stream: TcpStream) -> Result<(), NameServiceError> {
        stream.set_read_timeout(Some(NAME_SERVER_READ_TIMEOUT))?;
        let mut writer = stream.try_clone()?;
        let mut reader = BufReader::new(stream);

        while let Some(request) = protocol::read_message::<_, Request>(&mut reader)? {
            let response = self.handle(request);
            protocol::write_message(&mut writer, &response)?;
        }
        Ok(())
    }

    /// Applies one request to the registry.
    pub fn handle(&mut self, request: Request) -> Response {
        let result = match request {
            Request::Register { name, address } => {
                debug!("Registering '{name}' at {address}");
                self.registry.register(&name, &address).map(|()| Response::Ok)
            }
            Request::Unregister { name } => match self.registry.unregister(&name) {
                Ok(true) => Ok(Response::Ok),
                Ok(false) => Ok(Response::NotFound { name }),
                Err(err) => Err(err),
            },
            Request::Lookup { name } => Ok(match self.registry.lookup(&name) {
                Some(address) => Response::Address {
                    address: address.to_string(),
                },
                None => Response::NotFound { name },
            }),
            Request::List => Ok(Response::Names {
                names: self.registry.names(),
            }),
            Request::Ping => Ok(Response::Ok),
        };

        result.unwrap_or_else(|err| {
            warn!("Name server request failed: {err}");
            Response::Error {
                message: err.to_string(),
            }
        })
    }
}
