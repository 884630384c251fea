//! Services that run in a forked worker and are reachable by name.
use std::{
    io::{self, BufReader},
    net::{TcpListener, TcpStream},
    time::Duration,
};

use serde_json::Value;
use tracing::{debug, error, info};

use super::{
    client::{NameClient, round_trip},
    protocol::{self, ServiceRequest, ServiceResponse},
};
use crate::{
    constants::{NAME_SERVER_READ_TIMEOUT, NAME_SERVICE_TIMEOUT, SERVICE_BIND_HOST},
    error::{BoxError, NameServiceError, WorkerError},
    manager::Worker,
    process::ProcessHandle,
};

/// The object a [`RegisteredService`] exposes to remote callers.
pub trait Service {
    /// Reports whether the service can handle calls.
    fn health(&self) -> Result<(), BoxError> {
        Ok(())
    }

    /// Handles one remote call.
    fn call(&self, method: &str, params: Value) -> Result<Value, BoxError>;
}

/// Caller side of a registered service.
#[derive(Debug, Clone)]
pub struct ServiceProxy {
    host: String,
    port: u16,
    timeout: Duration,
}

impl ServiceProxy {
    /// Proxy for a service listening at `address` (`host:port`).
    pub fn connect(address: &str) -> Result<Self, NameServiceError> {
        let (host, port) = address
            .rsplit_once(':')
            .and_then(|(host, port)| Some((host, port.parse::<u16>().ok()?)))
            .ok_or_else(|| {
                NameServiceError::UnexpectedResponse(format!("malformed address '{address}'"))
            })?;

        Ok(Self {
            host: host.trim_matches(['[', ']']).to_string(),
            port,
            timeout: NAME_SERVICE_TIMEOUT,
        })
    }

    /// Looks `name` up through the name server.
    pub fn locate(names: &NameClient, name: &str) -> Result<Self, NameServiceError> {
        Self::connect(&names.lookup(name)?)
    }

    pub fn health(&self) -> Result<(), NameServiceError> {
        self.request(&ServiceRequest::Health).map(drop)
    }

    pub fn call(&self, method: &str, params: Value) -> Result<Value, NameServiceError> {
        self.request(&ServiceRequest::Call {
            method: method.to_string(),
            params,
        })
    }

    fn request(&self, request: &ServiceRequest) -> Result<Value, NameServiceError> {
        let response: ServiceResponse = round_trip(&self.host, self.port, self.timeout, request)?;
        match response {
            ServiceResponse::Ok { result } => Ok(result),
            ServiceResponse::Error { message } => Err(NameServiceError::Server(message)),
        }
    }
}

/// Runs a [`Service`] in a forked worker registered with a name server.
pub struct RegisteredService<S: Service> {
    name: String,
    service: S,
    names: NameClient,
    process_name: Option<String>,
}

impl<S: Service> RegisteredService<S> {
    pub fn new(name: impl Into<String>, service: S, names: NameClient) -> Self {
        Self {
            name: name.into(),
            service,
            names,
            process_name: None,
        }
    }

    /// Process name shown by `ps` for the forked worker.
    pub fn with_process_name(mut self, process_name: impl Into<String>) -> Self {
        self.process_name = Some(process_name.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Body of the forked worker; returns its exit code.
    fn run(&self) -> i32 {
        match self.serve() {
            Ok(()) => 0,
            Err(err) => {
                error!("Service '{}' stopped: {err}", self.name);
                1
            }
        }
    }

    fn serve(&self) -> Result<(), NameServiceError> {
        // A previous instance may have been killed before it could clean up.
        self.names.unregister(&self.name)?;

        let listener = TcpListener::bind((SERVICE_BIND_HOST, 0))?;
        let address = listener.local_addr()?.to_string();
        self.names.register(&self.name, &address)?;
        info!("Service '{}' registered at {address}", self.name);

        let result = self.accept_loop(&listener);
        let _ = self.names.unregister(&self.name);
        result
    }

    fn accept_loop(&self, listener: &TcpListener) -> Result<(), NameServiceError> {
        loop {
            let stream = match listener.accept() {
                Ok((stream, _)) => stream,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            };
            if let Err(err) = self.serve_connection(stream) {
                debug!("Service '{}' connection ended: {err}", self.name);
            }
        }
    }

    fn serve_connection(&self, stream: TcpStream) -> Result<(), NameServiceError> {
        stream.set_read_timeout(Some(NAME_SERVER_READ_TIMEOUT))?;
        let mut writer = stream.try_clone()?;
        let mut reader = BufReader::new(stream);

        while let Some(request) = protocol::read_message(&mut reader)? {
            let response = self.dispatch(request);
            protocol::write_message(&mut writer, &response)?;
        }
        Ok(())
    }

    fn dispatch(&self, request: ServiceRequest) -> ServiceResponse {
        let result = match request {
            ServiceRequest::Health => self.service.health().map(|()| Value::Null),
            ServiceRequest::Call { method, params } => self.service.call(&method, params),
        };

        match result {
            Ok(result) => ServiceResponse::Ok { result },
            Err(err) => ServiceResponse::Error {
                message: err.to_string(),
            },
        }
    }
}

impl<S: Service> Worker for RegisteredService<S> {
    fn health(&self) -> Result<(), WorkerError> {
        ServiceProxy::locate(&self.names, &self.name)
            .and_then(|proxy| proxy.health())
            .map_err(WorkerError::health)
    }

    fn launch(&self) -> Result<ProcessHandle, WorkerError> {
        self.names.ping().map_err(|err| {
            io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!(
                    "Cannot connect to name server at {}:{}: {err}",
                    self.names.host(),
                    self.names.port()
                ),
            )
        })?;

        // SAFETY: the child only touches its own copy of `self` and sockets it
        // opens itself, then exits without returning into the caller.
        let handle =
            unsafe { ProcessHandle::fork(&self.name, self.process_name.as_deref(), || self.run()) }?;
        Ok(handle)
    }
}
