use std::{io::BufReader, net::TcpStream, time::Duration};

use serde::{Serialize, de::DeserializeOwned};

use super::protocol::{self, Request, Response};
use crate::{constants::NAME_SERVICE_TIMEOUT, error::NameServiceError, probe};

/// Opens a connection, sends `request` and reads a single reply.
pub(crate) fn round_trip<Q, A>(
    host: &str,
    port: u16,
    timeout: Duration,
    request: &Q,
) -> Result<A, NameServiceError>
where
    Q: Serialize,
    A: DeserializeOwned,
{
    let mut stream: TcpStream = probe::connect(host, port, timeout)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;

    protocol::write_message(&mut stream, request)?;
    protocol::expect_message(&mut BufReader::new(stream))
}

/// Client for a [`NameServer`](super::NameServer). Each call uses its own connection.
#[derive(Debug, Clone)]
pub struct NameClient {
    host: String,
    port: u16,
    timeout: Duration,
}

impl NameClient {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: NAME_SERVICE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn request(&self, request: &Request) -> Result<Response, NameServiceError> {
        let response: Response = round_trip(&self.host, self.port, self.timeout, request)?;
        match response {
            Response::Error { message } => Err(NameServiceError::Server(message)),
            response => Ok(response),
        }
    }

    pub fn ping(&self) -> Result<(), NameServiceError> {
        match self.request(&Request::Ping)? {
            Response::Ok => Ok(()),
            _ => Err(self.unexpected()),
        }
    }

    pub fn register(&self, name: &str, address: &str) -> Result<(), NameServiceError> {
        let request = Request::Register {
            name: name.to_string(),
            address: address.to_string(),
        };
        match self.request(&request)? {
            Response::Ok => Ok(()),
            _ => Err(self.unexpected()),
        }
    }

    /// Removes `name`; returns whether it was registered.
    pub fn unregister(&self, name: &str) -> Result<bool, NameServiceError> {
        let request = Request::Unregister {
            name: name.to_string(),
        };
        match self.request(&request)? {
            Response::Ok => Ok(true),
            Response::NotFound { .. } => Ok(false),
            _ => Err(self.unexpected()),
        }
    }

    /// Address registered under `name`.
    pub fn lookup(&self, name: &str) -> Result<String, NameServiceError> {
        let request = Request::Lookup {
            name: name.to_string(),
        };
        match self.request(&request)? {
            Response::Address { address } => Ok(address),
            Response::NotFound { name } => Err(NameServiceError::NotFound(name)),
            _ => Err(self.unexpected()),
        }
    }

    pub fn list(&self) -> Result<Vec<String>, NameServiceError> {
        match self.request(&Request::List)? {
            Response::Names { names } => Ok(names),
            _ => Err(self.unexpected()),
        }
    }

    fn unexpected(&self) -> NameServiceError {
        NameServiceError::UnexpectedResponse(format!("name server {}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        constants::NAME_SERVER_ENTRY,
        nameservice::{NameServer, registry::Registry},
    };
    use std::{net::TcpListener, thread};

    fn spawn_server() -> NameClient {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut server = NameServer::with_registry(listener, Registry::in_memory()).unwrap();
        thread::spawn(move || server.serve());
        NameClient::new("127.0.0.1", port)
    }

    #[test]
    fn client_round_trips_through_a_server() {
        let client = spawn_server();
        client.ping().unwrap();

        client.register("crawler", "127.0.0.1:41000").unwrap();
        assert_eq!(client.lookup("crawler").unwrap(), "127.0.0.1:41000");
        assert!(client.list().unwrap().contains(&NAME_SERVER_ENTRY.to_string()));

        assert!(client.unregister("crawler").unwrap());
        assert!(!client.unregister("crawler").unwrap());
        assert!(matches!(
            client.lookup("crawler"),
            Err(NameServiceError::NotFound(name)) if name == "crawler"
        ));
    }

    #[test]
    fn unreachable_server_is_an_io_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let client = NameClient::new("127.0.0.1", port);
        assert!(matches!(client.ping(), Err(NameServiceError::Io(_))));
    }
}
