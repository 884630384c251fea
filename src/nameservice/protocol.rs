//! Newline-delimited JSON messages exchanged with the name server and with
//! registered services.
use std::io::{self, BufRead, Write};

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::NameServiceError;

/// Request sent to the name server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Register { name: String, address: String },
    Unregister { name: String },
    Lookup { name: String },
    List,
    Ping,
}

/// Name server reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Ok,
    Address { address: String },
    Names { names: Vec<String> },
    NotFound { name: String },
    Error { message: String },
}

/// Request sent to a registered service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ServiceRequest {
    Health,
    Call {
        method: String,
        #[serde(default)]
        params: serde_json::Value,
    },
}

/// Registered service reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ServiceResponse {
    Ok {
        #[serde(default)]
        result: serde_json::Value,
    },
    Error {
        message: String,
    },
}

/// Writes one message followed by a newline.
pub fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), NameServiceError>
where
    W: Write,
    T: Serialize,
{
    let payload = serde_json::to_vec(message)?;
    writer.write_all(&payload)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Reads one message. Returns `None` when the peer closed the connection.
pub fn read_message<R, T>(reader: &mut R) -> Result<Option<T>, NameServiceError>
where
    R: BufRead,
    T: DeserializeOwned,
{
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        if !line.trim().is_empty() {
            break;
        }
    }

    Ok(Some(serde_json::from_str(line.trim())?))
}

/// Reads a message the peer was required to send.
pub fn expect_message<R, T>(reader: &mut R) -> Result<T, NameServiceError>
where
    R: BufRead,
    T: DeserializeOwned,
{
    read_message(reader)?.ok_or_else(|| {
        NameServiceError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed before a reply was received",
        ))
    })
}
