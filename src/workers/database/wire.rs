//! Minimal PostgreSQL frontend used to tell a starting server from a ready one.
//!
//! Only the first message of the startup exchange is inspected. A server that
//! asks for authentication (or negotiates the protocol version) is accepting
//! sessions; one that answers `57P03 cannot_connect_now` is still starting up or
//! recovering.
use std::{
    io::{self, Read, Write},
    net::TcpStream,
};

use crate::{
    constants::{PROBE_CONNECT_TIMEOUT, PROBE_READ_TIMEOUT},
    probe,
};

const PROTOCOL_VERSION_3: i32 = 196_608;
const CANNOT_CONNECT_NOW: &str = "57P03";
const MAX_ERROR_LEN: usize = 64 * 1024;

/// What the server said in reply to a startup message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupReply {
    /// Authentication request or protocol negotiation.
    Accepting,
    /// The server answered with an error other than "cannot connect now".
    Refused { code: String, message: String },
    /// The server is up but not accepting sessions yet.
    NotReady { message: String },
}

impl StartupReply {
    pub fn is_ready(&self) -> bool {
        !matches!(self, StartupReply::NotReady { .. })
    }
}

/// Connects to `host:port` and performs the first step of a session startup.
pub fn probe(host: &str, port: u16, user: &str, database: &str) -> io::Result<StartupReply> {
    let mut stream = probe::connect(host, port, PROBE_CONNECT_TIMEOUT)?;
    stream.set_read_timeout(Some(PROBE_READ_TIMEOUT))?;
    stream.set_write_timeout(Some(PROBE_READ_TIMEOUT))?;

    stream.write_all(&startup_message(user, database))?;
    let reply = read_reply(&mut stream)?;

    if reply == StartupReply::Accepting {
        let _ = terminate(&mut stream);
    }
    Ok(reply)
}

/// StartupMessage for protocol 3.0.
pub fn startup_message(user: &str, database: &str) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&PROTOCOL_VERSION_3.to_be_bytes());
    for (key, value) in [("user", user), ("database", database)] {
        body.extend_from_slice(key.as_bytes());
        body.push(0);
        body.extend_from_slice(value.as_bytes());
        body.push(0);
    }
    body.push(0);

    let mut message = Vec::with_capacity(body.len() + 4);
    message.extend_from_slice(&((body.len() + 4) as i32).to_be_bytes());
    message.extend_from_slice(&body);
    message
}

fn read_reply<R: Read>(reader: &mut R) -> io::Result<StartupReply> {
    let mut tag = [0u8; 1];
    reader.read_exact(&mut tag)?;

    match tag[0] {
        b'R' | b'v' => Ok(StartupReply::Accepting),
        b'E' => {
            let mut len = [0u8; 4];
            reader.read_exact(&mut len)?;
            let len = i32::from_be_bytes(len);
            let body_len = len
                .checked_sub(4)
                .and_then(|n| usize::try_from(n).ok())
                .filter(|n| *n <= MAX_ERROR_LEN)
                .ok_or_else(|| invalid(format!("bad ErrorResponse length {len}")))?;

            let mut body = vec![0u8; body_len];
            reader.read_exact(&mut body)?;
            let (code, message) = parse_error_fields(&body);

            if code == CANNOT_CONNECT_NOW {
                Ok(StartupReply::NotReady { message })
            } else {
                Ok(StartupReply::Refused { code, message })
            }
        }
        other => Err(invalid(format!(
            "unexpected startup reply type {:?}",
            other as char
        ))),
    }
}

/// Extracts the SQLSTATE (`C`) and message (`M`) fields of an ErrorResponse.
fn parse_error_fields(body: &[u8]) -> (String, String) {
    let mut code = String::new();
    let mut message = String::new();

    for field in body.split(|b| *b == 0) {
        let Some((&kind, value)) = field.split_first() else {
            continue;
        };
        let value = String::from_utf8_lossy(value).into_owned();
        match kind {
            b'C' => code = value,
            b'M' => message = value,
            _ => {}
        }
    }
    (code, message)
}

fn terminate(stream: &mut TcpStream) -> io::Result<()> {
    stream.write_all(&[b'X', 0, 0, 0, 4])
}

fn invalid(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}
