//! # Grant Executors
//!
//! [`RconExecutor`] runs grant commands on the game server console over the
//! Source RCON protocol. [`LogExecutor`] only logs them.
//!
//! ## Wire Format
//!
//! ```text
//! i32 LE  length   (id + type + body + 2 NULs)
//! i32 LE  id
//! i32 LE  type     3 = login, 2 = command / login response, 0 = response
//! [u8]    body     ASCII, NUL-terminated, followed by one empty NUL
//! ```
//!
//! A login response whose id is `-1` means the password was rejected.
//! Each grant order opens its own connection.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use tanglecart::config::RconSection;
use tanglecart::transaction::{ActionExecutor, ActionSession, GrantError};

const PACKET_LOGIN: i32 = 3;
const PACKET_COMMAND: i32 = 2;
const PACKET_AUTH_RESPONSE: i32 = 2;
const PACKET_RESPONSE: i32 = 0;

/// id + type + the two trailing NULs.
const PACKET_OVERHEAD: usize = 10;
/// Largest response body servers send in one packet.
const MAX_RESPONSE_BODY: usize = 4096;
/// Largest command body Minecraft accepts.
const MAX_COMMAND_BODY: usize = 1446;

const IO_TIMEOUT: Duration = Duration::from_secs(10);

/// One decoded RCON packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: i32,
    pub kind: i32,
    pub body: String,
}

/// Frames a packet for the wire.
pub fn encode_packet(id: i32, kind: i32, body: &str) -> BytesMut {
    let length = body.len() + PACKET_OVERHEAD;
    let mut buf = BytesMut::with_capacity(4 + length);
    buf.put_i32_le(length as i32);
    buf.put_i32_le(id);
    buf.put_i32_le(kind);
    buf.put_slice(body.as_bytes());
    buf.put_u8(0);
    buf.put_u8(0);
    buf
}

/// Decodes the part of a packet that follows its length prefix.
pub fn decode_packet(mut frame: BytesMut) -> Result<Packet, GrantError> {
    if frame.len() < PACKET_OVERHEAD {
        return Err(GrantError::Protocol(format!(
            "packet too short: {} bytes",
            frame.len()
        )));
    }
    let id = frame.get_i32_le();
    let kind = frame.get_i32_le();
    // Body runs up to the first NUL of the two-byte terminator.
    let body = match frame.iter().position(|b| *b == 0) {
        Some(end) => &frame[..end],
        None => return Err(GrantError::Protocol("unterminated packet body".to_string())),
    };
    Ok(Packet {
        id,
        kind,
        body: String::from_utf8_lossy(body).into_owned(),
    })
}

async fn read_packet(stream: &mut TcpStream) -> Result<Packet, GrantError> {
    let length = stream.read_i32_le().await?;
    if length < PACKET_OVERHEAD as i32 || length as usize > MAX_RESPONSE_BODY + PACKET_OVERHEAD {
        return Err(GrantError::Protocol(format!("bad packet length {length}")));
    }
    let mut frame = BytesMut::zeroed(length as usize);
    stream.read_exact(&mut frame).await?;
    decode_packet(frame)
}

async fn with_timeout<T>(
    what: &str,
    fut: impl std::future::Future<Output = Result<T, GrantError>>,
) -> Result<T, GrantError> {
    tokio::time::timeout(IO_TIMEOUT, fut)
        .await
        .map_err(|_| GrantError::Connection(format!("{what} timed out")))?
}

// ---------------------------------------------------------------------------
// RCON
// ---------------------------------------------------------------------------

/// Executor that logs into the game server's RCON port per grant order.
#[derive(Clone)]
pub struct RconExecutor {
    address: String,
    password: String,
}

impl std::fmt::Debug for RconExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RconExecutor")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl RconExecutor {
    pub fn new(settings: &RconSection) -> Self {
        Self {
            address: format!("{}:{}", settings.host, settings.port),
            password: settings.password.clone(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl ActionExecutor for RconExecutor {
    async fn open(&self) -> Result<Box<dyn ActionSession>, GrantError> {
        let stream = with_timeout("connect", async {
            TcpStream::connect(&self.address)
                .await
                .map_err(|e| GrantError::Connection(format!("{}: {e}", self.address)))
        })
        .await?;

        let mut session = RconSession { stream, next_id: 1 };
        with_timeout("login", session.login(&self.password)).await?;
        tracing::debug!(address = %self.address, "rcon session opened");
        Ok(Box::new(session))
    }
}

/// An authenticated RCON connection.
pub struct RconSession {
    stream: TcpStream,
    next_id: i32,
}

impl RconSession {
    fn allocate_id(&mut self) -> i32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }

    async fn login(&mut self, password: &str) -> Result<(), GrantError> {
        let id = self.allocate_id();
        self.stream
            .write_all(&encode_packet(id, PACKET_LOGIN, password))
            .await?;

        // Some servers send an empty response packet ahead of the verdict.
        loop {
            let packet = read_packet(&mut self.stream).await?;
            if packet.kind != PACKET_AUTH_RESPONSE {
                continue;
            }
            if packet.id == -1 {
                return Err(GrantError::AuthenticationFailed);
            }
            if packet.id != id {
                return Err(GrantError::Protocol(format!(
                    "login response for id {} while waiting for {}",
                    packet.id, id
                )));
            }
            return Ok(());
        }
    }

    async fn exchange(&mut self, id: i32, command: &str) -> Result<String, GrantError> {
        self.stream
            .write_all(&encode_packet(id, PACKET_COMMAND, command))
            .await?;
        loop {
            let packet = read_packet(&mut self.stream).await?;
            if packet.kind == PACKET_RESPONSE && packet.id == id {
                return Ok(packet.body);
            }
            tracing::debug!(id = packet.id, kind = packet.kind, "skipping unrelated rcon packet");
        }
    }
}

#[async_trait]
impl ActionSession for RconSession {
    async fn run(&mut self, command: &str) -> Result<String, GrantError> {
        if command.len() > MAX_COMMAND_BODY {
            return Err(GrantError::Protocol(format!(
                "command is {} bytes, limit is {}",
                command.len(),
                MAX_COMMAND_BODY
            )));
        }

        let id = self.allocate_id();
        with_timeout("command", self.exchange(id, command)).await
    }
}

// ---------------------------------------------------------------------------
// Log-only
// ---------------------------------------------------------------------------

/// Executor that logs commands instead of running them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogExecutor;

struct LogSession;

#[async_trait]
impl ActionExecutor for LogExecutor {
    async fn open(&self) -> Result<Box<dyn ActionSession>, GrantError> {
        Ok(Box::new(LogSession))
    }
}

#[async_trait]
impl ActionSession for LogSession {
    async fn run(&mut self, command: &str) -> Result<String, GrantError> {
        tracing::info!(command = %command, "grant command (log only)");
        Ok(String::new())
    }
}
