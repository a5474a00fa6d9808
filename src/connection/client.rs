//! Client Connection
//!
//! The per-connection state the reactor keeps between ticks:
//!
//! ```text
//!  socket ──read──> query_buf ──decoder──> args ──execute──> reply queue
//!                                                               │
//!  socket <──write── front reply [sent_len..] <─────────────────┘
//! ```
//!
//! Sockets are non-blocking. A read that would block ends the read
//! callback, and a write that would block leaves the rest of the queue for
//! the next writable event.

use crate::protocol::{ProtocolError, ProtocolLimits, Reply, RequestDecoder};
use bytes::{Bytes, BytesMut};
use mio::net::TcpStream;
use mio::Token;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use thiserror::Error;

/// Headroom added to the query buffer before each read (16 KB)
const READ_CHUNK: usize = 16 * 1024;

/// Most bytes one `read_into_buffer` call takes from the socket (64 KB)
pub const READ_BUDGET: usize = 4 * READ_CHUNK;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("connection closed")]
    Closed,
}

/// Counters over all connections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub connections_accepted: u64,
    pub connections_rejected: u64,
    pub active_connections: u64,
    pub commands_processed: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

impl ConnectionStats {
    pub fn connection_opened(&mut self) {
        self.connections_accepted += 1;
        self.active_connections += 1;
    }

    pub fn connection_closed(&mut self) {
        self.active_connections = self.active_connections.saturating_sub(1);
    }
}

pub struct Client {
    stream: TcpStream,
    addr: SocketAddr,
    token: Token,
    query_buf: BytesMut,
    decoder: RequestDecoder,
    reply: VecDeque<Bytes>,
    /// Bytes of the front reply already written
    sent_len: usize,
    write_registered: bool,
    /// The last read stopped at the budget, not at `WouldBlock`
    more_input: bool,
    /// The peer closed its side
    eof: bool,
}

impl Client {
    pub fn new(stream: TcpStream, addr: SocketAddr, token: Token, limits: ProtocolLimits) -> Self {
        Self {
            stream,
            addr,
            token,
            query_buf: BytesMut::with_capacity(READ_CHUNK),
            decoder: RequestDecoder::with_limits(limits),
            reply: VecDeque::new(),
            sent_len: 0,
            write_registered: false,
            more_input: false,
            eof: false,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub fn write_registered(&self) -> bool {
        self.write_registered
    }

    pub fn set_write_registered(&mut self, registered: bool) {
        self.write_registered = registered;
    }

    /// Reads from the socket into the query buffer, at most
    /// [`READ_BUDGET`] bytes per call.
    ///
    /// Returns the number of bytes read. If the budget ran out before the
    /// socket would block, [`has_more_input`](Self::has_more_input) is set
    /// and the caller must decode what it has and read again; sockets are
    /// edge-triggered, so no new event arrives for the rest. Hitting end of
    /// stream sets [`is_eof`](Self::is_eof) instead of failing, so commands
    /// already buffered still run.
    pub fn read_into_buffer(&mut self) -> Result<usize, ConnectionError> {
        let mut total = 0;
        self.more_input = false;
        loop {
            if total >= READ_BUDGET {
                self.more_input = true;
                break;
            }
            let len = self.query_buf.len();
            self.query_buf.resize(len + READ_CHUNK, 0);
            let result = self.stream.read(&mut self.query_buf[len..]);
            let n = match &result {
                Ok(n) => *n,
                Err(_) => 0,
            };
            self.query_buf.truncate(len + n);

            match result {
                Ok(0) => {
                    self.eof = true;
                    break;
                }
                Ok(n) => total += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(total)
    }

    /// True if the last read left data on the socket.
    pub fn has_more_input(&self) -> bool {
        self.more_input
    }

    /// Bytes read but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.query_buf.len()
    }

    /// Decodes the next buffered command, if a complete one is there.
    pub fn next_command(&mut self) -> Result<Option<Vec<Bytes>>, ProtocolError> {
        self.decoder.decode(&mut self.query_buf)
    }

    pub fn queue_reply(&mut self, reply: &Reply) {
        self.reply.push_back(reply.to_bytes());
    }

    pub fn has_pending_replies(&self) -> bool {
        !self.reply.is_empty()
    }

    /// Writes queued replies until the queue is empty or the socket would
    /// block. Returns the number of bytes written.
    pub fn write_pending(&mut self) -> Result<usize, ConnectionError> {
        let mut total = 0;
        while let Some(front) = self.reply.front() {
            match self.stream.write(&front[self.sent_len..]) {
                Ok(0) => return Err(ConnectionError::Closed),
                Ok(n) => {
                    total += n;
                    self.sent_len += n;
                    if self.sent_len == front.len() {
                        self.reply.pop_front();
                        self.sent_len = 0;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(total)
    }
}
