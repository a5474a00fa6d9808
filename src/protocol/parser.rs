//! Incremental Request Decoder
//!
//! Turns the bytes a client sends into complete argument vectors. The decoder
//! is a small state machine that survives arbitrary read boundaries: when the
//! buffer ends in the middle of a command, the progress made so far (request
//! type, remaining argument count, length of the argument being read) stays in
//! the decoder and parsing resumes from the same spot on the next call.
//!
//! ## Request Types
//!
//! The first unconsumed byte decides the framing of the next command:
//! - `*` Bulk: `*<argc>\r\n` then `$<len>\r\n<bytes>\r\n` per argument
//! - anything else Inline: space-separated tokens terminated by `\r\n`
//!
//! ## Calling Convention
//!
//! 1. Append incoming network data to the connection buffer
//! 2. Call `decode()` until it returns `Ok(None)`
//! 3. `Ok(Some(args))` consumed one command from the front of the buffer
//! 4. `Err(e)` is fatal for the connection; no resynchronization is attempted

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

/// Errors that end a client connection.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    /// An inline line or a bulk argument exceeds the configured ceiling
    #[error("command too large: {size} bytes (max: {max})")]
    CommandTooLarge { size: usize, max: usize },

    /// Unexpected leading byte or unparsable length
    #[error("protocol error: {0}")]
    MalformedProtocol(String),
}

/// Result type for decoding operations.
pub type DecodeResult<T> = Result<T, ProtocolError>;

/// Maximum size of an inline command line (64 KB)
pub const MAX_INLINE_SIZE: usize = 64 * 1024;

/// Maximum size for a single bulk argument (512 MB)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum number of arguments in one bulk command
pub const MAX_ARGS: usize = 1024 * 1024;

/// Size ceilings enforced by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolLimits {
    /// Longest inline line, and longest `*`/`$` header line
    pub max_inline_size: usize,
    /// Longest single bulk argument
    pub max_bulk_size: usize,
    /// Largest `*<argc>` accepted
    pub max_args: usize,
}

impl Default for ProtocolLimits {
    fn default() -> Self {
        Self {
            max_inline_size: MAX_INLINE_SIZE,
            max_bulk_size: MAX_BULK_SIZE,
            max_args: MAX_ARGS,
        }
    }
}

/// The framing of the command currently being decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestType {
    /// Nothing consumed yet for the next command
    #[default]
    Unknown,
    Inline,
    Bulk,
}

/// Per-connection request decoder.
///
/// # Example
///
/// ```
/// use ferrokv::protocol::RequestDecoder;
/// use bytes::BytesMut;
///
/// let mut decoder = RequestDecoder::new();
/// let mut buf = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$3\r\nf"[..]);
/// assert!(decoder.decode(&mut buf).unwrap().is_none());
///
/// buf.extend_from_slice(b"oo\r\n");
/// let args = decoder.decode(&mut buf).unwrap().unwrap();
/// assert_eq!(args, vec!["GET", "foo"]);
/// ```
#[derive(Debug, Default)]
pub struct RequestDecoder {
    limits: ProtocolLimits,
    req_type: RequestType,
    /// Arguments still to read for the current bulk command
    pending_arg_count: usize,
    /// Length of the bulk argument being read, once its `$` line is consumed
    pending_arg_len: Option<usize>,
    /// Arguments completed so far
    args: Vec<Bytes>,
    /// Bytes of the current header or inline line already searched for CRLF
    scanned: usize,
}

impl RequestDecoder {
    /// Creates a decoder with the default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a decoder with custom limits.
    pub fn with_limits(limits: ProtocolLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    /// Returns the framing of the command in progress.
    pub fn request_type(&self) -> RequestType {
        self.req_type
    }

    /// Returns true if a command is partially decoded.
    pub fn is_mid_command(&self) -> bool {
        self.req_type != RequestType::Unknown
    }

    /// Decodes the next complete command from the front of `buf`.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(args))` - a non-empty argument vector; its bytes were consumed
    /// - `Ok(None)` - the buffer holds no complete command yet
    /// - `Err(e)` - the stream is malformed or over a size ceiling
    pub fn decode(&mut self, buf: &mut BytesMut) -> DecodeResult<Option<Vec<Bytes>>> {
        while !buf.is_empty() {
            if self.req_type == RequestType::Unknown {
                self.req_type = if buf[0] == b'*' {
                    RequestType::Bulk
                } else {
                    RequestType::Inline
                };
            }

            let complete = match self.req_type {
                RequestType::Inline => self.decode_inline(buf)?,
                RequestType::Bulk => self.decode_bulk(buf)?,
                RequestType::Unknown => unreachable!("request type set above"),
            };

            if !complete {
                return Ok(None);
            }

            let args = std::mem::take(&mut self.args);
            self.reset();
            if args.is_empty() {
                // Empty commands are no-ops; keep going with the same buffer.
                continue;
            }
            return Ok(Some(args));
        }
        Ok(None)
    }

    /// Clears all partial state.
    pub fn reset(&mut self) {
        self.req_type = RequestType::Unknown;
        self.pending_arg_count = 0;
        self.pending_arg_len = None;
        self.args.clear();
        self.scanned = 0;
    }

    /// Parses `arg1 arg2 ...\r\n`.
    fn decode_inline(&mut self, buf: &mut BytesMut) -> DecodeResult<bool> {
        let line_end = match self.find_line(buf)? {
            Some(pos) => pos,
            None => return Ok(false),
        };

        let line = buf.split_to(line_end).freeze();
        buf.advance(2);

        self.args = line
            .split(|b| *b == b' ' || *b == b'\t')
            .filter(|token| !token.is_empty())
            .map(|token| line.slice_ref(token))
            .collect();
        Ok(true)
    }

    /// Parses `*<argc>\r\n($<len>\r\n<bytes>\r\n)*`, resuming where the last
    /// call stopped.
    fn decode_bulk(&mut self, buf: &mut BytesMut) -> DecodeResult<bool> {
        if self.pending_arg_count == 0 {
            let line_end = match self.find_line(buf)? {
                Some(pos) => pos,
                None => return Ok(false),
            };
            debug_assert_eq!(buf[0], b'*');

            let count = parse_length(&buf[1..line_end])?;
            buf.advance(line_end + 2);

            if count <= 0 {
                return Ok(true);
            }
            let count = count as usize;
            if count > self.limits.max_args {
                return Err(ProtocolError::MalformedProtocol(format!(
                    "invalid multibulk length: {}",
                    count
                )));
            }
            self.pending_arg_count = count;
            self.args = Vec::with_capacity(count.min(1024));
        }

        while self.pending_arg_count > 0 {
            let len = match self.pending_arg_len {
                Some(len) => len,
                None => {
                    let line_end = match self.find_line(buf)? {
                        Some(pos) => pos,
                        None => return Ok(false),
                    };
                    if buf[0] != b'$' {
                        return Err(ProtocolError::MalformedProtocol(format!(
                            "expected '$', got '{}'",
                            buf[0] as char
                        )));
                    }
                    let len = parse_length(&buf[1..line_end])?;
                    if len < 0 {
                        return Err(ProtocolError::MalformedProtocol(format!(
                            "invalid bulk length: {}",
                            len
                        )));
                    }
                    let len = len as usize;
                    if len > self.limits.max_bulk_size {
                        return Err(ProtocolError::CommandTooLarge {
                            size: len,
                            max: self.limits.max_bulk_size,
                        });
                    }
                    buf.advance(line_end + 2);
                    self.pending_arg_len = Some(len);
                    len
                }
            };

            if buf.len() < len + 2 {
                // Make room for the rest of the argument in one allocation.
                buf.reserve(len + 2 - buf.len());
                return Ok(false);
            }
            if &buf[len..len + 2] != b"\r\n" {
                return Err(ProtocolError::MalformedProtocol(
                    "bulk argument missing trailing CRLF".to_string(),
                ));
            }

            let arg = buf.split_to(len).freeze();
            buf.advance(2);
            self.args.push(arg);
            self.pending_arg_len = None;
            self.pending_arg_count -= 1;
        }
        Ok(true)
    }

    /// Finds the next CRLF, failing once the unterminated line outgrows the
    /// inline ceiling.
    ///
    /// A line that arrives in pieces is searched once: the search resumes
    /// one byte before where the last one ended, in case that byte was `\r`.
    fn find_line(&mut self, buf: &[u8]) -> DecodeResult<Option<usize>> {
        let start = self.scanned.saturating_sub(1).min(buf.len());
        let found = find_crlf(&buf[start..]).map(|pos| start + pos);
        self.scanned = if found.is_some() { 0 } else { buf.len() };

        match found {
            Some(pos) if pos > self.limits.max_inline_size => Err(ProtocolError::CommandTooLarge {
                size: pos,
                max: self.limits.max_inline_size,
            }),
            Some(pos) => Ok(Some(pos)),
            None if buf.len() > self.limits.max_inline_size => {
                Err(ProtocolError::CommandTooLarge {
                    size: buf.len(),
                    max: self.limits.max_inline_size,
                })
            }
            None => Ok(None),
        }
    }
}

/// Finds the position of CRLF in the buffer.
///
/// Returns the position of `\r` if found, or None if CRLF is not present.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Parses the decimal number of a `*` or `$` header line.
fn parse_length(digits: &[u8]) -> DecodeResult<i64> {
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| {
            ProtocolError::MalformedProtocol(format!(
                "invalid length: {:?}",
                String::from_utf8_lossy(digits)
            ))
        })
}
