//! Reply and Command Wire Types
//!
//! This module defines the values the server writes back to clients and the
//! bulk-framed command records shared by live traffic and the append-only file.
//!
//! ## Reply Format
//!
//! Each reply starts with a type prefix byte and ends with CRLF:
//! - `+ok`, `+nil`, `+PONG` Status line
//! - `-ERR <message>` Error
//! - `:<n>` Integer
//! - `$<len>\r\n<bytes>` Bulk payload
//! - `*<count>` Array of replies (range commands)
//!
//! ## Command Format
//!
//! Commands are written as `*<argc>\r\n` followed by one
//! `$<len>\r\n<bytes>\r\n` per argument. The AOF stores exactly this form,
//! so replay can reuse the request decoder.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// The CRLF terminator used on the wire
pub const CRLF: &[u8] = b"\r\n";

/// Wire type prefixes
pub mod prefix {
    pub const STATUS: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A reply queued on a client connection.
///
/// Replies are immutable once built; bulk payloads are `Bytes` handles so a
/// value taken from the keyspace is shared, not copied, on its way out.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// `+ok`
    Ok,

    /// `+nil`, returned when there is no value
    Nil,

    /// A status line such as `+PONG`
    Status(String),

    /// `-ERR <message>`
    Error(String),

    /// `:<n>`
    Integer(i64),

    /// `$<len>\r\n<bytes>\r\n`
    Bulk(Bytes),

    /// `*<count>\r\n` followed by each element
    Array(Vec<Reply>),
}

impl Reply {
    /// Creates an error reply, prefixing `ERR ` to the message.
    ///
    /// # Example
    /// ```
    /// use ferrokv::protocol::Reply;
    /// let err = Reply::error("unknown command 'foo'");
    /// assert_eq!(err.serialize(), b"-ERR unknown command 'foo'\r\n");
    /// ```
    pub fn error(msg: impl fmt::Display) -> Self {
        Reply::Error(format!("ERR {}", msg))
    }

    /// Creates a status reply.
    pub fn status(s: impl Into<String>) -> Self {
        Reply::Status(s.into())
    }

    /// Creates a bulk reply.
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Reply::Bulk(data.into())
    }

    /// Creates a bulk reply holding a formatted float.
    pub fn score(score: f64) -> Self {
        Reply::Bulk(Bytes::from(format_score(score)))
    }

    pub fn integer(n: i64) -> Self {
        Reply::Integer(n)
    }

    /// Wraps an optional bulk value, mapping `None` to `+nil`.
    pub fn bulk_or_nil(data: Option<Bytes>) -> Self {
        match data {
            Some(b) => Reply::Bulk(b),
            None => Reply::Nil,
        }
    }

    /// Returns true if this reply reports an error.
    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// Serializes the reply to bytes for sending over the wire.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        self.serialize_into(&mut buf);
        buf.to_vec()
    }

    /// Serializes the reply into an existing buffer.
    pub fn serialize_into(&self, buf: &mut BytesMut) {
        match self {
            Reply::Ok => buf.put_slice(b"+ok\r\n"),
            Reply::Nil => buf.put_slice(b"+nil\r\n"),
            Reply::Status(s) => {
                buf.put_u8(prefix::STATUS);
                buf.put_slice(s.as_bytes());
                buf.put_slice(CRLF);
            }
            Reply::Error(s) => {
                buf.put_u8(prefix::ERROR);
                buf.put_slice(s.as_bytes());
                buf.put_slice(CRLF);
            }
            Reply::Integer(n) => {
                buf.put_u8(prefix::INTEGER);
                buf.put_slice(n.to_string().as_bytes());
                buf.put_slice(CRLF);
            }
            Reply::Bulk(data) => put_bulk(buf, data),
            Reply::Array(items) => {
                buf.put_u8(prefix::ARRAY);
                buf.put_slice(items.len().to_string().as_bytes());
                buf.put_slice(CRLF);
                for item in items {
                    item.serialize_into(buf);
                }
            }
        }
    }

    /// Serializes the reply into a frozen buffer ready for a client's
    /// output queue.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.serialize_into(&mut buf);
        buf.freeze()
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Ok => write!(f, "ok"),
            Reply::Nil => write!(f, "(nil)"),
            Reply::Status(s) => write!(f, "{}", s),
            Reply::Error(s) => write!(f, "(error) {}", s),
            Reply::Integer(n) => write!(f, "(integer) {}", n),
            Reply::Bulk(data) => match std::str::from_utf8(data) {
                Ok(s) => write!(f, "\"{}\"", s),
                Err(_) => write!(f, "(binary data, {} bytes)", data.len()),
            },
            Reply::Array(items) => {
                if items.is_empty() {
                    return write!(f, "(empty array)");
                }
                for (i, item) in items.iter().enumerate() {
                    writeln!(f, "{}) {}", i + 1, item)?;
                }
                Ok(())
            }
        }
    }
}

/// Writes `$<len>\r\n<data>\r\n`.
fn put_bulk(buf: &mut BytesMut, data: &[u8]) {
    buf.put_u8(prefix::BULK);
    buf.put_slice(data.len().to_string().as_bytes());
    buf.put_slice(CRLF);
    buf.put_slice(data);
    buf.put_slice(CRLF);
}

/// Appends one command in bulk framing to `buf`.
///
/// This is the canonical record format of the append-only file.
pub fn encode_command<A: AsRef<[u8]>>(buf: &mut BytesMut, args: &[A]) {
    buf.put_u8(prefix::ARRAY);
    buf.put_slice(args.len().to_string().as_bytes());
    buf.put_slice(CRLF);
    for arg in args {
        put_bulk(buf, arg.as_ref());
    }
}

/// Formats a score so that parsing it back yields the same `f64`.
pub fn format_score(score: f64) -> String {
    if score == f64::INFINITY {
        "inf".to_string()
    } else if score == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        format!("{}", score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_and_nil() {
        assert_eq!(Reply::Ok.serialize(), b"+ok\r\n");
        assert_eq!(Reply::Nil.serialize(), b"+nil\r\n");
    }

    #[test]
    fn test_error_serialize() {
        let value = Reply::error("unknown command 'foo'");
        assert_eq!(value.serialize(), b"-ERR unknown command 'foo'\r\n");
        assert!(value.is_error());
    }

    #[test]
    fn test_integer_serialize() {
        assert_eq!(Reply::integer(1000).serialize(), b":1000\r\n");
        assert_eq!(Reply::integer(-42).serialize(), b":-42\r\n");
    }

    #[test]
    fn test_bulk_serialize() {
        let value = Reply::bulk(Bytes::from("bar"));
        assert_eq!(value.serialize(), b"$3\r\nbar\r\n");

        let empty = Reply::bulk(Bytes::new());
        assert_eq!(empty.serialize(), b"$0\r\n\r\n");
    }

    #[test]
    fn test_array_serialize() {
        let value = Reply::Array(vec![
            Reply::bulk(Bytes::from("a")),
            Reply::score(1.5),
        ]);
        assert_eq!(value.serialize(), b"*2\r\n$1\r\na\r\n$3\r\n1.5\r\n");
    }

    #[test]
    fn test_encode_command() {
        let mut buf = BytesMut::new();
        encode_command(&mut buf, &["set", "key", "val"]);
        assert_eq!(&buf[..], b"*3\r\n$3\r\nset\r\n$3\r\nkey\r\n$3\r\nval\r\n");

        buf.clear();
        encode_command(&mut buf, &["pexpireat", "key", "1234567890"]);
        assert_eq!(
            &buf[..],
            b"*3\r\n$9\r\npexpireat\r\n$3\r\nkey\r\n$10\r\n1234567890\r\n"
        );
    }

    #[test]
    fn test_format_score() {
        assert_eq!(format_score(1.0), "1");
        assert_eq!(format_score(-2.5), "-2.5");
        assert_eq!(format_score(f64::INFINITY), "inf");
        assert_eq!(format_score(f64::NEG_INFINITY), "-inf");
        let tricky = 0.1 + 0.2;
        assert_eq!(format_score(tricky).parse::<f64>().unwrap(), tricky);
    }
}
