//! Wire Protocol
//!
//! Clients may send either framing on the same socket, and may pipeline as
//! many commands as they like in one write:
//!
//! ```text
//! Inline:  SET foo bar\r\n
//! Bulk:    *3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n
//! ```
//!
//! ## Modules
//!
//! - `types`: the `Reply` enum, reply serialization and command encoding
//! - `parser`: the incremental `RequestDecoder`
//!
//! ## Example
//!
//! ```
//! use ferrokv::protocol::{Reply, RequestDecoder};
//! use bytes::{Bytes, BytesMut};
//!
//! let mut decoder = RequestDecoder::new();
//! let mut buf = BytesMut::from(&b"GET name\r\n"[..]);
//! let args = decoder.decode(&mut buf).unwrap().unwrap();
//! assert_eq!(args, vec!["GET", "name"]);
//!
//! let reply = Reply::bulk(Bytes::from("Ariz"));
//! assert_eq!(reply.serialize(), b"$4\r\nAriz\r\n");
//! ```

pub mod parser;
pub mod types;

pub use parser::{DecodeResult, ProtocolError, ProtocolLimits, RequestDecoder, RequestType};
pub use types::{encode_command, format_score, Reply};
