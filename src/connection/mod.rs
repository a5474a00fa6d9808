//! Connection Module
//!
//! Client connections are plain state objects driven by the reactor; they
//! own their socket, their query buffer and their reply queue exclusively.
//!
//! ## Lifecycle
//!
//! ```text
//! 1. accept()            Client::new, register READABLE
//!        │
//!        ▼
//! 2. readable            read_into_buffer, next_command* , execute
//!        │
//!        ▼
//! 3. replies queued      write_pending; if it would block, register WRITABLE
//!        │
//!        ▼
//! 4. writable            write_pending; once drained, unregister WRITABLE
//!        │
//!        ▼
//! 5. EOF / I/O error /   unregister, drop (closes the socket)
//!    protocol error
//! ```

pub mod client;

pub use client::{Client, ConnectionError, ConnectionStats};
