//! # ferrokv - A Single-Threaded In-Memory Key-Value Server
//!
//! ferrokv keeps its whole keyspace in memory, serves clients over TCP from
//! one event-loop thread, and can log every write to an append-only file that
//! is replayed at startup and compacted in the background.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               ferrokv                                   │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │  Reactor    │───>│   Client    │───>│  Command    │                  │
//! │  │ (mio poll,  │    │ (decoder,   │    │   Table     │                  │
//! │  │  timers)    │    │  replies)   │    └──────┬──────┘                  │
//! │  └──────┬──────┘    └─────────────┘           │                         │
//! │         │ cron                                ▼                         │
//! │         │           ┌──────────────────────────────────────────────┐    │
//! │         └─────────> │ Database                                     │    │
//! │                     │  Dict (incremental rehash)                   │    │
//! │                     │   ├─ strings, lists, bitmaps                 │    │
//! │                     │   └─ sorted sets (SkipList + Dict)           │    │
//! │                     └──────────────────────┬───────────────────────┘    │
//! │                                            │ successful writes          │
//! │                                            ▼                            │
//! │                     ┌──────────────────────────────────────────────┐    │
//! │                     │ AppendOnlyLog ── rewrite thread ── replay    │    │
//! │                     └──────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use ferrokv::config::ServerConfig;
//! use ferrokv::reactor::EventLoop;
//! use ferrokv::server::{Engine, Server};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::builder().appendonly(true).build();
//!     let engine = Engine::open(&config)?;
//!     let mut server = Server::bind(config, engine)?;
//!
//!     let mut el = EventLoop::new()?;
//!     server.install(&mut el)?;
//!     el.run(&mut server);
//!     server.shutdown(&mut el)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`reactor`]: readiness and timer event loop
//! - [`protocol`]: incremental request decoder and reply encoding
//! - [`storage`]: hash table, skip list, sorted sets and the keyspace
//! - [`commands`]: command table and handlers
//! - [`persistence`]: append-only log, background rewrite and replay
//! - [`connection`]: per-client buffers
//! - [`server`]: the callbacks that tie it together
//!
//! ## Expiry
//!
//! Keys with a TTL are removed in two ways:
//! 1. **Lazy**: every lookup checks the deadline first
//! 2. **Active**: the cron samples keys with a TTL and removes expired ones
//!
//! Memory is reclaimed even for keys that are never read again.

pub mod commands;
pub mod config;
pub mod connection;
pub mod persistence;
pub mod protocol;
pub mod reactor;
pub mod server;
pub mod storage;

pub use config::{ServerConfig, DEFAULT_PORT};
pub use protocol::{ProtocolError, Reply, RequestDecoder};
pub use server::{Engine, Server};
pub use storage::Database;

/// The default host ferrokv binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of ferrokv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
