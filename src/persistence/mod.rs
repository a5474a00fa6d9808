//! Persistence Module
//!
//! Durability through an append-only log of write commands.
//!
//! - `aof`: the log itself; feeding, flushing, fsync policy, background and
//!   synchronous rewrites, and the automatic rewrite trigger
//! - `rewrite`: serializes a keyspace snapshot into the shortest command list
//! - `replay`: loads the log at startup

pub mod aof;
pub mod replay;
pub mod rewrite;

pub use aof::{
    AofConfig, AofError, AofStats, AppendOnlyLog, FsyncPolicy, DEFAULT_REWRITE_MIN_SIZE,
    DEFAULT_REWRITE_PERCENTAGE,
};
pub use replay::{replay, ReplayStats};
