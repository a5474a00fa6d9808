//! Storage Module
//!
//! The in-memory data structures behind the keyspace.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Database                             │
//! │   ┌──────────────────────────┐   ┌───────────────────────┐   │
//! │   │ data: Dict<Arc<Value>>   │   │ expires: Dict<i64>    │   │
//! │   │  tables[0] ──rehash──>   │   │  key -> unix ms       │   │
//! │   │  tables[1]               │   │                       │   │
//! │   └────────────┬─────────────┘   └───────────▲───────────┘   │
//! │                │                             │               │
//! │                ▼                             │ sampled by    │
//! │   Value::{Str, List, SortedSet, Bitmap}   active expiry      │
//! │                     │                                        │
//! │                     ▼                                        │
//! │        SortedSet = SkipList + HashMap<member, score>         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use ferrokv::storage::{Database, Value};
//! use bytes::Bytes;
//!
//! let mut db = Database::new();
//! db.insert(Bytes::from("name"), Value::Str(Bytes::from("ferro")));
//! assert!(db.exists(b"name"));
//! assert_eq!(db.lookup(b"name").unwrap().type_name(), "string");
//! ```

pub mod db;
pub mod dict;
pub mod expiry;
pub mod object;
pub mod skiplist;
pub mod zset;

pub use db::{unix_time_ms, Database, KeyspaceStats, SnapshotEntry};
pub use dict::{Dict, DictError, SafeIter};
pub use expiry::{active_expire_cycle, ExpiryConfig};
pub use object::{Bitmap, Value};
pub use skiplist::{ScoreRange, SkipList};
pub use zset::SortedSet;
