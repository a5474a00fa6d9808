//! Snapshot Serialization
//!
//! A rewrite replaces the log with the shortest command sequence that
//! rebuilds the current keyspace:
//!
//! ```text
//! Str        SET key value
//! List       RPUSH key v1 .. v64        (one record per 64 items)
//! SortedSet  ZADD key s1 m1 .. s64 m64  (one record per 64 pairs)
//! Bitmap     SETBIT key off 1           (per set bit, plus a trailing
//!                                        SETBIT key last 0 to keep length)
//! TTL        PEXPIREAT key unix-ms
//! ```

use crate::protocol::{encode_command, format_score};
use crate::storage::{SnapshotEntry, Value};
use bytes::{Bytes, BytesMut};
use std::io::{self, Write};

/// Items per RPUSH/ZADD record.
pub const ITEMS_PER_RECORD: usize = 64;

/// Output is handed to the writer whenever this much is buffered.
const WRITE_CHUNK: usize = 64 * 1024;

/// Appends the records that rebuild one key.
pub fn encode_entry(out: &mut BytesMut, entry: &SnapshotEntry) {
    let key = &entry.key;
    match entry.value.as_ref() {
        Value::Str(value) => {
            encode_command(out, &[&b"SET"[..], &key[..], &value[..]]);
        }
        Value::List(list) => {
            let items: Vec<&Bytes> = list.iter().collect();
            for chunk in items.chunks(ITEMS_PER_RECORD) {
                let mut args: Vec<&[u8]> = Vec::with_capacity(chunk.len() + 2);
                args.push(b"RPUSH");
                args.push(&key[..]);
                args.extend(chunk.iter().map(|v| &v[..]));
                encode_command(out, &args);
            }
        }
        Value::SortedSet(zset) => {
            let pairs: Vec<(String, &Bytes)> = zset
                .iter()
                .map(|(member, score)| (format_score(score), member))
                .collect();
            for chunk in pairs.chunks(ITEMS_PER_RECORD) {
                let mut args: Vec<&[u8]> = Vec::with_capacity(chunk.len() * 2 + 2);
                args.push(b"ZADD");
                args.push(&key[..]);
                for (score, member) in chunk {
                    args.push(score.as_bytes());
                    args.push(&member[..]);
                }
                encode_command(out, &args);
            }
        }
        Value::Bitmap(bitmap) => {
            for offset in bitmap.ones() {
                let offset = offset.to_string();
                encode_command(out, &[&b"SETBIT"[..], &key[..], offset.as_bytes(), &b"1"[..]]);
            }
            let bits = bitmap.byte_len() * 8;
            if bits > 0 && !bitmap.get_bit(bits - 1) {
                let last = (bits - 1).to_string();
                encode_command(out, &[&b"SETBIT"[..], &key[..], last.as_bytes(), &b"0"[..]]);
            }
        }
    }

    if let Some(when) = entry.expire_at {
        let when = when.to_string();
        encode_command(out, &[&b"PEXPIREAT"[..], &key[..], when.as_bytes()]);
    }
}

/// Writes a whole snapshot and returns the number of bytes written.
pub fn write_snapshot<W: Write>(writer: &mut W, entries: &[SnapshotEntry]) -> io::Result<u64> {
    let mut out = BytesMut::with_capacity(WRITE_CHUNK);
    let mut written = 0u64;

    for entry in entries {
        encode_entry(&mut out, entry);
        if out.len() >= WRITE_CHUNK {
            writer.write_all(&out)?;
            written += out.len() as u64;
            out.clear();
        }
    }
    writer.write_all(&out)?;
    written += out.len() as u64;
    writer.flush()?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Bitmap, SortedSet};
    use std::collections::VecDeque;
    use std::sync::Arc;

    fn entry(key: &str, value: Value, expire_at: Option<i64>) -> SnapshotEntry {
        SnapshotEntry {
            key: Bytes::from(key.to_string()),
            value: Arc::new(value),
            expire_at,
        }
    }

    fn encode(e: &SnapshotEntry) -> Vec<u8> {
        let mut out = BytesMut::new();
        encode_entry(&mut out, e);
        out.to_vec()
    }

    #[test]
    fn test_string_with_ttl() {
        let e = entry("k", Value::Str(Bytes::from("v")), Some(1234));
        assert_eq!(
            encode(&e),
            b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n\
              *3\r\n$9\r\nPEXPIREAT\r\n$1\r\nk\r\n$4\r\n1234\r\n"
                .to_vec()
        );
    }

    #[test]
    fn test_list_is_chunked() {
        let list: VecDeque<Bytes> = (0..130).map(|i| Bytes::from(i.to_string())).collect();
        let bytes = encode(&entry("l", Value::List(list), None));
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text.matches("RPUSH").count(), 3);
        assert!(text.starts_with("*66\r\n$5\r\nRPUSH\r\n"));
    }

    #[test]
    fn test_zset_scores() {
        let mut zset = SortedSet::new();
        zset.insert(Bytes::from("a"), 1.5);
        zset.insert(Bytes::from("b"), f64::NEG_INFINITY);
        let bytes = encode(&entry("z", Value::SortedSet(zset), None));
        assert_eq!(
            bytes,
            b"*6\r\n$4\r\nZADD\r\n$1\r\nz\r\n$4\r\n-inf\r\n$1\r\nb\r\n$3\r\n1.5\r\n$1\r\na\r\n"
                .to_vec()
        );
    }

    #[test]
    fn test_bitmap_keeps_length() {
        let mut bitmap = Bitmap::new();
        bitmap.set_bit(3, true);
        bitmap.set_bit(15, false);
        let text = String::from_utf8(encode(&entry("b", Value::Bitmap(bitmap), None))).unwrap();
        assert_eq!(text.matches("SETBIT").count(), 2);
        assert!(text.contains("$1\r\n3\r\n$1\r\n1\r\n"));
        assert!(text.contains("$2\r\n15\r\n$1\r\n0\r\n"));
    }

    #[test]
    fn test_write_snapshot_counts_bytes() {
        let entries = vec![
            entry("a", Value::Str(Bytes::from("1")), None),
            entry("b", Value::Str(Bytes::from("2")), None),
        ];
        let mut out = Vec::new();
        let written = write_snapshot(&mut out, &entries).unwrap();
        assert_eq!(written, out.len() as u64);
        assert!(out.starts_with(b"*3\r\n$3\r\nSET\r\n"));
    }
}
