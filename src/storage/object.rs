//! Stored Values
//!
//! Every key maps to one `Value`. The keyspace holds them behind `Arc` so a
//! rewrite snapshot can share them; writers go through `Arc::make_mut`, which
//! copies a value only while a snapshot still holds it.

use super::zset::SortedSet;
use bytes::Bytes;
use std::collections::VecDeque;

/// A value of one of the supported kinds.
#[derive(Debug, Clone)]
pub enum Value {
    Str(Bytes),
    List(VecDeque<Bytes>),
    SortedSet(SortedSet),
    Bitmap(Bitmap),
}

impl Value {
    /// Name reported by `TYPE`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::SortedSet(_) => "zset",
            Value::Bitmap(_) => "bitmap",
        }
    }
}

/// A growable bit array. Bit 0 is the most significant bit of byte 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bitmap {
    bytes: Vec<u8>,
}

impl Bitmap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets or clears a bit, growing the bitmap as needed.
    ///
    /// Returns the previous value of the bit.
    pub fn set_bit(&mut self, offset: usize, on: bool) -> bool {
        let byte = offset / 8;
        let mask = 0x80u8 >> (offset % 8);
        if byte >= self.bytes.len() {
            self.bytes.resize(byte + 1, 0);
        }
        let old = self.bytes[byte] & mask != 0;
        if on {
            self.bytes[byte] |= mask;
        } else {
            self.bytes[byte] &= !mask;
        }
        old
    }

    /// Reads a bit; bits past the end are 0.
    pub fn get_bit(&self, offset: usize) -> bool {
        self.bytes
            .get(offset / 8)
            .is_some_and(|b| b & (0x80u8 >> (offset % 8)) != 0)
    }

    /// Length in bytes.
    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    /// Offsets of all set bits, ascending.
    pub fn ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.bytes.iter().enumerate().flat_map(|(i, &b)| {
            (0..8)
                .filter(move |bit| b & (0x80u8 >> bit) != 0)
                .map(move |bit| i * 8 + bit)
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}
