//! Sorted Set
//!
//! A sorted set pairs the [`SkipList`] with a member → score map. The map
//! answers membership and score lookups in O(1); the skip list answers
//! everything that depends on order. Both are updated together on every
//! insert, score change and removal.

use super::skiplist::{NodeId, ScoreRange, SkipList};
use bytes::Bytes;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct SortedSet {
    scores: HashMap<Bytes, f64>,
    list: SkipList,
}

impl SortedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Adds a member or updates its score.
    ///
    /// Returns true if the member was not present before.
    pub fn insert(&mut self, member: Bytes, score: f64) -> bool {
        match self.scores.get(&member).copied() {
            Some(current) => {
                if current != score {
                    self.list.update_score(current, &member, score);
                    self.scores.insert(member, score);
                }
                false
            }
            None => {
                self.list.insert(score, member.clone());
                self.scores.insert(member, score);
                true
            }
        }
    }

    /// Removes a member. Returns false if it was not present.
    pub fn remove(&mut self, member: &[u8]) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.list.delete(score, member);
                true
            }
            None => false,
        }
    }

    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.scores.get(member).copied()
    }

    /// Returns the 0-based position of a member, counted from the lowest
    /// score, or from the highest when `reverse` is set.
    pub fn rank(&self, member: &[u8], reverse: bool) -> Option<usize> {
        let score = self.score(member)?;
        let rank = self.list.rank(score, member)?;
        Some(if reverse { self.len() - rank } else { rank - 1 })
    }

    /// Returns the elements between two 0-based positions, inclusive.
    ///
    /// Negative positions count from the end, `-1` being the last element.
    pub fn range(&self, start: i64, stop: i64, reverse: bool) -> Vec<(Bytes, f64)> {
        let len = self.len() as i64;
        let mut start = if start < 0 { len + start } else { start };
        let mut stop = if stop < 0 { len + stop } else { stop };
        if start < 0 {
            start = 0;
        }
        if start > stop || start >= len {
            return Vec::new();
        }
        if stop >= len {
            stop = len - 1;
        }
        let count = (stop - start + 1) as usize;

        let mut cursor = if reverse {
            if start > 0 {
                self.list.get_element_by_rank((len - start) as usize)
            } else {
                self.list.last()
            }
        } else if start > 0 {
            self.list.get_element_by_rank(start as usize + 1)
        } else {
            self.list.first()
        };

        let mut out = Vec::with_capacity(count);
        while let Some(id) = cursor {
            if out.len() == count {
                break;
            }
            out.push(self.element(id));
            cursor = if reverse {
                self.list.prev_node(id)
            } else {
                self.list.next_node(id)
            };
        }
        out
    }

    /// Returns the elements whose scores fall in `range`, lowest first.
    pub fn range_by_score(&self, range: &ScoreRange) -> Vec<(Bytes, f64)> {
        let mut out = Vec::new();
        let mut cursor = self.list.first_in_range(range);
        while let Some(id) = cursor {
            if !range.lte_max(self.list.score(id)) {
                break;
            }
            out.push(self.element(id));
            cursor = self.list.next_node(id);
        }
        out
    }

    /// Walks all elements, lowest score first.
    pub fn iter(&self) -> impl Iterator<Item = (&Bytes, f64)> + '_ {
        self.list.iter()
    }

    fn element(&self, id: NodeId) -> (Bytes, f64) {
        (self.list.member(id).clone(), self.list.score(id))
    }
}
