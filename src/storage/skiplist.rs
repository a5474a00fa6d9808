//! Skip List with Rank Spans
//!
//! The ordered half of a sorted set. Nodes are kept in ascending
//! `(score, member)` order, where ties on score fall back to comparing the
//! member bytes. Every forward link also records its span, the number of
//! level-0 hops it jumps over, so a descent from the header can count its way
//! to a rank in O(log n).
//!
//! ```text
//! level 2   H ─────────────(3)────────────> C ──────(2)──────> None
//! level 1   H ───(1)──> A ───────(2)──────> C ──(1)──> D ────> None
//! level 0   H ─> A ──────────> B ─────────> C ───────> D ────> None
//!                A <────────── B <───────── C <─────── D    (backward)
//! ```
//!
//! Nodes live in an arena addressed by [`NodeId`]. Node 0 is the header; it
//! carries no element and has the maximum number of levels.

use bytes::Bytes;
use rand::Rng;

/// Index of a node in the skip list arena.
pub type NodeId = usize;

/// Upper bound on node height.
pub const MAX_LEVEL: usize = 32;

/// Probability of promoting a node one more level.
const LEVEL_P: f64 = 0.5;

const HEADER: NodeId = 0;

#[derive(Debug, Clone, Copy, Default)]
struct Level {
    forward: Option<NodeId>,
    span: usize,
}

#[derive(Debug, Clone)]
struct Node {
    member: Bytes,
    score: f64,
    backward: Option<NodeId>,
    levels: Vec<Level>,
}

impl Node {
    fn new(score: f64, member: Bytes, height: usize) -> Self {
        Self {
            member,
            score,
            backward: None,
            levels: vec![Level::default(); height],
        }
    }

    /// Returns true if this node sorts before `(score, member)`.
    #[inline]
    fn precedes(&self, score: f64, member: &[u8]) -> bool {
        self.score < score || (self.score == score && self.member.as_ref() < member)
    }
}

/// A score interval, with optionally exclusive ends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreRange {
    pub min: f64,
    pub max: f64,
    pub min_exclusive: bool,
    pub max_exclusive: bool,
}

impl ScoreRange {
    pub fn inclusive(min: f64, max: f64) -> Self {
        Self {
            min,
            max,
            min_exclusive: false,
            max_exclusive: false,
        }
    }

    #[inline]
    pub fn gte_min(&self, value: f64) -> bool {
        if self.min_exclusive {
            value > self.min
        } else {
            value >= self.min
        }
    }

    #[inline]
    pub fn lte_max(&self, value: f64) -> bool {
        if self.max_exclusive {
            value < self.max
        } else {
            value <= self.max
        }
    }

    /// Returns true if no score can satisfy the range.
    pub fn is_empty(&self) -> bool {
        self.min > self.max
            || (self.min == self.max && (self.min_exclusive || self.max_exclusive))
    }
}

/// An ordered index of `(score, member)` pairs.
///
/// The list does not check for duplicate members; the owning
/// [`SortedSet`](super::zset::SortedSet) guarantees each member appears once.
#[derive(Debug, Clone)]
pub struct SkipList {
    nodes: Vec<Node>,
    free: Vec<NodeId>,
    tail: Option<NodeId>,
    length: usize,
    level: usize,
}

impl Default for SkipList {
    fn default() -> Self {
        Self::new()
    }
}

impl SkipList {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new(0.0, Bytes::new(), MAX_LEVEL)],
            free: Vec::new(),
            tail: None,
            length: 0,
            level: 1,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.length
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Height of the tallest node.
    pub fn level(&self) -> usize {
        self.level
    }

    /// Inserts a new element and returns its node.
    ///
    /// The caller must make sure `member` is not already present.
    pub fn insert(&mut self, score: f64, member: Bytes) -> NodeId {
        let mut update = [HEADER; MAX_LEVEL];
        let mut rank = [0usize; MAX_LEVEL];

        let mut x = HEADER;
        for i in (0..self.level).rev() {
            rank[i] = if i == self.level - 1 { 0 } else { rank[i + 1] };
            while let Some(next) = self.nodes[x].levels[i].forward {
                if !self.nodes[next].precedes(score, &member) {
                    break;
                }
                rank[i] += self.nodes[x].levels[i].span;
                x = next;
            }
            update[i] = x;
        }

        let height = random_level();
        if height > self.level {
            for i in self.level..height {
                rank[i] = 0;
                update[i] = HEADER;
                self.nodes[HEADER].levels[i].span = self.length;
            }
            self.level = height;
        }

        let id = self.alloc(score, member, height);
        for i in 0..height {
            let prev = update[i];
            let prev_level = self.nodes[prev].levels[i];
            let skipped = rank[0] - rank[i];
            self.nodes[id].levels[i] = Level {
                forward: prev_level.forward,
                span: prev_level.span - skipped,
            };
            self.nodes[prev].levels[i] = Level {
                forward: Some(id),
                span: skipped + 1,
            };
        }
        // Levels above the new node now jump over one more element.
        for i in height..self.level {
            self.nodes[update[i]].levels[i].span += 1;
        }

        self.nodes[id].backward = if update[0] == HEADER {
            None
        } else {
            Some(update[0])
        };
        match self.nodes[id].levels[0].forward {
            Some(next) => self.nodes[next].backward = Some(id),
            None => self.tail = Some(id),
        }
        self.length += 1;
        id
    }

    /// Removes the element matching both `score` and `member`.
    ///
    /// Returns false if no such element exists.
    pub fn delete(&mut self, score: f64, member: &[u8]) -> bool {
        let update = self.predecessors(score, member);
        match self.nodes[update[0]].levels[0].forward {
            Some(id) if self.matches(id, score, member) => {
                self.unlink(id, &update);
                self.release(id);
                true
            }
            _ => false,
        }
    }

    /// Changes the score of an existing element.
    ///
    /// When the new score keeps the node between its neighbours the score is
    /// updated in place; otherwise the node is removed and reinserted.
    /// Returns `None` if `(cur_score, member)` is not in the list.
    pub fn update_score(&mut self, cur_score: f64, member: &[u8], new_score: f64) -> Option<NodeId> {
        let update = self.predecessors(cur_score, member);
        let id = self.nodes[update[0]].levels[0]
            .forward
            .filter(|&id| self.matches(id, cur_score, member))?;

        let node = &self.nodes[id];
        let after_prev = node
            .backward
            .map_or(true, |prev| self.nodes[prev].score < new_score);
        let before_next = node.levels[0]
            .forward
            .map_or(true, |next| self.nodes[next].score > new_score);
        if after_prev && before_next {
            self.nodes[id].score = new_score;
            return Some(id);
        }

        let member = self.nodes[id].member.clone();
        self.unlink(id, &update);
        self.release(id);
        Some(self.insert(new_score, member))
    }

    /// Returns the 1-based rank of an element, or `None` if it is absent.
    pub fn rank(&self, score: f64, member: &[u8]) -> Option<usize> {
        let mut rank = 0;
        let mut x = HEADER;
        for i in (0..self.level).rev() {
            while let Some(next) = self.nodes[x].levels[i].forward {
                let n = &self.nodes[next];
                if n.score < score || (n.score == score && n.member.as_ref() <= member) {
                    rank += self.nodes[x].levels[i].span;
                    x = next;
                } else {
                    break;
                }
            }
            if x != HEADER && self.nodes[x].member.as_ref() == member {
                return Some(rank);
            }
        }
        None
    }

    /// Returns the node at a 1-based rank.
    pub fn get_element_by_rank(&self, rank: usize) -> Option<NodeId> {
        if rank == 0 || rank > self.length {
            return None;
        }
        let mut traversed = 0;
        let mut x = HEADER;
        for i in (0..self.level).rev() {
            while let Some(next) = self.nodes[x].levels[i].forward {
                let span = self.nodes[x].levels[i].span;
                if traversed + span > rank {
                    break;
                }
                traversed += span;
                x = next;
            }
            if traversed == rank {
                return Some(x);
            }
        }
        None
    }

    /// Returns the first node whose score lies in `range`.
    pub fn first_in_range(&self, range: &ScoreRange) -> Option<NodeId> {
        if range.is_empty() {
            return None;
        }
        let mut x = HEADER;
        for i in (0..self.level).rev() {
            while let Some(next) = self.nodes[x].levels[i].forward {
                if range.gte_min(self.nodes[next].score) {
                    break;
                }
                x = next;
            }
        }
        self.nodes[x].levels[0]
            .forward
            .filter(|&id| range.lte_max(self.nodes[id].score))
    }

    /// Lowest element.
    pub fn first(&self) -> Option<NodeId> {
        self.nodes[HEADER].levels[0].forward
    }

    /// Highest element.
    pub fn last(&self) -> Option<NodeId> {
        self.tail
    }

    pub fn next_node(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].levels[0].forward
    }

    pub fn prev_node(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].backward
    }

    pub fn member(&self, id: NodeId) -> &Bytes {
        &self.nodes[id].member
    }

    pub fn score(&self, id: NodeId) -> f64 {
        self.nodes[id].score
    }

    /// Walks the elements in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (&Bytes, f64)> + '_ {
        std::iter::successors(self.first(), move |&id| self.next_node(id))
            .map(move |id| (&self.nodes[id].member, self.nodes[id].score))
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Collects the rightmost node before `(score, member)` on every level.
    fn predecessors(&self, score: f64, member: &[u8]) -> [NodeId; MAX_LEVEL] {
        let mut update = [HEADER; MAX_LEVEL];
        let mut x = HEADER;
        for i in (0..self.level).rev() {
            while let Some(next) = self.nodes[x].levels[i].forward {
                if !self.nodes[next].precedes(score, member) {
                    break;
                }
                x = next;
            }
            update[i] = x;
        }
        update
    }

    #[inline]
    fn matches(&self, id: NodeId, score: f64, member: &[u8]) -> bool {
        let node = &self.nodes[id];
        node.score == score && node.member.as_ref() == member
    }

    fn unlink(&mut self, id: NodeId, update: &[NodeId; MAX_LEVEL]) {
        for (i, &prev) in update.iter().enumerate().take(self.level) {
            if self.nodes[prev].levels[i].forward == Some(id) {
                let removed = self.nodes[id].levels[i];
                let link = &mut self.nodes[prev].levels[i];
                link.span = link.span + removed.span - 1;
                link.forward = removed.forward;
            } else {
                self.nodes[prev].levels[i].span -= 1;
            }
        }

        let backward = self.nodes[id].backward;
        match self.nodes[id].levels[0].forward {
            Some(next) => self.nodes[next].backward = backward,
            None => self.tail = backward,
        }

        while self.level > 1 && self.nodes[HEADER].levels[self.level - 1].forward.is_none() {
            self.level -= 1;
        }
        self.length -= 1;
    }

    fn alloc(&mut self, score: f64, member: Bytes, height: usize) -> NodeId {
        let node = Node::new(score, member, height);
        match self.free.pop() {
            Some(id) => {
                self.nodes[id] = node;
                id
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, id: NodeId) {
        let node = &mut self.nodes[id];
        node.member = Bytes::new();
        node.levels.clear();
        node.backward = None;
        self.free.push(id);
    }
}

/// Picks a node height: 1, plus one more level with probability 1/2 each
/// time, up to [`MAX_LEVEL`].
fn random_level() -> usize {
    let mut rng = rand::rng();
    let mut level = 1;
    while level < MAX_LEVEL && rng.random_bool(LEVEL_P) {
        level += 1;
    }
    level
}
