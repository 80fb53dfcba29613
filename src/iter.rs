use bstr::ByteSlice;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use smallvec::SmallVec;
use tracing::trace;

use crate::error::{Result, TrieError};
use crate::node::{NodeId, EXPLORED};
use crate::trie::Trie;

/// Identity of a dirty iterator within its store, used to police the
/// single active-dirty-iterator slot. Fresh ids come from the store's
/// own counter, so two iterators over the same store never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IterId(pub(crate) u64);

/// Latched iterator status. The discriminants are the error codes of
/// the C surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(i32)]
pub enum IterStatus {
    Success = 0,
    /// Nodes were added to or removed from the store after this
    /// iterator was created.
    OutOfSync = -1,
    /// Another dirty iterator took over the store's dirty slot.
    Replaced = -2,
}

/// One DFS frame: a trie position, the query it is being matched
/// against, and the Hamming distance accumulated so far.
#[derive(Clone, Copy)]
struct IterState {
    node: NodeId,
    query: NodeId,
    hd: u32,
    depth: usize,
}

/// Explicit LIFO of traversal frames, so `next` can suspend between
/// emissions without recursion.
struct StateStack {
    states: SmallVec<[IterState; 16]>,
}

impl StateStack {
    fn new() -> Self {
        StateStack {
            states: SmallVec::new(),
        }
    }

    fn push(&mut self, node: NodeId, query: NodeId, hd: u32, depth: usize) {
        self.states.push(IterState {
            node,
            query,
            hd,
            depth,
        });
    }

    fn pop(&mut self) -> Option<IterState> {
        self.states.pop()
    }
}

enum IterKind {
    Suffixes,
    Neighbors,
    HammingPairs,
}

/// One result of an iterator: the query item (absent when a suffix
/// enumeration was rooted at a structural node), the matched item, and
/// their Hamming distance (zero for suffix results).
///
/// The borrowed slices point at live nodes in the store and stay valid
/// until the next mutating call.
pub struct SearchResult<'t, V> {
    pub query: Option<(&'t [u8], &'t V)>,
    pub target: (&'t [u8], &'t V),
    pub hd: u32,
}

/// Iterator over one of the three search families. The store is passed
/// explicitly to every [`TrieIter::next`] call; the iterator itself
/// only remembers traversal state plus the state id it was born under.
///
/// Dirty iterators (all-pairs enumeration) mark nodes while running;
/// call [`TrieIter::close`] when done so the marks are wiped. Merely
/// dropping a dirty iterator leaves the marks to be cleaned up by the
/// next dirty iterator's construction.
pub struct TrieIter {
    kind: IterKind,
    /// Present on dirty iterators only.
    id: Option<IterId>,
    trie_state_id: u64,
    maxhd: u32,
    target_depth: usize,
    len_query: usize,
    status: IterStatus,
    stack: StateStack,
    /// Pending query nodes for the all-pairs enumeration.
    targets: Vec<NodeId>,
}

impl<V> Trie<V> {
    /// Enumerate every item in the subtree named by `key`, the node for
    /// `key` itself included. Fails when no stored key passes through
    /// `key`.
    #[tracing::instrument(level = "trace", skip(self, key), fields(key = %key.as_bstr()))]
    pub fn iter_suffixes(&self, key: &[u8]) -> Result<TrieIter> {
        let query = self.get_node(key).ok_or(TrieError::KeyNotFound)?;
        let mut it = TrieIter::new(IterKind::Suffixes, None, self.state_id, 0, 0, key.len());
        it.stack.push(query, query, 0, 0);
        Ok(it)
    }

    /// Enumerate every item of the same length as `key` that differs
    /// from it in at least one and at most `maxhd` positions. `key`
    /// itself must be a stored item.
    #[tracing::instrument(level = "trace", skip(self, key), fields(key = %key.as_bstr()))]
    pub fn iter_neighbors(&self, key: &[u8], maxhd: u32) -> Result<TrieIter> {
        if maxhd < 1 {
            return Err(TrieError::ZeroMaxDist);
        }
        let query = self.get_node(key).ok_or(TrieError::KeyNotFound)?;
        if !self.pool[query].is_item() {
            return Err(TrieError::KeyNotFound);
        }
        let mut it = TrieIter::new(
            IterKind::Neighbors,
            None,
            self.state_id,
            maxhd,
            key.len(),
            key.len(),
        );
        it.stack.push(NodeId::ROOT, query, 0, 0);
        Ok(it)
    }

    /// Enumerate every unordered pair of distinct stored keys of length
    /// `keylen` whose Hamming distance is at most `maxhd`, each pair
    /// exactly once.
    ///
    /// This is the dirty iterator: it marks visited subtrees in the
    /// store and registers itself in the store's single dirty slot,
    /// replacing any iterator already registered there.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn iter_hammingpairs(&mut self, keylen: usize, maxhd: u32) -> Result<TrieIter> {
        if keylen == 0 {
            return Err(TrieError::EmptyPairKey);
        }
        if maxhd < 1 {
            return Err(TrieError::ZeroMaxDist);
        }

        let targets = self.collect_items_at_depth(keylen);
        trace!(targets = targets.len());

        let id = self.next_iter_id();
        if self.dirty_iter.is_some() {
            // the trie may still carry marks from the replaced iterator
            self.reset_flags();
        }
        self.dirty_iter = Some(id);

        let mut it = TrieIter::new(
            IterKind::HammingPairs,
            Some(id),
            self.state_id,
            maxhd,
            keylen,
            keylen,
        );
        it.targets = targets;
        Ok(it)
    }
}

impl TrieIter {
    fn new(
        kind: IterKind,
        id: Option<IterId>,
        trie_state_id: u64,
        maxhd: u32,
        target_depth: usize,
        len_query: usize,
    ) -> Self {
        TrieIter {
            kind,
            id,
            trie_state_id,
            maxhd,
            target_depth,
            len_query,
            status: IterStatus::Success,
            stack: StateStack::new(),
            targets: Vec::new(),
        }
    }

    /// Length of the query this iterator was constructed with. For
    /// suffix enumeration this is the prefix length, so consumers can
    /// slice the suffix off each target key.
    pub fn len_query(&self) -> usize {
        self.len_query
    }

    /// Latched status. Once this is not [`IterStatus::Success`],
    /// `next` returns `None` forever.
    pub fn status(&self) -> IterStatus {
        self.status
    }

    /// Advance to the next result, or `None` when the enumeration is
    /// exhausted or invalidated. Invalidation is latched into
    /// [`TrieIter::status`]:
    ///
    /// * [`IterStatus::OutOfSync`] when nodes were added or removed
    ///   since this iterator was created;
    /// * [`IterStatus::Replaced`] when a newer dirty iterator owns the
    ///   store's dirty slot.
    pub fn next<'t, V>(&mut self, trie: &'t mut Trie<V>) -> Option<SearchResult<'t, V>> {
        if self.status != IterStatus::Success {
            return None;
        }
        if self.trie_state_id != trie.state_id {
            self.status = IterStatus::OutOfSync;
            return None;
        }
        if let Some(id) = self.id {
            if trie.dirty_iter != Some(id) {
                self.status = IterStatus::Replaced;
                return None;
            }
        }
        match self.kind {
            IterKind::Suffixes => self.next_suffix(trie),
            IterKind::Neighbors => self.next_neighbor(trie),
            IterKind::HammingPairs => self.next_hammingpair(trie),
        }
    }

    /// Tear the iterator down. A dirty iterator that still owns the
    /// store's dirty slot wipes its traversal marks here; a replaced
    /// one must not, since the marks now belong to its successor.
    pub fn close<V>(self, trie: &mut Trie<V>) {
        if let Some(id) = self.id {
            if trie.dirty_iter == Some(id) {
                trie.reset_flags();
                trie.dirty_iter = None;
            }
        }
    }

    fn next_suffix<'t, V>(&mut self, trie: &'t mut Trie<V>) -> Option<SearchResult<'t, V>> {
        while let Some(state) = self.stack.pop() {
            let is_item = trie.pool[state.node].is_item();

            let mut child = trie.pool[state.node].child;
            while let Some(id) = child {
                self.stack.push(id, state.query, 0, state.depth + 1);
                child = trie.pool[id].sibling;
            }

            if is_item {
                return Some(result_for(trie, state.query, state.node, 0));
            }
        }
        None
    }

    fn next_neighbor<'t, V>(&mut self, trie: &'t mut Trie<V>) -> Option<SearchResult<'t, V>> {
        while let Some(state) = self.stack.pop() {
            if state.depth == self.target_depth {
                // the query itself (hd == 0) is never a neighbor
                if state.hd == 0 || !trie.pool[state.node].is_item() {
                    continue;
                }
                return Some(result_for(trie, state.query, state.node, state.hd));
            }

            let qch = query_byte(trie, state.query, state.depth);
            let mut child = trie.pool[state.node].child;
            while let Some(id) = child {
                if trie.pool[id].ch == qch {
                    self.stack.push(id, state.query, state.hd, state.depth + 1);
                } else if state.hd < self.maxhd {
                    self.stack.push(id, state.query, state.hd + 1, state.depth + 1);
                }
                child = trie.pool[id].sibling;
            }
        }
        None
    }

    fn next_hammingpair<'t, V>(&mut self, trie: &'t mut Trie<V>) -> Option<SearchResult<'t, V>> {
        loop {
            let state = match self.stack.pop() {
                Some(state) => state,
                None => {
                    // current query exhausted, seed the next one
                    let query = self.targets.pop()?;
                    trie.pool[query].flags |= EXPLORED;
                    self.stack.push(NodeId::ROOT, query, 0, 0);
                    continue;
                }
            };

            if state.depth == self.target_depth {
                if !trie.pool[state.node].is_item() {
                    trie.pool[state.node].flags |= EXPLORED;
                    continue;
                }
                return Some(result_for(trie, state.query, state.node, state.hd));
            }

            let qch = query_byte(trie, state.query, state.depth);
            let mut n_children = 0usize;
            let mut n_explored = 0usize;
            let mut child = trie.pool[state.node].child;
            while let Some(id) = child {
                n_children += 1;
                if trie.pool[id].flags & EXPLORED != 0 {
                    // subtree already handled from an earlier query
                    n_explored += 1;
                } else if trie.pool[id].ch == qch {
                    self.stack.push(id, state.query, state.hd, state.depth + 1);
                } else if state.hd < self.maxhd {
                    self.stack.push(id, state.query, state.hd + 1, state.depth + 1);
                }
                child = trie.pool[id].sibling;
            }
            if n_children == n_explored {
                trie.pool[state.node].flags |= EXPLORED;
            }
        }
    }
}

fn query_byte<V>(trie: &Trie<V>, query: NodeId, depth: usize) -> u8 {
    let item = trie.pool[query]
        .item
        .as_ref()
        .expect("query node lost its item");
    item.key()[depth]
}

fn result_for<V>(trie: &Trie<V>, query: NodeId, target: NodeId, hd: u32) -> SearchResult<'_, V> {
    let query = trie.pool[query]
        .item
        .as_ref()
        .map(|item| (item.key(), &item.value));
    let target = trie.pool[target]
        .item
        .as_ref()
        .expect("emitted target lost its item");
    SearchResult {
        query,
        target: (target.key(), &target.value),
        hd,
    }
}
