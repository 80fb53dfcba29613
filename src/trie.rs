use std::mem;

use bstr::ByteSlice;
use tracing::trace;

use crate::error::{Result, TrieError};
use crate::iter::IterId;
use crate::node::{Item, Node, NodeId, NodePool};

/// In-memory trie keyed by NUL-free byte strings with one payload per
/// key. Supports exact lookup, prefix operations, and approximate
/// matching under Hamming distance through the iterators constructed
/// by [`Trie::iter_suffixes`], [`Trie::iter_neighbors`], and
/// [`Trie::iter_hammingpairs`].
///
/// Mutations that add or remove nodes bump an internal state id.
/// Iterators snapshot the id at construction and refuse to run once it
/// diverges, so a stale traversal is reported instead of silently
/// yielding wrong results.
pub struct Trie<V> {
    pub(crate) pool: NodePool<V>,
    num_nodes: usize,
    num_items: usize,
    memsize: usize,
    pub(crate) state_id: u64,
    pub(crate) dirty_iter: Option<IterId>,
    iter_seq: u64,
}

impl<V> Trie<V> {
    pub fn new() -> Self {
        Trie {
            pool: NodePool::new(),
            num_nodes: 0,
            num_items: 0,
            memsize: mem::size_of::<Self>(),
            state_id: 0,
            dirty_iter: None,
            iter_seq: 0,
        }
    }

    /// Number of non-root nodes currently allocated.
    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    /// Number of keys stored.
    pub fn num_items(&self) -> usize {
        self.num_items
    }

    /// Tracked byte cost of the store, every node, and every key
    /// buffer. Payloads are not counted.
    pub fn mem_usage(&self) -> usize {
        self.memsize
    }

    /// Child of `node` labeled `ch`, by linear scan of the sibling
    /// list.
    pub(crate) fn get_child(&self, node: NodeId, ch: u8) -> Option<NodeId> {
        let mut next = self.pool[node].child;
        while let Some(id) = next {
            if self.pool[id].ch == ch {
                return Some(id);
            }
            next = self.pool[id].sibling;
        }
        None
    }

    /// Node reached by walking `key` from the root, item-bearing or
    /// not.
    pub(crate) fn get_node(&self, key: &[u8]) -> Option<NodeId> {
        let mut node = NodeId::ROOT;
        for &ch in key {
            node = self.get_child(node, ch)?;
        }
        Some(node)
    }

    /// True iff `key` was inserted and not deleted.
    pub fn has_key(&self, key: &[u8]) -> bool {
        self.get_node(key)
            .map_or(false, |id| self.pool[id].is_item())
    }

    /// True iff some stored key has `key` as a prefix (the key itself
    /// included).
    pub fn has_node(&self, key: &[u8]) -> bool {
        self.get_node(key).is_some()
    }

    /// Stored key and payload for `key`, if present. The returned key
    /// slice excludes the internal terminator.
    pub fn get_item(&self, key: &[u8]) -> Option<(&[u8], &V)> {
        let id = self.get_node(key)?;
        let item = self.pool[id].item.as_ref()?;
        Some((item.key(), &item.value))
    }

    /// Longest stored key that is a prefix of `key`. The empty key, if
    /// stored, qualifies for any query.
    pub fn longest_prefix(&self, key: &[u8]) -> Option<(&[u8], &V)> {
        let mut best = self.pool[NodeId::ROOT].item.as_ref();
        let mut node = NodeId::ROOT;
        for &ch in key {
            match self.get_child(node, ch) {
                Some(id) => {
                    node = id;
                    if let Some(item) = self.pool[id].item.as_ref() {
                        best = Some(item);
                    }
                }
                None => break,
            }
        }
        best.map(|item| (item.key(), &item.value))
    }

    /// Insert `key` with `value`, creating any missing nodes along the
    /// path. Returns the displaced payload when `key` was already
    /// present.
    ///
    /// The state id advances only when the item count grows; a plain
    /// overwrite leaves live iterators valid.
    #[tracing::instrument(level = "trace", skip_all, fields(key = %key.as_bstr()))]
    pub fn set(&mut self, key: &[u8], value: V) -> Result<Option<V>> {
        if key.find_byte(0).is_some() {
            return Err(TrieError::EmbeddedNul);
        }

        let mut node = NodeId::ROOT;
        for &ch in key {
            node = match self.get_child(node, ch) {
                Some(id) => id,
                None => {
                    // prepend to the sibling list; order carries no meaning
                    let head = self.pool[node].child;
                    let id = self.pool.alloc(ch, node, head);
                    self.pool[node].child = Some(id);
                    self.num_nodes += 1;
                    self.memsize += mem::size_of::<Node<V>>();
                    id
                }
            };
        }

        let old_value = match self.pool[node].item.take() {
            Some(item) => {
                self.memsize -= item.buf_len();
                Some(item.value)
            }
            None => {
                self.num_items += 1;
                // the tree gained an item (and possibly nodes); in-flight
                // iterators must not miss it
                self.state_id += 1;
                None
            }
        };

        let item = Item::new(key, value);
        self.memsize += item.buf_len();
        self.pool[node].item = Some(item);
        trace!(num_items = self.num_items, overwrote = old_value.is_some());
        Ok(old_value)
    }

    /// Remove `key` and return its payload, pruning any structural
    /// nodes left childless on the path. Fails without mutation when
    /// `key` is not an item.
    #[tracing::instrument(level = "trace", skip_all, fields(key = %key.as_bstr()))]
    pub fn del(&mut self, key: &[u8]) -> Result<V> {
        let id = self.get_node(key).ok_or(TrieError::KeyNotFound)?;
        let item = self.pool[id].item.take().ok_or(TrieError::KeyNotFound)?;
        self.memsize -= item.buf_len();
        self.num_items -= 1;

        // walk upward unlinking dead branches
        let mut node = id;
        while node != NodeId::ROOT
            && self.pool[node].child.is_none()
            && !self.pool[node].is_item()
        {
            let parent = self.pool[node].parent.expect("non-root node without parent");
            self.unlink_child(parent, node);
            self.pool.dealloc(node);
            self.num_nodes -= 1;
            self.memsize -= mem::size_of::<Node<V>>();
            node = parent;
        }

        self.state_id += 1;
        trace!(num_items = self.num_items, num_nodes = self.num_nodes);
        Ok(item.value)
    }

    fn unlink_child(&mut self, parent: NodeId, child: NodeId) {
        let mut prev: Option<NodeId> = None;
        let mut cur = self.pool[parent].child;
        while let Some(id) = cur {
            if id == child {
                break;
            }
            prev = Some(id);
            cur = self.pool[id].sibling;
        }
        debug_assert_eq!(cur, Some(child));

        let next = self.pool[child].sibling;
        match prev {
            Some(p) => self.pool[p].sibling = next,
            None => self.pool[parent].child = next,
        }
    }

    /// Tear down every node, handing each stored payload to `dealloc`.
    /// The store ends up as if freshly created. Dropping the store
    /// instead runs the payloads' own `Drop`.
    pub fn clear_with(&mut self, dealloc: impl FnMut(V)) {
        self.pool.clear_with(dealloc);
        self.num_nodes = 0;
        self.num_items = 0;
        self.memsize = mem::size_of::<Self>();
        self.state_id += 1;
        self.dirty_iter = None;
    }

    /// Item-bearing nodes at exactly `depth`, collected by an explicit
    /// stack DFS. Seeds the all-pairs enumeration.
    pub(crate) fn collect_items_at_depth(&self, depth: usize) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<(NodeId, usize)> = vec![(NodeId::ROOT, depth)];
        while let Some((node, remaining)) = stack.pop() {
            if remaining == 0 {
                if self.pool[node].is_item() {
                    out.push(node);
                }
                continue;
            }
            let mut child = self.pool[node].child;
            while let Some(id) = child {
                stack.push((id, remaining - 1));
                child = self.pool[id].sibling;
            }
        }
        out
    }

    pub(crate) fn reset_flags(&mut self) {
        self.pool.reset_flags();
    }

    pub(crate) fn next_iter_id(&mut self) -> IterId {
        self.iter_seq += 1;
        IterId(self.iter_seq)
    }

    #[cfg(test)]
    pub(crate) fn flags_clear(&self) -> bool {
        self.pool.iter_live().all(|node| node.flags == 0)
    }
}

impl<V> Default for Trie<V> {
    fn default() -> Self {
        Self::new()
    }
}
