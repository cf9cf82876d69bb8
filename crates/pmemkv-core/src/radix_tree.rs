//! Byte-wise radix tree mapping keys to record handles.
//!
//! Each node carries the edge label leading to it as a `PersistentString`
//! of `SEGMENT_CAPACITY` bytes. A label that does not fit is split across a
//! chain of nodes; removal merges a valueless node with its only child when
//! the joined label fits one cell. Children are kept sorted by their first
//! byte, so a depth-first walk yields keys in lexicographic order.
//!
//! Nodes live in a vector and refer to each other by index; freed slots are
//! reused.

use std::ops::Bound;

use crate::engine::in_bounds;
use crate::pstring::PersistentString;

pub const SEGMENT_CAPACITY: usize = 16;

type Segment = PersistentString<SEGMENT_CAPACITY>;
type NodeId = u32;

const ROOT: NodeId = 0;

/// Build a segment from at most `SEGMENT_CAPACITY` bytes.
fn segment(bytes: &[u8]) -> Segment {
    Segment::try_from_bytes(&bytes[..bytes.len().min(SEGMENT_CAPACITY)]).unwrap_or_default()
}

struct Node<V> {
    segment: Segment,
    children: Vec<(u8, NodeId)>,
    value: Option<V>,
}

impl<V> Default for Node<V> {
    fn default() -> Self {
        Self { segment: Segment::new(), children: Vec::new(), value: None }
    }
}

enum Step {
    Descend,
    Skip,
    Stop,
}

pub struct RadixTree<V> {
    nodes: Vec<Node<V>>,
    free: Vec<NodeId>,
    len: usize,
}

impl<V: Copy> RadixTree<V> {
    pub fn new() -> Self {
        Self { nodes: vec![Node::default()], free: Vec::new(), len: 0 }
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Nodes in use, root included.
    pub fn node_count(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    fn seg(&self, id: NodeId) -> &[u8] {
        self.nodes[id as usize].segment.as_bytes()
    }

    fn child(&self, id: NodeId, byte: u8) -> Option<NodeId> {
        let children = &self.nodes[id as usize].children;
        children
            .binary_search_by_key(&byte, |(b, _)| *b)
            .ok()
            .map(|i| children[i].1)
    }

    fn set_child(&mut self, id: NodeId, byte: u8, child: NodeId) {
        let children = &mut self.nodes[id as usize].children;
        match children.binary_search_by_key(&byte, |(b, _)| *b) {
            Ok(i) => children[i].1 = child,
            Err(i) => children.insert(i, (byte, child)),
        }
    }

    fn unlink(&mut self, id: NodeId, byte: u8) {
        let children = &mut self.nodes[id as usize].children;
        if let Ok(i) = children.binary_search_by_key(&byte, |(b, _)| *b) {
            children.remove(i);
        }
    }

    fn alloc(&mut self, node: Node<V>) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                self.nodes[id as usize] = node;
                id
            }
            None => {
                self.nodes.push(node);
                (self.nodes.len() - 1) as NodeId
            }
        }
    }

    fn release(&mut self, id: NodeId) {
        self.nodes[id as usize] = Node::default();
        self.free.push(id);
    }

    /// Chain of nodes spelling `rest` (non-empty), ending in `value`.
    fn new_chain(&mut self, rest: &[u8], value: V) -> NodeId {
        let mut chunks: Vec<&[u8]> = rest.chunks(SEGMENT_CAPACITY).collect();
        let last = chunks.pop().unwrap_or_default();
        let mut first = last.first().copied().unwrap_or_default();
        let mut id = self.alloc(Node { segment: segment(last), children: Vec::new(), value: Some(value) });
        for chunk in chunks.into_iter().rev() {
            id = self.alloc(Node { segment: segment(chunk), children: vec![(first, id)], value: None });
            first = chunk[0];
        }
        id
    }

    /// Insert or replace; returns the previous value.
    pub fn insert(&mut self, key: &[u8], value: V) -> Option<V> {
        let mut node = ROOT;
        let mut rest = key;
        loop {
            if rest.is_empty() {
                let old = self.nodes[node as usize].value.replace(value);
                if old.is_none() {
                    self.len += 1;
                }
                return old;
            }

            let byte = rest[0];
            let Some(child) = self.child(node, byte) else {
                let leaf = self.new_chain(rest, value);
                self.set_child(node, byte, leaf);
                self.len += 1;
                return None;
            };

            let label = self.seg(child);
            let common = label.iter().zip(rest).take_while(|(a, b)| a == b).count();
            if common < label.len() {
                // Split the edge: a new node takes the shared part.
                let (head, tail) = (segment(&label[..common]), segment(&label[common..]));
                let tail_first = label[common];
                self.nodes[child as usize].segment = tail;
                let mid = self.alloc(Node { segment: head, children: vec![(tail_first, child)], value: None });
                self.set_child(node, byte, mid);
                node = mid;
            } else {
                node = child;
            }
            rest = &rest[common..];
        }
    }

    fn find(&self, key: &[u8]) -> Option<NodeId> {
        let mut node = ROOT;
        let mut rest = key;
        while !rest.is_empty() {
            node = self.child(node, rest[0])?;
            rest = rest.strip_prefix(self.seg(node))?;
        }
        Some(node)
    }

    pub fn get(&self, key: &[u8]) -> Option<V> {
        self.find(key).and_then(|id| self.nodes[id as usize].value)
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// Remove `key`; returns its value.
    pub fn remove(&mut self, key: &[u8]) -> Option<V> {
        let mut path: Vec<(NodeId, u8)> = Vec::new();
        let mut node = ROOT;
        let mut rest = key;
        while !rest.is_empty() {
            let byte = rest[0];
            let child = self.child(node, byte)?;
            rest = rest.strip_prefix(self.seg(child))?;
            path.push((node, byte));
            node = child;
        }

        let old = self.nodes[node as usize].value.take()?;
        self.len -= 1;
        self.compact(node, path);
        Some(old)
    }

    /// Drop valueless leaves upwards from `node`, then merge a valueless
    /// single-child node into its child when the labels fit one cell.
    fn compact(&mut self, mut node: NodeId, mut path: Vec<(NodeId, u8)>) {
        while node != ROOT && self.nodes[node as usize].value.is_none() {
            match self.nodes[node as usize].children.len() {
                0 => {
                    let Some((parent, byte)) = path.pop() else { break };
                    self.unlink(parent, byte);
                    self.release(node);
                    node = parent;
                }
                1 => {
                    let child = self.nodes[node as usize].children[0].1;
                    if self.seg(node).len() + self.seg(child).len() <= SEGMENT_CAPACITY {
                        let mut label = self.seg(node).to_vec();
                        label.extend_from_slice(self.seg(child));
                        let merged = std::mem::take(&mut self.nodes[child as usize]);
                        let target = &mut self.nodes[node as usize];
                        target.segment = segment(&label);
                        target.children = merged.children;
                        target.value = merged.value;
                        self.free.push(child);
                    }
                    break;
                }
                _ => break,
            }
        }
    }

    /// Depth-first walk in key order from `start`, whose key before its own
    /// label is `base`.
    fn walk(&self, start: NodeId, base: Vec<u8>, mut visit: impl FnMut(&[u8], Option<V>) -> Step) {
        let mut key = base;
        let mut stack = vec![(start, key.len())];
        while let Some((id, depth)) = stack.pop() {
            let node = &self.nodes[id as usize];
            key.truncate(depth);
            key.extend_from_slice(node.segment.as_bytes());
            match visit(&key, node.value) {
                Step::Stop => return,
                Step::Skip => {}
                Step::Descend => {
                    let depth = key.len();
                    stack.extend(node.children.iter().rev().map(|(_, child)| (*child, depth)));
                }
            }
        }
    }

    /// Subtree holding exactly the keys that start with `prefix`, with the
    /// key leading up to its root's label.
    fn locate_prefix(&self, prefix: &[u8]) -> Option<(NodeId, Vec<u8>)> {
        let mut node = ROOT;
        let mut base = Vec::new();
        let mut rest = prefix;
        loop {
            if rest.is_empty() {
                return Some((node, base));
            }
            base.extend_from_slice(self.seg(node));
            let child = self.child(node, rest[0])?;
            let label = self.seg(child);
            if label.starts_with(rest) {
                return Some((child, base));
            }
            rest = rest.strip_prefix(label)?;
            node = child;
        }
    }

    /// Entries whose key starts with `prefix`, in key order.
    pub fn prefixed(&self, prefix: &[u8]) -> Vec<(Vec<u8>, V)> {
        let mut out = Vec::new();
        if let Some((start, base)) = self.locate_prefix(prefix) {
            self.walk(start, base, |key, value| {
                if let Some(v) = value {
                    out.push((key.to_vec(), v));
                }
                Step::Descend
            });
        }
        out
    }

    pub fn count_prefixed(&self, prefix: &[u8]) -> usize {
        let mut count = 0;
        if let Some((start, base)) = self.locate_prefix(prefix) {
            self.walk(start, base, |_, value| {
                count += value.is_some() as usize;
                Step::Descend
            });
        }
        count
    }

    /// Visit entries within the bounds in key order.
    pub fn for_each_in_range(&self, lower: Bound<&[u8]>, upper: Bound<&[u8]>, mut f: impl FnMut(&[u8], V)) {
        self.walk(ROOT, Vec::new(), |key, value| {
            let below_lower = match lower {
                Bound::Included(l) | Bound::Excluded(l) => key < l && !l.starts_with(key),
                Bound::Unbounded => false,
            };
            if below_lower {
                return Step::Skip;
            }
            let past_upper = match upper {
                Bound::Included(u) => key > u,
                Bound::Excluded(u) => key >= u,
                Bound::Unbounded => false,
            };
            if past_upper {
                return Step::Stop;
            }
            if let Some(v) = value {
                if in_bounds(key, lower, upper, |a, b| a.cmp(b)) {
                    f(key, v);
                }
            }
            Step::Descend
        });
    }
}

impl<V: Copy> Default for RadixTree<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Copy> FromIterator<(Vec<u8>, V)> for RadixTree<V> {
    fn from_iter<I: IntoIterator<Item = (Vec<u8>, V)>>(iter: I) -> Self {
        let mut tree = Self::new();
        for (key, value) in iter {
            tree.insert(&key, value);
        }
        tree
    }
}
