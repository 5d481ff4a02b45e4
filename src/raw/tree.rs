use std::borrow::Borrow;

use crate::error::TreeError;

use super::arena::Arena;
use super::handle::Handle;
use super::node::{InternalNode, LeafNode, Node, SearchResult};

/// The core linked-leaf B+Tree backing both `BpTree` and `BpMap`.
///
/// Nodes live in an arena and refer to each other by handle: parents own
/// their children through `pointers`, and leaves form a doubly-linked chain
/// in key order. The root is always present; an empty tree is a single empty
/// leaf.
///
/// Duplicate keys are allowed unless `no_dup` is set. A maximal chain of
/// leaves holding one repeated key (a pure run) is only ever entered from
/// its first leaf: overflow leaves created when a full run grows are linked
/// into the chain but never installed in a parent.
pub(crate) struct RawBpTree<K, V> {
    nodes: Arena<Node<K, V>>,
    root: Handle,
    capacity: usize,
    no_dup: bool,
    len: usize,
}

impl<K, V> RawBpTree<K, V> {
    pub(crate) fn new(capacity: usize, no_dup: bool) -> Self {
        assert!(capacity >= 2, "node capacity must be at least 2");
        let mut nodes = Arena::new();
        let root = nodes.alloc(Node::Leaf(LeafNode::new(capacity, no_dup)));
        Self {
            nodes,
            root,
            capacity,
            no_dup,
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn clear(&mut self) {
        self.nodes.clear();
        self.root = self.nodes.alloc(Node::Leaf(LeafNode::new(self.capacity, self.no_dup)));
        self.len = 0;
    }

    #[inline]
    pub(crate) fn node(&self, handle: Handle) -> &Node<K, V> {
        self.nodes.get(handle)
    }

    #[inline]
    pub(crate) fn leaf(&self, handle: Handle) -> &LeafNode<K, V> {
        self.nodes.get(handle).as_leaf()
    }

    #[inline]
    fn leaf_mut(&mut self, handle: Handle) -> &mut LeafNode<K, V> {
        self.nodes.get_mut(handle).as_leaf_mut()
    }

    #[inline]
    fn internal(&self, handle: Handle) -> &InternalNode<K> {
        self.nodes.get(handle).as_internal()
    }

    #[inline]
    fn internal_mut(&mut self, handle: Handle) -> &mut InternalNode<K> {
        self.nodes.get_mut(handle).as_internal_mut()
    }

    /// Links `node` into the leaf chain between `prev` and `next`.
    fn link(&mut self, node: Handle, prev: Option<Handle>, next: Option<Handle>) {
        {
            let leaf = self.leaf_mut(node);
            leaf.set_prev(prev);
            leaf.set_next(next);
        }
        if let Some(prev) = prev {
            self.leaf_mut(prev).set_next(Some(node));
        }
        if let Some(next) = next {
            self.leaf_mut(next).set_prev(Some(node));
        }
    }

    /// Removes `node` from the leaf chain, joining its neighbors.
    fn unlink(&mut self, node: Handle) {
        let (prev, next) = {
            let leaf = self.leaf(node);
            (leaf.prev(), leaf.next())
        };
        if let Some(prev) = prev {
            self.leaf_mut(prev).set_next(next);
        }
        if let Some(next) = next {
            self.leaf_mut(next).set_prev(prev);
        }
        let leaf = self.leaf_mut(node);
        leaf.set_prev(None);
        leaf.set_next(None);
    }
}

impl<K: Ord + Clone, V> RawBpTree<K, V> {
    /// Inserts a key/value pair, growing the root when a split bubbles all
    /// the way up.
    pub(crate) fn insert(&mut self, key: K, value: V) -> Result<(), TreeError> {
        let root = self.root;
        let (node, sibling, added) = self.insert_node(root, key, value)?;
        match sibling {
            None => self.root = node,
            Some(sibling) => {
                let node_key = self.node(node).min_key().clone();
                let sibling_key = self.node(sibling).min_key().clone();
                let mut new_root = InternalNode::new(self.capacity);
                new_root.put_kp(node_key, node)?;
                new_root.put_kp(sibling_key, sibling)?;
                self.root = self.nodes.alloc(Node::Internal(new_root));
            }
        }
        if added {
            self.len += 1;
        }
        Ok(())
    }

    /// Recursive insertion step. Returns the node now standing where `node`
    /// stood, an optional new right sibling the parent must install, and
    /// whether an entry was physically added (false when `no_dup` replaced a
    /// value in place).
    fn insert_node(
        &mut self,
        node: Handle,
        key: K,
        value: V,
    ) -> Result<(Handle, Option<Handle>, bool), TreeError> {
        match self.node(node) {
            Node::Leaf(_) => self.leaf_insert(node, key, value),
            Node::Internal(internal) => {
                let index = internal.child_index(&key);
                let child = internal.pointer(index);
                let (replacement, sibling, added) = self.insert_node(child, key, value)?;

                // The child's minimum may have changed, or the child may have
                // been replaced outright by a new first-of-run leaf.
                let replacement_key = self.node(replacement).min_key().clone();
                let internal = self.internal_mut(node);
                internal.set_key(index, replacement_key);
                internal.set_pointer(index, replacement);

                match sibling {
                    Some(sibling) => {
                        let sibling_key = self.node(sibling).min_key().clone();
                        let (a, b) = self.internal_insert(node, sibling_key, sibling)?;
                        Ok((a, b, added))
                    }
                    None => Ok((node, None, added)),
                }
            }
        }
    }

    fn internal_insert(
        &mut self,
        node: Handle,
        key: K,
        pointer: Handle,
    ) -> Result<(Handle, Option<Handle>), TreeError> {
        if !self.internal(node).is_full() {
            self.internal_mut(node).put_kp(key, pointer)?;
            return Ok((node, None));
        }
        self.internal_split(node, key, pointer)
    }

    /// Splitting an internal node on a key it already holds would produce a
    /// duplicate separator, so that is refused.
    fn internal_split(
        &mut self,
        node: Handle,
        key: K,
        pointer: Handle,
    ) -> Result<(Handle, Option<Handle>), TreeError> {
        if self.internal(node).has(&key) {
            return Err(TreeError::CapacityViolation);
        }
        let mut right = InternalNode::new(self.capacity);
        self.internal_mut(node).balance_into(&mut right, &key);
        if right.key_count() > 0 && key < *right.key(0) {
            let right = self.nodes.alloc(Node::Internal(right));
            self.internal_mut(node).put_kp(key, pointer)?;
            Ok((node, Some(right)))
        } else {
            right.put_kp(key, pointer)?;
            let right = self.nodes.alloc(Node::Internal(right));
            Ok((node, Some(right)))
        }
    }

    fn leaf_insert(
        &mut self,
        node: Handle,
        key: K,
        value: V,
    ) -> Result<(Handle, Option<Handle>, bool), TreeError> {
        if self.leaf(node).no_dup() {
            if let SearchResult::Found(index) = self.leaf(node).search(&key) {
                self.leaf_mut(node).set_value(index, value);
                return Ok((node, None, false));
            }
        }
        if !self.leaf(node).is_full() {
            self.leaf_mut(node).put_kv(key, value)?;
            return Ok((node, None, true));
        }
        let (a, b) = self.leaf_split(node, key, value)?;
        Ok((a, b, true))
    }

    fn leaf_split(
        &mut self,
        node: Handle,
        key: K,
        value: V,
    ) -> Result<(Handle, Option<Handle>), TreeError> {
        if self.leaf(node).is_pure() {
            return self.pure_leaf_split(node, key, value);
        }
        let mut right = LeafNode::new(self.capacity, self.no_dup);
        self.leaf_mut(node).balance_into(&mut right, &key);
        let goes_left = right.key_count() > 0 && key < *right.key(0);
        let next = self.leaf(node).next();
        let right = self.nodes.alloc(Node::Leaf(right));
        self.link(right, Some(node), next);
        if goes_left {
            self.leaf_mut(node).put_kv(key, value)?;
        } else {
            self.leaf_mut(right).put_kv(key, value)?;
        }
        Ok((node, Some(right)))
    }

    /// Splits a full leaf whose keys are all equal. The run must stay
    /// contiguous, so instead of dividing it the new entry goes into a fresh
    /// leaf placed before, inside, or after the run.
    fn pure_leaf_split(
        &mut self,
        node: Handle,
        key: K,
        value: V,
    ) -> Result<(Handle, Option<Handle>), TreeError> {
        match key.cmp(self.leaf(node).key(0)) {
            std::cmp::Ordering::Less => {
                // The new key becomes the subtree minimum: a fresh leaf takes
                // this node's place and the run is handed up as its sibling.
                let mut fresh = LeafNode::new(self.capacity, self.no_dup);
                fresh.put_kv(key, value)?;
                let prev = self.leaf(node).prev();
                let fresh = self.nodes.alloc(Node::Leaf(fresh));
                self.link(fresh, prev, Some(node));
                Ok((fresh, Some(node)))
            }
            std::cmp::Ordering::Equal => {
                // Extend the run in place; an overflow leaf is chained in but
                // never installed in a parent.
                let end = self.end_of_pure_run(node);
                if self.leaf(end).is_full() {
                    let mut overflow = LeafNode::new(self.capacity, self.no_dup);
                    overflow.put_kv(key, value)?;
                    let next = self.leaf(end).next();
                    let overflow = self.nodes.alloc(Node::Leaf(overflow));
                    self.link(overflow, Some(end), next);
                } else {
                    self.leaf_mut(end).put_kv(key, value)?;
                }
                Ok((node, None))
            }
            std::cmp::Ordering::Greater => {
                // A new leaf after the run; the parent installs it.
                let mut fresh = LeafNode::new(self.capacity, self.no_dup);
                fresh.put_kv(key, value)?;
                let end = self.end_of_pure_run(node);
                let next = self.leaf(end).next();
                let fresh = self.nodes.alloc(Node::Leaf(fresh));
                self.link(fresh, Some(end), next);
                Ok((node, Some(fresh)))
            }
        }
    }

    /// Removes every entry with this key whose value the predicate accepts,
    /// returning the removed values in key-chain order.
    ///
    /// Emptied leaves are unlinked and their separators removed bottom-up;
    /// an internal node that loses all children collapses, and a root left
    /// with a single child is replaced by it. There is no redistribution
    /// between under-full siblings.
    pub(crate) fn remove_where<Q, F>(&mut self, key: &Q, mut pred: F) -> Vec<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Ord,
        F: FnMut(&V) -> bool,
    {
        let mut removed = Vec::new();
        let root = self.root;
        let alive = self.remove_node(root, key, &mut pred, &mut removed);
        if alive {
            loop {
                match self.node(self.root) {
                    Node::Internal(internal) if internal.key_count() == 1 => {
                        let child = internal.pointer(0);
                        let old_root = self.root;
                        self.nodes.free(old_root);
                        self.root = child;
                    }
                    _ => break,
                }
            }
        } else {
            self.root = self.nodes.alloc(Node::Leaf(LeafNode::new(self.capacity, self.no_dup)));
        }
        self.len -= removed.len();
        removed
    }

    /// Recursive removal step. Returns whether `node` survived; a node that
    /// ends up empty is freed before returning.
    fn remove_node<Q, F>(&mut self, node: Handle, key: &Q, pred: &mut F, removed: &mut Vec<V>) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Ord,
        F: FnMut(&V) -> bool,
    {
        match self.node(node) {
            Node::Leaf(_) => self.leaf_remove(node, key, pred, removed),
            Node::Internal(internal) => {
                let index = internal.child_index(key);
                let child = internal.pointer(index);
                if self.remove_node(child, key, pred, removed) {
                    let child_key = self.node(child).min_key().clone();
                    self.internal_mut(node).set_key(index, child_key);
                } else {
                    self.internal_mut(node).remove_at(index);
                }
                if self.internal(node).key_count() == 0 {
                    self.nodes.free(node);
                    return false;
                }
                true
            }
        }
    }

    fn leaf_remove<Q, F>(&mut self, node: Handle, key: &Q, pred: &mut F, removed: &mut Vec<V>) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Ord,
        F: FnMut(&V) -> bool,
    {
        self.strip_matches(node, key, pred, removed);

        // The run may continue across the chain. Later leaves of a run are
        // never installed in a parent, so they can be unlinked freely.
        let mut current = self.leaf(node).next();
        while let Some(c) = current {
            {
                let leaf = self.leaf(c);
                if leaf.is_empty() || leaf.key(0).borrow() != key {
                    break;
                }
            }
            self.strip_matches(c, key, pred, removed);
            let next = self.leaf(c).next();
            if self.leaf(c).is_empty() {
                self.unlink(c);
                self.nodes.free(c);
            }
            current = next;
        }

        // If the installed leaf emptied while later run leaves survived,
        // absorb the next one so the parent's slot keeps pointing at the run.
        if self.leaf(node).is_empty() {
            if let Some(successor) = self.leaf(node).next() {
                let matches = {
                    let leaf = self.leaf(successor);
                    !leaf.is_empty() && leaf.key(0).borrow() == key
                };
                if matches {
                    let (keys, values) = self.leaf_mut(successor).take_entries();
                    self.leaf_mut(node).adopt_entries(keys, values);
                    self.unlink(successor);
                    self.nodes.free(successor);
                }
            }
        }

        if self.leaf(node).is_empty() {
            self.unlink(node);
            self.nodes.free(node);
            return false;
        }
        true
    }

    /// Removes matching entries of `key` from one leaf.
    fn strip_matches<Q, F>(&mut self, node: Handle, key: &Q, pred: &mut F, removed: &mut Vec<V>)
    where
        K: Borrow<Q>,
        Q: ?Sized + Ord,
        F: FnMut(&V) -> bool,
    {
        let leaf = self.nodes.get_mut(node).as_leaf_mut();
        let mut index = match leaf.search(key) {
            SearchResult::Found(index) | SearchResult::NotFound(index) => index,
        };
        while index < leaf.key_count() && leaf.key(index).borrow() == key {
            if pred(leaf.value(index)) {
                let (_, value) = leaf.remove_at(index);
                removed.push(value);
            } else {
                index += 1;
            }
        }
    }

    /// Walks the leaf chain to the last leaf whose keys equal this leaf's
    /// leading key.
    pub(crate) fn end_of_pure_run(&self, node: Handle) -> Handle {
        let mut current = node;
        loop {
            let leaf = self.leaf(current);
            let Some(next) = leaf.next() else {
                return current;
            };
            let next_leaf = self.leaf(next);
            if next_leaf.key_count() > 0 && next_leaf.key(0) == leaf.key(0) {
                current = next;
            } else {
                return current;
            }
        }
    }
}

impl<K: Ord, V> RawBpTree<K, V> {
    /// Descends to the leaf and index where the first occurrence of `key`
    /// resides if present, or its insertion point.
    pub(crate) fn get_start<Q>(&self, node: Handle, key: &Q) -> (usize, Handle)
    where
        K: Borrow<Q>,
        Q: ?Sized + Ord,
    {
        match self.node(node) {
            Node::Internal(internal) => {
                let index = internal.child_index(key);
                self.get_start(internal.pointer(index), key)
            }
            Node::Leaf(_) => self.leaf_get_start(node, key),
        }
    }

    fn leaf_get_start<Q>(&self, node: Handle, key: &Q) -> (usize, Handle)
    where
        K: Borrow<Q>,
        Q: ?Sized + Ord,
    {
        let leaf = self.leaf(node);
        let (mut index, found) = match leaf.search(key) {
            SearchResult::Found(index) => (index, true),
            SearchResult::NotFound(index) => (index, false),
        };
        if index >= leaf.key_count() && index > 0 {
            index = leaf.key_count() - 1;
        }
        // Everything here is below the key: the occurrence, if any, starts
        // in a later leaf of the chain (a pure run can outgrow the leaf its
        // parent knows about).
        if !found
            && (leaf.key_count() == 0 || leaf.key(index).borrow() < key)
            && leaf.next().is_some()
        {
            return self.leaf_get_start(leaf.next().expect("next checked above"), key);
        }
        (index, node)
    }

    /// Location of the first occurrence of `key`, or of its insertion point.
    /// `None` only for an empty tree.
    pub(crate) fn start_for<Q>(&self, key: &Q) -> Option<(Handle, usize)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Ord,
    {
        if self.len == 0 {
            return None;
        }
        let (index, leaf) = self.get_start(self.root, key);
        if index >= self.leaf(leaf).key_count() {
            return None;
        }
        Some((leaf, index))
    }

    /// Location of the last entry with key `<=` the given key, scanning to
    /// the end of a duplicate run. `None` when every key is greater.
    pub(crate) fn end_for<Q>(&self, key: &Q) -> Option<(Handle, usize)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Ord,
    {
        let (leaf, index) = self.start_for(key)?;
        match self.leaf(leaf).key(index).borrow().cmp(key) {
            std::cmp::Ordering::Equal => {
                let (mut l, mut i) = (leaf, index);
                while let Some((nl, ni)) = self.next_location(l, i) {
                    if self.leaf(nl).key(ni).borrow() == key {
                        l = nl;
                        i = ni;
                    } else {
                        break;
                    }
                }
                Some((l, i))
            }
            // The whole tree is below the key; the clamped position is the
            // last entry.
            std::cmp::Ordering::Less => Some((leaf, index)),
            std::cmp::Ordering::Greater => self.prev_location(leaf, index),
        }
    }

    /// Steps a cursor one entry forward along the leaf chain.
    pub(crate) fn next_location(&self, leaf: Handle, index: usize) -> Option<(Handle, usize)> {
        if index + 1 < self.leaf(leaf).key_count() {
            return Some((leaf, index + 1));
        }
        let mut next = self.leaf(leaf).next();
        while let Some(n) = next {
            if self.leaf(n).key_count() > 0 {
                return Some((n, 0));
            }
            next = self.leaf(n).next();
        }
        None
    }

    /// Steps a cursor one entry backward along the leaf chain.
    pub(crate) fn prev_location(&self, leaf: Handle, index: usize) -> Option<(Handle, usize)> {
        if index > 0 {
            return Some((leaf, index - 1));
        }
        let mut prev = self.leaf(leaf).prev();
        while let Some(p) = prev {
            let count = self.leaf(p).key_count();
            if count > 0 {
                return Some((p, count - 1));
            }
            prev = self.leaf(p).prev();
        }
        None
    }

    /// Location of the smallest entry.
    pub(crate) fn first_location(&self) -> Option<(Handle, usize)> {
        if self.len == 0 {
            return None;
        }
        let mut current = self.root;
        while let Node::Internal(internal) = self.node(current) {
            current = internal.pointer(0);
        }
        Some((current, 0))
    }

    /// Location of the largest entry. The rightmost installed leaf may be
    /// followed by overflow leaves of a pure run, so the chain is walked to
    /// its end.
    pub(crate) fn last_location(&self) -> Option<(Handle, usize)> {
        if self.len == 0 {
            return None;
        }
        let mut current = self.root;
        while let Node::Internal(internal) = self.node(current) {
            current = internal.pointer(internal.key_count() - 1);
        }
        while let Some(next) = self.leaf(current).next() {
            current = next;
        }
        let count = self.leaf(current).key_count();
        Some((current, count - 1))
    }

    pub(crate) fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Ord,
    {
        match self.start_for(key) {
            Some((leaf, index)) => self.leaf(leaf).key(index).borrow() == key,
            None => false,
        }
    }

    pub(crate) fn count<Q>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: ?Sized + Ord,
    {
        let mut count = 0;
        let mut location = self.start_for(key);
        while let Some((leaf, index)) = location {
            if self.leaf(leaf).key(index).borrow() != key {
                break;
            }
            count += 1;
            location = self.next_location(leaf, index);
        }
        count
    }

    /// Replaces the value of every entry with this key that the predicate
    /// accepts. A predicate that never matches is a silent no-op; the shape
    /// of the tree is untouched either way.
    pub(crate) fn replace<Q, F>(&mut self, key: &Q, mut pred: F, value: &V)
    where
        K: Borrow<Q>,
        Q: ?Sized + Ord,
        F: FnMut(&V) -> bool,
        V: Clone,
    {
        let mut location = self.start_for(key);
        while let Some((leaf, index)) = location {
            if self.leaf(leaf).key(index).borrow() != key {
                break;
            }
            if pred(self.leaf(leaf).value(index)) {
                self.leaf_mut(leaf).set_value(index, value.clone());
            }
            location = self.next_location(leaf, index);
        }
    }
}
