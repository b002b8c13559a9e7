//! Circular doubly linked rings over slot indices.
//!
//! A [`Ring`] only stores its head; the links live inside the nodes
//! themselves and are reached through a [`NodeStore`]. All operations are
//! O(1) except [`Ring::insert_by_key`], which walks the ring to keep it
//! sorted most-urgent first with FIFO order among equal keys.

use crate::priority::Priority;

/// Neighbour indices of a queued node. Meaningless while the node is detached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Link {
    pub(crate) prev: usize,
    pub(crate) next: usize,
}

/// Storage that owns the nodes a ring threads through.
pub(crate) trait NodeStore {
    fn link(&self, node: usize) -> Link;
    fn link_mut(&mut self, node: usize) -> &mut Link;
    /// Ordering key used by [`Ring::insert_by_key`].
    fn key(&self, node: usize) -> Priority;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Ring {
    head: Option<usize>,
    len: usize,
}

impl Ring {
    pub(crate) const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    pub(crate) fn head(&self) -> Option<usize> {
        self.head
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn push_back<S: NodeStore + ?Sized>(&mut self, store: &mut S, node: usize) {
        match self.head {
            None => {
                *store.link_mut(node) = Link {
                    prev: node,
                    next: node,
                };
                self.head = Some(node);
                self.len = 1;
            }
            Some(head) => self.link_before(store, head, node),
        }
    }

    pub(crate) fn push_front<S: NodeStore + ?Sized>(&mut self, store: &mut S, node: usize) {
        self.push_back(store, node);
        self.head = Some(node);
    }

    /// Inserts behind every node whose key is equally or more urgent.
    pub(crate) fn insert_by_key<S: NodeStore + ?Sized>(&mut self, store: &mut S, node: usize) {
        let Some(head) = self.head else {
            self.push_back(store, node);
            return;
        };

        let key = store.key(node);
        let mut cursor = head;
        for _ in 0..self.len {
            if key.is_higher_than(store.key(cursor)) {
                self.link_before(store, cursor, node);
                if cursor == head {
                    self.head = Some(node);
                }
                return;
            }
            cursor = store.link(cursor).next;
        }
        self.link_before(store, head, node);
    }

    pub(crate) fn remove<S: NodeStore + ?Sized>(&mut self, store: &mut S, node: usize) {
        debug_assert!(self.len > 0, "remove from empty ring");
        let Link { prev, next } = store.link(node);

        if next == node {
            self.head = None;
        } else {
            store.link_mut(prev).next = next;
            store.link_mut(next).prev = prev;
            if self.head == Some(node) {
                self.head = Some(next);
            }
        }
        *store.link_mut(node) = Link::default();
        self.len -= 1;
    }

    /// Advances the head by one, moving the old head to the tail.
    pub(crate) fn rotate<S: NodeStore + ?Sized>(&mut self, store: &S) {
        if let Some(head) = self.head {
            self.head = Some(store.link(head).next);
        }
    }

    /// Node following `node`, or `None` when `node` is the tail.
    pub(crate) fn next_of<S: NodeStore + ?Sized>(&self, store: &S, node: usize) -> Option<usize> {
        let next = store.link(node).next;
        (Some(next) != self.head).then_some(next)
    }

    fn link_before<S: NodeStore + ?Sized>(&mut self, store: &mut S, at: usize, node: usize) {
        let prev = store.link(at).prev;
        *store.link_mut(node) = Link { prev, next: at };
        store.link_mut(prev).next = node;
        store.link_mut(at).prev = node;
        self.len += 1;
    }
}
