// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Slab-backed doubly-linked recency list.
//!
//! Links are slot indices rather than pointers; freed slots are recycled via a
//! free list. Head is the most-recently-used end, tail the least.
//!
//! No method panics on a bad index: lookups return `None` and relinking
//! returns `false`, leaving the owner to decide how to recover.

/// Index of a node in the slab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SlotIdx(u32);

struct Node<T> {
    value: T,
    prev: Option<SlotIdx>,
    next: Option<SlotIdx>,
}

pub(crate) struct LruList<T> {
    slots: Vec<Option<Node<T>>>,
    free: Vec<u32>,
    head: Option<SlotIdx>,
    tail: Option<SlotIdx>,
    len: usize,
}

impl<T> LruList<T> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Insert at the MRU end. `None` only if the slab index space is exhausted.
    pub(crate) fn push_front(&mut self, value: T) -> Option<SlotIdx> {
        let idx = self.alloc(value)?;
        match self.head {
            Some(old_head) => {
                self.node_mut(old_head)?.prev = Some(idx);
                self.node_mut(idx)?.next = Some(old_head);
            }
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
        self.len += 1;
        Some(idx)
    }

    /// Remove and return the LRU value.
    pub(crate) fn pop_back(&mut self) -> Option<T> {
        let tail = self.tail?;
        self.remove(tail)
    }

    /// Unlink a node and return its value.
    pub(crate) fn remove(&mut self, idx: SlotIdx) -> Option<T> {
        let (prev, next) = {
            let node = self.node(idx)?;
            (node.prev, node.next)
        };
        if !self.unlink(prev, next) {
            return None;
        }
        let node = self.slots.get_mut(idx.0 as usize)?.take()?;
        self.free.push(idx.0);
        self.len -= 1;
        Some(node.value)
    }

    /// Move an existing node to the MRU end.
    pub(crate) fn move_to_front(&mut self, idx: SlotIdx) -> bool {
        if self.head == Some(idx) {
            return self.node(idx).is_some();
        }
        let (prev, next) = match self.node(idx) {
            Some(node) => (node.prev, node.next),
            None => return false,
        };
        if !self.unlink(prev, next) {
            return false;
        }
        let old_head = self.head;
        match self.node_mut(idx) {
            Some(node) => {
                node.prev = None;
                node.next = old_head;
            }
            None => return false,
        }
        if let Some(h) = old_head {
            match self.node_mut(h) {
                Some(node) => node.prev = Some(idx),
                None => return false,
            }
        } else {
            self.tail = Some(idx);
        }
        self.head = Some(idx);
        true
    }

    pub(crate) fn get(&self, idx: SlotIdx) -> Option<&T> {
        self.node(idx).map(|n| &n.value)
    }

    pub(crate) fn get_mut(&mut self, idx: SlotIdx) -> Option<&mut T> {
        self.node_mut(idx).map(|n| &mut n.value)
    }

    /// Iterate from MRU to LRU.
    pub(crate) fn iter(&self) -> Iter<'_, T> {
        Iter {
            list: self,
            current: self.head,
            remaining: self.len,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
        self.len = 0;
    }

    // Splices the neighbours of a node together; the node itself is untouched.
    fn unlink(&mut self, prev: Option<SlotIdx>, next: Option<SlotIdx>) -> bool {
        match prev {
            Some(p) => match self.node_mut(p) {
                Some(node) => node.next = next,
                None => return false,
            },
            None => self.head = next,
        }
        match next {
            Some(n) => match self.node_mut(n) {
                Some(node) => node.prev = prev,
                None => return false,
            },
            None => self.tail = prev,
        }
        true
    }

    fn alloc(&mut self, value: T) -> Option<SlotIdx> {
        let node = Node {
            value,
            prev: None,
            next: None,
        };
        if let Some(free) = self.free.pop() {
            let slot = self.slots.get_mut(free as usize)?;
            *slot = Some(node);
            return Some(SlotIdx(free));
        }
        let raw = u32::try_from(self.slots.len()).ok()?;
        self.slots.push(Some(node));
        Some(SlotIdx(raw))
    }

    #[inline]
    fn node(&self, idx: SlotIdx) -> Option<&Node<T>> {
        self.slots.get(idx.0 as usize)?.as_ref()
    }

    #[inline]
    fn node_mut(&mut self, idx: SlotIdx) -> Option<&mut Node<T>> {
        self.slots.get_mut(idx.0 as usize)?.as_mut()
    }
}

impl<T> Default for LruList<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct Iter<'a, T> {
    list: &'a LruList<T>,
    current: Option<SlotIdx>,
    // Bounds the walk even if links were ever to form a cycle.
    remaining: usize,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (SlotIdx, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let idx = self.current?;
        let node = self.list.node(idx)?;
        self.current = node.next;
        self.remaining -= 1;
        Some((idx, &node.value))
    }
}
