//! Non-concurrent doubly linked list
//!
//! Nodes live in a [`Slab`] and link to each other by slab key, so any
//! entry whose [`EntryKey`] the caller kept can be unlinked in O(1). The
//! list is not synchronized; the thread-safe collections wrap it in a lock.

use slab::Slab;

/// Stable position of an entry while it stays in its list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryKey(usize);

struct Node<T> {
    value: T,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Doubly linked list with O(1) insert and unlink at both ends and by key
pub struct DList<T> {
    nodes: Slab<Node<T>>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<T> DList<T> {
    pub fn new() -> Self {
        Self {
            nodes: Slab::new(),
            head: None,
            tail: None,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Slab::with_capacity(capacity),
            head: None,
            tail: None,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn insert_head(&mut self, value: T) -> EntryKey {
        let key = self.nodes.insert(Node {
            value,
            prev: None,
            next: self.head,
        });
        match self.head {
            Some(old) => self.nodes[old].prev = Some(key),
            None => self.tail = Some(key),
        }
        self.head = Some(key);
        EntryKey(key)
    }

    pub fn insert_tail(&mut self, value: T) -> EntryKey {
        let key = self.nodes.insert(Node {
            value,
            prev: self.tail,
            next: None,
        });
        match self.tail {
            Some(old) => self.nodes[old].next = Some(key),
            None => self.head = Some(key),
        }
        self.tail = Some(key);
        EntryKey(key)
    }

    pub fn remove_head(&mut self) -> Option<T> {
        let key = self.head?;
        Some(self.unlink(key))
    }

    pub fn remove_tail(&mut self) -> Option<T> {
        let key = self.tail?;
        Some(self.unlink(key))
    }

    /// Unlink the entry at `key`. Returns `None` if the key is not live.
    pub fn remove(&mut self, key: EntryKey) -> Option<T> {
        if !self.nodes.contains(key.0) {
            return None;
        }
        Some(self.unlink(key.0))
    }

    fn unlink(&mut self, key: usize) -> T {
        let node = self.nodes.remove(key);
        match node.prev {
            Some(p) => self.nodes[p].next = node.next,
            None => self.head = node.next,
        }
        match node.next {
            Some(n) => self.nodes[n].prev = node.prev,
            None => self.tail = node.prev,
        }
        node.value
    }

    /// Move every entry of `other` to the tail of this list, in order.
    /// Keys previously returned by `other` are invalidated.
    pub fn append(&mut self, other: &mut DList<T>) {
        while let Some(value) = other.remove_head() {
            self.insert_tail(value);
        }
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.head = None;
        self.tail = None;
    }

    pub fn head(&self) -> Option<EntryKey> {
        self.head.map(EntryKey)
    }

    pub fn tail(&self) -> Option<EntryKey> {
        self.tail.map(EntryKey)
    }

    pub fn next(&self, key: EntryKey) -> Option<EntryKey> {
        self.nodes.get(key.0)?.next.map(EntryKey)
    }

    pub fn prev(&self, key: EntryKey) -> Option<EntryKey> {
        self.nodes.get(key.0)?.prev.map(EntryKey)
    }

    pub fn get(&self, key: EntryKey) -> Option<&T> {
        self.nodes.get(key.0).map(|n| &n.value)
    }

    pub fn get_mut(&mut self, key: EntryKey) -> Option<&mut T> {
        self.nodes.get_mut(key.0).map(|n| &mut n.value)
    }

    pub fn front(&self) -> Option<&T> {
        self.head.map(|k| &self.nodes[k].value)
    }

    pub fn back(&self) -> Option<&T> {
        self.tail.map(|k| &self.nodes[k].value)
    }

    /// First entry, walking from the head, whose value satisfies `pred`
    pub fn find(&self, mut pred: impl FnMut(&T) -> bool) -> Option<EntryKey> {
        let mut cursor = self.head;
        while let Some(k) = cursor {
            let node = &self.nodes[k];
            if pred(&node.value) {
                return Some(EntryKey(k));
            }
            cursor = node.next;
        }
        None
    }

    /// Iterate values head to tail
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            list: self,
            cursor: self.head,
        }
    }
}

impl<T> Default for DList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for DList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

pub struct Iter<'a, T> {
    list: &'a DList<T>,
    cursor: Option<usize>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        let node = &self.list.nodes[self.cursor?];
        self.cursor = node.next;
        Some(&node.value)
    }
}
