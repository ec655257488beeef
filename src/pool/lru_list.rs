//! Slab-backed doubly-linked list used as the pool's recency order
//!
//! Links are slot indices rather than pointers, so a [`ListPos`] stays valid
//! while other nodes are inserted, moved or removed. Freed slots are reused.

/// Position of a node in an [`LruList`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListPos(u32);

struct Node<T> {
    value: T,
    prev: Option<ListPos>,
    next: Option<ListPos>,
}

/// Doubly-linked list with O(1) push, remove and move-to-back
///
/// The head is the least recently used node, the tail the most recent.
pub struct LruList<T> {
    slots: Vec<Option<Node<T>>>,
    free: Vec<u32>,
    head: Option<ListPos>,
    tail: Option<ListPos>,
    len: usize,
}

impl<T> LruList<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append at the tail (most recently used)
    pub fn push_back(&mut self, value: T) -> ListPos {
        let pos = self.alloc(value);
        match self.tail {
            Some(old_tail) => {
                if let Some(node) = self.node_mut(old_tail) {
                    node.next = Some(pos);
                }
                if let Some(node) = self.node_mut(pos) {
                    node.prev = Some(old_tail);
                }
            }
            None => self.head = Some(pos),
        }
        self.tail = Some(pos);
        self.len += 1;
        pos
    }

    /// Remove and return the head (least recently used)
    pub fn pop_front(&mut self) -> Option<T> {
        let head = self.head?;
        self.remove(head)
    }

    /// Unlink the node at `pos`; `None` if the position is vacant
    pub fn remove(&mut self, pos: ListPos) -> Option<T> {
        let node = self.slots.get_mut(pos.0 as usize)?.take()?;
        self.unlink(node.prev, node.next);
        self.free.push(pos.0);
        self.len -= 1;
        Some(node.value)
    }

    /// Move the node at `pos` to the tail
    pub fn move_to_back(&mut self, pos: ListPos) {
        if self.tail == Some(pos) {
            return;
        }
        let Some((prev, next)) = self.node(pos).map(|n| (n.prev, n.next)) else {
            return;
        };
        self.unlink(prev, next);

        let old_tail = self.tail;
        if let Some(t) = old_tail.and_then(|t| self.node_mut(t)) {
            t.next = Some(pos);
        }
        if let Some(node) = self.node_mut(pos) {
            node.prev = old_tail;
            node.next = None;
        }
        if self.head.is_none() {
            self.head = Some(pos);
        }
        self.tail = Some(pos);
    }

    pub fn get(&self, pos: ListPos) -> Option<&T> {
        self.node(pos).map(|n| &n.value)
    }

    /// Iterate from head (oldest) to tail (newest)
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            list: self,
            current: self.head,
        }
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
        self.len = 0;
    }

    fn unlink(&mut self, prev: Option<ListPos>, next: Option<ListPos>) {
        match prev.and_then(|p| self.node_mut(p)) {
            Some(p) => p.next = next,
            None => self.head = next,
        }
        match next.and_then(|n| self.node_mut(n)) {
            Some(n) => n.prev = prev,
            None => self.tail = prev,
        }
    }

    fn alloc(&mut self, value: T) -> ListPos {
        let node = Node {
            value,
            prev: None,
            next: None,
        };
        if let Some(free) = self.free.pop() {
            if let Some(slot) = self.slots.get_mut(free as usize) {
                *slot = Some(node);
                return ListPos(free);
            }
        }
        let raw = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
        self.slots.push(Some(node));
        ListPos(raw)
    }

    #[inline]
    fn node(&self, pos: ListPos) -> Option<&Node<T>> {
        self.slots.get(pos.0 as usize)?.as_ref()
    }

    #[inline]
    fn node_mut(&mut self, pos: ListPos) -> Option<&mut Node<T>> {
        self.slots.get_mut(pos.0 as usize)?.as_mut()
    }
}

impl<T> Default for LruList<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Iter<'a, T> {
    list: &'a LruList<T>,
    current: Option<ListPos>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (ListPos, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let pos = self.current?;
        let node = self.list.node(pos)?;
        self.current = node.next;
        Some((pos, &node.value))
    }
}
