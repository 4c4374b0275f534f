//! Index-linked list stored in a slot arena.
//!
//! Nodes never move once inserted, so a [`NodeId`] stays valid until that
//! node is removed. Vacated slots are recycled LIFO. All links are slot
//! indices, which keeps the structure free of raw pointers and lets the
//! owning lock protect it as a plain value.
//!
//! Slot and free-slot storage come from the list's host allocator.

use std::fmt;

use allocator_api2::alloc::{Allocator, Global};
/// Stable handle to a node in an [`IndexList`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(u32);

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl NodeId {
    #[inline]
    fn slot(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug)]
struct Node<T> {
    value: T,
    prev: Option<NodeId>,
    next: Option<NodeId>,
}

#[derive(Debug)]
pub(crate) struct IndexList<T, A: Allocator = Global> {
    slots: allocator_api2::vec::Vec<Option<Node<T>>, A>,
    vacant: allocator_api2::vec::Vec<NodeId, A>,
    head: Option<NodeId>,
    tail: Option<NodeId>,
    len: usize,
}

impl<T> IndexList<T> {
    #[cfg(test)]
    pub(crate) fn new() -> Self {
        Self::new_in(Global)
    }
}

impl<T, A: Allocator + Clone> IndexList<T, A> {
    pub(crate) fn new_in(alloc: A) -> Self {
        Self {
            slots: allocator_api2::vec::Vec::new_in(alloc.clone()),
            vacant: allocator_api2::vec::Vec::new_in(alloc),
            head: None,
            tail: None,
            len: 0,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns `true` if `id` refers to a live node.
    pub(crate) fn contains(&self, id: NodeId) -> bool {
        matches!(self.slots.get(id.slot()), Some(Some(_)))
    }

    /// # Panics
    /// Panics if `id` does not refer to a live node.
    #[inline]
    pub(crate) fn get(&self, id: NodeId) -> &T {
        &self.node(id).value
    }

    /// # Panics
    /// Panics if `id` does not refer to a live node.
    #[inline]
    pub(crate) fn get_mut(&mut self, id: NodeId) -> &mut T {
        &mut self.node_mut(id).value
    }

    #[inline]
    pub(crate) fn next(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).next
    }

    #[inline]
    pub(crate) fn prev(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).prev
    }

    pub(crate) fn push_back(&mut self, value: T) -> NodeId {
        let id = self.alloc_node(Node {
            value,
            prev: self.tail,
            next: None,
        });
        match self.tail {
            Some(tail) => self.node_mut(tail).next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        id
    }

    /// Inserts `value` immediately before `at`.
    pub(crate) fn insert_before(&mut self, at: NodeId, value: T) -> NodeId {
        let prev = self.node(at).prev;
        let id = self.alloc_node(Node {
            value,
            prev,
            next: Some(at),
        });
        self.node_mut(at).prev = Some(id);
        match prev {
            Some(p) => self.node_mut(p).next = Some(id),
            None => self.head = Some(id),
        }
        id
    }

    /// Inserts `value` immediately after `at`.
    pub(crate) fn insert_after(&mut self, at: NodeId, value: T) -> NodeId {
        let next = self.node(at).next;
        let id = self.alloc_node(Node {
            value,
            prev: Some(at),
            next,
        });
        self.node_mut(at).next = Some(id);
        match next {
            Some(n) => self.node_mut(n).prev = Some(id),
            None => self.tail = Some(id),
        }
        id
    }

    /// Unlinks the node and returns its value. The slot is recycled.
    ///
    /// # Panics
    /// Panics if `id` does not refer to a live node.
    pub(crate) fn remove(&mut self, id: NodeId) -> T {
        let node = self.slots[id.slot()]
            .take()
            .unwrap_or_else(|| panic!("IndexList::remove: {id:?} is not a live node"));
        match node.prev {
            Some(p) => self.node_mut(p).next = node.next,
            None => self.head = node.next,
        }
        match node.next {
            Some(n) => self.node_mut(n).prev = node.prev,
            None => self.tail = node.prev,
        }
        self.vacant.push(id);
        self.len -= 1;
        node.value
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.vacant.clear();
        self.head = None;
        self.tail = None;
        self.len = 0;
    }

    /// Iterates nodes in list order.
    pub(crate) fn iter(&self) -> Iter<'_, T, A> {
        Iter {
            list: self,
            cursor: self.head,
        }
    }

    fn alloc_node(&mut self, node: Node<T>) -> NodeId {
        self.len += 1;
        if let Some(id) = self.vacant.pop() {
            self.slots[id.slot()] = Some(node);
            return id;
        }
        let id = NodeId(u32::try_from(self.slots.len()).unwrap_or_else(|_| {
            panic!("IndexList: more than u32::MAX nodes")
        }));
        self.slots.push(Some(node));
        id
    }

    #[inline]
    fn node(&self, id: NodeId) -> &Node<T> {
        match self.slots.get(id.slot()) {
            Some(Some(node)) => node,
            _ => panic!("IndexList: {id:?} is not a live node"),
        }
    }

    #[inline]
    fn node_mut(&mut self, id: NodeId) -> &mut Node<T> {
        match self.slots.get_mut(id.slot()) {
            Some(Some(node)) => node,
            _ => panic!("IndexList: {id:?} is not a live node"),
        }
    }
}

pub(crate) struct Iter<'a, T, A: Allocator> {
    list: &'a IndexList<T, A>,
    cursor: Option<NodeId>,
}

impl<'a, T, A: Allocator + Clone> Iterator for Iter<'a, T, A> {
    type Item = (NodeId, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor?;
        let node = self.list.node(id);
        self.cursor = node.next;
        Some((id, &node.value))
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    fn values(list: &IndexList<u32>) -> Vec<u32> {
        list.iter().map(|(_, v)| *v).collect()
    }

    #[test]
    fn test_push_and_iterate_in_order() {
        let mut list = IndexList::new();
        list.push_back(1);
        list.push_back(2);
        list.push_back(3);
        assert_eq!(values(&list), [1, 2, 3]);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_insert_before_and_after() {
        let mut list = IndexList::new();
        let mid = list.push_back(5);
        let first = list.insert_before(mid, 4);
        let last = list.insert_after(mid, 6);
        let head = list.insert_before(first, 3);
        let tail = list.insert_after(last, 7);
        assert_eq!(values(&list), [3, 4, 5, 6, 7]);
        assert_eq!(list.prev(head), None);
        assert_eq!(list.next(tail), None);
        list.push_back(8);
        assert_eq!(list.iter().last().map(|(_, v)| *v), Some(8));
    }

    #[test]
    fn test_remove_relinks_neighbours() {
        let mut list = IndexList::new();
        let a = list.push_back(1);
        let b = list.push_back(2);
        let c = list.push_back(3);
        assert_eq!(list.remove(b), 2);
        assert_eq!(list.next(a), Some(c));
        assert_eq!(list.prev(c), Some(a));
        assert!(!list.contains(b));

        list.remove(a);
        list.remove(c);
        assert!(list.is_empty());
        assert!(list.iter().next().is_none());
        list.push_back(9);
        assert_eq!(values(&list), [9]);
    }

    #[test]
    fn test_ids_stay_valid_across_other_removals() {
        let mut list = IndexList::new();
        let ids: Vec<_> = (0..8).map(|i| list.push_back(i)).collect();
        for id in ids.iter().step_by(2) {
            list.remove(*id);
        }
        for (i, id) in ids.iter().enumerate().skip(1).step_by(2) {
            assert_eq!(*list.get(*id), u32::try_from(i).unwrap());
        }
    }

    #[test]
    fn test_vacant_slots_are_recycled() {
        let mut list = IndexList::new();
        let a = list.push_back(1);
        list.push_back(2);
        list.remove(a);
        let reused = list.push_back(3);
        assert_eq!(reused, a);
        assert_eq!(values(&list), [2, 3]);
    }

    #[test]
    #[should_panic(expected = "not a live node")]
    fn test_double_remove_panics() {
        let mut list = IndexList::new();
        let a = list.push_back(1);
        list.remove(a);
        list.remove(a);
    }
}
