use super::Slab;

struct Node<T> {
    value: T,
    prev: Option<usize>,
    next: Option<usize>,
}

/// An insertion-ordered list with stable keys.
///
/// Nodes live in a [`Slab`]; a key stays valid until its node is removed,
/// so callers may remove nodes while walking the list with [`next`](Self::next).
pub(crate) struct LinkedSlab<T> {
    nodes: Slab<Node<T>>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<T> LinkedSlab<T> {
    pub(crate) fn new() -> Self {
        Self {
            nodes: Slab::new(4),
            head: None,
            tail: None,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub(crate) fn push_back(&mut self, value: T) -> usize {
        let key = self.nodes.insert(Node {
            value,
            prev: self.tail,
            next: None,
        });

        match self.tail.and_then(|tail| self.nodes.get_mut(tail)) {
            Some(tail) => tail.next = Some(key),
            None => self.head = Some(key),
        }
        self.tail = Some(key);
        key
    }

    pub(crate) fn remove(&mut self, key: usize) -> Option<T> {
        let node = self.nodes.remove(key)?;

        match node.prev.and_then(|prev| self.nodes.get_mut(prev)) {
            Some(prev) => prev.next = node.next,
            None => self.head = node.next,
        }
        match node.next.and_then(|next| self.nodes.get_mut(next)) {
            Some(next) => next.prev = node.prev,
            None => self.tail = node.prev,
        }

        Some(node.value)
    }

    pub(crate) fn get(&self, key: usize) -> Option<&T> {
        self.nodes.get(key).map(|node| &node.value)
    }

    pub(crate) fn first(&self) -> Option<usize> {
        self.head
    }

    pub(crate) fn next(&self, key: usize) -> Option<usize> {
        self.nodes.get(key).and_then(|node| node.next)
    }

    /// Values in list order.
    pub(crate) fn values(&self) -> impl Iterator<Item = &T> {
        std::iter::successors(self.head, |&key| self.next(key)).filter_map(|key| self.get(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_insertion_order() {
        let mut list = LinkedSlab::new();
        let a = list.push_back('a');
        let b = list.push_back('b');
        list.push_back('c');

        assert_eq!(list.remove(b), Some('b'));
        assert_eq!(list.values().copied().collect::<String>(), "ac");

        list.push_back('d');
        assert_eq!(list.values().copied().collect::<String>(), "acd");

        list.remove(a);
        assert_eq!(list.get(list.first().unwrap_or(usize::MAX)), Some(&'c'));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_remove_last_resets_ends() {
        let mut list = LinkedSlab::new();
        let only = list.push_back(1);
        assert_eq!(list.remove(only), Some(1));
        assert!(list.is_empty());
        assert_eq!(list.remove(only), None);

        let key = list.push_back(2);
        assert_eq!(list.first(), Some(key));
        assert_eq!(list.next(key), None);
    }
}
