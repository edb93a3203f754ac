use std::mem::MaybeUninit;

/// A slab allocator with stable, reusable indices.
///
/// Values live in a contiguous array; removing one frees its slot for the
/// next insertion. Indices stay valid until the value is removed.
pub(crate) struct Slab<T> {
    /// Storage for items (may contain uninitialized slots).
    items: Vec<MaybeUninit<T>>,
    /// Stack of free indices that can be reused.
    free: Vec<usize>,
    /// Marks whether a slot is currently initialized.
    used: Vec<bool>,
    len: usize,
}

impl<T> Slab<T> {
    /// Creates a slab with `size` free slots.
    pub(crate) fn new(size: usize) -> Self {
        let items = (0..size).map(|_| MaybeUninit::<T>::uninit()).collect();
        let free = (0..size).rev().collect();
        let used = vec![false; size];

        Self {
            items,
            free,
            used,
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Inserts a value and returns its index.
    ///
    /// A free slot is reused when available; otherwise the slab doubles.
    pub(crate) fn insert(&mut self, item: T) -> usize {
        let index = if let Some(i) = self.free.pop() {
            i
        } else {
            let len = self.items.len();
            let new_len = if len == 0 { 1 } else { 2 * len };

            self.items.extend((len..new_len).map(|_| MaybeUninit::<T>::uninit()));
            self.free.extend(((len + 1)..new_len).rev());
            self.used.extend((len..new_len).map(|_| false));

            len
        };

        self.items[index] = MaybeUninit::new(item);
        self.used[index] = true;
        self.len += 1;

        index
    }

    pub(crate) fn contains(&self, index: usize) -> bool {
        self.used.get(index).copied().unwrap_or(false)
    }

    /// Removes and returns the value at `index`, or `None` if the slot is free.
    pub(crate) fn remove(&mut self, index: usize) -> Option<T> {
        if !self.contains(index) {
            return None;
        }

        self.free.push(index);
        self.used[index] = false;
        self.len -= 1;

        // SAFETY: `used[index]` was set, so the slot is initialized; it is
        // marked free before being read so it is never read twice.
        let item = unsafe { self.items[index].assume_init_read() };
        Some(item)
    }

    pub(crate) fn get(&self, index: usize) -> Option<&T> {
        if !self.contains(index) {
            return None;
        }
        // SAFETY: `used[index]` guarantees the slot is initialized.
        Some(unsafe { self.items[index].assume_init_ref() })
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        if !self.contains(index) {
            return None;
        }
        // SAFETY: `used[index]` guarantees the slot is initialized.
        Some(unsafe { self.items[index].assume_init_mut() })
    }
}

impl<T> Drop for Slab<T> {
    /// Drops all initialized elements stored in the slab.
    fn drop(&mut self) {
        for (slot, &used) in self.items.iter_mut().zip(self.used.iter()) {
            if used {
                unsafe {
                    slot.assume_init_drop();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::rc::Rc;

    #[test]
    fn test_reuses_freed_slots() {
        let mut slab = Slab::new(2);
        let a = slab.insert("a");
        let b = slab.insert("b");
        assert_eq!((a, b), (0, 1));

        assert_eq!(slab.remove(a), Some("a"));
        assert_eq!(slab.remove(a), None);
        assert_eq!(slab.insert("c"), a);
        assert_eq!(slab.get(a), Some(&"c"));
        assert_eq!(slab.len(), 2);
    }

    #[test]
    fn test_grows_when_full() {
        let mut slab = Slab::new(0);
        for i in 0..5 {
            assert_eq!(slab.insert(i), i);
        }
        assert_eq!(slab.len(), 5);
        assert!(!slab.contains(7));
        assert_eq!(slab.get_mut(3).map(|v| std::mem::replace(v, 30)), Some(3));
        assert_eq!(slab.get(3), Some(&30));
    }

    #[test]
    fn test_drop_releases_items() {
        let item = Rc::new(());
        {
            let mut slab = Slab::new(1);
            slab.insert(item.clone());
            let removed = slab.insert(item.clone());
            slab.insert(item.clone());
            slab.remove(removed);
            assert_eq!(Rc::strong_count(&item), 3);
        }
        assert_eq!(Rc::strong_count(&item), 1);
    }
}
