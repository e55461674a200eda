//! Prepend-only list with lock-free publication.
//!
//! A `PublishList` holds an immutable chain of records, newest first. New
//! records are published by a release CAS on the head pointer; readers
//! traverse with an acquire load. A reader racing a publication either
//! observes the fresh head or the previous one; both are valid snapshots,
//! which is exactly the tolerance the MVCC version histories need.
//!
//! Records are never unlinked while the list is shared; the chain is
//! reclaimed when the list is dropped.

#[cfg(loom)]
use loom::sync::atomic::{AtomicPtr, Ordering};
#[cfg(not(loom))]
use std::sync::atomic::{AtomicPtr, Ordering};

use std::ptr;

use crossbeam_utils::Backoff;

struct Node<T> {
    value: T,
    next: *mut Node<T>,
}

/// Lock-free prepend-only list. Newest element first.
pub struct PublishList<T> {
    head: AtomicPtr<Node<T>>,
}

// SAFETY: values are only written before publication and never mutated
// afterwards; concurrent access is read-only through acquire traversal.
unsafe impl<T: Send> Send for PublishList<T> {}
unsafe impl<T: Send + Sync> Sync for PublishList<T> {}

impl<T> PublishList<T> {
    /// Create an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Publish a new front element.
    ///
    /// Safe under concurrent pushes and reads; the kernels that use this
    /// list have exactly one appender per list, but nothing here relies
    /// on that.
    pub fn push_front(&self, value: T) {
        let node = Box::into_raw(Box::new(Node {
            value,
            next: ptr::null_mut(),
        }));

        let backoff = Backoff::new();
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            // SAFETY: `node` is not yet published; this thread owns it.
            unsafe { (*node).next = head };

            match self
                .head
                .compare_exchange_weak(head, node, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(current) => {
                    head = current;
                    backoff.spin();
                }
            }
        }
    }

    /// Borrow the newest element, if any.
    #[must_use]
    pub fn front(&self) -> Option<&T> {
        let head = self.head.load(Ordering::Acquire);
        if head.is_null() {
            return None;
        }
        // SAFETY: published nodes are immutable and live until `Drop`,
        // which requires `&mut self` and therefore cannot race this borrow.
        Some(unsafe { &(*head).value })
    }

    /// Iterate newest-first over a snapshot beginning at the current head.
    pub fn iter(&self) -> PublishIter<'_, T> {
        PublishIter {
            cursor: self.head.load(Ordering::Acquire),
            _list: self,
        }
    }
}

impl<T> Default for PublishList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for PublishList<T> {
    fn drop(&mut self) {
        let mut cursor = self.head.load(Ordering::Relaxed);
        while !cursor.is_null() {
            // SAFETY: `&mut self` guarantees no reader or pusher is live;
            // every node was allocated by `Box::into_raw` in `push_front`.
            let node = unsafe { Box::from_raw(cursor) };
            cursor = node.next;
        }
    }
}

/// Newest-first iterator over a [`PublishList`].
pub struct PublishIter<'a, T> {
    cursor: *mut Node<T>,
    _list: &'a PublishList<T>,
}

impl<'a, T> Iterator for PublishIter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor.is_null() {
            return None;
        }
        // SAFETY: the borrow of the list keeps the chain alive, and nodes
        // reachable from a loaded head are fully initialized.
        let node = unsafe { &*self.cursor };
        self.cursor = node.next;
        Some(&node.value)
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_newest_first_order() {
        let list = PublishList::new();
        list.push_front(1);
        list.push_front(2);
        list.push_front(3);

        let values: Vec<i32> = list.iter().copied().collect();
        assert_eq!(values, vec![3, 2, 1]);
        assert_eq!(list.front(), Some(&3));
    }

    #[test]
    fn test_empty_list() {
        let list: PublishList<u64> = PublishList::new();
        assert_eq!(list.front(), None);
        assert_eq!(list.iter().count(), 0);
    }

    #[test]
    fn test_reader_sees_prefix_of_concurrent_pushes() {
        let list = Arc::new(PublishList::new());
        list.push_front(0u64);

        let pusher = {
            let list = Arc::clone(&list);
            thread::spawn(move || {
                for value in 1..=1000u64 {
                    list.push_front(value);
                }
            })
        };

        // Concurrent traversals must always observe a descending chain
        // ending in the seed value.
        for _ in 0..100 {
            let snapshot: Vec<u64> = list.iter().copied().collect();
            assert!(!snapshot.is_empty());
            assert_eq!(*snapshot.last().unwrap(), 0);
            for pair in snapshot.windows(2) {
                assert!(pair[0] > pair[1]);
            }
        }

        pusher.join().unwrap();
        assert_eq!(list.iter().count(), 1001);
    }

    #[test]
    fn test_concurrent_pushers_lose_nothing() {
        let list = Arc::new(PublishList::new());
        let mut handles = Vec::new();

        for base in 0..4u64 {
            let list = Arc::clone(&list);
            handles.push(thread::spawn(move || {
                for offset in 0..256u64 {
                    list.push_front(base * 1000 + offset);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let mut values: Vec<u64> = list.iter().copied().collect();
        values.sort_unstable();
        values.dedup();
        assert_eq!(values.len(), 4 * 256);
    }
}

#[cfg(all(test, loom))]
mod loom_tests {
    use super::*;
    use loom::sync::Arc;
    use loom::thread;

    #[test]
    fn loom_concurrent_push_publishes_both() {
        loom::model(|| {
            let list = Arc::new(PublishList::new());

            let a = {
                let list = Arc::clone(&list);
                thread::spawn(move || list.push_front(1u32))
            };
            let b = {
                let list = Arc::clone(&list);
                thread::spawn(move || list.push_front(2u32))
            };
            a.join().unwrap();
            b.join().unwrap();

            let mut values: Vec<u32> = list.iter().copied().collect();
            values.sort_unstable();
            assert_eq!(values, vec![1, 2]);
        });
    }
}
