//! Priority comparators for waiter queues.
//!
//! Two orderings govern who wakes first. Semaphore waiter queues are kept
//! descending by effective priority, with arrival order among equals. A
//! thread's held locks are kept descending by the priority of each lock's
//! best queued waiter, so the front lock always names the strongest live
//! donation; a lock with no waiters ranks below every contended lock.

use crate::thread::Priority;

/// Whether a waiter of priority `a` goes in front of one of priority `b` in
/// a semaphore queue.
///
/// Strict comparison: an incoming waiter never jumps ahead of an
/// already-queued equal, which preserves FIFO order within a priority class.
pub fn priority_semaphore_compare(a: Priority, b: Priority) -> bool {
    a > b
}

/// Whether a lock whose best queued waiter has priority `a` ranks in front
/// of one whose best waiter has priority `b` in a holder's lock list.
///
/// `None` means no waiters and ranks below everything. Ties rank the
/// incoming lock first; for this list only the front element is ever
/// consulted, so order among equals is immaterial.
pub fn lock_priority_compare(a: Option<Priority>, b: Option<Priority>) -> bool {
    a >= b
}

/// Inserts `item` into `queue` at the first position where `goes_before`
/// ranks it in front of the resident element, or at the back.
pub fn insert_ordered<T>(queue: &mut Vec<T>, item: T, mut goes_before: impl FnMut(&T, &T) -> bool) {
    let idx = queue
        .iter()
        .position(|resident| goes_before(&item, resident))
        .unwrap_or(queue.len());
    queue.insert(idx, item);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semaphore_compare_is_strict() {
        assert!(priority_semaphore_compare(Priority::new(40), Priority::new(30)));
        assert!(!priority_semaphore_compare(Priority::new(30), Priority::new(30)));
        assert!(!priority_semaphore_compare(Priority::new(20), Priority::new(30)));
    }

    #[test]
    fn lock_compare_ranks_uncontended_last() {
        let contended = Some(Priority::new(10));
        assert!(lock_priority_compare(contended, None));
        assert!(!lock_priority_compare(None, contended));
        // None >= None keeps an all-uncontended list stable under insertion.
        assert!(lock_priority_compare(None, None));
    }

    #[test]
    fn insert_ordered_keeps_descending_fifo() {
        let mut queue: Vec<(Priority, char)> = Vec::new();
        for (p, tag) in [
            (Priority::new(30), 'a'),
            (Priority::new(50), 'b'),
            (Priority::new(30), 'c'),
            (Priority::new(40), 'd'),
        ] {
            insert_ordered(&mut queue, (p, tag), |x, y| {
                priority_semaphore_compare(x.0, y.0)
            });
        }
        let tags: Vec<char> = queue.iter().map(|(_, t)| *t).collect();
        assert_eq!(tags, vec!['b', 'd', 'a', 'c']);
    }
}
