//! Ready-queue scheduling policy.
//!
//! The kernel consults the scheduler whenever the running thread gives up the
//! core: it blocks, yields, or exits. The policy here is strict priority
//! scheduling with FIFO order among equal priorities. A thread's rank is its
//! *effective* priority, re-read every time a pick is made rather than frozen
//! at enqueue time, because donation can raise a thread's priority while it
//! sits in the queue.

use super::{Priority, ThreadId};
use std::collections::VecDeque;

/// A trait for a thread scheduler.
///
/// Defines the interface through which the kernel manages the set of Ready
/// threads. The kernel owns thread records and their priorities; the
/// scheduler only orders thread ids, asking back for the current priority of
/// a candidate through the `priority_of` callback.
pub trait Scheduler {
    /// Push a thread into the scheduling queue.
    fn push_to_queue(&mut self, tid: ThreadId);

    /// Remove and return the next thread to run, or `None` if no thread is
    /// ready.
    ///
    /// Ranks are re-derived through `priority_of` at call time.
    fn next_to_run(&mut self, priority_of: &dyn Fn(ThreadId) -> Priority) -> Option<ThreadId>;

    /// The best priority currently queued, without dequeuing anything.
    fn highest_priority(&self, priority_of: &dyn Fn(ThreadId) -> Priority) -> Option<Priority>;
}

/// Process-wide scheduling mode, fixed at kernel construction.
///
/// Read-only to the synchronization layer: under [`FlatFeedback`] the lock
/// primitives skip priority donation and all of its bookkeeping, behaving as
/// plain semaphores with ownership.
///
/// [`FlatFeedback`]: SchedulingMode::FlatFeedback
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum SchedulingMode {
    /// Priority scheduling with donation across contended locks.
    #[default]
    Priority,
    /// Multi-level feedback queue mode. Priorities are managed by the
    /// scheduler alone and donation is disabled entirely.
    FlatFeedback,
}

impl SchedulingMode {
    pub(crate) fn donates(self) -> bool {
        matches!(self, SchedulingMode::Priority)
    }
}

/// The ready queue: FIFO order, highest effective priority wins.
#[derive(Default)]
pub struct ReadyQueue {
    queue: VecDeque<ThreadId>,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }
}

impl Scheduler for ReadyQueue {
    fn push_to_queue(&mut self, tid: ThreadId) {
        self.queue.push_back(tid);
    }

    fn next_to_run(&mut self, priority_of: &dyn Fn(ThreadId) -> Priority) -> Option<ThreadId> {
        let mut best: Option<(usize, Priority)> = None;
        for (idx, tid) in self.queue.iter().enumerate() {
            let priority = priority_of(*tid);
            // Strict comparison keeps arrival order among equals.
            if best.map_or(true, |(_, p)| priority > p) {
                best = Some((idx, priority));
            }
        }
        best.and_then(|(idx, _)| self.queue.remove(idx))
    }

    fn highest_priority(&self, priority_of: &dyn Fn(ThreadId) -> Priority) -> Option<Priority> {
        self.queue.iter().map(|tid| priority_of(*tid)).max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn queue_of(tids: &[u64]) -> ReadyQueue {
        let mut q = ReadyQueue::new();
        for tid in tids {
            q.push_to_queue(ThreadId(*tid));
        }
        q
    }

    #[test]
    fn picks_highest_priority() {
        let mut q = queue_of(&[1, 2, 3]);
        let prios: BTreeMap<u64, Priority> = [
            (1, Priority::new(10)),
            (2, Priority::new(30)),
            (3, Priority::new(20)),
        ]
        .into_iter()
        .collect();
        let priority_of = |tid: ThreadId| prios[&tid.0];

        assert_eq!(q.highest_priority(&priority_of), Some(Priority::new(30)));
        assert_eq!(q.next_to_run(&priority_of), Some(ThreadId(2)));
        assert_eq!(q.next_to_run(&priority_of), Some(ThreadId(3)));
        assert_eq!(q.next_to_run(&priority_of), Some(ThreadId(1)));
        assert_eq!(q.next_to_run(&priority_of), None);
    }

    #[test]
    fn fifo_among_equal_priorities() {
        let mut q = queue_of(&[7, 8, 9]);
        let priority_of = |_: ThreadId| Priority::DEFAULT;

        assert_eq!(q.next_to_run(&priority_of), Some(ThreadId(7)));
        assert_eq!(q.next_to_run(&priority_of), Some(ThreadId(8)));
        assert_eq!(q.next_to_run(&priority_of), Some(ThreadId(9)));
    }

    #[test]
    fn rank_is_rederived_at_pick_time() {
        let mut q = queue_of(&[1, 2]);
        // Thread 1 enqueued first at a low priority, then "donated" upward
        // before the pick happens.
        let priority_of = |tid: ThreadId| {
            if tid.0 == 1 {
                Priority::new(50)
            } else {
                Priority::new(40)
            }
        };
        assert_eq!(q.next_to_run(&priority_of), Some(ThreadId(1)));
    }
}
