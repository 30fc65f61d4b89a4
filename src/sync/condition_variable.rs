//! Mesa-style condition variable.

use crate::kernel::{CondId, Kernel};
use crate::sync::Lock;
use crate::thread;
use std::sync::Arc;

/// A condition variable with Mesa semantics.
///
/// [`wait`] atomically releases the associated lock and suspends; a signal
/// is a hint, not a handoff, so the woken thread re-acquires the lock and
/// must re-check its predicate in a loop. Each waiter blocks on its own
/// private one-shot semaphore, and waiters are ranked by their effective
/// priority *at the moment they called wait*; a donation arriving while a
/// thread is already queued does not reorder it.
///
/// All three operations require the caller to hold the lock. [`signal`] and
/// [`broadcast`] never suspend the caller.
///
/// [`wait`]: ConditionVariable::wait
/// [`signal`]: ConditionVariable::signal
/// [`broadcast`]: ConditionVariable::broadcast
pub struct ConditionVariable {
    kernel: Arc<Kernel>,
    id: CondId,
}

impl ConditionVariable {
    /// Creates a condition variable with no waiters.
    pub fn new(kernel: &Arc<Kernel>) -> ConditionVariable {
        let mut core = kernel.lock_core();
        let id = core.create_condition();
        drop(core);
        ConditionVariable {
            kernel: Arc::clone(kernel),
            id,
        }
    }

    /// Releases `lock`, suspends until signaled, and re-acquires `lock`
    /// before returning.
    ///
    /// The release and the enqueue happen without a window in between, so a
    /// signal sent right after the caller drops the lock cannot be lost.
    /// Fatal if the caller does not hold `lock` or runs in interrupt
    /// context.
    pub fn wait(&self, lock: &Lock) {
        let mut core = self.kernel.lock_core();
        assert!(!core.intr_context(), "condition wait from interrupt context");
        assert!(
            Arc::ptr_eq(&self.kernel, lock.kernel()),
            "condition variable and lock belong to different kernels"
        );
        let me = thread::current_tid();
        assert_eq!(
            core.lock_state(lock.id()).holder,
            Some(me),
            "condition wait without holding the lock"
        );
        let old_level = core.intr_disable();
        let priority = core.thread(me).priority_effective;
        let sema = core.create_semaphore(0);
        core.enqueue_cond_waiter(self.id, sema, priority);
        let core = lock.release_in(core);
        let mut core = self.kernel.sema_down(core, sema);
        core.destroy_semaphore(sema);
        let mut core = lock.acquire_in(core);
        core.intr_set_level(old_level);
    }

    /// Wakes the best-ranked waiter, if any.
    ///
    /// Fatal if the caller does not hold `lock`. Does not suspend; outside
    /// interrupt context the woken thread may preempt the caller once it
    /// out-ranks it.
    pub fn signal(&self, lock: &Lock) {
        let mut core = self.kernel.lock_core();
        self.assert_signaler(&core, lock);
        let old_level = core.intr_disable();
        if let Some(waiter) = core.pop_cond_waiter(self.id) {
            core = self.kernel.sema_up(core, waiter.sema);
        }
        core.intr_set_level(old_level);
    }

    /// Wakes every queued waiter, best-ranked first.
    ///
    /// Fatal if the caller does not hold `lock`.
    pub fn broadcast(&self, lock: &Lock) {
        let mut core = self.kernel.lock_core();
        self.assert_signaler(&core, lock);
        let old_level = core.intr_disable();
        while let Some(waiter) = core.pop_cond_waiter(self.id) {
            core = self.kernel.sema_up(core, waiter.sema);
        }
        core.intr_set_level(old_level);
    }

    fn assert_signaler(&self, core: &crate::kernel::Core, lock: &Lock) {
        assert!(
            Arc::ptr_eq(&self.kernel, lock.kernel()),
            "condition variable and lock belong to different kernels"
        );
        assert_eq!(
            core.lock_state(lock.id()).holder,
            Some(thread::current_tid()),
            "condition signaled without holding the lock"
        );
    }
}

impl Drop for ConditionVariable {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        self.kernel.lock_core().destroy_condition(self.id);
    }
}
