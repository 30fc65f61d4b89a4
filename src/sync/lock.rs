//! Lock with priority donation.

use crate::kernel::{Core, Kernel, LockId};
use crate::thread;
use std::sync::{Arc, MutexGuard};

/// A lock: a binary semaphore with an owner.
///
/// Unlike a [`Semaphore`], a lock knows its holder: only the thread that
/// acquired it may release it, and acquiring it twice from the same thread
/// is a fatal error rather than a deadlock.
///
/// Under priority scheduling a contended acquire donates the waiter's
/// effective priority to the chain of holders blocking it, walking
/// `holder -> lock the holder waits on -> that lock's holder -> ...` up to
/// the kernel's donation depth bound. Each lock remembers the highest
/// priority donated through it, and a release re-derives the holder's
/// effective priority from the remaining held locks so nested donations
/// unwind one lock at a time.
///
/// Acquire and release suspend and must not run in interrupt context;
/// [`try_acquire`] never suspends and may.
///
/// [`Semaphore`]: crate::sync::Semaphore
/// [`try_acquire`]: Lock::try_acquire
pub struct Lock {
    kernel: Arc<Kernel>,
    id: LockId,
}

impl Lock {
    /// Creates an unheld lock.
    pub fn new(kernel: &Arc<Kernel>) -> Lock {
        let mut core = kernel.lock_core();
        let id = core.create_lock();
        drop(core);
        Lock {
            kernel: Arc::clone(kernel),
            id,
        }
    }

    /// Acquires the lock, suspending until it is free.
    ///
    /// Fatal if called from interrupt context or while already holding this
    /// lock.
    pub fn acquire(&self) {
        let core = self.kernel.lock_core();
        drop(self.acquire_in(core));
    }

    /// Acquire with the exclusive region already held. Condition variables
    /// re-take the lock this way after their wait semaphore fires.
    pub(crate) fn acquire_in<'a>(
        &'a self,
        mut core: MutexGuard<'a, Core>,
    ) -> MutexGuard<'a, Core> {
        assert!(!core.intr_context(), "lock acquire from interrupt context");
        let me = thread::current_tid();
        assert_ne!(
            core.lock_state(self.id).holder,
            Some(me),
            "lock already held by the current thread"
        );
        let old_level = core.intr_disable();
        let donates = core.config().scheduling_mode.donates();

        if donates && core.lock_state(self.id).holder.is_some() {
            core.thread_mut(me).waiting_for_lock = Some(self.id);
            let my_priority = core.thread(me).priority_effective;
            let depth_max = core.config().donation_depth_max;
            let mut lock = self.id;
            let mut donations = 0;
            // Walk the chain of holders blocking us, boosting each one that
            // ranks below us, until the chain ends, a holder already ranks
            // at least as high, or the depth bound is hit.
            while donations < depth_max {
                let holder = match core.lock_state(lock).holder {
                    Some(holder) => holder,
                    None => break,
                };
                if core.thread(holder).priority_effective >= my_priority {
                    break;
                }
                core.set_effective_priority(holder, my_priority, true);
                if core
                    .lock_state(lock)
                    .donated_ceiling
                    .map_or(true, |c| c < my_priority)
                {
                    core.lock_state_mut(lock).donated_ceiling = Some(my_priority);
                }
                donations += 1;
                match core.thread(holder).waiting_for_lock {
                    Some(next) => lock = next,
                    None => break,
                }
            }
        }

        let sema = core.lock_state(self.id).sema;
        let mut core = self.kernel.sema_down(core, sema);
        core.lock_state_mut(self.id).holder = Some(me);
        if donates {
            core.thread_mut(me).waiting_for_lock = None;
            core.push_held_lock(me, self.id);
        }
        core.intr_set_level(old_level);
        core
    }

    /// Acquires the lock without suspending. Returns whether it was taken.
    ///
    /// Never donates and is safe in interrupt context. Re-acquiring a lock
    /// already held by the caller is fatal, as with [`acquire`].
    ///
    /// [`acquire`]: Lock::acquire
    pub fn try_acquire(&self) -> bool {
        let mut core = self.kernel.lock_core();
        let me = thread::current_tid();
        assert_ne!(
            core.lock_state(self.id).holder,
            Some(me),
            "lock already held by the current thread"
        );
        let sema = core.lock_state(self.id).sema;
        if !core.sema_try_down(sema) {
            return false;
        }
        core.lock_state_mut(self.id).holder = Some(me);
        if core.config().scheduling_mode.donates() {
            core.push_held_lock(me, self.id);
        }
        true
    }

    /// Releases the lock, waking its waiters.
    ///
    /// Fatal if the caller does not hold the lock. Under priority scheduling
    /// the caller's effective priority drops back to what the remaining held
    /// locks justify, which is a preemption point.
    pub fn release(&self) {
        let core = self.kernel.lock_core();
        drop(self.release_in(core));
    }

    /// Release with the exclusive region already held, so a condition wait
    /// can drop the lock and queue itself without a window in between.
    pub(crate) fn release_in<'a>(
        &'a self,
        mut core: MutexGuard<'a, Core>,
    ) -> MutexGuard<'a, Core> {
        assert!(!core.intr_context(), "lock release from interrupt context");
        let me = thread::current_tid();
        assert_eq!(
            core.lock_state(self.id).holder,
            Some(me),
            "lock released by a thread that does not hold it"
        );
        let old_level = core.intr_disable();
        core.lock_state_mut(self.id).holder = None;

        if core.config().scheduling_mode.donates() {
            core.thread_mut(me).held_locks.retain(|l| *l != self.id);
            core.lock_state_mut(self.id).donated_ceiling = None;
            // The strongest remaining donation is recorded on the front
            // held lock; with none left, fall back to the base priority.
            let base = core.thread(me).priority_base;
            let inherited = core
                .thread(me)
                .held_locks
                .first()
                .and_then(|front| core.lock_state(*front).donated_ceiling)
                .filter(|c| *c > base);
            match inherited {
                Some(priority) => core.set_effective_priority(me, priority, true),
                None => core.set_effective_priority(me, base, false),
            }
        }

        let sema = core.lock_state(self.id).sema;
        let mut core = self.kernel.sema_up(core, sema);
        core.intr_set_level(old_level);
        core
    }

    /// Whether the calling thread holds this lock.
    pub fn held_by_current_thread(&self) -> bool {
        match thread::current_id() {
            Some(me) => self.kernel.lock_core().lock_state(self.id).holder == Some(me),
            None => false,
        }
    }

    pub(crate) fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    pub(crate) fn id(&self) -> LockId {
        self.id
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        let mut core = self.kernel.lock_core();
        debug_assert!(
            core.lock_state(self.id).holder.is_none(),
            "lock destroyed while held"
        );
        core.destroy_lock(self.id);
    }
}
