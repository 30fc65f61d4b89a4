//! Counting semaphore.

use crate::kernel::{Kernel, SemaId};
use std::sync::Arc;

/// A counting semaphore.
///
/// The value counts available permits. [`down`] waits for a permit and takes
/// it; [`up`] returns one and wakes every queued waiter, of which exactly one
/// will win the permit and the rest re-enter their wait. Waiters are queued
/// in descending effective-priority order, arrival order among equals.
///
/// `up` and [`try_down`] never suspend and are safe to call from interrupt
/// context; `down` is not and asserts against it.
///
/// [`down`]: Semaphore::down
/// [`up`]: Semaphore::up
/// [`try_down`]: Semaphore::try_down
pub struct Semaphore {
    kernel: Arc<Kernel>,
    pub(crate) id: SemaId,
}

impl Semaphore {
    /// Creates a semaphore with `value` initial permits.
    pub fn new(kernel: &Arc<Kernel>, value: usize) -> Semaphore {
        let mut core = kernel.lock_core();
        let id = core.create_semaphore(value);
        drop(core);
        Semaphore {
            kernel: Arc::clone(kernel),
            id,
        }
    }

    /// Waits until the value is positive, then decrements it.
    pub fn down(&self) {
        let core = self.kernel.lock_core();
        assert!(!core.intr_context(), "semaphore down from interrupt context");
        let core = self.kernel.sema_down(core, self.id);
        drop(core);
    }

    /// Decrements the value if it is positive, without waiting. Returns
    /// whether a permit was taken.
    pub fn try_down(&self) -> bool {
        self.kernel.lock_core().sema_try_down(self.id)
    }

    /// Increments the value and wakes all queued waiters.
    ///
    /// Outside interrupt context, yields the core when a woken thread
    /// out-ranks the caller.
    pub fn up(&self) {
        let core = self.kernel.lock_core();
        let core = self.kernel.sema_up(core, self.id);
        drop(core);
    }

    /// The current number of permits. A snapshot; stale by the time the
    /// caller looks at it unless the caller knows nobody else is up/downing.
    pub fn value(&self) -> usize {
        self.kernel.lock_core().sema(self.id).value
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        self.kernel.lock_core().destroy_semaphore(self.id);
    }
}
