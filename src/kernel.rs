//! The kernel core: arena state and the single-core handoff protocol.
//!
//! All mutable state of the model lives in one place, the `Core`: thread
//! records, semaphore/lock/condition records, the ready queue, and the
//! interrupt level. Entities are arena-allocated and addressed by stable ids
//! (`ThreadId`, `SemaId`, ...), with cross-references such as a thread's
//! `waiting_for_lock` or a lock's `holder` stored as ids rather than
//! pointers, so no ownership cycles arise between threads and locks.
//!
//! The `Core` sits behind a single process-wide mutex that plays the role of
//! the hardware interrupt mask on a single core: whoever holds it may mutate
//! anything, and nothing else runs meanwhile. Blocking operations release it
//! while the calling thread is parked and re-acquire it on resume, which is
//! exactly the behavior of masked critical sections around a suspend point.

use crate::interrupt::IntrLevel;
use crate::sync::ordering;
use crate::thread::scheduler::{ReadyQueue, Scheduler, SchedulingMode};
use crate::thread::{self, Priority, ThreadId, ThreadState};
use crossbeam_utils::sync::Unparker;
use std::collections::BTreeMap;
use std::sync::{mpsc, Arc, Mutex, MutexGuard};

/// Default bound on the priority-donation walk, in donations performed.
pub const DONATION_DEPTH_MAX: usize = 8;

/// Kernel construction parameters.
///
/// Fixed for the lifetime of the kernel and read-only to every subsystem.
#[derive(Clone, Copy, Debug)]
pub struct KernelConfig {
    pub scheduling_mode: SchedulingMode,
    /// Maximum number of holders boosted by one donation walk.
    pub donation_depth_max: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            scheduling_mode: SchedulingMode::Priority,
            donation_depth_max: DONATION_DEPTH_MAX,
        }
    }
}

/// A stable identifier for a semaphore record in the kernel arena.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct SemaId(u64);

/// A stable identifier for a lock record in the kernel arena.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct LockId(u64);

/// A stable identifier for a condition-variable record in the kernel arena.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct CondId(u64);

pub(crate) struct ThreadRecord {
    pub(crate) name: String,
    pub(crate) state: ThreadState,
    /// Assigned priority.
    pub(crate) priority_base: Priority,
    /// Current priority, possibly boosted by donation.
    pub(crate) priority_effective: Priority,
    pub(crate) is_donated: bool,
    /// The lock this thread is blocked trying to acquire, if any.
    pub(crate) waiting_for_lock: Option<LockId>,
    /// Locks currently owned, ordered by the lock comparator (descending).
    pub(crate) held_locks: Vec<LockId>,
    pub(crate) unparker: Unparker,
    /// Private semaphore upped exactly once, on exit. Join downs it.
    pub(crate) exit_sema: SemaId,
}

pub(crate) struct SemaRecord {
    pub(crate) value: usize,
    /// Blocked threads, descending by effective priority at enqueue time,
    /// arrival order among equals.
    pub(crate) waiters: Vec<ThreadId>,
}

pub(crate) struct LockRecord {
    pub(crate) sema: SemaId,
    pub(crate) holder: Option<ThreadId>,
    /// Highest priority currently donated through this lock.
    pub(crate) donated_ceiling: Option<Priority>,
}

pub(crate) struct CondWaiter {
    pub(crate) sema: SemaId,
    /// The waiter's effective priority at the moment it called wait.
    pub(crate) priority: Priority,
}

pub(crate) struct CondRecord {
    pub(crate) waiters: Vec<CondWaiter>,
}

/// All mutable kernel state. Lives behind [`Kernel`]'s mutex.
pub(crate) struct Core {
    config: KernelConfig,
    intr_level: IntrLevel,
    in_interrupt: bool,
    running: Option<ThreadId>,
    ready: ReadyQueue,
    pub(crate) threads: BTreeMap<ThreadId, ThreadRecord>,
    semas: BTreeMap<SemaId, SemaRecord>,
    locks: BTreeMap<LockId, LockRecord>,
    conds: BTreeMap<CondId, CondRecord>,
    id_counter: u64,
}

impl Core {
    fn new(config: KernelConfig) -> Self {
        Self {
            config,
            intr_level: IntrLevel::On,
            in_interrupt: false,
            running: None,
            ready: ReadyQueue::new(),
            threads: BTreeMap::new(),
            semas: BTreeMap::new(),
            locks: BTreeMap::new(),
            conds: BTreeMap::new(),
            id_counter: 0,
        }
    }

    fn fresh_id(&mut self) -> u64 {
        self.id_counter += 1;
        self.id_counter
    }

    pub(crate) fn config(&self) -> KernelConfig {
        self.config
    }

    // Interrupt-mask discipline. `intr_disable` returns the previous level;
    // the caller must hand it back to `intr_set_level` on every exit path.

    pub(crate) fn intr_disable(&mut self) -> IntrLevel {
        std::mem::replace(&mut self.intr_level, IntrLevel::Off)
    }

    pub(crate) fn intr_set_level(&mut self, level: IntrLevel) {
        self.intr_level = level;
    }

    pub(crate) fn intr_context(&self) -> bool {
        self.in_interrupt
    }

    // Arena accessors. A stale id is a programming error, not a runtime
    // condition, so lookups are fatal.

    pub(crate) fn thread(&self, tid: ThreadId) -> &ThreadRecord {
        self.threads.get(&tid).expect("unknown thread id")
    }

    pub(crate) fn thread_mut(&mut self, tid: ThreadId) -> &mut ThreadRecord {
        self.threads.get_mut(&tid).expect("unknown thread id")
    }

    pub(crate) fn sema(&self, id: SemaId) -> &SemaRecord {
        self.semas.get(&id).expect("unknown semaphore id")
    }

    pub(crate) fn sema_mut(&mut self, id: SemaId) -> &mut SemaRecord {
        self.semas.get_mut(&id).expect("unknown semaphore id")
    }

    pub(crate) fn lock_state(&self, id: LockId) -> &LockRecord {
        self.locks.get(&id).expect("unknown lock id")
    }

    pub(crate) fn lock_state_mut(&mut self, id: LockId) -> &mut LockRecord {
        self.locks.get_mut(&id).expect("unknown lock id")
    }

    pub(crate) fn create_semaphore(&mut self, value: usize) -> SemaId {
        let id = SemaId(self.fresh_id());
        self.semas.insert(
            id,
            SemaRecord {
                value,
                waiters: Vec::new(),
            },
        );
        id
    }

    pub(crate) fn destroy_semaphore(&mut self, id: SemaId) {
        if let Some(sema) = self.semas.remove(&id) {
            debug_assert!(
                sema.waiters.is_empty(),
                "semaphore destroyed with queued waiters"
            );
        }
    }

    pub(crate) fn create_lock(&mut self) -> LockId {
        let sema = self.create_semaphore(1);
        let id = LockId(self.fresh_id());
        self.locks.insert(
            id,
            LockRecord {
                sema,
                holder: None,
                donated_ceiling: None,
            },
        );
        id
    }

    pub(crate) fn destroy_lock(&mut self, id: LockId) {
        if let Some(lock) = self.locks.remove(&id) {
            self.destroy_semaphore(lock.sema);
        }
    }

    pub(crate) fn create_condition(&mut self) -> CondId {
        let id = CondId(self.fresh_id());
        self.conds.insert(id, CondRecord { waiters: Vec::new() });
        id
    }

    pub(crate) fn destroy_condition(&mut self, id: CondId) {
        if let Some(cond) = self.conds.remove(&id) {
            debug_assert!(
                cond.waiters.is_empty(),
                "condition variable destroyed with queued waiters"
            );
        }
    }

    pub(crate) fn register_thread(
        &mut self,
        name: &str,
        priority: Priority,
        unparker: Unparker,
    ) -> ThreadId {
        let exit_sema = self.create_semaphore(0);
        let tid = ThreadId(self.fresh_id());
        self.threads.insert(
            tid,
            ThreadRecord {
                name: name.to_string(),
                state: ThreadState::Ready,
                priority_base: priority,
                priority_effective: priority,
                is_donated: false,
                waiting_for_lock: None,
                held_locks: Vec::new(),
                unparker,
                exit_sema,
            },
        );
        tid
    }

    /// Sets a thread's effective priority, distinguishing donation sets from
    /// restore-to-base sets.
    pub(crate) fn set_effective_priority(
        &mut self,
        tid: ThreadId,
        priority: Priority,
        donated: bool,
    ) {
        log::trace!(
            "priority: {:?} <- {:?} (donated: {})",
            tid,
            priority,
            donated
        );
        let t = self.thread_mut(tid);
        t.priority_effective = priority;
        t.is_donated = donated;
    }

    /// Makes a blocked thread ready. Does not switch; the scheduler decides
    /// when it actually runs.
    pub(crate) fn unblock(&mut self, tid: ThreadId) {
        debug_assert_eq!(self.thread(tid).state, ThreadState::Blocked);
        self.thread_mut(tid).state = ThreadState::Ready;
        self.ready.push_to_queue(tid);
    }

    fn pick_next(&mut self) -> Option<ThreadId> {
        let Core { ready, threads, .. } = self;
        ready.next_to_run(&|tid| {
            threads
                .get(&tid)
                .map(|t| t.priority_effective)
                .unwrap_or(Priority::MIN)
        })
    }

    fn peek_ready_priority(&self) -> Option<Priority> {
        let Core { ready, threads, .. } = self;
        ready.highest_priority(&|tid| {
            threads
                .get(&tid)
                .map(|t| t.priority_effective)
                .unwrap_or(Priority::MIN)
        })
    }

    /// Inserts `tid` into the semaphore's waiter queue, descending by its
    /// current effective priority, after any already-queued equals.
    pub(crate) fn enqueue_waiter(&mut self, id: SemaId, tid: ThreadId) {
        let priority = self.thread(tid).priority_effective;
        let idx = self
            .sema(id)
            .waiters
            .iter()
            .position(|w| {
                ordering::priority_semaphore_compare(priority, self.thread(*w).priority_effective)
            })
            .unwrap_or_else(|| self.sema(id).waiters.len());
        self.sema_mut(id).waiters.insert(idx, tid);
    }

    /// Non-blocking down. Callable from interrupt context.
    pub(crate) fn sema_try_down(&mut self, id: SemaId) -> bool {
        let old_level = self.intr_disable();
        let sema = self.sema_mut(id);
        let success = sema.value > 0;
        if success {
            sema.value -= 1;
        }
        self.intr_set_level(old_level);
        success
    }

    /// Increments the value and wakes every queued waiter; only one of them
    /// will observe a positive value, the rest loop back into their wait.
    /// Returns the highest-priority thread woken, if any.
    pub(crate) fn sema_up_all(&mut self, id: SemaId) -> Option<ThreadId> {
        self.sema_mut(id).value += 1;
        let waiters = std::mem::take(&mut self.sema_mut(id).waiters);
        let mut top: Option<ThreadId> = None;
        for tid in waiters {
            self.unblock(tid);
            let better = match top {
                Some(t) => self.thread(tid).priority_effective > self.thread(t).priority_effective,
                None => true,
            };
            if better {
                top = Some(tid);
            }
        }
        top
    }

    /// Highest effective priority among threads queued on the lock's
    /// semaphore, or `None` for an empty queue (ranks lowest).
    pub(crate) fn lock_top_waiter_priority(&self, id: LockId) -> Option<Priority> {
        let sema = self.lock_state(id).sema;
        self.sema(sema)
            .waiters
            .iter()
            .map(|w| self.thread(*w).priority_effective)
            .max()
    }

    /// Inserts a newly acquired lock into the holder's `held_locks`, ordered
    /// by the lock comparator.
    pub(crate) fn push_held_lock(&mut self, tid: ThreadId, lock: LockId) {
        let rank = self.lock_top_waiter_priority(lock);
        let ranks: Vec<Option<Priority>> = self
            .thread(tid)
            .held_locks
            .iter()
            .map(|l| self.lock_top_waiter_priority(*l))
            .collect();
        let idx = ranks
            .iter()
            .position(|r| ordering::lock_priority_compare(rank, *r))
            .unwrap_or(ranks.len());
        self.thread_mut(tid).held_locks.insert(idx, lock);
    }

    pub(crate) fn enqueue_cond_waiter(&mut self, id: CondId, sema: SemaId, priority: Priority) {
        let cond = self.conds.get_mut(&id).expect("unknown condition variable id");
        ordering::insert_ordered(&mut cond.waiters, CondWaiter { sema, priority }, |a, b| {
            ordering::priority_semaphore_compare(a.priority, b.priority)
        });
    }

    pub(crate) fn pop_cond_waiter(&mut self, id: CondId) -> Option<CondWaiter> {
        let cond = self.conds.get_mut(&id).expect("unknown condition variable id");
        if cond.waiters.is_empty() {
            None
        } else {
            Some(cond.waiters.remove(0))
        }
    }
}

/// The kernel: a single simulated core and everything scheduled on it.
///
/// Construction registers the calling OS thread as the initial kernel thread
/// ("main") and marks it running. Each test or embedder builds its own
/// kernel; nothing in this crate is process-global.
pub struct Kernel {
    core: Mutex<Core>,
}

impl Kernel {
    /// Creates a kernel with the default configuration.
    pub fn new() -> Arc<Kernel> {
        Self::with_config(KernelConfig::default())
    }

    /// Creates a kernel with an explicit configuration.
    pub fn with_config(config: KernelConfig) -> Arc<Kernel> {
        let mut core = Core::new(config);
        let tid = core.register_thread("main", Priority::DEFAULT, thread::my_unparker());
        core.thread_mut(tid).state = ThreadState::Running;
        core.running = Some(tid);
        thread::set_current_id(Some(tid));
        log::trace!("kernel: bootstrap thread {:?}", tid);
        Arc::new(Kernel {
            core: Mutex::new(core),
        })
    }

    pub(crate) fn lock_core(&self) -> MutexGuard<'_, Core> {
        // A poisoning panic here is always a contract-violation assert that
        // already unwound the offending thread; the state itself is intact.
        self.core.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Parks until the scheduler hands this thread the core, then returns
    /// with the exclusive region re-held.
    pub(crate) fn wait_until_scheduled(&self, me: ThreadId) -> MutexGuard<'_, Core> {
        loop {
            thread::park_current();
            let core = self.lock_core();
            if core.running == Some(me) {
                return core;
            }
            drop(core);
        }
    }

    /// Hands the core to `next` and parks the caller.
    fn switch_to<'a>(
        &'a self,
        mut core: MutexGuard<'a, Core>,
        me: ThreadId,
        next: ThreadId,
    ) -> MutexGuard<'a, Core> {
        log::trace!("switch: {:?} -> {:?}", me, next);
        core.thread_mut(next).state = ThreadState::Running;
        core.running = Some(next);
        core.thread(next).unparker.unpark();
        drop(core);
        self.wait_until_scheduled(me)
    }

    /// Suspends the calling thread until some other thread unblocks it.
    ///
    /// Must be entered with interrupts masked; the caller is expected to have
    /// queued itself on whatever wait list it blocks on. The exclusive region
    /// is released while parked and re-held on return. The interrupt level is
    /// left masked across the switch; the enclosing operation restores the
    /// level it captured at its own entry.
    pub(crate) fn block_current<'a>(
        &'a self,
        mut core: MutexGuard<'a, Core>,
    ) -> MutexGuard<'a, Core> {
        let me = thread::current_tid();
        debug_assert_eq!(core.running, Some(me));
        debug_assert_eq!(
            core.intr_level,
            IntrLevel::Off,
            "blocking outside a masked critical section"
        );
        core.thread_mut(me).state = ThreadState::Blocked;
        let next = match core.pick_next() {
            Some(next) => next,
            None => panic!(
                "scheduler deadlock: {:?} blocked with no runnable thread",
                core.thread(me).name
            ),
        };
        self.switch_to(core, me, next)
    }

    /// Gives up the core voluntarily. The caller stays Ready and competes
    /// with everything else in the queue.
    pub(crate) fn yield_current<'a>(
        &'a self,
        mut core: MutexGuard<'a, Core>,
    ) -> MutexGuard<'a, Core> {
        let me = thread::current_tid();
        debug_assert_eq!(core.running, Some(me));
        core.thread_mut(me).state = ThreadState::Ready;
        core.ready.push_to_queue(me);
        let next = core.pick_next().expect("ready queue cannot be empty here");
        if next == me {
            core.thread_mut(me).state = ThreadState::Running;
            return core;
        }
        self.switch_to(core, me, next)
    }

    /// Preemption point: yields if a Ready thread out-ranks the caller.
    /// No-op in interrupt context.
    pub(crate) fn maybe_yield_to_higher<'a>(
        &'a self,
        core: MutexGuard<'a, Core>,
    ) -> MutexGuard<'a, Core> {
        if core.intr_context() {
            return core;
        }
        let me = thread::current_tid();
        let mine = core.thread(me).priority_effective;
        match core.peek_ready_priority() {
            Some(p) if p > mine => self.yield_current(core),
            _ => core,
        }
    }

    /// Down or "P": waits for the value to become positive, then decrements
    /// it. The wait condition is re-checked on every wakeup.
    pub(crate) fn sema_down<'a>(
        &'a self,
        mut core: MutexGuard<'a, Core>,
        id: SemaId,
    ) -> MutexGuard<'a, Core> {
        let me = thread::current_tid();
        let old_level = core.intr_disable();
        while core.sema(id).value == 0 {
            core.enqueue_waiter(id, me);
            core = self.block_current(core);
        }
        core.sema_mut(id).value -= 1;
        core.intr_set_level(old_level);
        core
    }

    /// Up or "V": increments the value and wakes every queued waiter, then
    /// yields if the best woken thread out-ranks the caller and is Ready.
    pub(crate) fn sema_up<'a>(
        &'a self,
        mut core: MutexGuard<'a, Core>,
        id: SemaId,
    ) -> MutexGuard<'a, Core> {
        let old_level = core.intr_disable();
        if let Some(top) = core.sema_up_all(id) {
            if !core.intr_context() {
                let me = thread::current_tid();
                let top_ready = core.thread(top).state == ThreadState::Ready;
                let top_priority = core.thread(top).priority_effective;
                if top_ready && top_priority > core.thread(me).priority_effective {
                    core = self.yield_current(core);
                }
            }
        }
        core.intr_set_level(old_level);
        core
    }

    /// Registers a spawned thread, readies it, and preempts the caller if
    /// the newcomer out-ranks it. Returns the new thread's id and exit
    /// semaphore for the join handle.
    pub(crate) fn register_spawn(
        &self,
        name: &str,
        priority: Priority,
        unparker: Unparker,
        tid_tx: mpsc::Sender<ThreadId>,
    ) -> (ThreadId, SemaId) {
        let mut core = self.lock_core();
        let old_level = core.intr_disable();
        let tid = core.register_thread(name, priority, unparker);
        core.ready.push_to_queue(tid);
        tid_tx.send(tid).expect("host thread died during handshake");
        let exit_sema = core.thread(tid).exit_sema;
        let mut core = self.maybe_yield_to_higher(core);
        core.intr_set_level(old_level);
        (tid, exit_sema)
    }

    /// Tears down the calling thread: wakes its joiner, hands the core on,
    /// and never schedules the caller again.
    pub(crate) fn exit_current(&self) {
        let mut core = self.lock_core();
        let _ = core.intr_disable();
        let me = thread::current_tid();
        debug_assert_eq!(core.running, Some(me));
        core.thread_mut(me).state = ThreadState::Exited;
        let exit_sema = core.thread(me).exit_sema;
        let _ = core.sema_up_all(exit_sema);
        match core.pick_next() {
            Some(next) => {
                log::trace!("exit: {:?} -> {:?}", me, next);
                core.thread_mut(next).state = ThreadState::Running;
                core.running = Some(next);
                core.thread(next).unparker.unpark();
            }
            None => {
                assert!(
                    !core
                        .threads
                        .values()
                        .any(|t| t.state == ThreadState::Blocked),
                    "scheduler deadlock: last runnable thread exited while others are blocked"
                );
                core.running = None;
            }
        }
        thread::set_current_id(None);
    }

    /// The id of the calling kernel thread.
    pub fn current(&self) -> ThreadId {
        thread::current_tid()
    }

    /// The calling thread's effective priority.
    pub fn current_priority(&self) -> Priority {
        let core = self.lock_core();
        core.thread(thread::current_tid()).priority_effective
    }

    /// A thread's current effective priority.
    ///
    /// Inherently a snapshot when asked about a thread other than the
    /// caller; meant for inspection, not synchronization.
    pub fn priority_of(&self, tid: ThreadId) -> Priority {
        self.lock_core().thread(tid).priority_effective
    }

    /// A thread's current state, or `None` for an unknown id.
    pub fn state_of(&self, tid: ThreadId) -> Option<ThreadState> {
        self.lock_core().threads.get(&tid).map(|t| t.state)
    }

    /// Sets the calling thread's base priority.
    ///
    /// The effective priority follows unless a donation currently out-ranks
    /// the new base. Lowering below a Ready thread is a preemption point.
    pub fn set_priority(&self, priority: Priority) {
        let mut core = self.lock_core();
        let old_level = core.intr_disable();
        let me = thread::current_tid();
        core.thread_mut(me).priority_base = priority;
        let (donated, effective) = {
            let t = core.thread(me);
            (t.is_donated, t.priority_effective)
        };
        if !donated {
            core.set_effective_priority(me, priority, false);
        } else if priority > effective {
            core.set_effective_priority(me, priority, true);
        }
        let mut core = self.maybe_yield_to_higher(core);
        core.intr_set_level(old_level);
    }

    /// Yields the core voluntarily.
    pub fn yield_now(&self) {
        let mut core = self.lock_core();
        assert!(!core.intr_context(), "yield from interrupt context");
        let old_level = core.intr_disable();
        let mut core = self.yield_current(core);
        core.intr_set_level(old_level);
    }

    /// Runs `f` on the calling thread as if inside an interrupt handler:
    /// interrupts masked and the in-interrupt flag set. Suspending
    /// operations invoked from `f` fail their contract assertions;
    /// `up`/`try_down`/`try_acquire` and friends work normally but skip
    /// their preemption points.
    pub fn run_in_interrupt<R>(&self, f: impl FnOnce() -> R) -> R {
        let mut core = self.lock_core();
        assert!(!core.intr_context(), "nested interrupt contexts are not modeled");
        let old_level = core.intr_disable();
        core.in_interrupt = true;
        drop(core);
        let result = f();
        let mut core = self.lock_core();
        core.in_interrupt = false;
        core.intr_set_level(old_level);
        result
    }
}
