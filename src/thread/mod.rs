//! Thread abstraction.
//!
//! A kernel thread in this model is hosted on an OS thread, but the OS never
//! schedules two of them concurrently: each one parks itself until the kernel
//! hands it the core, so exactly one thread executes model code at any
//! instant. Threads are created through [`ThreadBuilder`], can be named, and
//! are joined through the [`JoinHandle`] returned from spawn.
//!
//! The thread control block lives inside the kernel's arena and is addressed
//! by a stable [`ThreadId`]; this module only carries the host-side plumbing
//! (the per-thread parker and the ambient current-thread id).

pub mod scheduler;

use crate::interrupt::IntrLevel;
use crate::kernel::{Kernel, SemaId};
use crossbeam_utils::sync::{Parker, Unparker};
use std::cell::Cell;
use std::sync::{mpsc, Arc};

thread_local! {
    static PARKER: Parker = Parker::new();
    static CURRENT: Cell<Option<ThreadId>> = const { Cell::new(None) };
}

/// Parks the calling OS thread until its unparker is signaled.
pub(crate) fn park_current() {
    PARKER.with(|p| p.park());
}

/// The unparker paired with the calling OS thread's parker.
pub(crate) fn my_unparker() -> Unparker {
    PARKER.with(|p| p.unparker().clone())
}

pub(crate) fn current_id() -> Option<ThreadId> {
    CURRENT.with(|c| c.get())
}

pub(crate) fn set_current_id(tid: Option<ThreadId>) {
    CURRENT.with(|c| c.set(tid));
}

/// The id of the calling kernel thread.
///
/// Every operation in this crate must run on a thread registered with the
/// kernel; anything else is a contract violation.
pub(crate) fn current_tid() -> ThreadId {
    current_id().expect("not a kernel thread")
}

/// A stable identifier for a thread record in the kernel arena.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ThreadId(pub(crate) u64);

/// A thread priority in the range `0..=63`.
///
/// Higher values run first. `priority_base` is the assigned priority of a
/// thread; its effective priority may be temporarily boosted above it by
/// donation while the thread holds a contended lock.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Priority(u8);

impl Priority {
    /// Lowest priority.
    pub const MIN: Priority = Priority(0);
    /// Priority assigned to threads that do not ask for one.
    pub const DEFAULT: Priority = Priority(31);
    /// Highest priority.
    pub const MAX: Priority = Priority(63);

    /// Creates a priority, panicking if `value` is out of range.
    pub fn new(value: u8) -> Priority {
        assert!(value <= Priority::MAX.0, "priority out of range: {value}");
        Priority(value)
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

/// A possible state of a thread.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ThreadState {
    /// Runnable, sitting in the ready queue.
    Ready,
    /// Currently executing on the core.
    Running,
    /// Suspended until explicitly unblocked.
    Blocked,
    /// Finished.
    Exited,
}

/// A struct to build a new thread.
///
/// ```
/// use std::sync::Arc;
/// use unicore::{Kernel, Priority, Semaphore, ThreadBuilder};
///
/// let kernel = Kernel::new();
/// let done = Arc::new(Semaphore::new(&kernel, 0));
///
/// let worker = {
///     let done = Arc::clone(&done);
///     ThreadBuilder::new("worker")
///         .priority(Priority::new(40))
///         .spawn(&kernel, move || done.up())
/// };
///
/// done.down();
/// worker.join();
/// ```
pub struct ThreadBuilder {
    name: String,
    priority: Priority,
}

impl ThreadBuilder {
    /// Create a new thread builder for thread `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: Priority::DEFAULT,
        }
    }

    /// Set the priority of the thread.
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Spawn the thread.
    ///
    /// The new thread becomes Ready immediately. If it out-ranks the caller,
    /// the caller yields the core to it before this function returns.
    pub fn spawn<F>(self, kernel: &Arc<Kernel>, thread_fn: F) -> JoinHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let (unparker_tx, unparker_rx) = mpsc::channel();
        let (tid_tx, tid_rx) = mpsc::channel::<ThreadId>();
        let host = Arc::clone(kernel);

        std::thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                unparker_tx
                    .send(my_unparker())
                    .expect("spawner vanished during handshake");
                let tid = tid_rx.recv().expect("spawner vanished during handshake");
                set_current_id(Some(tid));
                let mut core = host.wait_until_scheduled(tid);
                // A fresh thread begins its first run with interrupts on.
                core.intr_set_level(IntrLevel::On);
                drop(core);
                thread_fn();
                host.exit_current();
            })
            .expect("failed to spawn host thread");

        let unparker = unparker_rx
            .recv()
            .expect("host thread died during handshake");
        let (tid, exit_sema) = kernel.register_spawn(&self.name, self.priority, unparker, tid_tx);
        JoinHandle {
            kernel: Arc::clone(kernel),
            tid,
            exit_sema,
        }
    }
}

/// A handle to join a spawned thread.
pub struct JoinHandle {
    kernel: Arc<Kernel>,
    tid: ThreadId,
    exit_sema: SemaId,
}

impl JoinHandle {
    /// The id of the underlying thread.
    pub fn tid(&self) -> ThreadId {
        self.tid
    }

    /// Blocks until the underlying thread exits.
    pub fn join(self) {
        let core = self.kernel.lock_core();
        assert!(!core.intr_context(), "join from interrupt context");
        let core = self.kernel.sema_down(core, self.exit_sema);
        drop(core);
    }
}
