//! A deterministic model of a single-core kernel's synchronization layer.
//!
//! This crate implements the scheduling and synchronization core of a
//! uniprocessor kernel as a host-testable library: counting semaphores with
//! priority-ordered wakeup, locks with bounded priority donation, and
//! Mesa-style condition variables, all running under strict priority
//! scheduling with FIFO order among equals.
//!
//! Kernel threads are hosted on OS threads but never run concurrently: a
//! [`Kernel`] owns one simulated core, and every thread parks itself until
//! the scheduler hands it that core. All shared state sits inside one
//! exclusive region standing in for the hardware interrupt mask, which makes
//! every interleaving decision the model's own and runs reproducible.
//!
//! ```
//! use std::sync::Arc;
//! use unicore::{Kernel, Lock, Priority, ThreadBuilder};
//!
//! let kernel = Kernel::new();
//! let lock = Arc::new(Lock::new(&kernel));
//!
//! lock.acquire();
//! let contender = {
//!     let lock = Arc::clone(&lock);
//!     ThreadBuilder::new("contender")
//!         .priority(Priority::new(40))
//!         .spawn(&kernel, move || {
//!             lock.acquire();
//!             lock.release();
//!         })
//! };
//! // The contender out-ranks us and is blocked on the lock, so it has
//! // donated its priority to us.
//! assert_eq!(kernel.current_priority(), Priority::new(40));
//! lock.release();
//! contender.join();
//! ```

pub mod interrupt;
pub mod kernel;
pub mod sync;
pub mod thread;

pub use interrupt::IntrLevel;
pub use kernel::{Kernel, KernelConfig, DONATION_DEPTH_MAX};
pub use sync::{ConditionVariable, Lock, Semaphore};
pub use thread::scheduler::{Scheduler, SchedulingMode};
pub use thread::{JoinHandle, Priority, ThreadBuilder, ThreadId, ThreadState};
