//! Synchronization primitives.
//!
//! Three primitives, layered: the [`Semaphore`] is the only one that ever
//! suspends a thread; the [`Lock`] is a semaphore of value one plus an owner
//! and priority donation; the [`ConditionVariable`] hands each waiter a
//! private semaphore and pairs with a lock for Mesa-style waiting.
//!
//! Misuse is fatal by contract: releasing a lock one does not hold,
//! re-acquiring a held lock, waiting on a condition without its lock, or
//! suspending in interrupt context all panic rather than return an error.
//! These are programming errors in the caller, and a kernel that continued
//! past one would corrupt scheduler state.

pub mod condition_variable;
pub mod lock;
pub mod ordering;
pub mod semaphore;

pub use condition_variable::ConditionVariable;
pub use lock::Lock;
pub use semaphore::Semaphore;
