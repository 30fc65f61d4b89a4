//! Condition variable behavior: Mesa wakeup order, snapshot ranking, and
//! the hold-the-lock contract.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use unicore::{ConditionVariable, Kernel, Lock, Priority, ThreadBuilder, ThreadState};

fn spawn_waiter(
    kernel: &Arc<Kernel>,
    lock: &Arc<Lock>,
    cond: &Arc<ConditionVariable>,
    order: &Arc<Mutex<Vec<u8>>>,
    priority: u8,
) -> unicore::JoinHandle {
    let lock = Arc::clone(lock);
    let cond = Arc::clone(cond);
    let order = Arc::clone(order);
    ThreadBuilder::new(format!("waiter-{priority}"))
        .priority(Priority::new(priority))
        .spawn(kernel, move || {
            lock.acquire();
            cond.wait(&lock);
            order.lock().unwrap().push(priority);
            lock.release();
        })
}

#[test]
fn signal_wakes_the_highest_snapshot_priority() {
    let kernel = Kernel::new();
    let lock = Arc::new(Lock::new(&kernel));
    let cond = Arc::new(ConditionVariable::new(&kernel));
    let order = Arc::new(Mutex::new(Vec::new()));

    // Both outrank us, so each runs at spawn and parks inside wait.
    let low = spawn_waiter(&kernel, &lock, &cond, &order, 33);
    let high = spawn_waiter(&kernel, &lock, &cond, &order, 36);
    assert_eq!(kernel.state_of(low.tid()), Some(ThreadState::Blocked));
    assert_eq!(kernel.state_of(high.tid()), Some(ThreadState::Blocked));

    lock.acquire();
    cond.signal(&lock);
    lock.release();
    assert_eq!(*order.lock().unwrap(), vec![36]);

    lock.acquire();
    cond.signal(&lock);
    lock.release();
    assert_eq!(*order.lock().unwrap(), vec![36, 33]);
    low.join();
    high.join();
}

#[test]
fn broadcast_wakes_everyone_in_snapshot_order() {
    let kernel = Kernel::new();
    let lock = Arc::new(Lock::new(&kernel));
    let cond = Arc::new(ConditionVariable::new(&kernel));
    let order = Arc::new(Mutex::new(Vec::new()));

    let waiters = [
        spawn_waiter(&kernel, &lock, &cond, &order, 33),
        spawn_waiter(&kernel, &lock, &cond, &order, 36),
        spawn_waiter(&kernel, &lock, &cond, &order, 34),
    ];

    lock.acquire();
    cond.broadcast(&lock);
    lock.release();

    for waiter in waiters {
        waiter.join();
    }
    assert_eq!(*order.lock().unwrap(), vec![36, 34, 33]);
}

#[test]
fn signal_with_no_waiters_is_a_no_op() {
    let kernel = Kernel::new();
    let lock = Lock::new(&kernel);
    let cond = ConditionVariable::new(&kernel);

    lock.acquire();
    cond.signal(&lock);
    cond.broadcast(&lock);
    lock.release();
}

#[test]
#[should_panic(expected = "without holding the lock")]
fn wait_without_the_lock_is_fatal() {
    let kernel = Kernel::new();
    let lock = Lock::new(&kernel);
    let cond = ConditionVariable::new(&kernel);
    cond.wait(&lock);
}

#[test]
#[should_panic(expected = "without holding the lock")]
fn signal_without_the_lock_is_fatal() {
    let kernel = Kernel::new();
    let lock = Lock::new(&kernel);
    let cond = ConditionVariable::new(&kernel);
    cond.signal(&lock);
}

#[test]
#[should_panic(expected = "different kernels")]
fn mixing_kernels_is_fatal() {
    let kernel = Kernel::new();
    let cond = ConditionVariable::new(&kernel);
    let other = Kernel::new();
    let foreign_lock = Lock::new(&other);
    cond.signal(&foreign_lock);
}

#[test]
fn woken_waiter_recheck_is_required() {
    // Mesa semantics: a signal is a hint. The consumer loops on its
    // predicate and tolerates wakeups that find it still false.
    let kernel = Kernel::new();
    let lock = Arc::new(Lock::new(&kernel));
    let cond = Arc::new(ConditionVariable::new(&kernel));
    let flag = Arc::new(AtomicBool::new(false));
    let consumed = Arc::new(AtomicBool::new(false));

    let consumer = {
        let (lock, cond) = (Arc::clone(&lock), Arc::clone(&cond));
        let (flag, consumed) = (Arc::clone(&flag), Arc::clone(&consumed));
        ThreadBuilder::new("consumer")
            .priority(Priority::new(40))
            .spawn(&kernel, move || {
                lock.acquire();
                while !flag.load(Ordering::Relaxed) {
                    cond.wait(&lock);
                }
                consumed.store(true, Ordering::Relaxed);
                lock.release();
            })
    };

    // Spurious round: wake the consumer with the predicate still false.
    lock.acquire();
    cond.signal(&lock);
    lock.release();
    assert!(!consumed.load(Ordering::Relaxed));
    assert_eq!(kernel.state_of(consumer.tid()), Some(ThreadState::Blocked));

    lock.acquire();
    flag.store(true, Ordering::Relaxed);
    cond.signal(&lock);
    lock.release();
    consumer.join();
    assert!(consumed.load(Ordering::Relaxed));
}
