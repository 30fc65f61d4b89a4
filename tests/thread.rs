//! Thread lifecycle: spawn preemption, join, yield, and base-priority
//! changes without donation in play.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use unicore::{Kernel, Priority, ThreadBuilder, ThreadState};

#[test]
fn spawning_a_higher_priority_thread_preempts_the_spawner() {
    let kernel = Kernel::new();
    let ran = Arc::new(AtomicBool::new(false));

    let worker = {
        let ran = Arc::clone(&ran);
        ThreadBuilder::new("worker")
            .priority(Priority::new(40))
            .spawn(&kernel, move || ran.store(true, Ordering::Relaxed))
    };
    // It outranked us, so it ran to completion before spawn returned.
    assert!(ran.load(Ordering::Relaxed));
    assert_eq!(kernel.state_of(worker.tid()), Some(ThreadState::Exited));
    worker.join();
}

#[test]
fn spawning_a_lower_priority_thread_does_not() {
    let kernel = Kernel::new();
    let ran = Arc::new(AtomicBool::new(false));

    let worker = {
        let ran = Arc::clone(&ran);
        ThreadBuilder::new("worker")
            .priority(Priority::new(20))
            .spawn(&kernel, move || ran.store(true, Ordering::Relaxed))
    };
    assert!(!ran.load(Ordering::Relaxed));
    assert_eq!(kernel.state_of(worker.tid()), Some(ThreadState::Ready));

    // Join suspends us until the worker has run and exited.
    worker.join();
    assert!(ran.load(Ordering::Relaxed));
}

#[test]
fn yield_rotates_equal_priorities_in_fifo_order() {
    let kernel = Kernel::new();
    let order = Arc::new(Mutex::new(Vec::new()));

    let spawn_logger = |name: &'static str| {
        let order = Arc::clone(&order);
        ThreadBuilder::new(name).spawn(&kernel, move || {
            order.lock().unwrap().push(name);
        })
    };
    let first = spawn_logger("first");
    let second = spawn_logger("second");

    kernel.yield_now();
    first.join();
    second.join();
    assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
}

#[test]
fn set_priority_takes_effect_immediately() {
    let kernel = Kernel::new();
    assert_eq!(kernel.current_priority(), Priority::DEFAULT);

    kernel.set_priority(Priority::new(50));
    assert_eq!(kernel.current_priority(), Priority::new(50));

    let ran = Arc::new(AtomicBool::new(false));
    let worker = {
        let ran = Arc::clone(&ran);
        ThreadBuilder::new("worker")
            .priority(Priority::new(40))
            .spawn(&kernel, move || ran.store(true, Ordering::Relaxed))
    };
    assert!(!ran.load(Ordering::Relaxed));

    // Dropping below a Ready thread hands it the core at once.
    kernel.set_priority(Priority::new(10));
    assert!(ran.load(Ordering::Relaxed));
    assert_eq!(kernel.current_priority(), Priority::new(10));
    worker.join();
}

#[test]
fn priority_out_of_range_is_fatal() {
    let caught = std::panic::catch_unwind(|| Priority::new(64));
    assert!(caught.is_err());
}

#[test]
fn join_after_exit_returns_immediately() {
    let kernel = Kernel::new();
    let worker = ThreadBuilder::new("worker")
        .priority(Priority::new(40))
        .spawn(&kernel, || {});
    assert_eq!(kernel.state_of(worker.tid()), Some(ThreadState::Exited));
    worker.join();
}

#[test]
fn threads_observe_each_others_states() {
    let kernel = Kernel::new();
    let main_tid = kernel.current();

    let observed = Arc::new(Mutex::new(None));
    let worker = {
        let kern = Arc::clone(&kernel);
        let observed = Arc::clone(&observed);
        ThreadBuilder::new("observer")
            .priority(Priority::new(40))
            .spawn(&kernel, move || {
                *observed.lock().unwrap() = kern.state_of(main_tid);
            })
    };
    // While the observer ran, we sat in the ready queue.
    assert_eq!(*observed.lock().unwrap(), Some(ThreadState::Ready));
    assert_eq!(kernel.state_of(worker.tid()), Some(ThreadState::Exited));
    worker.join();
}
