//! Interrupt masking model.
//!
//! On the single core this crate models, masking interrupts is the sole
//! mutual-exclusion mechanism: while the level is [`IntrLevel::Off`], nothing
//! can preempt the running thread, so it may mutate scheduler and
//! synchronization state freely.
//!
//! Every operation that touches shared state follows the same discipline:
//! disable interrupts at entry, capturing the previous level, and restore
//! that captured level on every exit path. The captured token matters on the
//! path that suspends the calling thread: by the time the thread resumes,
//! other threads have changed the global level many times, and the only
//! correct value to restore is the one saved at this call's entry.

/// The interrupt level of the modeled core.
///
/// Returned by `Core::intr_disable` as an opaque snapshot of the previous
/// level and handed back to `Core::intr_set_level`. The pairing is
/// mandatory; a missed restore leaves the core masked forever.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum IntrLevel {
    /// Interrupts are enabled.
    On,
    /// Interrupts are disabled.
    Off,
}
