//! Runtime-checkable invariants of the nucleus state
//!
//! These hold at every syscall/interrupt boundary and are asserted by the
//! integration tests after every step:
//!
//! 1. **Queue/counter consistency**: each descriptor's queue length
//!    equals `max(0, -counter)`
//! 2. **Device binding validity**: every device table entry resolves to
//!    an allocated, pinned descriptor
//! 3. **No duplicate waiters**: a process waits on at most one semaphore,
//!    and at most once

use alloc::string::String;
use alloc::vec::Vec;

use crate::state::NucleusState;

/// An invariant violation with details
#[derive(Clone, Debug)]
pub struct InvariantViolation {
    /// Name of the violated invariant
    pub invariant: &'static str,
    /// Description of what went wrong
    pub description: String,
}

/// Check all nucleus invariants.
///
/// Returns a list of violations (empty if all invariants hold).
pub fn check_all_invariants(state: &NucleusState) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    violations.extend(check_queue_counter_consistency(state));
    violations.extend(check_device_binding_validity(state));
    violations.extend(check_no_duplicate_waiters(state));

    violations
}

/// Invariant 1: queue length equals `max(0, -counter)` per descriptor
fn check_queue_counter_consistency(state: &NucleusState) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    for sem in state.semaphores.iter() {
        let expected = if sem.value < 0 { (-sem.value) as usize } else { 0 };
        if sem.queue.len() != expected {
            violations.push(InvariantViolation {
                invariant: "queue_counter_consistency",
                description: alloc::format!(
                    "semaphore {:#010x}: counter {} implies {} waiters, queue holds {}",
                    sem.key.0,
                    sem.value,
                    expected,
                    sem.queue.len()
                ),
            });
        }
    }

    violations
}

/// Invariant 2: every device binding resolves to a pinned descriptor
fn check_device_binding_validity(state: &NucleusState) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    for key in state.device_sems.bindings() {
        match state.semaphores.get(key) {
            None => violations.push(InvariantViolation {
                invariant: "device_binding_validity",
                description: alloc::format!(
                    "device binding {:#010x} has no semaphore descriptor",
                    key.0
                ),
            }),
            Some(sem) if !sem.pinned => violations.push(InvariantViolation {
                invariant: "device_binding_validity",
                description: alloc::format!(
                    "device binding {:#010x} resolves to an unpinned descriptor",
                    key.0
                ),
            }),
            Some(_) => {}
        }
    }

    violations
}

/// Invariant 3: no process appears twice across the wait queues
fn check_no_duplicate_waiters(state: &NucleusState) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();
    let mut seen = alloc::collections::BTreeSet::new();

    for sem in state.semaphores.iter() {
        for &pid in &sem.queue {
            if !seen.insert(pid) {
                violations.push(InvariantViolation {
                    invariant: "no_duplicate_waiters",
                    description: alloc::format!(
                        "process {} queued more than once (seen again on {:#010x})",
                        pid.0,
                        sem.key.0
                    ),
                });
            }
        }
    }

    violations
}
