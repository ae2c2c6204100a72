//! Core nucleus types
//!
//! This module contains the fundamental types used throughout the nucleus
//! core, plus the scheduler collaborator trait the dispatcher calls into.
//! All types here are pure data - nothing touches a bus.

use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

/// Process identifier
///
/// Opaque to the nucleus: processes are owned by the scheduler
/// collaborator; the core only stores and compares their ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Pid(pub u64);

/// Semaphore key
///
/// An opaque word-sized value. In practice a device status-register
/// address (for device-bound semaphores) or a process-chosen key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SemKey(pub u32);

/// Saved trap state of a process, as visible to the dispatcher.
///
/// Only the slots the dispatcher touches are modeled; the rest of the
/// frame belongs to the scheduler collaborator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedContext {
    /// Return-value slot restored into the user context on resume.
    pub ret: i32,
    /// Saved program counter word.
    pub pc: u32,
}

/// What the dispatcher asks its caller to do once a syscall completes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Control {
    /// Transfer control back to the interrupted user context.
    Resume,
    /// The previous process no longer runs; pick the next ready process.
    Switch,
}

/// Return-value sentinel for invalid arguments and unimplemented syscalls.
pub const RET_FAILURE: i32 = -1;
/// Return-value for successful process-control syscalls.
pub const RET_SUCCESS: i32 = 0;

/// Scheduler collaborator errors
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedError {
    /// The target does not name a live process.
    InvalidProcess,
}

/// Outcome of a cascading kill.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KillReport {
    /// Every process terminated: the victim and all its descendants.
    pub killed: Vec<Pid>,
    /// True when the victim set includes the currently running process.
    pub killed_running: bool,
}

/// The process-lifecycle collaborator consumed by the dispatcher.
///
/// Implementations own the process table, the ready queue and each
/// process's saved trap state. The nucleus core calls these operations
/// and never looks inside.
pub trait Scheduler {
    /// The currently running process, if any.
    fn current(&self) -> Option<Pid>;

    /// Append a process to the ready queue.
    fn enqueue_ready(&mut self, pid: Pid);

    /// Terminate a process and all of its descendants.
    fn kill(&mut self, pid: Pid) -> Result<KillReport, SchedError>;

    /// Remove the current process from the running role without readying
    /// it (it is parked on a wait queue elsewhere).
    fn drop_current(&mut self);

    /// Pick the next ready process and make it current.
    fn resume(&mut self) -> Option<Pid>;

    /// Saved trap state of a process. `None` for unknown pids.
    fn context_mut(&mut self, pid: Pid) -> Option<&mut SavedContext>;
}
