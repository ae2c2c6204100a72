//! Nucleon Kernel Core - Pure State Machine of the Nucleus
//!
//! This crate contains the **pure, bus-free** state machine of the Nucleon
//! nucleus: semaphore bookkeeping and syscall dispatch. Everything that
//! touches a device register lives in `nucleon-kernel`.
//!
//! # Design Principles
//!
//! 1. **No bus dependency**: `nucleon-hal` is used for the device
//!    addressing scheme only; no register is ever read or written here
//! 2. **No I/O or side effects**: pure state transformations plus calls
//!    into the scheduler collaborator trait
//! 3. **Deterministic**: same state + syscall always produces the same
//!    outcome
//! 4. **Explicit state**: every table lives in [`NucleusState`], threaded
//!    through the operations - no ambient globals
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  nucleon-kernel-core                    │
//! │                 (Pure State Machine)                    │
//! │                                                         │
//! │   ┌──────────────┐    ┌──────────────┐                  │
//! │   │ NucleusState │    │  dispatch()  │                  │
//! │   │ - semaphores │───▶│  kill / V /  │──▶ Scheduler     │
//! │   │ - device sems│    │  P handlers  │    (collaborator)│
//! │   └──────────────┘    └──────────────┘                  │
//! │                                                         │
//! │   ┌──────────────┐                                      │
//! │   │  Invariants  │                                      │
//! │   │  Assertions  │                                      │
//! │   └──────────────┘                                      │
//! └─────────────────────────────────────────────────────────┘
//!                            │ used by
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                    nucleon-kernel                       │
//! │                  (Runtime Wrapper)                      │
//! │                                                         │
//! │   - device register protocol (terminal, printer)        │
//! │   - interrupt router                                    │
//! │   - process table scheduler                             │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! - `types` - core types (Pid, SemKey, SavedContext, Scheduler trait)
//! - `sem` - semaphore descriptor table with P/V and FIFO wait queues
//! - `state` - NucleusState with the device semaphore bindings
//! - `step` - syscall decode and dispatch
//! - `invariants` - runtime-checkable invariant assertions

#![no_std]
extern crate alloc;

pub mod invariants;
pub mod sem;
pub mod state;
pub mod step;
pub mod types;

// Re-export all public types for convenient access
pub use invariants::{check_all_invariants, InvariantViolation};
pub use sem::{POutcome, SemTable, Semaphore, VOutcome, MAX_SEMAPHORES};
pub use state::{DeviceSemTable, NucleusMetrics, NucleusState};
pub use step::{
    dispatch, dispatch_raw, Syscall, SYS_CPU_TIME, SYS_FORK, SYS_GET_PID, SYS_IO_COMMAND,
    SYS_KILL, SYS_PASSEREN, SYS_SPEC_PASSUP, SYS_VERHOGEN,
};
pub use types::{
    Control, KillReport, Pid, SavedContext, SchedError, Scheduler, SemKey, RET_FAILURE,
    RET_SUCCESS,
};
