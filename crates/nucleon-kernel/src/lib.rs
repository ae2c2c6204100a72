//! Runtime nucleus for Nucleon
//!
//! This crate wires the pure state machine (`nucleon-kernel-core`) to a
//! [`Bus`]: the register-level device protocol, the interrupt router, the
//! process table collaborator, and the [`Nucleus`] façade that receives
//! raw syscall traps and device interrupts.
//!
//! The flows it implements:
//!
//! - **Syscall**: trap → decode id/args → handler mutates semaphore and
//!   scheduler state → return value lands in the trapped process's saved
//!   context → same process resumes, or the next ready one is picked.
//! - **Interrupt**: scan pending lines → identify the device (and, for a
//!   terminal, the completed half) → V the bound semaphore → wake at most
//!   one waiter → acknowledge the device.

#![no_std]
extern crate alloc;

pub mod device;
pub mod interrupt;
pub mod sched;

use alloc::format;

use nucleon_hal::{Bus, DeviceId};
use nucleon_kernel_core::{dispatch_raw, Control, NucleusState, Pid};
use nucleon_kernel_core::Scheduler;

pub use device::{Printer, Terminal};
pub use sched::{ProcState, ProcessTable};

/// The nucleus: bus, state machine and process table, constructed once
/// at boot.
pub struct Nucleus<B: Bus> {
    bus: B,
    state: NucleusState,
    procs: ProcessTable,
}

impl<B: Bus> Nucleus<B> {
    /// Boot a nucleus over `bus` with empty tables.
    pub fn new(bus: B) -> Self {
        Self {
            bus,
            state: NucleusState::new(),
            procs: ProcessTable::new(),
        }
    }

    /// The underlying bus.
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// The nucleus state machine.
    pub fn state(&self) -> &NucleusState {
        &self.state
    }

    /// Mutable access to the nucleus state machine.
    pub fn state_mut(&mut self) -> &mut NucleusState {
        &mut self.state
    }

    /// The process table collaborator.
    pub fn processes(&self) -> &ProcessTable {
        &self.procs
    }

    /// Mutable access to the process table collaborator.
    pub fn processes_mut(&mut self) -> &mut ProcessTable {
        &mut self.procs
    }

    /// Service a raw syscall trap.
    ///
    /// Decodes and dispatches, then acts on the control decision: on a
    /// switch, the next ready process is picked immediately, because the
    /// previous one blocked or died with its own syscall.
    pub fn syscall(&mut self, id: u32, arg1: u32, arg2: u32, arg3: u32) -> Control {
        let control = dispatch_raw(&mut self.state, &mut self.procs, id, arg1, arg2, arg3);
        if control == Control::Switch {
            let next = self.procs.resume();
            self.bus.debug_write(&format!(
                "[nucleus] syscall {}: context switch, next pid {:?}",
                id,
                next.map(|p| p.0)
            ));
        }
        control
    }

    /// Service the highest-priority pending device interrupt.
    ///
    /// Resolves the device's bound semaphore, performs V on it (waking
    /// the earliest waiter, if any), and acknowledges the device. Returns
    /// the woken process. `None` means no interrupt was pending.
    pub fn handle_interrupt(&mut self) -> Option<Pid> {
        let addr = interrupt::next_pending(&self.bus)?;

        // The address came out of the bitmap scan; failing to map it back
        // to a device means the topology constants are inconsistent.
        let Some(dev) = DeviceId::from_register_addr(addr) else {
            panic!("pending interrupt at unmapped address {addr:#010x}");
        };
        let sub = interrupt::completed_sub_device(&self.bus, dev);

        let Some(key) = self.state.device_semaphore(addr, sub) else {
            panic!("no semaphore binding for device at {addr:#010x}");
        };
        let Some(out) = self.state.semaphores.v(key) else {
            panic!("device semaphore {:#010x} lost its descriptor", key.0);
        };

        if let Some(pid) = out.released {
            self.procs.enqueue_ready(pid);
            self.state.metrics.device_wakeups += 1;
        }

        interrupt::ack(&self.bus, dev, sub);
        self.state.metrics.interrupts_serviced += 1;
        self.bus.debug_write(&format!(
            "[nucleus] serviced interrupt: line {} device {} {:?}, woke {:?}",
            dev.line,
            dev.instance,
            sub,
            out.released.map(|p| p.0)
        ));

        out.released
    }
}
