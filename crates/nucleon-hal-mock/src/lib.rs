//! Mock bus implementation for testing the Nucleon nucleus
//!
//! This provides a mock implementation of the `Bus` trait with behavioral
//! terminal and printer models, so the nucleus can be unit tested on a host
//! without real hardware.
//!
//! A command write starts a busy window on the matching status register:
//! the status reads BUSY for a configurable number of polls, then settles
//! at the operation's final status and raises the device's bit in its
//! line's pending-interrupt bitmap. Acknowledgement (through either the
//! command or the status register) returns the status to READY and clears
//! the pending bit.

#![no_std]
extern crate alloc;

use alloc::collections::{BTreeMap, BTreeSet, VecDeque};
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};

use nucleon_hal::{
    pending_bitmap_addr, Bus, DeviceId, SubDevice, CMD_ACK, CMD_RESET, DEV_LINE_START,
    DEV_REG_BASE, DEV_REG_SIZE, DTP_COMMAND, DTP_DATA0, DTP_STATUS, LINE_TERMINAL,
    N_INTERRUPT_LINES, PENDING_BITMAP_BASE, PRINT_CMD_PRINTCHR, PRINT_ST_ERROR, PRINT_ST_READY,
    TERM_CHAR_SHIFT, TERM_CMD_RECEIVE, TERM_CMD_TRANSMIT, TERM_RECV_COMMAND, TERM_RECV_STATUS,
    TERM_ST_BUSY, TERM_ST_ERROR, TERM_ST_READY, TERM_ST_RECEIVED, TERM_ST_TRANSMITTED,
    TERM_TRANSM_COMMAND, TERM_TRANSM_STATUS,
};

// Terminal and printer devices share the BUSY encoding.
const ST_BUSY: u32 = TERM_ST_BUSY;

/// An in-flight device operation: the status register it parks on, how
/// many polls remain before it completes, and the status it settles at.
struct BusyWindow {
    polls_left: u32,
    final_status: u32,
}

/// Mock bus for unit testing
///
/// Simulates the device register area: terminals (transmit + receive
/// halves), printers, per-line pending-interrupt bitmaps, and a captured
/// debug log.
pub struct MockBus {
    /// Raw register words.
    regs: RefCell<BTreeMap<u32, u32>>,
    /// Active busy windows, keyed by status register address.
    busy: RefCell<BTreeMap<u32, BusyWindow>>,
    /// Raised, unacknowledged interrupts as (line, instance, sub index).
    pending: RefCell<BTreeSet<(u32, u32, usize)>>,
    /// Scripted receive input per terminal instance.
    input: RefCell<BTreeMap<u32, VecDeque<u8>>>,
    /// Characters successfully transmitted per terminal instance.
    transmitted: RefCell<BTreeMap<u32, Vec<u8>>>,
    /// Characters successfully printed per printer instance.
    printed: RefCell<BTreeMap<u32, Vec<u8>>>,
    /// Status addresses whose next operation fails with an error status.
    fail_next: RefCell<BTreeSet<u32>>,
    /// How many status polls a busy window lasts.
    busy_polls: Cell<u32>,
    /// Captured debug messages.
    debug_log: RefCell<Vec<String>>,
}

impl MockBus {
    /// Create a new mock bus with no installed devices.
    pub fn new() -> Self {
        Self {
            regs: RefCell::new(BTreeMap::new()),
            busy: RefCell::new(BTreeMap::new()),
            pending: RefCell::new(BTreeSet::new()),
            input: RefCell::new(BTreeMap::new()),
            transmitted: RefCell::new(BTreeMap::new()),
            printed: RefCell::new(BTreeMap::new()),
            fail_next: RefCell::new(BTreeSet::new()),
            busy_polls: Cell::new(2),
            debug_log: RefCell::new(Vec::new()),
        }
    }

    /// Set how many status polls an operation stays BUSY for.
    ///
    /// Zero makes operations complete at command time.
    pub fn set_busy_polls(&self, polls: u32) {
        self.busy_polls.set(polls);
    }

    // ========================================================================
    // Device installation and scripting
    // ========================================================================

    /// Install a terminal at `instance` with both halves READY.
    pub fn add_terminal(&self, instance: u32) -> DeviceId {
        let id = DeviceId::new(LINE_TERMINAL, instance).unwrap();
        let base = id.register_addr();
        let mut regs = self.regs.borrow_mut();
        regs.insert(base + TERM_RECV_STATUS, TERM_ST_READY);
        regs.insert(base + TERM_TRANSM_STATUS, TERM_ST_READY);
        id
    }

    /// Install a printer at `instance` with status READY.
    pub fn add_printer(&self, instance: u32) -> DeviceId {
        let id = DeviceId::new(nucleon_hal::LINE_PRINTER, instance).unwrap();
        self.regs
            .borrow_mut()
            .insert(id.register_addr() + DTP_STATUS, PRINT_ST_READY);
        id
    }

    /// Queue input bytes for a terminal's receive half.
    pub fn queue_input(&self, instance: u32, bytes: &[u8]) {
        self.input
            .borrow_mut()
            .entry(instance)
            .or_default()
            .extend(bytes.iter().copied());
    }

    /// Characters the terminal at `instance` has transmitted so far.
    pub fn transmitted(&self, instance: u32) -> Vec<u8> {
        self.transmitted
            .borrow()
            .get(&instance)
            .cloned()
            .unwrap_or_default()
    }

    /// Characters the printer at `instance` has printed so far.
    pub fn printed(&self, instance: u32) -> Vec<u8> {
        self.printed
            .borrow()
            .get(&instance)
            .cloned()
            .unwrap_or_default()
    }

    /// Make the next transmit on the terminal at `instance` fail.
    pub fn fail_next_transmit(&self, instance: u32) {
        let id = DeviceId::new(LINE_TERMINAL, instance).unwrap();
        self.fail_next
            .borrow_mut()
            .insert(id.status_addr(SubDevice::Transmit));
    }

    /// Make the next receive on the terminal at `instance` fail.
    pub fn fail_next_receive(&self, instance: u32) {
        let id = DeviceId::new(LINE_TERMINAL, instance).unwrap();
        self.fail_next
            .borrow_mut()
            .insert(id.status_addr(SubDevice::Receive));
    }

    /// Make the next print on the printer at `instance` fail.
    pub fn fail_next_print(&self, instance: u32) {
        let id = DeviceId::new(nucleon_hal::LINE_PRINTER, instance).unwrap();
        self.fail_next
            .borrow_mut()
            .insert(id.status_addr(SubDevice::Transmit));
    }

    /// Force a status word, bypassing the device model.
    pub fn set_status(&self, id: DeviceId, sub: SubDevice, status: u32) {
        self.regs.borrow_mut().insert(id.status_addr(sub), status);
    }

    /// Raise a pending interrupt for a device, setting its status word.
    ///
    /// Models a device completing an operation behind the nucleus's back,
    /// as interrupt-driven completion does.
    pub fn raise_interrupt(&self, id: DeviceId, sub: SubDevice, status: u32) {
        self.set_status(id, sub, status);
        self.pending.borrow_mut().insert(pending_key(id, sub));
    }

    /// Whether a device's sub-device has a raised, unacknowledged interrupt.
    pub fn is_pending(&self, id: DeviceId, sub: SubDevice) -> bool {
        self.pending.borrow().contains(&pending_key(id, sub))
    }

    /// Total raised, unacknowledged interrupts.
    pub fn pending_count(&self) -> usize {
        self.pending.borrow().len()
    }

    // ========================================================================
    // Debug log capture
    // ========================================================================

    /// Get all captured debug messages
    pub fn get_debug_log(&self) -> Vec<String> {
        self.debug_log.borrow().clone()
    }

    /// Clear the debug log
    pub fn clear_debug_log(&self) {
        self.debug_log.borrow_mut().clear();
    }

    /// Check if a specific message was logged
    pub fn has_log_containing(&self, substr: &str) -> bool {
        self.debug_log
            .borrow()
            .iter()
            .any(|msg| msg.contains(substr))
    }

    /// Get the number of debug messages
    pub fn debug_log_count(&self) -> usize {
        self.debug_log.borrow().len()
    }

    // ========================================================================
    // Device model internals
    // ========================================================================

    /// Start an operation on `status_addr`: BUSY for the configured number
    /// of polls, then `final_status` plus a pending interrupt.
    fn start_op(&self, status_addr: u32, final_status: u32) {
        let polls = self.busy_polls.get();
        if polls == 0 {
            self.complete_op(status_addr, final_status);
        } else {
            self.regs.borrow_mut().insert(status_addr, ST_BUSY);
            self.busy.borrow_mut().insert(
                status_addr,
                BusyWindow {
                    polls_left: polls,
                    final_status,
                },
            );
        }
    }

    fn complete_op(&self, status_addr: u32, final_status: u32) {
        self.regs.borrow_mut().insert(status_addr, final_status);
        if let Some((line, instance, sub)) = owner_of_status(status_addr) {
            self.pending.borrow_mut().insert((line, instance, sub));
        }
    }

    /// Consume a scheduled failure for `status_addr`, if one was injected.
    fn take_failure(&self, status_addr: u32) -> bool {
        self.fail_next.borrow_mut().remove(&status_addr)
    }

    fn acknowledge(&self, status_addr: u32, ready_status: u32) {
        self.regs.borrow_mut().insert(status_addr, ready_status);
        self.busy.borrow_mut().remove(&status_addr);
        if let Some(key) = owner_of_status(status_addr) {
            self.pending.borrow_mut().remove(&key);
        }
    }

    fn terminal_command(&self, id: DeviceId, sub: SubDevice, value: u32) {
        let status_addr = id.status_addr(sub);
        match value & 0xFF {
            CMD_ACK | CMD_RESET => self.acknowledge(status_addr, TERM_ST_READY),
            TERM_CMD_TRANSMIT if sub == SubDevice::Transmit => {
                if self.take_failure(status_addr) {
                    self.start_op(status_addr, TERM_ST_ERROR);
                } else {
                    let c = ((value >> TERM_CHAR_SHIFT) & 0xFF) as u8;
                    self.transmitted
                        .borrow_mut()
                        .entry(id.instance)
                        .or_default()
                        .push(c);
                    self.start_op(status_addr, TERM_ST_TRANSMITTED);
                }
            }
            TERM_CMD_RECEIVE if sub == SubDevice::Receive => {
                let failed = self.take_failure(status_addr);
                let next = self
                    .input
                    .borrow_mut()
                    .get_mut(&id.instance)
                    .and_then(VecDeque::pop_front);
                match (failed, next) {
                    (false, Some(c)) => self.start_op(
                        status_addr,
                        ((c as u32) << TERM_CHAR_SHIFT) | TERM_ST_RECEIVED,
                    ),
                    // No scripted input or injected failure: receive error.
                    _ => self.start_op(status_addr, TERM_ST_ERROR),
                }
            }
            _ => {}
        }
    }

    fn dtp_command(&self, id: DeviceId, value: u32) {
        let status_addr = id.register_addr() + DTP_STATUS;
        match value & 0xFF {
            CMD_ACK | CMD_RESET => self.acknowledge(status_addr, PRINT_ST_READY),
            PRINT_CMD_PRINTCHR => {
                if self.take_failure(status_addr) {
                    self.start_op(status_addr, PRINT_ST_ERROR);
                } else {
                    let data = self
                        .regs
                        .borrow()
                        .get(&(id.register_addr() + DTP_DATA0))
                        .copied()
                        .unwrap_or(0);
                    self.printed
                        .borrow_mut()
                        .entry(id.instance)
                        .or_default()
                        .push((data & 0xFF) as u8);
                    self.start_op(status_addr, PRINT_ST_READY);
                }
            }
            _ => {}
        }
    }
}

impl Default for MockBus {
    fn default() -> Self {
        Self::new()
    }
}

// MockBus is Send + Sync because its RefCell state is only accessed in
// single-threaded test contexts
unsafe impl Send for MockBus {}
unsafe impl Sync for MockBus {}

impl Bus for MockBus {
    fn read_reg(&self, addr: u32) -> u32 {
        // Pending-interrupt bitmaps are computed from the raised set.
        if let Some(line) = bitmap_line(addr) {
            let mut bitmap = 0u32;
            for &(l, instance, _) in self.pending.borrow().iter() {
                if l == line {
                    bitmap |= 1 << instance;
                }
            }
            return bitmap;
        }

        // A status register under a busy window counts down one poll per
        // read and settles at its final status on the last one.
        let expired = {
            let mut busy = self.busy.borrow_mut();
            match busy.get_mut(&addr) {
                Some(window) => {
                    window.polls_left -= 1;
                    if window.polls_left == 0 {
                        let final_status = window.final_status;
                        busy.remove(&addr);
                        Some(final_status)
                    } else {
                        return ST_BUSY;
                    }
                }
                None => None,
            }
        };
        if let Some(final_status) = expired {
            self.complete_op(addr, final_status);
        }

        self.regs.borrow().get(&addr).copied().unwrap_or(0)
    }

    fn write_reg(&self, addr: u32, value: u32) {
        if let Some((id, offset)) = device_register(addr) {
            if id.line == LINE_TERMINAL {
                match offset {
                    TERM_RECV_COMMAND => return self.terminal_command(id, SubDevice::Receive, value),
                    TERM_TRANSM_COMMAND => {
                        return self.terminal_command(id, SubDevice::Transmit, value)
                    }
                    // Acknowledgement through the status register itself.
                    TERM_RECV_STATUS | TERM_TRANSM_STATUS if value == CMD_ACK => {
                        return self.acknowledge(addr, TERM_ST_READY);
                    }
                    _ => {}
                }
            } else {
                match offset {
                    DTP_COMMAND => return self.dtp_command(id, value),
                    DTP_STATUS if value == CMD_ACK => {
                        return self.acknowledge(addr, PRINT_ST_READY);
                    }
                    _ => {}
                }
            }
        }
        self.regs.borrow_mut().insert(addr, value);
    }

    fn debug_write(&self, msg: &str) {
        self.debug_log.borrow_mut().push(String::from(msg));
    }
}

/// Pending-set key for a device interrupt. Non-terminal devices have a
/// single register set and fold onto sub index 0.
fn pending_key(id: DeviceId, sub: SubDevice) -> (u32, u32, usize) {
    let index = if id.line == LINE_TERMINAL { sub.index() } else { 0 };
    (id.line, id.instance, index)
}

/// Resolve a raw address to its owning device and in-block offset.
///
/// The register area is not aligned to the block size, so the block base
/// is recovered by offset arithmetic from the area base.
fn device_register(addr: u32) -> Option<(DeviceId, u32)> {
    if addr < DEV_REG_BASE {
        return None;
    }
    let offset = (addr - DEV_REG_BASE) % DEV_REG_SIZE;
    let id = DeviceId::from_register_addr(addr - offset)?;
    Some((id, offset))
}

/// Recover (line, instance, sub index) for a status register address.
fn owner_of_status(status_addr: u32) -> Option<(u32, u32, usize)> {
    let (id, offset) = device_register(status_addr)?;
    let sub = if id.line == LINE_TERMINAL && offset == TERM_TRANSM_STATUS {
        SubDevice::Transmit
    } else {
        SubDevice::Receive
    };
    // Non-terminal devices fold onto sub index 0.
    let index = if id.line == LINE_TERMINAL { sub.index() } else { 0 };
    Some((id.line, id.instance, index))
}

/// The device line whose pending bitmap lives at `addr`, if any.
fn bitmap_line(addr: u32) -> Option<u32> {
    if addr < PENDING_BITMAP_BASE || (addr - PENDING_BITMAP_BASE) % 4 != 0 {
        return None;
    }
    let line = DEV_LINE_START + (addr - PENDING_BITMAP_BASE) / 4;
    if line < N_INTERRUPT_LINES {
        Some(line)
    } else {
        None
    }
}
