//! Interrupt router
//!
//! Finds the single device to service among the pending interrupt lines
//! and acknowledges devices once serviced. Selection order is part of the
//! contract: lines are scanned ascending (lower line number wins), and
//! within a line the least significant set bitmap bit (lowest instance)
//! wins, so simultaneous interrupts are serviced in a reproducible order.

use nucleon_hal::{
    pending_bitmap_addr, Bus, DeviceId, SubDevice, CMD_ACK, DEV_LINE_START, LINE_DISK,
    LINE_PRINTER, LINE_TERMINAL, N_INTERRUPT_LINES, TERM_STATUS_MASK, TERM_ST_TRANSMITTED,
};

/// Scan the interrupt lines for the highest-priority pending device.
///
/// Returns the base address of that device's register block, or `None`
/// when no line has a pending bit set.
pub fn next_pending<B: Bus>(bus: &B) -> Option<u32> {
    for line in DEV_LINE_START..N_INTERRUPT_LINES {
        let bitmap = bus.read_reg(pending_bitmap_addr(line)) & 0xFF;
        if bitmap == 0 {
            continue;
        }
        let instance = bitmap.trailing_zeros();
        // Construction cannot fail: the line range and bitmap width are
        // both bounded by the topology constants.
        let dev = DeviceId::new(line, instance)?;
        return Some(dev.register_addr());
    }
    None
}

/// Acknowledge a serviced device.
///
/// Terminals take the acknowledgement on the status register of the
/// sub-device that completed; the disk-through-printer range has a single
/// status register and ignores `sub`. Any other line means the router was
/// invoked with state inconsistent with the hardware topology - there is
/// nothing to recover.
pub fn ack<B: Bus>(bus: &B, dev: DeviceId, sub: SubDevice) {
    if dev.line == LINE_TERMINAL {
        bus.write_reg(dev.status_addr(sub), CMD_ACK);
    } else if (LINE_DISK..=LINE_PRINTER).contains(&dev.line) {
        bus.write_reg(dev.status_addr(SubDevice::Transmit), CMD_ACK);
    } else {
        panic!("interrupt ack on line {} outside the device range", dev.line);
    }
}

/// Decide which half of a terminal raised the interrupt.
///
/// The per-line bitmap does not distinguish sub-devices; the completed
/// half is identified from the registers, transmit first, so simultaneous
/// completion of both halves is serviced deterministically.
pub fn completed_sub_device<B: Bus>(bus: &B, dev: DeviceId) -> SubDevice {
    if dev.line != LINE_TERMINAL {
        return SubDevice::Transmit;
    }
    let transm = bus.read_reg(dev.status_addr(SubDevice::Transmit)) & TERM_STATUS_MASK;
    if transm == TERM_ST_TRANSMITTED {
        SubDevice::Transmit
    } else {
        SubDevice::Receive
    }
}
