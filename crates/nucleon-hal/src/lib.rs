//! Hardware abstraction boundary for the Nucleon nucleus
//!
//! This crate defines the `Bus` trait through which the nucleus reads and
//! writes memory-mapped device registers, together with everything the
//! hardware itself pins down: the device register memory layout, the
//! status/command encodings for terminal and printer devices, and the
//! addressing scheme that maps an interrupt line and device instance to a
//! register block and back.
//!
//! # Platform Implementations
//!
//! - **MockBus** (`nucleon-hal-mock`): simulated devices for host testing
//! - **Bare metal**: volatile reads/writes against the physical register area

#![no_std]

/// Memory-mapped register access.
///
/// Implementations provide word-sized access to the device register area
/// and a debug output channel for nucleus diagnostics.
///
/// Every read goes to the device: callers must not cache a status word
/// across a busy-wait, and implementations must not serve reads from a
/// stale copy.
pub trait Bus: Send + Sync {
    /// Read a device register word.
    fn read_reg(&self, addr: u32) -> u32;

    /// Write a device register word.
    fn write_reg(&self, addr: u32, value: u32);

    /// Write a diagnostic message to the platform's debug channel.
    fn debug_write(&self, msg: &str);
}

// ============================================================================
// Interrupt line topology
// ============================================================================

/// First interrupt line owned by peripheral devices.
///
/// Lines below this are processor-internal (inter-processor, local timer,
/// interval timer) and carry no device registers.
pub const DEV_LINE_START: u32 = 3;

/// Total number of interrupt lines understood by the router.
pub const N_INTERRUPT_LINES: u32 = 8;

/// Device instances per interrupt line.
pub const N_DEV_PER_LINE: u32 = 8;

/// Disk device line.
pub const LINE_DISK: u32 = 3;
/// Tape device line.
pub const LINE_TAPE: u32 = 4;
/// Network device line.
pub const LINE_NETWORK: u32 = 5;
/// Printer device line.
pub const LINE_PRINTER: u32 = 6;
/// Terminal device line. Each terminal carries two sub-devices.
pub const LINE_TERMINAL: u32 = 7;

/// Number of external (non-terminal) device lines: disk through printer.
pub const N_EXT_LINES: u32 = LINE_TERMINAL - DEV_LINE_START;

// ============================================================================
// Register memory layout
// ============================================================================

/// Base address of the per-line interrupting-devices bitmaps.
///
/// One word per device line; the low 8 bits flag a pending interrupt for
/// the matching device instance.
pub const PENDING_BITMAP_BASE: u32 = 0x1000_003C;

/// Base address of the device register area.
pub const DEV_REG_BASE: u32 = 0x1000_0054;

/// Bytes occupied by one device register block (four words).
pub const DEV_REG_SIZE: u32 = 16;

/// Address of the pending-interrupt bitmap for `line`.
///
/// `line` must be a device-capable line; lines below [`DEV_LINE_START`]
/// have no bitmap register.
pub fn pending_bitmap_addr(line: u32) -> u32 {
    PENDING_BITMAP_BASE + 4 * (line - DEV_LINE_START)
}

/// Word offsets within a terminal device register block.
///
/// A terminal splits its block into an independent receive register pair
/// followed by a transmit register pair.
pub const TERM_RECV_STATUS: u32 = 0x0;
pub const TERM_RECV_COMMAND: u32 = 0x4;
pub const TERM_TRANSM_STATUS: u32 = 0x8;
pub const TERM_TRANSM_COMMAND: u32 = 0xC;

/// Word offsets within a disk/tape/network/printer register block.
pub const DTP_STATUS: u32 = 0x0;
pub const DTP_COMMAND: u32 = 0x4;
pub const DTP_DATA0: u32 = 0x8;
pub const DTP_DATA1: u32 = 0xC;

// ============================================================================
// Status and command encodings
// ============================================================================

/// Terminal sub-device status codes (low byte of the status word).
pub const TERM_ST_NOT_INSTALLED: u32 = 0;
pub const TERM_ST_READY: u32 = 1;
pub const TERM_ST_ILLEGAL_OP: u32 = 2;
pub const TERM_ST_BUSY: u32 = 3;
pub const TERM_ST_ERROR: u32 = 4;
/// Transmit half: character transmitted. Receive half: character received.
pub const TERM_ST_TRANSMITTED: u32 = 5;
pub const TERM_ST_RECEIVED: u32 = 5;

/// Printer status codes (status word masked with [`PRINT_STATUS_MASK`]).
pub const PRINT_ST_NOT_INSTALLED: u32 = 0;
pub const PRINT_ST_READY: u32 = 1;
pub const PRINT_ST_ILLEGAL_OP: u32 = 2;
pub const PRINT_ST_BUSY: u32 = 3;
pub const PRINT_ST_ERROR: u32 = 4;

/// The status byte occupies the low 8 bits of the status word.
pub const TERM_STATUS_MASK: u32 = 0xFF;
pub const PRINT_STATUS_MASK: u32 = 0xFF;

/// A received character sits in bits 8..16 of the receive status word.
pub const TERM_CHAR_SHIFT: u32 = 8;

/// Command opcodes (low byte of the command word).
pub const CMD_RESET: u32 = 0;
pub const CMD_ACK: u32 = 1;
pub const TERM_CMD_TRANSMIT: u32 = 2;
pub const TERM_CMD_RECEIVE: u32 = 2;
pub const PRINT_CMD_PRINTCHR: u32 = 2;

/// Build a terminal transmit command carrying character `c`.
///
/// The character rides in bits 8..16, the transmit opcode in the low byte.
pub fn transmit_command(c: u8) -> u32 {
    ((c as u32) << TERM_CHAR_SHIFT) | TERM_CMD_TRANSMIT
}

// ============================================================================
// Device addressing
// ============================================================================

/// One of the two independent halves of a terminal device.
///
/// Non-terminal devices have a single register set; operations on them
/// ignore the sub-device selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SubDevice {
    Transmit,
    Receive,
}

impl SubDevice {
    /// Table index for this sub-device (transmit first).
    pub fn index(self) -> usize {
        match self {
            SubDevice::Transmit => 0,
            SubDevice::Receive => 1,
        }
    }
}

/// Identity of one device: its interrupt line and instance on that line.
///
/// This struct, together with [`DeviceId::register_addr`] and
/// [`DeviceId::from_register_addr`], is the single source of truth for the
/// device address arithmetic. The two functions are exact inverses over
/// every valid (line, instance) pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId {
    /// Interrupt line, in `DEV_LINE_START..N_INTERRUPT_LINES`.
    pub line: u32,
    /// Device instance on the line, in `0..N_DEV_PER_LINE`.
    pub instance: u32,
}

impl DeviceId {
    /// Build a device identity, rejecting out-of-range coordinates.
    pub fn new(line: u32, instance: u32) -> Option<DeviceId> {
        if (DEV_LINE_START..N_INTERRUPT_LINES).contains(&line) && instance < N_DEV_PER_LINE {
            Some(DeviceId { line, instance })
        } else {
            None
        }
    }

    /// Base address of this device's register block.
    pub fn register_addr(self) -> u32 {
        let index = (self.line - DEV_LINE_START) * N_DEV_PER_LINE + self.instance;
        DEV_REG_BASE + index * DEV_REG_SIZE
    }

    /// Recover the device identity that owns register block `addr`.
    ///
    /// Returns `None` for addresses outside the device register area or
    /// not aligned to a block boundary. Inverse of [`register_addr`].
    ///
    /// [`register_addr`]: DeviceId::register_addr
    pub fn from_register_addr(addr: u32) -> Option<DeviceId> {
        if addr < DEV_REG_BASE {
            return None;
        }
        let offset = addr - DEV_REG_BASE;
        if offset % DEV_REG_SIZE != 0 {
            return None;
        }
        let index = offset / DEV_REG_SIZE;
        let line = DEV_LINE_START + index / N_DEV_PER_LINE;
        let instance = index % N_DEV_PER_LINE;
        if line >= N_INTERRUPT_LINES {
            return None;
        }
        Some(DeviceId { line, instance })
    }

    /// Address of the status register serving `sub` on this device.
    ///
    /// Terminals resolve to the transmit or receive status word; every
    /// other device class has a single status word and ignores `sub`.
    pub fn status_addr(self, sub: SubDevice) -> u32 {
        let base = self.register_addr();
        if self.line == LINE_TERMINAL {
            match sub {
                SubDevice::Transmit => base + TERM_TRANSM_STATUS,
                SubDevice::Receive => base + TERM_RECV_STATUS,
            }
        } else {
            base + DTP_STATUS
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Device I/O failure, recoverable by the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoError {
    /// The device was not in a state that accepts the command.
    NotReady,
    /// The device completed the command with an error status.
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_addr_round_trip_all_devices() {
        // line_of/instance_of must invert the address construction for
        // every valid (line, instance) pair.
        for line in DEV_LINE_START..N_INTERRUPT_LINES {
            for instance in 0..N_DEV_PER_LINE {
                let id = DeviceId::new(line, instance).unwrap();
                let addr = id.register_addr();
                let back = DeviceId::from_register_addr(addr).unwrap();
                assert_eq!(back, id, "round trip failed for line {line} instance {instance}");
            }
        }
    }

    #[test]
    fn test_from_register_addr_rejects_misaligned() {
        let valid = DeviceId::new(LINE_DISK, 0).unwrap().register_addr();
        assert!(DeviceId::from_register_addr(valid + 4).is_none());
        assert!(DeviceId::from_register_addr(valid + 1).is_none());
    }

    #[test]
    fn test_from_register_addr_rejects_out_of_range() {
        assert!(DeviceId::from_register_addr(0).is_none());
        assert!(DeviceId::from_register_addr(DEV_REG_BASE - DEV_REG_SIZE).is_none());

        // One block past the last terminal instance.
        let past_end = DEV_REG_BASE + (N_EXT_LINES + 1) * N_DEV_PER_LINE * DEV_REG_SIZE;
        assert!(DeviceId::from_register_addr(past_end).is_none());
    }

    #[test]
    fn test_device_id_new_validates() {
        assert!(DeviceId::new(LINE_DISK, 0).is_some());
        assert!(DeviceId::new(LINE_TERMINAL, N_DEV_PER_LINE - 1).is_some());
        assert!(DeviceId::new(DEV_LINE_START - 1, 0).is_none());
        assert!(DeviceId::new(N_INTERRUPT_LINES, 0).is_none());
        assert!(DeviceId::new(LINE_DISK, N_DEV_PER_LINE).is_none());
    }

    #[test]
    fn test_adjacent_devices_are_one_block_apart() {
        let d0 = DeviceId::new(LINE_DISK, 0).unwrap().register_addr();
        let d1 = DeviceId::new(LINE_DISK, 1).unwrap().register_addr();
        assert_eq!(d1 - d0, DEV_REG_SIZE);

        // First device of the next line follows the last of the previous.
        let last_disk = DeviceId::new(LINE_DISK, N_DEV_PER_LINE - 1)
            .unwrap()
            .register_addr();
        let first_tape = DeviceId::new(LINE_TAPE, 0).unwrap().register_addr();
        assert_eq!(first_tape - last_disk, DEV_REG_SIZE);
    }

    #[test]
    fn test_pending_bitmap_addr_per_line() {
        assert_eq!(pending_bitmap_addr(DEV_LINE_START), PENDING_BITMAP_BASE);
        assert_eq!(pending_bitmap_addr(LINE_TERMINAL), PENDING_BITMAP_BASE + 16);
    }

    #[test]
    fn test_transmit_command_encoding() {
        let cmd = transmit_command(b'k');
        assert_eq!(cmd & 0xFF, TERM_CMD_TRANSMIT);
        assert_eq!((cmd >> TERM_CHAR_SHIFT) & 0xFF, b'k' as u32);
    }

    #[test]
    fn test_terminal_status_addr_selects_sub_device() {
        let id = DeviceId::new(LINE_TERMINAL, 2).unwrap();
        let base = id.register_addr();
        assert_eq!(id.status_addr(SubDevice::Transmit), base + TERM_TRANSM_STATUS);
        assert_eq!(id.status_addr(SubDevice::Receive), base + TERM_RECV_STATUS);

        // Non-terminal devices have a single status word.
        let disk = DeviceId::new(LINE_DISK, 2).unwrap();
        assert_eq!(
            disk.status_addr(SubDevice::Transmit),
            disk.status_addr(SubDevice::Receive)
        );
    }
}
