//! Register-level device protocol for terminal and printer devices
//!
//! Each operation follows the hardware's command/status handshake: check
//! the precondition status, issue the command, busy-wait until the device
//! leaves BUSY, acknowledge, and judge success by the final status.
//!
//! The polling loops re-read the status register through the bus on every
//! iteration and monopolize the CPU until the device responds. Blocking
//! the caller on the device semaphore and letting the interrupt path
//! deliver the wakeup would fit the rest of the nucleus better; the
//! synchronous behavior is kept as the observable contract, and the wait
//! is confined to this module so the policy can change in one place.

use nucleon_hal::{
    transmit_command, Bus, DeviceId, IoError, CMD_ACK, DTP_COMMAND, DTP_DATA0, DTP_STATUS,
    PRINT_CMD_PRINTCHR, PRINT_STATUS_MASK, PRINT_ST_BUSY, PRINT_ST_READY, TERM_CHAR_SHIFT,
    TERM_CMD_RECEIVE, TERM_RECV_COMMAND, TERM_RECV_STATUS, TERM_STATUS_MASK, TERM_ST_BUSY,
    TERM_ST_READY, TERM_ST_RECEIVED, TERM_ST_TRANSMITTED, TERM_TRANSM_COMMAND, TERM_TRANSM_STATUS,
};

/// Typed view of one terminal device's register block.
pub struct Terminal<'a, B: Bus> {
    bus: &'a B,
    base: u32,
}

impl<'a, B: Bus> Terminal<'a, B> {
    /// View the terminal whose register block belongs to `dev`.
    pub fn new(bus: &'a B, dev: DeviceId) -> Self {
        Self {
            bus,
            base: dev.register_addr(),
        }
    }

    fn transm_status(&self) -> u32 {
        self.bus.read_reg(self.base + TERM_TRANSM_STATUS) & TERM_STATUS_MASK
    }

    fn recv_status_word(&self) -> u32 {
        self.bus.read_reg(self.base + TERM_RECV_STATUS)
    }

    /// Transmit one character.
    ///
    /// Fails without issuing a command unless the transmit half reads
    /// READY or TRANSMITTED. Acknowledges the device whatever the final
    /// status, then reports it.
    pub fn putchar(&self, c: u8) -> Result<(), IoError> {
        let status = self.transm_status();
        if status != TERM_ST_READY && status != TERM_ST_TRANSMITTED {
            return Err(IoError::NotReady);
        }

        self.bus
            .write_reg(self.base + TERM_TRANSM_COMMAND, transmit_command(c));

        let mut status = self.transm_status();
        while status == TERM_ST_BUSY {
            status = self.transm_status();
        }

        self.bus.write_reg(self.base + TERM_TRANSM_COMMAND, CMD_ACK);

        if status == TERM_ST_TRANSMITTED {
            Ok(())
        } else {
            Err(IoError::Failed)
        }
    }

    /// Receive one character.
    ///
    /// Symmetric to [`putchar`]: precondition READY or RECEIVED, receive
    /// command, poll out of BUSY, extract the character from bits 8..16
    /// of the status word, acknowledge.
    ///
    /// [`putchar`]: Terminal::putchar
    pub fn getchar(&self) -> Result<u8, IoError> {
        let status = self.recv_status_word() & TERM_STATUS_MASK;
        if status != TERM_ST_READY && status != TERM_ST_RECEIVED {
            return Err(IoError::NotReady);
        }

        self.bus
            .write_reg(self.base + TERM_RECV_COMMAND, TERM_CMD_RECEIVE);

        let mut word = self.recv_status_word();
        while word & TERM_STATUS_MASK == TERM_ST_BUSY {
            word = self.recv_status_word();
        }

        let c = ((word >> TERM_CHAR_SHIFT) & 0xFF) as u8;
        self.bus.write_reg(self.base + TERM_RECV_COMMAND, CMD_ACK);

        if word & TERM_STATUS_MASK == TERM_ST_RECEIVED {
            Ok(c)
        } else {
            Err(IoError::Failed)
        }
    }

    /// Transmit a string, stopping at the first failure.
    ///
    /// Returns the number of characters successfully written.
    pub fn puts(&self, s: &str) -> usize {
        let mut written = 0;
        for &c in s.as_bytes() {
            if self.putchar(c).is_err() {
                break;
            }
            written += 1;
        }
        written
    }

    /// Receive a line into `dest`.
    ///
    /// Reads until a newline arrives or `dest` is one byte short of
    /// full, then NUL-terminates. The newline itself is stored. Fails
    /// the moment any single read fails.
    ///
    /// Returns the number of characters stored, excluding the
    /// terminator.
    pub fn gets(&self, dest: &mut [u8]) -> Result<usize, IoError> {
        let mut stored = 0;
        while stored + 1 < dest.len() {
            let c = self.getchar()?;
            dest[stored] = c;
            stored += 1;
            if c == b'\n' {
                break;
            }
        }
        if let Some(slot) = dest.get_mut(stored) {
            *slot = 0;
        }
        Ok(stored)
    }
}

/// Typed view of one printer device's register block.
pub struct Printer<'a, B: Bus> {
    bus: &'a B,
    base: u32,
}

impl<'a, B: Bus> Printer<'a, B> {
    /// View the printer whose register block belongs to `dev`.
    pub fn new(bus: &'a B, dev: DeviceId) -> Self {
        Self {
            bus,
            base: dev.register_addr(),
        }
    }

    fn status(&self) -> u32 {
        self.bus.read_reg(self.base + DTP_STATUS) & PRINT_STATUS_MASK
    }

    /// Print one character.
    ///
    /// The printer accepts a command only from READY; the character goes
    /// through the data register before the print command is issued.
    pub fn putchar(&self, c: u8) -> Result<(), IoError> {
        if self.status() != PRINT_ST_READY {
            return Err(IoError::NotReady);
        }

        self.bus.write_reg(self.base + DTP_DATA0, u32::from(c));
        self.bus.write_reg(self.base + DTP_COMMAND, PRINT_CMD_PRINTCHR);

        let mut status = self.status();
        while status == PRINT_ST_BUSY {
            status = self.status();
        }

        self.bus.write_reg(self.base + DTP_COMMAND, CMD_ACK);

        if status == PRINT_ST_READY {
            Ok(())
        } else {
            Err(IoError::Failed)
        }
    }

    /// Print a string, stopping at the first failure.
    ///
    /// Returns the number of characters successfully written.
    pub fn puts(&self, s: &str) -> usize {
        let mut written = 0;
        for &c in s.as_bytes() {
            if self.putchar(c).is_err() {
                break;
            }
            written += 1;
        }
        written
    }
}
