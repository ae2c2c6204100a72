//! Nucleus state - pure data structure holding all nucleus state
//!
//! This module contains the NucleusState struct which owns every mutable
//! table of the nucleus. It is constructed once at boot and threaded
//! explicitly through the dispatcher and the interrupt path - there are
//! no ambient globals.

use nucleon_hal::{DeviceId, SubDevice, DEV_LINE_START, LINE_TERMINAL, N_DEV_PER_LINE, N_EXT_LINES};

use crate::sem::SemTable;
use crate::types::SemKey;

const N_DEV: usize = N_DEV_PER_LINE as usize;
const N_EXT: usize = N_EXT_LINES as usize;

/// The per-device semaphore bindings.
///
/// A fixed-size mapping from (line, instance, sub-device) to the key of
/// the semaphore that serializes I/O on that device. Two sub-tables: one
/// for the external lines (disk through printer, indexed by offset from
/// the first device line), one for terminals, which carry a transmit and
/// a receive sub-device per instance. Populated lazily; entries are
/// process-wide and never freed.
pub struct DeviceSemTable {
    external: [[Option<SemKey>; N_DEV]; N_EXT],
    terminal: [[Option<SemKey>; N_DEV]; 2],
}

impl DeviceSemTable {
    fn new() -> Self {
        Self {
            external: [[None; N_DEV]; N_EXT],
            terminal: [[None; N_DEV]; 2],
        }
    }

    fn slot_mut(&mut self, dev: DeviceId, sub: SubDevice) -> &mut Option<SemKey> {
        let instance = dev.instance as usize;
        if dev.line == LINE_TERMINAL {
            &mut self.terminal[sub.index()][instance]
        } else {
            &mut self.external[(dev.line - DEV_LINE_START) as usize][instance]
        }
    }

    /// The bound key for a device, if one was allocated.
    pub fn get(&self, dev: DeviceId, sub: SubDevice) -> Option<SemKey> {
        let instance = dev.instance as usize;
        if dev.line == LINE_TERMINAL {
            self.terminal[sub.index()][instance]
        } else {
            self.external[(dev.line - DEV_LINE_START) as usize][instance]
        }
    }

    /// Every bound (device, sub-device, key) triple.
    pub fn bindings(&self) -> impl Iterator<Item = SemKey> + '_ {
        let ext = self.external.iter().flatten();
        let term = self.terminal.iter().flatten();
        ext.chain(term).filter_map(|slot| *slot)
    }
}

/// Counters the nucleus keeps about itself.
#[derive(Clone, Copy, Debug, Default)]
pub struct NucleusMetrics {
    /// Syscalls dispatched since boot.
    pub syscall_count: u64,
    /// Processes blocked by passeren since boot.
    pub blocked_count: u64,
    /// Device interrupts serviced since boot.
    pub interrupts_serviced: u64,
    /// Processes woken by a device interrupt since boot.
    pub device_wakeups: u64,
}

/// The pure nucleus state - no bus, no I/O, no side effects.
///
/// Owns the semaphore descriptor table and the device semaphore
/// bindings. Constructed once at boot, torn down never.
pub struct NucleusState {
    /// Semaphore descriptor table.
    pub semaphores: SemTable,
    /// Per-device semaphore bindings.
    pub device_sems: DeviceSemTable,
    /// Self-observation counters.
    pub metrics: NucleusMetrics,
}

impl NucleusState {
    /// Create a new empty nucleus state.
    pub fn new() -> Self {
        Self {
            semaphores: SemTable::new(),
            device_sems: DeviceSemTable::new(),
            metrics: NucleusMetrics::default(),
        }
    }

    /// Resolve the semaphore bound to the device whose register block
    /// starts at `addr`, allocating it on first reference.
    ///
    /// The key is the address of the sub-device's status register, so
    /// distinct devices (and distinct halves of one terminal) always bind
    /// distinct keys. The descriptor starts at 1 - one I/O slot available
    /// - and is pinned for the life of the system. Repeat calls are O(1)
    /// table lookups.
    ///
    /// Returns `None` when `addr` does not name a device register block.
    pub fn device_semaphore(&mut self, addr: u32, sub: SubDevice) -> Option<SemKey> {
        let dev = DeviceId::from_register_addr(addr)?;
        let slot = self.device_sems.slot_mut(dev, sub);
        if let Some(key) = *slot {
            return Some(key);
        }
        let key = SemKey(dev.status_addr(sub));
        self.semaphores.alloc_pinned(key, 1);
        *slot = Some(key);
        Some(key)
    }
}

impl Default for NucleusState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nucleon_hal::LINE_DISK;

    #[test]
    fn test_state_creation() {
        let state = NucleusState::new();
        assert!(state.semaphores.is_empty());
        assert_eq!(state.metrics.syscall_count, 0);
        assert_eq!(state.device_sems.bindings().count(), 0);
    }

    #[test]
    fn test_device_semaphore_allocates_lazily() {
        let mut state = NucleusState::new();
        let dev = DeviceId::new(LINE_DISK, 0).unwrap();

        assert!(state.device_sems.get(dev, SubDevice::Transmit).is_none());

        let key = state
            .device_semaphore(dev.register_addr(), SubDevice::Transmit)
            .unwrap();
        let sem = state.semaphores.get(key).unwrap();
        assert_eq!(sem.value, 1);
        assert!(sem.pinned);
    }

    #[test]
    fn test_device_semaphore_memoizes() {
        let mut state = NucleusState::new();
        let dev = DeviceId::new(LINE_TERMINAL, 3).unwrap();
        let addr = dev.register_addr();

        let first = state.device_semaphore(addr, SubDevice::Receive).unwrap();
        let second = state.device_semaphore(addr, SubDevice::Receive).unwrap();
        assert_eq!(first, second);
        assert_eq!(state.semaphores.len(), 1);
    }

    #[test]
    fn test_device_semaphore_distinct_devices_distinct_keys() {
        let mut state = NucleusState::new();
        let term = DeviceId::new(LINE_TERMINAL, 0).unwrap();
        let disk = DeviceId::new(LINE_DISK, 0).unwrap();

        let transmit = state
            .device_semaphore(term.register_addr(), SubDevice::Transmit)
            .unwrap();
        let receive = state
            .device_semaphore(term.register_addr(), SubDevice::Receive)
            .unwrap();
        let disk_key = state
            .device_semaphore(disk.register_addr(), SubDevice::Transmit)
            .unwrap();

        // Two halves of one terminal, and two distinct devices, all bind
        // distinct keys.
        assert_ne!(transmit, receive);
        assert_ne!(transmit, disk_key);
        assert_ne!(receive, disk_key);
        assert_eq!(state.semaphores.len(), 3);
    }

    #[test]
    fn test_device_semaphore_rejects_bad_address() {
        let mut state = NucleusState::new();
        assert!(state.device_semaphore(0, SubDevice::Transmit).is_none());
        assert!(state.device_semaphore(3, SubDevice::Receive).is_none());
    }

    #[test]
    fn test_bindings_iterates_all_bound_keys() {
        let mut state = NucleusState::new();
        let term = DeviceId::new(LINE_TERMINAL, 1).unwrap();
        let disk = DeviceId::new(LINE_DISK, 2).unwrap();

        state.device_semaphore(term.register_addr(), SubDevice::Transmit);
        state.device_semaphore(disk.register_addr(), SubDevice::Transmit);

        assert_eq!(state.device_sems.bindings().count(), 2);
    }
}
