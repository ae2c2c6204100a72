//! Semaphore manager
//!
//! Classical counting semaphores keyed by an opaque [`SemKey`], each with
//! a FIFO queue of blocked processes. Descriptors are allocated on first
//! reference and live in a fixed-capacity table; device-bound descriptors
//! are pinned and never reclaimed.
//!
//! The release condition of `v` follows the counter/queue invariant
//! (`queue length == max(0, -counter)`) rather than the sign of the
//! counter after the increment: the head waiter is released whenever one
//! exists.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;

use crate::types::{Pid, SemKey};

/// Capacity of the semaphore descriptor table.
///
/// Enough for every device sub-device (five lines of eight devices, two
/// sub-devices on the terminal line) plus process-chosen keys.
pub const MAX_SEMAPHORES: usize = 64;

/// Semaphore descriptor: a signed counter plus a FIFO queue of blocked
/// processes, identified by an opaque key.
#[derive(Clone, Debug)]
pub struct Semaphore {
    /// The key this descriptor is registered under.
    pub key: SemKey,
    /// The classical semaphore counter.
    pub value: i32,
    /// Processes blocked on this semaphore, earliest first.
    pub queue: VecDeque<Pid>,
    /// Device-bound descriptors are never reclaimed.
    pub pinned: bool,
}

impl Semaphore {
    fn new(key: SemKey, initial: i32, pinned: bool) -> Self {
        Self {
            key,
            value: initial,
            queue: VecDeque::new(),
            pinned,
        }
    }

    /// A descriptor with no waiters and a non-negative counter holds no
    /// state a caller could still observe; it may be reclaimed.
    fn is_free(&self) -> bool {
        !self.pinned && self.queue.is_empty() && self.value >= 0
    }
}

/// Outcome of a P operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum POutcome {
    /// The counter stayed non-negative; the caller proceeds.
    Proceed(i32),
    /// The counter went negative; the caller was queued and must block.
    Blocked(i32),
}

/// Outcome of a V operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VOutcome {
    /// The counter after the increment.
    pub value: i32,
    /// The released head waiter, if the queue was non-empty.
    pub released: Option<Pid>,
}

/// The semaphore descriptor table.
pub struct SemTable {
    sems: BTreeMap<SemKey, Semaphore>,
}

impl SemTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            sems: BTreeMap::new(),
        }
    }

    /// Number of live descriptors.
    pub fn len(&self) -> usize {
        self.sems.len()
    }

    /// True when no descriptor has been allocated.
    pub fn is_empty(&self) -> bool {
        self.sems.is_empty()
    }

    /// Pure lookup: the descriptor for `key`, if one was allocated.
    pub fn get(&self, key: SemKey) -> Option<&Semaphore> {
        self.sems.get(&key)
    }

    /// Mutable lookup, never allocating.
    pub fn get_mut(&mut self, key: SemKey) -> Option<&mut Semaphore> {
        self.sems.get_mut(&key)
    }

    /// Iterate over all live descriptors.
    pub fn iter(&self) -> impl Iterator<Item = &Semaphore> {
        self.sems.values()
    }

    /// Allocate a descriptor for `key` with the given initial counter.
    ///
    /// Aborts when the fixed-capacity table stays full after evicting
    /// free descriptors: descriptor exhaustion means the system was
    /// configured with too small a table, and no caller can recover.
    pub fn alloc(&mut self, key: SemKey, initial: i32) -> &mut Semaphore {
        self.alloc_inner(key, initial, false)
    }

    /// Allocate a device-bound descriptor, exempt from reclamation.
    pub fn alloc_pinned(&mut self, key: SemKey, initial: i32) -> &mut Semaphore {
        self.alloc_inner(key, initial, true)
    }

    fn alloc_inner(&mut self, key: SemKey, initial: i32, pinned: bool) -> &mut Semaphore {
        if self.sems.len() >= MAX_SEMAPHORES && !self.sems.contains_key(&key) {
            self.reclaim();
            if self.sems.len() >= MAX_SEMAPHORES {
                panic!("semaphore table exhausted ({MAX_SEMAPHORES} descriptors)");
            }
        }
        self.sems
            .entry(key)
            .or_insert_with(|| Semaphore::new(key, initial, pinned))
    }

    /// Drop free descriptors to make room. Pinned descriptors and any
    /// descriptor a process still waits on are kept.
    fn reclaim(&mut self) {
        self.sems.retain(|_, sem| !sem.is_free());
    }

    /// Append `pid` to the wait queue for `key`.
    ///
    /// Returns false when `key` has no descriptor.
    pub fn enqueue(&mut self, key: SemKey, pid: Pid) -> bool {
        match self.sems.get_mut(&key) {
            Some(sem) => {
                sem.queue.push_back(pid);
                true
            }
            None => false,
        }
    }

    /// Remove and return the head of the wait queue for `key`.
    pub fn dequeue(&mut self, key: SemKey) -> Option<Pid> {
        self.sems.get_mut(&key)?.queue.pop_front()
    }

    /// P (passeren, wait): decrement the counter; queue the caller when
    /// it goes negative.
    ///
    /// Returns `None` when `key` has no descriptor - the caller decides
    /// whether that is fatal.
    pub fn p(&mut self, key: SemKey, caller: Pid) -> Option<POutcome> {
        let sem = self.sems.get_mut(&key)?;
        sem.value -= 1;
        if sem.value < 0 {
            sem.queue.push_back(caller);
            Some(POutcome::Blocked(sem.value))
        } else {
            Some(POutcome::Proceed(sem.value))
        }
    }

    /// V (verhogen, signal): increment the counter and release the head
    /// waiter, if any.
    ///
    /// Returns `None` when `key` has no descriptor.
    pub fn v(&mut self, key: SemKey) -> Option<VOutcome> {
        let sem = self.sems.get_mut(&key)?;
        sem.value += 1;
        let released = sem.queue.pop_front();
        Some(VOutcome {
            value: sem.value,
            released,
        })
    }

    /// Remove a terminated process from every wait queue.
    ///
    /// Each removal credits the counter back by one, keeping the
    /// queue/counter invariant intact for the remaining waiters.
    /// Returns the keys the process was removed from.
    pub fn purge(&mut self, pid: Pid) -> Vec<SemKey> {
        let mut removed_from = Vec::new();
        for sem in self.sems.values_mut() {
            let before = sem.queue.len();
            sem.queue.retain(|&p| p != pid);
            let removed = before - sem.queue.len();
            if removed > 0 {
                sem.value += removed as i32;
                removed_from.push(sem.key);
            }
        }
        removed_from
    }
}

impl Default for SemTable {
    fn default() -> Self {
        Self::new()
    }
}
