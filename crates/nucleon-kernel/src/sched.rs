//! Process table and scheduling collaborator
//!
//! A minimal concrete implementation of the [`Scheduler`] trait the
//! dispatcher consumes: a process table with parent links (for the kill
//! cascade), a FIFO ready queue, a current-process pointer and each
//! process's saved trap state. The nucleus core never looks inside.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;

use nucleon_kernel_core::{KillReport, Pid, SavedContext, SchedError, Scheduler};

/// Lifecycle state of a table entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcState {
    /// Eligible to run now (queued or current).
    Ready,
    /// Waiting on a semaphore or device.
    Blocked,
    /// Terminated. The entry lingers so the saved context stays
    /// inspectable, but the pid is no longer a valid target.
    Zombie,
}

struct Proc {
    parent: Option<Pid>,
    children: Vec<Pid>,
    state: ProcState,
    context: SavedContext,
}

/// The process store and ready queue.
pub struct ProcessTable {
    procs: BTreeMap<Pid, Proc>,
    ready: VecDeque<Pid>,
    current: Option<Pid>,
    next_pid: u64,
}

impl ProcessTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            procs: BTreeMap::new(),
            ready: VecDeque::new(),
            current: None,
            next_pid: 1,
        }
    }

    /// Create a process and append it to the ready queue.
    pub fn spawn(&mut self, parent: Option<Pid>) -> Pid {
        let pid = Pid(self.next_pid);
        self.next_pid += 1;

        self.procs.insert(
            pid,
            Proc {
                parent,
                children: Vec::new(),
                state: ProcState::Ready,
                context: SavedContext::default(),
            },
        );
        if let Some(parent) = parent {
            if let Some(proc) = self.procs.get_mut(&parent) {
                proc.children.push(pid);
            }
        }
        self.ready.push_back(pid);
        pid
    }

    /// Lifecycle state of `pid`, if the table knows it.
    pub fn state_of(&self, pid: Pid) -> Option<ProcState> {
        self.procs.get(&pid).map(|p| p.state)
    }

    /// Whether `pid` names a live (non-zombie) process.
    pub fn is_alive(&self, pid: Pid) -> bool {
        self.procs
            .get(&pid)
            .map(|p| p.state != ProcState::Zombie)
            .unwrap_or(false)
    }

    /// Saved trap state of `pid`, read-only.
    pub fn context(&self, pid: Pid) -> Option<&SavedContext> {
        self.procs.get(&pid).map(|p| &p.context)
    }

    /// Number of processes queued as ready (excluding the current one).
    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    /// Parent of `pid`, if any.
    pub fn parent_of(&self, pid: Pid) -> Option<Pid> {
        self.procs.get(&pid).and_then(|p| p.parent)
    }

    /// `pid` and every transitive descendant, depth-first.
    fn family_of(&self, pid: Pid) -> Vec<Pid> {
        let mut family = Vec::new();
        let mut stack = alloc::vec![pid];
        while let Some(next) = stack.pop() {
            family.push(next);
            if let Some(proc) = self.procs.get(&next) {
                stack.extend(proc.children.iter().copied());
            }
        }
        family
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for ProcessTable {
    fn current(&self) -> Option<Pid> {
        self.current
    }

    fn enqueue_ready(&mut self, pid: Pid) {
        if let Some(proc) = self.procs.get_mut(&pid) {
            if proc.state != ProcState::Zombie {
                proc.state = ProcState::Ready;
                self.ready.push_back(pid);
            }
        }
    }

    fn kill(&mut self, pid: Pid) -> Result<KillReport, SchedError> {
        if !self.is_alive(pid) {
            return Err(SchedError::InvalidProcess);
        }

        let killed = self.family_of(pid);
        let killed_running = self.current.is_some_and(|c| killed.contains(&c));

        for &victim in &killed {
            if let Some(proc) = self.procs.get_mut(&victim) {
                proc.state = ProcState::Zombie;
            }
            self.ready.retain(|&p| p != victim);
        }
        if killed_running {
            self.current = None;
        }

        Ok(KillReport {
            killed,
            killed_running,
        })
    }

    fn drop_current(&mut self) {
        if let Some(pid) = self.current.take() {
            if let Some(proc) = self.procs.get_mut(&pid) {
                proc.state = ProcState::Blocked;
            }
        }
    }

    fn resume(&mut self) -> Option<Pid> {
        if self.current.is_none() {
            self.current = self.ready.pop_front();
        }
        self.current
    }

    fn context_mut(&mut self, pid: Pid) -> Option<&mut SavedContext> {
        self.procs.get_mut(&pid).map(|p| &mut p.context)
    }
}
