//! Syscall decode and dispatch
//!
//! A trap arrives as a small integer id plus three word arguments. The id
//! is decoded into a [`Syscall`] variant and dispatched through an
//! exhaustive match; ids outside the defined range are a fatal decode
//! error, not a user-recoverable failure.
//!
//! Every handler finishes the syscall by writing a return value into the
//! trapped process's saved context through one of two primitives:
//! return-and-resume (write, then hand control back to the same process)
//! or return-and-stay (write only, because the handler still has
//! bookkeeping to do before the CPU is yielded - blocking the caller or
//! replacing it). The [`Control`] value tells the caller which happened.

use crate::sem::POutcome;
use crate::state::NucleusState;
use crate::types::{Control, Pid, SchedError, Scheduler, SemKey, RET_FAILURE, RET_SUCCESS};

/// Syscall variants - every operation a process can trap into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Syscall {
    /// Accumulated CPU time of the caller. Dispatch entry only; reports
    /// not-implemented.
    CpuTime,
    /// Spawn a child process. Dispatch entry only; reports
    /// not-implemented.
    Fork,
    /// Terminate a process and all of its descendants. `None` targets
    /// the caller itself.
    Kill { target: Option<Pid> },
    /// Semaphore signal (V).
    Verhogen { key: SemKey },
    /// Semaphore wait (P).
    Passeren { key: SemKey },
    /// Issue a device I/O command. Dispatch entry only; reports
    /// not-implemented.
    IoCommand,
    /// Install a higher-level trap handler. Dispatch entry only; reports
    /// not-implemented.
    SpecPassup,
    /// Identifier of the caller. Dispatch entry only; reports
    /// not-implemented.
    GetPid,
}

/// Identifiers of the syscall ABI, a fixed contiguous range.
pub const SYS_CPU_TIME: u32 = 0;
pub const SYS_FORK: u32 = 1;
pub const SYS_KILL: u32 = 2;
pub const SYS_VERHOGEN: u32 = 3;
pub const SYS_PASSEREN: u32 = 4;
pub const SYS_IO_COMMAND: u32 = 5;
pub const SYS_SPEC_PASSUP: u32 = 6;
pub const SYS_GET_PID: u32 = 7;

impl Syscall {
    /// Decode a trapped syscall from its id and three word arguments.
    ///
    /// Returns `None` for ids outside `[SYS_CPU_TIME, SYS_GET_PID]`.
    /// Unused arguments are ignored, matching the ABI.
    pub fn decode(id: u32, arg1: u32, _arg2: u32, _arg3: u32) -> Option<Syscall> {
        match id {
            SYS_CPU_TIME => Some(Syscall::CpuTime),
            SYS_FORK => Some(Syscall::Fork),
            SYS_KILL => Some(Syscall::Kill {
                // A null argument selects the caller itself.
                target: if arg1 == 0 {
                    None
                } else {
                    Some(Pid(u64::from(arg1)))
                },
            }),
            SYS_VERHOGEN => Some(Syscall::Verhogen { key: SemKey(arg1) }),
            SYS_PASSEREN => Some(Syscall::Passeren { key: SemKey(arg1) }),
            SYS_IO_COMMAND => Some(Syscall::IoCommand),
            SYS_SPEC_PASSUP => Some(Syscall::SpecPassup),
            SYS_GET_PID => Some(Syscall::GetPid),
            _ => None,
        }
    }
}

/// Decode and dispatch a raw trap.
///
/// Aborts on an out-of-range id: such a trap means the trap entry layer
/// and this dispatcher disagree about the ABI, and nothing downstream can
/// run on an inconsistent ABI.
pub fn dispatch_raw<S: Scheduler>(
    state: &mut NucleusState,
    sched: &mut S,
    id: u32,
    arg1: u32,
    arg2: u32,
    arg3: u32,
) -> Control {
    match Syscall::decode(id, arg1, arg2, arg3) {
        Some(syscall) => dispatch(state, sched, syscall),
        None => panic!("syscall id {id} outside the defined range"),
    }
}

/// Dispatch a decoded syscall.
///
/// Mutates the nucleus state and the scheduler, writes the return value
/// into the trapped process's saved context, and reports whether the
/// caller should resume the same process or pick a new one.
pub fn dispatch<S: Scheduler>(state: &mut NucleusState, sched: &mut S, syscall: Syscall) -> Control {
    state.metrics.syscall_count += 1;

    match syscall {
        Syscall::Kill { target } => sys_kill(state, sched, target),
        Syscall::Verhogen { key } => sys_verhogen(state, sched, key),
        Syscall::Passeren { key } => sys_passeren(state, sched, key),

        // Stable dispatch entries without an implementation in this
        // nucleus: fail the caller and let it continue.
        Syscall::CpuTime
        | Syscall::Fork
        | Syscall::IoCommand
        | Syscall::SpecPassup
        | Syscall::GetPid => sys_return(sched, RET_FAILURE),
    }
}

/// The process whose trap is being serviced.
///
/// A syscall with no running process means the trap entry layer handed
/// us inconsistent scheduler state; there is no way to continue.
fn trapped_process<S: Scheduler>(sched: &S) -> Pid {
    match sched.current() {
        Some(pid) => pid,
        None => panic!("syscall dispatched with no running process"),
    }
}

/// Return-and-resume: write `retval` into the current process's saved
/// context and hand control back to it.
fn sys_return<S: Scheduler>(sched: &mut S, retval: i32) -> Control {
    let pid = trapped_process(sched);
    sys_return_stay(sched, pid, retval);
    Control::Resume
}

/// Return-and-stay: write `retval` into `pid`'s saved context without
/// transferring control, so the handler can finish its bookkeeping.
///
/// The write is skipped for a process the scheduler no longer tracks
/// (it was torn down by the same syscall).
fn sys_return_stay<S: Scheduler>(sched: &mut S, pid: Pid, retval: i32) {
    if let Some(ctx) = sched.context_mut(pid) {
        ctx.ret = retval;
    }
}

fn sys_kill<S: Scheduler>(state: &mut NucleusState, sched: &mut S, target: Option<Pid>) -> Control {
    let caller = trapped_process(sched);
    let victim = target.unwrap_or(caller);

    match sched.kill(victim) {
        Err(SchedError::InvalidProcess) => sys_return(sched, RET_FAILURE),
        Ok(report) => {
            // A terminated process must not linger on any wait queue.
            for pid in &report.killed {
                state.semaphores.purge(*pid);
            }

            if report.killed_running {
                // The caller died with its own syscall: record the
                // result in its saved state and let a replacement run.
                sys_return_stay(sched, caller, RET_SUCCESS);
                Control::Switch
            } else {
                sys_return(sched, RET_SUCCESS)
            }
        }
    }
}

fn sys_verhogen<S: Scheduler>(state: &mut NucleusState, sched: &mut S, key: SemKey) -> Control {
    let Some(out) = state.semaphores.v(key) else {
        panic!("verhogen on unresolvable semaphore key {:#010x}", key.0);
    };
    if let Some(released) = out.released {
        sched.enqueue_ready(released);
    }
    // The V caller never blocks.
    sys_return(sched, out.value)
}

fn sys_passeren<S: Scheduler>(state: &mut NucleusState, sched: &mut S, key: SemKey) -> Control {
    let caller = trapped_process(sched);
    let Some(out) = state.semaphores.p(key, caller) else {
        panic!("passeren on unresolvable semaphore key {:#010x}", key.0);
    };

    match out {
        POutcome::Proceed(value) => sys_return(sched, value),
        POutcome::Blocked(value) => {
            // The counter at block time is what the process observes
            // when a matching V eventually releases it: its saved state
            // is restored verbatim.
            sys_return_stay(sched, caller, value);
            sched.drop_current();
            state.metrics.blocked_count += 1;
            Control::Switch
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{KillReport, SavedContext};
    use alloc::collections::{BTreeMap, BTreeSet, VecDeque};
    use alloc::vec::Vec;

    // ========================================================================
    // Test scheduler
    // ========================================================================

    /// Just enough of a process store to drive the dispatcher: a current
    /// pointer, a ready queue, saved contexts and parent links for the
    /// kill cascade.
    struct TestScheduler {
        current: Option<Pid>,
        ready: VecDeque<Pid>,
        contexts: BTreeMap<Pid, SavedContext>,
        children: BTreeMap<Pid, Vec<Pid>>,
        dead: BTreeSet<Pid>,
    }

    impl TestScheduler {
        fn new() -> Self {
            Self {
                current: None,
                ready: VecDeque::new(),
                contexts: BTreeMap::new(),
                children: BTreeMap::new(),
                dead: BTreeSet::new(),
            }
        }

        fn spawn(&mut self, pid: Pid, parent: Option<Pid>) {
            self.contexts.insert(pid, SavedContext::default());
            if let Some(parent) = parent {
                self.children.entry(parent).or_default().push(pid);
            }
        }

        fn run(&mut self, pid: Pid) {
            self.current = Some(pid);
        }

        fn descendants(&self, pid: Pid, out: &mut Vec<Pid>) {
            out.push(pid);
            if let Some(kids) = self.children.get(&pid) {
                for &kid in kids {
                    self.descendants(kid, out);
                }
            }
        }

        fn ret_of(&self, pid: Pid) -> i32 {
            self.contexts[&pid].ret
        }
    }

    impl Scheduler for TestScheduler {
        fn current(&self) -> Option<Pid> {
            self.current
        }

        fn enqueue_ready(&mut self, pid: Pid) {
            self.ready.push_back(pid);
        }

        fn kill(&mut self, pid: Pid) -> Result<KillReport, SchedError> {
            if !self.contexts.contains_key(&pid) || self.dead.contains(&pid) {
                return Err(SchedError::InvalidProcess);
            }
            let mut killed = Vec::new();
            self.descendants(pid, &mut killed);
            let killed_running = self.current.is_some_and(|c| killed.contains(&c));
            for &victim in &killed {
                self.dead.insert(victim);
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
            self.current = None;
        }

        fn resume(&mut self) -> Option<Pid> {
            if self.current.is_none() {
                self.current = self.ready.pop_front();
            }
            self.current
        }

        fn context_mut(&mut self, pid: Pid) -> Option<&mut SavedContext> {
            self.contexts.get_mut(&pid)
        }
    }

    fn setup_one_process() -> (NucleusState, TestScheduler, Pid) {
        let mut sched = TestScheduler::new();
        let pid = Pid(1);
        sched.spawn(pid, None);
        sched.run(pid);
        (NucleusState::new(), sched, pid)
    }

    // ========================================================================
    // Decode tests
    // ========================================================================

    #[test]
    fn test_decode_every_defined_id() {
        assert_eq!(Syscall::decode(SYS_CPU_TIME, 0, 0, 0), Some(Syscall::CpuTime));
        assert_eq!(Syscall::decode(SYS_FORK, 0, 0, 0), Some(Syscall::Fork));
        assert_eq!(
            Syscall::decode(SYS_KILL, 9, 0, 0),
            Some(Syscall::Kill {
                target: Some(Pid(9))
            })
        );
        assert_eq!(
            Syscall::decode(SYS_KILL, 0, 0, 0),
            Some(Syscall::Kill { target: None })
        );
        assert_eq!(
            Syscall::decode(SYS_VERHOGEN, 77, 0, 0),
            Some(Syscall::Verhogen { key: SemKey(77) })
        );
        assert_eq!(
            Syscall::decode(SYS_PASSEREN, 77, 0, 0),
            Some(Syscall::Passeren { key: SemKey(77) })
        );
        assert_eq!(Syscall::decode(SYS_IO_COMMAND, 0, 0, 0), Some(Syscall::IoCommand));
        assert_eq!(Syscall::decode(SYS_SPEC_PASSUP, 0, 0, 0), Some(Syscall::SpecPassup));
        assert_eq!(Syscall::decode(SYS_GET_PID, 0, 0, 0), Some(Syscall::GetPid));
    }

    #[test]
    fn test_decode_out_of_range() {
        assert_eq!(Syscall::decode(8, 0, 0, 0), None);
        assert_eq!(Syscall::decode(u32::MAX, 0, 0, 0), None);
    }

    #[test]
    #[should_panic(expected = "outside the defined range")]
    fn test_dispatch_raw_out_of_range_is_fatal() {
        let (mut state, mut sched, _) = setup_one_process();
        dispatch_raw(&mut state, &mut sched, 8, 0, 0, 0);
    }

    // ========================================================================
    // Kill tests
    // ========================================================================

    #[test]
    fn test_kill_invalid_target_fails_and_resumes() {
        let (mut state, mut sched, pid) = setup_one_process();

        let control = dispatch(
            &mut state,
            &mut sched,
            Syscall::Kill {
                target: Some(Pid(99)),
            },
        );

        assert_eq!(control, Control::Resume);
        assert_eq!(sched.ret_of(pid), RET_FAILURE);
    }

    #[test]
    fn test_kill_unrelated_process_resumes_caller() {
        let (mut state, mut sched, caller) = setup_one_process();
        let other = Pid(2);
        sched.spawn(other, None);

        let control = dispatch(
            &mut state,
            &mut sched,
            Syscall::Kill {
                target: Some(other),
            },
        );

        assert_eq!(control, Control::Resume);
        assert_eq!(sched.ret_of(caller), RET_SUCCESS);
        assert_eq!(sched.current(), Some(caller));
    }

    #[test]
    fn test_kill_self_stays_and_switches() {
        let (mut state, mut sched, caller) = setup_one_process();

        // A null target selects the caller.
        let control = dispatch(&mut state, &mut sched, Syscall::Kill { target: None });

        assert_eq!(control, Control::Switch);
        // Return value written into the victim's own saved state, which
        // is never resumed directly.
        assert_eq!(sched.ret_of(caller), RET_SUCCESS);
        assert_eq!(sched.current(), None);
    }

    #[test]
    fn test_kill_ancestor_of_running_switches() {
        let mut sched = TestScheduler::new();
        let parent = Pid(1);
        let child = Pid(2);
        sched.spawn(parent, None);
        sched.spawn(child, Some(parent));
        sched.run(child);
        let mut state = NucleusState::new();

        // Killing the parent cascades to the running child.
        let control = dispatch(
            &mut state,
            &mut sched,
            Syscall::Kill {
                target: Some(parent),
            },
        );

        assert_eq!(control, Control::Switch);
        assert_eq!(sched.current(), None);
    }

    #[test]
    fn test_kill_purges_victims_from_wait_queues() {
        let mut sched = TestScheduler::new();
        let caller = Pid(1);
        let waiter = Pid(2);
        sched.spawn(caller, None);
        sched.spawn(waiter, None);
        let mut state = NucleusState::new();

        let key = SemKey(10);
        state.semaphores.alloc(key, 0);

        // Block the waiter on the semaphore.
        sched.run(waiter);
        dispatch(&mut state, &mut sched, Syscall::Passeren { key });
        assert_eq!(state.semaphores.get(key).unwrap().queue.len(), 1);

        // Kill it from the other process.
        sched.run(caller);
        dispatch(
            &mut state,
            &mut sched,
            Syscall::Kill {
                target: Some(waiter),
            },
        );

        let sem = state.semaphores.get(key).unwrap();
        assert!(sem.queue.is_empty());
        assert_eq!(sem.value, 0);
    }

    // ========================================================================
    // Verhogen tests
    // ========================================================================

    #[test]
    fn test_verhogen_returns_updated_counter() {
        let (mut state, mut sched, caller) = setup_one_process();
        let key = SemKey(5);
        state.semaphores.alloc(key, 0);

        let control = dispatch(&mut state, &mut sched, Syscall::Verhogen { key });

        assert_eq!(control, Control::Resume);
        assert_eq!(sched.ret_of(caller), 1);
        assert_eq!(sched.current(), Some(caller));
    }

    #[test]
    fn test_verhogen_readies_earliest_waiter() {
        let mut sched = TestScheduler::new();
        let (first, second, signaller) = (Pid(1), Pid(2), Pid(3));
        for pid in [first, second, signaller] {
            sched.spawn(pid, None);
        }
        let mut state = NucleusState::new();
        let key = SemKey(5);
        state.semaphores.alloc(key, 0);

        sched.run(first);
        dispatch(&mut state, &mut sched, Syscall::Passeren { key });
        sched.run(second);
        dispatch(&mut state, &mut sched, Syscall::Passeren { key });

        sched.run(signaller);
        dispatch(&mut state, &mut sched, Syscall::Verhogen { key });

        // FIFO: the process that blocked first is released first, and
        // only that one.
        assert_eq!(sched.ready.len(), 1);
        assert_eq!(sched.ready.front(), Some(&first));
    }

    #[test]
    #[should_panic(expected = "unresolvable semaphore key")]
    fn test_verhogen_unknown_key_is_fatal() {
        let (mut state, mut sched, _) = setup_one_process();
        dispatch(&mut state, &mut sched, Syscall::Verhogen { key: SemKey(404) });
    }

    // ========================================================================
    // Passeren tests
    // ========================================================================

    #[test]
    fn test_passeren_proceeds_on_positive_counter() {
        let (mut state, mut sched, caller) = setup_one_process();
        let key = SemKey(5);
        state.semaphores.alloc(key, 1);

        let control = dispatch(&mut state, &mut sched, Syscall::Passeren { key });

        assert_eq!(control, Control::Resume);
        assert_eq!(sched.ret_of(caller), 0);
        assert_eq!(state.metrics.blocked_count, 0);
    }

    #[test]
    fn test_passeren_blocks_on_depleted_counter() {
        let (mut state, mut sched, caller) = setup_one_process();
        let key = SemKey(5);
        state.semaphores.alloc(key, 0);

        let control = dispatch(&mut state, &mut sched, Syscall::Passeren { key });

        assert_eq!(control, Control::Switch);
        // The pre-block counter lands in the blocked process's own saved
        // state, ready for when it is released.
        assert_eq!(sched.ret_of(caller), -1);
        assert_eq!(sched.current(), None);
        assert_eq!(
            state.semaphores.get(key).unwrap().queue.front(),
            Some(&caller)
        );
        assert_eq!(state.metrics.blocked_count, 1);
    }

    #[test]
    #[should_panic(expected = "unresolvable semaphore key")]
    fn test_passeren_unknown_key_is_fatal() {
        let (mut state, mut sched, _) = setup_one_process();
        dispatch(&mut state, &mut sched, Syscall::Passeren { key: SemKey(404) });
    }

    // ========================================================================
    // Unimplemented entries
    // ========================================================================

    #[test]
    fn test_unimplemented_syscalls_fail_and_resume() {
        let (mut state, mut sched, caller) = setup_one_process();

        for syscall in [
            Syscall::CpuTime,
            Syscall::Fork,
            Syscall::IoCommand,
            Syscall::SpecPassup,
            Syscall::GetPid,
        ] {
            let control = dispatch(&mut state, &mut sched, syscall);
            assert_eq!(control, Control::Resume);
            assert_eq!(sched.ret_of(caller), RET_FAILURE);
        }
        assert_eq!(state.metrics.syscall_count, 5);
    }
}
