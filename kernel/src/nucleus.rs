// SPDX-License-Identifier: MPL-2.0

//! The nucleus: process table and run queues behind the one kernel lock,
//! plus the lifecycle operations the servers ask the kernel for.

use spin::Once;

use crate::ipc::lattice;
use crate::prelude::*;
use crate::process::signal::{
    default_action, SavedSigContext, SigAction, SigDefaultAction, SigSet, SIGCONT, SIGKILL,
    SIGSEGV, SIGSTOP,
};
use crate::process::{
    Pcb, Pid, ProcState, ProcessTable, RecvFrom, INIT_PID, MM_PID, PM_PID, VFS_PID,
};
use crate::sched::{RunQueues, IDLE, SCHED_QUANTUM};
use crate::time;

/// Everything the single kernel lock protects.
pub struct Nucleus {
    pub procs: ProcessTable,
    pub sched: RunQueues,
}

impl Nucleus {
    pub fn new() -> Self {
        Nucleus {
            procs: ProcessTable::new(),
            sched: RunQueues::new(),
        }
    }

    /// Creates the boot processes: init (PID 1) ready to run, and the
    /// three servers (PIDs 2-4) parked in their receive loops.
    pub fn bootstrap(&mut self) {
        for expected in [INIT_PID, VFS_PID, PM_PID, MM_PID] {
            let pid = self.procs.allocate_pid().expect("empty table cannot be full");
            assert_eq!(pid, expected, "boot processes must get the reserved pids");
            let mut pcb = Pcb::new(pid, if pid == INIT_PID { 0 } else { INIT_PID }, pid as u64);
            if pid != INIT_PID {
                // Servers start blocked in receive(ANY), their steady state.
                pcb.state = ProcState::BlockedReceiving(RecvFrom::Any);
            }
            self.procs.insert(pcb);
        }
        self.sched.enqueue(INIT_PID, self.procs.lookup(INIT_PID).unwrap().priority);
    }

    /// Creates a fresh runnable process. Used for boot-time spawning and
    /// by the tests; `fork` is the real-world entry.
    pub fn spawn(&mut self, ppid: Pid) -> Result<Pid> {
        let pid = self
            .procs
            .allocate_pid()
            .ok_or_else(|| Error::with_message(Errno::EAGAIN, "process table is full"))?;
        let pcb = Pcb::new(pid, ppid, pid as u64);
        let priority = pcb.priority;
        self.procs.insert(pcb);
        self.sched.enqueue(pid, priority);
        Ok(pid)
    }

    /// The kernel half of fork: duplicates the PCB and the address space
    /// (copy-on-write), gives the child a zero return value, and makes it
    /// runnable iff the parent was.
    pub fn fork(&mut self, parent: Pid) -> Result<Pid> {
        if !self.procs.contains(parent) {
            return_errno!(Errno::ESRCH);
        }
        let child_pid = self
            .procs
            .allocate_pid()
            .ok_or_else(|| Error::with_message(Errno::EAGAIN, "process table is full"))?;

        let parent_pcb = self.procs.lookup_mut(parent).expect("checked above");
        let child_vm = parent_pcb.vm.fork();
        let mut child = Pcb::new(child_pid, parent, 0);
        child.vm = child_vm;
        child.pgid = parent_pcb.pgid;
        child.sid = parent_pcb.sid;
        child.creds = parent_pcb.creds;
        child.priority = parent_pcb.priority;
        child.ctx = parent_pcb.ctx;
        // Fork returns 0 in the child.
        child.ctx.set_syscall_ret(0);
        child.sig.dispositions = parent_pcb.sig.dispositions.clone();
        child.sig.blocked = parent_pcb.sig.blocked;
        // Pending signals are not inherited.
        child.sig.pending = SigSet::empty();
        // The child enters life exactly where the parent stands: usually
        // blocked on the PM's fork reply, like the parent is.
        child.state = match parent_pcb.state {
            ProcState::Running | ProcState::ReadyToRun => ProcState::ReadyToRun,
            other => other,
        };

        let runnable = child.state.is_runnable();
        let priority = child.priority;
        self.procs.insert(child);
        if runnable {
            self.sched.enqueue(child_pid, priority);
        }
        Ok(child_pid)
    }

    /// The kernel half of exit: tear down IPC, release every page frame,
    /// and leave a zombie holding only its status.
    pub fn exit(&mut self, pid: Pid, status: i32) {
        lattice::abandon_endpoint(self, pid);
        let Some(pcb) = self.procs.lookup_mut(pid) else {
            return;
        };
        pcb.vm.clear();
        pcb.msg_ready = false;
        pcb.inbox = None;
        pcb.state = ProcState::Zombie(status);
    }

    /// A kill the process never asked for (fault, fatal signal): run the
    /// kernel exit and let the PM know so parentage and cleanup happen.
    fn kill(&mut self, pid: Pid, status: i32) {
        self.exit(pid, status);
        let notice = crate::ipc::Message::with_payload(
            crate::ipc::msg::PROC_DIED,
            &crate::ipc::wire::ProcDiedNotice { pid, status },
        );
        if lattice::notify(self, crate::process::KERNEL_PID, PM_PID, &notice).is_err() {
            warn!("kernel death notice for {} could not be posted", pid);
        }
    }

    /// Removes a reaped zombie; its PID becomes reusable.
    pub fn reap(&mut self, pid: Pid) -> Option<i32> {
        let status = match self.procs.lookup(pid)?.state {
            ProcState::Zombie(status) => status,
            _ => return None,
        };
        self.procs.remove(pid);
        Some(status)
    }

    /// The clock interrupt: account the running process's quantum.
    /// Returns whether a reschedule is due.
    pub fn clock_tick(&mut self) -> bool {
        time::tick();
        let current = self.sched.current();
        if current == IDLE {
            return false;
        }
        let Some(pcb) = self.procs.lookup_mut(current) else {
            return true;
        };
        pcb.quantum_left = pcb.quantum_left.saturating_sub(1);
        if pcb.quantum_left > 0 {
            return false;
        }
        // Quantum exhausted: back to the tail of its queue.
        pcb.state = ProcState::ReadyToRun;
        let priority = pcb.priority;
        self.sched.enqueue(current, priority);
        self.sched.set_current(IDLE);
        true
    }

    /// Picks the next process to run. Keeps the current one when it is
    /// still running; otherwise dispatches the head of the
    /// lowest-numbered non-empty queue, or goes idle.
    pub fn schedule(&mut self) -> Pid {
        let current = self.sched.current();
        if current != IDLE
            && self
                .procs
                .lookup(current)
                .is_some_and(|p| p.state == ProcState::Running)
        {
            return current;
        }
        match self.sched.dequeue_highest() {
            Some(next) => {
                let pcb = self.procs.lookup_mut(next).expect("queued pid must exist");
                debug_assert_eq!(pcb.state, ProcState::ReadyToRun);
                pcb.state = ProcState::Running;
                pcb.quantum_left = SCHED_QUANTUM;
                self.sched.set_current(next);
                next
            }
            None => {
                self.sched.set_current(IDLE);
                IDLE
            }
        }
    }

    /// Marks a signal pending on `target` and applies the immediate
    /// effects: SIGCONT resumes a stopped process, and a receiver blocked
    /// on ANY is woken with `EINTR`.
    pub fn post_signal(&mut self, target: Pid, signo: u8) -> Result<()> {
        let Some(pcb) = self.procs.lookup_mut(target) else {
            return_errno!(Errno::ESRCH);
        };
        if pcb.state.is_zombie() {
            return_errno!(Errno::ESRCH);
        }
        pcb.sig.pending.add(signo);
        if signo == SIGCONT && pcb.state == ProcState::Stopped {
            pcb.state = ProcState::ReadyToRun;
            let priority = pcb.priority;
            self.sched.enqueue(target, priority);
        }
        lattice::interrupt_receive(self, target);
        Ok(())
    }

    /// Delivers pending signals at the return-to-user boundary.
    /// `Some(status)` means the process was killed and has already gone
    /// through `exit` with that status.
    pub fn return_to_user(&mut self, pid: Pid) -> Option<i32> {
        loop {
            let Some(pcb) = self.procs.lookup_mut(pid) else {
                return None;
            };
            if pcb.state.is_zombie() {
                return None;
            }
            let Some(signo) = pcb.sig.next_deliverable() else {
                return None;
            };
            pcb.sig.pending.remove(signo);
            let action = pcb.sig.dispositions.get(signo);
            // SIGKILL and SIGSTOP cannot be caught or ignored.
            let action = if signo == SIGKILL || signo == SIGSTOP {
                SigAction::Dfl
            } else {
                action
            };
            match action {
                SigAction::Ign => continue,
                SigAction::Dfl => match default_action(signo) {
                    SigDefaultAction::Ign => continue,
                    SigDefaultAction::Cont => continue,
                    SigDefaultAction::Stop => {
                        pcb.state = ProcState::Stopped;
                        self.sched.remove(pid);
                        return None;
                    }
                    SigDefaultAction::Term | SigDefaultAction::Core => {
                        let status = wait_status_from_signal(signo);
                        self.kill(pid, status);
                        return Some(status);
                    }
                },
                SigAction::Handler { addr, mask, .. } => {
                    if let Err(e) = self.build_signal_frame(pid, signo, addr, mask) {
                        // An unusable stack is as fatal as the signal.
                        debug!("signal frame for {} failed: {:?}", pid, e);
                        let status = wait_status_from_signal(SIGSEGV);
                        self.kill(pid, status);
                        return Some(status);
                    }
                    return None;
                }
            }
        }
    }

    /// Builds the frame a user handler sees: `[signo, rip, rflags]`
    /// pushed on the user stack, instruction pointer redirected to the
    /// handler, interrupted context stashed for sigreturn.
    fn build_signal_frame(
        &mut self,
        pid: Pid,
        signo: u8,
        handler: Vaddr,
        mask: SigSet,
    ) -> Result<()> {
        let pcb = self.procs.lookup_mut(pid).expect("caller checked");
        let saved = SavedSigContext {
            ctx: pcb.ctx,
            blocked: pcb.sig.blocked,
        };
        let sp = pcb.ctx.stack_pointer() - 3 * core::mem::size_of::<u64>();
        let frame = [
            signo as u64,
            pcb.ctx.instruction_pointer() as u64,
            pcb.ctx.flags(),
        ];
        let mut bytes = [0u8; 24];
        for (i, word) in frame.iter().enumerate() {
            bytes[i * 8..(i + 1) * 8].copy_from_slice(&word.to_le_bytes());
        }
        pcb.vm.write_bytes(sp, &bytes)?;
        pcb.sig.saved = Some(saved);
        pcb.sig.blocked |= mask | SigSet::from(signo);
        pcb.ctx.set_stack_pointer(sp);
        pcb.ctx.set_instruction_pointer(handler);
        Ok(())
    }

    /// Restores the context interrupted by a caught signal.
    pub fn sigreturn(&mut self, pid: Pid) -> Result<()> {
        let pcb = self
            .procs
            .lookup_mut(pid)
            .ok_or_else(|| Error::new(Errno::ESRCH))?;
        let saved = pcb
            .sig
            .saved
            .take()
            .ok_or_else(|| Error::with_message(Errno::EINVAL, "no signal frame to return from"))?;
        pcb.ctx = saved.ctx;
        pcb.sig.blocked = saved.blocked;
        Ok(())
    }

    /// The page-fault path. An unresolvable fault terminates the process
    /// the same way an unhandled SIGSEGV would.
    pub fn page_fault(&mut self, pid: Pid, addr: Vaddr, write: bool) -> Option<i32> {
        let Some(pcb) = self.procs.lookup_mut(pid) else {
            return None;
        };
        match pcb.vm.handle_fault(addr, write) {
            Ok(()) => None,
            Err(e) => {
                info!(
                    "segmentation fault: pid {} at {:#x} ({:?})",
                    pid,
                    addr,
                    e.error()
                );
                let status = wait_status_from_signal(SIGSEGV);
                self.kill(pid, status);
                Some(status)
            }
        }
    }
}

impl Default for Nucleus {
    fn default() -> Self {
        Self::new()
    }
}

/// The wait status of a normal exit.
pub fn wait_status_from_exit(code: i32) -> i32 {
    (code & 0xff) << 8
}

/// The wait status of a signal death.
pub fn wait_status_from_signal(signo: u8) -> i32 {
    signo as i32 & 0x7f
}

static NUCLEUS: Once<SpinLock<Nucleus>> = Once::new();

/// Builds the global nucleus and its boot processes.
pub fn init() {
    NUCLEUS.call_once(|| {
        let mut nc = Nucleus::new();
        nc.bootstrap();
        SpinLock::new(nc)
    });
}

/// The global nucleus, behind the single kernel lock.
pub fn nucleus() -> &'static SpinLock<Nucleus> {
    NUCLEUS.get().expect("nucleus is not initialized")
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::process::signal::SIGUSR1;
    use crate::process::RecvFrom;
    use crate::sched::PRI_USER;
    use crate::test_util::setup;

    fn nucleus_for_test() -> Nucleus {
        setup();
        let mut nc = Nucleus::new();
        nc.bootstrap();
        nc
    }

    #[test]
    fn bootstrap_creates_the_reserved_pids() {
        let nc = nucleus_for_test();
        for pid in 1..=4 {
            assert!(nc.procs.contains(pid), "pid {} missing after boot", pid);
        }
        assert_eq!(nc.procs.lookup(1).unwrap().ppid, 0);
        assert_eq!(
            nc.procs.lookup(2).unwrap().state,
            ProcState::BlockedReceiving(RecvFrom::Any)
        );
    }

    #[test]
    fn schedule_runs_the_highest_priority_ready_process() {
        let mut nc = nucleus_for_test();
        // init (priority 8) is ready; make a server ready too.
        let vfs = nc.procs.lookup_mut(2).unwrap();
        vfs.state = ProcState::ReadyToRun;
        nc.sched.enqueue(2, 2);
        assert_eq!(nc.schedule(), 2);
        assert_eq!(nc.procs.lookup(2).unwrap().state, ProcState::Running);
        // The running process keeps the CPU until it blocks or expires.
        assert_eq!(nc.schedule(), 2);
    }

    #[test]
    fn quantum_expiry_round_robins() {
        let mut nc = nucleus_for_test();
        let a = nc.spawn(1).unwrap();
        let b = nc.spawn(1).unwrap();
        // Drain init out of the way.
        nc.sched.remove(1);
        assert_eq!(nc.schedule(), a);
        for _ in 0..SCHED_QUANTUM - 1 {
            assert!(!nc.clock_tick());
        }
        assert!(nc.clock_tick());
        assert_eq!(nc.schedule(), b);
        // `a` went to the tail, not away.
        assert_eq!(nc.sched.occurrences(a), 1);
    }

    #[test]
    fn fork_copies_identity_and_wait_reaps() {
        let mut nc = nucleus_for_test();
        let parent = nc.spawn(1).unwrap();
        nc.procs.lookup_mut(parent).unwrap().creds.ruid = 7;
        let child = nc.fork(parent).unwrap();
        let child_pcb = nc.procs.lookup(child).unwrap();
        assert_eq!(child_pcb.ppid, parent);
        assert_eq!(child_pcb.creds.ruid, 7);
        assert_eq!(child_pcb.ctx.syscall_ret(), 0);
        assert_eq!(child_pcb.priority, PRI_USER);

        nc.exit(child, wait_status_from_exit(3));
        assert!(nc.procs.lookup(child).unwrap().state.is_zombie());
        assert_eq!(nc.reap(child), Some(wait_status_from_exit(3)));
        // The pid is reusable afterwards.
        assert_eq!(nc.procs.allocate_pid(), Some(child));
    }

    #[test]
    fn zombies_leave_no_queues_and_no_frames() {
        let mut nc = nucleus_for_test();
        let pid = nc.spawn(1).unwrap();
        let base = {
            let pcb = nc.procs.lookup_mut(pid).unwrap();
            let base = pcb.vm.alloc(PAGE_SIZE).unwrap();
            pcb.vm.write_bytes(base, &[1]).unwrap();
            base
        };
        let _ = base;
        nc.exit(pid, 0);
        let pcb = nc.procs.lookup(pid).unwrap();
        assert_eq!(pcb.vm.area_count(), 0);
        assert_eq!(nc.sched.occurrences(pid), 0);
    }

    #[test]
    fn handler_delivery_builds_and_unwinds_a_frame() {
        let mut nc = nucleus_for_test();
        let pid = nc.spawn(1).unwrap();
        let handler = 0x7100_0000;
        let (stack_top, old_ip) = {
            let pcb = nc.procs.lookup_mut(pid).unwrap();
            let stack = pcb.vm.alloc(4 * PAGE_SIZE).unwrap();
            let top = stack + 4 * PAGE_SIZE;
            pcb.ctx.set_stack_pointer(top);
            pcb.ctx.set_instruction_pointer(0x4000_1234);
            pcb.ctx.set_flags(0x202);
            pcb.sig.dispositions.set(
                SIGUSR1,
                SigAction::Handler {
                    addr: handler,
                    flags: 0,
                    mask: SigSet::empty(),
                },
            );
            (top, 0x4000_1234)
        };

        nc.post_signal(pid, SIGUSR1).unwrap();
        assert_eq!(nc.return_to_user(pid), None);

        let pcb = nc.procs.lookup_mut(pid).unwrap();
        assert_eq!(pcb.ctx.instruction_pointer(), handler);
        assert_eq!(pcb.ctx.stack_pointer(), stack_top - 24);
        assert!(pcb.sig.blocked.contains(SIGUSR1));
        let mut frame = [0u8; 24];
        let sp = pcb.ctx.stack_pointer();
        pcb.vm.read_bytes(sp, &mut frame).unwrap();
        assert_eq!(u64::from_le_bytes(frame[0..8].try_into().unwrap()), SIGUSR1 as u64);
        assert_eq!(
            u64::from_le_bytes(frame[8..16].try_into().unwrap()),
            old_ip as u64
        );

        nc.sigreturn(pid).unwrap();
        let pcb = nc.procs.lookup(pid).unwrap();
        assert_eq!(pcb.ctx.instruction_pointer(), old_ip);
        assert_eq!(pcb.ctx.stack_pointer(), stack_top);
        assert!(!pcb.sig.blocked.contains(SIGUSR1));
    }

    #[test]
    fn default_term_kills_and_kill_is_uncatchable() {
        let mut nc = nucleus_for_test();
        let pid = nc.spawn(1).unwrap();
        nc.procs.lookup_mut(pid).unwrap().sig.dispositions.set(
            SIGKILL,
            SigAction::Ign, // must not stick
        );
        nc.post_signal(pid, SIGKILL).unwrap();
        let status = nc.return_to_user(pid);
        assert_eq!(status, Some(wait_status_from_signal(SIGKILL)));
        assert!(nc.procs.lookup(pid).unwrap().state.is_zombie());
    }

    #[test]
    fn fault_without_mapping_kills_the_process() {
        let mut nc = nucleus_for_test();
        let pid = nc.spawn(1).unwrap();
        let status = nc.page_fault(pid, 0xdead_0000, true);
        assert_eq!(status, Some(wait_status_from_signal(SIGSEGV)));
        assert!(nc.procs.lookup(pid).unwrap().state.is_zombie());
    }
}
