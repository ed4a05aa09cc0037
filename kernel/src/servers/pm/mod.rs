// SPDX-License-Identifier: MPL-2.0

//! The Process Manager (PID 3).
//!
//! The authoritative view of process identities, parentage, credentials
//! and signal policy. The kernel does the mechanics (fork the address
//! space, mark zombies, set pending bits); this server decides who may do
//! what to whom and keeps the family tree. Requests are messages in the
//! 200-299 range.

use crate::ipc::wire::*;
use crate::ipc::{lattice, msg, Message};
use crate::nucleus::{wait_status_from_exit, Nucleus};
use crate::prelude::*;
use crate::process::signal::{valid_signo, SigAction, SIGCHLD, SIGKILL, SIGSTOP};
use crate::process::{Credentials, Pid, INIT_PID, KERNEL_PID, MM_PID, PM_PID, VFS_PID};
use crate::servers::Courier;

/// What a parent blocked in WAIT is waiting for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WaitTarget {
    AnyChild,
    Child(Pid),
}

impl WaitTarget {
    fn matches(&self, pid: Pid) -> bool {
        match self {
            WaitTarget::AnyChild => true,
            WaitTarget::Child(target) => *target == pid,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PmState {
    Alive,
    Zombie(i32),
}

/// Per-process bookkeeping counters.
#[derive(Clone, Copy, Debug, Default)]
struct Rusage {
    forks: u64,
    signals_sent: u64,
}

struct PmProcess {
    ppid: Pid,
    pgid: Pid,
    sid: Pid,
    creds: Credentials,
    state: PmState,
    children: Vec<Pid>,
    rusage: Rusage,
    waiting: Option<WaitTarget>,
}

impl PmProcess {
    fn new(ppid: Pid, pgid: Pid, sid: Pid, creds: Credentials) -> Self {
        PmProcess {
            ppid,
            pgid,
            sid,
            creds,
            state: PmState::Alive,
            children: Vec::new(),
            rusage: Rusage::default(),
            waiting: None,
        }
    }
}

/// The server state machine.
pub struct PmServer {
    table: BTreeMap<Pid, PmProcess>,
}

impl PmServer {
    /// Mirrors the boot processes: init under the kernel, the servers
    /// under init.
    pub fn new() -> Self {
        let mut table = BTreeMap::new();
        table.insert(INIT_PID, PmProcess::new(0, INIT_PID, INIT_PID, Credentials::root()));
        for pid in [VFS_PID, PM_PID, MM_PID] {
            table.insert(pid, PmProcess::new(INIT_PID, pid, pid, Credentials::root()));
            table.get_mut(&INIT_PID).unwrap().children.push(pid);
        }
        PmServer { table }
    }

    /// Handles one request. `None` means no reply now — either the
    /// request never answers (EXIT) or the answer is deferred (WAIT).
    pub fn handle(
        &mut self,
        nc: &mut Nucleus,
        msg: &Message,
        courier: &mut Courier,
    ) -> Option<Message> {
        if msg::is_reply(msg.mtype) {
            return None;
        }
        let caller = msg.source;
        match msg.mtype {
            msg::PROC_DIED => {
                // Only the kernel reports deaths.
                if caller == KERNEL_PID {
                    if let Ok(notice) = msg.decode::<ProcDiedNotice>() {
                        self.do_exit(nc, notice.pid, notice.status, courier);
                    }
                }
                None
            }
            msg::PROC_FORK => Some(self.do_fork(nc, caller, courier)),
            msg::PROC_EXEC => Some(match msg.decode::<ExecRequest>() {
                // The core carries no program loader; the semantics stop
                // at validating the request.
                Ok(req) => match req.path.as_str() {
                    Ok(_) => reply_err(Errno::ENOEXEC),
                    Err(e) => reply_err(e.error()),
                },
                Err(e) => error_reply(e.error()),
            }),
            msg::PROC_EXIT => {
                let code = msg
                    .decode::<ExitRequest>()
                    .map(|req| req.code)
                    .unwrap_or(0);
                self.do_exit(nc, caller, wait_status_from_exit(code), courier);
                None
            }
            msg::PROC_WAIT => match msg.decode::<WaitRequest>() {
                Ok(req) => self.do_wait(nc, caller, req),
                Err(e) => Some(error_reply(e.error())),
            },
            msg::PROC_KILL => Some(match msg.decode::<KillRequest>() {
                Ok(req) => self.do_kill(nc, caller, req),
                Err(e) => error_reply(e.error()),
            }),
            msg::PROC_GETPID => Some(reply_value(caller as i64)),
            msg::PROC_GETPPID => {
                let ppid = self.table.get(&caller).map(|p| p.ppid).unwrap_or(0);
                Some(reply_value(ppid as i64))
            }
            msg::PROC_SETPGID => Some(match msg.decode::<SetpgidRequest>() {
                Ok(req) => self.do_setpgid(nc, caller, req),
                Err(e) => error_reply(e.error()),
            }),
            msg::PROC_GETPGID => Some(match msg.decode::<GetpgidRequest>() {
                Ok(req) => {
                    let pid = if req.pid == 0 { caller } else { req.pid };
                    match self.table.get(&pid) {
                        Some(p) => reply_value(p.pgid as i64),
                        None => reply_err(Errno::ESRCH),
                    }
                }
                Err(e) => error_reply(e.error()),
            }),
            msg::PROC_SETSID => Some(self.do_setsid(nc, caller)),
            msg::PROC_SIGACTION => Some(match msg.decode::<SigactionRequest>() {
                Ok(req) => self.do_sigaction(nc, caller, req),
                Err(e) => error_reply(e.error()),
            }),
            msg::PROC_SIGPROCMASK => Some(match msg.decode::<SigprocmaskRequest>() {
                Ok(req) => self.do_sigprocmask(nc, caller, req),
                Err(e) => error_reply(e.error()),
            }),
            msg::PROC_SIGPENDING => Some(match nc.procs.lookup(caller) {
                Some(pcb) => {
                    let pending = pcb.sig.pending & pcb.sig.blocked;
                    Message::with_payload(msg::PROC_REPLY, &SigsetResponse::ok(pending.bits()))
                }
                None => error_reply(Errno::ESRCH),
            }),
            msg::PROC_SIGRETURN => Some(match nc.sigreturn(caller) {
                Ok(()) => reply_value(0),
                Err(e) => reply_err(e.error()),
            }),
            msg::PROC_GETUID => Some(self.cred_value(caller, |c| c.ruid)),
            msg::PROC_GETEUID => Some(self.cred_value(caller, |c| c.euid)),
            msg::PROC_GETGID => Some(self.cred_value(caller, |c| c.rgid)),
            msg::PROC_GETEGID => Some(self.cred_value(caller, |c| c.egid)),
            msg::PROC_SETUID => Some(match msg.decode::<SetIdRequest>() {
                Ok(req) => self.do_setuid(nc, caller, req.id, courier),
                Err(e) => error_reply(e.error()),
            }),
            msg::PROC_SETGID => Some(match msg.decode::<SetIdRequest>() {
                Ok(req) => self.do_setgid(nc, caller, req.id, courier),
                Err(e) => error_reply(e.error()),
            }),
            _ => Some(error_reply(Errno::ENOSYS)),
        }
    }

    fn cred_value(&self, caller: Pid, f: impl Fn(&Credentials) -> u32) -> Message {
        match self.table.get(&caller) {
            Some(p) => reply_value(f(&p.creds) as i64),
            None => reply_err(Errno::ESRCH),
        }
    }

    /* ---- fork ---- */

    fn do_fork(&mut self, nc: &mut Nucleus, parent: Pid, courier: &mut Courier) -> Message {
        let Some(parent_entry) = self.table.get(&parent) else {
            return reply_err(Errno::ESRCH);
        };
        let (pgid, sid, creds) = (parent_entry.pgid, parent_entry.sid, parent_entry.creds);
        let child = match nc.fork(parent) {
            Ok(child) => child,
            Err(e) => {
                return Message::with_payload(
                    msg::PROC_REPLY,
                    &ForkResponse {
                        child_pid: -1,
                        error: e.error().as_i32(),
                    },
                )
            }
        };
        let mut entry = PmProcess::new(parent, pgid, sid, creds);
        entry.pgid = pgid;
        self.table.insert(child, entry);
        let parent_entry = self.table.get_mut(&parent).unwrap();
        parent_entry.children.push(child);
        parent_entry.rusage.forks += 1;

        // The other servers learn about the child from us.
        courier.post(
            VFS_PID,
            Message::with_payload(
                msg::VFS_INHERIT,
                &InheritRequest {
                    parent,
                    child,
                    uid: creds.euid,
                    gid: creds.egid,
                },
            ),
        );
        courier.post(
            MM_PID,
            Message::with_payload(msg::MM_INHERIT, &MmInheritRequest { parent, child }),
        );

        // The child is a copy of the parent, parked on our reply exactly
        // like the parent: answer both sides.
        let child_reply = Message::with_payload(
            msg::PROC_REPLY,
            &ForkResponse {
                child_pid: 0,
                error: 0,
            },
        );
        let _ = lattice::send(nc, PM_PID, child, &child_reply);
        Message::with_payload(
            msg::PROC_REPLY,
            &ForkResponse {
                child_pid: child,
                error: 0,
            },
        )
    }

    /* ---- exit and wait ---- */

    /// The full death path, also used for kernel-initiated kills. The
    /// status is already in wait encoding.
    pub fn do_exit(&mut self, nc: &mut Nucleus, pid: Pid, status: i32, courier: &mut Courier) {
        let Some(entry) = self.table.get_mut(&pid) else {
            return;
        };
        if entry.state != PmState::Alive {
            return;
        }
        entry.state = PmState::Zombie(status);
        entry.waiting = None;
        let ppid = entry.ppid;
        let orphans = core::mem::take(&mut entry.children);

        nc.exit(pid, status);

        // Orphans go to init.
        for orphan in orphans {
            if let Some(child) = self.table.get_mut(&orphan) {
                child.ppid = INIT_PID;
            }
            if let Some(pcb) = nc.procs.lookup_mut(orphan) {
                pcb.ppid = INIT_PID;
            }
            self.table.get_mut(&INIT_PID).unwrap().children.push(orphan);
        }
        // Newly adopted zombies may satisfy a waiting init.
        self.try_complete_wait(nc, INIT_PID);

        // The other servers drop the dead process's state.
        courier.post(
            VFS_PID,
            Message::with_payload(msg::VFS_RELEASE, &ReleaseRequest::new(pid)),
        );
        courier.post(
            MM_PID,
            Message::with_payload(msg::MM_RELEASE, &MmReleaseRequest::new(pid)),
        );

        let _ = nc.post_signal(ppid, SIGCHLD);
        self.try_complete_wait(nc, ppid);
    }

    fn do_wait(&mut self, nc: &mut Nucleus, caller: Pid, req: WaitRequest) -> Option<Message> {
        let target = match req.target {
            -1 => WaitTarget::AnyChild,
            pid if pid > 0 => WaitTarget::Child(pid),
            _ => return Some(Message::with_payload(msg::PROC_REPLY, &WaitResponse::err(Errno::EINVAL))),
        };
        let Some(entry) = self.table.get(&caller) else {
            return Some(Message::with_payload(msg::PROC_REPLY, &WaitResponse::err(Errno::ESRCH)));
        };
        let has_candidate = match target {
            WaitTarget::AnyChild => !entry.children.is_empty(),
            WaitTarget::Child(pid) => entry.children.contains(&pid),
        };
        if !has_candidate {
            return Some(Message::with_payload(msg::PROC_REPLY, &WaitResponse::err(Errno::ECHILD)));
        }
        if let Some((pid, status)) = self.find_zombie_child(caller, target) {
            self.reap(nc, caller, pid);
            return Some(Message::with_payload(msg::PROC_REPLY, &WaitResponse::ok(pid, status)));
        }
        if req.options & WNOHANG != 0 {
            return Some(Message::with_payload(msg::PROC_REPLY, &WaitResponse::ok(0, 0)));
        }
        // Nothing yet: leave the caller blocked on our reply until a
        // child exits.
        self.table.get_mut(&caller).unwrap().waiting = Some(target);
        None
    }

    fn find_zombie_child(&self, parent: Pid, target: WaitTarget) -> Option<(Pid, i32)> {
        let entry = self.table.get(&parent)?;
        entry.children.iter().find_map(|&child| {
            if !target.matches(child) {
                return None;
            }
            match self.table.get(&child)?.state {
                PmState::Zombie(status) => Some((child, status)),
                PmState::Alive => None,
            }
        })
    }

    /// Removes a reaped child from the mirror and the kernel. Its PID is
    /// reusable afterwards.
    fn reap(&mut self, nc: &mut Nucleus, parent: Pid, child: Pid) {
        self.table.remove(&child);
        if let Some(entry) = self.table.get_mut(&parent) {
            entry.children.retain(|&c| c != child);
        }
        nc.reap(child);
    }

    /// Answers a parent whose WAIT was deferred, if a matching zombie
    /// now exists.
    fn try_complete_wait(&mut self, nc: &mut Nucleus, parent: Pid) {
        let Some(target) = self.table.get(&parent).and_then(|e| e.waiting) else {
            return;
        };
        let Some((pid, status)) = self.find_zombie_child(parent, target) else {
            return;
        };
        self.table.get_mut(&parent).unwrap().waiting = None;
        self.reap(nc, parent, pid);
        let reply = Message::with_payload(msg::PROC_REPLY, &WaitResponse::ok(pid, status));
        let _ = lattice::send(nc, PM_PID, parent, &reply);
    }

    /* ---- signals ---- */

    fn do_kill(&mut self, nc: &mut Nucleus, caller: Pid, req: KillRequest) -> Message {
        let signo = match valid_signo(req.signo) {
            Ok(signo) => signo,
            Err(e) => return reply_err(e.error()),
        };
        let Some(sender) = self.table.get(&caller) else {
            return reply_err(Errno::ESRCH);
        };
        let Some(target) = self.table.get(&req.pid) else {
            return reply_err(Errno::ESRCH);
        };
        if target.state != PmState::Alive {
            return reply_err(Errno::ESRCH);
        }
        // An unprivileged sender may only signal its own user's
        // processes.
        let allowed = sender.creds.is_superuser()
            || sender.creds.ruid == target.creds.ruid
            || sender.creds.euid == target.creds.ruid;
        if !allowed {
            return reply_err(Errno::EPERM);
        }
        match nc.post_signal(req.pid, signo) {
            Ok(()) => {
                self.table.get_mut(&caller).unwrap().rusage.signals_sent += 1;
                reply_value(0)
            }
            Err(e) => reply_err(e.error()),
        }
    }

    fn do_sigaction(&mut self, nc: &mut Nucleus, caller: Pid, req: SigactionRequest) -> Message {
        let signo = match valid_signo(req.signo) {
            Ok(signo) => signo,
            Err(e) => {
                return Message::with_payload(msg::PROC_REPLY, &SigactionResponse::err(e.error()))
            }
        };
        if signo == SIGKILL || signo == SIGSTOP {
            return Message::with_payload(msg::PROC_REPLY, &SigactionResponse::err(Errno::EINVAL));
        }
        let Some(pcb) = nc.procs.lookup_mut(caller) else {
            return Message::with_payload(msg::PROC_REPLY, &SigactionResponse::err(Errno::ESRCH));
        };
        let action = SigAction::from_wire(req.handler, req.flags, req.mask);
        let old = pcb.sig.dispositions.set(signo, action);
        Message::with_payload(msg::PROC_REPLY, &SigactionResponse::ok(old.to_wire()))
    }

    fn do_sigprocmask(&mut self, nc: &mut Nucleus, caller: Pid, req: SigprocmaskRequest) -> Message {
        let Some(pcb) = nc.procs.lookup_mut(caller) else {
            return Message::with_payload(msg::PROC_REPLY, &SigsetResponse::err(Errno::ESRCH));
        };
        let old = pcb.sig.blocked;
        let mut set = crate::process::signal::SigSet::from_bits(req.set);
        // SIGKILL and SIGSTOP are unblockable.
        set.remove(SIGKILL);
        set.remove(SIGSTOP);
        match req.how {
            SIG_BLOCK => pcb.sig.blocked |= set,
            SIG_UNBLOCK => pcb.sig.blocked -= set,
            SIG_SETMASK => pcb.sig.blocked = set,
            _ => {
                return Message::with_payload(msg::PROC_REPLY, &SigsetResponse::err(Errno::EINVAL))
            }
        }
        Message::with_payload(msg::PROC_REPLY, &SigsetResponse::ok(old.bits()))
    }

    /* ---- identity ---- */

    fn do_setpgid(&mut self, nc: &mut Nucleus, caller: Pid, req: SetpgidRequest) -> Message {
        let pid = if req.pid == 0 { caller } else { req.pid };
        let pgid = if req.pgid == 0 { pid } else { req.pgid };
        if pgid < 0 {
            return reply_err(Errno::EINVAL);
        }
        let is_self = pid == caller;
        let is_child = self
            .table
            .get(&caller)
            .is_some_and(|e| e.children.contains(&pid));
        if !is_self && !is_child {
            return reply_err(Errno::ESRCH);
        }
        let Some(entry) = self.table.get_mut(&pid) else {
            return reply_err(Errno::ESRCH);
        };
        entry.pgid = pgid;
        if let Some(pcb) = nc.procs.lookup_mut(pid) {
            pcb.pgid = pgid;
        }
        reply_value(0)
    }

    fn do_setsid(&mut self, nc: &mut Nucleus, caller: Pid) -> Message {
        let Some(entry) = self.table.get_mut(&caller) else {
            return reply_err(Errno::ESRCH);
        };
        if entry.pgid == caller {
            // A group leader may not abandon its group.
            return reply_err(Errno::EPERM);
        }
        entry.pgid = caller;
        entry.sid = caller;
        if let Some(pcb) = nc.procs.lookup_mut(caller) {
            pcb.pgid = caller;
            pcb.sid = caller;
        }
        reply_value(caller as i64)
    }

    fn do_setuid(
        &mut self,
        nc: &mut Nucleus,
        caller: Pid,
        uid: u32,
        courier: &mut Courier,
    ) -> Message {
        let Some(entry) = self.table.get_mut(&caller) else {
            return reply_err(Errno::ESRCH);
        };
        if !entry.creds.is_superuser() && uid != entry.creds.ruid {
            return reply_err(Errno::EPERM);
        }
        entry.creds.ruid = uid;
        entry.creds.euid = uid;
        let creds = entry.creds;
        if let Some(pcb) = nc.procs.lookup_mut(caller) {
            pcb.creds = creds;
        }
        courier.post(
            VFS_PID,
            Message::with_payload(
                msg::VFS_SETCREDS,
                &SetCredsRequest::new(caller, creds.euid, creds.egid),
            ),
        );
        reply_value(0)
    }

    fn do_setgid(
        &mut self,
        nc: &mut Nucleus,
        caller: Pid,
        gid: u32,
        courier: &mut Courier,
    ) -> Message {
        let Some(entry) = self.table.get_mut(&caller) else {
            return reply_err(Errno::ESRCH);
        };
        if !entry.creds.is_superuser() && gid != entry.creds.rgid {
            return reply_err(Errno::EPERM);
        }
        entry.creds.rgid = gid;
        entry.creds.egid = gid;
        let creds = entry.creds;
        if let Some(pcb) = nc.procs.lookup_mut(caller) {
            pcb.creds = creds;
        }
        courier.post(
            VFS_PID,
            Message::with_payload(
                msg::VFS_SETCREDS,
                &SetCredsRequest::new(caller, creds.euid, creds.egid),
            ),
        );
        reply_value(0)
    }
}

impl Default for PmServer {
    fn default() -> Self {
        Self::new()
    }
}

fn reply_value(value: i64) -> Message {
    Message::with_payload(msg::PROC_REPLY, &GenericResponse::ok(value))
}

fn reply_err(errno: Errno) -> Message {
    Message::with_payload(msg::PROC_REPLY, &GenericResponse::err(errno))
}

fn error_reply(errno: Errno) -> Message {
    Message::with_payload(msg::PROC_ERROR, &GenericResponse::err(errno))
}
