// SPDX-License-Identifier: MPL-2.0

//! End-to-end scenarios: user processes talking to the servers over the
//! Lattice IPC, with the pump standing in for the scheduler's turns.

use super::*;
use crate::ipc::wire::*;
use crate::ipc::{lattice, msg, Message};
use crate::nucleus::{wait_status_from_exit, wait_status_from_signal, Nucleus};
use crate::process::signal::{SigSet, SIGKILL, SIGUSR1};
use crate::process::{Pid, ProcState, INIT_PID, MM_PID, PM_PID, VFS_PID};
use crate::test_util::setup;

fn boot() -> (Nucleus, Servers) {
    setup();
    let mut nc = Nucleus::new();
    nc.bootstrap();
    (nc, Servers::new())
}

/// Issues `sendrec` for `caller` and pumps until its reply is in. Panics
/// if the request never completes — deferred replies use [`defer`].
fn ask(nc: &mut Nucleus, servers: &mut Servers, caller: Pid, dst: Pid, req: &Message) -> Message {
    lattice::sendrec(nc, caller, dst, req).expect("request refused");
    pump(nc, servers);
    let pcb = nc.procs.lookup_mut(caller).expect("caller vanished");
    assert!(pcb.msg_ready, "no reply for {} from {}", caller, dst);
    pcb.msg_ready = false;
    pcb.msg_buf
}

/// Issues `sendrec` expecting no immediate reply (WAIT without zombies).
fn defer(nc: &mut Nucleus, servers: &mut Servers, caller: Pid, dst: Pid, req: &Message) {
    lattice::sendrec(nc, caller, dst, req).expect("request refused");
    pump(nc, servers);
    let pcb = nc.procs.lookup(caller).expect("caller vanished");
    assert!(!pcb.msg_ready);
    assert_eq!(pcb.state, ProcState::BlockedOnReply(dst));
}

/// Forks a child of `parent` through the PM and returns its PID.
fn fork_child(nc: &mut Nucleus, servers: &mut Servers, parent: Pid) -> Pid {
    let reply = ask(nc, servers, parent, PM_PID, &Message::new(msg::PROC_FORK));
    let resp: ForkResponse = reply.decode().unwrap();
    assert_eq!(resp.error, 0, "fork failed");
    assert!(resp.child_pid > 0);
    // The child got its own zero-valued reply.
    let child = resp.child_pid;
    let pcb = nc.procs.lookup_mut(child).unwrap();
    assert!(pcb.msg_ready);
    let child_resp: ForkResponse = pcb.msg_buf.decode().unwrap();
    assert_eq!(child_resp.child_pid, 0);
    pcb.msg_ready = false;
    child
}

fn exit_process(nc: &mut Nucleus, servers: &mut Servers, pid: Pid, code: i32) {
    let req = Message::with_payload(msg::PROC_EXIT, &ExitRequest::new(code));
    // EXIT never answers; a plain send is all a dying process needs.
    let _ = lattice::send(nc, pid, PM_PID, &req);
    pump(nc, servers);
}

#[test]
fn fork_exit_wait_parity() {
    let (mut nc, mut servers) = boot();
    let child = fork_child(&mut nc, &mut servers, INIT_PID);

    exit_process(&mut nc, &mut servers, child, 7);
    let reply = ask(
        &mut nc,
        &mut servers,
        INIT_PID,
        PM_PID,
        &Message::with_payload(msg::PROC_WAIT, &WaitRequest { target: child, options: 0 }),
    );
    let resp: WaitResponse = reply.decode().unwrap();
    assert_eq!(resp.pid, child);
    assert_eq!(resp.status, wait_status_from_exit(7));
    // The PID is gone from both tables and reusable.
    assert!(!nc.procs.contains(child));
    assert_eq!(nc.procs.allocate_pid(), Some(child));
}

#[test]
fn wait_blocks_until_a_child_exits() {
    let (mut nc, mut servers) = boot();
    let child = fork_child(&mut nc, &mut servers, INIT_PID);

    defer(
        &mut nc,
        &mut servers,
        INIT_PID,
        PM_PID,
        &Message::with_payload(msg::PROC_WAIT, &WaitRequest { target: -1, options: 0 }),
    );

    exit_process(&mut nc, &mut servers, child, 0);
    let pcb = nc.procs.lookup_mut(INIT_PID).unwrap();
    assert!(pcb.msg_ready, "deferred wait reply never arrived");
    let resp: WaitResponse = pcb.msg_buf.decode().unwrap();
    assert_eq!(resp.pid, child);
    assert_eq!(resp.status, wait_status_from_exit(0));
}

#[test]
fn kernel_kills_reach_the_parent_through_wait() {
    let (mut nc, mut servers) = boot();
    let child = fork_child(&mut nc, &mut servers, INIT_PID);

    defer(
        &mut nc,
        &mut servers,
        INIT_PID,
        PM_PID,
        &Message::with_payload(msg::PROC_WAIT, &WaitRequest { target: -1, options: 0 }),
    );

    // An uncatchable signal takes the child down at its next return to
    // user mode; the PM hears about it from the kernel.
    nc.post_signal(child, SIGKILL).unwrap();
    assert_eq!(
        nc.return_to_user(child),
        Some(wait_status_from_signal(SIGKILL))
    );
    pump(&mut nc, &mut servers);

    let pcb = nc.procs.lookup_mut(INIT_PID).unwrap();
    assert!(pcb.msg_ready, "parent never learned about the kill");
    let resp: WaitResponse = pcb.msg_buf.decode().unwrap();
    pcb.msg_ready = false;
    assert_eq!(resp.pid, child);
    assert_eq!(resp.status, wait_status_from_signal(SIGKILL));
}

#[test]
fn wait_with_wnohang_returns_zero() {
    let (mut nc, mut servers) = boot();
    let child = fork_child(&mut nc, &mut servers, INIT_PID);
    let reply = ask(
        &mut nc,
        &mut servers,
        INIT_PID,
        PM_PID,
        &Message::with_payload(
            msg::PROC_WAIT,
            &WaitRequest { target: -1, options: WNOHANG },
        ),
    );
    let resp: WaitResponse = reply.decode().unwrap();
    assert_eq!(resp.pid, 0);
    let _ = child;
}

#[test]
fn wait_without_children_is_echild() {
    let (mut nc, mut servers) = boot();
    let child = fork_child(&mut nc, &mut servers, INIT_PID);
    let reply = ask(
        &mut nc,
        &mut servers,
        child,
        PM_PID,
        &Message::with_payload(msg::PROC_WAIT, &WaitRequest { target: -1, options: 0 }),
    );
    let resp: WaitResponse = reply.decode().unwrap();
    assert_eq!(Errno::from_wire(resp.error), Some(Errno::ECHILD));
}

#[test]
fn orphans_are_reparented_to_init() {
    let (mut nc, mut servers) = boot();
    let parent = fork_child(&mut nc, &mut servers, INIT_PID);
    let grandchild = fork_child(&mut nc, &mut servers, parent);

    exit_process(&mut nc, &mut servers, parent, 0);
    assert_eq!(nc.procs.lookup(grandchild).unwrap().ppid, INIT_PID);

    // Init can reap both: its own child and the adopted orphan.
    for _ in 0..2 {
        let reply = ask(
            &mut nc,
            &mut servers,
            INIT_PID,
            PM_PID,
            &Message::with_payload(
                msg::PROC_WAIT,
                &WaitRequest { target: -1, options: WNOHANG },
            ),
        );
        let resp: WaitResponse = reply.decode().unwrap();
        if resp.pid == parent {
            continue;
        }
        if resp.pid == 0 {
            // The grandchild is still alive; finish it and reap.
            exit_process(&mut nc, &mut servers, grandchild, 1);
        }
    }
    let reply = ask(
        &mut nc,
        &mut servers,
        INIT_PID,
        PM_PID,
        &Message::with_payload(
            msg::PROC_WAIT,
            &WaitRequest { target: grandchild, options: 0 },
        ),
    );
    let resp: WaitResponse = reply.decode().unwrap();
    assert_eq!(resp.pid, grandchild);
}

#[test]
fn fork_and_diverge_with_cow() {
    let (mut nc, mut servers) = boot();
    let parent = fork_child(&mut nc, &mut servers, INIT_PID);

    // The parent maps one writable page and stamps it.
    let base = {
        let pcb = nc.procs.lookup_mut(parent).unwrap();
        let base = pcb.vm.alloc(PAGE_SIZE).unwrap();
        pcb.vm.write_bytes(base, &[0x42]).unwrap();
        base
    };

    let child = fork_child(&mut nc, &mut servers, parent);

    // The child overwrites its copy and exits.
    {
        let pcb = nc.procs.lookup_mut(child).unwrap();
        pcb.vm.write_bytes(base, &[0x99]).unwrap();
    }
    exit_process(&mut nc, &mut servers, child, 0);

    let reply = ask(
        &mut nc,
        &mut servers,
        parent,
        PM_PID,
        &Message::with_payload(msg::PROC_WAIT, &WaitRequest { target: child, options: 0 }),
    );
    let resp: WaitResponse = reply.decode().unwrap();
    assert_eq!((resp.pid, resp.status), (child, wait_status_from_exit(0)));

    // The parent still sees its own byte.
    let mut b = [0u8];
    nc.procs
        .lookup_mut(parent)
        .unwrap()
        .vm
        .read_bytes(base, &mut b)
        .unwrap();
    assert_eq!(b[0], 0x42);
}

#[test]
fn getpid_and_identity_calls() {
    let (mut nc, mut servers) = boot();
    let child = fork_child(&mut nc, &mut servers, INIT_PID);

    let reply = ask(&mut nc, &mut servers, child, PM_PID, &Message::new(msg::PROC_GETPID));
    assert_eq!(reply.decode::<GenericResponse>().unwrap().value, child as i64);
    let reply = ask(&mut nc, &mut servers, child, PM_PID, &Message::new(msg::PROC_GETPPID));
    assert_eq!(reply.decode::<GenericResponse>().unwrap().value, INIT_PID as i64);
    let reply = ask(&mut nc, &mut servers, child, PM_PID, &Message::new(msg::PROC_GETUID));
    assert_eq!(reply.decode::<GenericResponse>().unwrap().value, 0);
}

#[test]
fn setuid_drops_privilege_and_limits_kill() {
    let (mut nc, mut servers) = boot();
    let p1 = fork_child(&mut nc, &mut servers, INIT_PID);

    let reply = ask(
        &mut nc,
        &mut servers,
        p1,
        PM_PID,
        &Message::with_payload(msg::PROC_SETUID, &SetIdRequest::new(1000)),
    );
    assert_eq!(reply.decode::<GenericResponse>().unwrap().error, 0);
    assert_eq!(nc.procs.lookup(p1).unwrap().creds.euid, 1000);

    // Unprivileged now: no setuid back, no signalling root's processes.
    let reply = ask(
        &mut nc,
        &mut servers,
        p1,
        PM_PID,
        &Message::with_payload(msg::PROC_SETUID, &SetIdRequest::new(0)),
    );
    assert_eq!(
        Errno::from_wire(reply.decode::<GenericResponse>().unwrap().error),
        Some(Errno::EPERM)
    );
    let reply = ask(
        &mut nc,
        &mut servers,
        p1,
        PM_PID,
        &Message::with_payload(msg::PROC_KILL, &KillRequest { pid: INIT_PID, signo: 15 }),
    );
    assert_eq!(
        Errno::from_wire(reply.decode::<GenericResponse>().unwrap().error),
        Some(Errno::EPERM)
    );
}

#[test]
fn signal_handler_round_trip_through_pm() {
    let (mut nc, mut servers) = boot();
    let p1 = fork_child(&mut nc, &mut servers, INIT_PID);
    let p2 = fork_child(&mut nc, &mut servers, INIT_PID);
    let handler = 0x7200_0000u64;

    // P1 installs a handler and sets up a stack.
    let reply = ask(
        &mut nc,
        &mut servers,
        p1,
        PM_PID,
        &Message::with_payload(
            msg::PROC_SIGACTION,
            &SigactionRequest {
                handler,
                mask: 0,
                signo: SIGUSR1 as i32,
                flags: 0,
            },
        ),
    );
    let resp: SigactionResponse = reply.decode().unwrap();
    assert_eq!(resp.error, 0);
    assert_eq!(resp.old_handler, SIG_DFL);
    let (stack_top, old_ip) = {
        let pcb = nc.procs.lookup_mut(p1).unwrap();
        let stack = pcb.vm.alloc(4 * PAGE_SIZE).unwrap();
        let top = stack + 4 * PAGE_SIZE;
        pcb.ctx.set_stack_pointer(top);
        pcb.ctx.set_instruction_pointer(0x4000_0000);
        (top, 0x4000_0000)
    };

    // P2 signals P1.
    let reply = ask(
        &mut nc,
        &mut servers,
        p2,
        PM_PID,
        &Message::with_payload(
            msg::PROC_KILL,
            &KillRequest { pid: p1, signo: SIGUSR1 as i32 },
        ),
    );
    assert_eq!(reply.decode::<GenericResponse>().unwrap().error, 0);

    // On P1's next return to user mode the handler runs.
    assert_eq!(nc.return_to_user(p1), None);
    assert_eq!(nc.procs.lookup(p1).unwrap().ctx.instruction_pointer(), handler as usize);

    // Sigreturn resumes exactly where P1 was headed.
    let reply = ask(&mut nc, &mut servers, p1, PM_PID, &Message::new(msg::PROC_SIGRETURN));
    assert_eq!(reply.decode::<GenericResponse>().unwrap().error, 0);
    let pcb = nc.procs.lookup(p1).unwrap();
    assert_eq!(pcb.ctx.instruction_pointer(), old_ip);
    assert_eq!(pcb.ctx.stack_pointer(), stack_top);
}

#[test]
fn sigprocmask_defers_and_sigpending_reports() {
    let (mut nc, mut servers) = boot();
    let p1 = fork_child(&mut nc, &mut servers, INIT_PID);

    let block = SigSet::from(SIGUSR1);
    let reply = ask(
        &mut nc,
        &mut servers,
        p1,
        PM_PID,
        &Message::with_payload(
            msg::PROC_SIGPROCMASK,
            &SigprocmaskRequest::new(SIG_BLOCK, block.bits()),
        ),
    );
    assert_eq!(reply.decode::<SigsetResponse>().unwrap().error, 0);

    nc.post_signal(p1, SIGUSR1).unwrap();
    // Blocked: delivery does nothing, the bit shows in sigpending.
    assert_eq!(nc.return_to_user(p1), None);
    assert!(nc.procs.lookup(p1).unwrap().sig.pending.contains(SIGUSR1));
    let reply = ask(&mut nc, &mut servers, p1, PM_PID, &Message::new(msg::PROC_SIGPENDING));
    let resp: SigsetResponse = reply.decode().unwrap();
    assert!(SigSet::from_bits(resp.set).contains(SIGUSR1));
}

#[test]
fn exec_reports_enoexec() {
    let (mut nc, mut servers) = boot();
    let child = fork_child(&mut nc, &mut servers, INIT_PID);
    let reply = ask(
        &mut nc,
        &mut servers,
        child,
        PM_PID,
        &Message::with_payload(
            msg::PROC_EXEC,
            &ExecRequest {
                argc: 1,
                envc: 0,
                path: InlinePath::new("/bin/sh").unwrap(),
            },
        ),
    );
    assert_eq!(
        Errno::from_wire(reply.decode::<GenericResponse>().unwrap().error),
        Some(Errno::ENOEXEC)
    );
}

#[test]
fn exiting_processes_lose_their_descriptors() {
    let (mut nc, mut servers) = boot();
    let child = fork_child(&mut nc, &mut servers, INIT_PID);

    let open = Message::with_payload(
        msg::VFS_OPEN,
        &OpenRequest {
            flags: O_CREAT | O_RDWR,
            mode: 0o644,
            path: InlinePath::new("/tmp/held").unwrap(),
        },
    );
    let reply = ask(&mut nc, &mut servers, child, VFS_PID, &open);
    let fd = reply.decode::<GenericResponse>().unwrap().value as i32;
    assert!(fd >= 3);

    // Death reaches the VFS through the PM's release notice.
    exit_process(&mut nc, &mut servers, child, 0);
    let read = Message::with_payload(msg::VFS_READ, &ReadRequest { offset: 0, count: 1, fd });
    let reply = ask(&mut nc, &mut servers, INIT_PID, VFS_PID, &read);
    let resp: ReadResponse = reply.decode().unwrap();
    // Init never had the descriptor, and the child's table is gone: the
    // fd resolves for nobody.
    assert_eq!(Errno::from_wire(resp.error), Some(Errno::EBADF));
    assert!(!servers.vfs_has_state_for(child));
}

#[test]
fn brk_and_getpagesize() {
    let (mut nc, mut servers) = boot();
    let child = fork_child(&mut nc, &mut servers, INIT_PID);

    let reply = ask(
        &mut nc,
        &mut servers,
        child,
        MM_PID,
        &Message::with_payload(msg::MM_BRK, &BrkRequest { brk: 0 }),
    );
    let resp: BrkResponse = reply.decode().unwrap();
    let base = resp.brk;

    let reply = ask(
        &mut nc,
        &mut servers,
        child,
        MM_PID,
        &Message::with_payload(msg::MM_BRK, &BrkRequest { brk: base + 64 }),
    );
    let resp: BrkResponse = reply.decode().unwrap();
    assert_eq!(resp.brk, base + 64);
    // The grown heap is writable memory.
    nc.procs
        .lookup_mut(child)
        .unwrap()
        .vm
        .write_bytes(base as usize, &[1, 2, 3])
        .unwrap();

    let reply = ask(&mut nc, &mut servers, child, MM_PID, &Message::new(msg::MM_GETPAGESIZE));
    assert_eq!(
        reply.decode::<GenericResponse>().unwrap().value,
        PAGE_SIZE as i64
    );
}

#[test]
fn mmap_fixed_conflicts_and_munmap() {
    let (mut nc, mut servers) = boot();
    let child = fork_child(&mut nc, &mut servers, INIT_PID);

    let reply = ask(
        &mut nc,
        &mut servers,
        child,
        MM_PID,
        &Message::with_payload(
            msg::MM_MMAP,
            &MmapRequest::anonymous(0, 3 * PAGE_SIZE as u64, PROT_READ | PROT_WRITE, MAP_PRIVATE),
        ),
    );
    let resp: MmapResponse = reply.decode().unwrap();
    assert_eq!(resp.error, 0);
    let base = resp.addr;
    assert_eq!(base as usize % PAGE_SIZE, 0);

    // MAP_FIXED over the same range must refuse.
    let reply = ask(
        &mut nc,
        &mut servers,
        child,
        MM_PID,
        &Message::with_payload(
            msg::MM_MMAP,
            &MmapRequest::anonymous(
                base,
                PAGE_SIZE as u64,
                PROT_READ,
                MAP_PRIVATE | MAP_FIXED,
            ),
        ),
    );
    let resp: MmapResponse = reply.decode().unwrap();
    assert_eq!(Errno::from_wire(resp.error), Some(Errno::ENOMEM));

    let reply = ask(
        &mut nc,
        &mut servers,
        child,
        MM_PID,
        &Message::with_payload(
            msg::MM_MUNMAP,
            &MunmapRequest { addr: base, length: 3 * PAGE_SIZE as u64 },
        ),
    );
    assert_eq!(reply.decode::<GenericResponse>().unwrap().error, 0);
    // Now the fixed mapping fits.
    let reply = ask(
        &mut nc,
        &mut servers,
        child,
        MM_PID,
        &Message::with_payload(
            msg::MM_MMAP,
            &MmapRequest::anonymous(base, PAGE_SIZE as u64, PROT_READ, MAP_PRIVATE | MAP_FIXED),
        ),
    );
    let resp: MmapResponse = reply.decode().unwrap();
    assert_eq!(resp.addr, base);
}

#[test]
fn shared_memory_scenario() {
    let (mut nc, mut servers) = boot();
    let p1 = fork_child(&mut nc, &mut servers, INIT_PID);
    let p2 = fork_child(&mut nc, &mut servers, INIT_PID);

    let reply = ask(
        &mut nc,
        &mut servers,
        p1,
        MM_PID,
        &Message::with_payload(
            msg::MM_SHMGET,
            &ShmgetRequest { size: 8192, key: 42, flags: IPC_CREAT | 0o600 },
        ),
    );
    let resp: ShmgetResponse = reply.decode().unwrap();
    assert_eq!(resp.error, 0);
    let shmid = resp.shmid;

    let reply = ask(
        &mut nc,
        &mut servers,
        p1,
        MM_PID,
        &Message::with_payload(msg::MM_SHMAT, &ShmatRequest { addr: 0, shmid, flags: 0 }),
    );
    let resp: MmapResponse = reply.decode().unwrap();
    assert_eq!(resp.error, 0);
    let addr1 = resp.addr as usize;

    // Same key, same segment for P2.
    let reply = ask(
        &mut nc,
        &mut servers,
        p2,
        MM_PID,
        &Message::with_payload(
            msg::MM_SHMGET,
            &ShmgetRequest { size: 8192, key: 42, flags: 0 },
        ),
    );
    assert_eq!(reply.decode::<ShmgetResponse>().unwrap().shmid, shmid);

    let reply = ask(
        &mut nc,
        &mut servers,
        p2,
        MM_PID,
        &Message::with_payload(msg::MM_SHMAT, &ShmatRequest { addr: 0, shmid, flags: 0 }),
    );
    let addr2 = reply.decode::<MmapResponse>().unwrap().addr as usize;
    assert_eq!(servers.mm.attach_count(shmid), Some(2));

    // A byte written by P1 is visible to P2.
    nc.procs
        .lookup_mut(p1)
        .unwrap()
        .vm
        .write_bytes(addr1 + 5, &[0xab])
        .unwrap();
    let mut b = [0u8];
    nc.procs
        .lookup_mut(p2)
        .unwrap()
        .vm
        .read_bytes(addr2 + 5, &mut b)
        .unwrap();
    assert_eq!(b[0], 0xab);

    for (pid, addr) in [(p1, addr1), (p2, addr2)] {
        let reply = ask(
            &mut nc,
            &mut servers,
            pid,
            MM_PID,
            &Message::with_payload(msg::MM_SHMDT, &ShmdtRequest { addr: addr as u64 }),
        );
        assert_eq!(reply.decode::<GenericResponse>().unwrap().error, 0);
    }
    assert_eq!(servers.mm.attach_count(shmid), Some(0));

    // Removal needs the owner; then the empty segment disappears.
    let reply = ask(
        &mut nc,
        &mut servers,
        p1,
        MM_PID,
        &Message::with_payload(msg::MM_SHMCTL, &ShmctlRequest { shmid, cmd: IPC_RMID }),
    );
    assert_eq!(reply.decode::<GenericResponse>().unwrap().error, 0);
    assert_eq!(servers.mm.attach_count(shmid), None);
}

#[test]
fn declared_but_unimplemented_mm_requests_say_enosys() {
    let (mut nc, mut servers) = boot();
    let child = fork_child(&mut nc, &mut servers, INIT_PID);
    for mtype in [msg::MM_MSYNC, msg::MM_MLOCK, msg::MM_MADVISE] {
        let reply = ask(&mut nc, &mut servers, child, MM_PID, &Message::new(mtype));
        assert_eq!(
            Errno::from_wire(reply.decode::<GenericResponse>().unwrap().error),
            Some(Errno::ENOSYS)
        );
    }
}
