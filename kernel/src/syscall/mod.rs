// SPDX-License-Identifier: MPL-2.0

//! The fast-syscall surface.
//!
//! A user process traps in with three registers: the target PID, a
//! pointer to its message buffer, and the operation code. Everything it
//! can ask for is one of the three Lattice IPC operations; the servers do
//! the rest.

use lattice_frame::arch::syscall::set_syscall_handler;
use zerocopy::{FromBytes, IntoBytes};

use crate::ipc::{lattice, IpcOutcome, Message, RecvFrom, MESSAGE_SIZE};
use crate::nucleus::{self, Nucleus};
use crate::prelude::*;
use crate::process::{Pid, ANY};
use crate::servers::{self, Servers};

/// Operation codes of the fast-syscall ABI.
pub const SEND: u64 = 1;
pub const RECEIVE: u64 = 2;
pub const SENDREC: u64 = 3;

/// Registers the ABI entry with the trap machinery. Called once at boot.
pub fn init() {
    set_syscall_handler(syscall_entry);
}

fn syscall_entry(target: u64, msg_ptr: u64, op: u64) -> isize {
    let mut nc = nucleus::nucleus().lock_irq_disabled();
    let mut srv = servers::servers().lock();
    let caller = nc.sched.current();
    dispatch(&mut nc, &mut srv, caller, op, target as i64 as Pid, msg_ptr as Vaddr)
}

/// The operation demultiplexer. Returns the value for the caller's rax:
/// zero or a negative errno. A blocked caller gets its real result
/// written into its saved context when the rendezvous completes.
pub fn dispatch(
    nc: &mut Nucleus,
    servers: &mut Servers,
    caller: Pid,
    op: u64,
    target: Pid,
    msg_ptr: Vaddr,
) -> isize {
    let result = operate(nc, caller, op, target, msg_ptr);
    // Give the servers their turn; most requests complete right here.
    servers::pump(nc, servers);
    let _ = copy_out_message(nc, caller);
    match result {
        Err(e) => -(e.error().as_i32() as isize),
        Ok(IpcOutcome::Done) => 0,
        Ok(IpcOutcome::Blocked) => {
            // If the pump already finished the rendezvous, the saved
            // context has the result; report it through rax as well.
            match nc.procs.lookup(caller) {
                Some(pcb) if pcb.state.is_runnable() => pcb.ctx.syscall_ret() as isize,
                _ => 0,
            }
        }
    }
}

fn operate(
    nc: &mut Nucleus,
    caller: Pid,
    op: u64,
    target: Pid,
    msg_ptr: Vaddr,
) -> Result<IpcOutcome> {
    match op {
        SEND => {
            let msg = read_user_message(nc, caller, msg_ptr)?;
            lattice::send(nc, caller, target, &msg)
        }
        RECEIVE => {
            let src = if target == ANY {
                RecvFrom::Any
            } else {
                RecvFrom::Pid(target)
            };
            set_recv_buf(nc, caller, msg_ptr)?;
            lattice::receive(nc, caller, src)
        }
        SENDREC => {
            let msg = read_user_message(nc, caller, msg_ptr)?;
            set_recv_buf(nc, caller, msg_ptr)?;
            lattice::sendrec(nc, caller, target, &msg)
        }
        _ => Err(Error::with_message(Errno::EBADCALL, "unknown operation code")),
    }
}

fn read_user_message(nc: &mut Nucleus, caller: Pid, msg_ptr: Vaddr) -> Result<Message> {
    let pcb = nc
        .procs
        .lookup_mut(caller)
        .ok_or_else(|| Error::new(Errno::ESRCH))?;
    let mut bytes = [0u8; MESSAGE_SIZE];
    pcb.vm.read_bytes(msg_ptr, &mut bytes)?;
    Message::read_from_bytes(&bytes)
        .map_err(|_| Error::with_message(Errno::EBADCALL, "short message buffer"))
}

fn set_recv_buf(nc: &mut Nucleus, caller: Pid, msg_ptr: Vaddr) -> Result<()> {
    let pcb = nc
        .procs
        .lookup_mut(caller)
        .ok_or_else(|| Error::new(Errno::ESRCH))?;
    pcb.recv_buf = msg_ptr;
    Ok(())
}

/// Copies a delivered message out to the caller's user buffer, if one is
/// registered. Runs after the pump so a same-turn reply lands
/// immediately.
pub fn copy_out_message(nc: &mut Nucleus, pid: Pid) -> Result<()> {
    let pcb = match nc.procs.lookup_mut(pid) {
        Some(pcb) => pcb,
        None => return Ok(()),
    };
    if !pcb.msg_ready || pcb.recv_buf == 0 {
        return Ok(());
    }
    let bytes: [u8; MESSAGE_SIZE] = {
        let mut out = [0u8; MESSAGE_SIZE];
        out.copy_from_slice(pcb.msg_buf.as_bytes());
        out
    };
    let buf = pcb.recv_buf;
    pcb.msg_ready = false;
    pcb.recv_buf = 0;
    pcb.vm.write_bytes(buf, &bytes)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ipc::msg;
    use crate::ipc::wire::{GenericResponse, InlinePath, MkdirRequest, OpenRequest, PathRequest, O_CREAT, O_RDWR};
    use crate::test_util::setup;

    fn boot() -> (Nucleus, Servers) {
        setup();
        let mut nc = Nucleus::new();
        nc.bootstrap();
        (nc, Servers::new())
    }

    /// Places `msg` in the user's address space and issues a SENDREC the
    /// way the trap path would.
    fn user_sendrec(
        nc: &mut Nucleus,
        servers: &mut Servers,
        caller: Pid,
        target: Pid,
        msg: &Message,
    ) -> (isize, Message) {
        let buf = {
            let pcb = nc.procs.lookup_mut(caller).unwrap();
            let buf = pcb.vm.alloc(MESSAGE_SIZE).unwrap();
            pcb.vm.write_bytes(buf, msg.as_bytes()).unwrap();
            buf
        };
        let ret = dispatch(nc, servers, caller, SENDREC, target, buf);
        let mut bytes = [0u8; MESSAGE_SIZE];
        nc.procs
            .lookup_mut(caller)
            .unwrap()
            .vm
            .read_bytes(buf, &mut bytes)
            .unwrap();
        (ret, Message::read_from_bytes(&bytes).unwrap())
    }

    #[test]
    fn a_request_travels_the_whole_path() {
        let (mut nc, mut servers) = boot();
        let user = nc.spawn(1).unwrap();
        let req = Message::with_payload(
            msg::VFS_MKDIR,
            &MkdirRequest::new("/tmp/via-syscall", 0o755).unwrap(),
        );
        let (ret, reply) = user_sendrec(&mut nc, &mut servers, user, crate::process::VFS_PID, &req);
        assert_eq!(ret, 0);
        assert_eq!(reply.mtype, msg::VFS_REPLY);
        assert_eq!(reply.source, crate::process::VFS_PID);
        let resp: GenericResponse = reply.decode().unwrap();
        assert_eq!(resp.error, 0);
        // And the caller is runnable again with the reply consumed.
        assert!(nc.procs.lookup(user).unwrap().state.is_runnable());
        assert!(!nc.procs.lookup(user).unwrap().msg_ready);
    }

    #[test]
    fn requests_compose_across_servers() {
        let (mut nc, mut servers) = boot();
        let user = nc.spawn(1).unwrap();
        let vfs = crate::process::VFS_PID;

        let open = Message::with_payload(
            msg::VFS_OPEN,
            &OpenRequest {
                flags: O_CREAT | O_RDWR,
                mode: 0o644,
                path: InlinePath::new("/tmp/f").unwrap(),
            },
        );
        let (_, reply) = user_sendrec(&mut nc, &mut servers, user, vfs, &open);
        let resp: GenericResponse = reply.decode().unwrap();
        assert!(resp.value >= 3);

        let stat = Message::with_payload(
            msg::VFS_STAT,
            &PathRequest {
                path: InlinePath::new("/tmp/f").unwrap(),
            },
        );
        let (ret, reply) = user_sendrec(&mut nc, &mut servers, user, vfs, &stat);
        assert_eq!(ret, 0);
        assert_eq!(reply.mtype, msg::VFS_REPLY);
    }

    #[test]
    fn bad_operation_codes_are_ebadcall() {
        let (mut nc, mut servers) = boot();
        let user = nc.spawn(1).unwrap();
        let ret = dispatch(&mut nc, &mut servers, user, 99, 2, 0);
        assert_eq!(ret, -(Errno::EBADCALL.as_i32() as isize));
    }
}
