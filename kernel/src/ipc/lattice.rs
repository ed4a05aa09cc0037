// SPDX-License-Identifier: MPL-2.0

//! The synchronous rendezvous primitive: `send`, `receive`, `sendrec`.
//!
//! Both sides of a transfer meet in the kernel: whoever arrives first
//! blocks. Senders waiting on one receiver form a strictly FIFO caller
//! chain threaded through their PCBs by PID. The kernel stamps the source
//! field of every delivered message; callers cannot forge it.
//!
//! Direct send cycles are detected by walking the `sending_to` chain and
//! fail both participants with `ELOCKED`. A receiver blocked on ANY is
//! the only blocking state a signal may interrupt (`EINTR`).

pub use crate::process::RecvFrom;

use super::Message;
use crate::nucleus::Nucleus;
use crate::prelude::*;
use crate::process::{Pid, ProcState, NR_PROCS};

/// How a primitive call ended for the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IpcOutcome {
    /// The transfer happened; a received message is in the caller's
    /// message buffer.
    Done,
    /// The caller is now blocked and will resume with its syscall result
    /// once the rendezvous completes.
    Blocked,
}

/// Sends `msg` to `dst`, blocking until `dst` receives it.
pub fn send(nc: &mut Nucleus, caller: Pid, dst: Pid, msg: &Message) -> Result<IpcOutcome> {
    if dst == caller {
        return_errno_with_message!(Errno::ELOCKED, "sending to self can never rendezvous");
    }
    if !nc.procs.lookup(dst).is_some_and(|p| !p.state.is_zombie()) {
        return_errno_with_message!(Errno::ESRCH, "no such destination");
    }

    let mut stamped = *msg;
    stamped.source = caller;

    // A waiting receiver completes the rendezvous immediately.
    let receiver_waiting = nc
        .procs
        .lookup(dst)
        .and_then(|p| p.receiving_from())
        .is_some_and(|from| from.matches(caller));
    if receiver_waiting {
        deliver(nc, dst, &stamped);
        return Ok(IpcOutcome::Done);
    }

    // The receiver is busy. Make sure waiting on it cannot close a cycle
    // of senders back to us.
    if let Some(closing) = find_send_cycle(nc, caller, dst) {
        unlink_from_chain(nc, caller, closing);
        let peer = nc.procs.lookup_mut(closing).unwrap();
        peer.reply_pending = false;
        wake(nc, closing, -(Errno::ELOCKED.as_i32() as i64));
        return_errno_with_message!(Errno::ELOCKED, "send would deadlock");
    }

    // Queue up at the tail of the destination's caller chain.
    {
        let pcb = nc.procs.lookup_mut(caller).expect("caller must exist");
        pcb.outbox = stamped;
        pcb.next_caller = None;
        pcb.state = ProcState::BlockedSending(dst);
    }
    nc.sched.remove(caller);
    let prev_tail = {
        let dst_pcb = nc.procs.lookup_mut(dst).unwrap();
        let prev = dst_pcb.caller_tail.replace(caller);
        if prev.is_none() {
            dst_pcb.caller_head = Some(caller);
        }
        prev
    };
    if let Some(tail) = prev_tail {
        nc.procs.lookup_mut(tail).unwrap().next_caller = Some(caller);
    }
    Ok(IpcOutcome::Blocked)
}

/// Receives a message from `src`, blocking until one is available.
/// On [`IpcOutcome::Done`] the message is in the caller's `msg_buf`.
pub fn receive(nc: &mut Nucleus, caller: Pid, src: RecvFrom) -> Result<IpcOutcome> {
    // Kernel notifications park in the single-slot mailbox and win over
    // queued senders.
    let inbox_hit = {
        let pcb = nc
            .procs
            .lookup(caller)
            .ok_or_else(|| Error::new(Errno::ESRCH))?;
        pcb.inbox
            .as_ref()
            .is_some_and(|m| src.matches(m.source))
    };
    if inbox_hit {
        let pcb = nc.procs.lookup_mut(caller).unwrap();
        let m = pcb.inbox.take().unwrap();
        pcb.msg_buf = m;
        pcb.msg_ready = true;
        return Ok(IpcOutcome::Done);
    }

    // First matching sender in FIFO order.
    if let Some(sender) = find_in_chain(nc, caller, src) {
        unlink_from_chain(nc, caller, sender);
        let (s, c) = nc
            .procs
            .pair_mut(sender, caller)
            .expect("chained sender must exist");
        c.msg_buf = s.outbox;
        c.msg_ready = true;
        if s.reply_pending {
            // The sender's sendrec rolls straight into its reply wait.
            s.reply_pending = false;
            s.state = ProcState::BlockedOnReply(caller);
        } else {
            wake(nc, sender, 0);
        }
        return Ok(IpcOutcome::Done);
    }

    let pcb = nc.procs.lookup_mut(caller).unwrap();
    pcb.state = ProcState::BlockedReceiving(src);
    nc.sched.remove(caller);
    Ok(IpcOutcome::Blocked)
}

/// `send` then `receive` from the same peer, as one atomic step from the
/// caller's point of view. This is how requests are issued.
pub fn sendrec(nc: &mut Nucleus, caller: Pid, peer: Pid, msg: &Message) -> Result<IpcOutcome> {
    {
        let pcb = nc
            .procs
            .lookup_mut(caller)
            .ok_or_else(|| Error::new(Errno::ESRCH))?;
        pcb.reply_pending = true;
    }
    let sent = match send(nc, caller, peer, msg) {
        Ok(outcome) => outcome,
        Err(e) => {
            nc.procs.lookup_mut(caller).unwrap().reply_pending = false;
            return Err(e);
        }
    };
    match sent {
        IpcOutcome::Blocked => Ok(IpcOutcome::Blocked),
        IpcOutcome::Done => {
            nc.procs.lookup_mut(caller).unwrap().reply_pending = false;
            match receive(nc, caller, RecvFrom::Pid(peer))? {
                IpcOutcome::Done => Ok(IpcOutcome::Done),
                IpcOutcome::Blocked => {
                    // Waiting specifically for the reply, not a fresh
                    // request.
                    let pcb = nc.procs.lookup_mut(caller).unwrap();
                    pcb.state = ProcState::BlockedOnReply(peer);
                    Ok(IpcOutcome::Blocked)
                }
            }
        }
    }
}

/// Non-blocking kernel-side send for synthesised messages. Delivers
/// immediately when the destination is receiving; otherwise parks the
/// message in the destination's mailbox.
pub fn notify(nc: &mut Nucleus, src: Pid, dst: Pid, msg: &Message) -> Result<()> {
    if !nc.procs.lookup(dst).is_some_and(|p| !p.state.is_zombie()) {
        return_errno_with_message!(Errno::ESRCH, "no such destination");
    }
    let mut stamped = *msg;
    stamped.source = src;
    let receiver_waiting = nc
        .procs
        .lookup(dst)
        .and_then(|p| p.receiving_from())
        .is_some_and(|from| from.matches(src));
    if receiver_waiting {
        deliver(nc, dst, &stamped);
        return Ok(());
    }
    let pcb = nc.procs.lookup_mut(dst).unwrap();
    if let Some(dropped) = pcb.inbox.replace(stamped) {
        trace!(
            "notify: mailbox of {} overwrote type {}",
            dst,
            dropped.mtype
        );
    }
    Ok(())
}

/// A signal wakes a receiver blocked on ANY with `EINTR`. Other blocked
/// states are not interruptible.
pub(crate) fn interrupt_receive(nc: &mut Nucleus, pid: Pid) {
    let interruptible = nc
        .procs
        .lookup(pid)
        .is_some_and(|p| p.state == ProcState::BlockedReceiving(RecvFrom::Any));
    if interruptible {
        wake(nc, pid, -(Errno::EINTR.as_i32() as i64));
    }
}

/// Tears down the IPC footprint of a dying process: senders queued on it
/// fail with `ESRCH`, and it leaves whatever chain it was queued on.
pub(crate) fn abandon_endpoint(nc: &mut Nucleus, pid: Pid) {
    // Senders waiting on us will never rendezvous.
    let mut cursor = {
        let pcb = nc.procs.lookup_mut(pid).unwrap();
        pcb.caller_tail = None;
        pcb.caller_head.take()
    };
    while let Some(sender) = cursor {
        let pcb = nc.procs.lookup_mut(sender).unwrap();
        cursor = pcb.next_caller.take();
        pcb.reply_pending = false;
        wake(nc, sender, -(Errno::ESRCH.as_i32() as i64));
    }
    // And we leave the queue we were sitting in, if any.
    if let Some(dst) = nc.procs.lookup(pid).and_then(|p| p.sending_to()) {
        unlink_from_chain(nc, dst, pid);
    }
    nc.sched.remove(pid);
}

/// Copies a stamped message into a waiting receiver and makes it ready.
fn deliver(nc: &mut Nucleus, dst: Pid, stamped: &Message) {
    let pcb = nc.procs.lookup_mut(dst).unwrap();
    debug_assert!(!pcb.msg_ready, "receiver with an unconsumed message");
    pcb.msg_buf = *stamped;
    pcb.msg_ready = true;
    wake(nc, dst, 0);
}

/// Makes a blocked process runnable again with `result` as its syscall
/// return value.
fn wake(nc: &mut Nucleus, pid: Pid, result: i64) {
    let pcb = nc.procs.lookup_mut(pid).unwrap();
    debug_assert!(!pcb.state.is_runnable());
    pcb.set_syscall_result(result);
    pcb.state = ProcState::ReadyToRun;
    let priority = pcb.priority;
    nc.sched.enqueue(pid, priority);
}

/// Walks the `sending_to` chain from `dst`. If it leads back to
/// `caller`, returns the chain member whose target is `caller` — the
/// other participant of the direct cycle.
fn find_send_cycle(nc: &Nucleus, caller: Pid, dst: Pid) -> Option<Pid> {
    let mut p = dst;
    for _ in 0..NR_PROCS {
        let target = nc.procs.lookup(p)?.sending_to()?;
        if target == caller {
            return Some(p);
        }
        p = target;
    }
    None
}

/// The first sender in `receiver`'s FIFO chain acceptable to `src`.
fn find_in_chain(nc: &Nucleus, receiver: Pid, src: RecvFrom) -> Option<Pid> {
    let mut cursor = nc.procs.lookup(receiver)?.caller_head;
    while let Some(sender) = cursor {
        if src.matches(sender) {
            return Some(sender);
        }
        cursor = nc.procs.lookup(sender)?.next_caller;
    }
    None
}

/// Removes `sender` from `receiver`'s caller chain, fixing head, tail
/// and the intrusive links.
fn unlink_from_chain(nc: &mut Nucleus, receiver: Pid, sender: Pid) {
    let head = match nc.procs.lookup(receiver) {
        Some(pcb) => pcb.caller_head,
        None => return,
    };
    let next_of_sender = nc
        .procs
        .lookup_mut(sender)
        .and_then(|p| p.next_caller.take());
    if head == Some(sender) {
        let pcb = nc.procs.lookup_mut(receiver).unwrap();
        pcb.caller_head = next_of_sender;
        if pcb.caller_tail == Some(sender) {
            pcb.caller_tail = None;
        }
        return;
    }
    // Walk to the predecessor.
    let mut cursor = head;
    while let Some(p) = cursor {
        let next = nc.procs.lookup(p).and_then(|pcb| pcb.next_caller);
        if next == Some(sender) {
            nc.procs.lookup_mut(p).unwrap().next_caller = next_of_sender;
            let pcb = nc.procs.lookup_mut(receiver).unwrap();
            if pcb.caller_tail == Some(sender) {
                pcb.caller_tail = Some(p);
            }
            return;
        }
        cursor = next;
    }
}
