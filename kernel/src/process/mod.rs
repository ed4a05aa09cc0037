// SPDX-License-Identifier: MPL-2.0

//! Process control blocks and the process table.
//!
//! Everything here is arena-shaped: the table owns one slot per PID and
//! all cross-process references (parent links, IPC caller chains) are
//! PIDs, never pointers.

pub mod signal;
mod table;

pub use table::{PidAllocator, ProcessTable, NR_PROCS};

use lattice_frame::cpu::UserContext;

use crate::ipc::Message;
use crate::prelude::*;
use crate::sched::{PRI_SERVER, PRI_USER, SCHED_QUANTUM};
use crate::vm::AddressSpace;

use self::signal::SignalState;

/// Process identifier. Unique and nonzero for every live or zombie
/// process; PID 0 is the kernel's own pseudo-identity in messages.
pub type Pid = i32;

/// Receive-from-anyone marker for `receive`.
pub const ANY: Pid = -1;

pub const KERNEL_PID: Pid = 0;
pub const INIT_PID: Pid = 1;
pub const VFS_PID: Pid = 2;
pub const PM_PID: Pid = 3;
pub const MM_PID: Pid = 4;

/// Real and effective user and group identities.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub ruid: u32,
    pub euid: u32,
    pub rgid: u32,
    pub egid: u32,
}

impl Credentials {
    pub const fn root() -> Self {
        Credentials {
            ruid: 0,
            euid: 0,
            rgid: 0,
            egid: 0,
        }
    }

    pub fn is_superuser(&self) -> bool {
        self.euid == 0
    }
}

/// Which source a receiver is willing to take a message from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecvFrom {
    /// Any sender.
    Any,
    /// Exactly this sender.
    Pid(Pid),
}

impl RecvFrom {
    pub fn matches(&self, source: Pid) -> bool {
        match self {
            RecvFrom::Any => true,
            RecvFrom::Pid(pid) => *pid == source,
        }
    }
}

/// The scheduling state of a process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcState {
    Running,
    ReadyToRun,
    /// Waiting for the destination to receive our outbox.
    BlockedSending(Pid),
    /// Waiting for a matching sender.
    BlockedReceiving(RecvFrom),
    /// The receive half of `sendrec`: waiting for the peer's reply.
    BlockedOnReply(Pid),
    /// Dead, with the wait status, until the parent reaps.
    Zombie(i32),
    Stopped,
}

impl ProcState {
    pub fn is_runnable(&self) -> bool {
        matches!(self, ProcState::Running | ProcState::ReadyToRun)
    }

    pub fn is_zombie(&self) -> bool {
        matches!(self, ProcState::Zombie(_))
    }
}

/// The per-process kernel record.
pub struct Pcb {
    pid: Pid,
    pub ppid: Pid,
    pub pgid: Pid,
    pub sid: Pid,
    pub creds: Credentials,
    pub state: ProcState,

    /// Register save area, filled on kernel entry.
    pub ctx: UserContext,
    /// Top of the kernel stack used when entering on this process.
    pub kstack_top: Vaddr,
    /// Flags stashed by the lock/unlock/restore primitive.
    pub saved_flags: u64,

    /* IPC endpoint */
    /// The outbound message while we sit in someone's caller chain.
    pub outbox: Message,
    /// The last message delivered to us.
    pub msg_buf: Message,
    /// Whether `msg_buf` holds a delivered, unconsumed message.
    pub msg_ready: bool,
    /// Single-slot mailbox for kernel-synthesised notifications.
    pub inbox: Option<Message>,
    /// Intrusive link: the next sender in the chain we are queued on.
    pub next_caller: Option<Pid>,
    /// Head and tail of our own FIFO chain of blocked senders.
    pub caller_head: Option<Pid>,
    pub caller_tail: Option<Pid>,
    /// Set while a `sendrec` is in flight, so the send completion rolls
    /// into the receive half.
    pub reply_pending: bool,
    /// User-space buffer to copy a delivered message into, or 0.
    pub recv_buf: Vaddr,

    /// The process's virtual address space.
    pub vm: AddressSpace,

    /* Scheduling */
    pub priority: u8,
    pub quantum_left: u32,

    /// Signal dispositions, pending set and blocked mask.
    pub sig: SignalState,
}

impl Pcb {
    /// A fresh PCB. Servers get the server priority, everyone else the
    /// user default.
    pub fn new(pid: Pid, ppid: Pid, aslr_seed: u64) -> Self {
        let priority = if (VFS_PID..=MM_PID).contains(&pid) {
            PRI_SERVER
        } else {
            PRI_USER
        };
        Pcb {
            pid,
            ppid,
            pgid: pid,
            sid: pid,
            creds: Credentials::root(),
            state: ProcState::ReadyToRun,
            ctx: UserContext::default(),
            kstack_top: 0,
            saved_flags: 0,
            outbox: Message::default(),
            msg_buf: Message::default(),
            msg_ready: false,
            inbox: None,
            next_caller: None,
            caller_head: None,
            caller_tail: None,
            reply_pending: false,
            recv_buf: 0,
            vm: AddressSpace::new(aslr_seed),
            priority,
            quantum_left: SCHED_QUANTUM,
            sig: SignalState::new(),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Whom this process is blocked sending to, if anyone.
    pub fn sending_to(&self) -> Option<Pid> {
        match self.state {
            ProcState::BlockedSending(dst) => Some(dst),
            _ => None,
        }
    }

    /// The source filter of a blocked receive, if any.
    pub fn receiving_from(&self) -> Option<RecvFrom> {
        match self.state {
            ProcState::BlockedReceiving(from) => Some(from),
            ProcState::BlockedOnReply(peer) => Some(RecvFrom::Pid(peer)),
            _ => None,
        }
    }

    /// Stores the syscall return value into the save area, so the value
    /// is in place when the process next returns to user mode.
    pub fn set_syscall_result(&mut self, value: i64) {
        self.ctx.set_syscall_ret(value);
    }
}
