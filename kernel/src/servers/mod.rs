// SPDX-License-Identifier: MPL-2.0

//! The three system servers and the loop that runs them.
//!
//! Each server is a process (PIDs 2-4) whose code happens to live in the
//! kernel image: it sits in `receive(ANY)`, and [`pump`] plays its turn
//! whenever the IPC layer has delivered it a request. Server-to-server
//! traffic (fork announcements, exit cleanup) goes through a [`Courier`]
//! so it still travels as messages, not calls.

pub mod mm;
pub mod pm;
#[cfg(test)]
mod test;
pub mod vfs;

use spin::Once;

use crate::ipc::{lattice, Message, RecvFrom};
use crate::nucleus::Nucleus;
use crate::prelude::*;
use crate::process::{Pid, MM_PID, PM_PID, VFS_PID};

pub use mm::MmServer;
pub use pm::PmServer;
pub use vfs::VfsServer;

/// Outbound messages a server queues while handling a request. The pump
/// posts them once the handler is done.
pub struct Courier {
    queue: VecDeque<(Pid, Message)>,
}

impl Courier {
    pub fn new() -> Self {
        Courier {
            queue: VecDeque::new(),
        }
    }

    /// Queues `msg` for `dst`, to be sent from the posting server.
    pub fn post(&mut self, dst: Pid, msg: Message) {
        self.queue.push_back((dst, msg));
    }

    fn pop(&mut self) -> Option<(Pid, Message)> {
        self.queue.pop_front()
    }
}

impl Default for Courier {
    fn default() -> Self {
        Self::new()
    }
}

/// The server state machines, keyed by their well-known PIDs.
pub struct Servers {
    pub vfs: VfsServer,
    pub pm: PmServer,
    pub mm: MmServer,
}

impl Servers {
    pub fn new() -> Self {
        Servers {
            vfs: VfsServer::new(),
            pm: PmServer::new(),
            mm: MmServer::new(),
        }
    }

    /// Whether the VFS still tracks any state for `pid`; test support
    /// for the exit-cleanup path.
    #[cfg(test)]
    pub(crate) fn vfs_has_state_for(&self, pid: Pid) -> bool {
        self.vfs.has_state_for(pid)
    }

    fn handle(
        &mut self,
        nc: &mut Nucleus,
        server: Pid,
        msg: &Message,
        courier: &mut Courier,
    ) -> Option<Message> {
        match server {
            VFS_PID => self.vfs.handle(msg),
            PM_PID => self.pm.handle(nc, msg, courier),
            MM_PID => self.mm.handle(nc, msg),
            _ => None,
        }
    }
}

impl Default for Servers {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs every server that has a delivered request, until the system
/// settles. Couriered messages count as progress, so a fork announcement
/// posted by the PM reaches the VFS before the pump returns.
pub fn pump(nc: &mut Nucleus, servers: &mut Servers) {
    let mut courier = Courier::new();
    loop {
        let mut progressed = false;
        for server in [VFS_PID, PM_PID, MM_PID] {
            let delivered = {
                let Some(pcb) = nc.procs.lookup_mut(server) else {
                    continue;
                };
                if !pcb.msg_ready {
                    continue;
                }
                pcb.msg_ready = false;
                pcb.msg_buf
            };
            progressed = true;
            let reply = servers.handle(nc, server, &delivered, &mut courier);
            if let Some(reply) = reply {
                reply_to(nc, server, delivered.source, &reply);
            }
            // Back to the receive loop; a queued sender may hand over
            // the next request immediately.
            let _ = lattice::receive(nc, server, RecvFrom::Any);
        }
        while let Some((dst, msg)) = courier.pop() {
            // Courier traffic is always from the PM.
            let _ = lattice::notify(nc, PM_PID, dst, &msg);
            progressed = true;
        }
        if !progressed {
            break;
        }
    }
}

/// Sends a server's reply without ever letting the server block: if the
/// requester is no longer waiting (it died, or was woken by a signal),
/// the reply is dropped.
fn reply_to(nc: &mut Nucleus, server: Pid, dst: Pid, reply: &Message) {
    let waiting = nc
        .procs
        .lookup(dst)
        .and_then(|p| p.receiving_from())
        .is_some_and(|from| from.matches(server));
    if waiting {
        let _ = lattice::send(nc, server, dst, reply);
    } else {
        debug!("reply to {} dropped: not waiting on {}", dst, server);
    }
}

static SERVERS: Once<SpinLock<Servers>> = Once::new();

/// Builds the global server registry. Called once at boot.
pub fn init() {
    SERVERS.call_once(|| SpinLock::new(Servers::new()));
}

/// The global server registry.
pub fn servers() -> &'static SpinLock<Servers> {
    SERVERS.get().expect("servers are not initialized")
}
