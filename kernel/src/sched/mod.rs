// SPDX-License-Identifier: MPL-2.0

//! The scheduler: sixteen priority queues over the PID arena.
//!
//! Queue 0 is reserved for kernel tasks, servers default to queue 2 and
//! user processes to queue 8. Within one queue scheduling is round-robin
//! at quantum granularity; across queues, lower number always wins.

use crate::prelude::*;
use crate::process::Pid;

/// Number of priority queues.
pub const NR_SCHED_QUEUES: usize = 16;

/// Priority of kernel tasks.
pub const PRI_TASK: u8 = 0;
/// Default priority of the system servers.
pub const PRI_SERVER: u8 = 2;
/// Default priority of user processes.
pub const PRI_USER: u8 = 8;

/// Clock ticks per quantum.
pub const SCHED_QUANTUM: u32 = 8;

/// The "nobody is running" sentinel.
pub const IDLE: Pid = -999;

/// The run queues and the currently running PID.
pub struct RunQueues {
    queues: [VecDeque<Pid>; NR_SCHED_QUEUES],
    current: Pid,
}

impl RunQueues {
    pub fn new() -> Self {
        RunQueues {
            queues: core::array::from_fn(|_| VecDeque::new()),
            current: IDLE,
        }
    }

    /// The PID the CPU is running, or [`IDLE`].
    pub fn current(&self) -> Pid {
        self.current
    }

    pub fn set_current(&mut self, pid: Pid) {
        self.current = pid;
    }

    /// Appends `pid` to the tail of its priority queue.
    pub fn enqueue(&mut self, pid: Pid, priority: u8) {
        let queue = &mut self.queues[priority as usize];
        debug_assert!(
            !queue.contains(&pid),
            "pid {} enqueued twice on queue {}",
            pid,
            priority
        );
        queue.push_back(pid);
    }

    /// Pops the head of the lowest-numbered non-empty queue.
    pub fn dequeue_highest(&mut self) -> Option<Pid> {
        self.queues.iter_mut().find_map(|queue| queue.pop_front())
    }

    /// Drops `pid` from whatever queue holds it. Used when a ready
    /// process dies before being dispatched.
    pub fn remove(&mut self, pid: Pid) {
        for queue in self.queues.iter_mut() {
            queue.retain(|&p| p != pid);
        }
        if self.current == pid {
            self.current = IDLE;
        }
    }

    /// How many times `pid` appears across all queues. Exists for the
    /// queue-membership invariant; always 0 or 1.
    pub fn occurrences(&self, pid: Pid) -> usize {
        self.queues
            .iter()
            .map(|queue| queue.iter().filter(|&&p| p == pid).count())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.iter().all(|queue| queue.is_empty())
    }
}

impl Default for RunQueues {
    fn default() -> Self {
        Self::new()
    }
}
