// SPDX-License-Identifier: MPL-2.0

//! The Lattice OS kernel.
//!
//! A MINIX-shaped microkernel: the nucleus here owns the process table,
//! the scheduler, the synchronous Lattice IPC primitive and per-process
//! virtual memory with copy-on-write fork. Everything else — file I/O,
//! process lifecycle, memory allocation — lives in the three system
//! servers (VFS, Process Manager, Memory Manager), which are ordinary
//! processes talking the wire protocol in [`ipc`].
//!
//! Well-known PIDs: 0 the kernel itself, 1 init, 2 VFS, 3 PM, 4 MM.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![allow(dead_code)]

extern crate alloc;

#[macro_use]
pub mod error;

pub mod ipc;
pub mod nucleus;
pub mod prelude;
pub mod process;
pub mod sched;
pub mod servers;
pub mod syscall;
#[cfg(test)]
pub(crate) mod test_util;
pub mod time;
pub mod vm;

use lattice_frame::boot::BootInfo;
use lattice_frame::cpu::TrapFrame;

use crate::prelude::*;

/// Brings the whole system up from boot information: substrate first,
/// then the nucleus and the three servers, then init.
pub fn init(boot_info: BootInfo) {
    lattice_frame::init(boot_info);
    nucleus::init();
    servers::init();
    syscall::init();
    register_trap_handlers();
    info!("lattice: kernel is up");
}

fn register_trap_handlers() {
    use lattice_frame::arch::trap::{self, CLOCK_VECTOR, PAGE_FAULT_VECTOR, SYS_VECTOR};
    trap::register_callback(CLOCK_VECTOR, clock_tick_handler);
    trap::register_callback(PAGE_FAULT_VECTOR, page_fault_handler);
    trap::register_callback(SYS_VECTOR, legacy_syscall_handler);
}

fn clock_tick_handler(_frame: &mut TrapFrame) {
    let mut nc = nucleus::nucleus().lock();
    nc.clock_tick();
}

fn page_fault_handler(frame: &mut TrapFrame) {
    // Page-fault error code: bit 1 set for writes, bit 2 for user mode.
    let write = frame.error_code & 0x2 != 0;
    let from_user = frame.error_code & 0x4 != 0;
    let addr = lattice_frame::arch::fault_address();
    if !from_user {
        panic!(
            "kernel page fault at {:#x} (rip {:#x})",
            addr, frame.general.rip
        );
    }
    let mut nc = nucleus::nucleus().lock();
    let pid = nc.sched.current();
    if pid != sched::IDLE {
        nc.page_fault(pid, addr, write);
    }
}

/// The legacy trap-gate syscall path: same ABI as the fast entry, with
/// the registers coming from the saved frame.
fn legacy_syscall_handler(frame: &mut TrapFrame) {
    let (target, msg_ptr, op) = (frame.general.rax, frame.general.rdi, frame.general.rdx);
    let mut nc = nucleus::nucleus().lock();
    let mut srv = servers::servers().lock();
    let caller = nc.sched.current();
    let ret = syscall::dispatch(
        &mut nc,
        &mut srv,
        caller,
        op,
        target as i64 as process::Pid,
        msg_ptr as usize,
    );
    frame.general.rax = ret as u64;
}

/// Enters the idle loop, dispatching ready processes until none remain.
/// On real hardware this never returns.
pub fn run() -> ! {
    loop {
        let next = {
            let mut nc = nucleus::nucleus().lock_irq_disabled();
            let mut srv = servers::servers().lock();
            servers::pump(&mut nc, &mut srv);
            nc.schedule()
        };
        if next == sched::IDLE {
            lattice_frame::arch::halt();
        }
        // Dispatching into user mode is the trap machinery's business;
        // from the nucleus' point of view the process simply runs until
        // it traps back in.
    }
}
