// SPDX-License-Identifier: MPL-2.0

//! The privileged substrate of Lattice OS.
//!
//! This crate owns everything that touches hardware state directly: the
//! boot-information boundary, the physical frame pool, four-level page
//! tables, the kernel virtual-address bump allocator, spin locks, the
//! register save area and the interrupt/syscall entry machinery. The
//! `lattice-kernel` crate builds the process, IPC and server semantics on
//! top of these primitives.
//!
//! Privileged instructions are only emitted when building for
//! `target_os = "none"`; hosted builds compile the same code paths against
//! inert fallbacks so the logic can run under ordinary test harnesses.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![allow(dead_code)]

extern crate alloc;

pub mod arch;
pub mod boot;
pub mod config;
pub mod console;
pub mod cpu;
mod error;
pub mod logger;
pub mod mm;
pub mod sync;

pub use error::Error;

/// Brings the substrate up from the boot information handed over by the
/// loader shim. Must be called exactly once, before anything else in this
/// crate is used.
pub fn init(boot_info: boot::BootInfo) {
    let hhdm_offset = boot_info.hhdm_offset as usize;
    boot::init(boot_info);
    logger::init();
    mm::frame_allocator::init(boot::boot_info().memory_regions, hhdm_offset);
    mm::kvspace::init(config::KVSPACE_BASE);
    arch::init();
}
