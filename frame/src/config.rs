// SPDX-License-Identifier: MPL-2.0

//! Compile-time constants of the substrate.

/// The size in bytes of one page frame.
pub const PAGE_SIZE: usize = 4096;

/// log2(PAGE_SIZE), for shifting between addresses and frame numbers.
pub const PAGE_SIZE_BITS: usize = 12;

/// The canonical higher-half base at which the kernel image is linked.
pub const KERNEL_BASE_VADDR: usize = 0xffff_ffff_8000_0000;

/// Base of the region handed out by the kernel virtual-address bump
/// allocator. Sits below the kernel image, above the direct map.
pub const KVSPACE_BASE: usize = 0xffff_a000_0000_0000;

/// Default higher-half direct-map offset when the loader does not say
/// otherwise.
pub const DEFAULT_HHDM_OFFSET: usize = 0xffff_8000_0000_0000;

/// Bytes of kernel stack given to each process.
pub const KERNEL_STACK_SIZE: usize = 16 * PAGE_SIZE;

/// Size of the dedicated interrupt stacks installed in the IST slots.
pub const IST_STACK_SIZE: usize = 8 * PAGE_SIZE;
