// SPDX-License-Identifier: MPL-2.0

use lattice_frame::mm::Frame;

use crate::prelude::*;

bitflags! {
    /// Protection and kind bits of a virtual memory area.
    pub struct VmaFlags: u32 {
        const READ            = 1 << 0;
        const WRITE           = 1 << 1;
        const EXEC            = 1 << 2;
        const PRIVATE         = 1 << 3;
        const SHARED          = 1 << 4;
        const ANONYMOUS       = 1 << 5;
        /// The page is shared copy-on-write: the next write fault
        /// duplicates or promotes it. Mutually exclusive with `WRITE`.
        const COW_WRITE_FAULT = 1 << 6;
    }
}

/// What an area is used for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VmaType {
    Anonymous,
    Mapped,
    Stack,
    Heap,
}

/// A half-open interval `[start, end)` of page-aligned virtual addresses
/// with uniform protection, optionally backed by a page frame.
///
/// Areas start out unbacked; materialisation happens a page at a time, so
/// a backed area always spans exactly one page.
#[derive(Clone, Debug)]
pub struct Vma {
    pub start: Vaddr,
    pub end: Vaddr,
    pub flags: VmaFlags,
    pub typ: VmaType,
    pub frame: Option<Frame>,
}

impl Vma {
    pub fn new(start: Vaddr, end: Vaddr, flags: VmaFlags, typ: VmaType) -> Self {
        debug_assert!(start < end);
        debug_assert!(lattice_frame::mm::is_page_aligned(start));
        debug_assert!(lattice_frame::mm::is_page_aligned(end));
        debug_assert!(
            !flags.contains(VmaFlags::WRITE | VmaFlags::COW_WRITE_FAULT),
            "WRITE and COW_WRITE_FAULT are mutually exclusive"
        );
        Vma {
            start,
            end,
            flags,
            typ,
            frame: None,
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn contains(&self, addr: Vaddr) -> bool {
        (self.start..self.end).contains(&addr)
    }

    pub fn overlaps(&self, start: Vaddr, end: Vaddr) -> bool {
        self.start < end && start < self.end
    }

    pub fn is_cow(&self) -> bool {
        self.flags.contains(VmaFlags::COW_WRITE_FAULT)
    }
}
