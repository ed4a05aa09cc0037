// SPDX-License-Identifier: MPL-2.0

//! Four-level page tables for 48-bit virtual addresses.
//!
//! Table frames come from the frame pool and are read and written through
//! the pool's linear offset, so the walking code is the same on hardware
//! and in a hosted pool. Intermediate levels are allocated on demand with
//! permissive flags; the leaf entry carries the real protection bits.

use alloc::vec::Vec;

use spin::Once;

use crate::config::PAGE_SIZE;
use crate::mm::{frame_allocator, Frame, Paddr, Vaddr};
use crate::sync::SpinLock;
use crate::Error;

const NR_ENTRIES: usize = 512;
const ADDR_MASK: u64 = 0x000f_ffff_ffff_f000;

bitflags::bitflags! {
    /// Page-table entry flags.
    pub struct PtFlags: u64 {
        const PRESENT       = 1 << 0;
        const WRITABLE      = 1 << 1;
        const USER          = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const NO_CACHE      = 1 << 4;
        const ACCESSED      = 1 << 5;
        const DIRTY         = 1 << 6;
        const GLOBAL        = 1 << 8;
        const NO_EXECUTE    = 1 << 63;
    }
}

/// A four-level page table rooted in one frame.
pub struct PageTable {
    root: Frame,
    // Intermediate table frames, kept alive with the root.
    tables: Vec<Frame>,
}

impl PageTable {
    /// Creates an empty page table.
    pub fn new() -> Result<Self, Error> {
        let root = Frame::alloc().ok_or(Error::NoMemory)?;
        Ok(Self {
            root,
            tables: Vec::new(),
        })
    }

    /// The physical address of the root table, as loaded into the
    /// translation register.
    pub fn root_paddr(&self) -> Paddr {
        self.root.paddr()
    }

    /// Installs a 4-KiB mapping. Missing intermediate levels are
    /// allocated on demand.
    pub fn map(&mut self, va: Vaddr, pa: Paddr, flags: PtFlags) -> Result<(), Error> {
        if va % PAGE_SIZE != 0 || pa % PAGE_SIZE != 0 {
            return Err(Error::InvalidArgs);
        }
        let leaf = self.walk(va, true)?;
        if entry_read(leaf.0, leaf.1) & PtFlags::PRESENT.bits() != 0 {
            return Err(Error::AlreadyMapped);
        }
        entry_write(leaf.0, leaf.1, pa as u64 | (flags | PtFlags::PRESENT).bits());
        Ok(())
    }

    /// Removes a mapping and returns the physical address it pointed at.
    pub fn unmap(&mut self, va: Vaddr) -> Result<Paddr, Error> {
        let leaf = self.walk(va, false)?;
        let entry = entry_read(leaf.0, leaf.1);
        if entry & PtFlags::PRESENT.bits() == 0 {
            return Err(Error::NotMapped);
        }
        entry_write(leaf.0, leaf.1, 0);
        Ok((entry & ADDR_MASK) as Paddr)
    }

    /// Replaces the protection bits of an existing mapping.
    pub fn protect(&mut self, va: Vaddr, flags: PtFlags) -> Result<(), Error> {
        let leaf = self.walk(va, false)?;
        let entry = entry_read(leaf.0, leaf.1);
        if entry & PtFlags::PRESENT.bits() == 0 {
            return Err(Error::NotMapped);
        }
        entry_write(
            leaf.0,
            leaf.1,
            (entry & ADDR_MASK) | (flags | PtFlags::PRESENT).bits(),
        );
        Ok(())
    }

    /// Translates `va`, returning the mapped frame address and flags.
    pub fn query(&self, va: Vaddr) -> Option<(Paddr, PtFlags)> {
        let mut table = self.root.paddr();
        for level in (1..4).rev() {
            let entry = entry_read(table, index_of(va, level));
            if entry & PtFlags::PRESENT.bits() == 0 {
                return None;
            }
            table = (entry & ADDR_MASK) as Paddr;
        }
        let entry = entry_read(table, index_of(va, 0));
        if entry & PtFlags::PRESENT.bits() == 0 {
            return None;
        }
        Some((
            (entry & ADDR_MASK) as Paddr,
            PtFlags::from_bits_truncate(entry),
        ))
    }

    /// Loads this table into the translation register.
    #[cfg(all(target_arch = "x86_64", target_os = "none"))]
    pub unsafe fn activate(&self) {
        unsafe {
            core::arch::asm!("mov cr3, {}", in(reg) self.root_paddr(),
                             options(nostack, preserves_flags));
        }
    }

    /// Walks to the leaf table of `va`, optionally allocating missing
    /// levels, and returns (table paddr, leaf index).
    fn walk(&mut self, va: Vaddr, create: bool) -> Result<(Paddr, usize), Error> {
        let mut table = self.root.paddr();
        for level in (1..4).rev() {
            let index = index_of(va, level);
            let entry = entry_read(table, index);
            if entry & PtFlags::PRESENT.bits() == 0 {
                if !create {
                    return Err(Error::NotMapped);
                }
                let frame = Frame::alloc().ok_or(Error::NoMemory)?;
                let next = frame.paddr();
                self.tables.push(frame);
                entry_write(
                    table,
                    index,
                    next as u64
                        | (PtFlags::PRESENT | PtFlags::WRITABLE | PtFlags::USER).bits(),
                );
                table = next;
            } else {
                table = (entry & ADDR_MASK) as Paddr;
            }
        }
        Ok((table, index_of(va, 0)))
    }
}

fn index_of(va: Vaddr, level: usize) -> usize {
    (va >> (12 + 9 * level)) & (NR_ENTRIES - 1)
}

fn entry_read(table: Paddr, index: usize) -> u64 {
    debug_assert!(index < NR_ENTRIES);
    let ptr = frame_allocator::pool().frame_ptr(table) as *const u64;
    unsafe { ptr.add(index).read_volatile() }
}

fn entry_write(table: Paddr, index: usize, value: u64) {
    debug_assert!(index < NR_ENTRIES);
    let ptr = frame_allocator::pool().frame_ptr(table) as *mut u64;
    unsafe { ptr.add(index).write_volatile(value) }
}

static KERNEL_PT: Once<SpinLock<PageTable>> = Once::new();

fn kernel_page_table() -> &'static SpinLock<PageTable> {
    KERNEL_PT.call_once(|| {
        SpinLock::new(PageTable::new().expect("cannot allocate the kernel page table"))
    })
}

/// Installs a mapping in the kernel's own page table.
pub fn map_page(va: Vaddr, pa: Paddr, flags: PtFlags) -> Result<(), Error> {
    kernel_page_table().lock().map(va, pa, flags)
}

#[cfg(test)]
mod test {
    use super::*;

    fn setup() {
        frame_allocator::init_hosted(1024);
    }

    #[test]
    fn map_then_query_round_trips() {
        setup();
        let mut pt = PageTable::new().unwrap();
        let frame = Frame::alloc().unwrap();
        let va = 0x0000_7f00_1000_0000;
        pt.map(va, frame.paddr(), PtFlags::WRITABLE | PtFlags::USER)
            .unwrap();
        let (pa, flags) = pt.query(va).unwrap();
        assert_eq!(pa, frame.paddr());
        assert!(flags.contains(PtFlags::WRITABLE | PtFlags::USER | PtFlags::PRESENT));
        assert!(pt.query(va + PAGE_SIZE).is_none());
    }

    #[test]
    fn double_map_is_rejected() {
        setup();
        let mut pt = PageTable::new().unwrap();
        let frame = Frame::alloc().unwrap();
        pt.map(0x1000, frame.paddr(), PtFlags::empty()).unwrap();
        assert_eq!(
            pt.map(0x1000, frame.paddr(), PtFlags::empty()),
            Err(Error::AlreadyMapped)
        );
    }

    #[test]
    fn unmap_returns_the_frame_address() {
        setup();
        let mut pt = PageTable::new().unwrap();
        let frame = Frame::alloc().unwrap();
        pt.map(0x2000, frame.paddr(), PtFlags::WRITABLE).unwrap();
        assert_eq!(pt.unmap(0x2000).unwrap(), frame.paddr());
        assert!(pt.query(0x2000).is_none());
        assert_eq!(pt.unmap(0x2000), Err(Error::NotMapped));
    }

    #[test]
    fn protect_rewrites_leaf_flags() {
        setup();
        let mut pt = PageTable::new().unwrap();
        let frame = Frame::alloc().unwrap();
        pt.map(0x3000, frame.paddr(), PtFlags::WRITABLE).unwrap();
        pt.protect(0x3000, PtFlags::empty()).unwrap();
        let (_, flags) = pt.query(0x3000).unwrap();
        assert!(!flags.contains(PtFlags::WRITABLE));
    }
}
