// SPDX-License-Identifier: MPL-2.0

//! Per-process virtual memory: the VMA tree, demand paging, and
//! copy-on-write fork.
//!
//! Areas are created unbacked; the first touch of a page materialises a
//! frame for it. Materialisation splits the surrounding area down to one
//! page, so "backed area" and "page" stay synonymous and the frame
//! reference count equals the number of areas naming the frame across all
//! processes.

mod tree;
mod vma;

pub use tree::IntervalTree;
pub use vma::{Vma, VmaFlags, VmaType};

use lattice_frame::mm::{is_page_aligned, page_align_down, page_align_up, Frame};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::prelude::*;

/// Bottom of the heap segment.
pub const HEAP_BASE: Vaddr = 0x0000_2000_0000;
/// Ceiling of the heap segment.
pub const HEAP_MAX_SIZE: usize = 256 * 1024 * 1024;
/// Base from which automatic mmap placement grows upward.
pub const MMAP_BASE: Vaddr = 0x0000_7000_0000;
/// First address past usable user space.
pub const USER_TOP: Vaddr = 0x0000_7fff_ffff_f000;

/// Pages of slide applied to the automatic-placement base.
const ASLR_SLIDE_PAGES: u64 = 256;

/// One process's address space.
pub struct AddressSpace {
    tree: IntervalTree,
    rng: SmallRng,
    mmap_cursor: Vaddr,
}

impl AddressSpace {
    /// A fresh address space whose placement base is slid by the
    /// process's own RNG stream.
    pub fn new(aslr_seed: u64) -> Self {
        let mut rng = SmallRng::seed_from_u64(aslr_seed);
        let slide = (rng.random::<u64>() % ASLR_SLIDE_PAGES) as usize * PAGE_SIZE;
        AddressSpace {
            tree: IntervalTree::new(),
            rng,
            mmap_cursor: MMAP_BASE + slide,
        }
    }

    /// A seed for a child's RNG, drawn from this process's stream.
    pub fn draw_seed(&mut self) -> u64 {
        self.rng.random()
    }

    /// The number of areas.
    pub fn area_count(&self) -> usize {
        self.tree.len()
    }

    /// Read-only view of the VMA containing `addr`.
    pub fn find(&self, addr: Vaddr) -> Option<&Vma> {
        self.tree.find(addr)
    }

    /// Inserts a mapping. `addr == None` asks for automatic placement
    /// from the cursor; `Some` demands that exact, free, aligned base.
    pub fn mmap(
        &mut self,
        addr: Option<Vaddr>,
        length: usize,
        flags: VmaFlags,
        typ: VmaType,
    ) -> Result<Vaddr> {
        if length == 0 {
            return_errno_with_message!(Errno::EINVAL, "empty mapping");
        }
        let length = page_align_up(length);
        let base = match addr {
            Some(base) => {
                if !is_page_aligned(base) {
                    return_errno_with_message!(Errno::EINVAL, "unaligned fixed mapping");
                }
                if base.checked_add(length).map_or(true, |end| end > USER_TOP) {
                    return_errno_with_message!(Errno::ENOMEM, "mapping beyond user space");
                }
                if self.tree.overlaps(base, base + length) {
                    return_errno_with_message!(Errno::ENOMEM, "fixed range is occupied");
                }
                base
            }
            None => self.place(length)?,
        };
        let insert = self.tree.insert(Vma::new(base, base + length, flags, typ));
        debug_assert!(insert.is_ok());
        Ok(base)
    }

    /// Automatic placement: first free gap at or above the cursor, with a
    /// little randomised spacing between neighbours.
    fn place(&mut self, length: usize) -> Result<Vaddr> {
        let jitter = (self.rng.random::<u64>() % 16) as usize * PAGE_SIZE;
        let mut base = self.mmap_cursor + jitter;
        loop {
            let end = match base.checked_add(length) {
                Some(end) if end <= USER_TOP => end,
                _ => return_errno_with_message!(Errno::ENOMEM, "no free region"),
            };
            match self.tree.first_conflict_end(base, end) {
                None => break,
                Some(conflict_end) => base = page_align_up(conflict_end),
            }
        }
        self.mmap_cursor = base + length;
        Ok(base)
    }

    /// Allocates a fresh private read-write region of `length` bytes.
    pub fn alloc(&mut self, length: usize) -> Result<Vaddr> {
        self.mmap(
            None,
            length,
            VmaFlags::READ | VmaFlags::WRITE | VmaFlags::PRIVATE | VmaFlags::ANONYMOUS,
            VmaType::Anonymous,
        )
    }

    /// Maps `frames` as one shared region at `addr` (or wherever the
    /// cursor finds room). Each page becomes one `SHARED` area.
    pub fn map_shared_frames(
        &mut self,
        addr: Option<Vaddr>,
        frames: &[Frame],
        writable: bool,
    ) -> Result<Vaddr> {
        let length = frames.len() * PAGE_SIZE;
        let mut flags = VmaFlags::READ | VmaFlags::SHARED;
        if writable {
            flags |= VmaFlags::WRITE;
        }
        let base = match addr {
            Some(base) => {
                if !is_page_aligned(base) {
                    return_errno_with_message!(Errno::EINVAL, "unaligned attach address");
                }
                if self.tree.overlaps(base, base + length) {
                    return_errno_with_message!(Errno::ENOMEM, "attach range is occupied");
                }
                base
            }
            None => self.place(length)?,
        };
        for (i, frame) in frames.iter().enumerate() {
            let start = base + i * PAGE_SIZE;
            let mut vma = Vma::new(start, start + PAGE_SIZE, flags, VmaType::Mapped);
            vma.frame = Some(frame.clone());
            let insert = self.tree.insert(vma);
            debug_assert!(insert.is_ok());
        }
        Ok(base)
    }

    /// Splits the area containing `addr` so that `addr` becomes an area
    /// boundary. No-op if it already is one, or no area contains it.
    fn split_at(&mut self, addr: Vaddr) {
        debug_assert!(is_page_aligned(addr));
        let Some(found) = self.tree.find(addr) else {
            return;
        };
        if found.start == addr {
            return;
        }
        let start = found.start;
        let mut vma = self.tree.remove(start).expect("tree lost a found area");
        // A backed area is one page, and page-aligned split points cannot
        // fall strictly inside one page.
        debug_assert!(vma.frame.is_none());
        let mut high = vma.clone();
        vma.end = addr;
        high.start = addr;
        let a = self.tree.insert(vma);
        let b = self.tree.insert(high);
        debug_assert!(a.is_ok() && b.is_ok());
    }

    /// Removes all mappings in `[addr, addr + length)`, dropping frame
    /// references.
    pub fn munmap(&mut self, addr: Vaddr, length: usize) -> Result<()> {
        if !is_page_aligned(addr) || length == 0 {
            return_errno_with_message!(Errno::EINVAL, "bad unmap range");
        }
        let end = addr + page_align_up(length);
        self.split_at(addr);
        self.split_at(end);
        let victims: Vec<Vaddr> = {
            let mut out = Vec::new();
            self.tree.for_each(&mut |vma| {
                if vma.start >= addr && vma.end <= end {
                    out.push(vma.start);
                }
            });
            out
        };
        for start in victims {
            self.tree.remove(start);
        }
        Ok(())
    }

    /// Rewrites the protection bits of `[addr, addr + length)`. The range
    /// must be fully covered by existing areas.
    pub fn mprotect(&mut self, addr: Vaddr, length: usize, prot: VmaFlags) -> Result<()> {
        if !is_page_aligned(addr) || length == 0 {
            return_errno_with_message!(Errno::EINVAL, "bad protect range");
        }
        let end = addr + page_align_up(length);
        // Coverage check before any mutation.
        let mut cursor = addr;
        while cursor < end {
            let Some(vma) = self.tree.find(cursor) else {
                return_errno_with_message!(Errno::ENOMEM, "range is not fully mapped");
            };
            cursor = vma.end;
        }
        self.split_at(addr);
        self.split_at(end);
        self.tree.for_each_mut(&mut |vma| {
            if vma.start >= addr && vma.end <= end {
                let keep = vma.flags
                    & (VmaFlags::PRIVATE
                        | VmaFlags::SHARED
                        | VmaFlags::ANONYMOUS
                        | VmaFlags::COW_WRITE_FAULT);
                let mut new = keep | (prot & (VmaFlags::READ | VmaFlags::WRITE | VmaFlags::EXEC));
                // A COW page stays write-protected until its fault.
                if new.contains(VmaFlags::COW_WRITE_FAULT) {
                    new.remove(VmaFlags::WRITE);
                }
                vma.flags = new;
            }
        });
        Ok(())
    }

    /// The copy-on-write fork: the child gets a structural copy of the
    /// tree; every backed private-writable page is downgraded to
    /// `COW_WRITE_FAULT` in both processes and shared.
    pub fn fork(&mut self) -> AddressSpace {
        let child_seed = self.draw_seed();
        let mut child_vmas: Vec<Vma> = Vec::with_capacity(self.tree.len());
        self.tree.for_each_mut(&mut |vma| {
            if vma.frame.is_some()
                && vma.flags.contains(VmaFlags::WRITE | VmaFlags::PRIVATE)
            {
                vma.flags.remove(VmaFlags::WRITE);
                vma.flags.insert(VmaFlags::COW_WRITE_FAULT);
            }
            // Cloning the area clones the frame handle, raising the
            // shared refcount.
            child_vmas.push(vma.clone());
        });
        let mut child = AddressSpace {
            tree: IntervalTree::new(),
            rng: SmallRng::seed_from_u64(child_seed),
            mmap_cursor: self.mmap_cursor,
        };
        for vma in child_vmas {
            let insert = child.tree.insert(vma);
            debug_assert!(insert.is_ok());
        }
        child
    }

    /// Resolves a fault at `addr`. Returns `EFAULT` when no area covers
    /// the address or the access violates the area's protection.
    pub fn handle_fault(&mut self, addr: Vaddr, write: bool) -> Result<()> {
        let page = page_align_down(addr);
        let (backed, cow, flags) = {
            let Some(vma) = self.tree.find(page) else {
                return_errno_with_message!(Errno::EFAULT, "fault outside any mapping");
            };
            (vma.frame.is_some(), vma.is_cow(), vma.flags)
        };
        if write && !flags.contains(VmaFlags::WRITE) && !cow {
            return_errno_with_message!(Errno::EFAULT, "write to a read-only mapping");
        }
        if !write && !flags.contains(VmaFlags::READ) {
            return_errno_with_message!(Errno::EFAULT, "read from an unreadable mapping");
        }

        if backed {
            if write && cow {
                self.resolve_cow(page)?;
            }
            // Otherwise: a fault on an already-present page is spurious.
            return Ok(());
        }

        // Demand zero: carve the page out and back it with a fresh frame.
        self.split_at(page);
        self.split_at(page + PAGE_SIZE);
        let frame = Frame::alloc()
            .ok_or_else(|| Error::with_message(Errno::ENOMEM, "out of frames"))?;
        let vma = self.tree.find_mut(page).expect("area vanished during split");
        // A COW area always carries a frame already, so a fresh page
        // needs no further resolution.
        vma.frame = Some(frame);
        Ok(())
    }

    /// The write half of COW: duplicate a frame shared with someone else,
    /// or promote a sole-owner frame in place.
    fn resolve_cow(&mut self, page: Vaddr) -> Result<()> {
        let vma = self.tree.find_mut(page).expect("cow page without an area");
        debug_assert!(vma.is_cow());
        let shared = vma
            .frame
            .as_ref()
            .expect("cow area without a frame")
            .ref_count()
            > 1;
        if shared {
            let fresh = Frame::alloc()
                .ok_or_else(|| Error::with_message(Errno::ENOMEM, "out of frames"))?;
            fresh.copy_from(vma.frame.as_ref().unwrap());
            vma.frame = Some(fresh);
        }
        vma.flags.remove(VmaFlags::COW_WRITE_FAULT);
        vma.flags.insert(VmaFlags::WRITE);
        Ok(())
    }

    /// Kernel read through the address space, materialising as needed.
    pub fn read_bytes(&mut self, addr: Vaddr, buf: &mut [u8]) -> Result<()> {
        let mut pos = 0;
        while pos < buf.len() {
            let cursor = addr + pos;
            self.handle_fault(cursor, false)?;
            let page = page_align_down(cursor);
            let offset = cursor - page;
            let chunk = (PAGE_SIZE - offset).min(buf.len() - pos);
            let vma = self.tree.find(page).expect("fault resolution lost the area");
            let frame = vma.frame.as_ref().expect("unbacked area after fault");
            frame
                .read_bytes(offset, &mut buf[pos..pos + chunk])
                .expect("in-page access cannot overflow");
            pos += chunk;
        }
        Ok(())
    }

    /// Kernel write through the address space, resolving COW exactly as a
    /// hardware write fault would.
    pub fn write_bytes(&mut self, addr: Vaddr, buf: &[u8]) -> Result<()> {
        let mut pos = 0;
        while pos < buf.len() {
            let cursor = addr + pos;
            self.handle_fault(cursor, true)?;
            let page = page_align_down(cursor);
            let offset = cursor - page;
            let chunk = (PAGE_SIZE - offset).min(buf.len() - pos);
            let vma = self.tree.find(page).expect("fault resolution lost the area");
            let frame = vma.frame.as_ref().expect("unbacked area after fault");
            frame
                .write_bytes(offset, &buf[pos..pos + chunk])
                .expect("in-page access cannot overflow");
            pos += chunk;
        }
        Ok(())
    }

    /// Drops every mapping. The zombie transition uses this: afterwards
    /// the process holds no frames.
    pub fn clear(&mut self) {
        self.tree = IntervalTree::new();
    }

    /// All (paddr, local reference count) pairs of backed areas; test
    /// support for the refcount invariant.
    pub fn frame_references(&self) -> BTreeMap<Paddr, usize> {
        let mut out = BTreeMap::new();
        self.tree.for_each(&mut |vma| {
            if let Some(frame) = &vma.frame {
                *out.entry(frame.paddr()).or_insert(0) += 1;
            }
        });
        out
    }
}
