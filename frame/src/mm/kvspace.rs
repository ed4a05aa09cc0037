// SPDX-License-Identifier: MPL-2.0

//! The kernel virtual-address bump allocator.
//!
//! A monotonically increasing cursor in the higher half. It exists only
//! for kernel bookkeeping structures sized at boot; nothing is ever given
//! back.

use alloc::vec::Vec;

use spin::Once;

use crate::config::PAGE_SIZE;
use crate::mm::{map_page, page_align_up, Frame, PtFlags, Vaddr};
use crate::sync::SpinLock;

static KVSPACE: Once<SpinLock<KVirtAllocator>> = Once::new();

struct KVirtAllocator {
    cursor: Vaddr,
    // Backing frames of mapped reservations, alive for the kernel's
    // lifetime.
    backing: Vec<Frame>,
}

/// Starts the cursor at `base`. Called once at boot.
pub fn init(base: Vaddr) {
    KVSPACE.call_once(|| {
        SpinLock::new(KVirtAllocator {
            cursor: base,
            backing: Vec::new(),
        })
    });
}

/// Reserves `ceil(bytes / PAGE_SIZE)` pages of kernel virtual address
/// space. With `PRESENT` in `flags`, fresh frames are mapped behind the
/// reservation through the kernel page table.
///
/// Exhaustion here means the boot sizing is wrong, which is fatal.
pub fn alloc_virtual(bytes: usize, flags: PtFlags) -> Vaddr {
    let npages = page_align_up(bytes) / PAGE_SIZE;
    let mut kv = KVSPACE
        .get()
        .expect("kernel virtual allocator is not initialized")
        .lock();
    let base = kv.cursor;
    kv.cursor = base
        .checked_add(npages * PAGE_SIZE)
        .expect("kernel virtual address space exhausted");
    if flags.contains(PtFlags::PRESENT) {
        for i in 0..npages {
            let frame = Frame::alloc().expect("out of frames for a boot reservation");
            map_page(base + i * PAGE_SIZE, frame.paddr(), flags)
                .expect("kernel mapping collision");
            kv.backing.push(frame);
        }
    }
    base
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mm::frame_allocator;

    #[test]
    fn cursor_is_monotonic_and_page_granular() {
        frame_allocator::init_hosted(1024);
        init(0xffff_a000_0000_0000);
        let a = alloc_virtual(10, PtFlags::empty());
        let b = alloc_virtual(PAGE_SIZE + 1, PtFlags::empty());
        let c = alloc_virtual(1, PtFlags::empty());
        assert_eq!(b, a + PAGE_SIZE);
        assert_eq!(c, b + 2 * PAGE_SIZE);
    }
}
