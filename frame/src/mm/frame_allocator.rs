// SPDX-License-Identifier: MPL-2.0

//! The physical frame pool.
//!
//! Every managed frame has a reference-count slot in a metadata array;
//! copy-on-write sharing and shared mappings raise the count, and a frame
//! returns to the free list when its count drops to zero. Frame contents
//! are reached through a linear offset — the HHDM offset on real
//! hardware, zero for a hosted pool carved out of the test heap.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use spin::Once;

use crate::boot::MemoryRegion;
use crate::config::PAGE_SIZE;
use crate::mm::Paddr;
use crate::sync::SpinLock;

static POOL: Once<FramePool> = Once::new();

struct FrameMeta {
    ref_count: AtomicU32,
}

/// The pool of physical page frames.
pub struct FramePool {
    base: Paddr,
    nframes: usize,
    linear_offset: usize,
    meta: Box<[FrameMeta]>,
    free: SpinLock<Vec<usize>>,
}

impl FramePool {
    fn with_range(base: Paddr, nframes: usize, linear_offset: usize) -> Self {
        let meta = (0..nframes)
            .map(|_| FrameMeta {
                ref_count: AtomicU32::new(0),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        // Pop order is immaterial; lowest-address-first eases debugging.
        let free = (0..nframes).rev().collect();
        Self {
            base,
            nframes,
            linear_offset,
            meta,
            free: SpinLock::new(free),
        }
    }

    /// The number of frames the pool manages.
    pub fn nframes(&self) -> usize {
        self.nframes
    }

    /// The number of frames currently free.
    pub fn free_frames(&self) -> usize {
        self.free.lock().len()
    }

    fn index_of(&self, paddr: Paddr) -> usize {
        debug_assert!(paddr >= self.base);
        let index = (paddr - self.base) / PAGE_SIZE;
        debug_assert!(index < self.nframes);
        index
    }

    fn paddr_of(&self, index: usize) -> Paddr {
        self.base + index * PAGE_SIZE
    }

    /// Allocates a zeroed frame with reference count 1, or `None` when
    /// the pool is exhausted.
    pub(super) fn alloc(&self) -> Option<Paddr> {
        let index = self.free.lock().pop()?;
        let prev = self.meta[index].ref_count.swap(1, Ordering::AcqRel);
        debug_assert_eq!(prev, 0);
        let paddr = self.paddr_of(index);
        unsafe { core::ptr::write_bytes(self.frame_ptr(paddr), 0, PAGE_SIZE) };
        Some(paddr)
    }

    /// Raises the reference count of an allocated frame.
    pub(super) fn inc_ref(&self, paddr: Paddr) {
        let prev = self.meta[self.index_of(paddr)]
            .ref_count
            .fetch_add(1, Ordering::AcqRel);
        debug_assert!(prev > 0);
    }

    /// Drops one reference; the frame returns to the free list when the
    /// count reaches zero.
    pub(super) fn dec_ref(&self, paddr: Paddr) {
        let index = self.index_of(paddr);
        let prev = self.meta[index].ref_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0);
        if prev == 1 {
            self.free.lock().push(index);
        }
    }

    /// The current reference count of a frame.
    pub fn ref_count(&self, paddr: Paddr) -> u32 {
        self.meta[self.index_of(paddr)].ref_count.load(Ordering::Acquire)
    }

    /// A raw pointer to the first byte of the frame's contents.
    ///
    /// # Safety
    ///
    /// The caller must hold a reference to the frame and must not create
    /// aliasing Rust references from the pointer.
    pub(super) fn frame_ptr(&self, paddr: Paddr) -> *mut u8 {
        debug_assert!(self.ref_count(paddr) > 0);
        (paddr + self.linear_offset) as *mut u8
    }
}

/// Sets the pool up over the largest usable region of the boot memory map.
pub fn init(regions: &[MemoryRegion], linear_offset: usize) {
    let largest = regions
        .iter()
        .map(|r| r.page_aligned())
        .filter(|r| r.is_usable() && !r.is_empty())
        .max_by_key(|r| r.len());
    let Some(region) = largest else {
        panic!("no usable memory region to build the frame pool from");
    };
    for skipped in regions.iter().filter(|r| {
        r.is_usable() && r.page_aligned().base() != region.base()
    }) {
        log::info!(
            "frame pool: skipping usable region {:#x}..{:#x}",
            skipped.base(),
            skipped.base() + skipped.len()
        );
    }
    let nframes = region.len() / PAGE_SIZE;
    log::info!(
        "frame pool: managing {} frames at {:#x}",
        nframes,
        region.base()
    );
    POOL.call_once(|| FramePool::with_range(region.base(), nframes, linear_offset));
}

/// Sets up a pool backed by leaked heap memory, for hosted runs. The
/// "physical" addresses are the buffer's own addresses, so the linear
/// offset is zero. Idempotent.
#[cfg(not(target_os = "none"))]
pub fn init_hosted(nframes: usize) {
    POOL.call_once(|| {
        let bytes = (nframes + 1) * PAGE_SIZE;
        let buf = Box::leak(alloc::vec![0u8; bytes].into_boxed_slice());
        let base = crate::mm::page_align_up(buf.as_ptr() as usize);
        FramePool::with_range(base, nframes, 0)
    });
}

/// The global frame pool.
pub fn pool() -> &'static FramePool {
    POOL.get().expect("frame pool is not initialized")
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mm::Frame;

    fn setup() {
        init_hosted(1024);
    }

    #[test]
    fn alloc_is_zeroed_with_count_one() {
        setup();
        let frame = Frame::alloc().unwrap();
        assert_eq!(frame.ref_count(), 1);
        let mut buf = [0xffu8; 16];
        frame.read_bytes(100, &mut buf).unwrap();
        assert_eq!(buf, [0u8; 16]);
    }

    #[test]
    fn clone_raises_and_drop_lowers_the_count() {
        setup();
        let frame = Frame::alloc().unwrap();
        let paddr = frame.paddr();
        let dup = frame.clone();
        assert_eq!(pool().ref_count(paddr), 2);
        drop(dup);
        assert_eq!(pool().ref_count(paddr), 1);
        drop(frame);
        assert_eq!(pool().ref_count(paddr), 0);
    }

    #[test]
    fn freed_frames_are_reusable() {
        setup();
        let before = pool().free_frames();
        let frame = Frame::alloc().unwrap();
        assert_eq!(pool().free_frames(), before - 1);
        drop(frame);
        assert_eq!(pool().free_frames(), before);
    }
}
