// SPDX-License-Identifier: MPL-2.0

//! GDT and TSS setup.
//!
//! The loader leaves us a flat GDT; we replace it with our own so a TSS
//! descriptor can be installed. The TSS exists for its interrupt stack
//! table: IST slot 1 backs the fault-class exception gates, keeping them
//! safe on kernel-stack faults.

use core::mem::size_of;

use crate::config::IST_STACK_SIZE;

pub const KERNEL_CS: u16 = 0x08;
pub const KERNEL_SS: u16 = 0x10;
pub const USER_CS: u16 = 0x1b;
pub const USER_SS: u16 = 0x23;
const TSS_SELECTOR: u16 = 0x28;

#[repr(C, packed(4))]
struct TaskStateSegment {
    _reserved1: u32,
    rsp: [u64; 3],
    _reserved2: u64,
    ist: [u64; 7],
    _reserved3: u64,
    _reserved4: u16,
    iomap_base: u16,
}

#[repr(align(16))]
struct IstStack([u8; IST_STACK_SIZE]);

static mut IST1_STACK: IstStack = IstStack([0; IST_STACK_SIZE]);

static mut TSS: TaskStateSegment = TaskStateSegment {
    _reserved1: 0,
    rsp: [0; 3],
    _reserved2: 0,
    ist: [0; 7],
    _reserved3: 0,
    _reserved4: 0,
    iomap_base: size_of::<TaskStateSegment>() as u16,
};

// null, kernel code, kernel data, user data, user code, TSS low, TSS high
static mut GDT: [u64; 7] = [
    0,
    0x00af_9b00_0000_ffff, // 64-bit kernel code
    0x00cf_9300_0000_ffff, // kernel data
    0x00cf_f300_0000_ffff, // user data
    0x00af_fb00_0000_ffff, // 64-bit user code
    0,
    0,
];

#[repr(C, packed)]
struct DescriptorTablePointer {
    limit: u16,
    base: u64,
}

pub(super) fn init() {
    unsafe {
        let tss_base = core::ptr::addr_of!(TSS) as u64;
        let ist1_top = core::ptr::addr_of!(IST1_STACK) as u64 + IST_STACK_SIZE as u64;
        // The packed TSS leaves the IST slots 4-byte aligned only.
        core::ptr::addr_of_mut!(TSS.ist[0]).write_unaligned(ist1_top);

        let limit = (size_of::<TaskStateSegment>() - 1) as u64;
        let low = 0x89u64 << 40
            | (limit & 0xffff)
            | (tss_base & 0xff_ffff) << 16
            | (limit & 0xf_0000) << 32
            | (tss_base & 0xff00_0000) << 32;
        let high = tss_base >> 32;
        core::ptr::addr_of_mut!(GDT[5]).write(low);
        core::ptr::addr_of_mut!(GDT[6]).write(high);
    }
    load();
}

#[cfg(target_os = "none")]
fn load() {
    unsafe {
        let gdtr = DescriptorTablePointer {
            limit: (size_of::<[u64; 7]>() - 1) as u16,
            base: core::ptr::addr_of!(GDT) as u64,
        };
        core::arch::asm!("lgdt [{}]", in(reg) core::ptr::addr_of!(gdtr),
                         options(readonly, nostack));
        core::arch::asm!("ltr {0:x}", in(reg) TSS_SELECTOR, options(nomem, nostack));
    }
}

#[cfg(not(target_os = "none"))]
fn load() {}
