// SPDX-License-Identifier: MPL-2.0

//! The interrupt descriptor table.
//!
//! All 256 gates are populated: a handful of vectors get dedicated entry
//! stubs, everything else shares a default stub that reports an unknown
//! vector. The fault-class gates run on IST stack 1.

use core::mem::size_of;

use super::gdt::KERNEL_CS;
use super::trap::{
    CLOCK_VECTOR, DIVIDE_VECTOR, DOUBLE_FAULT_VECTOR, GENERAL_PROTECTION_VECTOR,
    INVALID_OPCODE_VECTOR, KEYBOARD_VECTOR, PAGE_FAULT_VECTOR, SYS_VECTOR,
};

const NR_VECTORS: usize = 256;

#[repr(C)]
#[derive(Clone, Copy)]
struct IdtEntry {
    offset_low: u16,
    selector: u16,
    options: u16,
    offset_mid: u16,
    offset_high: u32,
    _reserved: u32,
}

impl IdtEntry {
    const fn missing() -> Self {
        IdtEntry {
            offset_low: 0,
            selector: 0,
            options: 0,
            offset_mid: 0,
            offset_high: 0,
            _reserved: 0,
        }
    }

    fn interrupt_gate(handler: u64, ist: u16, user_callable: bool) -> Self {
        debug_assert!(ist < 8);
        let dpl = if user_callable { 3 } else { 0 };
        IdtEntry {
            offset_low: handler as u16,
            selector: KERNEL_CS,
            // present | type 0xe (interrupt gate) | dpl | ist
            options: 0x8e00 | dpl << 13 | ist,
            offset_mid: (handler >> 16) as u16,
            offset_high: (handler >> 32) as u32,
            _reserved: 0,
        }
    }
}

static mut IDT: [IdtEntry; NR_VECTORS] = [IdtEntry::missing(); NR_VECTORS];

#[repr(C, packed)]
struct DescriptorTablePointer {
    limit: u16,
    base: u64,
}

pub(super) fn init() {
    let default = default_stub_addr();
    unsafe {
        let idt = &mut *core::ptr::addr_of_mut!(IDT);
        for entry in idt.iter_mut() {
            *entry = IdtEntry::interrupt_gate(default, 0, false);
        }
        for (vector, addr) in dedicated_stubs() {
            let ist = match vector {
                DOUBLE_FAULT_VECTOR | GENERAL_PROTECTION_VECTOR | PAGE_FAULT_VECTOR => 1,
                _ => 0,
            };
            let user_callable = vector == SYS_VECTOR;
            idt[vector as usize] = IdtEntry::interrupt_gate(addr, ist, user_callable);
        }
    }
    load();
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "none")] {
        extern "C" {
            fn __trap_divide();
            fn __trap_invalid_opcode();
            fn __trap_double_fault();
            fn __trap_general_protection();
            fn __trap_page_fault();
            fn __trap_clock();
            fn __trap_keyboard();
            fn __trap_sys();
            fn __trap_default();
        }

        fn dedicated_stubs() -> [(u8, u64); 8] {
            [
                (DIVIDE_VECTOR, __trap_divide as u64),
                (INVALID_OPCODE_VECTOR, __trap_invalid_opcode as u64),
                (DOUBLE_FAULT_VECTOR, __trap_double_fault as u64),
                (GENERAL_PROTECTION_VECTOR, __trap_general_protection as u64),
                (PAGE_FAULT_VECTOR, __trap_page_fault as u64),
                (CLOCK_VECTOR, __trap_clock as u64),
                (KEYBOARD_VECTOR, __trap_keyboard as u64),
                (SYS_VECTOR, __trap_sys as u64),
            ]
        }

        fn default_stub_addr() -> u64 {
            __trap_default as u64
        }

        fn load() {
            unsafe {
                let idtr = DescriptorTablePointer {
                    limit: (size_of::<[IdtEntry; NR_VECTORS]>() - 1) as u16,
                    base: core::ptr::addr_of!(IDT) as u64,
                };
                core::arch::asm!("lidt [{}]", in(reg) core::ptr::addr_of!(idtr),
                                 options(readonly, nostack));
            }
        }

        // Entry stubs. Each normalizes the stack to the RawTrapFrame
        // layout: vectors without a hardware error code push a zero one.
        core::arch::global_asm!(
            r#"
            .macro SAVE_GPRS
                push rax
                push rbx
                push rcx
                push rdx
                push rsi
                push rdi
                push rbp
                push r8
                push r9
                push r10
                push r11
                push r12
                push r13
                push r14
                push r15
            .endm
            .macro RESTORE_GPRS
                pop r15
                pop r14
                pop r13
                pop r12
                pop r11
                pop r10
                pop r9
                pop r8
                pop rbp
                pop rdi
                pop rsi
                pop rdx
                pop rcx
                pop rbx
                pop rax
            .endm

            .global __trap_common
            __trap_common:
                SAVE_GPRS
                mov rdi, rsp
                cld
                call trap_dispatch_raw
                RESTORE_GPRS
                add rsp, 16
                iretq

            .global __trap_divide
            __trap_divide:
                push 0
                push 0
                jmp __trap_common
            .global __trap_invalid_opcode
            __trap_invalid_opcode:
                push 0
                push 6
                jmp __trap_common
            .global __trap_double_fault
            __trap_double_fault:
                push 8
                jmp __trap_common
            .global __trap_general_protection
            __trap_general_protection:
                push 13
                jmp __trap_common
            .global __trap_page_fault
            __trap_page_fault:
                push 14
                jmp __trap_common
            .global __trap_clock
            __trap_clock:
                push 0
                push 32
                jmp __trap_common
            .global __trap_keyboard
            __trap_keyboard:
                push 0
                push 33
                jmp __trap_common
            .global __trap_sys
            __trap_sys:
                push 0
                push 48
                jmp __trap_common
            .global __trap_default
            __trap_default:
                push 0
                push 0xff
                jmp __trap_common
            "#
        );
    } else {
        // Hosted build: the gates are encoded but never loaded.
        fn dedicated_stubs() -> [(u8, u64); 8] {
            [
                (DIVIDE_VECTOR, 0),
                (INVALID_OPCODE_VECTOR, 0),
                (DOUBLE_FAULT_VECTOR, 0),
                (GENERAL_PROTECTION_VECTOR, 0),
                (PAGE_FAULT_VECTOR, 0),
                (CLOCK_VECTOR, 0),
                (KEYBOARD_VECTOR, 0),
                (SYS_VECTOR, 0),
            ]
        }

        fn default_stub_addr() -> u64 {
            0
        }

        fn load() {}
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn gate_encoding_places_the_handler_address() {
        let entry = IdtEntry::interrupt_gate(0x1234_5678_9abc_def0, 1, true);
        assert_eq!(entry.offset_low, 0xdef0);
        assert_eq!(entry.offset_mid, 0x9abc);
        assert_eq!(entry.offset_high, 0x1234_5678);
        assert_eq!(entry.selector, KERNEL_CS);
        // present, DPL 3, IST 1
        assert_eq!(entry.options, 0x8e00 | 3 << 13 | 1);
    }
}
