// SPDX-License-Identifier: MPL-2.0

//! Fast-syscall entry.
//!
//! Programs the `syscall`/`sysret` MSRs so user-space `syscall`
//! instructions land in one kernel routine. The ABI: rax carries the
//! target PID (or compat syscall number), rdi the message-buffer pointer,
//! rdx the operation code; the return value comes back in rax.

use core::sync::atomic::{AtomicUsize, Ordering};

const IA32_EFER: u32 = 0xc000_0080;
const IA32_STAR: u32 = 0xc000_0081;
const IA32_LSTAR: u32 = 0xc000_0082;
const IA32_FMASK: u32 = 0xc000_0084;

const EFER_SCE: u64 = 1;
const RFLAGS_IF: u64 = 1 << 9;

/// A function the kernel registers to service fast syscalls.
pub type SyscallHandler = fn(u64, u64, u64) -> isize;

static HANDLER: AtomicUsize = AtomicUsize::new(0);

/// Registers the kernel's syscall handler.
pub fn set_syscall_handler(handler: SyscallHandler) {
    HANDLER.store(handler as usize, Ordering::Release);
}

/// Called from the entry stub with the three ABI registers.
#[no_mangle]
extern "C" fn syscall_dispatch_raw(target: u64, msg_ptr: u64, op: u64) -> isize {
    let raw = HANDLER.load(Ordering::Acquire);
    if raw == 0 {
        // Nothing registered yet; treat as an unsupported call.
        return -38; // ENOSYS
    }
    let handler: SyscallHandler = unsafe { core::mem::transmute(raw) };
    handler(target, msg_ptr, op)
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "none")] {
        use super::gdt::{KERNEL_CS, USER_CS};
        use crate::config::KERNEL_STACK_SIZE;

        #[repr(align(16))]
        struct SyscallStack([u8; KERNEL_STACK_SIZE]);

        static mut SYSCALL_STACK: SyscallStack = SyscallStack([0; KERNEL_STACK_SIZE]);

        #[no_mangle]
        static mut SYSCALL_USER_RSP: u64 = 0;
        #[no_mangle]
        static mut SYSCALL_KSTACK_TOP: u64 = 0;

        extern "C" {
            fn __syscall_entry();
        }

        pub(super) fn init() {
            unsafe {
                core::ptr::addr_of_mut!(SYSCALL_KSTACK_TOP).write(
                    core::ptr::addr_of!(SYSCALL_STACK) as u64 + KERNEL_STACK_SIZE as u64,
                );
                // STAR: sysret CS/SS base in 63:48, syscall CS/SS base in 47:32.
                let star =
                    ((USER_CS as u64 - 16) << 48) | ((KERNEL_CS as u64) << 32);
                wrmsr(IA32_STAR, star);
                wrmsr(IA32_LSTAR, __syscall_entry as u64);
                wrmsr(IA32_FMASK, RFLAGS_IF);
                wrmsr(IA32_EFER, rdmsr(IA32_EFER) | EFER_SCE);
            }
        }

        unsafe fn wrmsr(msr: u32, value: u64) {
            let low = value as u32;
            let high = (value >> 32) as u32;
            unsafe {
                core::arch::asm!("wrmsr", in("ecx") msr, in("eax") low, in("edx") high,
                                 options(nomem, nostack, preserves_flags));
            }
        }

        unsafe fn rdmsr(msr: u32) -> u64 {
            let low: u32;
            let high: u32;
            unsafe {
                core::arch::asm!("rdmsr", in("ecx") msr, out("eax") low, out("edx") high,
                                 options(nomem, nostack, preserves_flags));
            }
            (high as u64) << 32 | low as u64
        }

        // The entry stub. `syscall` leaves the user rip in rcx and
        // rflags in r11; both are callee-saved around the dispatch.
        // FMASK clears IF, so the scratch statics are race-free on one
        // CPU.
        core::arch::global_asm!(
            r#"
            .global __syscall_entry
            __syscall_entry:
                mov [rip + SYSCALL_USER_RSP], rsp
                mov rsp, [rip + SYSCALL_KSTACK_TOP]
                push rcx
                push r11
                mov rsi, rdi
                mov rdi, rax
                cld
                call syscall_dispatch_raw
                pop r11
                pop rcx
                mov rsp, [rip + SYSCALL_USER_RSP]
                sysretq
            "#
        );
    } else {
        pub(super) fn init() {}
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn dispatch_reaches_the_registered_handler() {
        fn echo(target: u64, _msg: u64, op: u64) -> isize {
            (target + op) as isize
        }
        assert_eq!(syscall_dispatch_raw(1, 2, 3), -38);
        set_syscall_handler(echo);
        assert_eq!(syscall_dispatch_raw(40, 0, 2), 42);
    }
}
