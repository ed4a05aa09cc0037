// SPDX-License-Identifier: MPL-2.0

//! Trap dispatch.
//!
//! The entry stubs in `idt` build a [`RawTrapFrame`] on the interrupt
//! stack and land here; this module hands a normalized [`TrapFrame`] to
//! whichever callback the kernel registered for the vector.

use crate::cpu::TrapFrame;
use crate::sync::SpinLock;

/// Vector numbers with dedicated handlers.
pub const DIVIDE_VECTOR: u8 = 0;
pub const INVALID_OPCODE_VECTOR: u8 = 6;
pub const DOUBLE_FAULT_VECTOR: u8 = 8;
pub const GENERAL_PROTECTION_VECTOR: u8 = 13;
pub const PAGE_FAULT_VECTOR: u8 = 14;
pub const CLOCK_VECTOR: u8 = 32;
pub const KEYBOARD_VECTOR: u8 = 33;
pub const SYS_VECTOR: u8 = 48;

/// The stub pushes this pseudo-vector for gates without a dedicated stub.
pub const UNKNOWN_VECTOR: u64 = 0xff;

/// A function the kernel hangs on a trap vector.
pub type TrapCallback = fn(&mut TrapFrame);

static CALLBACKS: SpinLock<[Option<TrapCallback>; 256]> = SpinLock::new([None; 256]);

/// Registers `callback` for `vector`, replacing any previous one.
pub fn register_callback(vector: u8, callback: TrapCallback) {
    CALLBACKS.lock()[vector as usize] = Some(callback);
}

/// The layout the entry stubs leave on the stack: general registers in
/// push order, the vector and error code, then the hardware frame.
#[repr(C)]
pub(super) struct RawTrapFrame {
    r15: u64,
    r14: u64,
    r13: u64,
    r12: u64,
    r11: u64,
    r10: u64,
    r9: u64,
    r8: u64,
    rbp: u64,
    rdi: u64,
    rsi: u64,
    rdx: u64,
    rcx: u64,
    rbx: u64,
    rax: u64,
    trap_num: u64,
    error_code: u64,
    rip: u64,
    cs: u64,
    rflags: u64,
    rsp: u64,
    ss: u64,
}

impl RawTrapFrame {
    fn to_trap_frame(&self) -> TrapFrame {
        let mut f = TrapFrame::default();
        let g = &mut f.general;
        g.rax = self.rax;
        g.rbx = self.rbx;
        g.rcx = self.rcx;
        g.rdx = self.rdx;
        g.rsi = self.rsi;
        g.rdi = self.rdi;
        g.rbp = self.rbp;
        g.r8 = self.r8;
        g.r9 = self.r9;
        g.r10 = self.r10;
        g.r11 = self.r11;
        g.r12 = self.r12;
        g.r13 = self.r13;
        g.r14 = self.r14;
        g.r15 = self.r15;
        g.rip = self.rip;
        g.rsp = self.rsp;
        g.rflags = self.rflags;
        f.trap_num = self.trap_num;
        f.error_code = self.error_code;
        f
    }

    fn apply(&mut self, frame: &TrapFrame) {
        let g = &frame.general;
        self.rax = g.rax;
        self.rbx = g.rbx;
        self.rcx = g.rcx;
        self.rdx = g.rdx;
        self.rsi = g.rsi;
        self.rdi = g.rdi;
        self.rbp = g.rbp;
        self.r8 = g.r8;
        self.r9 = g.r9;
        self.r10 = g.r10;
        self.r11 = g.r11;
        self.r12 = g.r12;
        self.r13 = g.r13;
        self.r14 = g.r14;
        self.r15 = g.r15;
        self.rip = g.rip;
        self.rsp = g.rsp;
        self.rflags = g.rflags;
    }
}

/// Entered from the assembly stubs with a pointer to the raw frame.
#[no_mangle]
pub(super) extern "C" fn trap_dispatch_raw(raw: &mut RawTrapFrame) {
    let mut frame = raw.to_trap_frame();
    dispatch(&mut frame);
    raw.apply(&frame);
}

fn dispatch(frame: &mut TrapFrame) {
    let vector = frame.trap_num as usize;
    let callback = CALLBACKS.lock().get(vector).copied().flatten();
    match callback {
        Some(callback) => callback(frame),
        None => {
            // No handler: an unexpected trap is a kernel bug.
            panic!(
                "unhandled trap {} (error code {:#x}) at {:#x}",
                frame.trap_num, frame.error_code, frame.general.rip
            );
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn registered_callbacks_see_the_frame() {
        fn bump_rax(frame: &mut TrapFrame) {
            frame.general.rax += 1;
        }
        register_callback(200, bump_rax);
        let mut frame = TrapFrame::default();
        frame.trap_num = 200;
        dispatch(&mut frame);
        assert_eq!(frame.general.rax, 1);
    }
}
