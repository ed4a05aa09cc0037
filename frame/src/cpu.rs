// SPDX-License-Identifier: MPL-2.0

//! CPU execution context.

/// The general-purpose integer register file as captured on kernel entry.
///
/// Register order follows the save sequence of the trap stubs:
/// rax, rbx, rcx, rdx, rsi, rdi, rbp, r8-r15, then rip/rsp/rflags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct GeneralRegs {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub rsp: u64,
    pub rflags: u64,
}

/// The register save area of a process, together with what the trap
/// machinery needs to re-enter it.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct UserContext {
    pub general: GeneralRegs,
    pub trap_num: u64,
    pub error_code: u64,
}

impl UserContext {
    /// Captures the register file from a trap frame.
    pub fn save(&mut self, frame: &TrapFrame) {
        self.general = frame.general;
        self.trap_num = frame.trap_num;
        self.error_code = frame.error_code;
    }

    /// Writes the register file back into a trap frame. The frame may
    /// belong to a different process than the one `save` ran for.
    pub fn restore(&self, frame: &mut TrapFrame) {
        frame.general = self.general;
        frame.trap_num = self.trap_num;
        frame.error_code = self.error_code;
    }

    pub fn instruction_pointer(&self) -> usize {
        self.general.rip as usize
    }

    pub fn set_instruction_pointer(&mut self, ip: usize) {
        self.general.rip = ip as u64;
    }

    pub fn stack_pointer(&self) -> usize {
        self.general.rsp as usize
    }

    pub fn set_stack_pointer(&mut self, sp: usize) {
        self.general.rsp = sp as u64;
    }

    pub fn flags(&self) -> u64 {
        self.general.rflags
    }

    pub fn set_flags(&mut self, flags: u64) {
        self.general.rflags = flags;
    }

    /// The register carrying the syscall return value.
    pub fn syscall_ret(&self) -> i64 {
        self.general.rax as i64
    }

    pub fn set_syscall_ret(&mut self, val: i64) {
        self.general.rax = val as u64;
    }

    /// The three registers of the fast-syscall ABI: target (rax),
    /// message pointer (rdi), operation code (rdx).
    pub fn syscall_args(&self) -> (u64, u64, u64) {
        (self.general.rax, self.general.rdi, self.general.rdx)
    }
}

/// What the trap stubs push before entering Rust code.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct TrapFrame {
    pub general: GeneralRegs,
    pub trap_num: u64,
    pub error_code: u64,
}
