// SPDX-License-Identifier: MPL-2.0

//! Local IRQ control.

const RFLAGS_IF: u64 = 1 << 9;

/// Disables local IRQs and returns a guard that restores the previous
/// state when dropped.
pub fn disable_local() -> DisabledLocalIrqGuard {
    DisabledLocalIrqGuard {
        was_enabled: read_and_clear_if(),
        _not_send: core::marker::PhantomData,
    }
}

/// Enables local IRQs.
pub fn enable_local() {
    #[cfg(target_os = "none")]
    unsafe {
        core::arch::asm!("sti", options(nomem, nostack));
    }
}

/// A guard for the duration of which local IRQs stay disabled.
#[derive(Debug)]
pub struct DisabledLocalIrqGuard {
    was_enabled: bool,
    // The guard must stay on the CPU whose IRQ state it captured.
    _not_send: core::marker::PhantomData<*mut ()>,
}

impl Drop for DisabledLocalIrqGuard {
    fn drop(&mut self) {
        if self.was_enabled {
            enable_local();
        }
    }
}

#[cfg(target_os = "none")]
fn read_and_clear_if() -> bool {
    let flags: u64;
    unsafe {
        core::arch::asm!("pushfq", "pop {}", "cli", out(reg) flags,
                         options(nomem, preserves_flags));
    }
    flags & RFLAGS_IF != 0
}

#[cfg(not(target_os = "none"))]
fn read_and_clear_if() -> bool {
    false
}
