// SPDX-License-Identifier: MPL-2.0

//! Kernel time, counted in clock ticks.

use core::sync::atomic::{AtomicU64, Ordering};

/// Clock interrupts per second.
pub const HZ: u64 = 100;

static TICKS: AtomicU64 = AtomicU64::new(0);

/// Advances the tick counter. Called from the clock interrupt.
pub fn tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
}

/// Ticks since boot.
pub fn uptime_ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Whole seconds since boot. Good enough for file timestamps.
pub fn now_secs() -> u64 {
    uptime_ticks() / HZ
}
