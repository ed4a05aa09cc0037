// SPDX-License-Identifier: MPL-2.0

//! Synchronization primitives.

mod spin;

pub use self::spin::{SpinLock, SpinLockGuard, SpinLockIrqDisabledGuard};
