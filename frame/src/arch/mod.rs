// SPDX-License-Identifier: MPL-2.0

//! Architecture-specific machinery.

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        pub mod x86;
        pub use x86::{fault_address, halt, irq, syscall, trap};
        pub(crate) use x86::init;
    } else if #[cfg(target_arch = "aarch64")] {
        pub mod aarch64;
        pub use aarch64::{fault_address, halt, irq, syscall, trap};
        pub(crate) use aarch64::init;
    } else {
        compile_error!("unsupported target architecture");
    }
}
