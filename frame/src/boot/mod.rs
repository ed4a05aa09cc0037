// SPDX-License-Identifier: MPL-2.0

//! The boot-information boundary.
//!
//! The Limine shim gathers what the kernel needs to know about the machine
//! into a [`BootInfo`] before handing over control. Nothing in this crate
//! talks to the loader protocol directly; the shim is the only producer.

pub mod kcmdline;
pub mod memory_region;

use spin::Once;

pub use kcmdline::KCmdlineArg;
pub use memory_region::{MemoryRegion, MemoryRegionType};

/// Everything the loader shim hands over to the kernel proper.
#[derive(Debug)]
pub struct BootInfo {
    /// The kernel command line, as one string.
    pub cmdline: &'static str,
    /// The memory map. Regions may overlap; usable ones are page aligned.
    pub memory_regions: &'static [MemoryRegion],
    /// How many loader modules were passed along.
    pub modules_count: usize,
    /// Virtual offset at which all physical memory is mapped (the HHDM).
    pub hhdm_offset: u64,
    /// Physical address of the ACPI RSDP, or 0 when absent.
    pub acpi_rsdp: usize,
}

static BOOT_INFO: Once<BootInfo> = Once::new();
static KCMDLINE: Once<KCmdlineArg> = Once::new();

/// Records the boot information. Called once, from [`crate::init`].
pub(crate) fn init(info: BootInfo) {
    KCMDLINE.call_once(|| KCmdlineArg::from(info.cmdline));
    BOOT_INFO.call_once(|| info);
}

/// The boot information recorded at startup.
pub fn boot_info() -> &'static BootInfo {
    BOOT_INFO.get().expect("boot info is not initialized")
}

/// The parsed kernel command line.
pub fn kernel_cmdline() -> &'static KCmdlineArg {
    KCMDLINE.get().expect("kernel cmdline is not initialized")
}

#[cfg(not(target_os = "none"))]
pub(crate) fn init_hosted_defaults() {
    KCMDLINE.call_once(|| KCmdlineArg::from(""));
    BOOT_INFO.call_once(|| BootInfo {
        cmdline: "",
        memory_regions: &[],
        modules_count: 0,
        hhdm_offset: 0,
        acpi_rsdp: 0,
    });
}
