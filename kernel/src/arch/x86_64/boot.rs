//! Bootloader hand-off state for x86_64
//!
//! The bootloader disk-image tool (see `bootloader_api`) hands the real
//! entry point -- `entry_point!`, invoked from the binary crate's
//! `main.rs` so its `#[no_mangle] _start` is guaranteed to end up in the
//! final link -- a `&'static mut BootInfo` before any kernel code has
//! run. `record_boot_info` stashes the pieces later subsystems need: the
//! physical memory offset and the ACPI RSDP address.

use bootloader_api::{
    config::{BootloaderConfig, Mapping},
    BootInfo,
};
use spin::Once;

/// Request the bootloader map all physical memory at a dynamic virtual
/// offset, which `phys_to_virt` relies on.
pub static BOOTLOADER_CONFIG: BootloaderConfig = {
    let mut config = BootloaderConfig::new_default();
    config.mappings.physical_memory = Some(Mapping::Dynamic);
    config
};

static PHYSICAL_MEMORY_OFFSET: Once<u64> = Once::new();
static RSDP_ADDR: Once<u64> = Once::new();

/// Record the fields of `BootInfo` that outlive the entry function. Called
/// once from `main.rs`'s `kernel_main` before handing off to `bootstrap::run`.
pub fn record_boot_info(boot_info: &BootInfo) {
    if let Some(offset) = boot_info.physical_memory_offset.into_option() {
        PHYSICAL_MEMORY_OFFSET.call_once(|| offset);
    }
    if let Some(rsdp) = boot_info.rsdp_addr.into_option() {
        RSDP_ADDR.call_once(|| rsdp);
    }
}

/// Offset at which the bootloader identity-maps all physical memory into
/// kernel space, or `None` before `kernel_main` has run.
pub fn physical_memory_offset() -> Option<u64> {
    PHYSICAL_MEMORY_OFFSET.get().copied()
}

/// Translate a physical address to its kernel-virtual address via the
/// bootloader's physical memory mapping. `None` before `kernel_main` has run.
pub fn phys_to_virt(phys: u64) -> Option<u64> {
    physical_memory_offset().map(|offset| offset + phys)
}

/// Physical address of the ACPI RSDP, if the bootloader found one.
pub fn rsdp_addr() -> Option<u64> {
    RSDP_ADDR.get().copied()
}
