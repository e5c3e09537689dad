#![no_std]
#![no_main]

use bootloader_api::{entry_point, BootInfo};
use core::panic::PanicInfo;
use oxidecore_kernel::{arch, bootstrap, mm};

entry_point!(kernel_main, config = &arch::x86_64::boot::BOOTLOADER_CONFIG);

fn kernel_main(boot_info: &'static mut BootInfo) -> ! {
    arch::x86_64::boot::record_boot_info(boot_info);
    let memory_map = mm::bootloader::from_bootloader_api(&boot_info.memory_regions);
    bootstrap::run(&memory_map)
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    oxidecore_kernel::println!("[KERNEL PANIC] {}", info);
    arch::halt();
}
