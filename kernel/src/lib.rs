//! OxideCore kernel library.
//!
//! Exposes every subsystem as a module so the `#[no_main]` binary
//! (`main.rs`) and the integration-test binaries under `tests/` can
//! drive them directly.

#![no_std]
#![cfg_attr(all(test, target_os = "none"), no_main)]
#![feature(custom_test_frameworks)]
#![feature(abi_x86_interrupt)]
#![cfg_attr(target_os = "none", feature(alloc_error_handler))]
#![cfg_attr(target_os = "none", test_runner(crate::test_runner))]
#![cfg_attr(target_os = "none", reexport_test_harness_main = "test_main")]

#[cfg(feature = "alloc")]
extern crate alloc;

// Bare-metal targets use the kernel heap (mm::heap); the host target
// (coverage / `cargo test` on x86_64-unknown-linux-gnu) delegates to the
// system allocator so ordinary `Vec`/`String` work in unit tests.
#[cfg(target_os = "none")]
use linked_list_allocator::LockedHeap;

#[cfg(target_os = "none")]
#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

#[cfg(not(target_os = "none"))]
extern crate std;
#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

/// Reference to the global kernel heap allocator (bare-metal targets only).
#[cfg(target_os = "none")]
pub fn get_allocator() -> &'static LockedHeap {
    &ALLOCATOR
}

#[macro_use]
pub mod print;

mod intrinsics;

pub mod acpi;
pub mod arch;
pub mod bootstrap;
pub mod drivers;
pub mod elf;
pub mod error;
pub mod fs;
pub mod irq;
pub mod log_service;
pub mod mm;
pub mod net;
pub mod process;
pub mod raii;
pub mod sched;
pub mod serial;
pub mod sync;
mod syscall;
pub mod timer;
pub mod utils;

#[cfg(test)]
mod test_config;
mod test_framework;

// Re-exported so tests/benches can reach commonly used types without
// reaching through the full module path.
pub use mm::{FrameNumber, MemoryRegion, FRAME_SIZE};
pub use sched::{Priority, SchedClass, Task};
#[cfg(test)]
pub use test_framework::test_runner;
pub use test_framework::{
    cycles_to_ns, exit_qemu, read_timestamp, test_panic_handler, BenchmarkRunner, QemuExitCode,
    Testable,
};

#[cfg(all(test, target_os = "none"))]
#[no_mangle]
pub extern "C" fn _start() -> ! {
    test_main();
    loop {
        core::hint::spin_loop();
    }
}

#[cfg(all(test, target_os = "none"))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    test_framework::test_panic_handler(info)
}

/// Heap allocation failure is unrecoverable in a `no_std` kernel; the
/// `alloc_error_handler` ABI requires `-> !`.
#[cfg(target_os = "none")]
#[alloc_error_handler]
fn alloc_error_handler(layout: core::alloc::Layout) -> ! {
    panic!("allocation error: {:?}", layout);
}
