//! VFS integration tests
//!
//! Exercises the mounted root filesystem's read/write/mkdir/unlink paths
//! through the high-level `fs::*` helpers rather than the `Vfs` struct
//! directly, matching how the rest of the kernel touches the filesystem.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(oxidecore_kernel::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use alloc::vec;

use oxidecore_kernel::{fs, kernel_assert, kernel_assert_eq, serial_println};

#[path = "common/mod.rs"]
mod common;

#[no_mangle]
pub extern "C" fn _start() -> ! {
    common::init_test_env("VFS Tests");
    test_main();
    loop {}
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    oxidecore_kernel::test_panic_handler(info)
}

#[test_case]
fn test_write_then_read_roundtrip() {
    fs::init();
    let data = vec![1u8, 2, 3, 4, 5];
    fs::write_file("/tmp_test_roundtrip", &data).expect("write_file failed");
    let read_back = fs::read_file("/tmp_test_roundtrip").expect("read_file failed");
    kernel_assert_eq!(read_back, data);
}

#[test_case]
fn test_file_exists_and_size() {
    fs::init();
    let data = vec![0xAAu8; 16];
    fs::write_file("/tmp_test_size", &data).expect("write_file failed");
    kernel_assert!(fs::file_exists("/tmp_test_size"));
    kernel_assert_eq!(fs::file_size("/tmp_test_size").unwrap(), 16);
}

#[test_case]
fn test_append_extends_file() {
    fs::init();
    fs::write_file("/tmp_test_append", &[1, 2, 3]).expect("write_file failed");
    fs::append_file("/tmp_test_append", &[4, 5]).expect("append_file failed");
    let contents = fs::read_file("/tmp_test_append").expect("read_file failed");
    kernel_assert_eq!(contents, vec![1, 2, 3, 4, 5]);
}

#[test_case]
fn test_mkdir_via_vfs() {
    fs::init();
    let vfs = fs::get_vfs();
    vfs.write()
        .mkdir("/tmp_test_dir", oxidecore_kernel::fs::Permissions::default())
        .expect("mkdir failed");
    kernel_assert!(vfs.read().resolve_path("/tmp_test_dir").is_ok());
}

#[test_case]
fn test_copy_file() {
    fs::init();
    fs::write_file("/tmp_test_src", &[9, 8, 7]).expect("write_file failed");
    fs::copy_file("/tmp_test_src", "/tmp_test_dst").expect("copy_file failed");
    kernel_assert_eq!(fs::read_file("/tmp_test_dst").unwrap(), vec![9, 8, 7]);
}

#[test_case]
fn test_nonexistent_file_read_fails() {
    fs::init();
    kernel_assert!(fs::read_file("/tmp_test_does_not_exist").is_err());
}
