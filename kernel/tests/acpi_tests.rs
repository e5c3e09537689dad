//! ACPI / AML Tests
//!
//! Exercises the namespace tree, byte-level AML decoding primitives, and
//! the value model's implicit-conversion rules. The full discovery path
//! (`acpi::tables::discover`) needs real firmware tables from QEMU and is
//! covered by `acpi::init()` running during normal boot, not here.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(oxidecore_kernel::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use alloc::vec::Vec;

use oxidecore_kernel::{
    acpi::{
        interpreter,
        namespace::{Namespace, NodeKind},
        parser::Cursor,
        value::{conv, Value},
    },
    kernel_assert, kernel_assert_eq, serial_println,
};

#[path = "common/mod.rs"]
mod common;

#[no_mangle]
pub extern "C" fn _start() -> ! {
    common::init_test_env("ACPI / AML Tests");
    test_main();
    loop {}
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    oxidecore_kernel::test_panic_handler(info)
}

// ===== Namespace Tests =====

#[test_case]
fn test_declare_and_resolve_absolute() {
    let namespace = Namespace::new();
    let node = namespace.declare("\\_SB.PCI0", NodeKind::Device);
    kernel_assert_eq!(node.name.as_str(), "PCI0");
    kernel_assert!(namespace.resolve("\\", "\\_SB.PCI0").is_some());
}

#[test_case]
fn test_search_rule_walks_up_scopes() {
    let namespace = Namespace::new();
    namespace.declare("\\_GPE", NodeKind::Scope);
    namespace.declare("\\_SB.PCI0", NodeKind::Device);
    // A name referenced from deep inside PCI0's scope that's only
    // declared at the root should still resolve via the search rule.
    let found = namespace.resolve("\\_SB.PCI0", "_GPE");
    kernel_assert!(found.is_some());
}

#[test_case]
fn test_caret_ascends_scope() {
    let namespace = Namespace::new();
    namespace.declare("\\_SB.PCI0.LNKA", NodeKind::Device);
    let resolved = namespace.normalize("\\_SB.PCI0.LNKA", "^_ADR");
    kernel_assert_eq!(resolved.as_str(), "\\_SB.PCI0._ADR");
}

#[test_case]
fn test_redeclare_upgrades_intermediate_scope() {
    let namespace = Namespace::new();
    // Declaring a nested path first creates `_SB` as an implicit Scope.
    namespace.declare("\\_SB.PCI0", NodeKind::Device);
    let sb = namespace.resolve("\\", "\\_SB").unwrap();
    kernel_assert_eq!(sb.kind(), NodeKind::Scope);
    // Explicitly declaring `_SB` itself upgrades that stub node.
    namespace.declare("\\_SB", NodeKind::Device);
    kernel_assert_eq!(sb.kind(), NodeKind::Device);
}

// ===== PkgLength / NameString decoding =====

#[test_case]
fn test_package_length_single_byte() {
    let bytes = [0x05u8, 0xAA, 0xBB, 0xCC, 0xDD];
    let mut cursor = Cursor::new(&bytes);
    let len = cursor.package_length().unwrap();
    // Single-byte PkgLength encodes its own byte in the total.
    kernel_assert_eq!(len, 4);
}

#[test_case]
fn test_package_length_multi_byte() {
    // Lead byte: top bits = 1 extra byte, low nibble = 0x2.
    // extra byte = 0x01 -> length = 0x2 | (0x01 << 4) = 0x12 = 18.
    // payload = 18 - 2 (lead + 1 extra byte) = 16.
    let bytes = [0x42u8, 0x01];
    let mut cursor = Cursor::new(&bytes);
    let len = cursor.package_length().unwrap();
    kernel_assert_eq!(len, 16);
}

#[test_case]
fn test_name_string_dual_name_prefix() {
    let bytes = [0x2Eu8, b'_', b'S', b'B', b'_', b'P', b'C', b'I', b'0'];
    let mut cursor = Cursor::new(&bytes);
    let name = cursor.name_string().unwrap();
    kernel_assert_eq!(name.as_str(), "_SB.PCI0");
}

#[test_case]
fn test_name_string_null_name() {
    let bytes = [0x00u8];
    let mut cursor = Cursor::new(&bytes);
    let name = cursor.name_string().unwrap();
    kernel_assert_eq!(name.as_str(), "");
}

// ===== Value conversion =====

#[test_case]
fn test_integer_to_buffer_conversion() {
    let value = Value::Integer(0x1122_3344);
    let converted = value.convert(conv::BUFFER).unwrap();
    match converted {
        Value::Buffer(bytes) => kernel_assert_eq!(&bytes[..4], &[0x44, 0x33, 0x22, 0x11]),
        _ => kernel_assert!(false),
    }
}

#[test_case]
fn test_buffer_to_integer_conversion() {
    let value = Value::Buffer(alloc::vec![0x01, 0x00, 0x00, 0x00]);
    kernel_assert_eq!(value.as_integer(), Some(1));
}

// ===== Namespace construction + method invocation via the interpreter =====

#[test_case]
fn test_load_table_declares_named_integer() {
    // Name(\FOO_, 0x2A) -- NameOp, NameString "FOO_", DWordPrefix, 4 bytes.
    let aml: Vec<u8> = alloc::vec![0x08, b'F', b'O', b'O', b'_', 0x0C, 0x2A, 0x00, 0x00, 0x00];
    let namespace = Namespace::new();
    interpreter::load_table(&namespace, &aml).unwrap();
    let result = interpreter::call_method(&namespace, "\\FOO", Vec::new()).unwrap();
    kernel_assert_eq!(result.as_integer(), Some(0x2A));
}
