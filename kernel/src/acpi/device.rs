//! Device enumeration over the built namespace.
//!
//! Walks every `Device` node, evaluates `_HID`/`_STA` if present, and hands
//! back a flat list driver-matching code elsewhere in the kernel can scan.
//! `_CRS` (current resource settings) parsing is out of scope here -- it
//! needs the full resource-descriptor grammar, not just AML evaluation --
//! so only its raw buffer is surfaced for a future resource parser.

use alloc::{string::String, vec::Vec};

use super::interpreter;
use super::namespace::{NodeKind, Namespace, Node};
use super::value::Value;
use crate::error::KernelResult;

#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    /// `_HID`, normalized to its string/EISA form when evaluation succeeds.
    pub hardware_id: Option<String>,
    /// `_STA` status bits (present/enabled/shown-in-ui/functioning/battery),
    /// defaults to "present and functioning" (0xF) when `_STA` is absent,
    /// matching the ACPI spec's default for devices that don't implement it.
    pub status: u32,
    /// Raw `_CRS` buffer, undecoded.
    pub resources: Option<Vec<u8>>,
}

const STA_DEFAULT: u32 = 0x0F;

/// Enumerate every `Device` node in the namespace.
pub fn enumerate(namespace: &Namespace) -> KernelResult<Vec<DeviceInfo>> {
    let mut devices = Vec::new();
    walk(namespace, &namespace.root, String::from("\\"), &mut devices)?;
    Ok(devices)
}

fn walk(namespace: &Namespace, node: &alloc::sync::Arc<Node>, path: String, out: &mut Vec<DeviceInfo>) -> KernelResult<()> {
    if node.kind() == NodeKind::Device {
        out.push(describe(namespace, &path));
    }

    let children: Vec<_> = node.children.read().values().cloned().collect();
    for child in children {
        let child_path = if path == "\\" {
            alloc::format!("\\{}", child.name)
        } else {
            alloc::format!("{}.{}", path, child.name)
        };
        walk(namespace, &child, child_path, out)?;
    }
    Ok(())
}

fn describe(namespace: &Namespace, path: &str) -> DeviceInfo {
    let hardware_id = eval_hid(namespace, path);
    let status = eval_sta(namespace, path).unwrap_or(STA_DEFAULT);
    let resources = eval_crs(namespace, path);

    DeviceInfo { path: String::from(path), hardware_id, status, resources }
}

fn eval_hid(namespace: &Namespace, path: &str) -> Option<String> {
    let hid_path = alloc::format!("{}._HID", path);
    let value = interpreter::call_method(namespace, &hid_path, Vec::new()).ok()?;
    match value {
        Value::String(s) => Some(s),
        Value::Integer(eisa) => Some(eisa_id_to_string(eisa as u32)),
        _ => None,
    }
}

fn eval_sta(namespace: &Namespace, path: &str) -> Option<u32> {
    let sta_path = alloc::format!("{}._STA", path);
    let value = interpreter::call_method(namespace, &sta_path, Vec::new()).ok()?;
    value.as_integer().map(|v| v as u32)
}

fn eval_crs(namespace: &Namespace, path: &str) -> Option<Vec<u8>> {
    let crs_path = alloc::format!("{}._CRS", path);
    let value = interpreter::call_method(namespace, &crs_path, Vec::new()).ok()?;
    match value {
        Value::Buffer(b) => Some(b),
        _ => None,
    }
}

/// Decode a 32-bit packed EISA ID (as returned by an integer `_HID`) into
/// its canonical `AAA####`-style string, e.g. `PNP0A03`.
fn eisa_id_to_string(eisa: u32) -> String {
    let bytes = eisa.to_be_bytes();
    let c1 = (b'A' - 1) + ((bytes[0] >> 2) & 0x1F);
    let c2 = (b'A' - 1) + (((bytes[0] & 0x03) << 3) | (bytes[1] >> 5));
    let c3 = (b'A' - 1) + (bytes[1] & 0x1F);
    alloc::format!(
        "{}{}{}{:02X}{:02X}",
        c1 as char,
        c2 as char,
        c3 as char,
        bytes[2],
        bytes[3]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eisa_id_decodes_pnp0a03() {
        // PNP0A03 encoded as the EISA ID algorithm expects.
        let encoded = 0x41D00A03u32;
        assert_eq!(eisa_id_to_string(encoded), "PNP0A03");
    }

    #[test]
    fn enumerate_finds_declared_device() {
        let namespace = Namespace::new();
        namespace.declare("\\_SB.DEV0", NodeKind::Device);
        let devices = enumerate(&namespace).unwrap();
        assert!(devices.iter().any(|d| d.path == "\\_SB.DEV0"));
        assert_eq!(devices.iter().find(|d| d.path == "\\_SB.DEV0").unwrap().status, STA_DEFAULT);
    }
}
