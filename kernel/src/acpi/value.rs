//! AML value model.
//!
//! Every object the interpreter manipulates -- a parsed literal, a named
//! field, the result of evaluating an expression -- is one of these. The
//! tagged union mirrors the ACPI spec's object types rather than Rust enum
//! ergonomics, so `convert()` can implement the spec's implicit-conversion
//! table directly.

use alloc::{string::String, sync::Arc, vec::Vec};

use spin::Mutex;

/// A reference to a named object elsewhere in the namespace, produced by
/// `RefOf`/`Index` and consumed by `DerefOf`/`Store`.
#[derive(Debug, Clone)]
pub struct Reference {
    pub path: String,
}

/// An `OpRegion` declaration: the address space it lives in plus the byte
/// offset/length `Field` elements index into.
#[derive(Debug, Clone, Copy)]
pub struct RegionInfo {
    pub space: u8,
    pub offset: u64,
    pub length: u64,
}

/// A field unit: a named, bit-addressed window into an operation region.
#[derive(Debug, Clone)]
pub struct FieldUnit {
    pub region_path: String,
    pub bit_offset: u64,
    pub bit_width: u64,
    pub access: AccessType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    Any,
    Byte,
    Word,
    DWord,
    QWord,
    Buffer,
}

/// Which conversions `Value::convert` is allowed to perform, as a bitmask
/// (several AML operators accept more than one target type).
pub mod conv {
    pub const INTEGER: u8 = 1 << 0;
    pub const STRING: u8 = 1 << 1;
    pub const BUFFER: u8 = 1 << 2;
    pub const BUFFER_FIELD: u8 = 1 << 3;
    pub const FIELD_UNIT: u8 = 1 << 4;
}

#[derive(Debug, Clone)]
pub enum Value {
    Integer(u64),
    String(String),
    Buffer(Vec<u8>),
    Package(Vec<Arc<Mutex<Value>>>),
    Reference(Reference),
    Register(RegionInfo),
    FieldUnit(FieldUnit),
    /// `Name` placeholder before it's ever been stored to, and the result
    /// of evaluating opcodes this interpreter doesn't model (e.g. a raw
    /// `Buffer` field used as a `BufferField`).
    Uninitialized,
}

impl Value {
    pub fn object_type(&self) -> &'static str {
        match self {
            Value::Integer(_) => "Integer",
            Value::String(_) => "String",
            Value::Buffer(_) => "Buffer",
            Value::Package(_) => "Package",
            Value::Reference(_) => "Reference",
            Value::Register(_) => "Region",
            Value::FieldUnit(_) => "FieldUnit",
            Value::Uninitialized => "Uninitialized",
        }
    }

    pub fn as_integer(&self) -> Option<u64> {
        match self {
            Value::Integer(v) => Some(*v),
            Value::Buffer(b) => {
                let mut out = 0u64;
                for (i, byte) in b.iter().take(8).enumerate() {
                    out |= (*byte as u64) << (i * 8);
                }
                Some(out)
            }
            Value::String(s) => parse_int_prefix(s),
            _ => None,
        }
    }

    /// Implements the ACPI "implicit source operand conversion" rules for
    /// the subset of target types this interpreter models. `mask` is an OR
    /// of `conv::*` flags naming the types the caller will accept.
    pub fn convert(&self, mask: u8) -> Option<Value> {
        if (mask & conv::INTEGER) != 0 {
            if let Some(i) = self.as_integer() {
                return Some(Value::Integer(i));
            }
        }
        if (mask & conv::STRING) != 0 {
            if let Value::String(_) = self {
                return Some(self.clone());
            }
            if let Value::Integer(i) = self {
                return Some(Value::String(u64_to_hex_string(*i)));
            }
        }
        if (mask & conv::BUFFER) != 0 {
            match self {
                Value::Buffer(_) => return Some(self.clone()),
                Value::Integer(i) => return Some(Value::Buffer(i.to_le_bytes().to_vec())),
                Value::String(s) => {
                    let mut bytes = s.as_bytes().to_vec();
                    bytes.push(0);
                    return Some(Value::Buffer(bytes));
                }
                _ => {}
            }
        }
        None
    }

    pub fn size_of(&self) -> Option<u64> {
        match self {
            Value::Buffer(b) => Some(b.len() as u64),
            Value::String(s) => Some(s.len() as u64),
            Value::Package(p) => Some(p.len() as u64),
            _ => None,
        }
    }
}

fn parse_int_prefix(s: &str) -> Option<u64> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        s.parse::<u64>().ok()
    }
}

fn u64_to_hex_string(v: u64) -> String {
    alloc::format!("{:#X}", v)
}
