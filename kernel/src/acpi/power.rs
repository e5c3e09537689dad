//! Sleep and reset support: `\_S5` lookup plus PM1 control register writes.
//!
//! There's no ACPI Reset Register support here (that's an ACPI 2.0+
//! extension with its own FADT fields this kernel's target boards don't
//! populate) -- shutdown goes through the PM1a/PM1b control block `SLP_EN`
//! write, which every PC since ACPI 1.0 honors.

use alloc::vec::Vec;

use x86_64::instructions::port::Port;

use super::interpreter;
use super::namespace::Namespace;
use super::tables::Fadt;
use super::value::Value;
use crate::error::{KernelError, KernelResult};

const SLP_EN: u16 = 1 << 13;
const SLP_TYP_SHIFT: u16 = 10;

/// ACPI sleep states this kernel knows how to enter. `S5` is a full power
/// off; the others are suspend-to-RAM style states a real power button
/// handler would choose between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepState {
    S1,
    S2,
    S3,
    S4,
    S5,
}

impl SleepState {
    fn package_name(self) -> &'static str {
        match self {
            SleepState::S1 => "\\_S1",
            SleepState::S2 => "\\_S2",
            SleepState::S3 => "\\_S3",
            SleepState::S4 => "\\_S4",
            SleepState::S5 => "\\_S5",
        }
    }
}

/// `SLP_TYPa`/`SLP_TYPb` extracted from a `\_Sx` package's first two
/// elements (the remaining elements are legacy/reserved).
#[derive(Debug, Clone, Copy)]
struct SlpType {
    typ_a: u16,
    typ_b: u16,
}

fn slp_type(namespace: &Namespace, state: SleepState) -> KernelResult<SlpType> {
    let value = interpreter::call_method(namespace, state.package_name(), Vec::new())?;
    let elements = match value {
        Value::Package(elements) => elements,
        _ => return Err(KernelError::InvalidArgument { name: "_Sx", value: "not a package" }),
    };
    if elements.len() < 2 {
        return Err(KernelError::InvalidArgument { name: "_Sx", value: "too few elements" });
    }
    let typ_a = elements[0].lock().as_integer().unwrap_or(0) as u16;
    let typ_b = elements[1].lock().as_integer().unwrap_or(0) as u16;
    Ok(SlpType { typ_a, typ_b })
}

/// Enter the given sleep state by writing `SLP_TYP | SLP_EN` to the PM1
/// control block(s) named in the FADT. Never returns on success for `S5`;
/// for the others, control returns to the caller on wake.
pub fn enter_sleep_state(namespace: &Namespace, fadt: &Fadt, state: SleepState) -> KernelResult<()> {
    let slp = slp_type(namespace, state)?;

    if fadt.pm1a_control_block == 0 {
        return Err(KernelError::NotInitialized { subsystem: "ACPI (no PM1a_CNT_BLK)" });
    }
    let pm1a_port = fadt.pm1a_control_block as u16;
    let value_a = (slp.typ_a << SLP_TYP_SHIFT) | SLP_EN;

    // SAFETY: PM1a_CNT_BLK is an I/O port the FADT names as the fixed
    // control register; writing it is how every ACPI-compliant OS enters
    // a sleep state.
    unsafe {
        let mut port: Port<u16> = Port::new(pm1a_port);
        port.write(value_a);
    }

    if fadt.pm1b_control_block != 0 {
        let pm1b_port = fadt.pm1b_control_block as u16;
        let value_b = (slp.typ_b << SLP_TYP_SHIFT) | SLP_EN;
        // SAFETY: see above, PM1b is the secondary (rare, chipset-split)
        // control block.
        unsafe {
            let mut port: Port<u16> = Port::new(pm1b_port);
            port.write(value_b);
        }
    }

    Ok(())
}

/// Shut the machine down via `\_S5`.
pub fn shutdown(namespace: &Namespace, fadt: &Fadt) -> KernelResult<()> {
    enter_sleep_state(namespace, fadt, SleepState::S5)
}
