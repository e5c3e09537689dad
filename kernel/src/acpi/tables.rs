//! Firmware table discovery: RSDP -> RSDT/XSDT -> FADT -> DSDT/SSDT.
//!
//! Independent of `arch::x86_64::acpi` (which only cares about MADT/MCFG
//! for early CPU/PCI topology) -- this module walks the same root tables
//! looking for the tables the AML interpreter and power management need.

use alloc::vec::Vec;

use crate::error::{KernelError, KernelResult};

const RSDP_SIGNATURE: &[u8; 8] = b"RSD PTR ";
const RSDT_SIGNATURE: &[u8; 4] = b"RSDT";
const XSDT_SIGNATURE: &[u8; 4] = b"XSDT";
const FADT_SIGNATURE: &[u8; 4] = b"FACP";
const DSDT_SIGNATURE: &[u8; 4] = b"DSDT";
const SSDT_SIGNATURE: &[u8; 4] = b"SSDT";

const FADT_DSDT_OFFSET: usize = 40;
const FADT_PM1A_EVT_BLK: usize = 56;
const FADT_PM1A_CNT_BLK: usize = 64;
const FADT_PM1B_CNT_BLK: usize = 68;
const FADT_PM_TMR_BLK: usize = 76;
const FADT_PM1_CNT_LEN: usize = 89;
const FADT_FLAGS: usize = 112;
const FADT_X_DSDT_OFFSET: usize = 140;
const FADT_MIN_LEN_FOR_X_DSDT: usize = 148;

#[repr(C, packed)]
struct AcpiSdtHeader {
    signature: [u8; 4],
    length: u32,
    revision: u8,
    checksum: u8,
    oem_id: [u8; 6],
    oem_table_id: [u8; 8],
    oem_revision: u32,
    creator_id: u32,
    creator_revision: u32,
}

/// The subset of FADT fields power management and the AML loader need.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fadt {
    pub pm1a_event_block: u32,
    pub pm1a_control_block: u32,
    pub pm1b_control_block: u32,
    pub pm_timer_block: u32,
    pub pm1_control_len: u8,
    pub flags: u32,
    pub dsdt_phys: u64,
}

/// Physical addresses/lengths of every DSDT/SSDT found while walking the
/// root table.
#[derive(Debug, Default)]
pub struct AcpiTables {
    pub fadt: Option<Fadt>,
    pub definition_blocks: Vec<(u64, u32)>,
}

fn phys_to_virt(phys: u64) -> KernelResult<usize> {
    crate::arch::x86_64::boot::phys_to_virt(phys)
        .map(|v| v as usize)
        .ok_or(KernelError::NotInitialized { subsystem: "ACPI (phys_to_virt)" })
}

fn read_u32(vaddr: usize, offset: usize) -> u32 {
    // SAFETY: callers only pass offsets within a table whose `length`
    // field was already checked to cover them.
    unsafe { core::ptr::read_unaligned((vaddr + offset) as *const u32) }
}

fn read_u8(vaddr: usize, offset: usize) -> u8 {
    // SAFETY: see `read_u32`.
    unsafe { core::ptr::read_unaligned((vaddr + offset) as *const u8) }
}

fn read_u64(vaddr: usize, offset: usize) -> u64 {
    // SAFETY: see `read_u32`.
    unsafe { core::ptr::read_unaligned((vaddr + offset) as *const u64) }
}

fn table_len(vaddr: usize) -> usize {
    // SAFETY: every ACPI table starts with a valid `AcpiSdtHeader`.
    let sdt = unsafe { &*(vaddr as *const AcpiSdtHeader) };
    (sdt.length) as usize
}

fn table_signature(vaddr: usize) -> [u8; 4] {
    // SAFETY: see `table_len`.
    let sdt = unsafe { &*(vaddr as *const AcpiSdtHeader) };
    sdt.signature
}

fn parse_fadt(vaddr: usize, len: usize) -> Fadt {
    let mut fadt = Fadt {
        dsdt_phys: read_u32(vaddr, FADT_DSDT_OFFSET) as u64,
        pm1a_event_block: read_u32(vaddr, FADT_PM1A_EVT_BLK),
        pm1a_control_block: read_u32(vaddr, FADT_PM1A_CNT_BLK),
        pm1b_control_block: read_u32(vaddr, FADT_PM1B_CNT_BLK),
        pm_timer_block: read_u32(vaddr, FADT_PM_TMR_BLK),
        pm1_control_len: read_u8(vaddr, FADT_PM1_CNT_LEN),
        flags: read_u32(vaddr, FADT_FLAGS),
    };
    if len >= FADT_MIN_LEN_FOR_X_DSDT {
        let x_dsdt = read_u64(vaddr, FADT_X_DSDT_OFFSET);
        if x_dsdt != 0 {
            fadt.dsdt_phys = x_dsdt;
        }
    }
    fadt
}

fn visit_table(vaddr: usize, tables: &mut AcpiTables) {
    let sig = table_signature(vaddr);
    let len = table_len(vaddr);
    if &sig == FADT_SIGNATURE {
        tables.fadt = Some(parse_fadt(vaddr, len));
    } else if &sig == DSDT_SIGNATURE || &sig == SSDT_SIGNATURE {
        tables.definition_blocks.push((vaddr as u64, len as u32));
    }
}

/// Discover the FADT and every DSDT/SSDT reachable from the RSDP.
pub fn discover() -> KernelResult<AcpiTables> {
    let rsdp_phys = crate::arch::x86_64::boot::rsdp_addr()
        .ok_or(KernelError::NotInitialized { subsystem: "ACPI (no RSDP)" })?;
    let rsdp_vaddr = phys_to_virt(rsdp_phys)?;

    // SAFETY: rsdp_vaddr is mapped by the bootloader's physical memory
    // offset; the RSDP signature check below validates it before use.
    let signature = unsafe { core::ptr::read_unaligned(rsdp_vaddr as *const [u8; 8]) };
    if &signature != RSDP_SIGNATURE {
        return Err(KernelError::InvalidArgument { name: "RSDP signature", value: "not 'RSD PTR '" });
    }
    let revision = read_u8(rsdp_vaddr, 15);

    let mut tables = AcpiTables::default();

    if revision >= 2 {
        let xsdt_phys = read_u64(rsdp_vaddr, 24);
        if xsdt_phys != 0 {
            walk_root(phys_to_virt(xsdt_phys)?, 8, &mut tables)?;
            return finalize_dsdt(tables);
        }
    }

    let rsdt_phys = read_u32(rsdp_vaddr, 16) as u64;
    walk_root(phys_to_virt(rsdt_phys)?, 4, &mut tables)?;
    finalize_dsdt(tables)
}

/// The FADT's DSDT pointer is authoritative; the RSDT/XSDT walk above
/// already finds any standalone `DSDT`-signed entry (rare but legal), so
/// add the FADT's pointer too in case it wasn't separately listed.
fn finalize_dsdt(mut tables: AcpiTables) -> KernelResult<AcpiTables> {
    if let Some(fadt) = tables.fadt {
        if fadt.dsdt_phys != 0 {
            if let Ok(vaddr) = phys_to_virt(fadt.dsdt_phys) {
                let len = table_len(vaddr);
                if !tables.definition_blocks.iter().any(|(p, _)| *p == fadt.dsdt_phys) {
                    tables.definition_blocks.push((fadt.dsdt_phys, len as u32));
                }
            }
        }
    }
    Ok(tables)
}

fn walk_root(root_vaddr: usize, ptr_size: usize, tables: &mut AcpiTables) -> KernelResult<()> {
    let sig = table_signature(root_vaddr);
    if ptr_size == 8 && &sig != XSDT_SIGNATURE {
        return Err(KernelError::InvalidArgument { name: "XSDT signature", value: "not XSDT" });
    }
    if ptr_size == 4 && &sig != RSDT_SIGNATURE {
        return Err(KernelError::InvalidArgument { name: "RSDT signature", value: "not RSDT" });
    }

    let len = table_len(root_vaddr);
    let header_size = core::mem::size_of::<AcpiSdtHeader>();
    let count = (len.saturating_sub(header_size)) / ptr_size;

    for i in 0..count {
        let entry_addr = root_vaddr + header_size + i * ptr_size;
        let phys = if ptr_size == 8 {
            read_u64(entry_addr, 0)
        } else {
            read_u32(entry_addr, 0) as u64
        };
        if let Ok(vaddr) = phys_to_virt(phys) {
            visit_table(vaddr, tables);
        }
    }
    Ok(())
}

/// Read a definition block's raw AML bytes (past its 36-byte SDT header).
pub fn definition_block_aml(phys: u64, len: u32) -> KernelResult<&'static [u8]> {
    let vaddr = phys_to_virt(phys)?;
    let header_size = core::mem::size_of::<AcpiSdtHeader>();
    let len = len as usize;
    if len < header_size {
        return Err(KernelError::InvalidArgument { name: "AML table length", value: "shorter than header" });
    }
    // SAFETY: vaddr..vaddr+len was validated as a mapped, correctly sized
    // ACPI table by `discover`.
    Ok(unsafe { core::slice::from_raw_parts((vaddr + header_size) as *const u8, len - header_size) })
}
