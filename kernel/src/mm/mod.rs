//! Memory management
//!
//! Ties together the physical frame allocator, kernel heap, page tables,
//! and per-process virtual address spaces. `init()` brings these up in
//! dependency order: frames before heap, heap before anything that
//! allocates.

#![allow(dead_code)]

extern crate alloc;

pub mod bootloader;
pub mod demand_paging;
pub mod frame_allocator;
pub mod heap;
pub mod page_fault;
pub mod page_table;
pub mod shared_object;
pub mod user_validation;
pub mod vas;
pub mod vmm;

pub use frame_allocator::{
    FrameAllocatorError, FrameAllocatorStats, FrameNumber, PhysicalAddress, PhysicalFrame,
    FRAME_ALLOCATOR, FRAME_SIZE,
};
pub use vas::{MappingType, VirtualAddressSpace, VirtualMapping};
pub use vmm::VirtualMemoryManager;

/// Page size in bytes, matching `frame_allocator::FRAME_SIZE`. Kept as a
/// separate name since callers reason about "a page" independently of how
/// frames are allocated.
pub const PAGE_SIZE: usize = FRAME_SIZE;

/// Virtual memory address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VirtualAddress(pub u64);

impl VirtualAddress {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub const fn as_usize(&self) -> usize {
        self.0 as usize
    }

    pub fn add(&self, offset: usize) -> Self {
        Self(self.0 + offset as u64)
    }
}

/// Page size options
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSize {
    /// 4 KiB pages
    Small = 4096,
    /// 2 MiB pages
    Large = 2 * 1024 * 1024,
    /// 1 GiB pages
    Huge = 1024 * 1024 * 1024,
}

/// Page table protection/attribute flags.
#[derive(Debug, Clone, Copy)]
pub struct PageFlags(u64);

impl PageFlags {
    pub const PRESENT: Self = Self(1 << 0);
    pub const WRITABLE: Self = Self(1 << 1);
    pub const USER: Self = Self(1 << 2);
    pub const WRITE_THROUGH: Self = Self(1 << 3);
    pub const NO_CACHE: Self = Self(1 << 4);
    pub const ACCESSED: Self = Self(1 << 5);
    pub const DIRTY: Self = Self(1 << 6);
    pub const HUGE: Self = Self(1 << 7);
    pub const GLOBAL: Self = Self(1 << 8);
    pub const NO_EXECUTE: Self = Self(1 << 63);

    pub const fn bits(&self) -> u64 {
        self.0
    }

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl core::ops::BitOr for PageFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// A simplified usable/unusable memory range, as reported by the bootloader
/// memory map after classification (see `bootloader::BootloaderMemoryRegion`).
#[derive(Debug, Clone, Copy)]
pub struct MemoryRegion {
    pub start: u64,
    pub size: u64,
    pub usable: bool,
}

/// Bring up memory management: seed the frame allocator from the bootloader
/// memory map, reserve the fixed low-memory regions, then the kernel heap.
pub fn init(memory_map: &[bootloader::BootloaderMemoryRegion]) {
    println!("[MM] Initializing memory management...");

    if let Err(e) = bootloader::process_memory_map(memory_map) {
        println!("[MM] Failed to process memory map: {e}");
    }
    if let Err(e) = bootloader::reserve_standard_regions() {
        println!("[MM] Failed to reserve standard regions: {e}");
    }
    if let Err(e) = heap::init() {
        println!("[MM] Heap init failed: {e}");
    }

    println!("[MM] Memory management initialized");
}

/// Convert a physical address to the kernel-virtual address it's mapped at
/// via the bootloader's physical memory mapping.
///
/// Returns the identity address (`phys`) if called before the bootloader
/// offset is known -- callers only reach this path post-boot, by which
/// point the binary's entry function has already recorded it via
/// `arch::x86_64::boot::record_boot_info`.
#[cfg(target_arch = "x86_64")]
pub fn phys_to_virt_addr(phys: u64) -> u64 {
    crate::arch::x86_64::boot::phys_to_virt(phys).unwrap_or(phys)
}

/// Physical address of the currently loaded root page table (CR3 on x86_64).
#[cfg(target_arch = "x86_64")]
pub fn get_kernel_page_table() -> usize {
    crate::arch::x86_64::mmu::read_cr3().as_usize()
}

/// Release a single physical frame back to the frame allocator.
pub fn free_frame(addr: PhysicalAddress) {
    if let Err(e) = FRAME_ALLOCATOR.lock().free_frames(addr.as_frame(), 1) {
        println!("[MM] free_frame({:#x}) failed: {e:?}", addr.as_u64());
    }
}

/// Allocate `count` contiguous physical frames, returned as individual
/// frame numbers for callers that walk them one page at a time.
pub fn allocate_pages(
    count: usize,
    numa_node: Option<usize>,
) -> core::result::Result<alloc::vec::Vec<FrameNumber>, &'static str> {
    let first = FRAME_ALLOCATOR
        .lock()
        .allocate_frames(count, numa_node)
        .map_err(|_| "out of physical memory")?;
    Ok((0..count as u64)
        .map(|i| FrameNumber::new(first.as_u64() + i))
        .collect())
}

/// Snapshot of frame allocator usage, in frames, for consumers like procfs.
#[derive(Debug, Clone, Copy)]
pub struct MemInfo {
    pub total_frames: u64,
    pub free_frames: u64,
    /// No page cache exists yet; always zero.
    pub cached_frames: u64,
}

pub fn get_memory_stats() -> MemInfo {
    let stats = FRAME_ALLOCATOR.lock().get_stats();
    MemInfo {
        total_frames: stats.total_frames,
        free_frames: stats.free_frames,
        cached_frames: 0,
    }
}
