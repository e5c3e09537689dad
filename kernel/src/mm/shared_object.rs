//! Shared memory objects (SMO).
//!
//! A shared memory object is a block of kernel-owned physical frames
//! identified by an opaque key, independent of any virtual address space.
//! `smo_create` allocates and zeroes the frames; `smo_map` installs a
//! `SharedObject`-backed `VirtualMapping` over them in the caller's VAS;
//! `smo_release` is called once per unmap to drop a mapping's reference.
//! `smo_delete` removes the key from the table so no new `smo_map` can
//! find it, but frames already mapped stay valid (and the object's frames
//! stay alive) until the last mapping unmaps.

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "alloc")]
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::{
    error::KernelError,
    mm::{FrameNumber, FRAME_ALLOCATOR, FRAME_SIZE},
};

#[cfg(feature = "alloc")]
use alloc::collections::BTreeMap;

/// A registered shared memory object.
#[cfg(feature = "alloc")]
struct SharedObjectData {
    frames: Vec<FrameNumber>,
    /// Number of live `SharedObject` mappings referencing this key.
    refcount: usize,
    /// Set by `smo_delete`; the key is no longer mappable, but existing
    /// mappings (and their refcount) remain valid until they all unmap.
    deleted: bool,
}

#[cfg(feature = "alloc")]
static SHARED_OBJECTS: Mutex<BTreeMap<u64, SharedObjectData>> = Mutex::new(BTreeMap::new());
static NEXT_SMO_KEY: AtomicU64 = AtomicU64::new(1);

/// Allocate and zero `size` bytes (rounded up to a page) of kernel-owned
/// frames, registering them under a freshly allocated key. The object has
/// zero mappings until `smo_map` is called.
#[cfg(feature = "alloc")]
pub fn smo_create(size: usize) -> Result<u64, KernelError> {
    let num_pages = size.div_ceil(FRAME_SIZE).max(1);
    let mut frames = Vec::with_capacity(num_pages);

    {
        let allocator = FRAME_ALLOCATOR.lock();
        for _ in 0..num_pages {
            match allocator.allocate_frames(1, None) {
                Ok(frame) => frames.push(frame),
                Err(_) => {
                    for &f in &frames {
                        allocator.free_frames(f, 1).ok();
                    }
                    return Err(KernelError::OutOfMemory {
                        requested: size,
                        available: 0,
                    });
                }
            }
        }
    }

    for &frame in &frames {
        let virt = crate::mm::phys_to_virt_addr(frame.as_u64() * FRAME_SIZE as u64) as *mut u8;
        // SAFETY: frame was just allocated and is mapped into the kernel's
        // identity physical memory window.
        unsafe {
            core::ptr::write_bytes(virt, 0, FRAME_SIZE);
        }
    }

    let key = NEXT_SMO_KEY.fetch_add(1, Ordering::Relaxed);
    SHARED_OBJECTS.lock().insert(
        key,
        SharedObjectData {
            frames,
            refcount: 0,
            deleted: false,
        },
    );
    Ok(key)
}

/// Look up the frames backing `key` and record one more mapping reference.
/// Returns an error if the key is unknown (never created, or deleted with
/// no live mappings left to resurrect it from).
#[cfg(feature = "alloc")]
pub fn smo_frames(key: u64) -> Result<Vec<FrameNumber>, KernelError> {
    let mut objects = SHARED_OBJECTS.lock();
    let object = objects.get_mut(&key).ok_or(KernelError::NotFound {
        resource: "shared memory object",
        id: key,
    })?;
    if object.deleted {
        return Err(KernelError::NotFound {
            resource: "shared memory object",
            id: key,
        });
    }
    object.refcount += 1;
    Ok(object.frames.clone())
}

/// Drop one mapping's reference to `key`. Frees the object's frames once
/// the refcount reaches zero and the key has been deleted.
#[cfg(feature = "alloc")]
pub fn smo_release(key: u64) {
    let mut objects = SHARED_OBJECTS.lock();
    let Some(object) = objects.get_mut(&key) else {
        return;
    };
    object.refcount = object.refcount.saturating_sub(1);
    if object.refcount == 0 && object.deleted {
        let data = objects.remove(&key).unwrap();
        drop(objects);
        let allocator = FRAME_ALLOCATOR.lock();
        for frame in data.frames {
            allocator.free_frames(frame, 1).ok();
        }
    }
}

/// Remove `key` from the table so no new `smo_map` can find it. Existing
/// mappings stay valid; their frames are freed only once the last one
/// unmaps.
#[cfg(feature = "alloc")]
pub fn smo_delete(key: u64) -> Result<(), KernelError> {
    let mut objects = SHARED_OBJECTS.lock();
    let object = objects.get_mut(&key).ok_or(KernelError::NotFound {
        resource: "shared memory object",
        id: key,
    })?;
    object.deleted = true;
    if object.refcount == 0 {
        let data = objects.remove(&key).unwrap();
        drop(objects);
        let allocator = FRAME_ALLOCATOR.lock();
        for frame in data.frames {
            allocator.free_frames(frame, 1).ok();
        }
    }
    Ok(())
}

/// Size in bytes of the object registered under `key`, for `smo_map`
/// callers that need to size the virtual mapping before touching frames.
#[cfg(feature = "alloc")]
pub fn smo_size(key: u64) -> Result<usize, KernelError> {
    let objects = SHARED_OBJECTS.lock();
    let object = objects.get(&key).ok_or(KernelError::NotFound {
        resource: "shared memory object",
        id: key,
    })?;
    Ok(object.frames.len() * FRAME_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn test_create_map_release_delete() {
        let key = smo_create(FRAME_SIZE).unwrap();
        let frames_a = smo_frames(key).unwrap();
        let frames_b = smo_frames(key).unwrap();
        assert_eq!(frames_a, frames_b);

        smo_delete(key).unwrap();
        // Still mappable-by-reference until both mappings release.
        assert!(smo_frames(key).is_err());

        smo_release(key);
        smo_release(key);
        // Fully released after delete; key is gone.
        assert!(smo_size(key).is_err());
    }
}
