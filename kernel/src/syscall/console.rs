//! Console/input-device system calls
//!
//! Currently just keymap switching; kept as its own module since it
//! belongs to neither the filesystem nor process syscall families.

use super::{SyscallError, SyscallResult};
use crate::drivers::keyboard;

/// Switch the active PS/2 keyboard decode layout (syscall: load_keymap).
///
/// `keymap_id` is one of `keyboard::KEYMAP_US`/`KEYMAP_UK`/`KEYMAP_AZERTY`/
/// `KEYMAP_DVORAK`.
pub fn sys_load_keymap(keymap_id: usize) -> SyscallResult {
    keyboard::load_keymap(keymap_id as u32)
        .map(|_| 0)
        .map_err(|_| SyscallError::InvalidArgument)
}
