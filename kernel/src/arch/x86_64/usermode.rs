//! User-mode entry point for x86_64
//!
//! Provides `enter_usermode()` which pushes the iretq frame and transitions
//! the CPU from Ring 0 to Ring 3.
//!
//! `enter_usermode_returnable()` is a variant that saves the boot context
//! (callee-saved registers, RSP, CR3) so that `sys_exit` can restore it
//! and effectively "return" to the caller, allowing sequential user-mode
//! program execution during bootstrap.

use core::{
    arch::asm,
    sync::atomic::{AtomicU64, Ordering},
};

/// Saved bootstrap RSP for returning after a user process exits.
/// Set by `enter_usermode_returnable()`, consumed by `boot_return_to_kernel()`.
pub static BOOT_RETURN_RSP: AtomicU64 = AtomicU64::new(0);

/// Saved bootstrap CR3 for returning after a user process exits.
pub static BOOT_RETURN_CR3: AtomicU64 = AtomicU64::new(0);

/// Stack canary for detecting corruption of the boot context.
/// Set to a known value when the boot context is saved, verified before
/// restore. A mismatch indicates stack corruption (buffer overflow,
/// use-after-free, etc.).
pub static BOOT_STACK_CANARY: AtomicU64 = AtomicU64::new(0);

/// Magic value for the boot stack canary.
/// Chosen to be unlikely to appear naturally in memory.
const BOOT_CANARY_MAGIC: u64 = 0xDEAD_BEEF_CAFE_BABE;

/// Enter user mode for the first time via iretq.
///
/// The iretq instruction pops SS, RSP, RFLAGS, CS, RIP from the stack
/// and transitions the CPU to the privilege level specified in the CS
/// selector's RPL field.
///
/// # Arguments
/// - `entry_point`: User-space RIP (entry point of the user program)
/// - `user_stack`: User-space RSP (top of user stack)
/// - `user_cs`: User code segment selector with RPL=3 (0x33)
/// - `user_ss`: User data segment selector with RPL=3 (0x2B)
///
/// # Safety
/// - `entry_point` must be a valid user-space address with executable code
///   mapped
/// - `user_stack` must be a valid user-space stack address, 16-byte aligned
/// - The correct page tables must be loaded in CR3 with USER-accessible
///   mappings
/// - Per-CPU data (`kernel_rsp`) must be set before calling this, otherwise the
///   first syscall or interrupt will crash due to invalid kernel stack
/// - The GDT must contain valid Ring 3 segments at the specified selectors
pub unsafe fn enter_usermode(entry_point: u64, user_stack: u64, user_cs: u64, user_ss: u64) -> ! {
    // SAFETY: We build the iretq frame on the current kernel stack.
    // iretq expects (from top of stack): RIP, CS, RFLAGS, RSP, SS.
    // We set DS and ES to the user data selector and clear FS/GS.
    // RFLAGS = 0x202: bit 1 (reserved, always 1) + bit 9 (IF = interrupts enabled).
    // The caller guarantees all arguments point to valid mapped memory and
    // the GDT/TSS/per-CPU data are properly configured.
    asm!(
        // Set data segment registers to user data selector
        "mov ds, {ss:r}",
        "mov es, {ss:r}",
        // Clear FS and GS (will be set up later for TLS if needed).
        // Use a dedicated zero operand to avoid clobbering other operands
        // (the compiler may place rflags in eax, so "xor eax, eax" would
        // destroy it).
        "mov fs, {zero:x}",
        "mov gs, {zero:x}",
        // Build iretq frame on current kernel stack:
        //   [RSP+0]  RIP    - user entry point
        //   [RSP+8]  CS     - user code segment (Ring 3)
        //   [RSP+16] RFLAGS - IF set (0x202)
        //   [RSP+24] RSP    - user stack pointer
        //   [RSP+32] SS     - user stack segment (Ring 3)
        "push {ss}",       // SS
        "push {rsp}",      // RSP (user stack)
        "push {rflags}",   // RFLAGS (IF enabled)
        "push {cs}",       // CS
        "push {rip}",      // RIP (entry point)
        "iretq",
        ss = in(reg) user_ss,
        rsp = in(reg) user_stack,
        rflags = in(reg) 0x202u64,
        cs = in(reg) user_cs,
        rip = in(reg) entry_point,
        zero = in(reg) 0u64,
        options(noreturn)
    );
}

/// Enter user mode with the ability to return when the process exits.
///
/// Saves callee-saved registers and the current RSP/CR3 to globals before
/// performing iretq. When the user process calls `sys_exit`, the
/// `boot_return_to_kernel()` function restores the saved context, making
/// this function appear to return normally.
///
/// # Arguments
/// - `entry_point`: User-space RIP
/// - `user_stack`: User-space RSP
/// - `user_cs`: User CS selector (Ring 3)
/// - `user_ss`: User SS selector (Ring 3)
/// - `process_cr3`: Physical address of the process's L4 page table
/// - `kernel_rsp_ptr`: Pointer to per-CPU kernel_rsp (written after context
///   save)
///
/// # Safety
/// Same requirements as `enter_usermode`, plus:
/// - `process_cr3` must be a valid L4 page table with both user and kernel
///   mappings
/// - `kernel_rsp_ptr` must point to a valid u64 for storing the kernel RSP
#[unsafe(naked)]
pub unsafe extern "C" fn enter_usermode_returnable(
    _entry_point: u64,    // rdi
    _user_stack: u64,     // rsi
    _user_cs: u64,        // rdx
    _user_ss: u64,        // rcx
    _process_cr3: u64,    // r8
    _kernel_rsp_ptr: u64, // r9
) {
    core::arch::naked_asm!(
        // Save callee-saved registers (System V ABI)
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",

        // Alignment padding: after 6 pushes from function entry (RSP was
        // 16n+8 after the CALL), RSP is now 16n+8 - 48 = 16m+8 (mod 16 = 8).
        // syscall_entry loads kernel_rsp, pushes 14 registers (112 bytes,
        // alignment-neutral), then does CALL handler. For the handler to get
        // the ABI-required RSP mod 16 = 8, the loaded kernel_rsp must be
        // mod 16 = 0. Adding 8 bytes of padding achieves this:
        //   16m+8 - 8 = 16m (mod 16 = 0).
        // boot_return_to_kernel must skip this padding when restoring RSP.
        "sub rsp, 8",

        // FIX 3: Set stack canary BEFORE saving boot context
        // Load canary magic value and store to global
        "mov rax, {canary_magic}",
        "lea r12, [rip + {boot_canary}]",
        "mov [r12], rax",

        // Save boot CR3 to global
        "mov rax, cr3",
        "lea r12, [rip + {boot_cr3}]",
        "mov [r12], rax",

        // Save boot RSP to global (includes alignment padding)
        "lea r12, [rip + {boot_rsp}]",
        "mov [r12], rsp",

        // Update per-CPU kernel_rsp via pointer passed in r9
        // This value is 16-byte aligned, ensuring syscall handlers get
        // correct SSE alignment for movaps instructions.
        "mov [r9], rsp",

        // Switch to process page tables
        "mov cr3, r8",

        // Set segment registers for user mode
        "mov ds, ecx",
        "mov es, ecx",
        "xor eax, eax",
        "mov fs, ax",
        "mov gs, ax",

        // Build iretq frame on stack
        "push rcx",       // SS
        "push rsi",       // RSP (user stack)
        "push 0x202",     // RFLAGS (IF enabled)
        "push rdx",       // CS
        "push rdi",       // RIP (entry point)

        "iretq",

        boot_cr3 = sym BOOT_RETURN_CR3,
        boot_rsp = sym BOOT_RETURN_RSP,
        boot_canary = sym BOOT_STACK_CANARY,
        canary_magic = const BOOT_CANARY_MAGIC,
    );
}

/// Like `enter_usermode_returnable`, but sets RAX=0 before iretq.
///
/// Used for running forked child processes inline from the wait loop.
/// The forked child expects RAX=0 as the fork() return value indicating
/// it's the child process.
///
/// # Safety
/// Same preconditions as `enter_usermode_returnable`.
#[unsafe(naked)]
pub unsafe extern "C" fn enter_forked_child_returnable(
    _entry_point: u64,    // rdi
    _user_stack: u64,     // rsi
    _user_cs: u64,        // rdx
    _user_ss: u64,        // rcx
    _process_cr3: u64,    // r8
    _kernel_rsp_ptr: u64, // r9
) {
    core::arch::naked_asm!(
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "sub rsp, 8",

        // Set stack canary
        "mov rax, {canary_magic}",
        "lea r12, [rip + {boot_canary}]",
        "mov [r12], rax",

        // Save boot CR3 to global
        "mov rax, cr3",
        "lea r12, [rip + {boot_cr3}]",
        "mov [r12], rax",

        // Save boot RSP to global
        "lea r12, [rip + {boot_rsp}]",
        "mov [r12], rsp",

        // Update per-CPU kernel_rsp
        "mov [r9], rsp",

        // Switch to child's page tables
        "mov cr3, r8",

        // Set segment registers for user mode
        "mov ds, ecx",
        "mov es, ecx",
        "xor eax, eax",
        "mov fs, ax",
        "mov gs, ax",

        // Build iretq frame on stack
        "push rcx",       // SS
        "push rsi",       // RSP (user stack)
        "push 0x202",     // RFLAGS (IF enabled)
        "push rdx",       // CS
        "push rdi",       // RIP (entry point)

        // RAX = 0 for fork() child return value
        // (already 0 from xor eax,eax above, but be explicit)
        "xor eax, eax",

        "iretq",

        boot_cr3 = sym BOOT_RETURN_CR3,
        boot_rsp = sym BOOT_RETURN_RSP,
        boot_canary = sym BOOT_STACK_CANARY,
        canary_magic = const BOOT_CANARY_MAGIC,
    );
}

/// Restore the boot context saved by `enter_usermode_returnable` and return
/// to the bootstrap code.
///
/// Called from `sys_exit` after cleaning up the exiting process. This function:
/// 1. Restores the boot CR3 (switching back to boot page tables)
/// 2. Restores kernel segment registers (DS, ES, FS, GS cleared)
/// 3. Does `swapgs` to balance the swapgs from `syscall_entry`
/// 4. Restores RSP to the saved value (past the callee-saved pushes)
/// 5. Pops callee-saved registers and returns to the caller of
///    `enter_usermode_returnable`
///
/// # Safety
/// - Must only be called when `BOOT_RETURN_RSP` and `BOOT_RETURN_CR3` are valid
/// - Must be called from kernel mode on the kernel stack set by syscall_entry
/// - The saved boot stack frame must still be intact
///
/// # Implementation Notes
/// - `#[inline(never)]` prevents aggressive optimization that could corrupt the
///   stack frame restoration in release builds
/// - `compiler_fence` ensures loads complete before subsequent operations
/// - `black_box` prevents constant propagation and reordering of critical
///   values
#[inline(never)]
pub unsafe fn boot_return_to_kernel() -> ! {
    // RAW SERIAL DIAGNOSTIC: Trace boot return entry
    crate::arch::x86_64::idt::raw_serial_str(b"[BOOT_RETURN ENTRY]\n");

    // FIX 2 & 6: Use black_box to force compiler to treat values as opaque,
    // preventing optimization assumptions. Follow with compiler fence to
    // prevent instruction reordering across this boundary.
    //
    // CRITICAL FIX: The release optimizer was reusing RAX after `xor eax,eax`
    // (used to zero FS/GS) to load RSP, which set RSP=0 and caused a double
    // fault. We now use inline assembly with explicit register constraints
    // to force RSP into a register that won't be clobbered, and keep CR3
    // separate. The asm! block below uses `inout` constraints to prevent
    // the compiler from reusing these registers.
    let rsp: u64;
    let cr3: u64;
    let canary: u64;

    // Load values with explicit register assignments to prevent optimization
    asm!(
        "mov {rsp}, [{rsp_addr}]",
        "mov {cr3}, [{cr3_addr}]",
        "mov {canary}, [{canary_addr}]",
        rsp = out(reg) rsp,
        cr3 = out(reg) cr3,
        canary = out(reg) canary,
        rsp_addr = in(reg) &BOOT_RETURN_RSP,
        cr3_addr = in(reg) &BOOT_RETURN_CR3,
        canary_addr = in(reg) &BOOT_STACK_CANARY,
        options(nostack, preserves_flags)
    );

    // Apply black_box to prevent further optimization
    let rsp = core::hint::black_box(rsp);
    let cr3 = core::hint::black_box(cr3);
    let canary = core::hint::black_box(canary);
    core::sync::atomic::compiler_fence(Ordering::SeqCst);

    // FIX 3: Validate stack canary before restoring context
    // If the canary doesn't match, the boot stack has been corrupted
    if canary != BOOT_CANARY_MAGIC {
        crate::arch::x86_64::idt::raw_serial_str(b"[BOOT_RETURN] FATAL: Stack canary mismatch!\n");
        crate::arch::x86_64::idt::raw_serial_str(b"Expected: 0x");
        crate::arch::x86_64::idt::raw_serial_hex(BOOT_CANARY_MAGIC);
        crate::arch::x86_64::idt::raw_serial_str(b"\nGot:      0x");
        crate::arch::x86_64::idt::raw_serial_hex(canary);
        crate::arch::x86_64::idt::raw_serial_str(b"\n");
        panic!("Stack canary mismatch - boot context corrupted");
    }

    // NOTE: Cannot use println! here - would access locks/memory with wrong CR3
    // crate::println!("[BOOT-RETURN] RSP={:#x} CR3={:#x}", rsp, cr3);

    // Clear the boot return context (one-shot)
    BOOT_RETURN_RSP.store(0, Ordering::SeqCst);
    BOOT_RETURN_CR3.store(0, Ordering::SeqCst);
    BOOT_STACK_CANARY.store(0, Ordering::SeqCst);

    // SAFETY: cr3 is the boot page table address saved before entering user
    // mode. rsp points to the stack with 8 bytes of alignment padding and
    // 6 callee-saved registers, with the return address below them. We
    // restore kernel segment registers and
    // balance the swapgs from syscall_entry. The swapgs must come BEFORE
    // clearing GS so we don't corrupt KERNEL_GS_BASE. After restoring RSP
    // and popping registers, ret returns to the caller of
    // enter_usermode_returnable.
    //
    // CRITICAL FIX FOR OPT-LEVEL S/Z/3: The optimizer was allocating RSP
    // to RAX, which then got clobbered by `xor eax,eax` used for zeroing
    // FS/GS. We now explicitly allocate RSP to RCX and CR3 to RDX, both
    // of which are preserved across the segment register operations. This
    // is the ONLY way to prevent the optimizer from reusing RAX.
    asm!(
        "mov cr3, rdx",       // Restore boot page tables (CR3 in RDX)
        "swapgs",              // Balance syscall_entry's swapgs (before touching GS!)
        "mov ax, 0x10",       // Kernel data segment (GDT index 2, RPL 0)
        "mov ds, ax",         // Restore kernel DS
        "mov es, ax",         // Restore kernel ES
        "xor eax, eax",       // Zero FS and GS (clobbers RAX but NOT RCX/RDX!)
        "mov fs, ax",
        "mov gs, ax",
        "mov rsp, rcx",       // Restore saved boot RSP (RSP in RCX, safe!)
        "add rsp, 8",         // Skip alignment padding from enter_usermode_returnable
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "ret",                 // Return to caller of enter_usermode_returnable
        in("rcx") rsp,        // RSP MUST be in RCX (preserved across xor eax,eax)
        in("rdx") cr3,        // CR3 MUST be in RDX (preserved across xor eax,eax)
        options(noreturn)
    );
}

/// Check whether a boot return context is available.
///
/// Returns `true` if `enter_usermode_returnable` has saved a boot context
/// that `boot_return_to_kernel` can restore.
pub fn has_boot_return_context() -> bool {
    BOOT_RETURN_RSP.load(Ordering::SeqCst) != 0
}

