//! Bootstrap module for kernel initialization
//!
//! Multi-stage bring-up run from the bootloader entry point in `main.rs`:
//! architecture, then memory, then
//! process/scheduler state, then VFS and the network stack. Each stage
//! is staged to avoid circular dependencies -- the scheduler can't come
//! up before process management has somewhere to register tasks, and
//! process management can't come up before the heap exists.

use crate::{acpi, arch, error::KernelResult, fs, irq, mm, net, process, sched};

#[cfg(feature = "alloc")]
extern crate alloc;

/// Bootstrap task ID (runs before scheduler is fully initialized)
pub const BOOTSTRAP_PID: u64 = 0;
pub const BOOTSTRAP_TID: u64 = 0;

/// Multi-stage kernel initialization.
pub fn kernel_init(memory_map: &[mm::bootloader::BootloaderMemoryRegion]) -> KernelResult<()> {
    // Stage 1: Hardware initialization
    arch::x86_64::bootstrap::stage1_start();
    arch::init();
    arch::x86_64::bootstrap::stage1_complete();

    // Stage 2: Memory management
    arch::x86_64::bootstrap::stage2_start();
    mm::init(memory_map);
    arch::x86_64::bootstrap::stage2_complete();

    // Stage 3: Process management (creates PID 1 internally)
    arch::x86_64::bootstrap::stage3_start();
    process::init();
    arch::x86_64::bootstrap::stage3_complete();

    // Stage 4: Core kernel services
    arch::x86_64::bootstrap::stage4_start();

    println!("[BOOTSTRAP] Initializing IRQ manager...");
    irq::init().expect("Failed to initialize IRQ manager");
    println!("[BOOTSTRAP] IRQ manager initialized");

    #[cfg(feature = "alloc")]
    {
        println!("[BOOTSTRAP] Initializing VFS...");
        fs::init();
        println!("[BOOTSTRAP] VFS initialized");

        println!("[BOOTSTRAP] Initializing ACPI namespace...");
        match acpi::init() {
            Ok(()) => println!("[BOOTSTRAP] ACPI namespace initialized"),
            // Absent/malformed firmware tables only cost us power
            // management and AML-driven device discovery, not boot.
            Err(e) => println!("[BOOTSTRAP] ACPI unavailable: {:?}", e),
        }
    }

    arch::x86_64::bootstrap::stage4_complete();

    // Run kernel-mode init tests after Stage 4 (VFS ready)
    kernel_init_main();

    // Stage 5: Scheduler initialization
    arch::x86_64::bootstrap::stage5_start();
    sched::init();

    #[cfg(feature = "alloc")]
    {
        println!("[BOOTSTRAP] Initializing network stack...");
        net::init().expect("Failed to initialize network stack");
        println!("[BOOTSTRAP] Network stack initialized");
    }

    arch::x86_64::bootstrap::stage5_complete();

    Ok(())
}

/// Run the bootstrap sequence. Called once from the bootloader entry point.
pub fn run(memory_map: &[mm::bootloader::BootloaderMemoryRegion]) -> ! {
    if let Err(e) = kernel_init(memory_map) {
        // Panic is intentional: kernel_init failure during boot is unrecoverable.
        // No subsystems are available for graceful error handling at this point.
        panic!("Bootstrap failed: {:?}", e);
    }

    // Stage 6: User space transition. The init process was already created
    // during process::init(); nothing left to spawn before handing off.
    arch::x86_64::bootstrap::stage6_start();
    arch::x86_64::bootstrap::stage6_complete();

    // Transfer control to scheduler (kernel_init_main already ran above).
    sched::start();
}

/// Kernel-mode init function.
///
/// Exercises VFS at runtime and emits QEMU-parseable `[ok]`/`[failed]`
/// markers for each check. Called once VFS is mounted, before the
/// scheduler takes over.
#[cfg(feature = "alloc")]
pub fn kernel_init_main() {
    println!();
    println!("========================================");
    println!("[INIT] OxideCore kernel-mode init");
    println!("========================================");

    let mut passed = 0u32;
    let mut failed = 0u32;

    println!("[INIT] VFS tests:");

    // Test 1: Create directory
    {
        let ok = fs::get_vfs()
            .read()
            .mkdir("/tmp/test_init", fs::Permissions::default())
            .is_ok();
        report_test("vfs_mkdir", ok, &mut passed, &mut failed);
    }

    // Test 2: Write file via VFS create + write
    {
        let ok = (|| -> Result<(), &'static str> {
            let vfs = fs::get_vfs().read();
            let parent = vfs.resolve_path("/tmp/test_init")?;
            let file = parent.create("hello.txt", fs::Permissions::default())?;
            file.write(0, b"Hello OxideCore")?;
            Ok(())
        })()
        .is_ok();
        report_test("vfs_write_file", ok, &mut passed, &mut failed);
    }

    // Test 3: Read file back and verify contents
    {
        let ok = (|| -> Result<bool, &'static str> {
            let vfs = fs::get_vfs().read();
            let dir = vfs.resolve_path("/tmp/test_init")?;
            let file = dir.lookup("hello.txt")?;
            let mut buf = [0u8; 32];
            let n = file.read(0, &mut buf)?;
            Ok(&buf[..n] == b"Hello OxideCore")
        })()
        .unwrap_or(false);
        report_test("vfs_read_verify", ok, &mut passed, &mut failed);
    }

    // Test 4: List directory entries
    {
        let ok = (|| -> Result<bool, &'static str> {
            let vfs = fs::get_vfs().read();
            let node = vfs.resolve_path("/tmp/test_init")?;
            let entries = node.readdir()?;
            Ok(entries.iter().any(|e| e.name == "hello.txt"))
        })()
        .unwrap_or(false);
        report_test("vfs_readdir", ok, &mut passed, &mut failed);
    }

    // Test 5: /proc is mounted
    {
        let ok = fs::get_vfs().read().resolve_path("/proc").is_ok();
        report_test("vfs_procfs", ok, &mut passed, &mut failed);
    }

    // Test 6: /dev is mounted
    {
        let ok = fs::get_vfs().read().resolve_path("/dev").is_ok();
        report_test("vfs_devfs", ok, &mut passed, &mut failed);
    }

    print_summary(passed, failed);
}

#[cfg(not(feature = "alloc"))]
pub fn kernel_init_main() {
    println!("BOOTOK");
}

/// Print test summary and BOOTOK/BOOTFAIL
fn print_summary(passed: u32, failed: u32) {
    println!("========================================");
    println!("[INIT] Results: {}/{} passed", passed, passed + failed);
    if failed == 0 {
        println!("BOOTOK");
    } else {
        println!("BOOTFAIL");
    }
    println!("========================================");
}

/// Report a single test result with QEMU-parseable markers
fn report_test(name: &str, ok: bool, passed: &mut u32, failed: &mut u32) {
    if ok {
        println!("  {}...[ok]", name);
        *passed += 1;
    } else {
        println!("  {}...[failed]", name);
        *failed += 1;
    }
}
