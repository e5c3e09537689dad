//! Device drivers module
//!
//! Contains all device drivers including bus drivers, network drivers, and
//! device-specific drivers.

pub mod console;
pub mod device;
pub mod e1000;
pub mod keyboard;
pub mod network;
pub mod nvme;
pub mod pci;
pub mod storage;
pub mod terminal;
pub mod usb;
pub mod virtio;

pub use console::{ConsoleDevice, ConsoleDriver, SerialConsole, VgaConsole};
pub use device::{Bus, DeviceClass, DeviceId, DeviceInfo, DeviceStatus, Driver};
pub use network::{EthernetDriver, LoopbackDriver, NetworkDevice};
pub use pci::{PciBus, PciDevice};
pub use storage::{AtaDriver, StorageDevice};
pub use usb::{UsbBus, UsbDevice};

/// Initialize all drivers
pub fn init() {
    crate::println!("[DRIVERS] Initializing device drivers...");

    // Initialize terminal state (before console, so read paths can query it)
    terminal::init();

    // Initialize bus drivers
    pci::init();
    usb::init();

    // Initialize device drivers
    network::init();
    console::init();
    storage::init();
    virtio::blk::init();

    crate::println!("[DRIVERS] Device drivers initialized");
}
