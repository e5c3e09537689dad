//! USB Bus Driver
//!
//! Implements USB host controller and device management.

#![allow(static_mut_refs)]

use alloc::{boxed::Box, collections::BTreeMap, format, string::String, vec, vec::Vec};

use spin::{Mutex, RwLock};

use crate::drivers::device::{Bus, DeviceClass, DeviceId, DeviceInfo, DeviceStatus};

/// USB device speeds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbSpeed {
    Low,       // 1.5 Mbps
    Full,      // 12 Mbps
    High,      // 480 Mbps
    Super,     // 5 Gbps
    SuperPlus, // 10 Gbps
}

/// USB device classes
#[allow(dead_code)]
pub mod usb_classes {
    pub const AUDIO: u8 = 0x01;
    pub const CDC: u8 = 0x02; // Communications and CDC Control
    pub const HID: u8 = 0x03; // Human Interface Device
    pub const PHYSICAL: u8 = 0x05; // Physical
    pub const IMAGE: u8 = 0x06; // Image
    pub const PRINTER: u8 = 0x07; // Printer
    pub const MASS_STORAGE: u8 = 0x08; // Mass Storage
    pub const HUB: u8 = 0x09; // Hub
    pub const CDC_DATA: u8 = 0x0A; // CDC-Data
    pub const SMART_CARD: u8 = 0x0B; // Smart Card
    pub const CONTENT_SECURITY: u8 = 0x0D; // Content Security
    pub const VIDEO: u8 = 0x0E; // Video
    pub const HEALTHCARE: u8 = 0x0F; // Personal Healthcare
    pub const DIAGNOSTIC: u8 = 0xDC; // Diagnostic Device
    pub const WIRELESS: u8 = 0xE0; // Wireless Controller
    pub const MISC: u8 = 0xEF; // Miscellaneous
    pub const APP_SPECIFIC: u8 = 0xFE; // Application Specific
    pub const VENDOR_SPECIFIC: u8 = 0xFF; // Vendor Specific
}

/// USB endpoint types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbEndpointType {
    Control = 0,
    Isochronous = 1,
    Bulk = 2,
    Interrupt = 3,
}

/// USB endpoint direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbDirection {
    Out = 0,
    In = 1,
}

/// USB endpoint descriptor
#[derive(Debug, Clone)]
pub struct UsbEndpoint {
    pub address: u8,
    pub direction: UsbDirection,
    pub endpoint_type: UsbEndpointType,
    pub max_packet_size: u16,
    pub interval: u8,
}

impl UsbEndpoint {
    pub fn new(address: u8) -> Self {
        Self {
            address: address & 0x7F,
            direction: if address & 0x80 != 0 {
                UsbDirection::In
            } else {
                UsbDirection::Out
            },
            endpoint_type: UsbEndpointType::Control,
            max_packet_size: 8,
            interval: 0,
        }
    }
}

/// USB interface descriptor
#[derive(Debug, Clone)]
pub struct UsbInterface {
    pub number: u8,
    pub alternate_setting: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub endpoints: Vec<UsbEndpoint>,
}

/// USB configuration descriptor
#[derive(Debug, Clone)]
pub struct UsbConfiguration {
    pub value: u8,
    pub max_power: u16, // in mA
    pub self_powered: bool,
    pub remote_wakeup: bool,
    pub interfaces: Vec<UsbInterface>,
}

/// USB device descriptor
#[derive(Debug, Clone)]
pub struct UsbDeviceDescriptor {
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_release: u16,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub max_packet_size: u8,
    pub manufacturer: String,
    pub product: String,
    pub serial_number: String,
    pub configurations: Vec<UsbConfiguration>,
}

/// USB device representation
#[derive(Debug, Clone)]
pub struct UsbDevice {
    pub address: u8,
    pub port: u8,
    pub speed: UsbSpeed,
    pub descriptor: UsbDeviceDescriptor,
    pub current_configuration: Option<u8>,
    pub connected: bool,
}

impl UsbDevice {
    /// Create a new USB device
    pub fn new(address: u8, port: u8, speed: UsbSpeed) -> Self {
        Self {
            address,
            port,
            speed,
            descriptor: UsbDeviceDescriptor {
                vendor_id: 0,
                product_id: 0,
                device_release: 0,
                class: 0,
                subclass: 0,
                protocol: 0,
                max_packet_size: 8,
                manufacturer: String::new(),
                product: String::new(),
                serial_number: String::new(),
                configurations: Vec::new(),
            },
            current_configuration: None,
            connected: false,
        }
    }

    /// Get device class
    pub fn get_device_class(&self) -> DeviceClass {
        match self.descriptor.class {
            usb_classes::AUDIO => DeviceClass::Audio,
            usb_classes::HID => DeviceClass::Input,
            usb_classes::MASS_STORAGE => DeviceClass::Storage,
            usb_classes::HUB => DeviceClass::USB,
            usb_classes::VIDEO => DeviceClass::Display,
            usb_classes::CDC | usb_classes::CDC_DATA => DeviceClass::Network,
            _ => DeviceClass::Other,
        }
    }
}

/// USB transfer types
#[derive(Debug, Clone)]
pub enum UsbTransfer {
    Setup {
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: Vec<u8>,
    },
    In {
        endpoint: u8,
        length: usize,
    },
    Out {
        endpoint: u8,
        data: Vec<u8>,
    },
}

/// USB host controller trait
pub trait UsbHostController: Send + Sync {
    /// Get controller name
    fn name(&self) -> &str;

    /// Initialize the controller
    fn init(&mut self) -> Result<(), &'static str>;

    /// Reset the controller
    fn reset(&mut self) -> Result<(), &'static str>;

    /// Get number of ports
    fn get_port_count(&self) -> u8;

    /// Check port status
    fn get_port_status(&self, port: u8) -> Result<UsbPortStatus, &'static str>;

    /// Reset port
    fn reset_port(&mut self, port: u8) -> Result<(), &'static str>;

    /// Enable port
    fn enable_port(&mut self, port: u8) -> Result<(), &'static str>;

    /// Disable port
    fn disable_port(&mut self, port: u8) -> Result<(), &'static str>;

    /// Perform USB transfer
    fn transfer(
        &mut self,
        device_address: u8,
        transfer: UsbTransfer,
    ) -> Result<Vec<u8>, &'static str>;

    /// Set device address
    fn set_device_address(&mut self, old_address: u8, new_address: u8) -> Result<(), &'static str>;
}

/// USB port status
#[derive(Debug, Clone, Copy)]
pub struct UsbPortStatus {
    pub connected: bool,
    pub enabled: bool,
    pub suspended: bool,
    pub reset: bool,
    pub speed: UsbSpeed,
    pub power: bool,
}

/// USB bus implementation
pub struct UsbBus {
    /// Host controllers
    controllers: RwLock<Vec<Box<dyn UsbHostController>>>,

    /// Connected devices
    devices: RwLock<BTreeMap<u8, UsbDevice>>, // address -> device

    /// Next device address
    next_address: core::sync::atomic::AtomicU8,

    /// Port to device mapping
    port_devices: RwLock<BTreeMap<(usize, u8), u8>>, // (controller_index, port) -> address
}

impl Default for UsbBus {
    fn default() -> Self {
        Self::new()
    }
}

impl UsbBus {
    /// Create a new USB bus
    pub fn new() -> Self {
        Self {
            controllers: RwLock::new(Vec::new()),
            devices: RwLock::new(BTreeMap::new()),
            next_address: core::sync::atomic::AtomicU8::new(1),
            port_devices: RwLock::new(BTreeMap::new()),
        }
    }

    /// Add a host controller
    pub fn add_controller(
        &self,
        mut controller: Box<dyn UsbHostController>,
    ) -> Result<(), &'static str> {
        // Initialize the controller
        controller.init()?;

        let _controller_name: String = controller.name().into();
        let controller_index = self.controllers.read().len();

        // Scan ports for devices
        let _port_count = controller.get_port_count();
        crate::println!(
            "[USB] Controller {} has {} ports",
            _controller_name,
            _port_count
        );

        self.controllers.write().push(controller);

        // Scan for connected devices
        self.scan_controller_ports(controller_index)?;

        crate::println!("[USB] Added USB host controller: {}", _controller_name);
        Ok(())
    }

    /// Scan controller ports for devices
    fn scan_controller_ports(&self, controller_index: usize) -> Result<(), &'static str> {
        let port_count = {
            let controllers = self.controllers.read();
            controllers
                .get(controller_index)
                .ok_or("Controller not found")?
                .get_port_count()
        };

        for port in 1..=port_count {
            if let Err(_e) = self.scan_port(controller_index, port) {
                crate::println!("[USB] Failed to scan port {}: {}", port, _e);
            }
        }

        Ok(())
    }

    /// Scan a specific port
    fn scan_port(&self, controller_index: usize, port: u8) -> Result<(), &'static str> {
        let status = {
            let controllers = self.controllers.read();
            controllers
                .get(controller_index)
                .ok_or("Controller not found")?
                .get_port_status(port)?
        };

        if !status.connected {
            return Ok(()); // No device connected
        }

        crate::println!(
            "[USB] Device detected on controller {} port {}",
            controller_index,
            port
        );

        // Reset and enable port
        {
            let mut controllers = self.controllers.write();
            let controller = controllers
                .get_mut(controller_index)
                .ok_or("Controller not found")?;

            controller.reset_port(port)?;
            controller.enable_port(port)?;
        }

        // Enumerate device
        let device_address = self.enumerate_device(controller_index, port, status.speed)?;

        // Store port mapping
        self.port_devices
            .write()
            .insert((controller_index, port), device_address);

        Ok(())
    }

    /// Enumerate a device
    fn enumerate_device(
        &self,
        controller_index: usize,
        port: u8,
        speed: UsbSpeed,
    ) -> Result<u8, &'static str> {
        // Allocate device address
        let device_address = self
            .next_address
            .fetch_add(1, core::sync::atomic::Ordering::SeqCst);

        // Create device
        let mut device = UsbDevice::new(device_address, port, speed);

        // Get device descriptor
        self.read_device_descriptor(controller_index, 0, &mut device)?;

        // Set device address
        {
            let mut controllers = self.controllers.write();
            let controller = controllers
                .get_mut(controller_index)
                .ok_or("Controller not found")?;

            controller.set_device_address(0, device_address)?;
        }

        // Read full device descriptor with new address
        self.read_device_descriptor(controller_index, device_address, &mut device)?;

        // Read configurations
        self.read_configurations(controller_index, device_address, &mut device)?;

        device.connected = true;

        crate::println!(
            "[USB] Enumerated device {:04x}:{:04x} at address {}",
            device.descriptor.vendor_id,
            device.descriptor.product_id,
            device_address
        );

        // Store device
        self.devices.write().insert(device_address, device);

        Ok(device_address)
    }

    /// Read device descriptor
    fn read_device_descriptor(
        &self,
        controller_index: usize,
        address: u8,
        device: &mut UsbDevice,
    ) -> Result<(), &'static str> {
        let transfer = UsbTransfer::Setup {
            request_type: 0x80, // Device to host, standard, device
            request: 0x06,      // GET_DESCRIPTOR
            value: 0x0100,      // Device descriptor
            index: 0,
            data: vec![0; 18], // Device descriptor is 18 bytes
        };

        let response = {
            let mut controllers = self.controllers.write();
            let controller = controllers
                .get_mut(controller_index)
                .ok_or("Controller not found")?;

            controller.transfer(address, transfer)?
        };

        if response.len() < 18 {
            return Err("Device descriptor too short");
        }

        // Parse device descriptor
        device.descriptor.vendor_id = u16::from_le_bytes([response[8], response[9]]);
        device.descriptor.product_id = u16::from_le_bytes([response[10], response[11]]);
        device.descriptor.device_release = u16::from_le_bytes([response[12], response[13]]);
        device.descriptor.class = response[4];
        device.descriptor.subclass = response[5];
        device.descriptor.protocol = response[6];
        device.descriptor.max_packet_size = response[7];

        // Read string descriptors if available
        if response[14] != 0 {
            // Manufacturer string index
            if let Ok(manufacturer) =
                self.read_string_descriptor(controller_index, address, response[14])
            {
                device.descriptor.manufacturer = manufacturer;
            }
        }

        if response[15] != 0 {
            // Product string index
            if let Ok(product) =
                self.read_string_descriptor(controller_index, address, response[15])
            {
                device.descriptor.product = product;
            }
        }

        if response[16] != 0 {
            // Serial number string index
            if let Ok(serial) = self.read_string_descriptor(controller_index, address, response[16])
            {
                device.descriptor.serial_number = serial;
            }
        }

        Ok(())
    }

    /// Read string descriptor
    fn read_string_descriptor(
        &self,
        controller_index: usize,
        address: u8,
        index: u8,
    ) -> Result<String, &'static str> {
        let transfer = UsbTransfer::Setup {
            request_type: 0x80,
            request: 0x06,
            value: 0x0300 | (index as u16),
            index: 0x0409, // English (US)
            data: vec![0; 255],
        };

        let response = {
            let mut controllers = self.controllers.write();
            let controller = controllers
                .get_mut(controller_index)
                .ok_or("Controller not found")?;

            controller.transfer(address, transfer)?
        };

        if response.len() < 2 {
            return Err("String descriptor too short");
        }

        let length = response[0] as usize;
        if length < 2 || response[1] != 0x03 {
            return Err("Invalid string descriptor");
        }

        // Convert UTF-16LE to UTF-8
        let mut result = String::new();
        for i in (2..length.min(response.len())).step_by(2) {
            if i + 1 < response.len() {
                let code_unit = u16::from_le_bytes([response[i], response[i + 1]]);
                if let Some(ch) = char::from_u32(code_unit as u32) {
                    result.push(ch);
                }
            }
        }

        Ok(result)
    }

    /// Read configurations
    fn read_configurations(
        &self,
        _controller_index: usize,
        _address: u8,
        device: &mut UsbDevice,
    ) -> Result<(), &'static str> {
        // For now, just create a default configuration
        let config = UsbConfiguration {
            value: 1,
            max_power: 100, // 100 mA
            self_powered: false,
            remote_wakeup: false,
            interfaces: Vec::new(),
        };

        device.descriptor.configurations.push(config);
        Ok(())
    }

    /// Get device by address
    pub fn get_device(&self, address: u8) -> Option<UsbDevice> {
        self.devices.read().get(&address).cloned()
    }

    /// Get all devices
    pub fn get_all_devices(&self) -> Vec<UsbDevice> {
        self.devices.read().values().cloned().collect()
    }

    /// Find devices by class
    pub fn find_devices_by_class(&self, class: u8) -> Vec<UsbDevice> {
        self.devices
            .read()
            .values()
            .filter(|dev| dev.descriptor.class == class)
            .cloned()
            .collect()
    }
}

impl Bus for UsbBus {
    fn name(&self) -> &str {
        "usb"
    }

    fn scan(&mut self) -> Vec<DeviceInfo> {
        let devices = self.devices.read();
        let mut device_infos = Vec::new();

        for (address, usb_device) in devices.iter() {
            let device_id = DeviceId {
                vendor_id: usb_device.descriptor.vendor_id,
                device_id: usb_device.descriptor.product_id,
                class_code: usb_device.descriptor.class,
                subclass: usb_device.descriptor.subclass,
                prog_if: usb_device.descriptor.protocol,
                revision: (usb_device.descriptor.device_release & 0xFF) as u8,
            };

            let device_info = DeviceInfo {
                id: *address as u64,
                name: if !usb_device.descriptor.product.is_empty() {
                    usb_device.descriptor.product.clone()
                } else {
                    format!(
                        "USB Device {:04x}:{:04x}",
                        usb_device.descriptor.vendor_id, usb_device.descriptor.product_id
                    )
                },
                class: usb_device.get_device_class(),
                device_id: Some(device_id),
                driver: None,
                bus: String::from("usb"),
                address: *address as u64,
                irq: None, // USB devices use the host controller's IRQ
                dma_channels: Vec::new(),
                io_ports: Vec::new(),
                memory_regions: Vec::new(),
                status: if usb_device.connected {
                    DeviceStatus::Uninitialized
                } else {
                    DeviceStatus::Removed
                },
            };

            device_infos.push(device_info);
        }

        device_infos
    }

    fn read_config(
        &self,
        _device: &DeviceInfo,
        _offset: u16,
        _size: u8,
    ) -> Result<u32, &'static str> {
        // USB devices don't have traditional config space
        // This could be used for reading descriptors
        Err("USB devices don't support config space reads")
    }

    fn write_config(
        &mut self,
        _device: &DeviceInfo,
        _offset: u16,
        _value: u32,
        _size: u8,
    ) -> Result<(), &'static str> {
        // USB devices don't have traditional config space
        Err("USB devices don't support config space writes")
    }

    fn enable_device(&mut self, device: &DeviceInfo) -> Result<(), &'static str> {
        let address = device.address as u8;

        if let Some(usb_device) = self.devices.write().get_mut(&address) {
            // Set configuration 1 if available
            if !usb_device.descriptor.configurations.is_empty() {
                usb_device.current_configuration = Some(1);
                crate::println!("[USB] Enabled device at address {}", address);
            }
        }

        Ok(())
    }

    fn disable_device(&mut self, device: &DeviceInfo) -> Result<(), &'static str> {
        let address = device.address as u8;

        if let Some(usb_device) = self.devices.write().get_mut(&address) {
            usb_device.current_configuration = None;
            crate::println!("[USB] Disabled device at address {}", address);
        }

        Ok(())
    }
}

/// xHCI capability, operational, runtime, and doorbell register offsets.
/// Operational registers sit at `mmio_base + CAPLENGTH`; runtime registers
/// at `mmio_base + RTSOFF`; the doorbell array at `mmio_base + DBOFF`.
#[allow(dead_code)]
mod xhci_regs {
    // Capability registers (from mmio_base).
    pub const CAPLENGTH: usize = 0x00; // u8
    pub const HCSPARAMS1: usize = 0x04;
    pub const HCCPARAMS1: usize = 0x10;
    pub const DBOFF: usize = 0x14;
    pub const RTSOFF: usize = 0x18;

    // Operational registers (from mmio_base + cap_length).
    pub const USBCMD: usize = 0x00;
    pub const USBSTS: usize = 0x04;
    pub const CRCR: usize = 0x18;
    pub const DCBAAP: usize = 0x30;
    pub const CONFIG: usize = 0x38;
    pub const PORTSC_BASE: usize = 0x400;
    pub const PORTSC_STRIDE: usize = 0x10;

    // USBCMD bits.
    pub const CMD_RUN: u32 = 1 << 0;
    pub const CMD_HCRST: u32 = 1 << 1;
    pub const CMD_INTE: u32 = 1 << 2;

    // USBSTS bits.
    pub const STS_HCH: u32 = 1 << 0;
    pub const STS_CNR: u32 = 1 << 11;

    // CRCR bits.
    pub const CRCR_RCS: u64 = 1 << 0;

    // PORTSC bits.
    pub const PORTSC_CCS: u32 = 1 << 0;
    pub const PORTSC_PED: u32 = 1 << 1;
    pub const PORTSC_PR: u32 = 1 << 4;
    pub const PORTSC_PP: u32 = 1 << 9;
    pub const PORTSC_CSC: u32 = 1 << 17;
    pub const PORTSC_PEC: u32 = 1 << 18;
    pub const PORTSC_PRC: u32 = 1 << 21;
    pub const PORTSC_SPEED_SHIFT: u32 = 10;
    pub const PORTSC_SPEED_MASK: u32 = 0xF;

    // Interrupter 0 registers, relative to runtime base.
    pub const IR0_IMAN: usize = 0x20;
    pub const IR0_ERSTSZ: usize = 0x28;
    pub const IR0_ERSTBA: usize = 0x30;
    pub const IR0_ERDP: usize = 0x38;
    pub const IMAN_IE: u32 = 1 << 1;
    pub const ERDP_EHB: u64 = 1 << 3;

    // Extended capability IDs.
    pub const XECP_ID_LEGACY: u32 = 1;
    pub const USBLEGSUP_BIOS_OWNED: u32 = 1 << 24;
    pub const USBLEGSUP_OS_OWNED: u32 = 1 << 16;

    // TRB types (Control field bits 15:10).
    pub const TRB_TYPE_NORMAL: u32 = 1;
    pub const TRB_TYPE_SETUP_STAGE: u32 = 2;
    pub const TRB_TYPE_DATA_STAGE: u32 = 3;
    pub const TRB_TYPE_STATUS_STAGE: u32 = 4;
    pub const TRB_TYPE_LINK: u32 = 6;
    pub const TRB_TYPE_ENABLE_SLOT: u32 = 9;
    pub const TRB_TYPE_DISABLE_SLOT: u32 = 10;
    pub const TRB_TYPE_ADDRESS_DEVICE: u32 = 11;
    pub const TRB_TYPE_NOOP_CMD: u32 = 23;
    pub const TRB_TYPE_TRANSFER_EVENT: u32 = 32;
    pub const TRB_TYPE_COMMAND_COMPLETION_EVENT: u32 = 33;
    pub const TRB_TYPE_PORT_STATUS_CHANGE_EVENT: u32 = 34;

    pub const TRB_CC_SUCCESS: u32 = 1;

    pub const CMD_RING_TRBS: usize = 16;
    pub const EVENT_RING_TRBS: usize = 16;
    pub const TRANSFER_RING_TRBS: usize = 256;
}

use xhci_regs as regs;

/// A single 16-byte Transfer Request Block: the primitive shared by the
/// command ring, every transfer ring, and the event ring.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Trb {
    pub parameter: u64,
    pub status: u32,
    pub control: u32,
}

impl Trb {
    pub const fn new() -> Self {
        Self { parameter: 0, status: 0, control: 0 }
    }

    pub fn trb_type(&self) -> u32 {
        (self.control >> 10) & 0x3F
    }

    pub fn cycle(&self) -> bool {
        self.control & 1 != 0
    }

    pub fn completion_code(&self) -> u32 {
        (self.status >> 24) & 0xFF
    }

    pub fn slot_id(&self) -> u8 {
        ((self.control >> 24) & 0xFF) as u8
    }

    fn link(target: u64, cycle: bool, toggle_cycle: bool) -> Self {
        Self {
            parameter: target,
            status: 0,
            control: (regs::TRB_TYPE_LINK << 10)
                | (cycle as u32)
                | if toggle_cycle { 1 << 1 } else { 0 },
        }
    }

    fn command(trb_type: u32, parameter: u64, control_extra: u32, cycle: bool) -> Self {
        Self {
            parameter,
            status: 0,
            control: (trb_type << 10) | control_extra | (cycle as u32),
        }
    }
}

/// Per-slot enumeration state: the device context, the control endpoint's
/// 256-TRB transfer ring, and the USB address xHCI has (or hasn't) assigned.
struct XhciSlot {
    slot_id: u8,
    input_ctx_phys: u64,
    output_ctx_phys: u64,
    ep0_ring_phys: u64,
    ep0_enqueue: usize,
    ep0_cycle: bool,
    max_packet_size0: u16,
    mps_refreshed: bool,
    addressed: bool,
}

/// xHCI (Extensible Host Controller Interface) host controller.
///
/// Models the real xHCI object hierarchy: a Device Context Base Address
/// Array indexed by slot ID, a single command ring, interrupter 0's event
/// ring, and the doorbell array used to notify the controller of new work.
/// Falls back to software emulation when no MMIO BAR has been wired up yet
/// (no PCI/ACPI handoff has supplied a real address).
pub struct XhciController {
    mmio_base: usize,
    cap_length: usize,
    max_slots: u8,
    max_ports: u8,
    doorbell_base: usize,
    runtime_base: usize,
    dcbaa_phys: u64,
    cmd_ring_phys: u64,
    cmd_enqueue: usize,
    cmd_cycle: bool,
    event_ring_phys: u64,
    event_dequeue: usize,
    event_ccs: bool,
    erst_phys: u64,
    /// Slot currently in the Default state (device address 0) during
    /// enumeration, keyed by the root hub port it was created for.
    pending_slots: BTreeMap<u8, XhciSlot>,
    /// Slots that have completed addressing, keyed by their USB address.
    addressed_slots: BTreeMap<u8, XhciSlot>,
    name: String,
    initialized: bool,
}

impl XhciController {
    pub fn new(mmio_base: usize) -> Self {
        Self {
            mmio_base,
            cap_length: 0,
            max_slots: 0,
            max_ports: 0,
            doorbell_base: 0,
            runtime_base: 0,
            dcbaa_phys: 0,
            cmd_ring_phys: 0,
            cmd_enqueue: 0,
            cmd_cycle: true,
            event_ring_phys: 0,
            event_dequeue: 0,
            event_ccs: true,
            erst_phys: 0,
            pending_slots: BTreeMap::new(),
            addressed_slots: BTreeMap::new(),
            name: String::from("xHCI"),
            initialized: false,
        }
    }

    fn emulated(&self) -> bool {
        self.mmio_base == 0
    }

    // --- raw MMIO accessors -------------------------------------------------

    fn read32(&self, addr: usize) -> u32 {
        unsafe { core::ptr::read_volatile(addr as *const u32) }
    }

    fn write32(&self, addr: usize, value: u32) {
        unsafe { core::ptr::write_volatile(addr as *mut u32, value) }
    }

    fn read64(&self, addr: usize) -> u64 {
        unsafe { core::ptr::read_volatile(addr as *const u64) }
    }

    fn write64(&self, addr: usize, value: u64) {
        unsafe { core::ptr::write_volatile(addr as *mut u64, value) }
    }

    fn op_base(&self) -> usize {
        self.mmio_base + self.cap_length
    }

    fn portsc_addr(&self, port: u8) -> usize {
        self.op_base() + regs::PORTSC_BASE + regs::PORTSC_STRIDE * (port as usize - 1)
    }

    fn doorbell_addr(&self, index: u8) -> usize {
        self.doorbell_base + (index as usize) * 4
    }

    /// Hand the controller off from the BIOS/SMM by walking the extended
    /// capabilities list for the USB Legacy Support Capability and setting
    /// the OS-owned bit until the BIOS-owned bit clears.
    fn bios_handoff(&self) {
        let hccparams1 = self.read32(self.mmio_base + regs::HCCPARAMS1);
        let mut cap_addr = self.mmio_base + ((hccparams1 >> 16) as usize) * 4;
        if cap_addr == self.mmio_base {
            return; // xECP == 0, no extended capabilities.
        }
        loop {
            let cap = self.read32(cap_addr);
            let cap_id = cap & 0xFF;
            let next = (cap >> 8) & 0xFF;
            if cap_id == regs::XECP_ID_LEGACY {
                self.write32(cap_addr, cap | regs::USBLEGSUP_OS_OWNED);
                for _ in 0..10_000 {
                    if self.read32(cap_addr) & regs::USBLEGSUP_BIOS_OWNED == 0 {
                        break;
                    }
                    core::hint::spin_loop();
                }
                return;
            }
            if next == 0 {
                return;
            }
            cap_addr += (next as usize) * 4;
        }
    }

    fn halt(&self) {
        let cmd_addr = self.op_base() + regs::USBCMD;
        let cmd = self.read32(cmd_addr);
        self.write32(cmd_addr, cmd & !regs::CMD_RUN);
        let sts_addr = self.op_base() + regs::USBSTS;
        for _ in 0..10_000 {
            if self.read32(sts_addr) & regs::STS_HCH != 0 {
                break;
            }
            core::hint::spin_loop();
        }
    }

    fn reset_controller(&self) {
        self.halt();
        let cmd_addr = self.op_base() + regs::USBCMD;
        self.write32(cmd_addr, regs::CMD_HCRST);
        for _ in 0..100_000 {
            if self.read32(cmd_addr) & regs::CMD_HCRST == 0 {
                break;
            }
            core::hint::spin_loop();
        }
        let sts_addr = self.op_base() + regs::USBSTS;
        for _ in 0..100_000 {
            if self.read32(sts_addr) & regs::STS_CNR == 0 {
                break;
            }
            core::hint::spin_loop();
        }
    }

    /// Allocate the DCBAA, command ring, event ring + ERST, and point the
    /// controller's operational/interrupter registers at them.
    fn allocate_core_structures(&mut self) -> Result<(), &'static str> {
        let dcbaa_pages = crate::mm::allocate_pages(1, None).map_err(|_| "Failed to allocate DCBAA")?;
        self.dcbaa_phys = dcbaa_pages.first().ok_or("Empty allocation")?.as_addr().as_u64();
        unsafe { core::ptr::write_bytes(self.dcbaa_phys as *mut u8, 0, 4096) };

        let cmd_pages = crate::mm::allocate_pages(1, None).map_err(|_| "Failed to allocate command ring")?;
        self.cmd_ring_phys = cmd_pages.first().ok_or("Empty allocation")?.as_addr().as_u64();
        unsafe { core::ptr::write_bytes(self.cmd_ring_phys as *mut u8, 0, 4096) };
        // Link TRB at the end of the ring, Toggle Cycle set, pointing back to
        // the start so the ring ring-buffers forever.
        let link = Trb::link(self.cmd_ring_phys, true, true);
        unsafe {
            let slot = (self.cmd_ring_phys as *mut Trb).add(regs::CMD_RING_TRBS - 1);
            core::ptr::write_volatile(slot, link);
        }

        let event_pages = crate::mm::allocate_pages(1, None).map_err(|_| "Failed to allocate event ring")?;
        self.event_ring_phys = event_pages.first().ok_or("Empty allocation")?.as_addr().as_u64();
        unsafe { core::ptr::write_bytes(self.event_ring_phys as *mut u8, 0, 4096) };

        let erst_pages = crate::mm::allocate_pages(1, None).map_err(|_| "Failed to allocate ERST")?;
        self.erst_phys = erst_pages.first().ok_or("Empty allocation")?.as_addr().as_u64();
        // ERST entry 0: { ring segment base (u64), ring segment size (u32), reserved (u32) }
        unsafe {
            let entry = self.erst_phys as *mut u64;
            core::ptr::write_volatile(entry, self.event_ring_phys);
            core::ptr::write_volatile(
                (self.erst_phys as *mut u32).add(2),
                regs::EVENT_RING_TRBS as u32,
            );
        }

        Ok(())
    }

    fn program_core_structures(&self) {
        self.write64(self.op_base() + regs::DCBAAP, self.dcbaa_phys);
        self.write64(
            self.op_base() + regs::CRCR,
            self.cmd_ring_phys | regs::CRCR_RCS,
        );
        self.write32(
            self.op_base() + regs::CONFIG,
            self.max_slots as u32,
        );

        let ir0 = self.runtime_base + regs::IR0_ERSTSZ;
        self.write32(ir0, 1); // one segment
        self.write64(self.runtime_base + regs::IR0_ERSTBA, self.erst_phys);
        self.write64(
            self.runtime_base + regs::IR0_ERDP,
            self.event_ring_phys,
        );
        self.write32(
            self.runtime_base + regs::IR0_IMAN,
            regs::IMAN_IE,
        );
    }

    fn ring_command_doorbell(&self) {
        self.write32(self.doorbell_addr(0), 0);
    }

    /// Enqueue a command TRB onto the command ring, ring the command
    /// doorbell, then poll the event ring for the matching completion.
    fn post_command(&mut self, trb_type: u32, parameter: u64, control_extra: u32) -> Result<Trb, &'static str> {
        let slot_ptr = unsafe { (self.cmd_ring_phys as *mut Trb).add(self.cmd_enqueue) };
        let trb = Trb::command(trb_type, parameter, control_extra, self.cmd_cycle);
        unsafe { core::ptr::write_volatile(slot_ptr, trb) };

        self.cmd_enqueue += 1;
        if self.cmd_enqueue >= regs::CMD_RING_TRBS - 1 {
            self.cmd_enqueue = 0;
            self.cmd_cycle = !self.cmd_cycle;
        }

        self.ring_command_doorbell();
        self.poll_event(regs::TRB_TYPE_COMMAND_COMPLETION_EVENT)
    }

    /// Poll interrupter 0's event ring until a TRB of the given type shows
    /// up (consuming every event in between), or time out.
    fn poll_event(&mut self, want_type: u32) -> Result<Trb, &'static str> {
        poll_event_ring(
            self.event_ring_phys,
            self.runtime_base,
            &mut self.event_dequeue,
            &mut self.event_ccs,
            want_type,
        )
    }

    fn context_word_addr(phys: u64, context_index: usize, word: usize) -> usize {
        phys as usize + context_index * 32 + word * 4
    }

    /// Build the input context for a freshly enabled slot: Input Control
    /// Context with A0 (slot) and A1 (EP0) set, a Slot Context for the root
    /// hub port, and an EP0 Context pointing at its transfer ring.
    fn write_input_context(&self, phys: u64, port: u8, speed: UsbSpeed, ep0_ring_phys: u64, max_packet_size0: u16) {
        unsafe { core::ptr::write_bytes(phys as *mut u8, 0, 4096) };

        // Input Control Context is context index 0.
        self.write32(Self::context_word_addr(phys, 0, 1), 0b11); // A0 | A1

        // Slot Context is context index 1.
        let speed_field = match speed {
            UsbSpeed::Low => 2u32,
            UsbSpeed::Full => 1,
            UsbSpeed::High => 3,
            UsbSpeed::Super | UsbSpeed::SuperPlus => 4,
        };
        self.write32(
            Self::context_word_addr(phys, 1, 0),
            (speed_field << 20) | (1 << 27), // Context Entries = 1 (EP0 only so far)
        );
        self.write32(
            Self::context_word_addr(phys, 1, 1),
            (port as u32) << 16,
        );

        // EP0 Context is context index 2 (control, DCI 1).
        let ep_type_control = 4u32;
        self.write32(
            Self::context_word_addr(phys, 2, 1),
            (ep_type_control << 3) | ((max_packet_size0 as u32) << 16),
        );
        let dequeue_ptr = ep0_ring_phys | 1; // DCS = 1, matches initial producer cycle state.
        self.write64(Self::context_word_addr(phys, 2, 2), dequeue_ptr);
    }

    /// Refresh just the EP0 context's Max Packet Size field (used after
    /// reading `bMaxPacketSize0` from the first 8 bytes of the device
    /// descriptor).
    fn update_ep0_max_packet_size(&self, input_ctx_phys: u64, max_packet_size0: u16) {
        self.write32(Self::context_word_addr(input_ctx_phys, 0, 1), 0b10); // A1 only
        let word1 = self.read32(Self::context_word_addr(input_ctx_phys, 2, 1));
        let word1 = (word1 & 0x0000_FFFF) | ((max_packet_size0 as u32) << 16);
        self.write32(Self::context_word_addr(input_ctx_phys, 2, 1), word1);
    }

    fn allocate_slot_structures(&mut self, port: u8, speed: UsbSpeed) -> Result<XhciSlot, &'static str> {
        let input_pages = crate::mm::allocate_pages(1, None).map_err(|_| "Failed to allocate input context")?;
        let input_ctx_phys = input_pages.first().ok_or("Empty allocation")?.as_addr().as_u64();

        let output_pages = crate::mm::allocate_pages(1, None).map_err(|_| "Failed to allocate output context")?;
        let output_ctx_phys = output_pages.first().ok_or("Empty allocation")?.as_addr().as_u64();
        unsafe { core::ptr::write_bytes(output_ctx_phys as *mut u8, 0, 4096) };

        let ring_pages = crate::mm::allocate_pages(1, None).map_err(|_| "Failed to allocate EP0 ring")?;
        let ep0_ring_phys = ring_pages.first().ok_or("Empty allocation")?.as_addr().as_u64();
        unsafe { core::ptr::write_bytes(ep0_ring_phys as *mut u8, 0, 4096) };
        let link = Trb::link(ep0_ring_phys, true, true);
        unsafe {
            let slot = (ep0_ring_phys as *mut Trb).add(regs::TRANSFER_RING_TRBS - 1);
            core::ptr::write_volatile(slot, link);
        }

        let max_packet_size0 = match speed {
            UsbSpeed::Low => 8,
            _ => 64,
        };

        self.write_input_context(input_ctx_phys, port, speed, ep0_ring_phys, max_packet_size0);

        // Enable Slot.
        let completion = self.post_command(regs::TRB_TYPE_ENABLE_SLOT, 0, 0)?;
        if completion.completion_code() != regs::TRB_CC_SUCCESS {
            return Err("Enable Slot command failed");
        }
        let slot_id = completion.slot_id();
        if slot_id == 0 {
            return Err("Enable Slot returned slot 0");
        }

        // DCBAA[slot_id] = output device context physical address.
        self.write64((self.dcbaa_phys as usize) + (slot_id as usize) * 8, output_ctx_phys);

        // Address Device, BSR=1: puts the slot in the Default state without
        // issuing SET_ADDRESS on the wire, so the device still answers at
        // address 0 while we read its descriptor.
        let bsr = 1u32 << 9;
        let completion = self.post_command(regs::TRB_TYPE_ADDRESS_DEVICE, input_ctx_phys, bsr)?;
        if completion.completion_code() != regs::TRB_CC_SUCCESS {
            return Err("Address Device (BSR=1) command failed");
        }

        Ok(XhciSlot {
            slot_id,
            input_ctx_phys,
            output_ctx_phys,
            ep0_ring_phys,
            ep0_enqueue: 0,
            ep0_cycle: true,
            max_packet_size0,
            mps_refreshed: false,
            addressed: false,
        })
    }
}

fn mmio_read32(addr: usize) -> u32 {
    unsafe { core::ptr::read_volatile(addr as *const u32) }
}

fn mmio_write32(addr: usize, value: u32) {
    unsafe { core::ptr::write_volatile(addr as *mut u32, value) }
}

fn mmio_write64(addr: usize, value: u64) {
    unsafe { core::ptr::write_volatile(addr as *mut u64, value) }
}

/// Poll interrupter 0's event ring until a TRB of the given type shows up,
/// or time out. Takes the controller's event-ring cursor by explicit
/// reference (rather than `&mut XhciController`) so callers can hold it
/// alongside a `&mut XhciSlot` borrowed from a different field of the
/// controller at the same time.
fn poll_event_ring(
    event_ring_phys: u64,
    runtime_base: usize,
    event_dequeue: &mut usize,
    event_ccs: &mut bool,
    want_type: u32,
) -> Result<Trb, &'static str> {
    for _ in 0..1_000_000u32 {
        let slot_ptr = unsafe { (event_ring_phys as *mut Trb).add(*event_dequeue) };
        let trb = unsafe { core::ptr::read_volatile(slot_ptr) };

        if trb.cycle() != *event_ccs {
            core::hint::spin_loop();
            continue;
        }

        *event_dequeue += 1;
        if *event_dequeue >= regs::EVENT_RING_TRBS {
            *event_dequeue = 0;
            *event_ccs = !*event_ccs;
        }

        let erdp = event_ring_phys + (*event_dequeue as u64) * 16;
        mmio_write64(runtime_base + regs::IR0_ERDP, erdp | regs::ERDP_EHB);

        if trb.trb_type() == want_type {
            return Ok(trb);
        }
        // Otherwise it's an unrelated event (e.g. a port status change
        // queued ahead of the completion we're waiting for) -- drop it and
        // keep polling.
    }
    Err("xHCI event timeout")
}

fn enqueue_transfer_trb(slot: &mut XhciSlot, mut trb: Trb) {
    trb.control = (trb.control & !1) | (slot.ep0_cycle as u32);
    let slot_ptr = unsafe { (slot.ep0_ring_phys as *mut Trb).add(slot.ep0_enqueue) };
    unsafe { core::ptr::write_volatile(slot_ptr, trb) };

    slot.ep0_enqueue += 1;
    if slot.ep0_enqueue >= regs::TRANSFER_RING_TRBS - 1 {
        slot.ep0_enqueue = 0;
        slot.ep0_cycle = !slot.ep0_cycle;
    }
}

/// Issue a control transfer over a slot's EP0 ring: Setup Stage, an
/// optional Data Stage, then Status Stage, ringing the doorbell once and
/// polling for the Transfer Event. Free function (not a method) so a
/// caller can hold this `&mut XhciSlot` and the controller's event-ring
/// cursor fields borrowed at the same time without a double `&mut self`.
#[allow(clippy::too_many_arguments)]
fn xhci_control_transfer(
    slot: &mut XhciSlot,
    doorbell_base: usize,
    runtime_base: usize,
    event_ring_phys: u64,
    event_dequeue: &mut usize,
    event_ccs: &mut bool,
    request_type: u8,
    request: u8,
    value: u16,
    index: u16,
    data_len: u16,
    data_phys: u64,
    data_in: bool,
) -> Result<u32, &'static str> {
    let setup_parameter = (request_type as u64)
        | ((request as u64) << 8)
        | ((value as u64) << 16)
        | ((index as u64) << 32)
        | ((data_len as u64) << 48);
    let trt = if data_len == 0 {
        0u32
    } else if data_in {
        3u32
    } else {
        2u32
    };
    enqueue_transfer_trb(
        slot,
        Trb::command(
            regs::TRB_TYPE_SETUP_STAGE,
            setup_parameter,
            (8 << 17) | (trt << 16),
            slot.ep0_cycle,
        ),
    );

    if data_len > 0 {
        let dir_bit = if data_in { 1u32 << 16 } else { 0 };
        enqueue_transfer_trb(
            slot,
            Trb::command(
                regs::TRB_TYPE_DATA_STAGE,
                data_phys,
                ((data_len as u32) & 0x1FFFF) | dir_bit,
                slot.ep0_cycle,
            ),
        );
    }

    let status_dir = if data_len > 0 && !data_in { 1u32 << 16 } else { 0 };
    enqueue_transfer_trb(
        slot,
        Trb::command(
            regs::TRB_TYPE_STATUS_STAGE,
            0,
            status_dir | (1 << 5), // Interrupt On Completion
            slot.ep0_cycle,
        ),
    );

    mmio_write32(doorbell_base + (slot.slot_id as usize) * 4, 1); // DCI 1 = EP0
    let completion = poll_event_ring(event_ring_phys, runtime_base, event_dequeue, event_ccs, regs::TRB_TYPE_TRANSFER_EVENT)?;
    Ok(completion.completion_code())
}

impl UsbHostController for XhciController {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self) -> Result<(), &'static str> {
        crate::println!(
            "[USB] Initializing xHCI controller at 0x{:x}",
            self.mmio_base
        );

        if self.emulated() {
            crate::println!("[USB] xHCI: No hardware present, using software emulation");
            self.max_ports = 2;
            self.initialized = true;
            return Ok(());
        }

        self.bios_handoff();
        self.reset_controller();

        let caplength_hciversion = self.read32(self.mmio_base + regs::CAPLENGTH);
        self.cap_length = (caplength_hciversion & 0xFF) as usize;

        let hcsparams1 = self.read32(self.mmio_base + regs::HCSPARAMS1);
        self.max_slots = (hcsparams1 & 0xFF) as u8;
        self.max_ports = ((hcsparams1 >> 24) & 0xFF) as u8;

        let dboff = self.read32(self.mmio_base + regs::DBOFF);
        self.doorbell_base = self.mmio_base + (dboff as usize & !0x3);

        let rtsoff = self.read32(self.mmio_base + regs::RTSOFF);
        self.runtime_base = self.mmio_base + (rtsoff as usize & !0x1F);

        self.allocate_core_structures()?;
        self.program_core_structures();

        let cmd_addr = self.op_base() + regs::USBCMD;
        self.write32(cmd_addr, regs::CMD_RUN | regs::CMD_INTE);

        let sts_addr = self.op_base() + regs::USBSTS;
        for _ in 0..100_000 {
            if self.read32(sts_addr) & regs::STS_HCH == 0 {
                break;
            }
            core::hint::spin_loop();
        }

        // No-Op command: cheap proof the command ring round-trips before we
        // start relying on it for Enable Slot / Address Device.
        let completion = self.post_command(regs::TRB_TYPE_NOOP_CMD, 0, 0)?;
        if completion.completion_code() != regs::TRB_CC_SUCCESS {
            crate::println!("[USB] xHCI: No-Op command did not complete cleanly");
        }

        self.initialized = true;
        crate::println!(
            "[USB] xHCI controller initialized ({} slots, {} ports)",
            self.max_slots,
            self.max_ports
        );

        Ok(())
    }

    fn reset(&mut self) -> Result<(), &'static str> {
        if self.emulated() {
            return Ok(());
        }
        self.reset_controller();
        crate::println!("[USB] xHCI controller reset complete");
        Ok(())
    }

    fn get_port_count(&self) -> u8 {
        self.max_ports
    }

    fn get_port_status(&self, port: u8) -> Result<UsbPortStatus, &'static str> {
        if port == 0 || port > self.max_ports {
            return Err("Invalid port number");
        }

        if self.emulated() {
            return Ok(UsbPortStatus {
                connected: false,
                enabled: false,
                suspended: false,
                reset: false,
                speed: UsbSpeed::High,
                power: true,
            });
        }

        let portsc = self.read32(self.portsc_addr(port));
        let speed_field = (portsc >> regs::PORTSC_SPEED_SHIFT) & regs::PORTSC_SPEED_MASK;

        Ok(UsbPortStatus {
            connected: portsc & regs::PORTSC_CCS != 0,
            enabled: portsc & regs::PORTSC_PED != 0,
            suspended: false,
            reset: portsc & regs::PORTSC_PR != 0,
            speed: match speed_field {
                1 => UsbSpeed::Full,
                2 => UsbSpeed::Low,
                3 => UsbSpeed::High,
                4 => UsbSpeed::Super,
                5 => UsbSpeed::SuperPlus,
                _ => UsbSpeed::High,
            },
            power: portsc & regs::PORTSC_PP != 0,
        })
    }

    /// Tiered hub init requires port bring-up to be serialized: only one
    /// port (root or, eventually, downstream hub) resets and enumerates at
    /// a time, so a reset on port N always completes -- PED set, slot
    /// enabled, Address Device (BSR=1) posted -- before port N+1 starts.
    /// `UsbBus::scan_controller_ports` already calls this one port at a
    /// time; the serialization point here is that `reset_port` itself does
    /// not return until the whole Enable-Slot-and-BSR1-Address sequence for
    /// that port has completed.
    fn reset_port(&mut self, port: u8) -> Result<(), &'static str> {
        if port == 0 || port > self.max_ports {
            return Err("Invalid port number");
        }

        if self.emulated() {
            return Ok(());
        }

        let addr = self.portsc_addr(port);
        let current = self.read32(addr);
        self.write32(addr, (current & !(regs::PORTSC_CSC | regs::PORTSC_PEC | regs::PORTSC_PRC)) | regs::PORTSC_PR);

        for _ in 0..100_000 {
            if self.read32(addr) & regs::PORTSC_PR == 0 {
                break;
            }
            core::hint::spin_loop();
        }

        let after = self.read32(addr);
        self.write32(addr, after | regs::PORTSC_CSC | regs::PORTSC_PEC | regs::PORTSC_PRC);

        if after & regs::PORTSC_PED == 0 {
            return Err("Port did not enable after reset");
        }

        let speed_field = (after >> regs::PORTSC_SPEED_SHIFT) & regs::PORTSC_SPEED_MASK;
        let speed = match speed_field {
            1 => UsbSpeed::Full,
            2 => UsbSpeed::Low,
            3 => UsbSpeed::High,
            4 => UsbSpeed::Super,
            5 => UsbSpeed::SuperPlus,
            _ => UsbSpeed::High,
        };

        let slot = self.allocate_slot_structures(port, speed)?;
        self.pending_slots.insert(port, slot);

        crate::println!("[USB] Port {} reset complete, slot enabled (BSR=1)", port);
        Ok(())
    }

    fn enable_port(&mut self, port: u8) -> Result<(), &'static str> {
        if port == 0 || port > self.max_ports {
            return Err("Invalid port number");
        }
        // Port enable happens implicitly as part of the reset-and-enable-slot
        // sequence in `reset_port`; xHCI has no separate software enable.
        Ok(())
    }

    fn disable_port(&mut self, port: u8) -> Result<(), &'static str> {
        if port == 0 || port > self.max_ports {
            return Err("Invalid port number");
        }

        if self.emulated() {
            return Ok(());
        }

        if let Some(slot) = self.pending_slots.remove(&port) {
            let _ = self.post_command(regs::TRB_TYPE_DISABLE_SLOT, 0, (slot.slot_id as u32) << 24);
        }

        let addr = self.portsc_addr(port);
        let current = self.read32(addr);
        self.write32(addr, current & !regs::PORTSC_PED);

        crate::println!("[USB] Port {} disabled", port);
        Ok(())
    }

    fn transfer(
        &mut self,
        device_address: u8,
        transfer: UsbTransfer,
    ) -> Result<Vec<u8>, &'static str> {
        if self.emulated() || !self.initialized {
            return match transfer {
                UsbTransfer::Setup { data, value, .. } => {
                    if (value >> 8) == 1 {
                        let mut response = vec![0u8; data.len().min(18)];
                        if response.len() >= 18 {
                            response[0] = 18;
                            response[1] = 1;
                            response[2] = 0x00;
                            response[3] = 0x03; // bcdUSB (USB 3.0, matches xHCI)
                            response[4] = 0;
                            response[5] = 0;
                            response[6] = 0;
                            response[7] = 64;
                            response[8] = 0x34;
                            response[9] = 0x12;
                            response[10] = 0x78;
                            response[11] = 0x56;
                            response[12] = 0x00;
                            response[13] = 0x01;
                            response[14] = 0;
                            response[15] = 0;
                            response[16] = 0;
                            response[17] = 1;
                        }
                        Ok(response)
                    } else {
                        Ok(vec![0u8; data.len()])
                    }
                }
                UsbTransfer::In { length, .. } => Ok(vec![0u8; length]),
                UsbTransfer::Out { .. } => Ok(Vec::new()),
            };
        }

        match transfer {
            UsbTransfer::Setup { request_type, request, value, index, data } => {
                let data_in = request_type & 0x80 != 0;
                let data_len = data.len() as u16;

                let scratch_phys = if data_len > 0 {
                    let pages = crate::mm::allocate_pages(1, None).map_err(|_| "Failed to allocate scratch buffer")?;
                    let phys = pages.first().ok_or("Empty allocation")?.as_addr().as_u64();
                    if !data_in {
                        unsafe { core::ptr::copy_nonoverlapping(data.as_ptr(), phys as *mut u8, data.len()) };
                    }
                    phys
                } else {
                    0
                };

                let learn_mps = device_address == 0 && request == 0x06 && (value >> 8) == 1;
                let doorbell_base = self.doorbell_base;
                let runtime_base = self.runtime_base;
                let event_ring_phys = self.event_ring_phys;

                // Scoped so the `&mut XhciSlot` borrowed from `pending_slots`/
                // `addressed_slots` ends before we touch `self` again below --
                // `self.event_dequeue`/`self.event_ccs` are disjoint fields, but
                // `self.update_ep0_max_packet_size`/`self.post_command` need the
                // whole `&mut self` back.
                let (input_ctx_phys, already_refreshed, cc) = {
                    let slot = if device_address == 0 {
                        self.pending_slots.values_mut().next()
                    } else {
                        self.addressed_slots.get_mut(&device_address)
                    }
                    .ok_or("No slot for device address")?;
                    let input_ctx_phys = slot.input_ctx_phys;
                    let already_refreshed = slot.mps_refreshed;
                    let cc = xhci_control_transfer(
                        slot,
                        doorbell_base,
                        runtime_base,
                        event_ring_phys,
                        &mut self.event_dequeue,
                        &mut self.event_ccs,
                        request_type,
                        request,
                        value,
                        index,
                        data_len,
                        scratch_phys,
                        data_in,
                    )?;
                    (input_ctx_phys, already_refreshed, cc)
                };

                if cc != regs::TRB_CC_SUCCESS {
                    return Err("Control transfer did not complete successfully");
                }

                let mut response = vec![0u8; data.len()];
                if data_in && data_len > 0 {
                    unsafe { core::ptr::copy_nonoverlapping(scratch_phys as *const u8, response.as_mut_ptr(), response.len()) };
                }

                // Re-issue Address Device (still BSR=1) now that we know the
                // real bMaxPacketSize0, so EP0's context reflects the
                // device's actual control packet size for the rest of
                // enumeration.
                if learn_mps && !already_refreshed && response.len() >= 8 {
                    let mps0 = response[7] as u16;
                    self.update_ep0_max_packet_size(input_ctx_phys, mps0);
                    let bsr = 1u32 << 9;
                    let completion = self.post_command(regs::TRB_TYPE_ADDRESS_DEVICE, input_ctx_phys, bsr)?;
                    if completion.completion_code() == regs::TRB_CC_SUCCESS {
                        if let Some(slot) = self.pending_slots.values_mut().next() {
                            slot.max_packet_size0 = mps0;
                            slot.mps_refreshed = true;
                        }
                    }
                }

                Ok(response)
            }
            UsbTransfer::In { length, .. } => {
                let pages = crate::mm::allocate_pages(1, None).map_err(|_| "Failed to allocate scratch buffer")?;
                let phys = pages.first().ok_or("Empty allocation")?.as_addr().as_u64();
                let doorbell_base = self.doorbell_base;
                let runtime_base = self.runtime_base;
                let event_ring_phys = self.event_ring_phys;
                let cc = {
                    let slot = if device_address == 0 {
                        self.pending_slots.values_mut().next()
                    } else {
                        self.addressed_slots.get_mut(&device_address)
                    }
                    .ok_or("No slot for device address")?;
                    xhci_control_transfer(
                        slot,
                        doorbell_base,
                        runtime_base,
                        event_ring_phys,
                        &mut self.event_dequeue,
                        &mut self.event_ccs,
                        0x80,
                        0x06,
                        0x0100,
                        0,
                        length as u16,
                        phys,
                        true,
                    )?
                };
                if cc != regs::TRB_CC_SUCCESS {
                    return Err("IN transfer did not complete successfully");
                }
                let mut response = vec![0u8; length];
                unsafe { core::ptr::copy_nonoverlapping(phys as *const u8, response.as_mut_ptr(), length) };
                Ok(response)
            }
            UsbTransfer::Out { data, .. } => {
                let pages = crate::mm::allocate_pages(1, None).map_err(|_| "Failed to allocate scratch buffer")?;
                let phys = pages.first().ok_or("Empty allocation")?.as_addr().as_u64();
                unsafe { core::ptr::copy_nonoverlapping(data.as_ptr(), phys as *mut u8, data.len()) };
                let doorbell_base = self.doorbell_base;
                let runtime_base = self.runtime_base;
                let event_ring_phys = self.event_ring_phys;
                let cc = {
                    let slot = if device_address == 0 {
                        self.pending_slots.values_mut().next()
                    } else {
                        self.addressed_slots.get_mut(&device_address)
                    }
                    .ok_or("No slot for device address")?;
                    xhci_control_transfer(
                        slot,
                        doorbell_base,
                        runtime_base,
                        event_ring_phys,
                        &mut self.event_dequeue,
                        &mut self.event_ccs,
                        0x00,
                        0x09,
                        0,
                        0,
                        data.len() as u16,
                        phys,
                        false,
                    )?
                };
                if cc != regs::TRB_CC_SUCCESS {
                    return Err("OUT transfer did not complete successfully");
                }
                Ok(Vec::new())
            }
        }
    }

    fn set_device_address(&mut self, old_address: u8, new_address: u8) -> Result<(), &'static str> {
        if self.emulated() || !self.initialized {
            crate::println!(
                "[USB] Device address changed from {} to {}",
                old_address,
                new_address
            );
            return Ok(());
        }

        if old_address != 0 {
            return Err("xHCI addresses devices from the default pipe only");
        }

        let port = *self
            .pending_slots
            .iter()
            .next()
            .map(|(port, _)| port)
            .ok_or("No pending slot to address")?;
        let mut slot = self.pending_slots.remove(&port).ok_or("No pending slot to address")?;

        // Final Address Device, BSR=0: this is the one that actually issues
        // SET_ADDRESS on the wire and moves the slot to the Addressed state.
        let completion = self.post_command(regs::TRB_TYPE_ADDRESS_DEVICE, slot.input_ctx_phys, 0)?;
        if completion.completion_code() != regs::TRB_CC_SUCCESS {
            self.pending_slots.insert(port, slot);
            return Err("Address Device (BSR=0) command failed");
        }

        slot.addressed = true;
        self.addressed_slots.insert(new_address, slot);

        crate::println!(
            "[USB] Device addressed: slot assigned, USB address {} (port {})",
            new_address,
            port
        );

        Ok(())
    }
}

/// Global USB bus instance
static USB_BUS: spin::Once<Mutex<UsbBus>> = spin::Once::new();

/// Initialize USB subsystem
pub fn init() {
    let usb_bus = UsbBus::new();
    USB_BUS.call_once(|| Mutex::new(usb_bus));

    // Controller at bus 0, slot 0 (placeholder BDF until ACPI/PCI handoff wires
    // the real xHCI controller address through).
    let xhci = XhciController::new(0);
    if let Err(e) = get_usb_bus().lock().add_controller(Box::new(xhci)) {
        crate::println!("[USB] Failed to add xHCI controller: {}", e);
    } else {
        crate::println!("[USB] USB bus driver initialized");
    }
}

/// Get the global USB bus
pub fn get_usb_bus() -> &'static Mutex<UsbBus> {
    {
        USB_BUS.get().expect("USB bus not initialized")
    }
}
