//! Shared device/driver/bus vocabulary used across the driver tree.
//!
//! There is no central driver-framework registry: each bus module owns
//! its device list and probes drivers directly out of its `init()`.
//! This module only supplies the common types the individual drivers
//! describe themselves with.

use alloc::string::String;
use alloc::vec::Vec;

/// Broad functional class a device falls into, used for driver matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Display,
    Serial,
    Network,
    Storage,
    Input,
    Audio,
    USB,
    PCI,
    Other,
}

/// PCI-style identification fields, also reused to tag USB devices by
/// class/subclass/protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceId {
    pub vendor_id: u16,
    pub device_id: u16,
    pub class_code: u8,
    pub subclass: u8,
    pub prog_if: u8,
    pub revision: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Uninitialized,
    Active,
    Suspended,
    Removed,
}

/// Snapshot of a device as reported by a [`Bus::scan`].
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub id: u64,
    pub name: String,
    pub class: DeviceClass,
    pub device_id: Option<DeviceId>,
    pub driver: Option<String>,
    pub bus: String,
    pub address: u64,
    pub irq: Option<u8>,
    pub dma_channels: Vec<u8>,
    pub io_ports: Vec<(u16, u16)>,
    pub memory_regions: Vec<(u64, u64)>,
    pub status: DeviceStatus,
}

/// A driver that can claim and operate devices of one or more classes.
pub trait Driver: Send + Sync {
    fn name(&self) -> &str;
    fn supported_classes(&self) -> Vec<DeviceClass>;
    fn supports_device(&self, device: &DeviceInfo) -> bool;
    fn probe(&mut self, device: &DeviceInfo) -> Result<(), &'static str>;
    fn attach(&mut self, device: &DeviceInfo) -> Result<(), &'static str>;
    fn detach(&mut self, device: &DeviceInfo) -> Result<(), &'static str>;
    fn suspend(&mut self) -> Result<(), &'static str>;
    fn resume(&mut self) -> Result<(), &'static str>;
}

/// A bus capable of enumerating the devices attached to it.
pub trait Bus: Send + Sync {
    fn name(&self) -> &str;
    fn scan(&mut self) -> Vec<DeviceInfo>;
    fn read_config(&self, device: &DeviceInfo, offset: u16, size: u8) -> Result<u32, &'static str>;
    fn write_config(
        &mut self,
        device: &DeviceInfo,
        offset: u16,
        value: u32,
        size: u8,
    ) -> Result<(), &'static str>;
}
