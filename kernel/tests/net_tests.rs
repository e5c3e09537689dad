//! Network stack tests
//!
//! Covers address types, IPv4 header encode/decode, and route table
//! lookups -- the pieces exercisable without a real NIC behind them.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(oxidecore_kernel::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use oxidecore_kernel::{
    kernel_assert, kernel_assert_eq,
    net::{
        ip::{self, IpProtocol, Ipv4Header, RouteEntry},
        IpAddress, Ipv4Address, MacAddress, SocketAddr,
    },
    serial_println,
};

#[no_mangle]
pub extern "C" fn _start() -> ! {
    test_main();
    loop {}
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    oxidecore_kernel::test_panic_handler(info)
}

#[test_case]
fn test_ipv4_address_round_trips_through_u32() {
    let addr = Ipv4Address::new(192, 168, 1, 42);
    let as_u32 = addr.to_u32();
    kernel_assert_eq!(Ipv4Address::from_u32(as_u32), addr);
}

#[test_case]
fn test_mac_address_broadcast_is_all_ones() {
    kernel_assert_eq!(MacAddress::BROADCAST, MacAddress::new([0xFF; 6]));
}

#[test_case]
fn test_socket_addr_carries_ip_and_port() {
    let addr = SocketAddr::v4(Ipv4Address::LOCALHOST, 8080);
    kernel_assert_eq!(addr.ip(), IpAddress::V4(Ipv4Address::LOCALHOST));
    kernel_assert_eq!(addr.port(), 8080);
}

#[test_case]
fn test_ipv4_header_round_trips_through_bytes() {
    let header = Ipv4Header::new(
        Ipv4Address::new(10, 0, 0, 1),
        Ipv4Address::new(10, 0, 0, 2),
        IpProtocol::Udp,
    );
    let bytes = header.to_bytes();
    let parsed = Ipv4Header::from_bytes(&bytes).expect("failed to parse header");
    kernel_assert_eq!(parsed.source, header.source);
    kernel_assert_eq!(parsed.destination, header.destination);
    kernel_assert_eq!(parsed.protocol, IpProtocol::Udp as u8);
}

#[test_case]
fn test_ipv4_header_checksum_is_verifiable() {
    let mut header = Ipv4Header::new(
        Ipv4Address::new(172, 16, 0, 1),
        Ipv4Address::new(172, 16, 0, 2),
        IpProtocol::Tcp,
    );
    header.total_length = 20;
    header.calculate_checksum();

    // Summing every 16-bit word of a header with a correct checksum,
    // including the checksum field itself, folds to zero.
    let bytes = header.to_bytes();
    let mut sum: u32 = 0;
    for i in 0..10 {
        sum += u16::from_be_bytes([bytes[i * 2], bytes[i * 2 + 1]]) as u32;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    kernel_assert_eq!(sum as u16, 0xFFFF);
}

#[test_case]
fn test_route_lookup_finds_added_route() {
    let dest = Ipv4Address::new(203, 0, 113, 0);
    ip::add_route(RouteEntry {
        destination: dest,
        netmask: Ipv4Address::new(255, 255, 255, 0),
        gateway: Some(Ipv4Address::new(10, 0, 0, 1)),
        interface: 0,
    });
    kernel_assert!(ip::lookup_route(Ipv4Address::new(203, 0, 113, 5)).is_some());
}
