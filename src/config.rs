//! Build-time endpoint configuration
//!
//! All addressing is fixed when the firmware is built; there is no
//! discovery protocol and no runtime negotiation. The values below are
//! what a deployment edits.

use crate::net::MacAddress;
use core::net::Ipv4Addr;

/// Static identity and behaviour switches for the endpoint
#[derive(Clone, Copy, Debug)]
pub struct EndpointConfig {
    /// The endpoint's own IPv4 address
    pub ip: Ipv4Addr,
    /// The endpoint's station address. Keep the locally-administered bit
    /// set unless the PHY ships with an assigned address.
    pub mac: MacAddress,
    /// Subnet mask of the attached network
    pub netmask: Ipv4Addr,
    /// Gateway for destinations off the subnet
    pub router: Ipv4Addr,
    /// The peer pinged once per period
    pub ping_target: Ipv4Addr,
    /// Optional preloaded hardware address for the ping target. `None`
    /// leaves the target unresolved until an ARP reply is observed.
    pub ping_target_mac: Option<MacAddress>,
    /// Send a ping when a misdirected UDP datagram arrives. Inherited
    /// liveness poke; disable if the periodic ping alone should drive
    /// transmissions.
    pub udp_poke_ping: bool,
    /// Send a ping when an ARP request for some other station arrives.
    /// Same provenance as `udp_poke_ping`.
    pub arp_poke_ping: bool,
}

impl EndpointConfig {
    /// Addresses for the reference deployment.
    pub const fn board_default() -> Self {
        Self {
            ip: Ipv4Addr::new(192, 168, 1, 22),
            mac: MacAddress::new([0x02, 0x4A, 0x1C, 0x33, 0x90, 0x21]),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            router: Ipv4Addr::new(192, 168, 1, 1),
            ping_target: Ipv4Addr::new(192, 168, 1, 3),
            ping_target_mac: None,
            udp_poke_ping: true,
            arp_poke_ping: true,
        }
    }
}

/// Whether two addresses share a subnet under `mask`.
pub fn same_subnet(a: Ipv4Addr, b: Ipv4Addr, mask: Ipv4Addr) -> bool {
    let a = u32::from_be_bytes(a.octets());
    let b = u32::from_be_bytes(b.octets());
    let mask = u32::from_be_bytes(mask.octets());
    a & mask == b & mask
}
