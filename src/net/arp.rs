//! ARP (Address Resolution Protocol) handling
//!
//! ARP maps an IPv4 address to a MAC address on the local segment. This
//! module provides an in-place view over received ARP payloads and writers
//! for the two messages this endpoint originates: the reply to a request
//! for its own address, and the query staged when a resolution misses.
//!
//! Reference: RFC 826 - <https://www.rfc-editor.org/rfc/rfc826>

use super::ethernet::MacAddress;
use core::net::Ipv4Addr;

/// ARP request operation (who has IP address X?)
pub const OPER_REQUEST: u16 = 1;

/// ARP reply operation (IP address X is at MAC address Y)
pub const OPER_REPLY: u16 = 2;

/// Ethernet hardware type
pub const HARDWARE_ETHERNET: u16 = 1;

/// IPv4 protocol type
pub const PROTOCOL_IPV4: u16 = 0x0800;

/// Size of an Ethernet/IPv4 ARP packet:
/// hardware type (2) + protocol type (2) + address lengths (1+1) +
/// operation (2) + sender MAC (6) + sender IP (4) + target MAC (6) +
/// target IP (4)
pub const PACKET_LEN: usize = 28;

/// Read-only view over an ARP payload
pub struct ArpView<'a> {
    data: &'a [u8],
}

impl<'a> ArpView<'a> {
    /// Wrap `data` as an ARP packet.
    ///
    /// Returns `None` if the buffer is shorter than the fixed packet size.
    pub fn new_checked(data: &'a [u8]) -> Option<Self> {
        if data.len() < PACKET_LEN {
            return None;
        }
        Some(Self { data })
    }

    /// Hardware type (bytes 0-1, big-endian)
    pub fn hardware_type(&self) -> u16 {
        u16::from_be_bytes([self.data[0], self.data[1]])
    }

    /// Protocol type (bytes 2-3, big-endian)
    pub fn protocol_type(&self) -> u16 {
        u16::from_be_bytes([self.data[2], self.data[3]])
    }

    /// Operation (bytes 6-7, big-endian)
    pub fn oper(&self) -> u16 {
        u16::from_be_bytes([self.data[6], self.data[7]])
    }

    /// Whether the fixed fields describe Ethernet/IPv4 resolution
    pub fn is_ethernet_ipv4(&self) -> bool {
        self.hardware_type() == HARDWARE_ETHERNET
            && self.protocol_type() == PROTOCOL_IPV4
            && self.data[4] == 6
            && self.data[5] == 4
    }

    /// Sender hardware address (bytes 8-13)
    pub fn sender_mac(&self) -> MacAddress {
        let mut bytes = [0u8; 6];
        bytes.copy_from_slice(&self.data[8..14]);
        MacAddress(bytes)
    }

    /// Sender protocol address (bytes 14-17)
    pub fn sender_ip(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.data[14], self.data[15], self.data[16], self.data[17])
    }

    /// Target hardware address (bytes 18-23)
    pub fn target_mac(&self) -> MacAddress {
        let mut bytes = [0u8; 6];
        bytes.copy_from_slice(&self.data[18..24]);
        MacAddress(bytes)
    }

    /// Target protocol address (bytes 24-27)
    pub fn target_ip(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.data[24], self.data[25], self.data[26], self.data[27])
    }
}

/// Write an ARP request asking for `target_ip`.
///
/// The target hardware address is zeroed, as the answer is what is being
/// asked for. Returns the number of bytes written, or `None` if the buffer
/// is too small.
pub fn write_request(
    buf: &mut [u8],
    sender_mac: MacAddress,
    sender_ip: Ipv4Addr,
    target_ip: Ipv4Addr,
) -> Option<usize> {
    write_packet(
        buf,
        OPER_REQUEST,
        sender_mac,
        sender_ip,
        MacAddress::new([0; 6]),
        target_ip,
    )
}

/// Write an ARP reply: "`sender_ip` is at `sender_mac`", addressed to the
/// requester's MAC/IP pair.
pub fn write_reply(
    buf: &mut [u8],
    sender_mac: MacAddress,
    sender_ip: Ipv4Addr,
    target_mac: MacAddress,
    target_ip: Ipv4Addr,
) -> Option<usize> {
    write_packet(buf, OPER_REPLY, sender_mac, sender_ip, target_mac, target_ip)
}

fn write_packet(
    buf: &mut [u8],
    oper: u16,
    sender_mac: MacAddress,
    sender_ip: Ipv4Addr,
    target_mac: MacAddress,
    target_ip: Ipv4Addr,
) -> Option<usize> {
    if buf.len() < PACKET_LEN {
        return None;
    }
    buf[0..2].copy_from_slice(&HARDWARE_ETHERNET.to_be_bytes());
    buf[2..4].copy_from_slice(&PROTOCOL_IPV4.to_be_bytes());
    buf[4] = 6;
    buf[5] = 4;
    buf[6..8].copy_from_slice(&oper.to_be_bytes());
    buf[8..14].copy_from_slice(sender_mac.as_bytes());
    buf[14..18].copy_from_slice(&sender_ip.octets());
    buf[18..24].copy_from_slice(target_mac.as_bytes());
    buf[24..28].copy_from_slice(&target_ip.octets());
    Some(PACKET_LEN)
}
