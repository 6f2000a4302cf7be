//! UDP header handling
//!
//! Minimal views over UDP datagrams: the echo path only reads the port
//! pair and carries the length and checksum fields through, so this module
//! stops at the 8-byte header.
//!
//! Reference: RFC 768 - <https://www.rfc-editor.org/rfc/rfc768>

/// UDP header size: source port (2) + destination port (2) + length (2) +
/// checksum (2)
pub const HEADER_LEN: usize = 8;

/// Read-only view over a UDP datagram
pub struct UdpView<'a> {
    data: &'a [u8],
}

impl<'a> UdpView<'a> {
    /// Wrap `data` as a UDP datagram.
    pub fn new_checked(data: &'a [u8]) -> Option<Self> {
        if data.len() < HEADER_LEN {
            return None;
        }
        Some(Self { data })
    }

    pub fn src_port(&self) -> u16 {
        u16::from_be_bytes([self.data[0], self.data[1]])
    }

    pub fn dst_port(&self) -> u16 {
        u16::from_be_bytes([self.data[2], self.data[3]])
    }

    /// Declared datagram length (header included)
    pub fn length(&self) -> u16 {
        u16::from_be_bytes([self.data[4], self.data[5]])
    }

    /// Stored datagram checksum (zero means "not computed")
    pub fn datagram_checksum(&self) -> u16 {
        u16::from_be_bytes([self.data[6], self.data[7]])
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.data[HEADER_LEN..]
    }
}

/// Write-side view over an outbound UDP header
pub struct UdpMut<'a> {
    data: &'a mut [u8],
}

impl<'a> UdpMut<'a> {
    pub fn new_checked(data: &'a mut [u8]) -> Option<Self> {
        if data.len() < HEADER_LEN {
            return None;
        }
        Some(Self { data })
    }

    pub fn set_src_port(&mut self, port: u16) {
        self.data[0..2].copy_from_slice(&port.to_be_bytes());
    }

    pub fn set_dst_port(&mut self, port: u16) {
        self.data[2..4].copy_from_slice(&port.to_be_bytes());
    }

    pub fn set_length(&mut self, len: u16) {
        self.data[4..6].copy_from_slice(&len.to_be_bytes());
    }

    /// Store a raw checksum value. The echo path uses this to carry the
    /// received checksum over instead of recomputing it.
    pub fn set_datagram_checksum(&mut self, sum: u16) {
        self.data[6..8].copy_from_slice(&sum.to_be_bytes());
    }
}
