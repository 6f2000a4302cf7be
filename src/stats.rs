//! Event counters
//!
//! One monotonic count per event category, owned by the supervisor and
//! surfaced for diagnostics only; nothing in the data path reads them
//! back. Each field has exactly one writer under the cooperative
//! scheduling model, so plain integers suffice; there is no concurrent
//! read-modify-write to guard against.

/// Endpoint event counters
#[derive(Clone, Copy, Debug, Default)]
pub struct Stats {
    /// Frames copied out of the receive slot
    pub frames_received: u32,
    /// Valid IPv4 packets addressed to this endpoint
    pub ip_received: u32,
    /// IPv4 packets dropped: bad version, fragmented, or not ours
    pub ip_invalid: u32,
    /// ARP frames seen
    pub arp_frames: u32,
    /// ARP frames with unusable hardware/protocol fields
    pub arp_invalid: u32,
    /// Broadcast ARP requests asking for this endpoint's address
    pub arp_requests_seen: u32,
    /// ICMP echo requests addressed to this endpoint
    pub echo_requests: u32,
    /// ICMP messages of types this endpoint does not speak
    pub icmp_invalid: u32,
    /// Echo replies dropped for an unresolved destination
    pub echo_unresolved: u32,
    /// Echo replies handed to the transmit path
    pub echo_replies_sent: u32,
    /// Echo replies dropped for size or header options
    pub echo_reply_err: u32,
    /// UDP datagrams echoed back
    pub udp_echoes: u32,
    /// UDP datagrams dropped for header options
    pub udp_options_dropped: u32,
    /// UDP echoes dropped for an unresolved destination
    pub udp_unresolved: u32,
    /// Pings transmitted
    pub ping_tx: u32,
    /// Ping replies observed
    pub ping_rx: u32,
    /// Background transmissions serviced through the trap
    pub trap_tx: u32,
    /// Trap requests rejected for exceeding the interface capability
    pub trap_oversize: u32,
    /// Background slices that found nothing to do
    pub idle_beats: u32,
    /// Supervisor periods started
    pub periods: u32,
    /// Inner-loop passes executed
    pub slices: u32,
}

impl Stats {
    pub const fn new() -> Self {
        Self {
            frames_received: 0,
            ip_received: 0,
            ip_invalid: 0,
            arp_frames: 0,
            arp_invalid: 0,
            arp_requests_seen: 0,
            echo_requests: 0,
            icmp_invalid: 0,
            echo_unresolved: 0,
            echo_replies_sent: 0,
            echo_reply_err: 0,
            udp_echoes: 0,
            udp_options_dropped: 0,
            udp_unresolved: 0,
            ping_tx: 0,
            ping_rx: 0,
            trap_tx: 0,
            trap_oversize: 0,
            idle_beats: 0,
            periods: 0,
            slices: 0,
        }
    }
}
