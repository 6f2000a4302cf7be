//! Address resolution
//!
//! The ARP cache maps peer IPv4 addresses to their station addresses, and
//! [`ResolutionState`] tracks the two addresses the endpoint actually
//! depends on: the ping target and the router. A cache miss is not just a
//! miss: [`ArpCache::lookup`] stages an ARP query for the missing address
//! through the trap mailbox, so simply asking keeps resolution moving.
//!
//! Entries never expire. When the table is full the oldest entry is
//! evicted; on a network with fewer steady-state peers than
//! [`CACHE_CAPACITY`] that never happens.

use crate::net::arp;
use crate::net::ethernet::{self, ETHERTYPE_ARP, EthFrameMut, MacAddress};
use crate::sched::TxTrap;
use core::net::Ipv4Addr;
use heapless::LinearMap;
use log::debug;

/// Resolution table capacity
pub const CACHE_CAPACITY: usize = 16;

/// The addresses the endpoint's own traffic depends on
#[derive(Clone, Copy, Debug)]
pub struct ResolutionState {
    /// The peer pinged every period (fixed)
    pub target_ip: Ipv4Addr,
    /// Station address of the ping target; `None` until resolved
    pub target_mac: Option<MacAddress>,
    /// Station address of the router; `None` until resolved
    pub router_mac: Option<MacAddress>,
}

impl ResolutionState {
    /// Start with the target optionally preloaded from configuration.
    pub const fn new(target_ip: Ipv4Addr, preloaded: Option<MacAddress>) -> Self {
        Self {
            target_ip,
            target_mac: preloaded,
            router_mac: None,
        }
    }
}

/// IPv4 → station address cache
pub struct ArpCache {
    entries: LinearMap<Ipv4Addr, MacAddress, CACHE_CAPACITY>,
    local_ip: Ipv4Addr,
    local_mac: MacAddress,
}

impl ArpCache {
    /// Create an empty cache. The local identity is kept for building
    /// queries.
    pub fn new(local_ip: Ipv4Addr, local_mac: MacAddress) -> Self {
        Self {
            entries: LinearMap::new(),
            local_ip,
            local_mac,
        }
    }

    /// Look up `ip`. On a miss, an ARP query for `ip` is staged through
    /// `trap` (skipped if the slot is already occupied; the next lookup
    /// retries).
    pub fn lookup(&mut self, ip: Ipv4Addr, trap: &mut TxTrap) -> Option<MacAddress> {
        if let Some(mac) = self.entries.get(&ip) {
            return Some(*mac);
        }
        let (local_mac, local_ip) = (self.local_mac, self.local_ip);
        if trap.submit(|buf| write_query(buf, local_mac, local_ip, ip)) {
            debug!("arp: querying {}", ip);
        }
        None
    }

    /// Record or refresh a mapping.
    pub fn upsert(&mut self, ip: Ipv4Addr, mac: MacAddress) {
        if let Err((ip, mac)) = self.entries.insert(ip, mac) {
            // Table full: evict the oldest entry and retry
            if let Some(oldest) = self.entries.iter().next().map(|(k, _)| *k) {
                self.entries.remove(&oldest);
            }
            let _ = self.entries.insert(ip, mac);
        }
        debug!("arp: {} is at {}", ip, mac);
    }

    /// Number of cached mappings
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no mappings
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Write a broadcast ARP query frame asking for `target_ip`.
fn write_query(
    buf: &mut [u8],
    local_mac: MacAddress,
    local_ip: Ipv4Addr,
    target_ip: Ipv4Addr,
) -> Option<usize> {
    let mut eth = EthFrameMut::new_checked(buf)?;
    eth.set_header(MacAddress::broadcast(), local_mac, ETHERTYPE_ARP);
    let len = arp::write_request(eth.payload_mut(), local_mac, local_ip, target_ip)?;
    Some(ethernet::HEADER_LEN + len)
}
