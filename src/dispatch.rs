//! Frame classifier & dispatcher
//!
//! The background context. Each [`Dispatcher::step`] is one cooperative
//! slice: either an idle heartbeat (with a once-per-second opportunistic
//! re-resolution of the ping target and the router) or the full handling
//! of one received frame: copy out of the hardware slot, acknowledge,
//! classify by ethertype, and route to the ARP handling or the
//! ICMP/UDP responders. Anything this context wants transmitted goes into
//! the trap mailbox for the supervisor to service; the transmit gate is
//! never touched from here.

use crate::MAX_FRAME_LEN;
use crate::config::EndpointConfig;
use crate::echo;
use crate::hw::{Board, Color, Lamp};
use crate::net::arp::{self, ArpView};
use crate::net::ethernet::{self, ETHERTYPE_ARP, ETHERTYPE_IPV4, EthFrame, EthFrameMut};
use crate::net::icmp::{self, IcmpView};
use crate::net::ipv4::{Ipv4View, PROTO_ICMP, PROTO_UDP};
use crate::pinger::{self, IpIdGen};
use crate::resolve::{ArpCache, ResolutionState};
use crate::sched::TxTrap;
use crate::stats::Stats;
use log::debug;

/// Everything a background slice may touch besides the hardware
///
/// Borrowed piecemeal from the supervisor so the dispatcher, the cache,
/// and the responders can hold disjoint mutable state at once.
pub(crate) struct Ctx<'a> {
    pub cfg: &'a EndpointConfig,
    pub cache: &'a mut ArpCache,
    pub state: &'a mut ResolutionState,
    pub ids: &'a mut IpIdGen,
    pub stats: &'a mut Stats,
    pub trap: &'a mut TxTrap,
    /// Interface frame capability, snapshot at the start of the slice
    pub hw_max: usize,
}

/// Background frame-processing context
pub struct Dispatcher {
    /// Private copy of the frame being processed. Outlives the hardware
    /// slot on purpose: the slot is re-armed the moment it is
    /// acknowledged.
    rx_buf: [u8; MAX_FRAME_LEN],
    /// RTC second of the last opportunistic re-resolution
    last_refresh: u32,
}

#[allow(clippy::new_without_default)]
impl Dispatcher {
    pub fn new() -> Self {
        Self {
            rx_buf: [0u8; MAX_FRAME_LEN],
            // Sentinel: refresh on the very first slice
            last_refresh: u32::MAX,
        }
    }

    /// Run one cooperative slice of background work.
    pub(crate) fn step<H: Board>(&mut self, hw: &mut H, ctx: &mut Ctx) {
        // Opportunistic re-resolution, rate-limited to the RTC second.
        // The router is only worth chasing once the target resolves; a
        // miss on either has already staged an ARP query.
        let now = hw.seconds();
        if now != self.last_refresh {
            self.last_refresh = now;
            if let Some(mac) = ctx.cache.lookup(ctx.state.target_ip, ctx.trap) {
                ctx.state.target_mac = Some(mac);
                if let Some(router_mac) = ctx.cache.lookup(ctx.cfg.router, ctx.trap) {
                    ctx.state.router_mac = Some(router_mac);
                }
            }
        }

        if !hw.rx_ready() {
            ctx.stats.idle_beats += 1;
            return;
        }

        // Copy the frame out before acknowledging: the acknowledgement
        // re-arms the hardware to overwrite the slot.
        let len = hw.rx_len().min(MAX_FRAME_LEN);
        self.rx_buf[..len].copy_from_slice(&hw.rx_slot()[..len]);
        let broadcast = hw.rx_is_broadcast();
        hw.rx_ack();
        ctx.stats.frames_received += 1;

        let Some(frame) = EthFrame::new_checked(&self.rx_buf[..len]) else {
            debug!("rx: runt frame ({} bytes)", len);
            return;
        };
        match frame.ethertype() {
            ETHERTYPE_IPV4 => self.handle_ip(hw, ctx, len),
            ETHERTYPE_ARP => self.handle_arp(hw, ctx, len, broadcast),
            other => debug!("rx: ignoring ethertype {:#06X}", other),
        }
    }

    fn handle_ip<H: Board>(&self, hw: &mut H, ctx: &mut Ctx, len: usize) {
        let ip_pkt = &self.rx_buf[ethernet::HEADER_LEN..len];
        let Some(ip) = Ipv4View::new_checked(ip_pkt) else {
            ctx.stats.ip_invalid += 1;
            return;
        };

        let invalid = ip.version() != 4 || ip.is_fragmented() || ip.dst() != ctx.cfg.ip;
        if invalid {
            ctx.stats.ip_invalid += 1;
        } else {
            ctx.stats.ip_received += 1;
        }

        match ip.protocol() {
            PROTO_ICMP if !invalid => match IcmpView::new_checked(ip.payload()) {
                Some(msg) if msg.msg_type() == icmp::TYPE_ECHO_REPLY => {
                    // Our ping came back
                    hw.set_lamp(Lamp::Ping, Color::Green);
                    hw.set_bank(0x80);
                    ctx.stats.ping_rx += 1;
                }
                Some(msg) if msg.msg_type() == icmp::TYPE_ECHO_REQUEST => {
                    ctx.stats.echo_requests += 1;
                    echo::reply_echo(ctx, ip_pkt);
                }
                _ => ctx.stats.icmp_invalid += 1,
            },
            PROTO_UDP => {
                if invalid {
                    // Misdirected or broadcast-looking datagram: inherited
                    // liveness poke rather than a reply
                    if ctx.cfg.udp_poke_ping {
                        self.poke_ping(hw, ctx);
                    }
                } else {
                    echo::reply_udp(ctx, &self.rx_buf[ethernet::HEADER_LEN..]);
                }
            }
            other => debug!("rx: ignoring IP protocol {}", other),
        }
    }

    fn handle_arp<H: Board>(&self, hw: &mut H, ctx: &mut Ctx, len: usize, broadcast: bool) {
        ctx.stats.arp_frames += 1;
        let payload = &self.rx_buf[ethernet::HEADER_LEN..len];
        let Some(pkt) = ArpView::new_checked(payload) else {
            ctx.stats.arp_invalid += 1;
            return;
        };
        if !pkt.is_ethernet_ipv4() {
            ctx.stats.arp_invalid += 1;
            return;
        }

        match pkt.oper() {
            arp::OPER_REQUEST if broadcast => {
                if pkt.target_ip() == ctx.cfg.ip {
                    ctx.stats.arp_requests_seen += 1;
                    self.answer_arp_request(ctx, pkt.sender_mac(), pkt.sender_ip());
                } else if ctx.cfg.arp_poke_ping {
                    // Someone else's resolution traffic: inherited
                    // liveness poke
                    self.poke_ping(hw, ctx);
                }
            }
            arp::OPER_REPLY if !broadcast && pkt.target_ip() == ctx.cfg.ip => {
                let (sender_mac, sender_ip) = (pkt.sender_mac(), pkt.sender_ip());
                if sender_ip == ctx.state.target_ip {
                    ctx.state.target_mac = Some(sender_mac);
                }
                ctx.cache.upsert(sender_ip, sender_mac);
            }
            _ => {}
        }
    }

    /// Stage the reply to a who-has request for our address.
    fn answer_arp_request(
        &self,
        ctx: &mut Ctx,
        requester_mac: crate::net::MacAddress,
        requester_ip: core::net::Ipv4Addr,
    ) {
        debug!("arp: answering who-has {} from {}", ctx.cfg.ip, requester_ip);
        let (local_mac, local_ip) = (ctx.cfg.mac, ctx.cfg.ip);
        ctx.trap.submit(|buf| {
            let mut eth = EthFrameMut::new_checked(buf)?;
            eth.set_header(requester_mac, local_mac, ETHERTYPE_ARP);
            let len = arp::write_reply(eth.payload_mut(), local_mac, local_ip, requester_mac, requester_ip)?;
            Some(ethernet::HEADER_LEN + len)
        });
    }

    /// Background ping: same frame as the periodic one, but routed
    /// through the trap.
    fn poke_ping<H: Board>(&self, hw: &mut H, ctx: &mut Ctx) {
        let Some(dst_mac) = ctx.state.target_mac else {
            hw.set_lamp(Lamp::Link, Color::Yellow);
            return;
        };
        let (src_mac, src_ip, dst_ip) = (ctx.cfg.mac, ctx.cfg.ip, ctx.state.target_ip);
        let staged = ctx
            .trap
            .submit(|buf| pinger::build_echo_request(buf, dst_mac, src_mac, src_ip, dst_ip, ctx.ids));
        if staged {
            ctx.stats.ping_tx += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::Nic;
    use crate::hw::sim::SimBoard;
    use crate::net::MacAddress;
    use crate::net::ipv4::{self, Ipv4Mut};
    use core::net::Ipv4Addr;

    const PEER_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 9);
    const PEER_MAC: MacAddress = MacAddress::new([0xB8, 0x27, 0xEB, 0x12, 0x34, 0x56]);

    struct Fixture {
        board: SimBoard,
        dispatcher: Dispatcher,
        cfg: EndpointConfig,
        cache: ArpCache,
        state: ResolutionState,
        ids: IpIdGen,
        stats: Stats,
        trap: TxTrap,
    }

    impl Fixture {
        fn new() -> Self {
            let cfg = EndpointConfig::board_default();
            Self {
                board: SimBoard::new(),
                dispatcher: Dispatcher::new(),
                cfg,
                cache: ArpCache::new(cfg.ip, cfg.mac),
                state: ResolutionState::new(cfg.ping_target, None),
                ids: IpIdGen::new(),
                stats: Stats::default(),
                trap: TxTrap::new(),
            }
        }

        /// Keep the 1 Hz refresh quiet by pre-resolving the target and
        /// the router.
        fn quiet_refresh(&mut self) {
            self.cache.upsert(self.cfg.ping_target, PEER_MAC);
            self.cache.upsert(self.cfg.router, MacAddress::new([0x0A; 6]));
        }

        fn step(&mut self) {
            let mut ctx = Ctx {
                cfg: &self.cfg,
                cache: &mut self.cache,
                state: &mut self.state,
                ids: &mut self.ids,
                stats: &mut self.stats,
                trap: &mut self.trap,
                hw_max: self.board.max_frame_len(),
            };
            self.dispatcher.step(&mut self.board, &mut ctx);
        }
    }

    /// Ethernet frame wrapping an IPv4 header with the given tweaks.
    fn ip_frame(cfg: &EndpointConfig, edit: impl FnOnce(&mut [u8])) -> Vec<u8> {
        let mut frame = vec![0u8; ethernet::HEADER_LEN + ipv4::HEADER_LEN + icmp::HEADER_LEN];
        {
            let mut eth = EthFrameMut::new_checked(&mut frame).unwrap();
            eth.set_header(cfg.mac, PEER_MAC, ETHERTYPE_IPV4);
        }
        {
            let body = &mut frame[ethernet::HEADER_LEN..];
            let total = (ipv4::HEADER_LEN + icmp::HEADER_LEN) as u16;
            let mut hdr = Ipv4Mut::new_checked(body).unwrap();
            hdr.set_minimal_header();
            hdr.set_total_len(total);
            hdr.set_flags_fragment(0);
            hdr.set_ttl(64);
            hdr.set_protocol(PROTO_ICMP);
            hdr.set_src(PEER_IP);
            hdr.set_dst(cfg.ip);
            hdr.fill_checksum();
            body[ipv4::HEADER_LEN] = icmp::TYPE_ECHO_REQUEST;
        }
        edit(&mut frame);
        frame
    }

    #[test]
    fn idle_slice_counts_a_heartbeat() {
        let mut f = Fixture::new();
        f.quiet_refresh();
        f.step();
        assert_eq!(f.stats.idle_beats, 1);
        assert_eq!(f.stats.frames_received, 0);
    }

    #[test]
    fn first_slice_queries_an_unresolved_target() {
        let mut f = Fixture::new();
        f.step();
        // The opportunistic lookup missed and staged an ARP query
        assert!(f.trap.is_pending());
        let eth = EthFrame::new_checked(f.trap.frame()).unwrap();
        assert_eq!(eth.ethertype(), ETHERTYPE_ARP);
        let query = ArpView::new_checked(eth.payload()).unwrap();
        assert_eq!(query.target_ip(), f.cfg.ping_target);
    }

    #[test]
    fn refresh_is_rate_limited_to_the_second() {
        let mut f = Fixture::new();
        f.step();
        f.trap.complete();
        f.step();
        // Same RTC second: no second query
        assert!(!f.trap.is_pending());

        f.board.advance_seconds(1);
        f.step();
        assert!(f.trap.is_pending());
    }

    #[test]
    fn refresh_resolves_target_then_router() {
        let mut f = Fixture::new();
        f.quiet_refresh();
        f.step();
        assert_eq!(f.state.target_mac, Some(PEER_MAC));
        assert_eq!(f.state.router_mac, Some(MacAddress::new([0x0A; 6])));
    }

    #[test]
    fn wrong_version_counts_invalid_and_stays_silent() {
        let mut f = Fixture::new();
        f.quiet_refresh();
        let frame = ip_frame(&f.cfg, |frame| {
            frame[ethernet::HEADER_LEN] = 0x55; // version 5
        });
        f.board.push_rx(&frame, false);
        f.step();

        assert_eq!(f.stats.ip_invalid, 1);
        assert_eq!(f.stats.ip_received, 0);
        assert!(!f.trap.is_pending());
    }

    #[test]
    fn fragmented_packet_counts_invalid() {
        let mut f = Fixture::new();
        f.quiet_refresh();
        let frame = ip_frame(&f.cfg, |frame| {
            frame[ethernet::HEADER_LEN + 6..ethernet::HEADER_LEN + 8]
                .copy_from_slice(&0x2000u16.to_be_bytes()); // MF set
        });
        f.board.push_rx(&frame, false);
        f.step();

        assert_eq!(f.stats.ip_invalid, 1);
        assert!(!f.trap.is_pending());
    }

    #[test]
    fn wrong_destination_counts_invalid() {
        let mut f = Fixture::new();
        f.quiet_refresh();
        let frame = ip_frame(&f.cfg, |frame| {
            frame[ethernet::HEADER_LEN + 16..ethernet::HEADER_LEN + 20]
                .copy_from_slice(&[192, 168, 1, 77]);
        });
        f.board.push_rx(&frame, false);
        f.step();

        assert_eq!(f.stats.ip_invalid, 1);
        assert!(!f.trap.is_pending());
    }

    #[test]
    fn echo_request_is_answered() {
        let mut f = Fixture::new();
        f.quiet_refresh();
        f.cache.upsert(PEER_IP, PEER_MAC);
        let frame = ip_frame(&f.cfg, |_| {});
        f.board.push_rx(&frame, false);
        f.step();

        assert_eq!(f.stats.echo_requests, 1);
        assert_eq!(f.stats.echo_replies_sent, 1);
        assert!(f.trap.is_pending());
    }

    #[test]
    fn echo_reply_counts_a_round_trip() {
        let mut f = Fixture::new();
        f.quiet_refresh();
        let frame = ip_frame(&f.cfg, |frame| {
            frame[ethernet::HEADER_LEN + ipv4::HEADER_LEN] = icmp::TYPE_ECHO_REPLY;
        });
        f.board.push_rx(&frame, false);
        f.step();

        assert_eq!(f.stats.ping_rx, 1);
        assert_eq!(f.board.lamp(Lamp::Ping), Color::Green);
        assert!(!f.trap.is_pending());
    }

    #[test]
    fn unknown_icmp_type_counts_invalid() {
        let mut f = Fixture::new();
        f.quiet_refresh();
        let frame = ip_frame(&f.cfg, |frame| {
            frame[ethernet::HEADER_LEN + ipv4::HEADER_LEN] = 13; // timestamp request
        });
        f.board.push_rx(&frame, false);
        f.step();

        assert_eq!(f.stats.icmp_invalid, 1);
        assert!(!f.trap.is_pending());
    }

    #[test]
    fn misdirected_udp_pokes_a_ping_when_enabled() {
        let mut f = Fixture::new();
        f.quiet_refresh();
        f.state.target_mac = Some(PEER_MAC);
        let frame = ip_frame(&f.cfg, |frame| {
            frame[ethernet::HEADER_LEN + 9] = PROTO_UDP;
            frame[ethernet::HEADER_LEN + 16..ethernet::HEADER_LEN + 20]
                .copy_from_slice(&[255, 255, 255, 255]);
        });
        f.board.push_rx(&frame, true);
        f.step();

        assert_eq!(f.stats.ip_invalid, 1);
        assert_eq!(f.stats.ping_tx, 1);
        assert!(f.trap.is_pending());
    }

    #[test]
    fn misdirected_udp_stays_silent_when_poke_disabled() {
        let mut f = Fixture::new();
        f.cfg.udp_poke_ping = false;
        f.quiet_refresh();
        f.state.target_mac = Some(PEER_MAC);
        let frame = ip_frame(&f.cfg, |frame| {
            frame[ethernet::HEADER_LEN + 9] = PROTO_UDP;
            frame[ethernet::HEADER_LEN + 16..ethernet::HEADER_LEN + 20]
                .copy_from_slice(&[255, 255, 255, 255]);
        });
        f.board.push_rx(&frame, true);
        f.step();

        assert_eq!(f.stats.ping_tx, 0);
        assert!(!f.trap.is_pending());
    }

    /// Broadcast ARP who-has frame.
    fn arp_request_frame(target: Ipv4Addr) -> Vec<u8> {
        let mut frame = vec![0u8; ethernet::HEADER_LEN + arp::PACKET_LEN];
        let mut eth = EthFrameMut::new_checked(&mut frame).unwrap();
        eth.set_header(MacAddress::broadcast(), PEER_MAC, ETHERTYPE_ARP);
        arp::write_request(eth.payload_mut(), PEER_MAC, PEER_IP, target).unwrap();
        frame
    }

    #[test]
    fn arp_request_for_us_is_answered() {
        let mut f = Fixture::new();
        f.quiet_refresh();
        let frame = arp_request_frame(f.cfg.ip);
        f.board.push_rx(&frame, true);
        f.step();

        assert_eq!(f.stats.arp_requests_seen, 1);
        assert!(f.trap.is_pending());

        let eth = EthFrame::new_checked(f.trap.frame()).unwrap();
        assert_eq!(eth.dst(), PEER_MAC);
        assert_eq!(eth.src(), f.cfg.mac);
        let reply = ArpView::new_checked(eth.payload()).unwrap();
        assert_eq!(reply.oper(), arp::OPER_REPLY);
        assert_eq!(reply.sender_mac(), f.cfg.mac);
        assert_eq!(reply.sender_ip(), f.cfg.ip);
        assert_eq!(reply.target_mac(), PEER_MAC);
        assert_eq!(reply.target_ip(), PEER_IP);
    }

    #[test]
    fn arp_request_for_someone_else_pokes_a_ping() {
        let mut f = Fixture::new();
        f.quiet_refresh();
        f.state.target_mac = Some(PEER_MAC);
        let frame = arp_request_frame(Ipv4Addr::new(192, 168, 1, 200));
        f.board.push_rx(&frame, true);
        f.step();

        assert_eq!(f.stats.arp_requests_seen, 0);
        assert_eq!(f.stats.ping_tx, 1);
    }

    #[test]
    fn arp_reply_resolves_the_target() {
        let mut f = Fixture::new();
        f.quiet_refresh();
        let target_mac = MacAddress::new([0x30, 0x9C, 0x23, 0x61, 0x80, 0x84]);

        let mut frame = vec![0u8; ethernet::HEADER_LEN + arp::PACKET_LEN];
        let mut eth = EthFrameMut::new_checked(&mut frame).unwrap();
        eth.set_header(f.cfg.mac, target_mac, ETHERTYPE_ARP);
        arp::write_reply(eth.payload_mut(), target_mac, f.cfg.ping_target, f.cfg.mac, f.cfg.ip)
            .unwrap();

        f.board.push_rx(&frame, false);
        f.step();

        assert_eq!(f.state.target_mac, Some(target_mac));
        // And the cache learned the mapping
        assert_eq!(f.cache.lookup(f.cfg.ping_target, &mut f.trap), Some(target_mac));
    }

    #[test]
    fn broadcast_arp_reply_is_ignored() {
        // No pre-seeded cache: resolution must not happen at all here
        let mut f = Fixture::new();
        let target_mac = MacAddress::new([0x30, 0x9C, 0x23, 0x61, 0x80, 0x84]);

        let mut frame = vec![0u8; ethernet::HEADER_LEN + arp::PACKET_LEN];
        let mut eth = EthFrameMut::new_checked(&mut frame).unwrap();
        eth.set_header(MacAddress::broadcast(), target_mac, ETHERTYPE_ARP);
        arp::write_reply(eth.payload_mut(), target_mac, f.cfg.ping_target, f.cfg.mac, f.cfg.ip)
            .unwrap();

        f.board.push_rx(&frame, true);
        f.step();

        assert_eq!(f.state.target_mac, None);
    }

    #[test]
    fn malformed_arp_counts_invalid() {
        let mut f = Fixture::new();
        f.quiet_refresh();
        let mut frame = arp_request_frame(f.cfg.ip);
        frame[ethernet::HEADER_LEN] = 0xFF; // wreck the hardware type
        f.board.push_rx(&frame, true);
        f.step();

        assert_eq!(f.stats.arp_invalid, 1);
        assert!(!f.trap.is_pending());
    }
}
