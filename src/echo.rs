//! Echo responders
//!
//! The two passive services: answering ICMP echo requests and echoing UDP
//! datagrams. Both run in the background context, resolve their
//! destination through the ARP cache, and hand the finished frame to the
//! supervisor through the trap mailbox; they never touch the transmit
//! gate themselves.
//!
//! The UDP responder copies a fixed [`UDP_WINDOW_BYTES`] payload window
//! no matter what length the datagram declares. Short datagrams are
//! echoed with trailing bytes from the private receive buffer, stale but
//! in-bounds. The declared UDP length and the received UDP checksum are
//! carried through unchanged; swapping the address and port pairs leaves
//! the one's-complement sum invariant, so the carried checksum stays
//! coherent.

use crate::dispatch::Ctx;
use crate::net::ethernet::{self, ETHERTYPE_IPV4, EthFrameMut};
use crate::net::icmp::{self, IcmpMut};
use crate::net::ipv4::{self, Ipv4Mut, Ipv4View, PROTO_ICMP};
use crate::net::udp::{self, UdpMut, UdpView};
use log::{debug, warn};

/// Fixed UDP echo copy window, in 32-bit words
pub const UDP_WINDOW_WORDS: usize = 257;

/// Fixed UDP echo copy window, in bytes
pub const UDP_WINDOW_BYTES: usize = UDP_WINDOW_WORDS * 4;

/// Every UDP echo frame has the same size: headers plus the fixed window.
pub const UDP_ECHO_FRAME_LEN: usize =
    ethernet::HEADER_LEN + ipv4::HEADER_LEN + udp::HEADER_LEN + UDP_WINDOW_BYTES;

/// Answer an ICMP echo request.
///
/// `ip_pkt` is the validated IPv4 packet (header plus ICMP message) as
/// received. The reply swaps the address pair, carries the identifier,
/// sequence, and payload bytes through unchanged, and rewrites the
/// message type.
pub(crate) fn reply_echo(ctx: &mut Ctx, ip_pkt: &[u8]) {
    let Some(ip) = Ipv4View::new_checked(ip_pkt) else {
        ctx.stats.echo_reply_err += 1;
        return;
    };
    let peer = ip.src();

    // Resolve first: a miss counts and drops, and the lookup itself has
    // already staged the ARP query that makes the next attempt succeed.
    let Some(dst_mac) = ctx.cache.lookup(peer, ctx.trap) else {
        ctx.stats.echo_unresolved += 1;
        return;
    };

    if ip.has_options() {
        ctx.stats.echo_reply_err += 1;
        return;
    }

    let request = ip.payload();
    if request.len() < icmp::HEADER_LEN {
        ctx.stats.echo_reply_err += 1;
        return;
    }

    let total_len = ipv4::HEADER_LEN + request.len();
    let frame_len = ethernet::HEADER_LEN + total_len;
    let padded_len = (frame_len + 3) & !3;
    if padded_len > ctx.hw_max {
        ctx.stats.echo_reply_err += 1;
        return;
    }

    let (src_mac, src_ip) = (ctx.cfg.mac, ctx.cfg.ip);
    let ident = ctx.ids.next_ident();

    let staged = ctx.trap.submit(|buf| {
        if buf.len() < padded_len {
            return None;
        }
        let mut eth = EthFrameMut::new_checked(buf)?;
        eth.set_header(dst_mac, src_mac, ETHERTYPE_IPV4);

        let mut hdr = Ipv4Mut::new_checked(&mut buf[ethernet::HEADER_LEN..frame_len])?;
        hdr.set_minimal_header();
        hdr.set_total_len(total_len as u16);
        hdr.set_ident(ident);
        hdr.set_flags_fragment(0);
        hdr.set_ttl(0xFF);
        hdr.set_protocol(PROTO_ICMP);
        hdr.set_src(src_ip);
        hdr.set_dst(peer);
        hdr.fill_checksum();

        let msg_start = ethernet::HEADER_LEN + ipv4::HEADER_LEN;
        buf[msg_start..frame_len].copy_from_slice(request);
        buf[frame_len..padded_len].fill(0);
        let mut msg = IcmpMut::new_checked(&mut buf[msg_start..frame_len])?;
        msg.set_msg_type(icmp::TYPE_ECHO_REPLY);
        msg.set_code(0);
        msg.fill_checksum();

        Some(frame_len)
    });

    if staged {
        ctx.stats.echo_replies_sent += 1;
    } else {
        ctx.stats.echo_reply_err += 1;
    }
}

/// Echo a UDP datagram back at its sender.
///
/// `ip_tail` must span from the IPv4 header to the end of the private
/// receive buffer so the fixed copy window is always in bounds.
pub(crate) fn reply_udp(ctx: &mut Ctx, ip_tail: &[u8]) {
    let window_end = ipv4::HEADER_LEN + udp::HEADER_LEN + UDP_WINDOW_BYTES;
    let Some(ip) = Ipv4View::new_checked(ip_tail) else {
        return;
    };
    if ip_tail.len() < window_end {
        debug!("udp: receive buffer shorter than the echo window");
        return;
    }

    if ip.has_options() {
        warn!("udp: options present (header {} bytes), not echoing", ip.header_len());
        ctx.stats.udp_options_dropped += 1;
        return;
    }

    let peer = ip.src();
    let Some(dst_mac) = ctx.cache.lookup(peer, ctx.trap) else {
        ctx.stats.udp_unresolved += 1;
        return;
    };

    let Some(request) = UdpView::new_checked(&ip_tail[ipv4::HEADER_LEN..]) else {
        return;
    };
    let (reply_src_port, reply_dst_port) = (request.dst_port(), request.src_port());
    let carried_length = request.length();
    let carried_checksum = request.datagram_checksum();
    let (src_mac, src_ip) = (ctx.cfg.mac, ctx.cfg.ip);

    // ver/ihl/tos, total length, identification, flags, TTL, and protocol
    // are carried over from the request
    let mut carried_ip = [0u8; 10];
    carried_ip.copy_from_slice(&ip_tail[..10]);

    let staged = ctx.trap.submit(|buf| {
        if buf.len() < UDP_ECHO_FRAME_LEN {
            return None;
        }
        let mut eth = EthFrameMut::new_checked(buf)?;
        eth.set_header(dst_mac, src_mac, ETHERTYPE_IPV4);

        let hdr_start = ethernet::HEADER_LEN;
        let hdr_end = hdr_start + ipv4::HEADER_LEN;
        buf[hdr_start..hdr_start + 10].copy_from_slice(&carried_ip);
        let mut hdr = Ipv4Mut::new_checked(&mut buf[hdr_start..hdr_end])?;
        hdr.set_src(src_ip);
        hdr.set_dst(peer);
        hdr.fill_checksum();

        let udp_start = hdr_end;
        let mut reply = UdpMut::new_checked(&mut buf[udp_start..udp_start + udp::HEADER_LEN])?;
        reply.set_src_port(reply_src_port);
        reply.set_dst_port(reply_dst_port);
        reply.set_length(carried_length);
        reply.set_datagram_checksum(carried_checksum);

        let data_start = udp_start + udp::HEADER_LEN;
        buf[data_start..UDP_ECHO_FRAME_LEN]
            .copy_from_slice(&ip_tail[ipv4::HEADER_LEN + udp::HEADER_LEN..window_end]);

        Some(UDP_ECHO_FRAME_LEN)
    });

    if staged {
        ctx.stats.udp_echoes += 1;
    }
}
