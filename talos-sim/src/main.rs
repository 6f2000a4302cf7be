//! Talos simulator harness
//!
//! Runs the endpoint firmware against the simulated board and narrates
//! the traffic, so the whole ping/ARP/echo cycle can be watched on a
//! development machine with no hardware attached.
//!
//! # Usage
//!
//! ```bash
//! # Scripted demo: resolution, periodic ping, echo and UDP traffic
//! talos-sim demo
//!
//! # Same, with the firmware's debug logging
//! talos-sim demo -v
//! ```

use std::env;
use std::net::Ipv4Addr;

use talos::hw::line;
use talos::hw::sim::SimBoard;
use talos::net::arp::{self, ArpView};
use talos::net::ethernet::{self, EthFrame, EthFrameMut, MacAddress};
use talos::net::icmp::{self, IcmpMut};
use talos::net::ipv4::{self, Ipv4Mut, Ipv4View};
use talos::net::{ETHERTYPE_ARP, ETHERTYPE_IPV4};
use talos::{EndpointConfig, Poll, Supervisor};

const PEER_IP: [u8; 4] = [192, 168, 1, 9];
const PEER_MAC: MacAddress = MacAddress::new([0xB8, 0x27, 0xEB, 0x12, 0x34, 0x56]);
const TARGET_MAC: MacAddress = MacAddress::new([0x30, 0x9C, 0x23, 0x61, 0x80, 0x84]);

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage(&args[0]);
        std::process::exit(1);
    }

    let verbose = args.iter().any(|a| a == "-v");
    init_logger(verbose);

    match args[1].as_str() {
        "demo" => run_demo(),
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage(&args[0]);
            std::process::exit(1);
        }
    }
}

fn print_usage(program: &str) {
    eprintln!("Usage: {} demo [-v]", program);
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  demo    Run the scripted traffic demo against the simulated board");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -v      Show the firmware's debug logging");
}

// ============================================================================
// Logging
// ============================================================================

struct StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{:>5}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

fn init_logger(verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

// ============================================================================
// Demo script
// ============================================================================

fn run_demo() {
    let cfg = EndpointConfig::board_default();
    let mut sup = Supervisor::new(SimBoard::new(), cfg);
    sup.init();

    println!("== period 1: target unresolved ==");
    sup.begin_period();
    pump(&mut sup, 3);
    drain_tx(&mut sup);

    println!("== target answers the query ==");
    sup.hw_mut().push_rx(&arp_reply_frame(&cfg), false);
    pump(&mut sup, 4);
    println!(
        "   resolution: {} is at {:?}",
        cfg.ping_target,
        sup.resolution().target_mac.map(|m| m.to_string())
    );
    end_period(&mut sup);

    println!("== period 2: periodic ping ==");
    sup.hw_mut().advance_seconds(1);
    sup.begin_period();
    pump(&mut sup, 2);
    drain_tx(&mut sup);

    println!("== the target's reply closes the round trip ==");
    sup.hw_mut().push_rx(&echo_reply_frame(&cfg), false);
    pump(&mut sup, 4);
    end_period(&mut sup);

    println!("== period 3: a peer pings us ==");
    sup.hw_mut().advance_seconds(1);
    sup.begin_period();
    pump(&mut sup, 2);
    drain_tx(&mut sup);
    sup.cache_mut().upsert(peer_ip(), PEER_MAC);
    sup.hw_mut().push_rx(&echo_request_frame(&cfg), false);
    pump(&mut sup, 4);
    drain_tx(&mut sup);
    end_period(&mut sup);

    println!();
    print_stats(&sup);
}

fn pump(sup: &mut Supervisor<SimBoard>, passes: usize) {
    for _ in 0..passes {
        match sup.poll_once() {
            Ok(Poll::Pending) => {}
            Ok(Poll::Ticked) => return,
            Err(fatal) => {
                eprintln!("fatal condition in the simulator run: {}", fatal);
                std::process::exit(2);
            }
        }
    }
}

fn end_period(sup: &mut Supervisor<SimBoard>) {
    sup.hw_mut().raise(line::PPS);
    loop {
        match sup.poll_once() {
            Ok(Poll::Ticked) => return,
            Ok(Poll::Pending) => {}
            Err(fatal) => {
                eprintln!("fatal condition in the simulator run: {}", fatal);
                std::process::exit(2);
            }
        }
    }
}

fn drain_tx(sup: &mut Supervisor<SimBoard>) {
    while let Some(frame) = sup.hw_mut().take_tx() {
        println!("   tx {:>4} bytes: {}", frame.bytes().len(), describe(frame.bytes()));
    }
}

fn print_stats(sup: &Supervisor<SimBoard>) {
    let stats = sup.stats();
    println!("counters:");
    println!("  periods {:>6}  slices {:>8}  idle {:>8}", stats.periods, stats.slices, stats.idle_beats);
    println!("  rx frames {:>4}  ip ok {:>4}  ip invalid {:>4}", stats.frames_received, stats.ip_received, stats.ip_invalid);
    println!("  ping tx {:>6}  ping rx {:>4}", stats.ping_tx, stats.ping_rx);
    println!("  echo req {:>5}  echo sent {:>2}  trap tx {:>4}", stats.echo_requests, stats.echo_replies_sent, stats.trap_tx);
}

/// One-line summary of an outbound frame.
fn describe(bytes: &[u8]) -> String {
    let Some(eth) = EthFrame::new_checked(bytes) else {
        return "runt frame".to_string();
    };
    match eth.ethertype() {
        ETHERTYPE_ARP => match ArpView::new_checked(eth.payload()) {
            Some(pkt) if pkt.oper() == arp::OPER_REQUEST => {
                format!("ARP who-has {}", pkt.target_ip())
            }
            Some(pkt) if pkt.oper() == arp::OPER_REPLY => {
                format!("ARP {} is-at {}", pkt.sender_ip(), pkt.sender_mac())
            }
            _ => "ARP (unrecognised)".to_string(),
        },
        ETHERTYPE_IPV4 => match Ipv4View::new_checked(eth.payload()) {
            Some(ip) if ip.protocol() == ipv4::PROTO_ICMP => {
                let kind = match ip.payload().first() {
                    Some(&icmp::TYPE_ECHO_REQUEST) => "echo request",
                    Some(&icmp::TYPE_ECHO_REPLY) => "echo reply",
                    _ => "ICMP",
                };
                format!("{} {} -> {}", kind, ip.src(), ip.dst())
            }
            Some(ip) if ip.protocol() == ipv4::PROTO_UDP => {
                format!("UDP {} -> {}", ip.src(), ip.dst())
            }
            Some(ip) => format!("IPv4 proto {}", ip.protocol()),
            None => "IPv4 (short)".to_string(),
        },
        other => format!("ethertype {:#06X}", other),
    }
}

// ============================================================================
// Scripted frames
// ============================================================================

fn peer_ip() -> Ipv4Addr {
    Ipv4Addr::new(PEER_IP[0], PEER_IP[1], PEER_IP[2], PEER_IP[3])
}

fn arp_reply_frame(cfg: &EndpointConfig) -> Vec<u8> {
    let mut frame = vec![0u8; ethernet::HEADER_LEN + arp::PACKET_LEN];
    let mut eth = EthFrameMut::new_checked(&mut frame).unwrap();
    eth.set_header(cfg.mac, TARGET_MAC, ETHERTYPE_ARP);
    arp::write_reply(eth.payload_mut(), TARGET_MAC, cfg.ping_target, cfg.mac, cfg.ip).unwrap();
    frame
}

fn echo_reply_frame(cfg: &EndpointConfig) -> Vec<u8> {
    let total = ipv4::HEADER_LEN + icmp::HEADER_LEN;
    let mut frame = vec![0u8; ethernet::HEADER_LEN + total];
    let mut eth = EthFrameMut::new_checked(&mut frame).unwrap();
    eth.set_header(cfg.mac, TARGET_MAC, ETHERTYPE_IPV4);
    let body = &mut frame[ethernet::HEADER_LEN..];
    let mut hdr = Ipv4Mut::new_checked(body).unwrap();
    hdr.set_minimal_header();
    hdr.set_total_len(total as u16);
    hdr.set_flags_fragment(0);
    hdr.set_ttl(64);
    hdr.set_protocol(ipv4::PROTO_ICMP);
    hdr.set_src(cfg.ping_target);
    hdr.set_dst(cfg.ip);
    hdr.fill_checksum();
    let mut msg = IcmpMut::new_checked(&mut body[ipv4::HEADER_LEN..]).unwrap();
    msg.set_msg_type(icmp::TYPE_ECHO_REPLY);
    msg.set_code(0);
    msg.fill_checksum();
    frame
}

fn echo_request_frame(cfg: &EndpointConfig) -> Vec<u8> {
    let payload = b"talos demo payload";
    let total = ipv4::HEADER_LEN + icmp::HEADER_LEN + payload.len();
    let mut frame = vec![0u8; ethernet::HEADER_LEN + total];
    let mut eth = EthFrameMut::new_checked(&mut frame).unwrap();
    eth.set_header(cfg.mac, PEER_MAC, ETHERTYPE_IPV4);
    let body = &mut frame[ethernet::HEADER_LEN..];
    let mut hdr = Ipv4Mut::new_checked(body).unwrap();
    hdr.set_minimal_header();
    hdr.set_total_len(total as u16);
    hdr.set_flags_fragment(0);
    hdr.set_ttl(64);
    hdr.set_protocol(ipv4::PROTO_ICMP);
    hdr.set_src(peer_ip());
    hdr.set_dst(cfg.ip);
    hdr.fill_checksum();
    body[ipv4::HEADER_LEN + icmp::HEADER_LEN..].copy_from_slice(payload);
    let mut msg = IcmpMut::new_checked(&mut body[ipv4::HEADER_LEN..]).unwrap();
    msg.set_msg_type(icmp::TYPE_ECHO_REQUEST);
    msg.set_code(0);
    msg.set_ident(0x7A10);
    msg.set_seq(1);
    msg.fill_checksum();
    frame
}
