//! Cooperative supervisor
//!
//! Two logical contexts share the core with no preemption. The background
//! context (the [`Dispatcher`]) processes received frames; the supervisor
//! owns the outer once-per-second loop, the transmit path, and the
//! interrupt controller. The background context never transmits directly:
//! it "traps" by staging a frame in the single-slot [`TxTrap`] mailbox,
//! and the supervisor fully services that request (capacity check, gate
//! transmission, line re-enable, slot release) before the background
//! context runs another slice.
//!
//! ## Period structure
//!
//! [`Supervisor::begin_period`] checks the link, fires the periodic ping,
//! and arms the timer, PPS, and receive lines. Each
//! [`Supervisor::poll_once`] then runs at most one background slice and
//! inspects the pending state in priority order: hardware fault, staged
//! trap, unexplained controller summary, receive pending (masked so the
//! background context polls it itself), transmit-complete pending (masked
//! until the next trap service re-enables it). The inner loop ends when
//! the tick state machine accepts a second boundary.
//!
//! ## Tick discipline
//!
//! The interval timer and the external PPS edge cross-check each other. A
//! PPS edge is authoritative immediately; a timer tick alone is tolerated
//! for one extra inner-loop pass, covering clock-domain skew between the
//! two sources, before it is accepted on its own. Periods that saw the
//! PPS edge re-arm the interval timer against it.
//!
//! ## Failure
//!
//! A hardware fault, or controller state inconsistent with anything this
//! program arms, is fatal: a distinct lamp signature is latched per
//! failure site and the error is returned for the board layer to halt on.
//! There is no supervisor above this one to recover.

use crate::MAX_FRAME_LEN;
use crate::config::EndpointConfig;
use crate::dispatch::{Ctx, Dispatcher};
use crate::gate;
use crate::hw::{Board, Color, Lamp, line};
use crate::pinger::{self, IpIdGen};
use crate::resolve::{ArpCache, ResolutionState};
use crate::stats::Stats;
use core::fmt;
use log::{error, info, warn};

/// Single-slot transmit mailbox between the contexts
///
/// The background context fills it by building a frame in place; the
/// supervisor drains it. Holding at most one request is not a limitation
/// but the contract: the background context produces at most one outbound
/// frame per slice, and it is serviced before the next slice runs.
pub struct TxTrap {
    buf: [u8; MAX_FRAME_LEN],
    len: usize,
    pending: bool,
}

#[allow(clippy::new_without_default)]
impl TxTrap {
    pub fn new() -> Self {
        Self {
            buf: [0u8; MAX_FRAME_LEN],
            len: 0,
            pending: false,
        }
    }

    /// Stage a request by building a frame into the slot.
    ///
    /// `build` writes into the staging buffer and returns the frame
    /// length, or `None` to abandon the attempt. Returns `true` once a
    /// request is staged; a slot that is already occupied refuses without
    /// touching the occupant.
    pub fn submit<F>(&mut self, build: F) -> bool
    where
        F: FnOnce(&mut [u8]) -> Option<usize>,
    {
        if self.pending {
            return false;
        }
        match build(&mut self.buf) {
            Some(len) => {
                self.len = len.min(MAX_FRAME_LEN);
                self.pending = true;
                true
            }
            None => false,
        }
    }

    /// Whether a request is waiting to be serviced
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Length of the staged request
    pub fn request_len(&self) -> usize {
        self.len
    }

    /// The staged frame
    pub fn frame(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Release the slot; the background context may stage again.
    pub fn complete(&mut self) {
        self.pending = false;
        self.len = 0;
    }
}

/// Unrecoverable supervisor conditions
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Fatal {
    /// The hardware fault flag is set
    HardwareFault,
    /// The controller summary asserted with no recognizable pending line
    IrqInconsistent,
    /// The timer line was found disabled while the controller demanded
    /// attention
    TimerLineDown,
    /// The PPS line was found disabled while the controller demanded
    /// attention
    PpsLineDown,
}

impl fmt::Display for Fatal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Fatal::HardwareFault => "hardware fault flag set",
            Fatal::IrqInconsistent => "interrupt summary with no pending cause",
            Fatal::TimerLineDown => "timer interrupt line disabled",
            Fatal::PpsLineDown => "PPS interrupt line disabled",
        };
        write!(f, "{}", text)
    }
}

/// Result of one inner-loop pass
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Poll {
    /// Keep polling; the period is still open
    Pending,
    /// A second boundary was accepted; the period is over
    Ticked,
}

/// Timer/PPS cross-check state, reset each period
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum TickState {
    /// Neither source has fired
    AwaitingTick,
    /// The timer fired without its PPS pulse; allow one more pass
    GraceAfterTimer,
    /// The boundary stands
    TickAccepted,
}

/// The endpoint: hardware, configuration, and every piece of mutable
/// state, owned by one object constructed at startup
pub struct Supervisor<H: Board> {
    hw: H,
    cfg: EndpointConfig,
    dispatcher: Dispatcher,
    cache: ArpCache,
    state: ResolutionState,
    ids: IpIdGen,
    stats: Stats,
    trap: TxTrap,
    tick: TickState,
    pps_seen: bool,
}

impl<H: Board> Supervisor<H> {
    pub fn new(hw: H, cfg: EndpointConfig) -> Self {
        Self {
            hw,
            cfg,
            dispatcher: Dispatcher::new(),
            cache: ArpCache::new(cfg.ip, cfg.mac),
            state: ResolutionState::new(cfg.ping_target, cfg.ping_target_mac),
            ids: IpIdGen::new(),
            stats: Stats::new(),
            trap: TxTrap::new(),
            tick: TickState::AwaitingTick,
            pps_seen: false,
        }
    }

    /// Bring the interface up. Call once before the first period.
    pub fn init(&mut self) {
        // Everything red until the interface proves itself
        self.hw.set_bank(0xFF);
        for lamp in [Lamp::Status, Lamp::Link, Lamp::Rx, Lamp::Ping] {
            self.hw.set_lamp(lamp, Color::Red);
        }

        self.hw.set_mac(self.cfg.mac);
        self.hw.arm_timer();
        // Discard anything that arrived before we were listening
        self.hw.rx_ack();

        self.hw.set_bank(0x10);
        self.hw.set_lamp(Lamp::Status, Color::Green);
        info!("endpoint up: {} at {}", self.cfg.ip, self.cfg.mac);
    }

    /// Start a period: link check, periodic ping, fresh interrupt lines.
    pub fn begin_period(&mut self) {
        self.stats.periods += 1;

        if self.hw.link_up() {
            self.hw.set_bank(0x20);
            self.hw.set_lamp(Lamp::Link, Color::Green);
            pinger::send_ping(&mut self.hw, &self.cfg, &self.state, &mut self.ids, &mut self.stats);
            // Red until this period shows receive activity / a ping reply
            self.hw.set_lamp(Lamp::Rx, Color::Red);
            self.hw.set_lamp(Lamp::Ping, Color::Red);
        } else {
            for lamp in [Lamp::Link, Lamp::Rx, Lamp::Ping] {
                self.hw.set_lamp(lamp, Color::Red);
            }
        }

        self.tick = TickState::AwaitingTick;
        self.pps_seen = false;
        self.hw.irq_disable(line::ALL);
        self.hw.irq_clear(line::ALL);
        self.hw.irq_enable(line::TIMER | line::PPS | line::RX);
    }

    /// One inner-loop pass: at most one background slice, then the
    /// priority inspection and the tick state machine.
    pub fn poll_once(&mut self) -> Result<Poll, Fatal> {
        self.stats.slices += 1;

        // The background context runs while nothing demands the
        // supervisor's attention
        let st = self.hw.irq_status();
        if !self.hw.fault() && !self.trap.is_pending() && !st.summary {
            let hw_max = self.hw.max_frame_len();
            let mut ctx = Ctx {
                cfg: &self.cfg,
                cache: &mut self.cache,
                state: &mut self.state,
                ids: &mut self.ids,
                stats: &mut self.stats,
                trap: &mut self.trap,
                hw_max,
            };
            self.dispatcher.step(&mut self.hw, &mut ctx);
        }

        // Snapshot and acknowledge whatever is pending now; enables are
        // repaired below
        let st = self.hw.irq_status();
        self.hw.irq_clear(st.pending);

        if self.hw.fault() {
            return Err(self.fail(Fatal::HardwareFault));
        }
        if self.trap.is_pending() {
            self.service_send();
        } else if st.summary {
            if st.pending & line::ALL == 0 {
                return Err(self.fail(Fatal::IrqInconsistent));
            }
            if !st.is_enabled(line::TIMER) {
                return Err(self.fail(Fatal::TimerLineDown));
            }
            if !st.is_enabled(line::PPS) {
                return Err(self.fail(Fatal::PpsLineDown));
            }
        }

        // A pending receive is masked, not handled: the background
        // context polls the interface itself, and masking prevents the
        // same frame from arriving through both paths
        if st.is_pending(line::RX) {
            self.hw.irq_disable(line::RX);
            self.hw.set_bank(0x40);
            self.hw.set_lamp(Lamp::Rx, Color::Green);
        } else {
            self.hw.irq_enable(line::RX);
        }
        // Transmit-complete stays masked until the next trap service
        if st.is_pending(line::TX) {
            self.hw.irq_disable(line::TX);
        } else {
            self.hw.irq_enable(line::TX);
        }
        self.hw.irq_enable(line::TIMER | line::PPS);

        if st.is_pending(line::PPS) {
            self.pps_seen = true;
        }
        self.tick = match self.tick {
            TickState::AwaitingTick => {
                if st.is_pending(line::PPS) {
                    TickState::TickAccepted
                } else if st.is_pending(line::TIMER) {
                    TickState::GraceAfterTimer
                } else {
                    TickState::AwaitingTick
                }
            }
            // The extra pass has elapsed; the timer stands, paired or not
            TickState::GraceAfterTimer => TickState::TickAccepted,
            TickState::TickAccepted => TickState::TickAccepted,
        };

        if self.tick == TickState::TickAccepted {
            if self.pps_seen {
                // Re-align the interval timer with the external edge
                self.hw.arm_timer();
            }
            return Ok(Poll::Ticked);
        }
        Ok(Poll::Pending)
    }

    /// Run one full period to its tick.
    pub fn run_period(&mut self) -> Result<(), Fatal> {
        self.begin_period();
        loop {
            if self.poll_once()? == Poll::Ticked {
                return Ok(());
            }
        }
    }

    /// Run until a fatal condition. The lamps already carry the failure
    /// signature when this returns; the board layer halts.
    pub fn run(&mut self) -> Fatal {
        loop {
            if let Err(fatal) = self.run_period() {
                return fatal;
            }
        }
    }

    /// Service a staged SEND request: validate, transmit, re-enable the
    /// receive and transmit-complete lines, release the slot.
    fn service_send(&mut self) {
        let len = self.trap.request_len();
        if len <= self.hw.max_frame_len() {
            gate::transmit(&mut self.hw, self.trap.frame());
            self.stats.trap_tx += 1;
            self.hw.irq_enable(line::RX | line::TX);
        } else {
            warn!(
                "trap: {}-byte request exceeds the {}-byte capability, dropped",
                len,
                self.hw.max_frame_len()
            );
            self.stats.trap_oversize += 1;
        }
        self.trap.complete();
    }

    /// Latch the lamp signature for `fatal` and hand it back.
    fn fail(&mut self, fatal: Fatal) -> Fatal {
        error!("fatal: {}", fatal);
        self.hw.set_bank(0xFF);
        let signature: [(Lamp, Color); 4] = match fatal {
            Fatal::HardwareFault => [
                (Lamp::Status, Color::Red),
                (Lamp::Link, Color::Red),
                (Lamp::Rx, Color::Red),
                (Lamp::Ping, Color::Red),
            ],
            Fatal::IrqInconsistent => [
                (Lamp::Status, Color::Red),
                (Lamp::Link, Color::White),
                (Lamp::Rx, Color::Red),
                (Lamp::Ping, Color::Red),
            ],
            Fatal::TimerLineDown => [
                (Lamp::Status, Color::Red),
                (Lamp::Link, Color::Red),
                (Lamp::Rx, Color::White),
                (Lamp::Ping, Color::Red),
            ],
            Fatal::PpsLineDown => [
                (Lamp::Status, Color::Red),
                (Lamp::Link, Color::Red),
                (Lamp::Rx, Color::Red),
                (Lamp::Ping, Color::White),
            ],
        };
        for (lamp, color) in signature {
            self.hw.set_lamp(lamp, color);
        }
        fatal
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn hw(&self) -> &H {
        &self.hw
    }

    pub fn hw_mut(&mut self) -> &mut H {
        &mut self.hw
    }

    pub fn resolution(&self) -> &ResolutionState {
        &self.state
    }

    pub fn resolution_mut(&mut self) -> &mut ResolutionState {
        &mut self.state
    }

    pub fn cache_mut(&mut self) -> &mut ArpCache {
        &mut self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::IrqController;
    use crate::hw::sim::SimBoard;
    use crate::net::MacAddress;
    use crate::net::ethernet::{self, ETHERTYPE_IPV4, EthFrameMut};
    use crate::net::ipv4::{self, Ipv4Mut};
    use crate::net::udp::{self, UdpMut};
    use core::net::Ipv4Addr;

    const PEER_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 9);
    const PEER_MAC: MacAddress = MacAddress::new([0xB8, 0x27, 0xEB, 0x12, 0x34, 0x56]);
    const TARGET_MAC: MacAddress = MacAddress::new([0x30, 0x9C, 0x23, 0x61, 0x80, 0x84]);

    fn supervisor() -> Supervisor<SimBoard> {
        let mut sup = Supervisor::new(SimBoard::new(), EndpointConfig::board_default());
        sup.init();
        // Keep the opportunistic refresh quiet unless a test wants it
        let router = sup.cfg.router;
        let target = sup.cfg.ping_target;
        sup.cache_mut().upsert(target, TARGET_MAC);
        sup.cache_mut().upsert(router, MacAddress::new([0x0A; 6]));
        sup
    }

    /// Echo request frame from the peer, built with the same builder the
    /// pinger uses.
    fn echo_request_frame(cfg: &EndpointConfig) -> [u8; pinger::PING_FRAME_LEN] {
        let mut buf = [0u8; pinger::PING_FRAME_LEN];
        let mut ids = IpIdGen::new();
        pinger::build_echo_request(&mut buf, cfg.mac, PEER_MAC, PEER_IP, cfg.ip, &mut ids).unwrap();
        buf
    }

    /// Small UDP datagram from the peer to the endpoint.
    fn udp_frame(cfg: &EndpointConfig) -> [u8; 64] {
        let mut buf = [0u8; 64];
        let total = (64 - ethernet::HEADER_LEN) as u16;
        {
            let mut eth = EthFrameMut::new_checked(&mut buf).unwrap();
            eth.set_header(cfg.mac, PEER_MAC, ETHERTYPE_IPV4);
        }
        {
            let body = &mut buf[ethernet::HEADER_LEN..];
            let mut hdr = Ipv4Mut::new_checked(body).unwrap();
            hdr.set_minimal_header();
            hdr.set_total_len(total);
            hdr.set_flags_fragment(0);
            hdr.set_ttl(64);
            hdr.set_protocol(ipv4::PROTO_UDP);
            hdr.set_src(PEER_IP);
            hdr.set_dst(cfg.ip);
            hdr.fill_checksum();
            let mut dgram =
                UdpMut::new_checked(&mut body[ipv4::HEADER_LEN..ipv4::HEADER_LEN + udp::HEADER_LEN])
                    .unwrap();
            dgram.set_src_port(40000);
            dgram.set_dst_port(7777);
            dgram.set_length(total - ipv4::HEADER_LEN as u16);
            dgram.set_datagram_checksum(0);
        }
        buf
    }

    #[test]
    fn trap_holds_one_request_at_a_time() {
        let mut trap = TxTrap::new();
        assert!(trap.submit(|buf| {
            buf[..3].copy_from_slice(&[1, 2, 3]);
            Some(3)
        }));
        assert!(trap.is_pending());
        assert_eq!(trap.frame(), &[1, 2, 3]);

        // Occupied: the second request is refused, the occupant intact
        assert!(!trap.submit(|buf| {
            buf[0] = 0xFF;
            Some(1)
        }));
        assert_eq!(trap.frame(), &[1, 2, 3]);

        trap.complete();
        assert!(!trap.is_pending());
    }

    #[test]
    fn abandoned_build_leaves_the_slot_free() {
        let mut trap = TxTrap::new();
        assert!(!trap.submit(|_| None));
        assert!(!trap.is_pending());
    }

    #[test]
    fn period_sends_ping_when_target_resolved() {
        let mut sup = supervisor();
        sup.resolution_mut().target_mac = Some(TARGET_MAC);
        sup.begin_period();

        assert_eq!(sup.stats().ping_tx, 1);
        assert_eq!(sup.hw_mut().take_tx().unwrap().bytes().len(), pinger::PING_FRAME_LEN);
    }

    #[test]
    fn link_down_period_skips_the_ping() {
        let mut sup = supervisor();
        sup.resolution_mut().target_mac = Some(TARGET_MAC);
        sup.hw_mut().set_link(false);
        sup.begin_period();

        assert_eq!(sup.stats().ping_tx, 0);
        assert_eq!(sup.hw().tx_count(), 0);
        assert_eq!(sup.hw().lamp(Lamp::Link), Color::Red);
    }

    #[test]
    fn staged_trap_is_serviced_before_the_next_slice() {
        let mut sup = supervisor();
        sup.hw_mut().set_link(false);
        sup.begin_period();

        let request = echo_request_frame(&sup.cfg);
        sup.cache_mut().upsert(PEER_IP, PEER_MAC);
        sup.hw_mut().push_rx(&request, false);

        // First pass: the pending receive line is seen and masked
        assert_eq!(sup.poll_once().unwrap(), Poll::Pending);
        assert_eq!(sup.hw().tx_count(), 0);

        // Second pass: the background slice consumes the frame, stages
        // the reply, and the same pass services it
        assert_eq!(sup.poll_once().unwrap(), Poll::Pending);
        assert_eq!(sup.stats().trap_tx, 1);
        assert_eq!(sup.hw().tx_count(), 1);
        assert!(!sup.trap.is_pending());
    }

    #[test]
    fn oversize_trap_request_is_dropped() {
        let mut sup = supervisor();
        sup.hw_mut().set_link(false);
        sup.hw_mut().set_max_frame_len(256);
        sup.begin_period();

        // A UDP echo always stages a fixed-size frame larger than this
        // interface's capability
        let datagram = udp_frame(&sup.cfg);
        sup.cache_mut().upsert(PEER_IP, PEER_MAC);
        sup.hw_mut().push_rx(&datagram, false);

        sup.poll_once().unwrap(); // mask the receive line
        sup.poll_once().unwrap(); // process + attempt service

        assert_eq!(sup.stats().udp_echoes, 1); // the responder staged it
        assert_eq!(sup.stats().trap_oversize, 1); // the service refused it
        assert_eq!(sup.stats().trap_tx, 0);
        assert_eq!(sup.hw().tx_count(), 0);
        assert!(!sup.trap.is_pending()); // and the background context resumes
    }

    #[test]
    fn hardware_fault_halts_with_all_red() {
        let mut sup = supervisor();
        sup.begin_period();
        sup.hw_mut().set_fault();

        assert_eq!(sup.poll_once(), Err(Fatal::HardwareFault));
        for lamp in [Lamp::Status, Lamp::Link, Lamp::Rx, Lamp::Ping] {
            assert_eq!(sup.hw().lamp(lamp), Color::Red);
        }
    }

    #[test]
    fn unexplained_summary_is_fatal() {
        let mut sup = supervisor();
        sup.begin_period();
        sup.hw_mut().force_summary();

        assert_eq!(sup.poll_once(), Err(Fatal::IrqInconsistent));
        assert_eq!(sup.hw().lamp(Lamp::Link), Color::White);
    }

    #[test]
    fn disabled_timer_line_is_fatal() {
        let mut sup = supervisor();
        sup.begin_period();
        sup.hw_mut().irq_disable(line::TIMER);
        // Something pending and enabled so the controller demands
        // attention
        sup.hw_mut().push_rx(&[0u8; 64], false);

        assert_eq!(sup.poll_once(), Err(Fatal::TimerLineDown));
        assert_eq!(sup.hw().lamp(Lamp::Rx), Color::White);
    }

    #[test]
    fn pps_alone_ends_the_period() {
        let mut sup = supervisor();
        sup.hw_mut().set_link(false);
        sup.begin_period();
        let arms_before = sup.hw().timer_arms();

        sup.hw_mut().raise(line::PPS);
        assert_eq!(sup.poll_once().unwrap(), Poll::Ticked);
        // A PPS-paired period re-arms the timer against the edge
        assert_eq!(sup.hw().timer_arms(), arms_before + 1);
    }

    #[test]
    fn timer_alone_gets_one_grace_pass() {
        let mut sup = supervisor();
        sup.hw_mut().set_link(false);
        sup.begin_period();
        let arms_before = sup.hw().timer_arms();

        sup.hw_mut().raise(line::TIMER);
        assert_eq!(sup.poll_once().unwrap(), Poll::Pending); // grace
        assert_eq!(sup.poll_once().unwrap(), Poll::Ticked); // accepted
        // No PPS this period: the timer is left free-running
        assert_eq!(sup.hw().timer_arms(), arms_before);
    }

    #[test]
    fn pps_during_grace_pairs_the_tick() {
        let mut sup = supervisor();
        sup.hw_mut().set_link(false);
        sup.begin_period();
        let arms_before = sup.hw().timer_arms();

        sup.hw_mut().raise(line::TIMER);
        assert_eq!(sup.poll_once().unwrap(), Poll::Pending);
        sup.hw_mut().raise(line::PPS);
        assert_eq!(sup.poll_once().unwrap(), Poll::Ticked);
        assert_eq!(sup.hw().timer_arms(), arms_before + 1);
    }

    #[test]
    fn idle_polling_keeps_the_period_open() {
        let mut sup = supervisor();
        sup.hw_mut().set_link(false);
        sup.begin_period();

        for _ in 0..10 {
            assert_eq!(sup.poll_once().unwrap(), Poll::Pending);
        }
        assert_eq!(sup.stats().slices, 10);
        assert_eq!(sup.stats().idle_beats, 10);
    }
}
