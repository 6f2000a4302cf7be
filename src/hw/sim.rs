//! Simulated board backend
//!
//! A deterministic software double of the Talos SoC peripherals for host
//! tests and the `talos-sim` harness. Inbound frames are queued with
//! [`SimBoard::push_rx`]; the front of the queue plays the hardware
//! receive slot until it is acknowledged. Accepted transmissions are
//! captured for inspection via [`SimBoard::take_tx`]. Interrupt lines are
//! pulsed explicitly ([`SimBoard::raise`]), so tests control exactly when
//! the supervisor observes a timer tick or a PPS edge.
//!
//! Fault-injection hooks ([`SimBoard::set_fault`],
//! [`SimBoard::force_summary`], [`SimBoard::set_tx_busy_for`]) exist to
//! exercise the supervisor's fatal paths and the transmit gate's busy
//! wait; real hardware produces these states on its own.

use crate::MAX_FRAME_LEN;
use crate::hw::{Color, Indicators, IrqController, IrqStatus, Lamp, Nic, Wallclock};
use crate::net::MacAddress;
use core::cell::Cell;
use heapless::Deque;

/// Queue depth for injected and captured frames
const QUEUE_DEPTH: usize = 8;

/// A frame crossing the simulated interface, either direction
#[derive(Clone)]
pub struct SimFrame {
    data: [u8; MAX_FRAME_LEN],
    len: usize,
    broadcast: bool,
}

impl SimFrame {
    /// Build a frame from raw bytes. Oversized input is truncated to the
    /// slot size, as the hardware slot would.
    pub fn new(bytes: &[u8], broadcast: bool) -> Self {
        let len = bytes.len().min(MAX_FRAME_LEN);
        let mut data = [0u8; MAX_FRAME_LEN];
        data[..len].copy_from_slice(&bytes[..len]);
        Self { data, len, broadcast }
    }

    /// The frame contents
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Whether the frame carried the broadcast flag
    pub fn is_broadcast(&self) -> bool {
        self.broadcast
    }
}

/// Simulated SoC board
pub struct SimBoard {
    mac: MacAddress,
    link: bool,
    max_frame: usize,
    seconds: u32,

    // Interrupt controller
    pending: u8,
    enabled: u8,
    fault: bool,
    forced_summary: bool,
    timer_arms: u32,

    // Frame slots
    rx_queue: Deque<SimFrame, QUEUE_DEPTH>,
    tx_sent: Deque<SimFrame, QUEUE_DEPTH>,
    tx_slot: [u8; MAX_FRAME_LEN],
    tx_busy_polls: Cell<u32>,

    // Indicators
    lamps: [Color; 4],
    bank: u8,
}

#[allow(clippy::new_without_default)] // A board is explicitly constructed, never defaulted into place
impl SimBoard {
    /// Create a board with the link up and an empty interface.
    pub fn new() -> Self {
        Self {
            mac: MacAddress::new([0; 6]),
            link: true,
            max_frame: MAX_FRAME_LEN,
            seconds: 0,
            pending: 0,
            enabled: 0,
            fault: false,
            forced_summary: false,
            timer_arms: 0,
            rx_queue: Deque::new(),
            tx_sent: Deque::new(),
            tx_slot: [0u8; MAX_FRAME_LEN],
            tx_busy_polls: Cell::new(0),
            lamps: [Color::Off; 4],
            bank: 0,
        }
    }

    // ========================================================================
    // Event injection
    // ========================================================================

    /// Queue an inbound frame and latch the receive line.
    ///
    /// The oldest queued frame is dropped if the queue is full.
    pub fn push_rx(&mut self, bytes: &[u8], broadcast: bool) {
        if self.rx_queue.is_full() {
            self.rx_queue.pop_front();
        }
        let _ = self.rx_queue.push_back(SimFrame::new(bytes, broadcast));
        self.pending |= super::line::RX;
    }

    /// Latch interrupt lines pending.
    pub fn raise(&mut self, lines: u8) {
        self.pending |= lines;
    }

    /// Set or drop the PHY link.
    pub fn set_link(&mut self, up: bool) {
        self.link = up;
    }

    /// Advance the wall clock.
    pub fn advance_seconds(&mut self, n: u32) {
        self.seconds = self.seconds.wrapping_add(n);
    }

    // ========================================================================
    // Fault injection
    // ========================================================================

    /// Latch the hardware fault flag.
    pub fn set_fault(&mut self) {
        self.fault = true;
    }

    /// Assert the controller summary output with no pending line behind
    /// it, the inconsistent state the supervisor treats as fatal.
    pub fn force_summary(&mut self) {
        self.forced_summary = true;
    }

    /// Report the transmitter busy for the next `polls` status reads.
    pub fn set_tx_busy_for(&mut self, polls: u32) {
        self.tx_busy_polls.set(polls);
    }

    /// Shrink the interface capability, e.g. to provoke oversize
    /// rejections.
    pub fn set_max_frame_len(&mut self, len: usize) {
        self.max_frame = len;
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Pop the oldest accepted transmission.
    pub fn take_tx(&mut self) -> Option<SimFrame> {
        self.tx_sent.pop_front()
    }

    /// Number of accepted transmissions not yet taken.
    pub fn tx_count(&self) -> usize {
        self.tx_sent.len()
    }

    /// Current colour of a lamp.
    pub fn lamp(&self, lamp: Lamp) -> Color {
        self.lamps[lamp_index(lamp)]
    }

    /// Current LED row pattern.
    pub fn bank(&self) -> u8 {
        self.bank
    }

    /// Programmed station address.
    pub fn station_mac(&self) -> MacAddress {
        self.mac
    }

    /// How many times the interval timer was re-armed.
    pub fn timer_arms(&self) -> u32 {
        self.timer_arms
    }
}

fn lamp_index(lamp: Lamp) -> usize {
    match lamp {
        Lamp::Status => 0,
        Lamp::Link => 1,
        Lamp::Rx => 2,
        Lamp::Ping => 3,
    }
}

impl Nic for SimBoard {
    fn set_mac(&mut self, mac: MacAddress) {
        self.mac = mac;
    }

    fn max_frame_len(&self) -> usize {
        self.max_frame
    }

    fn link_up(&self) -> bool {
        self.link
    }

    fn rx_ready(&self) -> bool {
        !self.rx_queue.is_empty()
    }

    fn rx_is_broadcast(&self) -> bool {
        self.rx_queue.front().map(SimFrame::is_broadcast).unwrap_or(false)
    }

    fn rx_len(&self) -> usize {
        self.rx_queue.front().map(|f| f.len).unwrap_or(0)
    }

    fn rx_slot(&self) -> &[u8] {
        self.rx_queue.front().map(SimFrame::bytes).unwrap_or(&[])
    }

    fn rx_ack(&mut self) {
        self.rx_queue.pop_front();
    }

    fn tx_busy(&self) -> bool {
        let polls = self.tx_busy_polls.get();
        if polls > 0 {
            self.tx_busy_polls.set(polls - 1);
            true
        } else {
            false
        }
    }

    fn tx_slot(&mut self) -> &mut [u8] {
        &mut self.tx_slot
    }

    fn tx_send(&mut self, len: usize) {
        if self.tx_sent.is_full() {
            self.tx_sent.pop_front();
        }
        let len = len.min(MAX_FRAME_LEN);
        let _ = self.tx_sent.push_back(SimFrame::new(&self.tx_slot[..len], false));
        self.pending |= super::line::TX;
    }
}

impl IrqController for SimBoard {
    fn irq_enable(&mut self, lines: u8) {
        self.enabled |= lines;
    }

    fn irq_disable(&mut self, lines: u8) {
        self.enabled &= !lines;
    }

    fn irq_clear(&mut self, lines: u8) {
        self.pending &= !lines;
    }

    fn irq_status(&self) -> IrqStatus {
        IrqStatus {
            pending: self.pending,
            enabled: self.enabled,
            summary: self.forced_summary || (self.pending & self.enabled) != 0,
        }
    }

    fn fault(&self) -> bool {
        self.fault
    }

    fn arm_timer(&mut self) {
        self.timer_arms += 1;
    }
}

impl Indicators for SimBoard {
    fn set_lamp(&mut self, lamp: Lamp, color: Color) {
        self.lamps[lamp_index(lamp)] = color;
    }

    fn set_bank(&mut self, bits: u8) {
        self.bank = bits;
    }
}

impl Wallclock for SimBoard {
    fn seconds(&self) -> u32 {
        self.seconds
    }
}
