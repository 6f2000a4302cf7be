//! Hardware Abstraction
//!
//! Capability traits over the SoC peripherals the endpoint touches: the
//! Ethernet MAC with its single receive and transmit slots, the interrupt
//! controller, the status lamps, and the wall clock. The supervisor is
//! generic over one object implementing all four, which allows:
//!
//! - **Hardware portability**: the memory-mapped register block of the
//!   real SoC ([`mmio::SocBoard`])
//! - **Testing**: a deterministic simulated board ([`sim::SimBoard`]) that
//!   queues frames and lets tests pulse interrupt lines
//!
//! ## Interrupt semantics
//!
//! Pending bits latch when their event occurs, whether or not the line is
//! enabled. The controller's summary output asserts only while an
//! *enabled* line is pending. Clearing acknowledges pending bits without
//! touching enables. The supervisor masks the receive line once it is seen
//! pending; the background context then polls [`Nic::rx_ready`] directly,
//! so one frame is never delivered through both paths.

pub mod mmio;
pub mod sim;

use crate::net::MacAddress;
use core::fmt;

/// Interrupt line bit assignments
pub mod line {
    /// Once-per-period interval timer tick
    pub const TIMER: u8 = 1 << 0;
    /// External one-pulse-per-second edge
    pub const PPS: u8 = 1 << 1;
    /// Receive frame available
    pub const RX: u8 = 1 << 2;
    /// Transmit complete
    pub const TX: u8 = 1 << 3;
    /// Every line this endpoint services
    pub const ALL: u8 = TIMER | PPS | RX | TX;
}

/// Snapshot of the interrupt controller state
#[derive(Copy, Clone, Debug, Default)]
pub struct IrqStatus {
    /// Latched pending bits, enabled or not
    pub pending: u8,
    /// Currently enabled lines
    pub enabled: u8,
    /// Controller summary output: an enabled line is pending
    pub summary: bool,
}

impl IrqStatus {
    /// Whether any of `lines` is pending
    pub fn is_pending(&self, lines: u8) -> bool {
        self.pending & lines != 0
    }

    /// Whether any of `lines` is enabled
    pub fn is_enabled(&self, lines: u8) -> bool {
        self.enabled & lines != 0
    }
}

/// Ethernet MAC with one receive slot and one transmit slot
pub trait Nic {
    /// Program the station address filter.
    fn set_mac(&mut self, mac: MacAddress);

    /// Largest frame the interface can carry, from its capability field
    /// (a power of two).
    fn max_frame_len(&self) -> usize;

    /// Whether the PHY reports an established link.
    fn link_up(&self) -> bool;

    /// Whether a received frame is waiting in the receive slot.
    fn rx_ready(&self) -> bool;

    /// Whether the waiting frame arrived with the broadcast flag set.
    fn rx_is_broadcast(&self) -> bool;

    /// Length in bytes of the waiting frame.
    fn rx_len(&self) -> usize;

    /// The receive slot contents. Valid until [`Nic::rx_ack`]; callers
    /// must copy the frame out before acknowledging.
    fn rx_slot(&self) -> &[u8];

    /// Acknowledge the waiting frame and re-arm reception. The slot may
    /// be overwritten immediately afterwards.
    fn rx_ack(&mut self);

    /// Whether a previously submitted frame is still being transmitted.
    fn tx_busy(&self) -> bool;

    /// The transmit slot. Write the outbound frame here, then call
    /// [`Nic::tx_send`].
    fn tx_slot(&mut self) -> &mut [u8];

    /// Submit `len` bytes of the transmit slot for transmission.
    fn tx_send(&mut self, len: usize);
}

/// Interrupt controller for the lines in [`line`]
pub trait IrqController {
    fn irq_enable(&mut self, lines: u8);
    fn irq_disable(&mut self, lines: u8);

    /// Acknowledge pending bits.
    fn irq_clear(&mut self, lines: u8);

    fn irq_status(&self) -> IrqStatus;

    /// Hardware fault flag. Once set the endpoint is unrecoverable.
    fn fault(&self) -> bool;

    /// (Re-)load the once-per-period interval timer.
    fn arm_timer(&mut self);
}

/// Front-panel colour lamps, one per concern
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Lamp {
    /// Overall endpoint status
    Status,
    /// Link negotiation / ping-target resolution
    Link,
    /// Receive activity
    Rx,
    /// Ping round-trip
    Ping,
}

/// Lamp colours
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Color {
    Off,
    Green,
    Yellow,
    Red,
    White,
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Color::Off => "off",
            Color::Green => "green",
            Color::Yellow => "yellow",
            Color::Red => "red",
            Color::White => "white",
        };
        write!(f, "{}", name)
    }
}

/// Visual diagnostics: four colour lamps plus a row of plain LEDs
///
/// Observational only; nothing reads these back.
pub trait Indicators {
    fn set_lamp(&mut self, lamp: Lamp, color: Color);

    /// Raw pattern on the plain LED row.
    fn set_bank(&mut self, bits: u8);
}

/// Seconds counter used to rate-limit opportunistic work
pub trait Wallclock {
    fn seconds(&self) -> u32;
}

/// Everything the supervisor needs from the hardware, as one bound
pub trait Board: Nic + IrqController + Indicators + Wallclock {}

impl<T: Nic + IrqController + Indicators + Wallclock> Board for T {}
