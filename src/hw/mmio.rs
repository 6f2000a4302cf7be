//! Talos SoC register backend
//!
//! Memory-mapped implementation of the hardware traits for the real board.
//! The network controller exposes one receive and one transmit buffer and
//! a command/status register for each; the interrupt controller packs
//! pending bits, enable bits, the fault flag, and a summary output into a
//! single register.
//!
//! ## Register Layout
//!
//! | Block | Offset | Register | Purpose |
//! |-------|--------|----------|---------|
//! | NET   | +0x000 | RXCMD    | RX status: avail, broadcast, length, capability; write to acknowledge |
//! | NET   | +0x004 | TXCMD    | TX status: busy; write length + send bit to submit |
//! | NET   | +0x008 | MACHI    | Station address, upper 16 bits |
//! | NET   | +0x00C | MACLO    | Station address, lower 32 bits |
//! | NET   | +0x010 | PHYSTAT  | PHY status mirror (link bit) |
//! | NET   | +0x800 | RXBUF    | Receive slot (2 KiB) |
//! | NET   | +0x1000| TXBUF    | Transmit slot (2 KiB) |
//! | SYS   | +0x000 | PIC      | Interrupt controller (see below) |
//! | SYS   | +0x004 | TIMER    | Interval timer reload |
//! | SYS   | +0x008 | RTC      | Free-running seconds counter |
//! | LED   | +0x000 | BANK     | Plain LED row |
//! | LED   | +0x004 | LAMP0..3 | Colour lamps, one word each |
//!
//! PIC read: bits 7:0 pending (latched regardless of enables), bits 15:8
//! enabled, bit 30 fault, bit 31 summary (an enabled line is pending).
//! PIC write: bits 7:0 acknowledge pending, bits 15:8 set enables, bits
//! 23:16 clear enables.

use crate::MAX_FRAME_LEN;
use crate::config::EndpointConfig;
use crate::hw::{Color, Indicators, IrqController, IrqStatus, Lamp, Nic, Wallclock};
use crate::net::MacAddress;
use crate::sched::Supervisor;
use core::sync::atomic::{Ordering, compiler_fence};
use lazy_static::lazy_static;
use spin::Mutex;

/// Network controller block
const NET_BASE: usize = 0x4010_0000;

/// System block: interrupt controller, interval timer, RTC
const SYS_BASE: usize = 0x4020_0000;

/// Indicator block
const LED_BASE: usize = 0x4030_0000;

/// Network controller register offsets from NET_BASE.
mod net_offsets {
    pub const RXCMD: usize = 0x000;
    pub const TXCMD: usize = 0x004;
    pub const MACHI: usize = 0x008;
    pub const MACLO: usize = 0x00C;
    pub const PHYSTAT: usize = 0x010;
    pub const RXBUF: usize = 0x800;
    pub const TXBUF: usize = 0x1000;
}

/// System block register offsets from SYS_BASE.
mod sys_offsets {
    pub const PIC: usize = 0x000;
    pub const TIMER: usize = 0x004;
    pub const RTC: usize = 0x008;
}

/// Indicator block register offsets from LED_BASE.
mod led_offsets {
    pub const BANK: usize = 0x000;
    pub const LAMP0: usize = 0x004;
}

/// RXCMD register bits
mod rxcmd {
    pub const AVAIL: u32 = 1 << 31;
    pub const BROADCAST: u32 = 1 << 30;
    /// Write: acknowledge the slot and re-arm reception
    pub const CLEAR: u32 = 1 << 29;
    /// Write: clear latched receive errors
    pub const CLEAR_ERR: u32 = 1 << 28;
    /// Capability field: log2 of the largest receivable frame
    pub const CAP_SHIFT: u32 = 24;
    pub const CAP_MASK: u32 = 0x0F;
    pub const LEN_MASK: u32 = 0x07FF;
}

/// TXCMD register bits
mod txcmd {
    pub const BUSY: u32 = 1 << 31;
    /// Write: submit LEN_MASK bytes of the transmit slot
    pub const SEND: u32 = 1 << 30;
    pub const LEN_MASK: u32 = 0x07FF;
}

/// PHYSTAT register bits
mod phystat {
    /// Link established (mirrors the MDIO status register's link bit)
    pub const LINK_UP: u32 = 1 << 2;
}

/// PIC register fields
mod pic {
    pub const PENDING_SHIFT: u32 = 0;
    pub const ENABLE_SET_SHIFT: u32 = 8;
    pub const ENABLE_CLR_SHIFT: u32 = 16;
    pub const LINE_MASK: u32 = 0xFF;
    pub const FAULT: u32 = 1 << 30;
    pub const SUMMARY: u32 = 1 << 31;
}

/// TIMER register bits
mod timer {
    /// Reload automatically at each expiry
    pub const INTERVAL: u32 = 1 << 31;
}

/// System clock ticks per second; one timer period = one second.
const CLOCK_HZ: u32 = 100_000_000;

/// Colour codes understood by the lamp registers (0x00RRGGBB)
fn color_code(color: Color) -> u32 {
    match color {
        Color::Off => 0x0000_0000,
        Color::Green => 0x0000_1F00,
        Color::Yellow => 0x001F_1F00,
        Color::Red => 0x001F_0000,
        Color::White => 0x001F_1F1F,
    }
}

/// Length of the waiting frame encoded in an RXCMD value.
fn rx_frame_len(cmd: u32) -> usize {
    (cmd & rxcmd::LEN_MASK) as usize
}

/// Interface capability encoded in an RXCMD value, clamped to the slot
/// size.
fn rx_capability(cmd: u32) -> usize {
    let log2 = (cmd >> rxcmd::CAP_SHIFT) & rxcmd::CAP_MASK;
    (1usize << log2).min(MAX_FRAME_LEN)
}

/// The Talos SoC peripherals as one board
pub struct SocBoard {
    net_base: usize,
    sys_base: usize,
    led_base: usize,
}

#[allow(clippy::new_without_default)] // A board is explicitly constructed, never defaulted into place
impl SocBoard {
    pub const fn new() -> Self {
        Self {
            net_base: NET_BASE,
            sys_base: SYS_BASE,
            led_base: LED_BASE,
        }
    }

    // ========================================================================
    // Register Access
    // ========================================================================

    #[inline]
    fn read_reg(&self, base: usize, offset: usize) -> u32 {
        let addr = (base + offset) as *const u32;
        // SAFETY: the block bases name valid, aligned MMIO registers on
        // this SoC, and a volatile read keeps the compiler from caching
        // status values.
        unsafe { core::ptr::read_volatile(addr) }
    }

    #[inline]
    fn write_reg(&self, base: usize, offset: usize, value: u32) {
        // Order buffer writes before the command write that makes the
        // hardware consume them.
        compiler_fence(Ordering::SeqCst);
        let addr = (base + offset) as *mut u32;
        // SAFETY: the block bases name valid, aligned MMIO registers on
        // this SoC.
        unsafe { core::ptr::write_volatile(addr, value) }
    }
}

impl Nic for SocBoard {
    fn set_mac(&mut self, mac: MacAddress) {
        let bytes = mac.as_bytes();
        let hi = u32::from_be_bytes([0, 0, bytes[0], bytes[1]]);
        let lo = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
        self.write_reg(self.net_base, net_offsets::MACHI, hi);
        self.write_reg(self.net_base, net_offsets::MACLO, lo);
    }

    fn max_frame_len(&self) -> usize {
        rx_capability(self.read_reg(self.net_base, net_offsets::RXCMD))
    }

    fn link_up(&self) -> bool {
        self.read_reg(self.net_base, net_offsets::PHYSTAT) & phystat::LINK_UP != 0
    }

    fn rx_ready(&self) -> bool {
        self.read_reg(self.net_base, net_offsets::RXCMD) & rxcmd::AVAIL != 0
    }

    fn rx_is_broadcast(&self) -> bool {
        self.read_reg(self.net_base, net_offsets::RXCMD) & rxcmd::BROADCAST != 0
    }

    fn rx_len(&self) -> usize {
        rx_frame_len(self.read_reg(self.net_base, net_offsets::RXCMD))
    }

    fn rx_slot(&self) -> &[u8] {
        let len = self.rx_len().min(MAX_FRAME_LEN);
        // SAFETY: RXBUF is a 2 KiB buffer backing the receive slot; the
        // hardware stops writing it while AVAIL is held, and the slice is
        // dropped before rx_ack re-arms reception.
        unsafe { core::slice::from_raw_parts((self.net_base + net_offsets::RXBUF) as *const u8, len) }
    }

    fn rx_ack(&mut self) {
        self.write_reg(self.net_base, net_offsets::RXCMD, rxcmd::CLEAR | rxcmd::CLEAR_ERR);
    }

    fn tx_busy(&self) -> bool {
        self.read_reg(self.net_base, net_offsets::TXCMD) & txcmd::BUSY != 0
    }

    fn tx_slot(&mut self) -> &mut [u8] {
        // SAFETY: TXBUF is a 2 KiB buffer backing the transmit slot; the
        // caller holds &mut self, and the hardware only reads it after
        // tx_send.
        unsafe {
            core::slice::from_raw_parts_mut((self.net_base + net_offsets::TXBUF) as *mut u8, MAX_FRAME_LEN)
        }
    }

    fn tx_send(&mut self, len: usize) {
        let len = (len as u32) & txcmd::LEN_MASK;
        self.write_reg(self.net_base, net_offsets::TXCMD, txcmd::SEND | len);
    }
}

impl IrqController for SocBoard {
    fn irq_enable(&mut self, lines: u8) {
        self.write_reg(self.sys_base, sys_offsets::PIC, u32::from(lines) << pic::ENABLE_SET_SHIFT);
    }

    fn irq_disable(&mut self, lines: u8) {
        self.write_reg(self.sys_base, sys_offsets::PIC, u32::from(lines) << pic::ENABLE_CLR_SHIFT);
    }

    fn irq_clear(&mut self, lines: u8) {
        self.write_reg(self.sys_base, sys_offsets::PIC, u32::from(lines) << pic::PENDING_SHIFT);
    }

    fn irq_status(&self) -> IrqStatus {
        let raw = self.read_reg(self.sys_base, sys_offsets::PIC);
        IrqStatus {
            pending: ((raw >> pic::PENDING_SHIFT) & pic::LINE_MASK) as u8,
            enabled: ((raw >> pic::ENABLE_SET_SHIFT) & pic::LINE_MASK) as u8,
            summary: raw & pic::SUMMARY != 0,
        }
    }

    fn fault(&self) -> bool {
        self.read_reg(self.sys_base, sys_offsets::PIC) & pic::FAULT != 0
    }

    fn arm_timer(&mut self) {
        self.write_reg(self.sys_base, sys_offsets::TIMER, timer::INTERVAL | CLOCK_HZ);
    }
}

impl Indicators for SocBoard {
    fn set_lamp(&mut self, lamp: Lamp, color: Color) {
        let index = match lamp {
            Lamp::Status => 0,
            Lamp::Link => 1,
            Lamp::Rx => 2,
            Lamp::Ping => 3,
        };
        self.write_reg(self.led_base, led_offsets::LAMP0 + index * 4, color_code(color));
    }

    fn set_bank(&mut self, bits: u8) {
        self.write_reg(self.led_base, led_offsets::BANK, u32::from(bits));
    }
}

impl Wallclock for SocBoard {
    fn seconds(&self) -> u32 {
        self.read_reg(self.sys_base, sys_offsets::RTC)
    }
}

lazy_static! {
    /// The one board instance, handed out exactly once by [`run_board`].
    pub static ref BOARD: Mutex<Option<SocBoard>> = Mutex::new(Some(SocBoard::new()));
}

/// Board entry point: take the hardware, run the supervisor, and park the
/// core on a fatal condition (the lamps already show the failure site).
pub fn run_board(cfg: EndpointConfig) -> ! {
    let hw = BOARD.lock().take();
    if let Some(hw) = hw {
        let mut supervisor = Supervisor::new(hw, cfg);
        supervisor.init();
        let _fatal = supervisor.run();
    }
    loop {
        core::hint::spin_loop();
    }
}
