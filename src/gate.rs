//! Transmit gate
//!
//! The single funnel onto the hardware transmit slot. Waits out any prior
//! submission, copies the frame in, and issues the send command; returns
//! once the frame is *accepted*, not once it is on the wire. At most one
//! submission is ever in flight. Callers must not overlap calls; that is
//! guaranteed by the scheduling discipline (the supervisor is the only
//! context that reaches this function), not checked here.

use crate::hw::Nic;

/// Submit one frame for transmission, blocking until the interface
/// accepts it.
pub fn transmit<H: Nic>(hw: &mut H, frame: &[u8]) {
    while hw.tx_busy() {
        core::hint::spin_loop();
    }
    let slot = hw.tx_slot();
    let len = frame.len().min(slot.len());
    slot[..len].copy_from_slice(&frame[..len]);
    hw.tx_send(len);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::sim::SimBoard;

    #[test]
    fn frame_reaches_the_interface() {
        let mut board = SimBoard::new();
        transmit(&mut board, &[0xDE, 0xAD, 0xBE, 0xEF]);

        let sent = board.take_tx().unwrap();
        assert_eq!(sent.bytes(), &[0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn waits_out_a_busy_transmitter() {
        let mut board = SimBoard::new();
        board.set_tx_busy_for(3);
        transmit(&mut board, &[0x55]);

        // The busy countdown was consumed before submission
        assert!(!board.tx_busy());
        assert_eq!(board.take_tx().unwrap().bytes(), &[0x55]);
    }
}
