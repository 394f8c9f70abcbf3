//! The `Free → Ready → InTransmitting → Free` framebuffer state machine shared by every TX
//! session, and the RX mirror `Free → Filling → Ready → Free`.

use std::fmt;

/// State of one framebuffer slot in a TX session's ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxFrameState {
    /// Available for the application to write a new frame into.
    Free,
    /// Fully written by the application, waiting for the pacing engine to start sending.
    Ready,
    /// Currently being packetized and sent.
    InTransmitting,
}

/// State of one framebuffer slot in an RX session's ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxFrameState {
    /// Available to start reassembling a new frame.
    Free,
    /// Receiving packets; not yet complete.
    Filling,
    /// Complete (marker seen, or frame-time elapsed) and ready for the application to read.
    Ready,
}

#[derive(Debug)]
pub struct InvalidTransition<S: fmt::Debug> {
    pub from: S,
    pub to: S,
}

impl<S: fmt::Debug> fmt::Display for InvalidTransition<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid framebuffer transition {:?} -> {:?}", self.from, self.to)
    }
}

impl<S: fmt::Debug> std::error::Error for InvalidTransition<S> {}

/// One slot in a TX framebuffer ring: the frame payload plus its state-machine position.
pub struct TxSlot {
    pub state: TxFrameState,
    pub data: Vec<u8>,
    /// RTP timestamp assigned to this frame once it enters `InTransmitting`.
    pub rtp_timestamp: u32,
}

impl TxSlot {
    pub fn new(capacity: usize) -> TxSlot {
        TxSlot {
            state: TxFrameState::Free,
            data: Vec::with_capacity(capacity),
            rtp_timestamp: 0,
        }
    }

    /// Application finished writing; marks `Ready`. Only valid from `Free`.
    pub fn mark_ready(&mut self) -> Result<(), InvalidTransition<TxFrameState>> {
        self.transition(TxFrameState::Free, TxFrameState::Ready)
    }

    /// Pacing engine claims the slot for sending. Only valid from `Ready`.
    pub fn mark_transmitting(&mut self) -> Result<(), InvalidTransition<TxFrameState>> {
        self.transition(TxFrameState::Ready, TxFrameState::InTransmitting)
    }

    /// Last packet of the frame has been sent. Only valid from `InTransmitting`.
    pub fn mark_free(&mut self) -> Result<(), InvalidTransition<TxFrameState>> {
        self.transition(TxFrameState::InTransmitting, TxFrameState::Free)
    }

    fn transition(
        &mut self,
        expected: TxFrameState,
        next: TxFrameState,
    ) -> Result<(), InvalidTransition<TxFrameState>> {
        if self.state != expected {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}

/// One slot in an RX framebuffer ring.
pub struct RxSlot {
    pub state: RxFrameState,
    pub data: Vec<u8>,
    pub rtp_timestamp: u32,
    pub marker_seen: bool,
    pub highest_sequence_seen: u32,
    pub bytes_written: usize,
    pub first_packet_arrival_ns: i128,
    /// Trailing SHA-256 carried by the marker packet as sender-embedded user metadata, if one
    /// was present; compared against the reassembled frame's own digest once complete.
    pub embedded_digest: Option<[u8; 32]>,
}

impl RxSlot {
    pub fn new(capacity: usize) -> RxSlot {
        RxSlot {
            state: RxFrameState::Free,
            data: vec![0u8; capacity],
            rtp_timestamp: 0,
            marker_seen: false,
            highest_sequence_seen: 0,
            bytes_written: 0,
            first_packet_arrival_ns: 0,
            embedded_digest: None,
        }
    }

    pub fn begin(&mut self, rtp_timestamp: u32, arrival_ns: i128) -> Result<(), InvalidTransition<RxFrameState>> {
        if self.state != RxFrameState::Free {
            return Err(InvalidTransition {
                from: self.state,
                to: RxFrameState::Filling,
            });
        }
        self.state = RxFrameState::Filling;
        self.rtp_timestamp = rtp_timestamp;
        self.marker_seen = false;
        self.highest_sequence_seen = 0;
        self.bytes_written = 0;
        self.first_packet_arrival_ns = arrival_ns;
        self.embedded_digest = None;
        Ok(())
    }

    pub fn complete(&mut self) -> Result<(), InvalidTransition<RxFrameState>> {
        self.transition(RxFrameState::Filling, RxFrameState::Ready)
    }

    pub fn release(&mut self) -> Result<(), InvalidTransition<RxFrameState>> {
        self.transition(RxFrameState::Ready, RxFrameState::Free)
    }

    fn transition(
        &mut self,
        expected: RxFrameState,
        next: RxFrameState,
    ) -> Result<(), InvalidTransition<RxFrameState>> {
        if self.state != expected {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_slot_follows_free_ready_transmitting_free() {
        let mut slot = TxSlot::new(16);
        slot.mark_ready().unwrap();
        slot.mark_transmitting().unwrap();
        slot.mark_free().unwrap();
        assert_eq!(slot.state, TxFrameState::Free);
    }

    #[test]
    fn tx_slot_rejects_out_of_order_transitions() {
        let mut slot = TxSlot::new(16);
        assert!(slot.mark_transmitting().is_err());
    }

    #[test]
    fn rx_slot_tracks_frame_completion() {
        let mut slot = RxSlot::new(16);
        slot.begin(1000, 42).unwrap();
        assert_eq!(slot.state, RxFrameState::Filling);
        slot.complete().unwrap();
        slot.release().unwrap();
        assert_eq!(slot.state, RxFrameState::Free);
    }
}
