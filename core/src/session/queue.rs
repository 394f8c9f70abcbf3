//! The narrow interface a session needs from its NIC queue. Production callers hand sessions a
//! queue backed by [`crate::port`]; tests use [`VecDequeQueue`].
//!
//! Keeping this as a trait (rather than threading `Port`/`Mbuf` through every session) is what
//! lets the video/audio/ancillary/fast-metadata sessions share one packetization and pacing path
//! while still compiling and testing without a DPDK-bound NIC.

use std::collections::VecDeque;

/// Outbound direction: one queue per (session, port) pair under ST 2022-7 redundancy.
pub trait PacketSink: Send {
    /// Enqueues `packet` for transmission. Returns `Ok(false)` when the hardware/software queue
    /// is full and the caller should retry within the same tick rather than treat it as an error.
    fn send(&mut self, packet: &[u8]) -> Result<bool, crate::error::TransportError>;
}

/// Inbound direction: one queue per (session, port) pair.
pub trait PacketSource: Send {
    /// Polls for the next packet without blocking. `arrival_ns` is the hardware RX timestamp
    /// (PTP-disciplined clock) when available, or a software capture time otherwise.
    fn try_recv(&mut self) -> Option<(Vec<u8>, i128)>;
}

/// An in-memory `PacketSink`/`PacketSource` used by unit tests and by the pipeline layer's own
/// tests; never constructed on the data-plane path.
#[derive(Default)]
pub struct VecDequeQueue {
    pub sent: VecDeque<Vec<u8>>,
    pub pending_recv: VecDeque<(Vec<u8>, i128)>,
    pub full: bool,
}

impl VecDequeQueue {
    pub fn new() -> VecDequeQueue {
        VecDequeQueue::default()
    }
}

impl PacketSink for VecDequeQueue {
    fn send(&mut self, packet: &[u8]) -> Result<bool, crate::error::TransportError> {
        if self.full {
            return Ok(false);
        }
        self.sent.push_back(packet.to_vec());
        Ok(true)
    }
}

impl PacketSource for VecDequeQueue {
    fn try_recv(&mut self) -> Option<(Vec<u8>, i128)> {
        self.pending_recv.pop_front()
    }
}
