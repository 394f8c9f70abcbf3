//! Adapts a NIC TX/RX queue to the session layer's narrow [`PacketSink`]/[`PacketSource`]
//! interface, so sessions never touch [`crate::dpdk`] or [`crate::memory::mbuf::Mbuf`] directly.

use crate::dpdk;
use crate::error::TransportError;
use crate::memory::mbuf::Mbuf;
use crate::port::PortId;
use crate::ptp::PtpSlave;
use crate::session::queue::{PacketSink, PacketSource};

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// TX side of one NIC queue, owned by exactly one session at a time (the Packet I/O facade's "at
/// most one owner per TX queue" invariant is enforced by the caller that hands out queue ids).
pub(crate) struct NicPacketSink {
    port_id: PortId,
    queue_id: u16,
    mempool: *mut dpdk::rte_mempool,
}

// The raw mempool pointer is process-global DPDK state; a sink is only ever driven by the single
// scheduler thread that owns its session, so no concurrent access occurs through this handle.
unsafe impl Send for NicPacketSink {}

impl NicPacketSink {
    pub(crate) fn new(port_id: PortId, queue_id: u16, mempool: *mut dpdk::rte_mempool) -> NicPacketSink {
        NicPacketSink {
            port_id,
            queue_id,
            mempool,
        }
    }
}

impl PacketSink for NicPacketSink {
    fn send(&mut self, packet: &[u8]) -> Result<bool, TransportError> {
        let mbuf = Mbuf::from_bytes(packet, self.mempool)
            .map_err(|e| TransportError::ResourceExhausted(format!("mbuf alloc failed: {}", e)))?;
        let mut ptrs = [mbuf.as_ptr()];
        let sent = unsafe {
            dpdk::rte_eth_tx_burst(self.port_id.raw(), self.queue_id, ptrs.as_mut_ptr(), 1)
        };
        Ok(sent == 1)
    }
}

/// RX side of one NIC queue. Stamps each polled packet with a PTP-corrected arrival time when a
/// slave clock is attached, falling back to wall-clock time on ports without PTP.
pub(crate) struct NicPacketSource {
    port_id: PortId,
    queue_id: u16,
    ptp: Option<Arc<PtpSlave>>,
    burst_size: u16,
    pending: std::collections::VecDeque<Mbuf>,
}

unsafe impl Send for NicPacketSource {}

impl NicPacketSource {
    pub(crate) fn new(port_id: PortId, queue_id: u16, ptp: Option<Arc<PtpSlave>>) -> NicPacketSource {
        NicPacketSource {
            port_id,
            queue_id,
            ptp,
            burst_size: 32,
            pending: std::collections::VecDeque::new(),
        }
    }

    fn arrival_ns(&self) -> i128 {
        let mut ts = dpdk::timespec::default();
        let raw_ns = if unsafe {
            dpdk::rte_eth_timesync_read_rx_timestamp(self.port_id.raw(), &mut ts, 0)
        } == 0
        {
            ts.tv_sec as i128 * 1_000_000_000 + ts.tv_nsec as i128
        } else {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as i128)
                .unwrap_or(0)
        };
        match &self.ptp {
            Some(ptp) => ptp.corrected_time(raw_ns),
            None => raw_ns,
        }
    }

    fn refill(&mut self) {
        let mut ptrs = Vec::with_capacity(self.burst_size as usize);
        let nb_rx = unsafe {
            dpdk::rte_eth_rx_burst(
                self.port_id.raw(),
                self.queue_id,
                ptrs.as_mut_ptr(),
                self.burst_size,
            )
        };
        unsafe {
            ptrs.set_len(nb_rx as usize);
        }
        for raw in ptrs {
            self.pending.push_back(Mbuf::new_unchecked(raw));
        }
    }
}

impl PacketSource for NicPacketSource {
    fn try_recv(&mut self) -> Option<(Vec<u8>, i128)> {
        if self.pending.is_empty() {
            self.refill();
        }
        let mbuf = self.pending.pop_front()?;
        Some((mbuf.data().to_vec(), self.arrival_ns()))
    }
}
