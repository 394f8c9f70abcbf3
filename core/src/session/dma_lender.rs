//! DMA lender: one `rte_dmadev` hardware channel shared by up to N sessions, offloading payload
//! copies (RX reassembly placement, redundancy duplication) out of the per-packet fast path.
//!
//! Mirrors the original DMA-offload API shape: `borrow`/`drop_mbuf`/`copy`/`fill`/`submit`/
//! `completed`, with a per-lender callback invoked when an in-flight mbuf is retired.

use std::collections::VecDeque;

use crate::dpdk;
use crate::error::TransportError;

/// Opaque handle a lender hands out for one in-flight DMA copy. Retired in FIFO order, matching
/// `rte_dmadev`'s own completion ordering guarantee within a vchan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InflightId(pub u64);

struct Inflight {
    id: InflightId,
    on_drop: Box<dyn FnOnce() + Send>,
}

/// One session's lease on a shared DMA channel.
pub struct DmaLender {
    dev_id: i16,
    vchan: u16,
    inflight: VecDeque<Inflight>,
    max_inflight: usize,
    next_id: u64,
}

impl DmaLender {
    pub fn new(dev_id: i16, vchan: u16, max_inflight: usize) -> DmaLender {
        DmaLender {
            dev_id,
            vchan,
            inflight: VecDeque::new(),
            max_inflight: max_inflight.max(1),
            next_id: 0,
        }
    }

    /// `true` once the in-flight ring has no slack; callers should fall back to a CPU copy.
    pub fn full(&self) -> bool {
        self.inflight.len() >= self.max_inflight
    }

    /// `true` when no copies are outstanding.
    pub fn empty(&self) -> bool {
        self.inflight.is_empty()
    }

    /// Reserves a slot for a copy about to be enqueued, returning the id used to retire it later.
    /// `on_drop` runs once `completed` reports this copy finished (or the caller force-drops it).
    pub fn borrow(
        &mut self,
        on_drop: impl FnOnce() + Send + 'static,
    ) -> Result<InflightId, TransportError> {
        if self.full() {
            return Err(TransportError::ResourceExhausted(
                "DMA lender has no inflight slack".to_string(),
            ));
        }
        let id = InflightId(self.next_id);
        self.next_id += 1;
        self.inflight.push_back(Inflight {
            id,
            on_drop: Box::new(on_drop),
        });
        Ok(id)
    }

    /// Enqueues one copy against a previously `borrow`ed slot.
    pub fn copy(&self, src_iova: u64, dst_iova: u64, length: u32) -> Result<(), TransportError> {
        let ret = unsafe { dpdk::rte_dmadev_copy(self.dev_id, self.vchan, src_iova, dst_iova, length, 0) };
        if ret < 0 {
            return Err(TransportError::IoFailure(format!(
                "rte_dmadev_copy failed: {}",
                ret
            )));
        }
        Ok(())
    }

    /// Alias for `copy` used when the destination is a fixed pattern fill rather than another
    /// buffer; kept distinct from `copy` to mirror the original API's separate entry points even
    /// though both resolve to the same `rte_dmadev_copy` call underneath in this profile.
    pub fn fill(&self, pattern_src_iova: u64, dst_iova: u64, length: u32) -> Result<(), TransportError> {
        self.copy(pattern_src_iova, dst_iova, length)
    }

    /// Rings the hardware doorbell for every copy enqueued since the last submit.
    pub fn submit(&self) -> Result<(), TransportError> {
        let ret = unsafe { dpdk::rte_dmadev_submit(self.dev_id, self.vchan) };
        if ret < 0 {
            return Err(TransportError::IoFailure(format!(
                "rte_dmadev_submit failed: {}",
                ret
            )));
        }
        Ok(())
    }

    /// Polls for finished copies, retiring up to `max` in-flight entries in submission order and
    /// running their drop callbacks.
    pub fn completed(&mut self, max: u16) -> u16 {
        let mut last_idx = 0u16;
        let mut has_error = false;
        let n = unsafe { dpdk::rte_dmadev_completed(self.dev_id, self.vchan, max, &mut last_idx, &mut has_error) };
        for _ in 0..n {
            if let Some(entry) = self.inflight.pop_front() {
                (entry.on_drop)();
            }
        }
        n
    }

    /// Force-drops up to `count` oldest in-flight entries without waiting for hardware
    /// completion, used when a session is torn down mid-transfer.
    pub fn drop_mbuf(&mut self, count: usize) {
        for _ in 0..count.min(self.inflight.len()) {
            if let Some(entry) = self.inflight.pop_front() {
                (entry.on_drop)();
            }
        }
    }

    pub fn inflight_ids(&self) -> Vec<InflightId> {
        self.inflight.iter().map(|e| e.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn borrow_rejects_once_inflight_ring_is_full() {
        let mut lender = DmaLender::new(0, 0, 2);
        lender.borrow(|| {}).unwrap();
        lender.borrow(|| {}).unwrap();
        assert!(lender.full());
        assert!(lender.borrow(|| {}).is_err());
    }

    #[test]
    fn drop_mbuf_runs_callbacks_in_fifo_order() {
        let mut lender = DmaLender::new(0, 0, 4);
        let order = Arc::new(AtomicUsize::new(0));
        let first_seen = Arc::new(AtomicUsize::new(usize::MAX));
        {
            let order = order.clone();
            let first_seen = first_seen.clone();
            lender
                .borrow(move || {
                    first_seen.store(order.fetch_add(1, Ordering::SeqCst), Ordering::SeqCst);
                })
                .unwrap();
        }
        lender.borrow(|| {}).unwrap();
        assert!(!lender.empty());
        lender.drop_mbuf(2);
        assert!(lender.empty());
        assert_eq!(first_seen.load(Ordering::SeqCst), 0);
    }
}
