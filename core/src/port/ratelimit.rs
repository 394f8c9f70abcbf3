//! Rate-limit hierarchy: one root node per port, a "default" non-leaf node, and one leaf per TX
//! queue, backed by `rte_tm`. Shapers with identical bit rates are shared rather than duplicated.
//!
//! Mutations are staged and only take effect on `commit()`. A failed commit rolls the staged
//! table back instead of leaving the hardware hierarchy partially applied.

use std::collections::HashMap;

use crate::dpdk;
use crate::error::TransportError;
use crate::port::PortId;

const ROOT_NODE_ID: u32 = 0;
const DEFAULT_NODE_ID: u32 = 1;
const LEAF_BASE_ID: u32 = 1000;

/// VFs require every TX queue to carry a rate limit; queues without an explicit bps get this
/// baseline until a session overrides it.
pub const BASELINE_BPS: u64 = 1_000_000_000 / 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ShaperKey(u64);

struct PendingShaper {
    profile_id: u32,
    bps: u64,
}

struct PendingLeaf {
    queue: u16,
    shaper_profile_id: u32,
}

/// Staged mutations against one port's traffic-manager hierarchy.
pub struct RateLimitHierarchy {
    port: PortId,
    committed_shapers: HashMap<ShaperKey, u32>,
    committed_leaves: HashMap<u16, u32>,
    next_shaper_id: u32,
    pending_shapers: Vec<PendingShaper>,
    pending_leaves: Vec<PendingLeaf>,
    root_installed: bool,
}

impl RateLimitHierarchy {
    pub fn new(port: PortId) -> RateLimitHierarchy {
        RateLimitHierarchy {
            port,
            committed_shapers: HashMap::new(),
            committed_leaves: HashMap::new(),
            next_shaper_id: 0,
            pending_shapers: Vec::new(),
            pending_leaves: Vec::new(),
            root_installed: false,
        }
    }

    /// Stages a rate limit on `queue`, reusing an already-committed or already-pending shaper
    /// profile with the same bps instead of creating a duplicate.
    pub fn stage_queue_limit(&mut self, queue: u16, bps: u64) -> u32 {
        let key = ShaperKey(bps);
        if let Some(&profile_id) = self.committed_shapers.get(&key) {
            self.pending_leaves.push(PendingLeaf {
                queue,
                shaper_profile_id: profile_id,
            });
            return profile_id;
        }
        if let Some(p) = self.pending_shapers.iter().find(|p| p.bps == bps) {
            let profile_id = p.profile_id;
            self.pending_leaves.push(PendingLeaf {
                queue,
                shaper_profile_id: profile_id,
            });
            return profile_id;
        }
        let profile_id = self.next_shaper_id;
        self.next_shaper_id += 1;
        self.pending_shapers.push(PendingShaper { profile_id, bps });
        self.pending_leaves.push(PendingLeaf {
            queue,
            shaper_profile_id: profile_id,
        });
        profile_id
    }

    /// Applies every staged shaper and node to the hardware, then commits the hierarchy. On
    /// failure, nothing staged becomes visible and the pending table is cleared so the caller can
    /// retry with different parameters (or fall back to software pacing).
    pub fn commit(&mut self) -> Result<(), TransportError> {
        let port_id = self.port.raw();
        let mut error = dpdk::rte_tm_error::default();

        for shaper in &self.pending_shapers {
            let mut params = dpdk::rte_tm_shaper_params {
                peak: dpdk::rte_tm_shaper_rate_size {
                    rate: shaper.bps,
                    size: 0,
                },
                committed: dpdk::rte_tm_shaper_rate_size {
                    rate: shaper.bps,
                    size: 0,
                },
                pkt_length_adjust: 0,
            };
            let ret = unsafe {
                dpdk::rte_tm_shaper_profile_add(port_id, shaper.profile_id, &mut params, &mut error)
            };
            if ret != 0 {
                self.rollback();
                return Err(TransportError::Transient(format!(
                    "rte_tm_shaper_profile_add failed for port {}: {}",
                    port_id, ret
                )));
            }
        }

        if !self.root_installed {
            if let Err(e) = self.add_node(ROOT_NODE_ID, u32::MAX, None, &mut error) {
                self.rollback();
                return Err(e);
            }
            if let Err(e) = self.add_node(DEFAULT_NODE_ID, ROOT_NODE_ID, None, &mut error) {
                self.rollback();
                return Err(e);
            }
        }

        for leaf in &self.pending_leaves {
            let node_id = LEAF_BASE_ID + leaf.queue as u32;
            if let Err(e) = self.add_node(node_id, DEFAULT_NODE_ID, Some(leaf.shaper_profile_id), &mut error) {
                self.rollback();
                return Err(e);
            }
        }

        let ret = unsafe { dpdk::rte_tm_hierarchy_commit(port_id, 1, &mut error) };
        if ret != 0 {
            self.rollback();
            return Err(TransportError::Transient(format!(
                "rte_tm_hierarchy_commit failed for port {}: {}",
                port_id, ret
            )));
        }

        self.root_installed = true;
        for shaper in self.pending_shapers.drain(..) {
            self.committed_shapers.insert(ShaperKey(shaper.bps), shaper.profile_id);
        }
        for leaf in self.pending_leaves.drain(..) {
            self.committed_leaves.insert(leaf.queue, leaf.shaper_profile_id);
        }
        Ok(())
    }

    fn add_node(
        &self,
        node_id: u32,
        parent_id: u32,
        shaper_profile_id: Option<u32>,
        error: &mut dpdk::rte_tm_error,
    ) -> Result<(), TransportError> {
        let mut params = dpdk::rte_tm_node_params {
            shaper_profile_id: shaper_profile_id.unwrap_or(u32::MAX),
            n_sp_priorities: 1,
            stats_mask: 0,
        };
        let ret = unsafe {
            dpdk::rte_tm_node_add(self.port.raw(), node_id, parent_id, 0, 1, 0, &mut params, error)
        };
        if ret != 0 {
            return Err(TransportError::Transient(format!(
                "rte_tm_node_add({node_id}) failed for port {}: {}",
                self.port.raw(),
                ret
            )));
        }
        Ok(())
    }

    /// Discards every staged (not yet committed) shaper and leaf.
    pub fn rollback(&mut self) {
        self.pending_shapers.clear();
        self.pending_leaves.clear();
    }

    /// Re-stages every already-committed shaper and leaf and recommits them from scratch.
    /// `rte_tm_hierarchy_commit` does not survive `rte_eth_dev_stop`/`rte_eth_dev_start`, so this
    /// is what a port reset calls to reapply rate-limit state the hardware forgot.
    pub fn replay(&mut self) -> Result<(), TransportError> {
        let shapers: Vec<(u64, u32)> = self.committed_shapers.iter().map(|(k, &id)| (k.0, id)).collect();
        let leaves: Vec<(u16, u32)> = self.committed_leaves.iter().map(|(&q, &id)| (q, id)).collect();

        self.committed_shapers.clear();
        self.committed_leaves.clear();
        self.root_installed = false;

        for (bps, profile_id) in shapers {
            self.pending_shapers.push(PendingShaper { profile_id, bps });
        }
        for (queue, shaper_profile_id) in leaves {
            self.pending_leaves.push(PendingLeaf { queue, shaper_profile_id });
        }
        self.commit()
    }

    pub fn committed_bps(&self, queue: u16) -> Option<u64> {
        let profile_id = *self.committed_leaves.get(&queue)?;
        self.committed_shapers
            .iter()
            .find(|&(_, &id)| id == profile_id)
            .map(|(key, _)| key.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_two_queues_with_the_same_bps_reuses_one_shaper() {
        let mut h = RateLimitHierarchy::new(PortId(0));
        let p1 = h.stage_queue_limit(0, BASELINE_BPS);
        let p2 = h.stage_queue_limit(1, BASELINE_BPS);
        assert_eq!(p1, p2);
        assert_eq!(h.pending_shapers.len(), 1);
        assert_eq!(h.pending_leaves.len(), 2);
    }

    #[test]
    fn rollback_clears_pending_without_touching_committed_state() {
        let mut h = RateLimitHierarchy::new(PortId(0));
        h.stage_queue_limit(0, BASELINE_BPS);
        h.rollback();
        assert!(h.pending_shapers.is_empty());
        assert!(h.pending_leaves.is_empty());
        assert!(h.committed_bps(0).is_none());
    }
}
