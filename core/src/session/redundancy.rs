//! ST 2022-7 seamless redundancy: merges two single-port RX video sessions (primary/secondary
//! paths) into one delivered frame stream, deduplicating by RTP timestamp.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::TransportError;
use crate::lcore::tasklet::TaskletResult;
use crate::session::rx_video::RxVideoSession;
use crate::session::{SessionControl, SessionId, SessionStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedundantPort {
    Primary,
    Secondary,
}

struct PartialFrame {
    arrived_p: bool,
    arrived_r: bool,
    first_seen_ns: i128,
}

pub struct RedundancyConfig {
    pub reorder_window_ns: i128,
}

/// Merges frames arriving on the P and R paths, delivering the first copy to complete and
/// evicting partial entries once they age past the reorder window.
pub struct RedundantSession {
    id: SessionId,
    cfg: RedundancyConfig,
    primary: RxVideoSession,
    secondary: RxVideoSession,
    partial: HashMap<u32, PartialFrame>,
    gaps_primary: u64,
    gaps_secondary: u64,
    stats: SessionStats,
}

impl RedundantSession {
    pub fn new(
        id: SessionId,
        cfg: RedundancyConfig,
        primary: RxVideoSession,
        secondary: RxVideoSession,
    ) -> RedundantSession {
        RedundantSession {
            id,
            cfg,
            primary,
            secondary,
            partial: HashMap::new(),
            gaps_primary: 0,
            gaps_secondary: 0,
            stats: SessionStats::default(),
        }
    }

    /// Notes that `port` delivered a frame carrying `rtp_timestamp`, merging it with any partial
    /// entry already tracked for that timestamp. Returns `true` the first time this timestamp
    /// completes (i.e. the frame should be delivered downstream).
    fn observe(&mut self, port: RedundantPort, rtp_timestamp: u32, now_ns: i128) -> bool {
        let entry = self.partial.entry(rtp_timestamp).or_insert(PartialFrame {
            arrived_p: false,
            arrived_r: false,
            first_seen_ns: now_ns,
        });
        let was_complete = entry.arrived_p || entry.arrived_r;
        match port {
            RedundantPort::Primary => entry.arrived_p = true,
            RedundantPort::Secondary => entry.arrived_r = true,
        }
        !was_complete
    }

    fn evict_stale(&mut self, now_ns: i128) {
        let window = self.cfg.reorder_window_ns;
        let primary = &mut self.gaps_primary;
        let secondary = &mut self.gaps_secondary;
        self.partial.retain(|_, entry| {
            let stale = now_ns - entry.first_seen_ns > window;
            if stale {
                if !entry.arrived_p {
                    *primary += 1;
                }
                if !entry.arrived_r {
                    *secondary += 1;
                }
            }
            !stale
        });
    }

    pub fn path_gap_counts(&self) -> (u64, u64) {
        (self.gaps_primary, self.gaps_secondary)
    }

    fn now_ns() -> i128 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i128)
            .unwrap_or(0)
    }
}

impl SessionControl for RedundantSession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn start(&mut self) -> Result<(), TransportError> {
        self.primary.start()?;
        self.secondary.start()?;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), TransportError> {
        self.primary.stop()?;
        self.secondary.stop()
    }

    fn tasklet_tick(&mut self) -> TaskletResult {
        let p_result = self.primary.tasklet_tick();
        let r_result = self.secondary.tasklet_tick();

        let now_ns = Self::now_ns();
        let mut delivered = 0u64;
        while let Some(rtp_timestamp) = self.primary.ready_timestamp() {
            self.primary.release_frame().ok();
            if self.observe(RedundantPort::Primary, rtp_timestamp, now_ns) {
                delivered += 1;
            }
        }
        while let Some(rtp_timestamp) = self.secondary.ready_timestamp() {
            self.secondary.release_frame().ok();
            if self.observe(RedundantPort::Secondary, rtp_timestamp, now_ns) {
                delivered += 1;
            }
        }
        self.stats.frames_completed += delivered;
        self.evict_stale(now_ns);

        if p_result == TaskletResult::Pending || r_result == TaskletResult::Pending || delivered > 0 {
            TaskletResult::Pending
        } else {
            TaskletResult::AllDone
        }
    }

    fn stats(&self) -> SessionStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::rx_video::RxVideoConfig;
    use crate::session::queue::VecDequeQueue;

    fn video_session(id: u64) -> RxVideoSession {
        let cfg = RxVideoConfig {
            payload_type: 96,
            frame_time_ns: 1_000_000,
            frame_byte_len: 16,
            num_framebuffers: 2,
            seq_drop_window: 5,
            clock_rate_hz: 90_000,
            narrow_threshold_ns: 1_000,
            wide_threshold_ns: 10_000,
        };
        RxVideoSession::new(SessionId(id), cfg, Box::new(VecDequeQueue::new()))
    }

    #[test]
    fn second_path_for_same_timestamp_does_not_double_deliver() {
        let mut session = RedundantSession::new(
            SessionId(1),
            RedundancyConfig {
                reorder_window_ns: 10_000_000,
            },
            video_session(2),
            video_session(3),
        );
        assert!(session.observe(RedundantPort::Primary, 1000, 0));
        assert!(!session.observe(RedundantPort::Secondary, 1000, 0));
    }

    #[test]
    fn stale_partial_entries_count_as_gaps() {
        let mut session = RedundantSession::new(
            SessionId(1),
            RedundancyConfig {
                reorder_window_ns: 100,
            },
            video_session(2),
            video_session(3),
        );
        session.observe(RedundantPort::Primary, 1000, 0);
        session.evict_stale(1_000);
        assert_eq!(session.path_gap_counts(), (0, 1));
    }
}
