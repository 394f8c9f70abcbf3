//! ST 2110-30 receive session. Per-packet path mirrors RX video but framebuffers aggregate by
//! ptime instead of by RFC 4175 SRD chain, and statistics report EBU R128-adjacent compliance
//! metrics rather than a frame-timing classifier.

use std::collections::VecDeque;

use crate::error::TransportError;
use crate::lcore::tasklet::TaskletResult;
use crate::protocols::rtp;
use crate::session::queue::PacketSource;
use crate::session::{SessionControl, SessionId, SessionStats};

pub struct RxAudioConfig {
    pub payload_type: u8,
    pub ptime_ns: u64,
    pub sampling_rate_hz: u32,
    /// "Narrow"/"wide" thresholds for the delta-packet-vs-RTP metric, in nanoseconds.
    pub narrow_threshold_ns: i64,
    pub wide_threshold_ns: i64,
}

/// EBU-style compliance classes for the "Delta Packet vs. RTP" and "Timestamped Delay Factor"
/// statistics, computed per rolling window of 1000 packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EbuCompliance {
    Narrow,
    Wide,
    Fail,
}

#[derive(Debug, Default, Clone)]
pub struct EbuReport {
    pub delta_packet_vs_rtp_avg_ns: f64,
    pub timestamped_delay_factor_avg_ns: f64,
    pub window_packet_count: u32,
}

pub struct RxAudioSession {
    id: SessionId,
    cfg: RxAudioConfig,
    source: Box<dyn PacketSource>,
    ready: VecDeque<Vec<u8>>,
    last_arrival_ns: Option<i128>,
    last_rtp_ns: Option<i128>,
    window_delta_sum_ns: i64,
    window_tdf_sum_ns: i64,
    window_count: u32,
    last_report: EbuReport,
    stats: SessionStats,
}

impl RxAudioSession {
    pub fn new(id: SessionId, cfg: RxAudioConfig, source: Box<dyn PacketSource>) -> RxAudioSession {
        RxAudioSession {
            id,
            cfg,
            source,
            ready: VecDeque::new(),
            last_arrival_ns: None,
            last_rtp_ns: None,
            window_delta_sum_ns: 0,
            window_tdf_sum_ns: 0,
            window_count: 0,
            last_report: EbuReport::default(),
            stats: SessionStats::default(),
        }
    }

    pub fn pop_packet(&mut self) -> Option<Vec<u8>> {
        self.ready.pop_front()
    }

    pub fn last_report(&self) -> EbuReport {
        self.last_report.clone()
    }

    fn handle_packet(&mut self, data: &[u8], arrival_ns: i128) {
        if data.len() < rtp::HEADER_LEN {
            return;
        }
        let payload_type = data[1] & 0x7f;
        if payload_type != self.cfg.payload_type {
            return;
        }
        let rtp_timestamp = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let rtp_ns = (rtp_timestamp as i128 * 1_000_000_000) / self.cfg.sampling_rate_hz as i128;

        if let (Some(prev_arrival), Some(prev_rtp)) = (self.last_arrival_ns, self.last_rtp_ns) {
            let delta_packet_vs_rtp = (arrival_ns - prev_arrival) - (rtp_ns - prev_rtp);
            let tdf = arrival_ns - rtp_ns;
            self.window_delta_sum_ns += delta_packet_vs_rtp as i64;
            self.window_tdf_sum_ns += tdf as i64;
            self.window_count += 1;
            if self.window_count >= 1000 {
                self.flush_window();
            }
        }
        self.last_arrival_ns = Some(arrival_ns);
        self.last_rtp_ns = Some(rtp_ns);

        self.ready.push_back(data[rtp::HEADER_LEN..].to_vec());
        self.stats.packets_received += 1;
        self.stats.bytes_received += data.len() as u64;
        self.stats.frames_completed += 1;
    }

    fn flush_window(&mut self) {
        self.last_report = EbuReport {
            delta_packet_vs_rtp_avg_ns: self.window_delta_sum_ns as f64 / self.window_count as f64,
            timestamped_delay_factor_avg_ns: self.window_tdf_sum_ns as f64 / self.window_count as f64,
            window_packet_count: self.window_count,
        };
        self.window_delta_sum_ns = 0;
        self.window_tdf_sum_ns = 0;
        self.window_count = 0;
    }

    pub fn classify(&self, report: &EbuReport) -> EbuCompliance {
        let delta = report.delta_packet_vs_rtp_avg_ns.abs() as i64;
        if delta <= self.cfg.narrow_threshold_ns {
            EbuCompliance::Narrow
        } else if delta <= self.cfg.wide_threshold_ns {
            EbuCompliance::Wide
        } else {
            EbuCompliance::Fail
        }
    }
}

impl SessionControl for RxAudioSession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn start(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn stop(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn tasklet_tick(&mut self) -> TaskletResult {
        let mut progressed = false;
        while let Some((data, arrival_ns)) = self.source.try_recv() {
            self.handle_packet(&data, arrival_ns);
            progressed = true;
        }
        if progressed {
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
    use crate::session::queue::VecDequeQueue;

    fn test_session() -> RxAudioSession {
        let cfg = RxAudioConfig {
            payload_type: 97,
            ptime_ns: 1_000_000,
            sampling_rate_hz: 48_000,
            narrow_threshold_ns: 1_000,
            wide_threshold_ns: 10_000,
        };
        RxAudioSession::new(SessionId(1), cfg, Box::new(VecDequeQueue::new()))
    }

    #[test]
    fn handle_packet_pushes_payload_and_counts_stats() {
        let mut session = test_session();
        let mut buf = vec![0u8; rtp::HEADER_LEN + 6];
        rtp::write_header(&mut buf[..rtp::HEADER_LEN], true, 97, 0, 0, 0x99);
        session.handle_packet(&buf, 0);
        assert_eq!(session.stats().packets_received, 1);
        assert!(session.pop_packet().is_some());
    }

    #[test]
    fn window_flush_produces_a_report_after_1000_packets() {
        let mut session = test_session();
        for i in 0..1001u32 {
            let mut buf = vec![0u8; rtp::HEADER_LEN];
            rtp::write_header(&mut buf, true, 97, i as u16, i * 48, 0x1);
            session.handle_packet(&buf, i as i128 * 1_000_000);
        }
        assert_eq!(session.last_report().window_packet_count, 1000);
    }
}
