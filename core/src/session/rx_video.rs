//! ST 2110-20 receive session: reassembles RFC 4175 payloads into framebuffers and classifies
//! packet timing against SMPTE compliance categories.

use std::collections::VecDeque;

use sha2::{Digest, Sha256};

use crate::error::TransportError;
use crate::lcore::tasklet::TaskletResult;
use crate::protocols::{rfc4175, rtp};
use crate::session::framebuffer::{RxFrameState, RxSlot};
use crate::session::queue::PacketSource;
use crate::session::{SessionControl, SessionId, SessionStats};

/// Classification of one received frame's packet arrival cadence against an ideal schedule,
/// per SMPTE ST 2110-21 compliance categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingCompliance {
    Narrow,
    Wide,
    Fail,
}

pub struct RxVideoConfig {
    pub payload_type: u8,
    pub frame_time_ns: u64,
    pub frame_byte_len: usize,
    pub num_framebuffers: usize,
    /// Extended-sequence-id lag beyond which an arriving packet is dropped as stale.
    pub seq_drop_window: u32,
    pub clock_rate_hz: u32,
    /// Narrow/wide compliance thresholds, in nanoseconds of deviation from the ideal
    /// inter-packet schedule.
    pub narrow_threshold_ns: i64,
    pub wide_threshold_ns: i64,
}

pub struct RxVideoSession {
    id: SessionId,
    cfg: RxVideoConfig,
    source: Box<dyn PacketSource>,
    slots: Vec<RxSlot>,
    active_slot: Option<usize>,
    ready: VecDeque<usize>,
    highest_extended_sequence_seen: u32,
    stats: SessionStats,
    latency_avg_ns: Option<i64>,
    last_packet_arrival_ns: Option<i128>,
    compliance_counts: [u64; 3],
}

impl RxVideoSession {
    pub fn new(id: SessionId, cfg: RxVideoConfig, source: Box<dyn PacketSource>) -> RxVideoSession {
        let num_framebuffers = cfg.num_framebuffers.max(2);
        let capacity = cfg.frame_byte_len;
        RxVideoSession {
            id,
            slots: (0..num_framebuffers).map(|_| RxSlot::new(capacity)).collect(),
            active_slot: None,
            ready: VecDeque::new(),
            highest_extended_sequence_seen: 0,
            stats: SessionStats::default(),
            latency_avg_ns: None,
            last_packet_arrival_ns: None,
            compliance_counts: [0; 3],
            cfg,
            source,
        }
    }

    /// Application API: pops the oldest completed framebuffer, if any.
    pub fn read_frame(&mut self) -> Option<&[u8]> {
        let idx = *self.ready.front()?;
        Some(&self.slots[idx].data[..self.slots[idx].bytes_written])
    }

    /// RTP timestamp of the oldest completed framebuffer, used by the redundancy merger to key
    /// frames from the P and R paths without re-parsing the reassembled payload.
    pub fn ready_timestamp(&self) -> Option<u32> {
        let idx = *self.ready.front()?;
        Some(self.slots[idx].rtp_timestamp)
    }

    pub fn release_frame(&mut self) -> Result<(), TransportError> {
        let idx = self
            .ready
            .pop_front()
            .ok_or_else(|| TransportError::InvalidArgument("no frame to release".to_string()))?;
        self.slots[idx]
            .release()
            .map_err(|e| TransportError::InvalidArgument(e.to_string()))
    }

    fn free_slot(&mut self) -> Option<usize> {
        self.slots.iter().position(|s| s.state == RxFrameState::Free)
    }

    fn classify_arrival(&mut self, arrival_ns: i128, n_packets_in_frame: u32) -> TimingCompliance {
        let ideal_interval = self.cfg.frame_time_ns as i128 / n_packets_in_frame.max(1) as i128;
        let compliance = match self.last_packet_arrival_ns {
            None => TimingCompliance::Narrow,
            Some(prev) => {
                let delta = (arrival_ns - prev - ideal_interval).unsigned_abs() as i64;
                if delta <= self.cfg.narrow_threshold_ns {
                    TimingCompliance::Narrow
                } else if delta <= self.cfg.wide_threshold_ns {
                    TimingCompliance::Wide
                } else {
                    TimingCompliance::Fail
                }
            }
        };
        self.last_packet_arrival_ns = Some(arrival_ns);
        let bucket = match compliance {
            TimingCompliance::Narrow => 0,
            TimingCompliance::Wide => 1,
            TimingCompliance::Fail => 2,
        };
        self.compliance_counts[bucket] += 1;
        compliance
    }

    pub fn compliance_counts(&self) -> [u64; 3] {
        self.compliance_counts
    }

    /// Processes one arrived packet. `ptp_now_ns` is used to compute RX latency when provided.
    fn handle_packet(&mut self, data: &[u8], arrival_ns: i128, ptp_now_ns: Option<i128>) {
        if data.len() < rtp::HEADER_LEN {
            return;
        }
        // Manual field extraction mirroring `rtp::write_header`'s layout; the RX path works on
        // raw bytes rather than the `Mbuf`-backed `Rtp<'a>` parser since packets here arrive
        // through the session-level `PacketSource` abstraction, not a zero-copy mbuf chain.
        let payload_type = data[1] & 0x7f;
        if payload_type != self.cfg.payload_type {
            return;
        }
        let marker = data[1] & 0x80 != 0;
        let sequence_number = u16::from_be_bytes([data[2], data[3]]);
        let rtp_timestamp = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);

        let (header, header_len) = match rfc4175::Rfc4175Header::parse(&data[rtp::HEADER_LEN..], 4) {
            Ok(v) => v,
            Err(_) => return,
        };
        let payload = &data[rtp::HEADER_LEN + header_len..];

        let extended = ((header.extended_sequence_number as u32) << 16) | sequence_number as u32;
        if extended + self.cfg.seq_drop_window < self.highest_extended_sequence_seen {
            self.stats.frames_dropped += 1;
            return;
        }
        if extended > self.highest_extended_sequence_seen {
            self.highest_extended_sequence_seen = extended;
        }

        if self.active_slot.is_none() {
            if let Some(idx) = self.free_slot() {
                self.slots[idx].begin(rtp_timestamp, arrival_ns).ok();
                self.active_slot = Some(idx);
            } else {
                self.stats.frames_dropped += 1;
                return;
            }
        }
        let idx = self.active_slot.unwrap();
        if self.slots[idx].rtp_timestamp != rtp_timestamp {
            // A new frame started before the previous one completed; force-complete it.
            self.complete_active_frame();
            if let Some(new_idx) = self.free_slot() {
                self.slots[new_idx].begin(rtp_timestamp, arrival_ns).ok();
                self.active_slot = Some(new_idx);
            } else {
                self.stats.frames_dropped += 1;
                self.active_slot = None;
                return;
            }
        }
        let idx = self.active_slot.unwrap();
        for srd in &header.srds {
            let start = srd.offset as usize;
            let end = start + srd.length as usize;
            if end <= self.slots[idx].data.len() {
                let slice_len = srd.length as usize;
                if slice_len <= payload.len() {
                    self.slots[idx].data[start..end].copy_from_slice(&payload[..slice_len]);
                    self.slots[idx].bytes_written = self.slots[idx].bytes_written.max(end);
                }
            }
        }
        self.slots[idx].highest_sequence_seen = extended;
        if marker {
            self.slots[idx].marker_seen = true;
            // The marker packet carries the frame's SHA-256 as a trailer just past the bytes its
            // SRD chain describes (see `tx_video.rs::packetize_current_frame`).
            let described_len: usize = header.srds.iter().map(|s| s.length as usize).sum();
            if payload.len() >= described_len + 32 {
                let mut digest = [0u8; 32];
                digest.copy_from_slice(&payload[described_len..described_len + 32]);
                self.slots[idx].embedded_digest = Some(digest);
            }
        }
        self.stats.packets_received += 1;
        self.stats.bytes_received += data.len() as u64;
        let approx_n_packets = (self.cfg.frame_byte_len / payload.len().max(1)).max(1) as u32;
        self.classify_arrival(arrival_ns, approx_n_packets);

        if let Some(now) = ptp_now_ns {
            let rtp_ns = (rtp_timestamp as i128 * 1_000_000_000) / self.cfg.clock_rate_hz as i128;
            let sample = (now - rtp_ns) as i64;
            self.latency_avg_ns = Some(match self.latency_avg_ns {
                Some(avg) => avg + (sample - avg) / 8,
                None => sample,
            });
        }

        let elapsed = arrival_ns - self.slots[idx].first_packet_arrival_ns;
        if self.slots[idx].marker_seen || elapsed as u64 >= self.cfg.frame_time_ns {
            self.complete_active_frame();
        }
    }

    fn complete_active_frame(&mut self) {
        if let Some(idx) = self.active_slot.take() {
            if let Some(expected) = self.slots[idx].embedded_digest {
                let bytes_written = self.slots[idx].bytes_written;
                let actual: [u8; 32] = Sha256::digest(&self.slots[idx].data[..bytes_written]).into();
                if actual == expected {
                    self.stats.frames_digest_verified += 1;
                } else {
                    self.stats.frames_digest_mismatched += 1;
                }
            }
            if self.slots[idx].complete().is_ok() {
                self.stats.frames_completed += 1;
                self.ready.push_back(idx);
            }
        }
    }
}

impl SessionControl for RxVideoSession {
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
            self.handle_packet(&data, arrival_ns, None);
            progressed = true;
        }
        if progressed {
            TaskletResult::Pending
        } else {
            TaskletResult::AllDone
        }
    }

    fn stats(&self) -> SessionStats {
        let mut stats = self.stats.clone();
        stats.rx_latency_ns_avg = self.latency_avg_ns;
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::rtp;
    use crate::session::queue::VecDequeQueue;

    fn push_packet(
        q: &mut VecDequeQueue,
        seq: u16,
        ts: u32,
        marker: bool,
        offset: u16,
        payload: &[u8],
        arrival_ns: i128,
    ) {
        let mut buf = vec![0u8; rtp::HEADER_LEN + 8 + payload.len()];
        rtp::write_header(&mut buf[..rtp::HEADER_LEN], marker, 96, seq, ts, 0xabcd);
        let srd = rfc4175::SampleRowData {
            length: payload.len() as u16,
            field_id: false,
            line_number: 0,
            offset,
        };
        rfc4175::Rfc4175Header::write_single(&mut buf[rtp::HEADER_LEN..], 0, srd);
        buf[rtp::HEADER_LEN + 8..].copy_from_slice(payload);
        q.pending_recv.push_back((buf, arrival_ns));
    }

    fn test_session() -> RxVideoSession {
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
        let source = Box::new(VecDequeQueue::new());
        RxVideoSession::new(SessionId(1), cfg, source)
    }

    #[test]
    fn reassembles_frame_and_completes_on_marker() {
        let mut session = test_session();
        let mut q = VecDequeQueue::new();
        push_packet(&mut q, 0, 1000, false, 0, &[1, 2, 3, 4, 5, 6, 7, 8], 0);
        push_packet(&mut q, 1, 1000, true, 8, &[9, 10, 11, 12, 13, 14, 15, 16], 100);
        session.source = Box::new(q);

        assert_eq!(session.tasklet_tick(), TaskletResult::Pending);
        assert_eq!(session.stats().frames_completed, 1);
        let frame = session.read_frame().unwrap().to_vec();
        assert_eq!(frame, (1..=16).collect::<Vec<u8>>());
    }

    #[test]
    fn marker_packet_digest_trailer_verifies_against_reassembled_frame() {
        let mut session = test_session();
        let mut q = VecDequeQueue::new();
        push_packet(&mut q, 0, 2000, false, 0, &[1, 2, 3, 4, 5, 6, 7, 8], 0);

        let frame: Vec<u8> = (1..=16).collect();
        let digest: [u8; 32] = Sha256::digest(&frame).into();
        let tail = &frame[8..16];
        let mut buf = vec![0u8; rtp::HEADER_LEN + 8 + tail.len() + 32];
        rtp::write_header(&mut buf[..rtp::HEADER_LEN], true, 96, 1, 2000, 0xabcd);
        let srd = rfc4175::SampleRowData {
            length: tail.len() as u16,
            field_id: false,
            line_number: 0,
            offset: 8,
        };
        rfc4175::Rfc4175Header::write_single(&mut buf[rtp::HEADER_LEN..], 0, srd);
        let payload_start = rtp::HEADER_LEN + 8;
        buf[payload_start..payload_start + tail.len()].copy_from_slice(tail);
        buf[payload_start + tail.len()..].copy_from_slice(&digest);
        q.pending_recv.push_back((buf, 100));
        session.source = Box::new(q);

        assert_eq!(session.tasklet_tick(), TaskletResult::Pending);
        assert_eq!(session.stats().frames_digest_verified, 1);
        assert_eq!(session.stats().frames_digest_mismatched, 0);
    }

    #[test]
    fn marker_packet_digest_mismatch_is_counted_not_dropped() {
        let mut session = test_session();
        let mut q = VecDequeQueue::new();
        push_packet(&mut q, 0, 3000, false, 0, &[1, 2, 3, 4, 5, 6, 7, 8], 0);

        let tail = [9u8, 10, 11, 12, 13, 14, 15, 16];
        let bogus_digest = [0xffu8; 32];
        let mut buf = vec![0u8; rtp::HEADER_LEN + 8 + tail.len() + 32];
        rtp::write_header(&mut buf[..rtp::HEADER_LEN], true, 96, 1, 3000, 0xabcd);
        let srd = rfc4175::SampleRowData {
            length: tail.len() as u16,
            field_id: false,
            line_number: 0,
            offset: 8,
        };
        rfc4175::Rfc4175Header::write_single(&mut buf[rtp::HEADER_LEN..], 0, srd);
        let payload_start = rtp::HEADER_LEN + 8;
        buf[payload_start..payload_start + tail.len()].copy_from_slice(&tail);
        buf[payload_start + tail.len()..].copy_from_slice(&bogus_digest);
        q.pending_recv.push_back((buf, 100));
        session.source = Box::new(q);

        assert_eq!(session.tasklet_tick(), TaskletResult::Pending);
        assert_eq!(session.stats().frames_completed, 1);
        assert_eq!(session.stats().frames_digest_mismatched, 1);
    }

    #[test]
    fn drops_stale_packet_behind_highwater() {
        let mut session = test_session();
        session.highest_extended_sequence_seen = 100;
        session.handle_packet(
            &{
                let mut buf = vec![0u8; rtp::HEADER_LEN + 8];
                rtp::write_header(&mut buf[..rtp::HEADER_LEN], false, 96, 10, 1000, 0xabcd);
                let srd = rfc4175::SampleRowData {
                    length: 0,
                    field_id: false,
                    line_number: 0,
                    offset: 0,
                };
                rfc4175::Rfc4175Header::write_single(&mut buf[rtp::HEADER_LEN..], 0, srd);
                buf
            },
            0,
            None,
        );
        assert_eq!(session.stats().frames_dropped, 1);
    }
}
