//! ST 2110-40 receive session: unpacks RFC 8331 ANC subpackets carried over RTP.

use std::collections::VecDeque;

use crate::error::TransportError;
use crate::lcore::tasklet::TaskletResult;
use crate::protocols::rtp;
use crate::session::queue::PacketSource;
use crate::session::{SessionControl, SessionId, SessionStats};

pub struct RxAncillaryConfig {
    pub payload_type: u8,
}

#[derive(Debug, Clone)]
pub struct ReceivedAncItem {
    pub line_number: u16,
    pub horizontal_offset: u16,
    pub did: u16,
    pub sdid: u16,
    pub user_data_words: Vec<u16>,
    pub checksum_valid: bool,
}

pub struct RxAncillarySession {
    id: SessionId,
    cfg: RxAncillaryConfig,
    source: Box<dyn PacketSource>,
    ready: VecDeque<Vec<ReceivedAncItem>>,
    stats: SessionStats,
}

impl RxAncillarySession {
    pub fn new(id: SessionId, cfg: RxAncillaryConfig, source: Box<dyn PacketSource>) -> RxAncillarySession {
        RxAncillarySession {
            id,
            cfg,
            source,
            ready: VecDeque::new(),
            stats: SessionStats::default(),
        }
    }

    pub fn pop_frame(&mut self) -> Option<Vec<ReceivedAncItem>> {
        self.ready.pop_front()
    }

    fn handle_packet(&mut self, data: &[u8]) {
        if data.len() < rtp::HEADER_LEN + 2 {
            return;
        }
        if data[1] & 0x7f != self.cfg.payload_type {
            return;
        }
        let mut offset = rtp::HEADER_LEN + 2;
        let mut items = Vec::new();
        while offset + 9 <= data.len() {
            let line_number = u16::from_be_bytes([data[offset], data[offset + 1]]);
            let horizontal_offset = u16::from_be_bytes([data[offset + 2], data[offset + 3]]);
            let did = u16::from_be_bytes([data[offset + 4], data[offset + 5]]);
            let sdid = u16::from_be_bytes([data[offset + 6], data[offset + 7]]);
            let data_count = u16::from_be_bytes([data[offset + 8], data[offset + 9]]);
            offset += 10;
            let mut words = Vec::with_capacity(data_count as usize);
            for _ in 0..data_count {
                if offset + 2 > data.len() {
                    break;
                }
                words.push(u16::from_be_bytes([data[offset], data[offset + 1]]));
                offset += 2;
            }
            if offset + 2 > data.len() {
                break;
            }
            let checksum = u16::from_be_bytes([data[offset], data[offset + 1]]);
            offset += 2;
            let expected = crate::protocols::rfc8331::compute_checksum(did, sdid, data_count, &words);
            items.push(ReceivedAncItem {
                line_number,
                horizontal_offset,
                did,
                sdid,
                user_data_words: words,
                checksum_valid: checksum == expected,
            });
        }
        if items.is_empty() {
            self.stats.frames_dropped += 1;
            return;
        }
        self.stats.packets_received += 1;
        self.stats.bytes_received += data.len() as u64;
        self.stats.frames_completed += 1;
        self.ready.push_back(items);
    }
}

impl SessionControl for RxAncillarySession {
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
        while let Some((data, _arrival_ns)) = self.source.try_recv() {
            self.handle_packet(&data);
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
    use crate::session::tx_ancillary::{AncItem, TxAncillaryConfig, TxAncillarySession};
    use crate::session::pacing::PacingMode;

    #[test]
    fn round_trips_packet_built_by_tx_ancillary() {
        let tx_cfg = TxAncillaryConfig {
            payload_type: 100,
            ssrc: 1,
            frame_time_ns: 1_000_000,
            pacing_mode: PacingMode::BestEffort,
            num_framebuffers: 2,
            split_anc_by_packet: false,
            redundant_delay_ns: 0,
        };
        let sink = Box::new(VecDequeQueue::new());
        let tx = TxAncillarySession::new(SessionId(1), tx_cfg, sink, None);
        let packet = tx.build_packet(
            &[AncItem {
                line_number: 5,
                horizontal_offset: 0,
                did: 0x61,
                sdid: 0x01,
                user_data_words: vec![10, 20, 30],
            }],
            0,
        );

        let cfg = RxAncillaryConfig { payload_type: 100 };
        let mut rx = RxAncillarySession::new(SessionId(2), cfg, Box::new(VecDequeQueue::new()));
        rx.handle_packet(&packet);
        let items = rx.pop_frame().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].did, 0x61);
        assert!(items[0].checksum_valid);
    }
}
