//! ST 2110-41 receive session: unpacks opaque data-item chunks carried over RTP.

use std::collections::VecDeque;

use crate::error::TransportError;
use crate::lcore::tasklet::TaskletResult;
use crate::protocols::{fastmetadata, rtp};
use crate::session::queue::PacketSource;
use crate::session::{SessionControl, SessionId, SessionStats};

pub struct RxFastMetadataConfig {
    pub payload_type: u8,
}

pub struct ReceivedItem {
    pub data_item_type: u32,
    pub k_bit: bool,
    pub payload: Vec<u8>,
}

pub struct RxFastMetadataSession {
    id: SessionId,
    cfg: RxFastMetadataConfig,
    source: Box<dyn PacketSource>,
    ready: VecDeque<ReceivedItem>,
    stats: SessionStats,
}

impl RxFastMetadataSession {
    pub fn new(id: SessionId, cfg: RxFastMetadataConfig, source: Box<dyn PacketSource>) -> RxFastMetadataSession {
        RxFastMetadataSession {
            id,
            cfg,
            source,
            ready: VecDeque::new(),
            stats: SessionStats::default(),
        }
    }

    pub fn pop_item(&mut self) -> Option<ReceivedItem> {
        self.ready.pop_front()
    }

    fn handle_packet(&mut self, data: &[u8]) {
        if data.len() < rtp::HEADER_LEN {
            return;
        }
        if data[1] & 0x7f != self.cfg.payload_type {
            return;
        }
        let (header, header_len) = match fastmetadata::FastMetadataHeader::parse(&data[rtp::HEADER_LEN..]) {
            Ok(v) => v,
            Err(_) => {
                self.stats.frames_dropped += 1;
                return;
            }
        };
        let payload_buf = &data[rtp::HEADER_LEN + header_len..];
        let payload = match header.payload(payload_buf) {
            Ok(p) => p.to_vec(),
            Err(_) => {
                self.stats.frames_dropped += 1;
                return;
            }
        };
        self.ready.push_back(ReceivedItem {
            data_item_type: header.data_item_type,
            k_bit: header.k_bit,
            payload,
        });
        self.stats.packets_received += 1;
        self.stats.bytes_received += data.len() as u64;
        self.stats.frames_completed += 1;
    }
}

impl SessionControl for RxFastMetadataSession {
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

    #[test]
    fn parses_item_from_raw_packet() {
        let cfg = RxFastMetadataConfig { payload_type: 100 };
        let mut session = RxFastMetadataSession::new(SessionId(1), cfg, Box::new(VecDequeQueue::new()));
        let mut buf = vec![0u8; rtp::HEADER_LEN + 4 + 4];
        rtp::write_header(&mut buf[..rtp::HEADER_LEN], true, 100, 0, 0, 0);
        fastmetadata::FastMetadataHeader::write(&mut buf[rtp::HEADER_LEN..], 4, 0x42, true);
        buf[rtp::HEADER_LEN + 4..].copy_from_slice(b"data");
        session.handle_packet(&buf);
        let item = session.pop_item().unwrap();
        assert_eq!(item.data_item_type, 0x42);
        assert!(item.k_bit);
        assert_eq!(item.payload, b"data");
    }
}
