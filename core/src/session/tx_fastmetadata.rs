//! ST 2110-41 transmit session: opaque data-item chunks over RTP, reusing the TX video module's
//! framebuffer state machine and pacing engine.

use crate::error::TransportError;
use crate::lcore::tasklet::TaskletResult;
use crate::protocols::{fastmetadata, rtp};
use crate::session::framebuffer::{TxFrameState, TxSlot};
use crate::session::pacing::{PacingEngine, PacingMode};
use crate::session::queue::PacketSink;
use crate::session::{SessionControl, SessionId, SessionStats};

pub struct TxFastMetadataConfig {
    pub payload_type: u8,
    pub ssrc: u32,
    pub data_item_type: u32,
    pub pacing_mode: PacingMode,
    pub item_interval_ns: u64,
    pub num_framebuffers: usize,
}

impl Default for TxFastMetadataConfig {
    fn default() -> Self {
        TxFastMetadataConfig {
            payload_type: 100,
            ssrc: 0,
            data_item_type: 0,
            pacing_mode: PacingMode::BestEffort,
            item_interval_ns: 1_000_000,
            num_framebuffers: 4,
        }
    }
}

pub struct TxFastMetadataSession {
    id: SessionId,
    cfg: TxFastMetadataConfig,
    pacing: PacingEngine,
    slots: Vec<TxSlot>,
    write_cursor: usize,
    send_cursor: usize,
    sequence_number: u16,
    sink: Option<Box<dyn PacketSink>>,
    stats: SessionStats,
}

impl TxFastMetadataSession {
    pub fn new(id: SessionId, cfg: TxFastMetadataConfig) -> TxFastMetadataSession {
        let pacing = PacingEngine::new(cfg.pacing_mode, cfg.item_interval_ns, 1);
        let num_framebuffers = cfg.num_framebuffers.max(2);
        TxFastMetadataSession {
            id,
            slots: (0..num_framebuffers).map(|_| TxSlot::new(256)).collect(),
            pacing,
            write_cursor: 0,
            send_cursor: 0,
            sequence_number: 0,
            sink: None,
            stats: SessionStats::default(),
            cfg,
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn PacketSink>) -> TxFastMetadataSession {
        self.sink = Some(sink);
        self
    }

    pub fn write_item(&mut self, data: &[u8], k_bit: bool) -> Result<(), TransportError> {
        let idx = self.write_cursor;
        if self.slots[idx].state != TxFrameState::Free {
            return Err(TransportError::ResourceExhausted(
                "no free TX fast-metadata framebuffer slot".to_string(),
            ));
        }
        let padded = fastmetadata::padded_len(data.len());
        let mut buf = vec![0u8; 4 + padded];
        fastmetadata::FastMetadataHeader::write(&mut buf, data.len() as u16, self.cfg.data_item_type, k_bit);
        buf[4..4 + data.len()].copy_from_slice(data);
        self.slots[idx].data = buf;
        self.slots[idx].mark_ready().map_err(|e| TransportError::InvalidArgument(e.to_string()))?;
        self.write_cursor = (self.write_cursor + 1) % self.slots.len();
        Ok(())
    }

    pub fn tick(&mut self, now_ns: i128) -> TaskletResult {
        let idx = self.send_cursor;
        if self.slots[idx].state != TxFrameState::Ready {
            return TaskletResult::AllDone;
        }
        let epoch = self.pacing.next_epoch_ns(now_ns);
        if self.cfg.pacing_mode != PacingMode::BestEffort && now_ns < epoch {
            return TaskletResult::AllDone;
        }
        let Some(sink) = self.sink.as_mut() else {
            return TaskletResult::AllDone;
        };
        self.slots[idx].mark_transmitting().ok();
        let payload = self.slots[idx].data.clone();
        let mut buf = vec![0u8; rtp::HEADER_LEN + payload.len()];
        rtp::write_header(
            &mut buf[..rtp::HEADER_LEN],
            true,
            self.cfg.payload_type,
            self.sequence_number,
            0,
            self.cfg.ssrc,
        );
        buf[rtp::HEADER_LEN..].copy_from_slice(&payload);
        match sink.send(&buf) {
            Ok(true) => {
                self.sequence_number = self.sequence_number.wrapping_add(1);
                self.stats.packets_sent += 1;
                self.stats.bytes_sent += buf.len() as u64;
                self.stats.frames_completed += 1;
                self.slots[idx].mark_free().ok();
                self.send_cursor = (self.send_cursor + 1) % self.slots.len();
                TaskletResult::Pending
            }
            Ok(false) => TaskletResult::AllDone,
            Err(_) => TaskletResult::AllDone,
        }
    }
}

impl SessionControl for TxFastMetadataSession {
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
        TaskletResult::AllDone
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
    fn write_then_tick_sends_one_item() {
        let mut session =
            TxFastMetadataSession::new(SessionId(1), TxFastMetadataConfig::default())
                .with_sink(Box::new(VecDequeQueue::new()));
        session.write_item(b"hello", true).unwrap();
        assert_eq!(session.tick(0), TaskletResult::Pending);
        assert_eq!(session.stats().packets_sent, 1);
    }
}
