//! ST 2110-30 transmit session: PCM/AM824 audio over RTP, reusing the TX video module's
//! framebuffer state machine and pacing engine parameterized by ptime-derived frame size.

use crate::error::TransportError;
use crate::lcore::tasklet::TaskletResult;
use crate::protocols::{aes67, rtp};
use crate::session::framebuffer::{TxFrameState, TxSlot};
use crate::session::pacing::{PacingEngine, PacingMode};
use crate::session::queue::PacketSink;
use crate::session::{SessionControl, SessionId, SessionStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioEncoding {
    Pcm16,
    Pcm24,
    Am824,
}

#[derive(Debug, Clone, Copy)]
pub struct AudioFormat {
    pub sampling_rate_hz: u32,
    pub channels: u16,
    pub encoding: AudioEncoding,
    /// Packet cadence, in microseconds (80 us - 4 ms for ST 2110-30).
    pub ptime_us: u32,
}

impl AudioFormat {
    fn bytes_per_sample(&self) -> usize {
        match self.encoding {
            AudioEncoding::Pcm16 => 2,
            AudioEncoding::Pcm24 => 3,
            AudioEncoding::Am824 => 4,
        }
    }

    pub fn samples_per_packet(&self) -> u32 {
        ((self.sampling_rate_hz as u64 * self.ptime_us as u64) / 1_000_000) as u32
    }

    pub fn packet_payload_len(&self) -> usize {
        self.samples_per_packet() as usize * self.channels as usize * self.bytes_per_sample()
    }
}

pub struct TxAudioConfig {
    pub format: AudioFormat,
    pub payload_type: u8,
    pub ssrc: u32,
    pub pacing_mode: PacingMode,
    pub num_framebuffers: usize,
}

pub struct TxAudioSession {
    id: SessionId,
    cfg: TxAudioConfig,
    pacing: PacingEngine,
    slots: Vec<TxSlot>,
    write_cursor: usize,
    send_cursor: usize,
    sequence_number: u16,
    sink: Box<dyn PacketSink>,
    stats: SessionStats,
}

impl TxAudioSession {
    pub fn new(id: SessionId, cfg: TxAudioConfig, sink: Box<dyn PacketSink>) -> TxAudioSession {
        let frame_time_ns = cfg.format.ptime_us as u64 * 1000;
        let pacing = PacingEngine::new(cfg.pacing_mode, frame_time_ns, 1);
        let num_framebuffers = cfg.num_framebuffers.max(2);
        let capacity = cfg.format.packet_payload_len();
        TxAudioSession {
            id,
            slots: (0..num_framebuffers).map(|_| TxSlot::new(capacity)).collect(),
            pacing,
            write_cursor: 0,
            send_cursor: 0,
            sequence_number: 0,
            sink,
            stats: SessionStats::default(),
            cfg,
        }
    }

    /// Writes one ptime-worth of interleaved PCM samples (already packed by the caller via
    /// [`crate::protocols::aes67`] helpers).
    pub fn write_packet(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let idx = self.write_cursor;
        if self.slots[idx].state != TxFrameState::Free {
            return Err(TransportError::ResourceExhausted(
                "no free TX audio framebuffer slot".to_string(),
            ));
        }
        self.slots[idx].data.clear();
        self.slots[idx].data.extend_from_slice(data);
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
        self.slots[idx].mark_transmitting().ok();
        let rtp_ts = ((epoch as i64 as i128 * self.cfg.format.sampling_rate_hz as i128)
            / 1_000_000_000) as u32;
        let payload = self.slots[idx].data.clone();
        let mut buf = vec![0u8; rtp::HEADER_LEN + payload.len()];
        rtp::write_header(
            &mut buf[..rtp::HEADER_LEN],
            true,
            self.cfg.payload_type,
            self.sequence_number,
            rtp_ts,
            self.cfg.ssrc,
        );
        buf[rtp::HEADER_LEN..].copy_from_slice(&payload);
        match self.sink.send(&buf) {
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
            Err(err) => {
                if err.is_transient() {
                    self.stats.rate_limit_fallback = true;
                }
                TaskletResult::AllDone
            }
        }
    }
}

impl SessionControl for TxAudioSession {
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

    fn test_session() -> TxAudioSession {
        let format = AudioFormat {
            sampling_rate_hz: 48_000,
            channels: 2,
            encoding: AudioEncoding::Pcm24,
            ptime_us: 1000,
        };
        let cfg = TxAudioConfig {
            format,
            payload_type: 97,
            ssrc: 0x55,
            pacing_mode: PacingMode::BestEffort,
            num_framebuffers: 2,
        };
        TxAudioSession::new(SessionId(1), cfg, Box::new(VecDequeQueue::new()))
    }

    #[test]
    fn samples_per_packet_matches_ptime() {
        let session = test_session();
        assert_eq!(session.cfg.format.samples_per_packet(), 48);
    }

    #[test]
    fn tick_sends_written_packet() {
        let mut session = test_session();
        let len = session.cfg.format.packet_payload_len();
        session.write_packet(&vec![9u8; len]).unwrap();
        assert_eq!(session.tick(0), TaskletResult::Pending);
        assert_eq!(session.stats().packets_sent, 1);
    }

    #[test]
    fn aes67_helper_round_trips_into_written_packet() {
        let mut session = test_session();
        let samples_per_packet = session.cfg.format.samples_per_packet() as usize;
        let mut buf = vec![0u8; session.cfg.format.packet_payload_len()];
        let samples: Vec<i32> = (0..samples_per_packet * 2).map(|i| i as i32).collect();
        aes67::write_pcm_frame(&mut buf, &samples, 24).unwrap();
        session.write_packet(&buf).unwrap();
        assert_eq!(session.tick(0), TaskletResult::Pending);
    }
}
