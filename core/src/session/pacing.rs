//! TX pacing: computes epoch-aligned departure times for packet 0 of every frame, shared by the
//! video/audio/ancillary/fast-metadata TX sessions.

use serde::{Deserialize, Serialize};

/// Selects how a TX session spaces its packets within a frame interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum PacingMode {
    /// Uniform inter-packet interval equal to `frame_time / n_packets`.
    Narrow,
    /// Same average spacing as `Narrow` with a relaxed jitter envelope.
    Wide,
    /// Fills the entire frame interval linearly, including the VRX leading cushion.
    Linear,
    /// Software pacing against the calibrated TSC instead of a NIC rate limiter.
    Tsc,
    /// `Tsc` with a `Narrow`-equivalent envelope.
    TscNarrow,
    /// Queue-level hardware rate limit driven by the PTP-disciplined clock.
    Ptp,
    /// No pacing; packets are sent as fast as the queue accepts them.
    BestEffort,
}

/// Per-session pacing state: frame cadence, VRX cushion, and epoch bookkeeping.
#[derive(Debug, Clone)]
pub struct PacingEngine {
    mode: PacingMode,
    frame_time_ns: u64,
    n_packets: u32,
    start_vrx: u32,
    pad_interval: u32,
    /// TAI-nanosecond delta added to every computed epoch, derived from an optional
    /// caller-supplied RTP timestamp base.
    rtp_timestamp_delta_ns: i64,
}

impl PacingEngine {
    pub fn new(mode: PacingMode, frame_time_ns: u64, n_packets: u32) -> PacingEngine {
        PacingEngine {
            mode,
            frame_time_ns,
            n_packets: n_packets.max(1),
            start_vrx: 0,
            pad_interval: 0,
            rtp_timestamp_delta_ns: 0,
        }
    }

    pub fn with_vrx(mut self, start_vrx: u32, pad_interval: u32) -> PacingEngine {
        self.start_vrx = start_vrx;
        self.pad_interval = pad_interval;
        self
    }

    pub fn with_user_timestamp_delta(mut self, delta_ns: i64) -> PacingEngine {
        self.rtp_timestamp_delta_ns = delta_ns;
        self
    }

    pub fn mode(&self) -> PacingMode {
        self.mode
    }

    pub fn start_vrx(&self) -> u32 {
        self.start_vrx
    }

    pub fn pad_interval(&self) -> u32 {
        self.pad_interval
    }

    /// Computes the epoch-aligned departure time for packet 0 of the next frame, given the
    /// PTP-corrected current time in nanoseconds: `ceil(now / frame_time) * frame_time +
    /// rtp_timestamp_delta`. All senders sharing a `frame_time` converge on the same epoch grid.
    pub fn next_epoch_ns(&self, now_ns: i128) -> i128 {
        let frame_time = self.frame_time_ns as i128;
        let ceil_units = (now_ns + frame_time - 1).div_euclid(frame_time);
        ceil_units * frame_time + self.rtp_timestamp_delta_ns as i128
    }

    /// Inter-packet interval for `Narrow`/`Wide`/`TscNarrow` pacing, in nanoseconds.
    pub fn inter_packet_interval_ns(&self) -> u64 {
        self.frame_time_ns / self.n_packets as u64
    }

    /// Returns the per-packet departure offset (from the frame epoch) for packet `index` under
    /// the configured mode.
    pub fn packet_offset_ns(&self, index: u32) -> u64 {
        match self.mode {
            PacingMode::BestEffort => 0,
            PacingMode::Narrow | PacingMode::TscNarrow => {
                index as u64 * self.inter_packet_interval_ns()
            }
            PacingMode::Wide => {
                // Same average cadence, but leaves headroom by spacing over 95% of the interval
                // and letting the last packets land early rather than risk overrun.
                let interval = self.inter_packet_interval_ns();
                let relaxed = interval.saturating_mul(95) / 100;
                index as u64 * relaxed
            }
            PacingMode::Linear | PacingMode::Ptp | PacingMode::Tsc => {
                let span = self.frame_time_ns.saturating_sub(
                    self.start_vrx as u64 * self.inter_packet_interval_ns(),
                );
                let step = span / self.n_packets as u64;
                self.start_vrx as u64 * self.inter_packet_interval_ns() + index as u64 * step
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_epoch_rounds_up_to_frame_boundary() {
        let engine = PacingEngine::new(PacingMode::Narrow, 1_000_000, 8);
        assert_eq!(engine.next_epoch_ns(1), 1_000_000);
        assert_eq!(engine.next_epoch_ns(1_000_000), 1_000_000);
        assert_eq!(engine.next_epoch_ns(1_000_001), 2_000_000);
    }

    #[test]
    fn user_timestamp_delta_shifts_epoch() {
        let engine = PacingEngine::new(PacingMode::Narrow, 1_000_000, 8).with_user_timestamp_delta(500);
        assert_eq!(engine.next_epoch_ns(1), 1_000_500);
    }

    #[test]
    fn narrow_packet_offsets_are_evenly_spaced() {
        let engine = PacingEngine::new(PacingMode::Narrow, 1_000_000, 10);
        assert_eq!(engine.packet_offset_ns(0), 0);
        assert_eq!(engine.packet_offset_ns(5), 500_000);
    }

    #[test]
    fn linear_offsets_start_after_vrx_cushion() {
        let engine = PacingEngine::new(PacingMode::Linear, 1_000_000, 10).with_vrx(2, 0);
        let offset0 = engine.packet_offset_ns(0);
        assert_eq!(offset0, 200_000);
    }

    #[test]
    fn best_effort_has_no_offset() {
        let engine = PacingEngine::new(PacingMode::BestEffort, 1_000_000, 10);
        assert_eq!(engine.packet_offset_ns(9), 0);
    }
}
