//! PTP (IEEE 1588v2) slave clock discipline.
//!
//! One [`PtpSlave`] runs per port. It consumes the four-timestamp exchange (SYNC/FOLLOW_UP on
//! the master-to-slave path, DELAY_REQ/DELAY_RESP on the slave-to-master path) and maintains a
//! `coefficient` that [`PtpSlave::corrected_time`] applies to raw hardware timestamps so every
//! pacing and RX-latency consumer sees a disciplined clock without touching the NIC registers
//! itself.

pub mod messages;

use crate::config::PtpConfig;
use crate::error::TransportError;

use std::collections::VecDeque;
use std::sync::Mutex;

pub use messages::{MessageType, CLOCK_IDENTITY_MAGIC, EVENT_PORT, GENERAL_PORT};

/// Safety-net alarm period: if no SYNC completes within this many DELAY_REQ cadences, time is
/// nudged by the learned average delta instead of left to drift.
const SYNC_TIMEOUT_MULTIPLE: u32 = 20;

#[derive(Debug, Clone, Copy, Default)]
struct FourTimestamps {
    t1: Option<i128>,
    t2: Option<i128>,
    t3: Option<i128>,
    t4: Option<i128>,
}

/// Per-slave clock discipline state, guarded by a single mutex since DELAY_REQ transmission
/// runs on the control plane while SYNC/FOLLOW_UP/DELAY_RESP arrive on whichever core owns the
/// PTP port.
pub struct PtpSlave {
    cfg: PtpConfig,
    inner: Mutex<SlaveState>,
}

struct SlaveState {
    pending: FourTimestamps,
    coefficient: f64,
    last_sync_ts: i128,
    recent_deltas: VecDeque<i128>,
    integral: f64,
    prev_error: f64,
    consecutive_outliers: u32,
    last_master_identity: Option<u64>,
    domain_number: u8,
    sync_sequence_id: u16,
    delay_req_sequence_id: u16,
    syncs_since_delay_req: u32,
    average_delta: i128,
}

impl Default for SlaveState {
    fn default() -> Self {
        SlaveState {
            pending: FourTimestamps::default(),
            coefficient: 1.0,
            last_sync_ts: 0,
            recent_deltas: VecDeque::new(),
            integral: 0.0,
            prev_error: 0.0,
            consecutive_outliers: 0,
            last_master_identity: None,
            domain_number: 0,
            sync_sequence_id: 0,
            delay_req_sequence_id: 0,
            syncs_since_delay_req: 0,
            average_delta: 0,
        }
    }
}

/// Clock correction mode. Integral re-anchor tracks large, slow-moving rate error; PI mode
/// tracks the remaining fine offset once the coefficient has converged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectionMode {
    IntegralReanchor,
    Pi,
}

impl PtpSlave {
    pub fn new(cfg: PtpConfig) -> PtpSlave {
        PtpSlave {
            cfg,
            inner: Mutex::new(SlaveState::default()),
        }
    }

    /// Records T2: the local hardware RX timestamp of an incoming SYNC.
    pub fn on_sync(&self, hw_rx_ns: i128, sequence_id: u16) {
        let mut s = self.inner.lock().unwrap();
        s.sync_sequence_id = sequence_id;
        s.pending.t2 = Some(hw_rx_ns);
    }

    /// Records T1: the master's origin timestamp, carried by FOLLOW_UP.
    pub fn on_follow_up(&self, precise_origin_ns: i128) {
        let mut s = self.inner.lock().unwrap();
        s.pending.t1 = Some(precise_origin_ns);
    }

    /// Records T3: the local hardware (or software fallback) TX timestamp of our DELAY_REQ.
    pub fn on_delay_req_sent(&self, hw_tx_ns: i128) {
        let mut s = self.inner.lock().unwrap();
        s.pending.t3 = Some(hw_tx_ns);
    }

    /// Records T4 from DELAY_RESP and, once all four timestamps are present, runs one
    /// acceptance/correction cycle. Returns the applied `(delta_ns, path_delay_ns)` pair.
    pub fn on_delay_resp(
        &self,
        receive_timestamp_ns: i128,
        sequence_id: u16,
    ) -> Result<(i64, i64), TransportError> {
        let mut s = self.inner.lock().unwrap();
        if sequence_id != s.delay_req_sequence_id {
            return Err(TransportError::ProtocolError(
                "DELAY_RESP sequence id does not match outstanding DELAY_REQ".into(),
            ));
        }
        s.pending.t4 = Some(receive_timestamp_ns);
        let (t1, t2, t3, t4) = match (s.pending.t1, s.pending.t2, s.pending.t3, s.pending.t4) {
            (Some(t1), Some(t2), Some(t3), Some(t4)) => (t1, t2, t3, t4),
            _ => {
                return Err(TransportError::ProtocolError(
                    "incomplete four-timestamp exchange".into(),
                ))
            }
        };
        s.pending = FourTimestamps::default();

        let delta = ((t4 - t3) - (t2 - t1)) / 2;
        let path_delay = ((t2 - t1) + (t4 - t3)) / 2;

        let threshold = {
            let abs_sum: i128 = s.recent_deltas.iter().map(|d| d.abs()).sum();
            let avg_abs = abs_sum / s.recent_deltas.len().max(1) as i128;
            (2 * avg_abs).max(100_000)
        };
        if delta.unsigned_abs() as i128 > threshold {
            s.consecutive_outliers += 1;
            if s.consecutive_outliers >= self.cfg.outlier_reset_after {
                log::warn!("ptp: {} consecutive outliers, resetting moving averages", s.consecutive_outliers);
                s.recent_deltas.clear();
                s.integral = 0.0;
                s.prev_error = 0.0;
                s.consecutive_outliers = 0;
            }
            return Err(TransportError::Transient(format!(
                "delta {} exceeds acceptance threshold {}",
                delta, threshold
            )));
        }
        s.consecutive_outliers = 0;
        s.average_delta = delta;

        s.recent_deltas.push_back(delta);
        while s.recent_deltas.len() > self.cfg.coefficient_trim_window {
            s.recent_deltas.pop_front();
        }

        self.apply_correction(&mut s, t2, t1, delta as f64);

        Ok((delta as i64, path_delay as i64))
    }

    fn apply_correction(&self, s: &mut SlaveState, t_local: i128, t_master: i128, error_ns: f64) {
        if s.last_sync_ts == 0 {
            s.last_sync_ts = t_local;
            s.coefficient = 1.0;
            return;
        }
        if s.recent_deltas.len() >= self.cfg.coefficient_trim_window {
            let mut sorted: Vec<i128> = s.recent_deltas.iter().copied().collect();
            sorted.sort_unstable();
            let trimmed = &sorted[1..sorted.len() - 1];
            let sum: i128 = trimmed.iter().sum();
            let median_ish = sum as f64 / trimmed.len() as f64;
            let denom = (t_local - s.last_sync_ts) as f64;
            if denom.abs() > 0.0 {
                s.coefficient = (denom + median_ish) / denom;
            }
        }

        s.integral += (error_ns + s.prev_error) / 2.0;
        s.prev_error = error_ns;
        let mut offset = self.cfg.kp * error_ns + self.cfg.ki * s.integral;
        offset = offset.clamp(
            -(self.cfg.pi_clamp_ns as f64),
            self.cfg.pi_clamp_ns as f64,
        );
        s.coefficient += offset / 1e9;

        s.last_sync_ts = t_local;
        let _ = t_master;
        s.syncs_since_delay_req = 0;
    }

    /// Applies the learned coefficient to a raw hardware (or TSC) timestamp.
    pub fn corrected_time(&self, raw_ns: i128) -> i128 {
        let s = self.inner.lock().unwrap();
        if s.last_sync_ts == 0 {
            return raw_ns;
        }
        s.last_sync_ts + ((raw_ns - s.last_sync_ts) as f64 * s.coefficient) as i128
    }

    /// Call once per DELAY_REQ transmission cadence; returns `true` when the safety-net alarm
    /// should nudge local time because no SYNC has completed in too long.
    pub fn tick_missed_sync(&self) -> bool {
        let mut s = self.inner.lock().unwrap();
        s.syncs_since_delay_req += 1;
        if s.syncs_since_delay_req >= SYNC_TIMEOUT_MULTIPLE {
            log::warn!("ptp: no SYNC observed for {} cadences, applying learned average delta", s.syncs_since_delay_req);
            s.last_sync_ts += s.average_delta;
            s.syncs_since_delay_req = 0;
            true
        } else {
            false
        }
    }

    pub fn next_delay_req_sequence_id(&self) -> u16 {
        let mut s = self.inner.lock().unwrap();
        s.delay_req_sequence_id = s.delay_req_sequence_id.wrapping_add(1);
        s.delay_req_sequence_id
    }

    pub fn record_master(&self, identity: u64, domain_number: u8) {
        let mut s = self.inner.lock().unwrap();
        s.last_master_identity = Some(identity);
        s.domain_number = domain_number;
    }

    pub fn master_identity(&self) -> Option<u64> {
        self.inner.lock().unwrap().last_master_identity
    }

    /// `true` once at least one master has been recorded via `record_master`, used by the
    /// monitor to report PTP lock status.
    pub fn is_locked(&self) -> bool {
        self.master_identity().is_some()
    }

    /// Min/avg/max of the trimmed SYNC-minus-local delta window, in nanoseconds, for the
    /// monitor's live PTP health display. `None` until at least one delta has been recorded.
    pub fn delta_stats_ns(&self) -> Option<(i128, i128, i128)> {
        let s = self.inner.lock().unwrap();
        if s.recent_deltas.is_empty() {
            return None;
        }
        let min = *s.recent_deltas.iter().min().unwrap();
        let max = *s.recent_deltas.iter().max().unwrap();
        let avg = s.recent_deltas.iter().sum::<i128>() / s.recent_deltas.len() as i128;
        Some((min, avg, max))
    }
}

/// Control-plane tasklet driving one port's PTP safety net: ticks the missed-SYNC alarm on the
/// configured DELAY_REQ cadence. Message exchange itself (SYNC/FOLLOW_UP/DELAY_REQ/DELAY_RESP)
/// arrives through whatever control-plane queue the runtime wires to this port; this tasklet only
/// owns the periodic maintenance that has to run even when no exchange completes.
pub struct PtpTasklet {
    name: String,
    slave: std::sync::Arc<PtpSlave>,
    period: std::time::Duration,
    last_tick: std::time::Instant,
}

impl PtpTasklet {
    pub fn new(name: String, slave: std::sync::Arc<PtpSlave>) -> PtpTasklet {
        let period = std::time::Duration::from_micros(slave.cfg.delay_req_period_us);
        PtpTasklet {
            name,
            slave,
            period,
            last_tick: std::time::Instant::now(),
        }
    }
}

impl crate::lcore::tasklet::Tasklet for PtpTasklet {
    fn name(&self) -> &str {
        &self.name
    }

    fn handler(&mut self) -> crate::lcore::tasklet::TaskletResult {
        if self.last_tick.elapsed() >= self.period {
            self.last_tick = std::time::Instant::now();
            self.slave.tick_missed_sync();
            crate::lcore::tasklet::TaskletResult::Pending
        } else {
            crate::lcore::tasklet::TaskletResult::AllDone
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slave() -> PtpSlave {
        PtpSlave::new(PtpConfig::default())
    }

    #[test]
    fn rejects_delay_resp_with_mismatched_sequence() {
        let s = slave();
        s.on_sync(1_000, 0);
        s.on_follow_up(900);
        s.on_delay_req_sent(1_100);
        let err = s.on_delay_resp(1_200, 999).unwrap_err();
        assert!(matches!(err, TransportError::ProtocolError(_)));
    }

    #[test]
    fn accepts_first_in_band_exchange_and_converges_coefficient() {
        let s = slave();
        let seq = s.next_delay_req_sequence_id();
        s.on_sync(1_000_000, 1);
        s.on_follow_up(999_000);
        s.on_delay_req_sent(1_050_000);
        let (delta, path_delay) = s.on_delay_resp(1_100_000, seq).unwrap();
        assert_eq!(delta, ((1_100_000i128 - 1_050_000) - (1_000_000 - 999_000)) as i64 / 2);
        assert!(path_delay >= 0);
    }

    #[test]
    fn corrected_time_is_identity_before_first_sync() {
        let s = slave();
        assert_eq!(s.corrected_time(12345), 12345);
    }

    #[test]
    fn missed_sync_alarm_fires_after_timeout_multiple() {
        let s = slave();
        for _ in 0..SYNC_TIMEOUT_MULTIPLE - 1 {
            assert!(!s.tick_missed_sync());
        }
        assert!(s.tick_missed_sync());
    }
}
