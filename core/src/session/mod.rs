//! Session layer: one [`Session`] per ST 2110 stream, dispatched from a [`crate::lcore::scheduler::Scheduler`]
//! as a [`crate::lcore::tasklet::Tasklet`].
//!
//! Many session kinds (video/audio/ancillary/fast-metadata × tx/rx, plus the ST 2022-7 redundant
//! receiver) share one lifecycle and one statistics surface. Rather than have the scheduler match
//! on kind, every session implements [`SessionControl`] and is stored behind a tagged [`Session`]
//! enum; the scheduler only ever calls through the trait.

pub mod dma_lender;
pub mod framebuffer;
pub mod pacing;
pub mod queue;
pub mod redundancy;
pub mod rx_ancillary;
pub mod rx_audio;
pub mod rx_fastmetadata;
pub mod rx_video;
pub mod tx_ancillary;
pub mod tx_audio;
pub mod tx_fastmetadata;
pub mod tx_video;

use crate::error::TransportError;
use crate::lcore::tasklet::{Tasklet, TaskletResult};

/// Identifies one session instance, stable across an admin-controller migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

/// Snapshot of per-session counters exposed through the stats interface.
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub frames_completed: u64,
    pub frames_dropped: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Moving average of `ptp_now - rtp_timestamp_in_ns`, for RX sessions with hardware
    /// timestamping.
    pub rx_latency_ns_avg: Option<i64>,
    /// Set once a TX session has fallen back from a rejected hardware rate-limit to TSC pacing.
    pub rate_limit_fallback: bool,
    /// Count of RX frames whose trailing SHA-256 matched the digest the decoded data hashes to.
    pub frames_digest_verified: u64,
    /// Count of RX frames whose trailing SHA-256 did not match; implies payload corruption or
    /// reordering the reassembler didn't catch.
    pub frames_digest_mismatched: u64,
}

/// Common lifecycle and scheduling surface every session kind implements. The scheduler stores
/// sessions as `Box<dyn SessionControl>` behind a [`Tasklet`] adapter and never downcasts.
pub trait SessionControl: Send {
    fn id(&self) -> SessionId;

    /// Allocates queues/lenders/framebuffers and marks the session runnable. Idempotent once
    /// already started.
    fn start(&mut self) -> Result<(), TransportError>;

    /// Quiesces the session; safe to call from the admin controller mid-migration.
    fn stop(&mut self) -> Result<(), TransportError>;

    /// One scheduler-loop quantum of work: send/receive what's ready, advance pacing state.
    /// Returns `TaskletResult::AllDone` when nothing further can be done without new input or the
    /// passage of time, which the scheduler uses to compute its sleep advice.
    fn tasklet_tick(&mut self) -> TaskletResult;

    fn stats(&self) -> SessionStats;
}

/// Tags every concrete session kind the library implements, so a scheduler's slot table and the
/// admin controller's migration logic can hold heterogeneous sessions without a trait object
/// per call site where the kind itself matters (e.g. quota accounting by payload class).
pub enum Session {
    TxVideo(tx_video::TxVideoSession),
    TxAudio(tx_audio::TxAudioSession),
    TxAncillary(tx_ancillary::TxAncillarySession),
    TxFastMetadata(tx_fastmetadata::TxFastMetadataSession),
    RxVideo(rx_video::RxVideoSession),
    RxAudio(rx_audio::RxAudioSession),
    RxAncillary(rx_ancillary::RxAncillarySession),
    RxFastMetadata(rx_fastmetadata::RxFastMetadataSession),
    RxRedundant(redundancy::RedundantSession),
}

impl Session {
    fn control(&self) -> &dyn SessionControl {
        match self {
            Session::TxVideo(s) => s,
            Session::TxAudio(s) => s,
            Session::TxAncillary(s) => s,
            Session::TxFastMetadata(s) => s,
            Session::RxVideo(s) => s,
            Session::RxAudio(s) => s,
            Session::RxAncillary(s) => s,
            Session::RxFastMetadata(s) => s,
            Session::RxRedundant(s) => s,
        }
    }

    fn control_mut(&mut self) -> &mut dyn SessionControl {
        match self {
            Session::TxVideo(s) => s,
            Session::TxAudio(s) => s,
            Session::TxAncillary(s) => s,
            Session::TxFastMetadata(s) => s,
            Session::RxVideo(s) => s,
            Session::RxAudio(s) => s,
            Session::RxAncillary(s) => s,
            Session::RxFastMetadata(s) => s,
            Session::RxRedundant(s) => s,
        }
    }

    pub fn id(&self) -> SessionId {
        self.control().id()
    }

    pub fn stats(&self) -> SessionStats {
        self.control().stats()
    }
}

/// Adapts a [`Session`] to the scheduler's [`Tasklet`] trait; `name()` is derived from the
/// session id since sessions don't otherwise carry a human label.
pub struct SessionTasklet {
    name: String,
    session: Session,
}

impl SessionTasklet {
    pub fn new(session: Session) -> SessionTasklet {
        let name = format!("session-{}", session.id().0);
        SessionTasklet { name, session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn into_session(self) -> Session {
        self.session
    }
}

impl Tasklet for SessionTasklet {
    fn name(&self) -> &str {
        &self.name
    }

    fn handler(&mut self) -> TaskletResult {
        self.session.control_mut().tasklet_tick()
    }

    fn session_snapshot(&self) -> Option<(SessionId, SessionStats)> {
        Some((self.session.id(), self.session.stats()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tx_fastmetadata::{TxFastMetadataConfig, TxFastMetadataSession};

    #[test]
    fn session_tasklet_derives_name_from_id() {
        let session = Session::TxFastMetadata(TxFastMetadataSession::new(
            SessionId(7),
            TxFastMetadataConfig::default(),
        ));
        let tasklet = SessionTasklet::new(session);
        assert_eq!(tasklet.name(), "session-7");
    }
}
