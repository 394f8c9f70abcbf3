//! Stable error taxonomy for the public, control-plane surface of this crate.
//!
//! Module-internal fallible helpers use their own `thiserror` enums (e.g. [`crate::memory::mbuf::MbufError`],
//! [`crate::memory::mempool::MempoolError`]) and are folded into one of these kinds with `?` and
//! `#[from]` at the module boundary. Data-plane tasklets never propagate a [`TransportError`] up
//! the call stack; they record it in per-session statistics and continue.

use thiserror::Error;

/// Stable error kind exposed across the library's control-plane API.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Ill-formed session config, bad IP, bad payload type, out-of-range quota.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Capability missing on the current driver/port (e.g. header split unavailable).
    #[error("not supported: {0}")]
    NotSupported(String),

    /// No free lcore, queue, mbuf, DMA lender, or framebuffer slot.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// NIC burst error, queue setup error, PTP timestamp read timeout.
    #[error("I/O failure: {0}")]
    IoFailure(String),

    /// Bad RTP payload type, sequence far outside window, malformed PTP message.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// A blocking get exceeded the frame deadline.
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// Rate-limit configuration rejected at runtime; caller retries or falls back.
    #[error("transient failure, retry or fallback: {0}")]
    Transient(String),

    /// Link down unrecoverable, process-wide abort.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl TransportError {
    /// Returns `true` for kinds a control-plane caller should retry (possibly after a fallback
    /// such as RL→TSC pacing) rather than treat as a hard failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Transient(_))
    }

    /// Returns `true` for kinds that should be surfaced to the application via the `FatalError`
    /// event callback rather than just counted in statistics.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::Fatal(_))
    }
}
