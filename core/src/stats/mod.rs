//! Runtime statistics surface.
//!
//! Every session already tracks its own [`crate::session::SessionStats`], and every
//! [`crate::ptp::PtpSlave`] its own lock/offset state. This module doesn't duplicate that
//! bookkeeping; it only exposes the latest snapshot to an external monitoring system. The
//! `prometheus` feature wires it to a pull-based scrape endpoint so nothing needs to be
//! incremented on the packet path.

#[cfg(feature = "prometheus")]
mod prometheus;

#[cfg(feature = "prometheus")]
pub use prometheus::{register_base_prometheus_registry, set_ptp_source, set_session_source};
