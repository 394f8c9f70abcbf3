#![allow(clippy::needless_doctest_main)]

//! A userspace media transport library for SMPTE ST 2110 (uncompressed video, audio, ancillary
//! data, and fast metadata over IP), with ST 2022-7 dual-path redundancy, running over a
//! kernel-bypass packet I/O substrate.
//!
//! The core is three tightly coupled subsystems:
//!
//! - A cooperative tasklet [`scheduler`](lcore::scheduler) that multiplexes many
//!   [`session`]s onto a small pool of pinned worker threads ("lcores"), with hot sessions
//!   migrated between schedulers by a periodic [`admin`] controller.
//! - Per-session [`session`] state machines and [`session::pacing`] engines: RTP
//!   packetization paced against a PTP-disciplined clock on TX, sequence-gap-tolerant
//!   reassembly on RX, and an ST 2022-7 [`session::redundancy`] merger that reconstructs one
//!   frame from two out-of-phase copies.
//! - A [`ptp`] slave and clock-correction pipeline: a four-timestamp exchange disciplining the
//!   NIC hardware clock with a PI controller.
//!
//! ```no_run
//! use mtlrs_core::config::default_config;
//! use mtlrs_core::Runtime;
//!
//! let cfg = default_config();
//! let mut runtime = Runtime::new(cfg).expect("failed to initialize runtime");
//! runtime.run();
//! ```

pub mod admin;
pub mod config;
#[doc(hidden)]
#[allow(clippy::all)]
mod dpdk;
pub mod error;
pub mod lcore;
pub mod memory;
pub mod multicast;
pub mod multicore;
pub mod pipeline;
mod port;
pub mod protocols;
pub mod ptp;
mod runtime;
pub mod session;
pub mod stats;
pub mod utils;

pub use self::error::TransportError;
pub use self::lcore::CoreId;
pub use self::memory::mbuf::Mbuf;
pub use self::runtime::Runtime;

pub use dpdk::rte_lcore_id;
pub use dpdk::rte_rdtsc;

#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate maplit;
