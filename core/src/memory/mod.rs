//! Huge-page mempools and the IOVA registration map DMA copies rely on.

pub mod iova;
pub mod mbuf;
pub(crate) mod mempool;

pub use iova::IovaMap;
