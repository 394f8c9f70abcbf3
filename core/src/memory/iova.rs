//! IOVA registration map: tracks which (vaddr, size) regions have been mapped to an IOVA range
//! for DMA-engine access, so the [`crate::session::dma_lender`] layer can translate a mbuf's
//! virtual address to the physical/IOVA address a `rte_dmadev` copy needs.

use crate::error::TransportError;

use std::collections::BTreeMap;
use std::sync::Mutex;

/// IOVA addresses are handed out starting here, leaving the low range free for anything the
/// platform reserves.
const IOVA_BASE: u64 = 1 << 20;

#[derive(Debug, Clone, Copy)]
struct Region {
    size: usize,
    iova: u64,
}

/// A process-wide registry mapping virtual-address regions to IOVA ranges.
pub struct IovaMap {
    inner: Mutex<IovaMapInner>,
}

struct IovaMapInner {
    regions: BTreeMap<u64, Region>,
    next_iova: u64,
}

impl Default for IovaMap {
    fn default() -> Self {
        IovaMap {
            inner: Mutex::new(IovaMapInner {
                regions: BTreeMap::new(),
                next_iova: IOVA_BASE,
            }),
        }
    }
}

impl IovaMap {
    pub fn new() -> IovaMap {
        IovaMap::default()
    }

    /// Registers `[vaddr, vaddr+size)`, assigning it a fresh IOVA range. Rejects overlap with
    /// any already-registered region.
    pub fn add(&self, vaddr: u64, size: usize) -> Result<u64, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some((&existing_vaddr, existing)) = inner.regions.range(..=vaddr).next_back() {
            if vaddr < existing_vaddr + existing.size as u64 {
                return Err(TransportError::InvalidArgument(format!(
                    "region [{:#x}, {:#x}) overlaps existing region at {:#x}",
                    vaddr,
                    vaddr + size as u64,
                    existing_vaddr
                )));
            }
        }
        if let Some((&next_vaddr, _)) = inner.regions.range(vaddr..).next() {
            if vaddr + size as u64 > next_vaddr {
                return Err(TransportError::InvalidArgument(format!(
                    "region [{:#x}, {:#x}) overlaps existing region at {:#x}",
                    vaddr,
                    vaddr + size as u64,
                    next_vaddr
                )));
            }
        }
        let iova = inner.next_iova;
        inner.next_iova += size as u64;
        inner.regions.insert(vaddr, Region { size, iova });
        Ok(iova)
    }

    /// Unregisters a region; the `(vaddr, size)` pair must exactly match a prior `add`.
    pub fn remove(&self, vaddr: u64, size: usize) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.regions.get(&vaddr) {
            Some(region) if region.size == size => {
                inner.regions.remove(&vaddr);
                Ok(())
            }
            _ => Err(TransportError::InvalidArgument(format!(
                "no exact (vaddr={:#x}, size={}) region registered",
                vaddr, size
            ))),
        }
    }

    /// Translates a virtual address inside a registered region to its IOVA.
    pub fn translate(&self, vaddr: u64) -> Option<u64> {
        let inner = self.inner.lock().unwrap();
        let (&base, region) = inner.regions.range(..=vaddr).next_back()?;
        if vaddr < base + region.size as u64 {
            Some(region.iova + (vaddr - base))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_assigns_increasing_iova() {
        let map = IovaMap::new();
        let iova1 = map.add(0x1000, 0x100).unwrap();
        let iova2 = map.add(0x2000, 0x100).unwrap();
        assert!(iova2 > iova1);
        assert!(iova1 >= IOVA_BASE);
    }

    #[test]
    fn rejects_overlapping_region() {
        let map = IovaMap::new();
        map.add(0x1000, 0x100).unwrap();
        assert!(map.add(0x1050, 0x100).is_err());
    }

    #[test]
    fn remove_requires_exact_match() {
        let map = IovaMap::new();
        map.add(0x1000, 0x100).unwrap();
        assert!(map.remove(0x1000, 0x50).is_err());
        assert!(map.remove(0x1000, 0x100).is_ok());
    }

    #[test]
    fn translate_resolves_offset_within_region() {
        let map = IovaMap::new();
        let iova = map.add(0x1000, 0x100).unwrap();
        assert_eq!(map.translate(0x1010), Some(iova + 0x10));
        assert_eq!(map.translate(0x2000), None);
    }
}
