//! ST 2110-20 uncompressed video payload header (RFC 4175).
//!
//! Sits directly after the RTP base header: a 16-bit extended sequence number (the high bits
//! of a 32-bit sequence counter whose low 16 bits are the RTP header's own sequence number),
//! followed by one or more Sample Row Data (SRD) headers. Each SRD header describes one
//! contiguous run of pixel data within a video line; the continuation bit chains multiple SRDs
//! into a single packet when a line's data is split.

use anyhow::{bail, Result};
use thiserror::Error;

/// Length of the extended-sequence-number field plus a single SRD header, in bytes.
pub const MIN_PAYLOAD_HEADER_LEN: usize = 2 + 6;

#[derive(Error, Debug)]
pub enum Rfc4175Error {
    #[error("payload too short for RFC 4175 header")]
    Truncated,
    #[error("SRD chain exceeds configured maximum")]
    TooManySrds,
}

/// One Sample Row Data header: a contiguous span of one video line carried in this packet.
#[derive(Debug, Clone, Copy)]
pub struct SampleRowData {
    /// Length of this SRD's payload, in octets.
    pub length: u16,
    /// Field identification bit: 0 for progressive or first field, 1 for second field.
    pub field_id: bool,
    /// Line number within the frame (0-based).
    pub line_number: u16,
    /// Byte offset of this span within the line. The low bit doubles as a pixel-group
    /// continuation marker per RFC 4175 §5.3 and is masked out here.
    pub offset: u16,
}

/// Parsed RFC 4175 payload header: extended sequence number plus the SRD chain.
#[derive(Debug)]
pub struct Rfc4175Header {
    pub extended_sequence_number: u16,
    pub srds: Vec<SampleRowData>,
}

impl Rfc4175Header {
    /// Parses the payload header starting at `data[0]`, stopping after `max_srds` chained SRDs.
    pub fn parse(data: &[u8], max_srds: usize) -> Result<(Self, usize)> {
        if data.len() < 2 {
            bail!(Rfc4175Error::Truncated);
        }
        let extended_sequence_number = u16::from_be_bytes([data[0], data[1]]);
        let mut offset = 2;
        let mut srds = Vec::new();
        loop {
            if data.len() < offset + 6 {
                bail!(Rfc4175Error::Truncated);
            }
            let length = u16::from_be_bytes([data[offset], data[offset + 1]]);
            let field_line = u16::from_be_bytes([data[offset + 2], data[offset + 3]]);
            let field_id = field_line & 0x8000 != 0;
            let line_number = field_line & 0x7fff;
            let cont_offset = u16::from_be_bytes([data[offset + 4], data[offset + 5]]);
            let continuation = cont_offset & 0x8000 != 0;
            let srd_offset = cont_offset & 0x7fff;
            srds.push(SampleRowData {
                length,
                field_id,
                line_number,
                offset: srd_offset,
            });
            offset += 6;
            if !continuation {
                break;
            }
            if srds.len() >= max_srds {
                bail!(Rfc4175Error::TooManySrds);
            }
        }
        Ok((
            Rfc4175Header {
                extended_sequence_number,
                srds,
            },
            offset,
        ))
    }

    /// Encodes a single-SRD payload header (the common case: one contiguous span per packet).
    pub fn write_single(
        buf: &mut [u8],
        extended_sequence_number: u16,
        srd: SampleRowData,
    ) -> usize {
        debug_assert!(buf.len() >= MIN_PAYLOAD_HEADER_LEN);
        buf[0..2].copy_from_slice(&extended_sequence_number.to_be_bytes());
        buf[2..4].copy_from_slice(&srd.length.to_be_bytes());
        let field_line = (if srd.field_id { 0x8000 } else { 0 }) | (srd.line_number & 0x7fff);
        buf[4..6].copy_from_slice(&field_line.to_be_bytes());
        buf[6..8].copy_from_slice(&(srd.offset & 0x7fff).to_be_bytes());
        MIN_PAYLOAD_HEADER_LEN
    }

    /// Full 32-bit sequence counter: RTP header low 16 bits combined with this field's high 16.
    pub fn full_sequence(&self, rtp_sequence_number: u16) -> u32 {
        ((self.extended_sequence_number as u32) << 16) | rtp_sequence_number as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_single_srd() {
        let srd = SampleRowData {
            length: 1200,
            field_id: false,
            line_number: 42,
            offset: 0,
        };
        let mut buf = [0u8; MIN_PAYLOAD_HEADER_LEN];
        Rfc4175Header::write_single(&mut buf, 7, srd);
        let (parsed, consumed) = Rfc4175Header::parse(&buf, 4).unwrap();
        assert_eq!(consumed, MIN_PAYLOAD_HEADER_LEN);
        assert_eq!(parsed.extended_sequence_number, 7);
        assert_eq!(parsed.srds.len(), 1);
        assert_eq!(parsed.srds[0].length, 1200);
        assert_eq!(parsed.srds[0].line_number, 42);
        assert!(!parsed.srds[0].field_id);
    }

    #[test]
    fn rejects_truncated_header() {
        let buf = [0u8; 4];
        assert!(Rfc4175Header::parse(&buf, 4).is_err());
    }

    #[test]
    fn full_sequence_combines_both_counters() {
        let header = Rfc4175Header {
            extended_sequence_number: 1,
            srds: vec![],
        };
        assert_eq!(header.full_sequence(0xffff), 0x0001_ffff);
    }
}
