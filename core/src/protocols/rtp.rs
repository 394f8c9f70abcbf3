//! RTP (RFC 3550) base header, shared by every ST 2110 payload format.
//!
//! ST 2110 never uses CSRC lists or RTP extensions, so this parses only the fixed 12-byte
//! header; `csrc_count` is read but callers that encounter a nonzero value should treat the
//! packet as malformed for this profile.

use crate::memory::mbuf::Mbuf;
use crate::protocols::packet::{Packet, PacketHeader, PacketParseError};
use crate::utils::types::*;

use anyhow::{bail, Result};

const RTP_HEADER_LEN: usize = 12;
const RTP_VERSION: u8 = 2;

/// A parsed RTP packet (header only; the payload format is profile-specific).
#[derive(Debug)]
pub struct Rtp<'a> {
    header: RtpHeader,
    offset: usize,
    mbuf: &'a Mbuf,
}

impl<'a> Rtp<'a> {
    /// RTP version, always 2 for ST 2110.
    #[inline]
    pub fn version(&self) -> u8 {
        (self.header.v_p_x_cc & 0xc0) >> 6
    }

    #[inline]
    pub fn padding(&self) -> bool {
        self.header.v_p_x_cc & 0x20 != 0
    }

    #[inline]
    pub fn extension(&self) -> bool {
        self.header.v_p_x_cc & 0x10 != 0
    }

    #[inline]
    pub fn csrc_count(&self) -> u8 {
        self.header.v_p_x_cc & 0x0f
    }

    #[inline]
    pub fn marker(&self) -> bool {
        self.header.m_pt & 0x80 != 0
    }

    #[inline]
    pub fn payload_type(&self) -> u8 {
        self.header.m_pt & 0x7f
    }

    #[inline]
    pub fn sequence_number(&self) -> u16 {
        self.header.sequence_number.into()
    }

    /// 32-bit timestamp in the media clock rate (90 kHz for video/ANC/FMD, sampling rate
    /// for audio).
    #[inline]
    pub fn timestamp(&self) -> u32 {
        self.header.timestamp.into()
    }

    #[inline]
    pub fn ssrc(&self) -> u32 {
        self.header.ssrc.into()
    }

    /// Is this a well-formed ST 2110 RTP header: version 2, no CSRC entries.
    pub fn is_valid_profile(&self) -> bool {
        self.version() == RTP_VERSION && self.csrc_count() == 0
    }
}

impl<'a> Packet<'a> for Rtp<'a> {
    fn mbuf(&self) -> &Mbuf {
        self.mbuf
    }

    fn header_len(&self) -> usize {
        self.header.length()
    }

    fn next_header_offset(&self) -> usize {
        self.offset + self.header_len()
    }

    fn next_header(&self) -> Option<usize> {
        Some(self.payload_type() as usize)
    }

    fn parse_from(outer: &'a impl Packet<'a>) -> Result<Self>
    where
        Self: Sized,
    {
        let offset = outer.next_header_offset();
        if let Ok(header) = outer.mbuf().get_data(offset) {
            Ok(Rtp {
                header: unsafe { *header },
                offset,
                mbuf: outer.mbuf(),
            })
        } else {
            bail!(PacketParseError::InvalidRead)
        }
    }
}

/// Fixed 12-byte RTP header (no CSRC list, no extension).
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
struct RtpHeader {
    v_p_x_cc: u8,
    m_pt: u8,
    sequence_number: u16be,
    timestamp: u32be,
    ssrc: u32be,
}

impl PacketHeader for RtpHeader {
    fn length(&self) -> usize {
        RTP_HEADER_LEN
    }
}

/// Encodes a fixed RTP header into `buf[0..12]`. Used by TX sessions packetizing a frame.
pub fn write_header(
    buf: &mut [u8],
    marker: bool,
    payload_type: u8,
    sequence_number: u16,
    timestamp: u32,
    ssrc: u32,
) {
    debug_assert!(buf.len() >= RTP_HEADER_LEN);
    buf[0] = (RTP_VERSION << 6) & 0xc0;
    buf[1] = (if marker { 0x80 } else { 0x00 }) | (payload_type & 0x7f);
    buf[2..4].copy_from_slice(&sequence_number.to_be_bytes());
    buf[4..8].copy_from_slice(&timestamp.to_be_bytes());
    buf[8..12].copy_from_slice(&ssrc.to_be_bytes());
}

pub const HEADER_LEN: usize = RTP_HEADER_LEN;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_header_round_trips_fields() {
        let mut buf = [0u8; HEADER_LEN];
        write_header(&mut buf, true, 98, 0xbeef, 0xdead_1234, 0x1122_3344);
        assert_eq!(buf[0] >> 6, RTP_VERSION);
        assert_eq!(buf[1] & 0x80, 0x80);
        assert_eq!(buf[1] & 0x7f, 98);
        assert_eq!(u16::from_be_bytes([buf[2], buf[3]]), 0xbeef);
        assert_eq!(
            u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            0xdead_1234
        );
        assert_eq!(
            u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
            0x1122_3344
        );
    }
}
