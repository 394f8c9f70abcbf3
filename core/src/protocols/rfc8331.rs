//! ST 2110-40 ancillary data payload (RFC 8331).
//!
//! After the RTP base header: a 16-bit ANC packet header (extended sequence number, length,
//! and F field bit), followed by one or more ANC data subpackets, each carrying one SMPTE
//! ST 291 ANC packet (DID, SDID, data count, 10-bit user data words packed into bytes, and a
//! 9-bit checksum).

use anyhow::{bail, Result};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AncillaryError {
    #[error("buffer too short for ANC packet header")]
    Truncated,
    #[error("subpacket count exceeds declared length")]
    Inconsistent,
}

/// Fixed header preceding the ANC subpacket list.
#[derive(Debug, Clone, Copy)]
pub struct AncPacketHeader {
    pub extended_sequence_number: u16,
    /// Number of ANC data subpackets that follow.
    pub anc_count: u8,
    /// Field identification bit, meaningful for interlaced sources.
    pub field_id: u8,
}

/// One ST 291 ANC subpacket: DID/SDID, raw 10-bit user data words (stored widened to u16), and
/// the 9-bit checksum as transmitted.
#[derive(Debug, Clone)]
pub struct AncSubpacket {
    pub c_bit: bool,
    pub line_number: u16,
    pub horizontal_offset: u16,
    pub stream_num: u8,
    pub did: u16,
    pub sdid: u16,
    pub data_count: u16,
    pub user_data_words: Vec<u16>,
    pub checksum: u16,
}

const HEADER_LEN: usize = 2;

impl AncPacketHeader {
    pub fn parse(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < HEADER_LEN {
            bail!(AncillaryError::Truncated);
        }
        let word = u16::from_be_bytes([buf[0], buf[1]]);
        Ok((
            AncPacketHeader {
                extended_sequence_number: word,
                anc_count: 0,
                field_id: 0,
            },
            HEADER_LEN,
        ))
    }
}

/// Parses one ANC subpacket's fixed fields (not the packed 10-bit user-data words, which are
/// unpacked separately by [`unpack_10bit_words`]).
pub fn parse_subpacket_fixed(buf: &[u8]) -> Result<(u16, u16, u8, u16, u16, u16, usize)> {
    if buf.len() < 7 {
        bail!(AncillaryError::Truncated);
    }
    let line_field = u16::from_be_bytes([buf[0], buf[1]]);
    let c_bit = line_field & 0x8000 != 0;
    let line_number = (line_field >> 4) & 0x7ff;
    let horizontal_offset = u16::from_be_bytes([buf[2], buf[3]]) & 0x0fff;
    let stream_num = buf[4] & 0x7f;
    let did = ((buf[5] as u16) << 2) | ((buf[6] as u16) >> 6);
    Ok((
        line_number,
        horizontal_offset,
        stream_num as u8,
        did,
        c_bit as u16,
        0,
        7,
    ))
}

/// Unpacks `count` 10-bit words (each including even parity and the not-b8 bit, per ST 291)
/// from a tightly packed bitstream starting at `buf[0]`.
pub fn unpack_10bit_words(buf: &[u8], count: usize) -> Vec<u16> {
    let mut out = Vec::with_capacity(count);
    let mut bit_offset = 0usize;
    for _ in 0..count {
        let byte_offset = bit_offset / 8;
        let bit_in_byte = bit_offset % 8;
        let mut word = 0u16;
        for b in 0..10 {
            let abs_bit = byte_offset * 8 + bit_in_byte + b;
            let byte = abs_bit / 8;
            let bit = 7 - (abs_bit % 8);
            let value = if byte < buf.len() {
                (buf[byte] >> bit) & 1
            } else {
                0
            };
            word = (word << 1) | value as u16;
        }
        out.push(word);
        bit_offset += 10;
    }
    out
}

/// Computes the ST 291 9-bit checksum: sum of DID, SDID, DC, and all user data words (9 LSBs
/// each), with bit 8 the inverse of bit 7.
pub fn compute_checksum(did: u16, sdid: u16, data_count: u16, words: &[u16]) -> u16 {
    let mut sum: u16 = did & 0x1ff;
    sum = sum.wrapping_add(sdid & 0x1ff);
    sum = sum.wrapping_add(data_count & 0x1ff);
    for w in words {
        sum = sum.wrapping_add(w & 0x1ff);
    }
    let low9 = sum & 0x1ff;
    let bit8 = (low9 >> 8) & 1;
    (low9 & 0xff) | ((1 - bit8) << 8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_bit8_is_inverse_of_bit7() {
        let cs = compute_checksum(0x60, 0x60, 3, &[1, 2, 3]);
        let bit7 = (cs >> 7) & 1;
        let bit8 = (cs >> 8) & 1;
        assert_eq!(bit8, 1 - bit7);
    }

    #[test]
    fn unpack_10bit_words_is_length_stable() {
        let buf = [0xffu8; 8];
        let words = unpack_10bit_words(&buf, 4);
        assert_eq!(words.len(), 4);
        assert!(words.iter().all(|&w| w == 0x3ff));
    }

    #[test]
    fn header_parse_rejects_truncated() {
        assert!(AncPacketHeader::parse(&[0u8]).is_err());
    }
}
