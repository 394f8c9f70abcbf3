//! ST 2110-41 fast metadata payload.
//!
//! After the RTP base header: a 32-bit big-endian "header chunk" carrying the data-item length,
//! a 22-bit data-item type, and the K-bit (marks a keyframe/complete-state item), followed by
//! the opaque payload padded to a 4-byte boundary.

use anyhow::{bail, Result};
use thiserror::Error;

const HEADER_CHUNK_LEN: usize = 4;

#[derive(Error, Debug)]
pub enum FastMetadataError {
    #[error("buffer too short for the ST 2110-41 header chunk")]
    Truncated,
    #[error("declared data-item length exceeds the buffer")]
    LengthMismatch,
}

/// Parsed header chunk plus the bounds of the padded payload that follows it.
#[derive(Debug)]
pub struct FastMetadataHeader {
    pub data_item_length: u16,
    pub data_item_type: u32,
    pub k_bit: bool,
}

impl FastMetadataHeader {
    /// Parses the 4-byte header chunk at `buf[0]`. Returns the header and the byte offset
    /// where the (4-byte-aligned) payload begins.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < HEADER_CHUNK_LEN {
            bail!(FastMetadataError::Truncated);
        }
        let word = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let data_item_length = (word >> 16) as u16;
        let k_bit = word & 0x0000_0001 != 0;
        let data_item_type = (word >> 1) & 0x3f_ffff;
        Ok((
            FastMetadataHeader {
                data_item_length,
                data_item_type,
                k_bit,
            },
            HEADER_CHUNK_LEN,
        ))
    }

    /// Returns the payload slice described by this header, validating it fits within `buf`.
    pub fn payload<'a>(&self, buf: &'a [u8]) -> Result<&'a [u8]> {
        let len = self.data_item_length as usize;
        if buf.len() < len {
            bail!(FastMetadataError::LengthMismatch);
        }
        Ok(&buf[..len])
    }

    /// Encodes the header chunk into `buf[0..4]`.
    pub fn write(buf: &mut [u8], data_item_length: u16, data_item_type: u32, k_bit: bool) {
        debug_assert!(buf.len() >= HEADER_CHUNK_LEN);
        let word = ((data_item_length as u32) << 16)
            | ((data_item_type & 0x3f_ffff) << 1)
            | (k_bit as u32);
        buf[0..4].copy_from_slice(&word.to_be_bytes());
    }
}

/// Rounds a payload length up to the next 4-byte boundary, per the padding rule.
pub fn padded_len(data_item_length: usize) -> usize {
    (data_item_length + 3) & !3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_header_fields() {
        let mut buf = [0u8; HEADER_CHUNK_LEN];
        FastMetadataHeader::write(&mut buf, 17, 0x2a_bcde, true);
        let (header, consumed) = FastMetadataHeader::parse(&buf).unwrap();
        assert_eq!(consumed, HEADER_CHUNK_LEN);
        assert_eq!(header.data_item_length, 17);
        assert_eq!(header.data_item_type, 0x2a_bcde);
        assert!(header.k_bit);
    }

    #[test]
    fn padded_len_rounds_to_word_boundary() {
        assert_eq!(padded_len(0), 0);
        assert_eq!(padded_len(1), 4);
        assert_eq!(padded_len(4), 4);
        assert_eq!(padded_len(5), 8);
    }
}
