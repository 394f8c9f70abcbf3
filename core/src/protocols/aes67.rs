//! ST 2110-30 (AES67 raw PCM) and ST 2110-31 (AM824) audio payload packing.
//!
//! Both profiles carry the RTP base header followed directly by interleaved sample data; there
//! is no payload-specific header. ST 2110-30 packs samples at 16/24 bits per channel, network
//! byte order, channel-interleaved. ST 2110-31 wraps each 24-bit sample in an AM824 (IEC 61883-6)
//! 32-bit container with a leading label byte.

use anyhow::{bail, Result};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AudioPayloadError {
    #[error("buffer not a multiple of the frame size")]
    Misaligned,
    #[error("unsupported bit depth {0}")]
    UnsupportedBitDepth(u8),
}

/// AM824 label byte for a valid, unlabeled raw-audio sample (IEC 61883-6 §A.2).
const AM824_LABEL_RAW: u8 = 0x40;

/// Packet duration classes defined by ST 2110-30 Annex A.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketTime {
    Us125,
    Us250,
    Us333,
    Ms1,
    Ms4,
}

impl PacketTime {
    /// Number of samples per channel carried in one packet at the given sampling rate.
    pub fn samples_per_packet(self, sampling_rate_hz: u32) -> u32 {
        match self {
            PacketTime::Us125 => sampling_rate_hz / 8000,
            PacketTime::Us250 => sampling_rate_hz / 4000,
            PacketTime::Us333 => sampling_rate_hz / 3000,
            PacketTime::Ms1 => sampling_rate_hz / 1000,
            PacketTime::Ms4 => sampling_rate_hz / 250,
        }
    }
}

/// Writes one interleaved PCM frame (one sample per channel) in network byte order at
/// `bits_per_sample` (16 or 24), ST 2110-30 style (no label byte).
pub fn write_pcm_frame(buf: &mut [u8], samples: &[i32], bits_per_sample: u8) -> Result<usize> {
    let bytes_per_sample = match bits_per_sample {
        16 => 2,
        24 => 3,
        other => bail!(AudioPayloadError::UnsupportedBitDepth(other)),
    };
    let needed = samples.len() * bytes_per_sample;
    debug_assert!(buf.len() >= needed);
    for (i, sample) in samples.iter().enumerate() {
        let be = sample.to_be_bytes();
        let start = i * bytes_per_sample;
        buf[start..start + bytes_per_sample].copy_from_slice(&be[4 - bytes_per_sample..]);
    }
    Ok(needed)
}

/// Reads `nb_channels` interleaved PCM samples at `bits_per_sample` starting at `buf[0]`.
pub fn read_pcm_frame(buf: &[u8], nb_channels: usize, bits_per_sample: u8) -> Result<Vec<i32>> {
    let bytes_per_sample = match bits_per_sample {
        16 => 2,
        24 => 3,
        other => bail!(AudioPayloadError::UnsupportedBitDepth(other)),
    };
    if buf.len() < nb_channels * bytes_per_sample {
        bail!(AudioPayloadError::Misaligned);
    }
    let mut out = Vec::with_capacity(nb_channels);
    for i in 0..nb_channels {
        let start = i * bytes_per_sample;
        let mut be = [0u8; 4];
        be[4 - bytes_per_sample..].copy_from_slice(&buf[start..start + bytes_per_sample]);
        let value = i32::from_be_bytes(be);
        // sign-extend from bytes_per_sample*8 bits
        let shift = 32 - (bytes_per_sample * 8) as u32;
        out.push((value << shift) >> shift);
    }
    Ok(out)
}

/// Writes one interleaved AM824 (ST 2110-31) frame: each 24-bit sample prefixed with a label
/// byte, 4 bytes total per channel per sample.
pub fn write_am824_frame(buf: &mut [u8], samples: &[i32]) -> usize {
    let needed = samples.len() * 4;
    debug_assert!(buf.len() >= needed);
    for (i, sample) in samples.iter().enumerate() {
        let start = i * 4;
        buf[start] = AM824_LABEL_RAW;
        let be = sample.to_be_bytes();
        buf[start + 1..start + 4].copy_from_slice(&be[1..4]);
    }
    needed
}

/// Reads `nb_channels` AM824 samples starting at `buf[0]`.
pub fn read_am824_frame(buf: &[u8], nb_channels: usize) -> Result<Vec<i32>> {
    if buf.len() < nb_channels * 4 {
        bail!(AudioPayloadError::Misaligned);
    }
    let mut out = Vec::with_capacity(nb_channels);
    for i in 0..nb_channels {
        let start = i * 4;
        let mut be = [0u8; 4];
        be[1..4].copy_from_slice(&buf[start + 1..start + 4]);
        out.push((i32::from_be_bytes(be) << 8) >> 8);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_24bit_round_trips() {
        let samples = vec![1, -1, 8_388_607, -8_388_608];
        let mut buf = vec![0u8; samples.len() * 3];
        write_pcm_frame(&mut buf, &samples, 24).unwrap();
        let out = read_pcm_frame(&buf, samples.len(), 24).unwrap();
        assert_eq!(out, samples);
    }

    #[test]
    fn am824_round_trips_and_labels() {
        let samples = vec![42, -42];
        let mut buf = vec![0u8; samples.len() * 4];
        write_am824_frame(&mut buf, &samples);
        assert_eq!(buf[0], AM824_LABEL_RAW);
        assert_eq!(buf[4], AM824_LABEL_RAW);
        let out = read_am824_frame(&buf, samples.len()).unwrap();
        assert_eq!(out, samples);
    }

    #[test]
    fn samples_per_packet_matches_annex_a() {
        assert_eq!(PacketTime::Ms1.samples_per_packet(48_000), 48);
        assert_eq!(PacketTime::Us125.samples_per_packet(48_000), 6);
    }
}
