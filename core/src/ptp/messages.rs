//! IEEE 1588v2 PTP message wire formats, restricted to the subset a two-step slave needs:
//! SYNC, FOLLOW_UP, DELAY_REQ, DELAY_RESP, ANNOUNCE.

use crate::utils::types::*;

/// PTP event-message UDP port (SYNC, DELAY_REQ, PDELAY_REQ, PDELAY_RESP).
pub const EVENT_PORT: u16 = 319;
/// PTP general-message UDP port (FOLLOW_UP, DELAY_RESP, ANNOUNCE, SIGNALING, MANAGEMENT).
pub const GENERAL_PORT: u16 = 320;

/// Marker placed in the high 16 bits of a derived clock identity.
pub const CLOCK_IDENTITY_MAGIC: u16 = 0xfeff;

/// PTP `messageType` field values (lower nibble of the first header byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Sync = 0,
    DelayReq = 1,
    PDelayReq = 2,
    PDelayResp = 3,
    FollowUp = 8,
    DelayResp = 9,
    PDelayRespFollowUp = 10,
    Announce = 11,
    Signaling = 12,
    Management = 13,
}

impl MessageType {
    pub fn from_u8(v: u8) -> Option<MessageType> {
        use MessageType::*;
        Some(match v {
            0 => Sync,
            1 => DelayReq,
            2 => PDelayReq,
            3 => PDelayResp,
            8 => FollowUp,
            9 => DelayResp,
            10 => PDelayRespFollowUp,
            11 => Announce,
            12 => Signaling,
            13 => Management,
            _ => return None,
        })
    }
}

/// A PTP 10-byte timestamp: 48-bit seconds, 32-bit nanoseconds.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C, packed)]
pub struct PtpTimestamp {
    pub seconds_msb: u16be,
    pub seconds_lsb: u32be,
    pub nanoseconds: u32be,
}

impl PtpTimestamp {
    pub fn to_nanos(self) -> i128 {
        let seconds = ((u16::from(self.seconds_msb) as u64) << 32) | u32::from(self.seconds_lsb) as u64;
        seconds as i128 * 1_000_000_000 + u32::from(self.nanoseconds) as i128
    }

    pub fn from_nanos(ns: i128) -> PtpTimestamp {
        let seconds = (ns / 1_000_000_000) as u64;
        let nanoseconds = (ns % 1_000_000_000) as u32;
        PtpTimestamp {
            seconds_msb: (((seconds >> 32) & 0xffff) as u16).into(),
            seconds_lsb: ((seconds & 0xffff_ffff) as u32).into(),
            nanoseconds: nanoseconds.into(),
        }
    }
}

/// Fixed 34-byte PTP common header.
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct PtpHeader {
    pub transport_specific_message_type: u8,
    pub reserved_version_ptp: u8,
    pub message_length: u16be,
    pub domain_number: u8,
    pub reserved1: u8,
    pub flag_field: u16be,
    pub correction_field: u64be,
    pub reserved2: u32be,
    pub source_port_identity: [u8; 10],
    pub sequence_id: u16be,
    pub control_field: u8,
    pub log_message_interval: i8,
}

impl PtpHeader {
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_u8(self.transport_specific_message_type & 0x0f)
    }
}

/// SYNC message body (header already parsed separately).
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct SyncMessage {
    pub origin_timestamp: PtpTimestamp,
}

/// FOLLOW_UP message body.
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct FollowUpMessage {
    pub precise_origin_timestamp: PtpTimestamp,
}

/// DELAY_RESP message body.
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct DelayRespMessage {
    pub receive_timestamp: PtpTimestamp,
    pub requesting_port_identity: [u8; 10],
}

/// ANNOUNCE message body (grandmaster/clock-quality fields used to select a master).
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct AnnounceMessage {
    pub origin_timestamp: PtpTimestamp,
    pub current_utc_offset: u16be,
    pub reserved: u8,
    pub grandmaster_priority1: u8,
    pub grandmaster_clock_quality: u32be,
    pub grandmaster_priority2: u8,
    pub grandmaster_identity: u64be,
    pub steps_removed: u16be,
    pub time_source: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_round_trips_known_values() {
        assert_eq!(MessageType::from_u8(0), Some(MessageType::Sync));
        assert_eq!(MessageType::from_u8(8), Some(MessageType::FollowUp));
        assert_eq!(MessageType::from_u8(11), Some(MessageType::Announce));
        assert_eq!(MessageType::from_u8(0xff), None);
    }

    #[test]
    fn timestamp_nanos_round_trip() {
        let ts = PtpTimestamp::from_nanos(1_700_000_000_123_456_789);
        assert_eq!(ts.to_nanos(), 1_700_000_000_123_456_789);
    }
}
