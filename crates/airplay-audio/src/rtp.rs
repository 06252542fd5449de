//! RTP framing for RAOP audio and control datagrams.

use airplay_core::error::{ParseError, Result};

/// RTP payload types used on the RAOP ports.
pub mod payload_types {
    pub const TIMING_REQUEST: u8 = 0x52;
    pub const TIMING_RESPONSE: u8 = 0x53;
    pub const SYNC: u8 = 0x54;
    pub const RETRANSMIT_REQUEST: u8 = 0x55;
    pub const RETRANSMIT_RESPONSE: u8 = 0x56;
    pub const AUDIO: u8 = 0x60;
}

/// RTP header length.
pub const RTP_HEADER_LEN: usize = 12;

/// Sync datagram length.
pub const SYNC_PACKET_LEN: usize = 20;

/// Retransmit request length.
pub const RETRANSMIT_REQUEST_LEN: usize = 8;

/// RTP header (12 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    /// Marker bit, set on the first packet of a stream.
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    pub fn new(payload_type: u8, sequence: u16, timestamp: u32, ssrc: u32) -> Self {
        Self {
            marker: false,
            payload_type,
            sequence,
            timestamp,
            ssrc,
        }
    }

    /// Audio header for packet `sequence`.
    pub fn audio(sequence: u16, timestamp: u32, ssrc: u32) -> Self {
        Self::new(payload_types::AUDIO, sequence, timestamp, ssrc)
    }

    pub fn with_marker(mut self, marker: bool) -> Self {
        self.marker = marker;
        self
    }

    /// Serialize to 12 bytes.
    pub fn serialize(&self) -> [u8; RTP_HEADER_LEN] {
        let mut buf = [0u8; RTP_HEADER_LEN];
        // V=2, no padding, extension or CSRCs
        buf[0] = 0x80;
        buf[1] = ((self.marker as u8) << 7) | (self.payload_type & 0x7F);
        buf[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        buf[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        buf
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < RTP_HEADER_LEN {
            return Err(ParseError::Truncated {
                expected: RTP_HEADER_LEN,
                actual: data.len(),
            }
            .into());
        }
        if data[0] >> 6 != 2 {
            return Err(ParseError::InvalidFormat(format!("RTP version {}", data[0] >> 6)).into());
        }

        Ok(Self {
            marker: data[1] & 0x80 != 0,
            payload_type: data[1] & 0x7F,
            sequence: u16::from_be_bytes([data[2], data[3]]),
            timestamp: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            ssrc: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
        })
    }
}

/// Retransmit request (payload type 0x55) from a receiver's control port.
///
/// ```text
/// 0x80 0xD5 | 2 bytes unused | first seq (BE) | count (BE)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetransmitRequest {
    /// Sequence number of the first lost packet.
    pub first_sequence: u16,
    /// Number of lost packets.
    pub count: u16,
}

impl RetransmitRequest {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < RETRANSMIT_REQUEST_LEN {
            return Err(ParseError::Truncated {
                expected: RETRANSMIT_REQUEST_LEN,
                actual: data.len(),
            }
            .into());
        }
        if data[0] != 0x80 || data[1] != 0x80 | payload_types::RETRANSMIT_REQUEST {
            return Err(ParseError::InvalidFormat(format!(
                "not a retransmit request: {:02x} {:02x}",
                data[0], data[1]
            ))
            .into());
        }

        Ok(Self {
            first_sequence: u16::from_be_bytes([data[4], data[5]]),
            count: u16::from_be_bytes([data[6], data[7]]),
        })
    }

    pub fn serialize(&self) -> [u8; RETRANSMIT_REQUEST_LEN] {
        let mut buf = [0u8; RETRANSMIT_REQUEST_LEN];
        buf[0] = 0x80;
        buf[1] = 0x80 | payload_types::RETRANSMIT_REQUEST;
        buf[2..4].copy_from_slice(&1u16.to_be_bytes());
        buf[4..6].copy_from_slice(&self.first_sequence.to_be_bytes());
        buf[6..8].copy_from_slice(&self.count.to_be_bytes());
        buf
    }
}

/// Build a retransmit response (payload type 0x56): a 4-byte header
/// carrying the original sequence number, then the original packet.
pub fn build_retransmit_response(sequence: u16, original_packet: &[u8]) -> Vec<u8> {
    let mut response = Vec::with_capacity(4 + original_packet.len());
    response.push(0x80);
    response.push(0x80 | payload_types::RETRANSMIT_RESPONSE);
    response.extend_from_slice(&sequence.to_be_bytes());
    response.extend_from_slice(original_packet);
    response
}

/// Periodic sync datagram sent to each receiver's control port.
///
/// ```text
/// 0x90|0x80 0xD4 0x00 0x07 | current rtptime | NTP sec | NTP frac | next rtptime
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPacket {
    /// First sync of a stream; sets the extension bit.
    pub first: bool,
    /// RTP time now playing.
    pub current_rtptime: u32,
    /// Wall clock for `current_rtptime`, NTP 32.32.
    pub ntp: u64,
    /// RTP time of the next packet to be sent.
    pub next_rtptime: u32,
}

impl SyncPacket {
    pub fn serialize(&self) -> [u8; SYNC_PACKET_LEN] {
        let mut buf = [0u8; SYNC_PACKET_LEN];
        buf[0] = if self.first { 0x90 } else { 0x80 };
        buf[1] = 0x80 | payload_types::SYNC;
        buf[2] = 0x00;
        buf[3] = 0x07;
        buf[4..8].copy_from_slice(&self.current_rtptime.to_be_bytes());
        buf[8..16].copy_from_slice(&self.ntp.to_be_bytes());
        buf[16..20].copy_from_slice(&self.next_rtptime.to_be_bytes());
        buf
    }
}
