//! NTP-style timing datagrams on the RAOP timing port.
//!
//! Receivers send requests (`0x80 0xD2`) and expect responses
//! (`0x80 0xD3`), both 32 bytes:
//!
//! ```text
//! 0-1   magic
//! 2-3   sequence / flags
//! 4-7   zero
//! 8-15  origin timestamp (response: requester's transmit time)
//! 16-23 receive timestamp
//! 24-31 transmit timestamp
//! ```

use airplay_core::error::{ParseError, Result};

use crate::clock::NtpTimestamp;

/// RTP payload type for timing request.
pub const TIMING_REQUEST_PT: u8 = 0x52;

/// RTP payload type for timing response.
pub const TIMING_RESPONSE_PT: u8 = 0x53;

/// Size of both request and response.
pub const TIMING_PACKET_LEN: usize = 32;

/// A timing request from a receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingRequest {
    /// Byte 2 of the request, echoed back.
    pub sequence: u8,
    /// Requester's transmit timestamp.
    pub transmit: NtpTimestamp,
}

impl TimingRequest {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() != TIMING_PACKET_LEN {
            return Err(ParseError::Truncated {
                expected: TIMING_PACKET_LEN,
                actual: data.len(),
            }
            .into());
        }
        if data[0] != 0x80 || data[1] != 0x80 | TIMING_REQUEST_PT {
            return Err(ParseError::InvalidFormat(format!(
                "not a timing request: {:02x} {:02x}",
                data[0], data[1]
            ))
            .into());
        }

        let mut transmit = [0u8; 8];
        transmit.copy_from_slice(&data[24..32]);
        Ok(Self {
            sequence: data[2],
            transmit: NtpTimestamp::from_u64(u64::from_be_bytes(transmit)),
        })
    }

    pub fn serialize(&self) -> [u8; TIMING_PACKET_LEN] {
        let mut buf = [0u8; TIMING_PACKET_LEN];
        buf[0] = 0x80;
        buf[1] = 0x80 | TIMING_REQUEST_PT;
        buf[2] = self.sequence;
        buf[3] = 0x07;
        buf[24..32].copy_from_slice(&self.transmit.to_be_bytes());
        buf
    }
}

/// Our answer, minus the transmit stamp which is taken at send time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingResponse {
    pub sequence: u8,
    /// The request's transmit timestamp, echoed as origin.
    pub origin: NtpTimestamp,
    /// When the request arrived.
    pub receive: NtpTimestamp,
}

impl TimingResponse {
    pub fn for_request(request: &TimingRequest, receive: NtpTimestamp) -> Self {
        Self {
            sequence: request.sequence,
            origin: request.transmit,
            receive,
        }
    }

    /// Finish the datagram. Call immediately before sending.
    pub fn serialize(&self, transmit: NtpTimestamp) -> [u8; TIMING_PACKET_LEN] {
        let mut buf = [0u8; TIMING_PACKET_LEN];
        buf[0] = 0x80;
        buf[1] = 0x80 | TIMING_RESPONSE_PT;
        buf[2] = self.sequence;
        buf[8..16].copy_from_slice(&self.origin.to_be_bytes());
        buf[16..24].copy_from_slice(&self.receive.to_be_bytes());
        buf[24..32].copy_from_slice(&transmit.to_be_bytes());
        buf
    }
}
