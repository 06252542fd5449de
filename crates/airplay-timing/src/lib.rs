//! # airplay-timing
//!
//! Clock handling and the UDP listeners RAOP receivers talk back to.
//!
//! This crate provides:
//! - NTP timestamp conversion
//! - The playback clock mapping RTP time to wall time
//! - Timing request/response datagrams
//! - IPv4/IPv6 UDP services for the timing and control ports

mod clock;
mod ntp;
mod service;

pub use clock::{
    now_unix_ns, ns_to_samples, ntp_to_unix, samples_to_ns, unix_to_ntp, NtpTimestamp,
    PlaybackClock, NTP_EPOCH_OFFSET,
};
pub use ntp::{TimingRequest, TimingResponse, TIMING_PACKET_LEN};
pub use service::{Datagram, ServiceKind, UdpService};
