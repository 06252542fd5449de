//! # airplay-audio
//!
//! Real-time audio framing for RAOP receivers.
//!
//! This crate provides:
//! - ALAC verbatim framing via a big-endian bit writer
//! - RTP audio, sync and retransmit datagram codecs
//! - The packetizer producing clear and encrypted packets
//! - The fixed-capacity retransmission ring

pub mod alac;
pub mod cipher;
mod packet;
mod ring;
pub mod rtp;

pub use alac::BitWriter;
pub use cipher::{NullCipher, PacketCipher};
pub use packet::{AudioPacket, Packetizer};
pub use ring::{RetransmitRing, RING_CAPACITY};
pub use rtp::{
    build_retransmit_response, RetransmitRequest, RtpHeader, SyncPacket, RTP_HEADER_LEN,
};
