//! Audio packets and the packetizer.

use airplay_core::error::Result;
use rand::Rng;
use tracing::trace;

use crate::alac;
use crate::cipher::PacketCipher;
use crate::rtp::{RtpHeader, RTP_HEADER_LEN};

/// One audio datagram in both wire forms. Immutable once built.
#[derive(Debug, Clone)]
pub struct AudioPacket {
    seq: u16,
    rtptime: u32,
    clear: Vec<u8>,
    encrypted: Vec<u8>,
}

impl AudioPacket {
    pub fn seq(&self) -> u16 {
        self.seq
    }

    pub fn rtptime(&self) -> u32 {
        self.rtptime
    }

    /// Header plus cleartext ALAC frame.
    pub fn clear(&self) -> &[u8] {
        &self.clear
    }

    /// Header plus encrypted frame; the unaligned tail stays clear.
    pub fn encrypted(&self) -> &[u8] {
        &self.encrypted
    }

    /// The bytes a session should receive.
    pub fn wire(&self, encrypt: bool) -> &[u8] {
        if encrypt {
            &self.encrypted
        } else {
            &self.clear
        }
    }

    fn into_buffers(self) -> (Vec<u8>, Vec<u8>) {
        (self.clear, self.encrypted)
    }
}

/// Turns PCM blocks into numbered, encrypted audio packets.
pub struct Packetizer {
    cipher: Box<dyn PacketCipher>,
    ssrc: u32,
    next_seq: u16,
    first: bool,
    scratch: Vec<u8>,
}

impl Packetizer {
    /// Random SSRC and starting sequence number.
    pub fn new(cipher: Box<dyn PacketCipher>) -> Self {
        let mut rng = rand::thread_rng();
        let ssrc = rng.gen();
        let seq = rng.gen();
        Self::with_state(cipher, ssrc, seq)
    }

    pub fn with_state(cipher: Box<dyn PacketCipher>, ssrc: u32, next_seq: u16) -> Self {
        Self {
            cipher,
            ssrc,
            next_seq,
            first: true,
            scratch: Vec::new(),
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Sequence number the next packet will carry.
    pub fn next_seq(&self) -> u16 {
        self.next_seq
    }

    /// Set the marker on the next packet, as after a flush.
    pub fn restart_stream(&mut self) {
        self.first = true;
    }

    /// Build the packet for `pcm` playing at `rtptime`. `recycled`, when
    /// given, donates its buffers.
    pub fn packetize(&mut self, pcm: &[u8], rtptime: u32, recycled: Option<AudioPacket>) -> Result<AudioPacket> {
        let (mut clear, mut encrypted) = recycled
            .map(AudioPacket::into_buffers)
            .unwrap_or_default();

        let frame = alac::encode_verbatim_into(pcm, std::mem::take(&mut self.scratch))?;

        let seq = self.next_seq;
        let header = RtpHeader::audio(seq, rtptime, self.ssrc)
            .with_marker(self.first)
            .serialize();

        clear.clear();
        clear.extend_from_slice(&header);
        clear.extend_from_slice(&frame);

        encrypted.clear();
        encrypted.extend_from_slice(&clear);
        self.cipher.encrypt_payload(&mut encrypted[RTP_HEADER_LEN..]);

        self.scratch = frame;
        self.first = false;
        self.next_seq = seq.wrapping_add(1);
        trace!("packetized seq={} rtptime={} len={}", seq, rtptime, clear.len());

        Ok(AudioPacket {
            seq,
            rtptime,
            clear,
            encrypted,
        })
    }
}

#[cfg(test)]
pub(crate) fn test_packet(seq: u16) -> AudioPacket {
    AudioPacket {
        seq,
        rtptime: u32::from(seq) * 352,
        clear: seq.to_be_bytes().to_vec(),
        encrypted: seq.to_be_bytes().to_vec(),
    }
}
