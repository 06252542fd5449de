//! Audio format definitions for RAOP streaming.
//!
//! RAOP receivers only accept one shape of real-time audio: 44.1 kHz,
//! 16-bit, interleaved stereo, framed as ALAC in blocks of 352 frames.

/// Frames carried by each audio packet.
pub const FRAMES_PER_PACKET: u32 = 352;

/// RTP payload type announced for ALAC in the SDP body.
pub const ALAC_PAYLOAD_TYPE: u8 = 96;

/// Complete audio format specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub bit_depth: u8,
    pub channels: u8,
    pub frames_per_packet: u32,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            bit_depth: 16,
            channels: 2,
            frames_per_packet: FRAMES_PER_PACKET,
        }
    }
}

impl AudioFormat {
    /// Bytes per frame (one sample across all channels).
    ///
    /// For 16-bit stereo audio: 16 bits * 2 channels / 8 = 4 bytes per frame.
    pub fn bytes_per_frame(&self) -> usize {
        (self.bit_depth as usize * self.channels as usize) / 8
    }

    /// Size of one packet's worth of raw PCM input.
    pub fn bytes_per_packet(&self) -> usize {
        self.bytes_per_frame() * self.frames_per_packet as usize
    }

    /// The `a=fmtp` parameter list describing the ALAC stream.
    ///
    /// Field order follows the ALAC magic cookie: frame length, compatible
    /// version, bit depth, pb, mb, kb, channels, max run, max frame bytes,
    /// average bit rate, sample rate.
    pub fn alac_fmtp(&self) -> String {
        format!(
            "{} 0 {} 40 10 14 {} 255 0 0 {}",
            self.frames_per_packet, self.bit_depth, self.channels, self.sample_rate
        )
    }

    /// Convert a duration in milliseconds to a sample count at this rate.
    pub fn ms_to_samples(&self, ms: u64) -> u64 {
        ms * self.sample_rate as u64 / 1000
    }
}
