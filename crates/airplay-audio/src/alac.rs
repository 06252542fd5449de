//! ALAC "verbatim" framing.
//!
//! RAOP receivers decode ALAC, but a frame may declare itself
//! uncompressed and carry raw big-endian samples. That is all we emit:
//! a 23-bit frame header followed by every 16-bit sample byte-swapped.
//! Nothing is byte aligned after the header, so everything goes through
//! a big-endian bit writer.

use airplay_core::error::{Result, StreamingError};

/// Bits in the verbatim frame header.
pub const FRAME_HEADER_BITS: usize = 23;

/// Big-endian bit writer over a growable buffer.
#[derive(Debug, Default)]
pub struct BitWriter {
    buf: Vec<u8>,
    /// Bits already used in the last byte, 0 when byte aligned.
    bit_pos: u8,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reuse `buf`'s allocation. Its contents are discarded.
    pub fn with_buffer(mut buf: Vec<u8>) -> Self {
        buf.clear();
        Self { buf, bit_pos: 0 }
    }

    /// Append the low `nbits` bits of `value`, most significant first.
    pub fn write_bits(&mut self, value: u32, nbits: u8) {
        debug_assert!(nbits <= 32);
        let mut remaining = nbits;
        while remaining > 0 {
            if self.bit_pos == 0 {
                self.buf.push(0);
            }
            let free = 8 - self.bit_pos;
            let take = free.min(remaining);
            let shift = remaining - take;
            let chunk = ((value >> shift) & ((1u32 << take) - 1)) as u8;
            if let Some(last) = self.buf.last_mut() {
                *last |= chunk << (free - take);
            }
            self.bit_pos = (self.bit_pos + take) % 8;
            remaining -= take;
        }
    }

    pub fn write_byte(&mut self, byte: u8) {
        self.write_bits(u32::from(byte), 8);
    }

    /// Total bits written.
    pub fn bit_len(&self) -> usize {
        if self.bit_pos == 0 {
            self.buf.len() * 8
        } else {
            (self.buf.len() - 1) * 8 + usize::from(self.bit_pos)
        }
    }

    /// Finish, zero-padding the final partial byte.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Size of a verbatim frame for `pcm_len` bytes of 16-bit stereo input.
pub fn encoded_len(pcm_len: usize) -> usize {
    (FRAME_HEADER_BITS + pcm_len * 8 + 7) / 8
}

/// Frame interleaved little-endian 16-bit stereo samples.
pub fn encode_verbatim(pcm: &[u8]) -> Result<Vec<u8>> {
    encode_verbatim_into(pcm, Vec::new())
}

/// Like [`encode_verbatim`], writing into a recycled buffer.
pub fn encode_verbatim_into(pcm: &[u8], buf: Vec<u8>) -> Result<Vec<u8>> {
    if pcm.is_empty() || pcm.len() % 4 != 0 {
        return Err(StreamingError::Encoding(format!(
            "PCM block of {} bytes is not whole stereo frames",
            pcm.len()
        ))
        .into());
    }

    let mut writer = BitWriter::with_buffer(buf);
    writer.write_bits(1, 3); // channels - 1
    writer.write_bits(0, 4);
    writer.write_bits(0, 8);
    writer.write_bits(0, 4);
    writer.write_bits(0, 1); // no explicit frame size
    writer.write_bits(0, 2);
    writer.write_bits(1, 1); // uncompressed

    for frame in pcm.chunks_exact(4) {
        writer.write_byte(frame[1]);
        writer.write_byte(frame[0]);
        writer.write_byte(frame[3]);
        writer.write_byte(frame[2]);
    }

    Ok(writer.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    mod bit_writer {
        use super::*;

        #[test]
        fn packs_msb_first() {
            let mut w = BitWriter::new();
            w.write_bits(0b1, 1);
            w.write_bits(0b01, 2);
            w.write_bits(0b11111, 5);
            assert_eq!(w.bit_len(), 8);
            assert_eq!(w.into_bytes(), vec![0b1011_1111]);
        }

        #[test]
        fn straddles_byte_boundaries() {
            let mut w = BitWriter::new();
            w.write_bits(0b101, 3);
            w.write_byte(0xFF);
            assert_eq!(w.bit_len(), 11);
            assert_eq!(w.into_bytes(), vec![0b1011_1111, 0b1110_0000]);
        }

        #[test]
        fn wide_values() {
            let mut w = BitWriter::new();
            w.write_bits(0xDEADBEEF, 32);
            assert_eq!(w.into_bytes(), hex::decode("deadbeef").unwrap());
        }

        #[test]
        fn recycled_buffer_is_cleared() {
            let mut w = BitWriter::with_buffer(vec![1, 2, 3]);
            w.write_byte(0xAA);
            assert_eq!(w.into_bytes(), vec![0xAA]);
        }
    }

    mod verbatim {
        use super::*;

        #[test]
        fn full_packet_is_1411_bytes() {
            let pcm = vec![0u8; 1408];
            let frame = encode_verbatim(&pcm).unwrap();
            assert_eq!(frame.len(), 1411);
            assert_eq!(encoded_len(1408), 1411);
        }

        #[test]
        fn header_bits() {
            let frame = encode_verbatim(&[0u8; 4]).unwrap();
            // 001 0000 00000000 0000 0 00 1, then 32 zero sample bits
            assert_eq!(&frame[..3], &[0x20, 0x00, 0x02]);
            assert!(frame[3..].iter().all(|&b| b == 0));
        }

        #[test]
        fn samples_are_byte_swapped_after_header() {
            // L = 0x1234, R = 0x5678 little-endian on input
            let frame = encode_verbatim(&[0x34, 0x12, 0x78, 0x56]).unwrap();
            let mut expected = BitWriter::new();
            expected.write_bits(0x20_0002 >> 1, 23);
            for b in [0x12, 0x34, 0x56, 0x78] {
                expected.write_byte(b);
            }
            assert_eq!(frame, expected.into_bytes());
        }

        #[test]
        fn rejects_partial_frames() {
            assert!(encode_verbatim(&[]).is_err());
            assert!(encode_verbatim(&[0u8; 6]).is_err());
        }
    }
}
