//! Fixed-capacity retransmission window.
//!
//! Packets are held in sequence order, oldest first. Sequence numbers
//! are consecutive, so the slot of `seq` is `seq - oldest` in wrapping
//! 16-bit arithmetic and lookups never walk the ring.

use std::collections::VecDeque;

use airplay_core::error::{Result, StreamingError};

use crate::packet::AudioPacket;

/// Packets kept for resend.
pub const RING_CAPACITY: usize = 1000;

pub struct RetransmitRing {
    packets: VecDeque<AudioPacket>,
    capacity: usize,
}

impl RetransmitRing {
    pub fn new() -> Self {
        Self::with_capacity(RING_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            packets: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest and newest retained sequence numbers.
    pub fn window(&self) -> Option<(u16, u16)> {
        Some((self.packets.front()?.seq(), self.packets.back()?.seq()))
    }

    /// When full, hand out the oldest packet so its buffers can be
    /// reused for the next one.
    pub fn take_recyclable(&mut self) -> Option<AudioPacket> {
        if self.packets.len() >= self.capacity {
            self.packets.pop_front()
        } else {
            None
        }
    }

    /// Append the newest packet, evicting the oldest when full.
    pub fn push(&mut self, packet: AudioPacket) -> Option<AudioPacket> {
        let evicted = self.take_recyclable();
        if let Some((_, newest)) = self.window() {
            debug_assert_eq!(packet.seq(), newest.wrapping_add(1));
        }
        self.packets.push_back(packet);
        evicted
    }

    pub fn get(&self, seq: u16) -> Option<&AudioPacket> {
        let (oldest, _) = self.window()?;
        self.packets.get(usize::from(seq.wrapping_sub(oldest)))
    }

    /// Packets `start .. start + count`. The whole range must be retained;
    /// otherwise nothing is returned.
    pub fn range(&self, start: u16, count: u16) -> Result<impl Iterator<Item = &AudioPacket>> {
        let out_of_window = || StreamingError::OutOfWindow { start, count };
        let (oldest, _) = self.window().ok_or_else(out_of_window)?;
        if count == 0 {
            return Err(out_of_window().into());
        }
        let first = usize::from(start.wrapping_sub(oldest));
        let end = first + usize::from(count);
        if end > self.packets.len() {
            return Err(out_of_window().into());
        }
        Ok(self.packets.range(first..end))
    }

    /// Drop everything, as when the last session goes away.
    pub fn clear(&mut self) {
        self.packets.clear();
        self.packets.shrink_to_fit();
    }
}

impl Default for RetransmitRing {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::test_packet;

    fn filled(from: u16, count: u16) -> RetransmitRing {
        let mut ring = RetransmitRing::new();
        for seq in from..from + count {
            ring.push(test_packet(seq));
        }
        ring
    }

    mod capacity {
        use super::*;

        #[test]
        fn holds_last_thousand_of_1005() {
            let ring = filled(1, 1005);
            assert_eq!(ring.len(), RING_CAPACITY);
            assert_eq!(ring.window(), Some((6, 1005)));
            let seqs: Vec<u16> = ring.range(6, 1000).unwrap().map(|p| p.seq()).collect();
            assert_eq!(seqs, (6..=1005).collect::<Vec<_>>());
        }

        #[test]
        fn full_ring_evicts_exactly_the_oldest() {
            let mut ring = filled(0, 1000);
            let evicted = ring.push(test_packet(1000)).unwrap();
            assert_eq!(evicted.seq(), 0);
            assert_eq!(ring.len(), 1000);
            assert_eq!(ring.window(), Some((1, 1000)));
        }

        #[test]
        fn recyclable_only_when_full() {
            let mut ring = filled(0, 999);
            assert!(ring.take_recyclable().is_none());
            ring.push(test_packet(999));
            assert_eq!(ring.take_recyclable().map(|p| p.seq()), Some(0));
            assert_eq!(ring.len(), 999);
        }

        #[test]
        fn clear_empties() {
            let mut ring = filled(0, 10);
            ring.clear();
            assert!(ring.is_empty());
            assert!(ring.window().is_none());
        }
    }

    mod lookup {
        use super::*;

        #[test]
        fn range_inside_window() {
            let ring = filled(100, 50);
            let seqs: Vec<u16> = ring.range(110, 3).unwrap().map(|p| p.seq()).collect();
            assert_eq!(seqs, vec![110, 111, 112]);
            assert_eq!(ring.get(149).map(|p| p.seq()), Some(149));
            assert!(ring.get(150).is_none());
        }

        #[test]
        fn range_outside_window_is_rejected() {
            let ring = filled(100, 50);
            assert!(ring.range(99, 1).is_err());
            assert!(ring.range(140, 11).is_err());
            assert!(ring.range(150, 1).is_err());
            assert!(ring.range(100, 0).is_err());
            assert_eq!(ring.len(), 50);
            assert_eq!(ring.window(), Some((100, 149)));
        }

        #[test]
        fn empty_ring_rejects() {
            assert!(RetransmitRing::new().range(0, 1).is_err());
        }

        #[test]
        fn window_across_wrap() {
            let mut ring = RetransmitRing::with_capacity(10);
            let mut seq = 65530u16;
            for _ in 0..10 {
                ring.push(test_packet(seq));
                seq = seq.wrapping_add(1);
            }
            assert_eq!(ring.window(), Some((65530, 3)));
            let seqs: Vec<u16> = ring.range(65534, 4).unwrap().map(|p| p.seq()).collect();
            assert_eq!(seqs, vec![65534, 65535, 0, 1]);
            assert!(ring.range(4, 1).is_err());
        }
    }
}
