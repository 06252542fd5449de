//! Wall clock, NTP timestamps and the playback clock.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// NTP epoch: January 1, 1900 (seconds from 1900 to 1970).
pub const NTP_EPOCH_OFFSET: u64 = 2_208_988_800;

/// 32.32 fixed-point NTP timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct NtpTimestamp {
    pub seconds: u32,
    pub fraction: u32,
}

impl NtpTimestamp {
    pub fn now() -> Self {
        Self::from_unix_ns(now_unix_ns())
    }

    pub fn from_unix_ns(unix_ns: u64) -> Self {
        Self::from_u64(unix_to_ntp(unix_ns))
    }

    pub fn from_u64(ntp: u64) -> Self {
        Self {
            seconds: (ntp >> 32) as u32,
            fraction: ntp as u32,
        }
    }

    pub fn to_u64(self) -> u64 {
        (u64::from(self.seconds) << 32) | u64::from(self.fraction)
    }

    pub fn to_unix_ns(self) -> u64 {
        ntp_to_unix(self.to_u64())
    }

    pub fn to_be_bytes(self) -> [u8; 8] {
        self.to_u64().to_be_bytes()
    }
}

/// Current wall-clock time in nanoseconds since the Unix epoch.
pub fn now_unix_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos() as u64
}

/// Maps RTP time to wall time around one anchor: the RTP time of the
/// packet that plays at a known instant.
#[derive(Debug, Clone, Copy)]
pub struct PlaybackClock {
    sample_rate: u32,
    anchor_rtp: u32,
    anchor_wall_ns: u64,
}

impl PlaybackClock {
    pub fn new(sample_rate: u32, anchor_rtp: u32, anchor_wall_ns: u64) -> Self {
        Self {
            sample_rate,
            anchor_rtp,
            anchor_wall_ns,
        }
    }

    pub fn anchor(&self) -> (u32, u64) {
        (self.anchor_rtp, self.anchor_wall_ns)
    }

    /// RTP time playing at `wall_ns`.
    pub fn rtptime_at(&self, wall_ns: u64) -> u32 {
        if wall_ns >= self.anchor_wall_ns {
            let elapsed = ns_to_samples(wall_ns - self.anchor_wall_ns, self.sample_rate);
            self.anchor_rtp.wrapping_add(elapsed)
        } else {
            let ahead = ns_to_samples(self.anchor_wall_ns - wall_ns, self.sample_rate);
            self.anchor_rtp.wrapping_sub(ahead)
        }
    }

    /// Wall time at which `rtptime` plays. RTP times behind the anchor by
    /// less than half the 32-bit range count as past.
    pub fn wall_at(&self, rtptime: u32) -> u64 {
        let delta = rtptime.wrapping_sub(self.anchor_rtp) as i32;
        if delta >= 0 {
            self.anchor_wall_ns + samples_to_ns(delta as u32, self.sample_rate)
        } else {
            self.anchor_wall_ns
                .saturating_sub(samples_to_ns(delta.unsigned_abs(), self.sample_rate))
        }
    }
}

// Conversion helpers

/// Convert samples to nanoseconds at given sample rate.
pub fn samples_to_ns(samples: u32, sample_rate: u32) -> u64 {
    (samples as u64 * 1_000_000_000) / sample_rate as u64
}

/// Convert nanoseconds to samples at given sample rate.
pub fn ns_to_samples(ns: u64, sample_rate: u32) -> u32 {
    ((ns as u128 * sample_rate as u128) / 1_000_000_000) as u32
}

/// Convert Unix nanoseconds to NTP timestamp (64-bit: 32-bit seconds + 32-bit fraction).
pub fn unix_to_ntp(unix_ns: u64) -> u64 {
    let unix_secs = unix_ns / 1_000_000_000;
    let frac_ns = unix_ns % 1_000_000_000;

    let ntp_secs = unix_secs + NTP_EPOCH_OFFSET;
    // frac_ntp = frac_ns * 2^32 / 10^9
    let ntp_frac = ((frac_ns as u128) << 32) / 1_000_000_000;

    (ntp_secs << 32) | (ntp_frac as u64)
}

/// Convert NTP timestamp to Unix nanoseconds.
pub fn ntp_to_unix(ntp: u64) -> u64 {
    let ntp_secs = ntp >> 32;
    let ntp_frac = ntp & 0xFFFFFFFF;

    let unix_secs = ntp_secs.saturating_sub(NTP_EPOCH_OFFSET);
    // frac_ns = ntp_frac * 10^9 / 2^32
    let frac_ns = ((ntp_frac as u128) * 1_000_000_000) >> 32;

    unix_secs * 1_000_000_000 + frac_ns as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    mod ntp_conversion {
        use super::*;

        #[test]
        fn unix_epoch_is_ntp_offset() {
            assert_eq!(unix_to_ntp(0), NTP_EPOCH_OFFSET << 32);
            assert_eq!(ntp_to_unix(NTP_EPOCH_OFFSET << 32), 0);
        }

        #[test]
        fn half_second_fraction() {
            let ntp = unix_to_ntp(500_000_000);
            assert_eq!(ntp & 0xFFFF_FFFF, 0x8000_0000);
        }

        #[test]
        fn conversion_is_close_to_lossless() {
            let original = 1_700_000_000_123_456_789u64;
            let back = ntp_to_unix(unix_to_ntp(original));
            assert!(original - back < 2);
        }

        #[test]
        fn timestamp_split_and_bytes() {
            let ts = NtpTimestamp::from_u64(0x0102_0304_0506_0708);
            assert_eq!(ts.seconds, 0x0102_0304);
            assert_eq!(ts.fraction, 0x0506_0708);
            assert_eq!(ts.to_be_bytes(), [1, 2, 3, 4, 5, 6, 7, 8]);
            assert_eq!(ts.to_u64(), 0x0102_0304_0506_0708);
        }

        #[test]
        fn now_is_after_2020() {
            let jan_2020 = (1_577_836_800 + NTP_EPOCH_OFFSET) as u32;
            assert!(NtpTimestamp::now().seconds > jan_2020);
        }
    }

    mod sample_conversion {
        use super::*;

        #[test]
        fn one_second_at_44100() {
            assert_eq!(samples_to_ns(44100, 44100), 1_000_000_000);
            assert_eq!(ns_to_samples(1_000_000_000, 44100), 44100);
        }

        #[test]
        fn one_packet_duration() {
            // 352 frames ≈ 7.98 ms
            assert_eq!(samples_to_ns(352, 44100), 7_981_859);
        }
    }

    mod playback_clock {
        use super::*;

        const ANCHOR_NS: u64 = 1_000_000_000_000;

        #[test]
        fn rtptime_advances_with_wall_time() {
            let clock = PlaybackClock::new(44100, 1000, ANCHOR_NS);
            assert_eq!(clock.rtptime_at(ANCHOR_NS), 1000);
            assert_eq!(clock.rtptime_at(ANCHOR_NS + 1_000_000_000), 45100);
            assert_eq!(clock.rtptime_at(ANCHOR_NS - 1_000_000_000), 1000u32.wrapping_sub(44100));
        }

        #[test]
        fn wall_at_inverts_rtptime_at() {
            let clock = PlaybackClock::new(44100, u32::MAX - 100, ANCHOR_NS);
            let later = (u32::MAX - 100).wrapping_add(44100);
            assert_eq!(clock.wall_at(later), ANCHOR_NS + 1_000_000_000);
            assert_eq!(clock.wall_at(u32::MAX - 44200), ANCHOR_NS - 1_000_000_000);
        }
    }
}
