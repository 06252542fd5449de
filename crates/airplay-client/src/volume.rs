//! Logical volume to receiver attenuation.
//!
//! Receivers take a dB attenuation between -30.0 and 0.0, with -144.0
//! meaning mute. A per-device cap in `1..=11` shrinks the usable span.

use airplay_core::config::MAX_VOLUME_CAP;
use tracing::warn;

/// Receiver mute sentinel.
pub const MUTE_ATTENUATION: f32 = -144.0;

/// Attenuation at logical volume 0+.
pub const ATTENUATION_FLOOR: f32 = -30.0;

/// Width of the attenuation range in dB.
pub const ATTENUATION_SPAN: f32 = 30.0;

/// Highest logical volume.
pub const MAX_LOGICAL_VOLUME: i32 = 100;

/// Resolve the configured cap, falling back to [`MAX_VOLUME_CAP`] when it
/// is absent or out of range.
pub fn effective_cap(configured: Option<i32>) -> i32 {
    match configured {
        None => MAX_VOLUME_CAP,
        Some(cap) if (1..=MAX_VOLUME_CAP).contains(&cap) => cap,
        Some(cap) => {
            warn!(
                "Ignoring max_volume {} (must be 1..={}), using {}",
                cap, MAX_VOLUME_CAP, MAX_VOLUME_CAP
            );
            MAX_VOLUME_CAP
        }
    }
}

/// Map a logical volume (0..=100, clamped) to an attenuation.
pub fn attenuation(volume: i32, max_volume: Option<i32>) -> f32 {
    let volume = volume.clamp(0, MAX_LOGICAL_VOLUME);
    if volume == 0 {
        return MUTE_ATTENUATION;
    }
    let cap = effective_cap(max_volume);
    ATTENUATION_FLOOR
        + (cap * volume) as f32 * ATTENUATION_SPAN / (MAX_LOGICAL_VOLUME * MAX_VOLUME_CAP) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_mute() {
        assert_eq!(attenuation(0, None), MUTE_ATTENUATION);
        assert_eq!(attenuation(0, Some(3)), MUTE_ATTENUATION);
        assert_eq!(attenuation(-5, None), MUTE_ATTENUATION);
    }

    #[test]
    fn full_volume_unconfigured_is_zero_db() {
        assert_eq!(attenuation(100, None), 0.0);
        assert_eq!(attenuation(250, None), 0.0);
    }

    #[test]
    fn capped_device_at_half_volume() {
        let expected = -30.0 + (8.0 * 50.0 * 30.0) / (100.0 * 11.0);
        assert!((attenuation(50, Some(8)) - expected).abs() < 1e-5);
    }

    #[test]
    fn mapping_is_monotonic() {
        for cap in [None, Some(1), Some(8), Some(11)] {
            let mut previous = attenuation(0, cap);
            for volume in 1..=100 {
                let current = attenuation(volume, cap);
                assert!(current > previous, "cap {:?} volume {}", cap, volume);
                previous = current;
            }
        }
    }

    #[test]
    fn misconfigured_cap_falls_back() {
        assert_eq!(effective_cap(Some(0)), MAX_VOLUME_CAP);
        assert_eq!(effective_cap(Some(12)), MAX_VOLUME_CAP);
        assert_eq!(effective_cap(Some(5)), 5);
        assert_eq!(attenuation(100, Some(40)), 0.0);
    }
}
