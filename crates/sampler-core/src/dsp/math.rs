//! Small numeric helpers shared by the DSP chain.

/// Convert decibels to a linear gain factor.
#[inline]
pub fn db2gain(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

/// Convert a linear gain factor to decibels.
#[inline]
pub fn gain2db(gain: f64) -> f64 {
    if gain <= 0.0 {
        f64::NEG_INFINITY
    } else {
        20.0 * gain.log10()
    }
}

/// Convert a signed cent offset to a frequency multiplier.
#[inline]
pub fn cent2factor(cents: f64) -> f64 {
    2f64.powf(cents / 1200.0)
}

/// Convert a 32.32 fixed-point sample step back to a floating-point rate
/// relative to `srate`.
#[inline]
pub fn freq64_to_hz(freq64: u64, srate: f64) -> f64 {
    (freq64 as f64 / (1u64 << 32) as f64) * srate
}

/// Convert a floating-point playback frequency into a 32.32 fixed-point
/// sample step for a given output sample rate.
#[inline]
pub fn hz_to_freq64(freq: f64, srate: f64) -> u64 {
    ((freq / srate) * (1u64 << 32) as f64).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn db2gain_zero_is_unity() {
        assert_relative_eq!(db2gain(0.0), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn db2gain_and_gain2db_round_trip() {
        for db in [-24.0, -6.0, 0.0, 3.0, 12.0] {
            assert_relative_eq!(gain2db(db2gain(db)), db, epsilon = 1e-9);
        }
    }

    #[test]
    fn cent2factor_octave_is_double() {
        assert_relative_eq!(cent2factor(1200.0), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn freq64_round_trip() {
        let srate = 44_100.0;
        let freq = 440.0;
        let f64v = hz_to_freq64(freq, srate);
        assert_relative_eq!(freq64_to_hz(f64v, srate), freq, epsilon = 1e-3);
    }
}
