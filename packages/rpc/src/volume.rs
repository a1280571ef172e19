//! Perceptual <-> amplitude volume conversion.
//!
//! The peer stores amplitude while its UI shows a perceptual value on a
//! decibel curve. The normal range (0-100%) spans 38 dB, measured against the
//! vendor client (amplitude 5 shows as 31%). The boost range (100-200%, output
//! only) spans 6 dB.

/// Dynamic range of the normal 0-100% range.
pub const VOLUME_DYNAMIC_RANGE_DB: f64 = 38.0;
/// Dynamic range of the 100-200% boost range.
pub const VOLUME_BOOST_DYNAMIC_RANGE_DB: f64 = 6.0;

/// Upper bound of microphone (input) volume.
pub const INPUT_MAX: f64 = 100.0;
/// Upper bound of speaker (output) and per-user volume, including boost.
pub const OUTPUT_MAX: f64 = 200.0;

fn normalized_max(max_value: f64) -> f64 {
    if max_value > 100.0 { 100.0 } else { max_value }
}

/// Convert a user-facing volume into the amplitude the peer expects.
///
/// `max_value` is [`INPUT_MAX`] or [`OUTPUT_MAX`]. Both ends of the range map
/// exactly: `0 -> 0.0` and `max_value -> max_value`.
pub fn to_amplitude(perceptual: f64, max_value: f64) -> f64 {
    let perceptual = perceptual.clamp(0.0, max_value);
    if perceptual <= 0.0 {
        return 0.0;
    }
    if perceptual >= max_value {
        return max_value;
    }

    let normalized_max = normalized_max(max_value);
    let db = if perceptual > normalized_max {
        (perceptual - normalized_max) / normalized_max * VOLUME_BOOST_DYNAMIC_RANGE_DB
    } else {
        perceptual / normalized_max * VOLUME_DYNAMIC_RANGE_DB - VOLUME_DYNAMIC_RANGE_DB
    };

    (normalized_max * 10f64.powf(db / 20.0)).clamp(0.0, max_value)
}

/// Convert an amplitude reported by the peer into a user-facing volume.
pub fn to_perceptual(amplitude: f64, max_value: f64) -> f64 {
    let amplitude = amplitude.clamp(0.0, max_value);
    if amplitude <= 0.0 {
        return 0.0;
    }
    if amplitude >= max_value {
        return max_value;
    }

    let normalized_max = normalized_max(max_value);
    let db = 20.0 * (amplitude / normalized_max).log10();
    let perceptual = if db > 0.0 {
        (db / VOLUME_BOOST_DYNAMIC_RANGE_DB + 1.0) * normalized_max
    } else {
        (VOLUME_DYNAMIC_RANGE_DB + db) / VOLUME_DYNAMIC_RANGE_DB * normalized_max
    };

    perceptual.clamp(0.0, max_value)
}
