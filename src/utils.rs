//! Various common, shared helper tools.

pub mod buffer;
pub mod decoder;
pub mod dsp;
pub mod sync;
pub mod wave;

// -------------------------------------------------------------------------------------------------

/// Max number of add/subtract steps in [`wrap_value_safe`] and [`reflect_value_safe`] before
/// giving up and returning the range's center.
const MAX_WRAP_ITERATIONS: usize = 100;

// -------------------------------------------------------------------------------------------------

/// Convert a pitch offset in semitones into a playback speed factor.
#[inline]
pub fn speed_from_semitones(semitones: f32) -> f64 {
    2.0_f64.powf(semitones as f64 / 12.0)
}

// -------------------------------------------------------------------------------------------------

/// Wrap `value` into the half open ring `[min, max)`.
///
/// Degenerated ranges return `min` right away. Values which can't be wrapped within a few
/// steps (huge offsets) and non finite values fall back to the range's center or `min`, so
/// this never loops forever or spreads NaNs.
pub fn wrap_value_safe(min: f64, value: f64, max: f64) -> f64 {
    if max <= min {
        return min;
    }
    if !value.is_finite() {
        return min;
    }
    let len = max - min;
    let mut value = value;
    for _ in 0..MAX_WRAP_ITERATIONS {
        if value >= max {
            value -= len;
        } else if value < min {
            value += len;
        } else {
            return value;
        }
    }
    min + len * 0.5
}

/// Reflect `value` at the borders of `[min, max]` (ping-pong folding).
///
/// Same degenerated range and runaway guards as [`wrap_value_safe`].
pub fn reflect_value_safe(min: f64, value: f64, max: f64) -> f64 {
    if max <= min {
        return min;
    }
    if !value.is_finite() {
        return min;
    }
    let mut value = value;
    for _ in 0..MAX_WRAP_ITERATIONS {
        if value > max {
            value = 2.0 * max - value;
        } else if value < min {
            value = 2.0 * min - value;
        } else {
            return value;
        }
    }
    min + (max - min) * 0.5
}

// -------------------------------------------------------------------------------------------------
