//! Parameter curves which map normalized knob values to engine units.
//!
//! These define the instrument's feel: keep them as they are.

// -------------------------------------------------------------------------------------------------

/// Min/max pitch offset in semitones.
pub const PITCH_RANGE: f32 = 36.0;

/// Half width of the play rate dead zones around -0.5, 0 and 0.5.
pub const PLAY_RATE_NOTCH_WIDTH: f32 = 0.05;

/// Smallest loop length, relative to the selected region.
pub const MIN_LOOP_LENGTH: f32 = 0.001;

// -------------------------------------------------------------------------------------------------

/// Interval between two grains in seconds for the given grain rate knob value [0, 1].
///
/// Ranges from 0.5 seconds at 0 to 10 ms at 1, biased towards slow rates.
#[inline]
pub fn grain_interval(rate: f32) -> f64 {
    let inverted = 1.0 - rate.clamp(0.0, 1.0) as f64;
    0.01 + inverted * inverted * 0.49
}

/// Grain length multiplier (relative to the grain interval) for the given knob value [0, 1].
///
/// Two linear segments: x0.5..x1 for the lower knob half, x1..x8 for the upper one.
#[inline]
pub fn grain_length_multiplier(length: f32) -> f64 {
    let length = length.clamp(0.0, 1.0) as f64;
    if length < 0.5 {
        0.5 + length
    } else {
        1.0 + (length - 0.5) * 2.0 * 7.0
    }
}

/// Snap bipolar play rate knob values [-1, 1] close to -0.5, 0 and 0.5 onto those values.
#[inline]
pub fn play_rate_notch(rate: f32) -> f32 {
    let rate = rate.clamp(-1.0, 1.0);
    for notch in [-0.5, 0.0, 0.5] {
        if (rate - notch).abs() <= PLAY_RATE_NOTCH_WIDTH {
            return notch;
        }
    }
    rate
}

/// Playback speed factor for the given bipolar play rate knob value [-1, 1].
///
/// Notches map to -1x, stop and 1x. The full range covers -4x..4x.
#[inline]
pub fn play_speed(rate: f32) -> f64 {
    let rate = play_rate_notch(rate) as f64;
    let scaled = 2.0 * rate.abs();
    rate.signum() * scaled * scaled
}

/// Position randomization amount for the given knob value [0, 1].
#[inline]
pub fn position_randomization(amount: f32) -> f32 {
    let amount = amount.clamp(0.0, 1.0);
    amount * amount
}

/// Clamp a pitch offset in semitones into the supported range.
#[inline]
pub fn clamp_pitch(pitch: f32) -> f32 {
    if pitch.is_finite() {
        pitch.clamp(-PITCH_RANGE, PITCH_RANGE)
    } else {
        0.0
    }
}

/// Apply loop length and loop slide to a selected `(start, end)` region.
///
/// The loop covers `loop_length` of the region and slides from the region's start (0) to the
/// region's end (1).
#[inline]
pub fn loop_window(region: (f32, f32), loop_length: f32, loop_slide: f32) -> (f32, f32) {
    let (region_start, region_end) = region;
    let region_length = (region_end - region_start).max(0.0);
    let length = region_length * loop_length.clamp(MIN_LOOP_LENGTH, 1.0);
    let start = region_start + loop_slide.clamp(0.0, 1.0) * (region_length - length);
    (start, (start + length).min(region_end))
}

// -------------------------------------------------------------------------------------------------
