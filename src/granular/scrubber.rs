//! Direct, smoothed buffer scrubbing with two read heads.

use super::sinc::{SincTable, SINC_PHASES, SINC_TABLE, SINC_TAPS};
use crate::{
    source::{AudioSource, SOURCE_FADE_FRAMES},
    utils::{
        buffer::mapped_channel,
        dsp::{divider::ClockDivider, filters::onepole::OnePoleFilter},
        wrap_value_safe,
    },
};

// -------------------------------------------------------------------------------------------------

/// Sample interpolation mode of the [`BufferScrubber`].
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    strum::EnumString,
    strum::Display,
    strum::VariantNames,
    strum::FromRepr,
)]
#[repr(u8)]
pub enum ScrubInterpolation {
    #[default]
    Linear = 0,
    Sinc = 1,
}

// -------------------------------------------------------------------------------------------------

/// Head velocities (in frames per output frame) below this threshold silence the head.
const SILENCE_VELOCITY: f64 = 1.0 / 128.0;
/// Velocity range over which volume compensation attenuates the heads.
const COMPENSATION_VELOCITY_RANGE: (f64, f64) = (4.0, 32.0);
/// Gain at and above the upper compensation velocity.
const COMPENSATION_MIN_GAIN: f64 = 0.25;
/// Cutoff of the gain smoothing filters in Hz.
const GAIN_SMOOTHING_CUTOFF: f64 = 8.0;
/// Heads with a gain below this threshold are not rendered.
const GAIN_EPSILON: f64 = 1.0e-4;
/// Smoothed gains below this threshold snap to 0 when the head is silenced.
const GAIN_SNAP_THRESHOLD: f64 = 1.0e-6;
/// Position smoothing cutoff in Hz, used when an invalid cutoff got passed.
const DEFAULT_SMOOTHING_CUTOFF: f64 = 10.0;
/// Filter coefficients get checked for updates every N processed frames.
const COEFFICIENT_UPDATE_DIVISION: u32 = 128;

const TAPS_BEFORE: i64 = SincTable::<SINC_TAPS, SINC_PHASES>::TAPS_BEFORE as i64;

// -------------------------------------------------------------------------------------------------

/// A single smoothed read head.
#[derive(Debug, Clone, Default)]
struct ScrubHead {
    position_filter: OnePoleFilter,
    gain_filter: OnePoleFilter,
    last_position: f64,
    gain: f64,
    silenced: bool,
    initialized: bool,
}

impl ScrubHead {
    /// Move the head towards the given region relative target and update its gain.
    /// Returns the smoothed position.
    fn update(&mut self, target: f64, volume_compensation: bool) -> f64 {
        if !self.initialized {
            self.position_filter.reset(target);
            self.last_position = target;
            self.initialized = true;
        }
        let position = self.position_filter.process_sample(target);
        let velocity = (position - self.last_position).abs();
        self.last_position = position;

        self.silenced = velocity < SILENCE_VELOCITY;
        let target_gain = if self.silenced {
            0.0
        } else if volume_compensation && velocity > COMPENSATION_VELOCITY_RANGE.0 {
            let (min, max) = COMPENSATION_VELOCITY_RANGE;
            let amount = ((velocity - min) / (max - min)).min(1.0);
            1.0 - amount * (1.0 - COMPENSATION_MIN_GAIN)
        } else {
            1.0
        };
        self.gain = self.gain_filter.process_sample(target_gain);
        if target_gain == 0.0 && self.gain < GAIN_SNAP_THRESHOLD {
            self.gain_filter.reset(0.0);
            self.gain = 0.0;
        }
        position
    }
}

// -------------------------------------------------------------------------------------------------

/// Scrubs through an [`AudioSource`] with two independently smoothed read heads.
///
/// Both heads follow the same target position, offset by a stereo separation. Head positions
/// are relative to the active region and wrap around within it. When a head stands still, its
/// gain fades to 0 to avoid buzzing sample-and-hold artifacts. Head 0 feeds the even, head 1 the
/// odd output channels.
pub struct BufferScrubber {
    heads: [ScrubHead; 2],
    positions: [f64; 2],
    next_position: f64,
    region: (usize, usize),
    separation: f64,
    interpolation: ScrubInterpolation,
    volume_compensation: bool,
    divider: ClockDivider,
    filter_sample_rate: u32,
    filter_cutoff: f64,
}

impl BufferScrubber {
    pub fn new() -> Self {
        Self {
            heads: [ScrubHead::default(), ScrubHead::default()],
            positions: [0.0; 2],
            next_position: 0.0,
            region: (0, 0),
            separation: 0.0,
            interpolation: ScrubInterpolation::default(),
            volume_compensation: false,
            divider: ClockDivider::new(COEFFICIENT_UPDATE_DIVISION),
            filter_sample_rate: 0,
            filter_cutoff: 0.0,
        }
    }

    /// Set the target scan position, relative to the active region [0, 1].
    pub fn set_next_position(&mut self, position: f32) {
        self.next_position = if position.is_finite() {
            position as f64
        } else {
            0.0
        };
    }

    /// Set the active region in source frames.
    pub fn set_region(&mut self, min_frame: usize, max_frame: usize) {
        self.region = (min_frame.min(max_frame), max_frame);
    }

    /// Set the stereo separation of the two heads, relative to the region length [0, 1].
    pub fn set_separation(&mut self, separation: f32) {
        self.separation = if separation.is_finite() {
            separation.clamp(0.0, 1.0) as f64
        } else {
            0.0
        };
    }

    pub fn interpolation(&self) -> ScrubInterpolation {
        self.interpolation
    }
    pub fn set_interpolation(&mut self, interpolation: ScrubInterpolation) {
        self.interpolation = interpolation;
    }

    pub fn volume_compensation(&self) -> bool {
        self.volume_compensation
    }
    pub fn set_volume_compensation(&mut self, enabled: bool) {
        self.volume_compensation = enabled;
    }

    /// Smoothed head positions in source frames, for display purposes.
    pub fn head_positions(&self) -> [f64; 2] {
        self.positions
    }

    /// Current head gains.
    pub fn head_gains(&self) -> [f64; 2] {
        [self.heads[0].gain, self.heads[1].gain]
    }

    /// True when both heads stand still, for display purposes.
    pub fn is_stopped(&self) -> bool {
        self.heads.iter().all(|head| head.silenced)
    }

    /// Render a single output frame, overwriting the given frame.
    ///
    /// `smoothing_cutoff` is the position smoothing filter's cutoff in Hz.
    pub fn process_frame(
        &mut self,
        source: &impl AudioSource,
        output: &mut [f32],
        sample_rate: u32,
        smoothing_cutoff: f32,
    ) {
        if self.divider.process() {
            let cutoff = if smoothing_cutoff.is_finite() {
                smoothing_cutoff as f64
            } else {
                DEFAULT_SMOOTHING_CUTOFF
            };
            self.update_filters(sample_rate, cutoff);
        }

        let (min_frame, max_frame) = self.region;
        let region_length = (max_frame - min_frame) as f64;
        let source_channel_count = source.channel_count();

        output.fill(0.0);
        for (head_index, head) in self.heads.iter_mut().enumerate() {
            let direction = if head_index == 0 { -0.5 } else { 0.5 };
            let target = (self.next_position + direction * self.separation) * region_length;
            let position = head.update(target, self.volume_compensation);
            let position = min_frame as f64 + wrap_value_safe(0.0, position, region_length);
            self.positions[head_index] = position;

            if head.gain <= GAIN_EPSILON || source_channel_count == 0 {
                continue;
            }
            for (channel, sample) in output.iter_mut().enumerate().skip(head_index).step_by(2) {
                let source_channel = mapped_channel(source_channel_count, channel);
                let value = match self.interpolation {
                    ScrubInterpolation::Linear => {
                        interpolate_linear(source, position, source_channel)
                    }
                    ScrubInterpolation::Sinc => {
                        interpolate_sinc(source, position, source_channel)
                    }
                };
                *sample = (head.gain * value as f64) as f32;
            }
        }
    }

    fn update_filters(&mut self, sample_rate: u32, cutoff: f64) {
        let unchanged = sample_rate == self.filter_sample_rate && cutoff == self.filter_cutoff;
        if sample_rate == 0 || unchanged {
            return;
        }
        self.filter_sample_rate = sample_rate;
        self.filter_cutoff = cutoff;
        for head in &mut self.heads {
            head.position_filter.init(sample_rate, cutoff);
            head.gain_filter.init(sample_rate, GAIN_SMOOTHING_CUTOFF);
        }
    }
}

impl Default for BufferScrubber {
    fn default() -> Self {
        Self::new()
    }
}

// -------------------------------------------------------------------------------------------------

/// Linear interpolation at the given source frame position, using `frac = mu`.
#[inline]
fn interpolate_linear(source: &impl AudioSource, position: f64, channel: usize) -> f32 {
    let index = position.floor();
    let mu = (position - index) as f32;
    let index = index as i64;
    let a = source.sample_safe_and_fade(index, channel, SOURCE_FADE_FRAMES);
    let b = source.sample_safe_and_fade(index + 1, channel, SOURCE_FADE_FRAMES);
    a + (b - a) * mu
}

/// Sinc interpolation at the given source frame position, using `frac = 1 - mu`.
#[inline]
fn interpolate_sinc(source: &impl AudioSource, position: f64, channel: usize) -> f32 {
    let index = position.floor();
    let mu = position - index;
    let first_tap = index as i64 - TAPS_BEFORE;
    let mut taps = [0.0; SINC_TAPS];
    for (offset, tap) in taps.iter_mut().enumerate() {
        let frame = first_tap + offset as i64;
        *tap = source.sample_safe_and_fade(frame, channel, SOURCE_FADE_FRAMES);
    }
    SINC_TABLE.interpolate(&taps, 1, 1.0 - mu)
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::buffer::SampleBuffer;

    fn ramp_buffer(frames: usize) -> SampleBuffer {
        let buffer = SampleBuffer::new(frames);
        let samples = (0..frames * 2)
            .map(|i| {
                let frame = (i / 2) as f32 / frames as f32;
                if i % 2 == 0 {
                    frame
                } else {
                    -frame
                }
            })
            .collect::<Vec<_>>();
        buffer.load_samples(&samples, 2, 44100).unwrap();
        buffer
    }

    #[test]
    fn silence_gate() {
        let buffer = ramp_buffer(44100);
        let source = buffer.lock();
        let mut scrubber = BufferScrubber::new();
        scrubber.set_region(0, 44100);

        // move, so the heads open up
        let mut output = [0.0; 2];
        for i in 0..4410 {
            scrubber.set_next_position(0.25 + 0.25 * i as f32 / 4410.0);
            scrubber.process_frame(&*source, &mut output, 44100, 20.0);
        }
        assert!(!scrubber.is_stopped());
        assert!(scrubber.head_gains()[0] > 0.5);
        assert!(output[0] > 0.0 && output[1] < 0.0);

        // hold the position
        for _ in 0..44100 {
            scrubber.process_frame(&*source, &mut output, 44100, 20.0);
        }
        assert!(scrubber.is_stopped());
        assert_eq!(scrubber.head_gains(), [0.0, 0.0]);
        assert_eq!(output, [0.0, 0.0]);
        let positions = scrubber.head_positions();
        scrubber.process_frame(&*source, &mut output, 44100, 20.0);
        assert_eq!(scrubber.head_positions(), positions);
        assert!((positions[0] - 0.5 * 44100.0).abs() < 5.0);
    }

    #[test]
    fn volume_compensation() {
        let mut head = ScrubHead::default();
        head.gain_filter.init(44100, GAIN_SMOOTHING_CUTOFF);
        let mut position = 0.0;
        for _ in 0..44100 {
            position += 64.0;
            head.update(position, true);
        }
        assert!((head.gain - COMPENSATION_MIN_GAIN).abs() < 1e-6);

        let mut head = ScrubHead::default();
        head.gain_filter.init(44100, GAIN_SMOOTHING_CUTOFF);
        let mut position = 0.0;
        for _ in 0..44100 {
            position += 64.0;
            head.update(position, false);
        }
        assert!((head.gain - 1.0).abs() < 1e-6);
    }

    #[test]
    fn separated_heads() {
        let buffer = ramp_buffer(10_000);
        let source = buffer.lock();
        let mut scrubber = BufferScrubber::new();
        scrubber.set_region(2_000, 6_000);
        scrubber.set_separation(0.5);
        scrubber.set_next_position(0.5);
        let mut output = [0.0; 4];
        scrubber.process_frame(&*source, &mut output, 44100, 10.0);
        let [left, right] = scrubber.head_positions();
        assert_eq!(left, 3_000.0);
        assert_eq!(right, 5_000.0);

        // heads wrap around in the region
        let mut scrubber = BufferScrubber::new();
        scrubber.set_region(2_000, 6_000);
        scrubber.set_separation(1.0);
        scrubber.set_next_position(0.0);
        scrubber.process_frame(&*source, &mut output, 44100, 10.0);
        let [left, right] = scrubber.head_positions();
        assert_eq!(left, 4_000.0);
        assert_eq!(right, 4_000.0);
    }

    #[test]
    fn interpolation_conventions() {
        let buffer = ramp_buffer(10_000);
        let source = buffer.lock();
        // a ramp is reproduced by both interpolators at fractional positions
        let position = 5000.25;
        let expected = position as f32 / 10_000.0;
        let linear = interpolate_linear(&*source, position, 0);
        let sinc = interpolate_sinc(&*source, position, 0);
        assert!((linear - expected).abs() < 1e-6, "{linear}");
        assert!((sinc - expected).abs() < 1e-5, "{sinc}");
        // integer positions are exact
        assert_eq!(interpolate_sinc(&*source, 4000.0, 1), -0.4);
        assert_eq!(interpolate_linear(&*source, 4000.0, 1), -0.4);
    }

    #[test]
    fn degenerated_region() {
        let buffer = ramp_buffer(1000);
        let source = buffer.lock();
        let mut scrubber = BufferScrubber::new();
        scrubber.set_region(500, 500);
        let mut output = [1.0; 2];
        for i in 0..1000 {
            scrubber.set_next_position(i as f32 / 1000.0);
            scrubber.process_frame(&*source, &mut output, 44100, 50.0);
            assert!(output.iter().all(|v| v.is_finite()));
        }
        assert_eq!(scrubber.head_positions(), [500.0, 500.0]);
    }
}
