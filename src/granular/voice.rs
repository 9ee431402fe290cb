//! A single, preallocated grain playback voice.

use assume::assume;

use super::{
    sinc::{SincTable, SINC_PHASES, SINC_TABLE, SINC_TAPS},
    window::GRAIN_WINDOW,
};
use crate::{
    source::AudioSource,
    utils::{
        buffer::{reverse_frames, MAX_OUTPUT_CHANNELS},
        speed_from_semitones,
    },
};

// -------------------------------------------------------------------------------------------------

/// Max length of a grain in frames.
pub const MAX_GRAIN_FRAMES: usize = 65536;
/// Min length of a grain in frames.
pub const MIN_GRAIN_FRAMES: usize = 64;

/// Size of the raw source chunks which get fetched to render grains.
const RAW_CHUNK_FRAMES: usize = 4096;

const TAPS_BEFORE: usize = SincTable::<SINC_TAPS, SINC_PHASES>::TAPS_BEFORE;

// -------------------------------------------------------------------------------------------------

/// Playback state of a [`GrainVoice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrainVoiceState {
    Idle,
    Playing,
}

// -------------------------------------------------------------------------------------------------

/// Settings for a new grain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrainSettings {
    /// Start frame in the source. Gets clamped to the source's frame range.
    pub start_frame: f64,
    /// Grain length in seconds. Gets clamped to [`MIN_GRAIN_FRAMES`]..[`MAX_GRAIN_FRAMES`].
    pub length: f64,
    /// Pitch offset in semitones.
    pub pitch: f32,
    /// Output sample rate.
    pub sample_rate: u32,
    /// Number of output channels to render.
    pub channel_count: usize,
    /// Stereo panning (-1..1) which gets applied to the first two output channels.
    pub panning: f32,
    /// Play the source excerpt backwards.
    pub reverse: bool,
}

impl Default for GrainSettings {
    fn default() -> Self {
        Self {
            start_frame: 0.0,
            length: 0.1,
            pitch: 0.0,
            sample_rate: 44100,
            channel_count: 2,
            panning: 0.0,
            reverse: false,
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Renders and plays back a single grain: a resampled, windowed and optionally reversed
/// excerpt of an [`AudioSource`].
///
/// Grains get rendered into a preallocated buffer when they are triggered, so playback itself
/// only needs to copy frames. A voice plays at most one grain at a time. Memory is allocated
/// in `new` only.
pub struct GrainVoice {
    state: GrainVoiceState,
    buffer: Box<[f32]>,
    raw_buffer: Box<[f32]>,
    channel_count: usize,
    length: usize,
    cursor: usize,
    start_frame: f64,
    speed: f64,
    reverse: bool,
    gain: f32,
}

impl GrainVoice {
    pub fn new() -> Self {
        Self {
            state: GrainVoiceState::Idle,
            buffer: vec![0.0; MAX_GRAIN_FRAMES * MAX_OUTPUT_CHANNELS].into_boxed_slice(),
            raw_buffer: vec![0.0; RAW_CHUNK_FRAMES * MAX_OUTPUT_CHANNELS].into_boxed_slice(),
            channel_count: 0,
            length: 0,
            cursor: 0,
            start_frame: 0.0,
            speed: 1.0,
            reverse: false,
            gain: 0.0,
        }
    }

    #[inline]
    pub fn state(&self) -> GrainVoiceState {
        self.state
    }

    #[inline]
    pub fn is_playing(&self) -> bool {
        self.state == GrainVoiceState::Playing
    }

    /// Length of the current or last grain in frames.
    pub fn length(&self) -> usize {
        self.length
    }

    /// Playback position within the current grain in frames.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Rendered frames of the current or last grain.
    pub fn rendered(&self) -> &[f32] {
        &self.buffer[..self.length * self.channel_count]
    }

    /// Source frame the grain currently plays back, for display purposes.
    pub fn source_position(&self) -> f64 {
        let offset = if self.reverse {
            self.length.saturating_sub(1 + self.cursor)
        } else {
            self.cursor
        };
        self.start_frame + offset as f64 * self.speed
    }

    /// Current envelope gain, for display purposes. 0 when idle.
    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Render a new grain from the given source.
    ///
    /// Returns false and leaves the voice untouched when it is still playing, or when the
    /// source has no audio.
    pub fn init_grain(&mut self, source: &impl AudioSource, settings: &GrainSettings) -> bool {
        if self.is_playing() {
            return false;
        }
        let source_frame_count = source.frame_count();
        let source_sample_rate = source.sample_rate();
        if source.channel_count() == 0
            || source_frame_count == 0
            || source_sample_rate == 0
            || settings.sample_rate == 0
            || settings.channel_count == 0
        {
            return false;
        }

        let length = if settings.length.is_finite() {
            (settings.length * settings.sample_rate as f64).round() as usize
        } else {
            0
        };
        self.length = length.clamp(MIN_GRAIN_FRAMES, MAX_GRAIN_FRAMES);
        self.channel_count = settings.channel_count.min(MAX_OUTPUT_CHANNELS);
        self.speed = speed_from_semitones(settings.pitch) * source_sample_rate as f64
            / settings.sample_rate as f64;
        self.start_frame = if settings.start_frame.is_finite() {
            settings
                .start_frame
                .clamp(0.0, (source_frame_count - 1) as f64)
        } else {
            0.0
        };
        self.reverse = settings.reverse;
        self.cursor = 0;
        self.gain = 0.0;

        self.render(source);
        if self.reverse {
            let channel_count = self.channel_count;
            reverse_frames(&mut self.buffer[..self.length * channel_count], channel_count);
        }
        self.apply_window_and_panning(settings.panning);

        self.state = GrainVoiceState::Playing;
        true
    }

    /// Add the next grain frame to the given output frame. Does nothing when idle.
    #[inline]
    pub fn process(&mut self, output: &mut [f32]) {
        if self.state == GrainVoiceState::Idle {
            return;
        }
        let channel_count = self.channel_count;
        let offset = self.cursor * channel_count;
        assume!(unsafe: offset + channel_count <= self.buffer.len());
        for (o, i) in output
            .iter_mut()
            .zip(&self.buffer[offset..offset + channel_count])
        {
            *o += *i;
        }
        self.gain = GRAIN_WINDOW.sample_at(self.cursor, self.length);
        self.cursor += 1;
        if self.cursor >= self.length {
            self.cursor = 0;
            self.gain = 0.0;
            self.state = GrainVoiceState::Idle;
        }
    }

    /// Resample the source excerpt into our grain buffer. The source gets read in raw chunks,
    /// so grains can cover any amount of source frames.
    fn render(&mut self, source: &impl AudioSource) {
        let sinc = &*SINC_TABLE;
        let channel_count = self.channel_count;
        let mut chunk_start = i64::MIN;
        for frame in 0..self.length {
            let position = self.start_frame + frame as f64 * self.speed;
            let index = position.floor();
            let mu = position - index;
            let index = index as i64;
            let first_tap = index - TAPS_BEFORE as i64;
            if chunk_start == i64::MIN
                || first_tap < chunk_start
                || first_tap + SINC_TAPS as i64 > chunk_start + RAW_CHUNK_FRAMES as i64
            {
                chunk_start = first_tap;
                source.put_into_buffer(
                    &mut self.raw_buffer,
                    RAW_CHUNK_FRAMES,
                    channel_count,
                    chunk_start,
                );
            }
            let raw_offset = (first_tap - chunk_start) as usize * channel_count;
            let output_offset = frame * channel_count;
            for channel in 0..channel_count {
                self.buffer[output_offset + channel] = sinc.interpolate(
                    &self.raw_buffer[raw_offset + channel..],
                    channel_count,
                    1.0 - mu,
                );
            }
        }
    }

    fn apply_window_and_panning(&mut self, panning: f32) {
        let window = &*GRAIN_WINDOW;
        let channel_count = self.channel_count;
        let panning = if panning.is_finite() {
            panning.clamp(-1.0, 1.0)
        } else {
            0.0
        };
        let mut channel_gains = [1.0; MAX_OUTPUT_CHANNELS];
        if channel_count >= 2 {
            channel_gains[0] = (1.0 - panning).min(1.0);
            channel_gains[1] = (1.0 + panning).min(1.0);
        }
        let length = self.length;
        for (index, frame) in self.buffer[..length * channel_count]
            .chunks_exact_mut(channel_count)
            .enumerate()
        {
            let gain = window.sample_at(index, length);
            for (sample, channel_gain) in frame.iter_mut().zip(channel_gains) {
                *sample *= gain * channel_gain;
            }
        }
    }
}

impl Default for GrainVoice {
    fn default() -> Self {
        Self::new()
    }
}

// -------------------------------------------------------------------------------------------------
