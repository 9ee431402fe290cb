//! Grain scheduling and mixing.

use rand::{rngs::SmallRng, Rng, SeedableRng};

use super::{
    curves::{clamp_pitch, grain_interval, grain_length_multiplier, position_randomization},
    voice::{GrainSettings, GrainVoice},
};
use crate::{
    source::AudioSource,
    utils::{reflect_value_safe, wrap_value_safe},
};

// -------------------------------------------------------------------------------------------------

/// How the grain scan position moves through the active region.
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
pub enum PlayMode {
    /// Scan position advances with the play rate and wraps around in the region.
    #[default]
    Rate = 0,
    /// Scan position is directly set from the outside.
    Scan = 1,
    /// Buffer scrubbing: grain scheduling is bypassed.
    Scrub = 2,
}

// -------------------------------------------------------------------------------------------------

/// Max pitch offset in semitones of the per voice pitch spread.
const PITCH_SPREAD_RANGE: f32 = 12.0;

/// Schedules grains at a controlled rate and sums all playing grains into the output.
///
/// Parameter setters only store values: everything gets clamped and remapped when processing.
/// When all `POOL_SIZE` voices are busy, newly scheduled grains get dropped: the grain rate is a
/// soft target. Voices are preallocated, so processing never allocates.
pub struct GrainMixer<const POOL_SIZE: usize> {
    voices: [GrainVoice; POOL_SIZE],
    // parameters
    grain_rate: f32,
    grain_length: f32,
    pitch: f32,
    pitch_spread: f32,
    position_randomization: f32,
    reverse_probability: f32,
    speed: f64,
    scan_parameter: f32,
    play_mode: PlayMode,
    // state
    scan_position: f64,
    countdown: usize,
    end_of_cycle: bool,
    grains_triggered: u64,
    grains_dropped: u64,
    rng: SmallRng,
}

impl<const POOL_SIZE: usize> GrainMixer<POOL_SIZE> {
    /// Create a new mixer, seeding the grain randomization from the OS.
    pub fn new() -> Self {
        Self::with_rng(SmallRng::from_os_rng())
    }

    /// Create a new mixer with deterministic grain randomization.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(SmallRng::seed_from_u64(seed))
    }

    fn with_rng(rng: SmallRng) -> Self {
        Self {
            voices: std::array::from_fn(|_| GrainVoice::new()),
            grain_rate: 0.5,
            grain_length: 0.5,
            pitch: 0.0,
            pitch_spread: 0.0,
            position_randomization: 0.0,
            reverse_probability: 0.0,
            speed: 1.0,
            scan_parameter: 0.0,
            play_mode: PlayMode::Rate,
            scan_position: 0.0,
            countdown: 0,
            end_of_cycle: false,
            grains_triggered: 0,
            grains_dropped: 0,
            rng,
        }
    }

    /// Grain rate knob [0, 1], see [`grain_interval`].
    pub fn set_grain_rate(&mut self, rate: f32) {
        self.grain_rate = rate;
    }
    /// Grain length knob [0, 1], see [`grain_length_multiplier`].
    pub fn set_grain_length(&mut self, length: f32) {
        self.grain_length = length;
    }
    /// Pitch offset in semitones.
    pub fn set_pitch(&mut self, pitch: f32) {
        self.pitch = pitch;
    }
    /// Per voice pitch spread [0, 1].
    pub fn set_pitch_spread(&mut self, spread: f32) {
        self.pitch_spread = spread;
    }
    /// Amount of random grain start and panning offsets [0, 1].
    pub fn set_position_randomization(&mut self, amount: f32) {
        self.position_randomization = amount;
    }
    /// Probability [0, 1] that a grain gets played backwards.
    pub fn set_reverse_probability(&mut self, probability: f32) {
        self.reverse_probability = probability;
    }
    /// Scan speed factor in [`PlayMode::Rate`]. Negative speeds scan backwards.
    pub fn set_speed(&mut self, speed: f64) {
        self.speed = speed;
    }
    /// Relative scan position in the active region [0, 1] for [`PlayMode::Scan`].
    pub fn set_scan_position(&mut self, position: f32) {
        self.scan_parameter = position;
    }

    pub fn set_play_mode(&mut self, mode: PlayMode) {
        self.play_mode = mode;
    }

    pub fn play_mode(&self) -> PlayMode {
        self.play_mode
    }

    /// Current nominal scan position in source frames.
    pub fn scan_position(&self) -> f64 {
        self.scan_position
    }

    /// Returns and resets the end of cycle flag, which gets set when the scan position wraps
    /// around in the active region.
    pub fn take_end_of_cycle(&mut self) -> bool {
        std::mem::take(&mut self.end_of_cycle)
    }

    /// Number of grains which got triggered so far.
    pub fn grains_triggered(&self) -> u64 {
        self.grains_triggered
    }

    /// Number of grains which got dropped because all voices were busy.
    pub fn grains_dropped(&self) -> u64 {
        self.grains_dropped
    }

    pub fn voices(&self) -> &[GrainVoice; POOL_SIZE] {
        &self.voices
    }

    /// Number of currently playing voices.
    pub fn active_voice_count(&self) -> usize {
        self.voices.iter().filter(|v| v.is_playing()).count()
    }

    /// Schedule new grains and add all playing grains into the given interleaved output.
    ///
    /// Grains get confined to the source's current sub section. In [`PlayMode::Scrub`] no
    /// new grains get scheduled, but already playing grains still play out.
    pub fn process_audio(
        &mut self,
        source: &impl AudioSource,
        output: &mut [f32],
        channel_count: usize,
        sample_rate: u32,
    ) {
        debug_assert!(channel_count > 0 && output.len() % channel_count == 0);
        let trigger = self.play_mode != PlayMode::Scrub && sample_rate > 0;
        let interval = grain_interval(self.grain_rate);
        let interval_frames = ((interval * sample_rate as f64).round() as usize).max(1);

        for frame in output.chunks_exact_mut(channel_count) {
            if trigger {
                if self.countdown == 0 {
                    self.schedule_grain(source, interval, sample_rate, channel_count);
                    self.countdown = interval_frames;
                }
                self.countdown -= 1;
            }
            for voice in &mut self.voices {
                if voice.is_playing() {
                    voice.process(frame);
                }
            }
        }
    }

    /// Move the scan position and try to start a new grain at it.
    fn schedule_grain(
        &mut self,
        source: &impl AudioSource,
        interval: f64,
        sample_rate: u32,
        channel_count: usize,
    ) {
        let (min_frame, max_frame) = source.sub_section();
        if source.channel_count() == 0 || max_frame <= min_frame {
            return;
        }
        let (min, max) = (min_frame as f64, max_frame as f64);
        let region_length = max - min;

        // grain start
        let amount = self.position_randomization.clamp(0.0, 1.0);
        let jitter = if amount > 0.0 {
            self.gaussian() * position_randomization(amount) as f64 * region_length * 0.5
        } else {
            0.0
        };
        let scan_position = match self.play_mode {
            PlayMode::Scan => {
                let position = self.scan_parameter.clamp(0.0, 1.0) as f64;
                reflect_value_safe(min, min + position * region_length, max)
            }
            _ => wrap_value_safe(min, self.scan_position, max),
        };
        let start_frame = wrap_value_safe(min, scan_position + jitter, max);

        // trigger
        match self.voices.iter().position(|v| !v.is_playing()) {
            Some(index) => {
                let spread = self.pitch_spread.clamp(0.0, 1.0) * PITCH_SPREAD_RANGE;
                let pitch =
                    clamp_pitch(clamp_pitch(self.pitch) + spread * Self::voice_offset(index));
                let reverse = self.rng.random::<f32>() < self.reverse_probability;
                let panning = if amount > 0.0 {
                    (self.rng.random::<f32>() * 2.0 - 1.0) * amount
                } else {
                    0.0
                };
                let settings = GrainSettings {
                    start_frame,
                    length: interval * grain_length_multiplier(self.grain_length),
                    pitch,
                    sample_rate,
                    channel_count,
                    panning,
                    reverse,
                };
                if self.voices[index].init_grain(source, &settings) {
                    self.grains_triggered += 1;
                }
            }
            None => {
                self.grains_dropped += 1;
            }
        }

        // advance
        let advance = match self.play_mode {
            PlayMode::Rate if self.speed.is_finite() => {
                interval * self.speed * source.sample_rate() as f64
            }
            _ => 0.0,
        };
        let next_position = scan_position + advance;
        self.scan_position = wrap_value_safe(min, next_position, max);
        // only a moving scan position can wrap
        if advance != 0.0 && (next_position >= max || next_position < min) {
            self.end_of_cycle = true;
        }
    }

    /// Fixed, symmetric per voice pitch spread offset in [-1, 1].
    fn voice_offset(index: usize) -> f32 {
        if POOL_SIZE < 2 {
            0.0
        } else {
            index as f32 / (POOL_SIZE - 1) as f32 * 2.0 - 1.0
        }
    }

    /// Normal distributed random value (Box-Muller).
    fn gaussian(&mut self) -> f64 {
        let u1 = 1.0 - self.rng.random::<f64>(); // (0, 1]
        let u2 = self.rng.random::<f64>();
        (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
    }
}

impl<const POOL_SIZE: usize> Default for GrainMixer<POOL_SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::buffer::SampleBuffer;

    fn dc_buffer(frames: usize) -> SampleBuffer {
        let buffer = SampleBuffer::new(frames);
        buffer.load_samples(&vec![0.5; frames], 1, 44100).unwrap();
        buffer
    }

    #[test]
    fn schedules_at_grain_rate() {
        let buffer = dc_buffer(44100);
        let source = buffer.lock();
        let mut mixer = GrainMixer::<10>::with_seed(1);
        // 0.5 seconds interval
        mixer.set_grain_rate(0.0);
        let mut output = vec![0.0; 44100 * 2];
        mixer.process_audio(&*source, &mut output, 2, 44100);
        assert_eq!(mixer.grains_triggered(), 2);
        assert_eq!(mixer.grains_dropped(), 0);
        assert!(output.iter().all(|v| v.is_finite()));
        assert!(output.iter().any(|v| *v != 0.0));
    }

    #[test]
    fn block_size_independence() {
        let buffer = dc_buffer(44100);
        let source = buffer.lock();
        let mut whole = GrainMixer::<10>::with_seed(2);
        let mut blocks = GrainMixer::<10>::with_seed(2);
        for mixer in [&mut whole, &mut blocks] {
            mixer.set_grain_rate(0.8);
            mixer.set_position_randomization(0.3);
        }
        let mut output_whole = vec![0.0; 10_000];
        whole.process_audio(&*source, &mut output_whole, 1, 44100);
        let mut output_blocks = vec![0.0; 10_000];
        for block in output_blocks.chunks_mut(128) {
            blocks.process_audio(&*source, block, 1, 44100);
        }
        assert_eq!(output_whole, output_blocks);
        assert_eq!(whole.grains_triggered(), blocks.grains_triggered());
    }

    #[test]
    fn backpressure() {
        let buffer = dc_buffer(44100);
        let source = buffer.lock();
        let mut mixer = GrainMixer::<4>::with_seed(3);
        // 10 ms intervals with x8 long grains: voices are exhausted quickly
        mixer.set_grain_rate(1.0);
        mixer.set_grain_length(1.0);
        let mut output = vec![0.0; 3500];
        mixer.process_audio(&*source, &mut output, 1, 44100);
        assert_eq!(mixer.voices().len(), 4);
        assert_eq!(mixer.active_voice_count(), 4);
        assert_eq!(mixer.grains_triggered(), 4);
        assert_eq!(mixer.grains_dropped(), 4);
    }

    #[test]
    fn scan_wraps_in_region() {
        let buffer = dc_buffer(44100);
        let mut source = buffer.lock();
        source.set_sub_section(10_000, 20_000);
        let mut mixer = GrainMixer::<10>::with_seed(4);
        mixer.set_grain_rate(1.0);
        mixer.set_speed(4.0);
        let mut output = vec![0.0; 1024];
        let mut wrapped = false;
        for _ in 0..100 {
            mixer.process_audio(&*source, &mut output, 1, 44100);
            let position = mixer.scan_position();
            assert!((10_000.0..20_000.0).contains(&position), "{position}");
            wrapped |= mixer.take_end_of_cycle();
        }
        assert!(wrapped);

        // backwards
        mixer.set_speed(-4.0);
        for _ in 0..100 {
            mixer.process_audio(&*source, &mut output, 1, 44100);
            let position = mixer.scan_position();
            assert!((10_000.0..20_000.0).contains(&position), "{position}");
        }
    }

    #[test]
    fn scan_mode() {
        let buffer = dc_buffer(44100);
        let mut source = buffer.lock();
        source.set_sub_section(0, 40_000);
        let mut mixer = GrainMixer::<10>::with_seed(5);
        mixer.set_play_mode(PlayMode::Scan);
        mixer.set_scan_position(0.25);
        let mut output = vec![0.0; 64];
        mixer.process_audio(&*source, &mut output, 1, 44100);
        assert_eq!(mixer.grains_triggered(), 1);
        assert_eq!(mixer.scan_position(), 10_000.0);
        assert!((mixer.voices()[0].source_position() - 10_064.0).abs() < 1e-9);
    }

    #[test]
    fn scan_mode_never_ends_cycles() {
        let buffer = dc_buffer(44100);
        let mut source = buffer.lock();
        source.set_sub_section(0, 40_000);
        let mut mixer = GrainMixer::<10>::with_seed(7);
        mixer.set_play_mode(PlayMode::Scan);
        mixer.set_grain_rate(1.0);
        let mut output = vec![0.0; 512];
        for scan_position in [1.0, 0.0, 0.5] {
            mixer.set_scan_position(scan_position);
            for _ in 0..20 {
                mixer.process_audio(&*source, &mut output, 1, 44100);
                assert!(!mixer.take_end_of_cycle(), "{scan_position}");
            }
        }
        assert!(mixer.grains_triggered() > 0);
    }

    #[test]
    fn scrub_mode_bypasses_scheduling() {
        let buffer = dc_buffer(44100);
        let source = buffer.lock();
        let mut mixer = GrainMixer::<10>::with_seed(6);
        mixer.set_play_mode(PlayMode::Scrub);
        let mut output = vec![0.0; 4096];
        mixer.process_audio(&*source, &mut output, 2, 44100);
        assert_eq!(mixer.grains_triggered(), 0);
        assert!(output.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn empty_regions_are_silent() {
        let buffer = dc_buffer(1000);
        let mut source = buffer.lock();
        source.set_sub_section(500, 500);
        let mut mixer = GrainMixer::<10>::with_seed(7);
        mixer.set_grain_rate(1.0);
        let mut output = vec![0.0; 4096];
        mixer.process_audio(&*source, &mut output, 2, 44100);
        assert_eq!(mixer.grains_triggered(), 0);
        assert!(output.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn pitch_spread_offsets() {
        assert_eq!(GrainMixer::<10>::voice_offset(0), -1.0);
        assert_eq!(GrainMixer::<10>::voice_offset(9), 1.0);
        assert_eq!(GrainMixer::<1>::voice_offset(0), 0.0);
        assert_eq!(GrainMixer::<3>::voice_offset(1), 0.0);
    }
}
