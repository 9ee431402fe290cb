//! The granular engine: region selection, grain playback and scrubbing of a single sample buffer.

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering},
        Arc,
    },
};

use crossbeam_queue::ArrayQueue;

use super::{
    curves::{loop_window, play_speed},
    markers::{MarkerSet, MAX_INNER_MARKERS, MAX_MARKERS},
    mixer::{GrainMixer, PlayMode},
    scrubber::{BufferScrubber, ScrubInterpolation},
};
use crate::{
    error::Error,
    source::{
        buffer::{SampleBuffer, SampleBufferImportInfo},
        AudioSource,
    },
    utils::{
        buffer::clear_buffer,
        dsp::divider::ClockDivider,
        sync::{AtomicF32, SpinLock},
        wave::WaveformPoint,
    },
};

// -------------------------------------------------------------------------------------------------

/// Number of grain voices in the engine's voice pool.
pub const GRAIN_VOICE_COUNT: usize = 10;

/// Default arena size: 300 seconds at 44.1 kHz.
pub const DEFAULT_MAX_SOURCE_FRAMES: usize = 300 * 44100;

/// Upper bound for `EngineConfig::max_source_frames`: one hour at 192 kHz.
const MAX_SOURCE_FRAMES_LIMIT: usize = 3600 * 192_000;

// -------------------------------------------------------------------------------------------------

/// Options to create a [`GrainEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Capacity of the sample buffer in frames. By default 300 seconds at 44.1 kHz.
    pub max_source_frames: usize,
    /// Size of the control message queue. By default 64.
    pub message_queue_size: usize,
    /// Control messages get handled every N processed blocks. By default 4.
    pub message_drain_interval: u32,
    /// When set, an unsaved recording gets written to this path when the engine gets dropped.
    pub autosave_path: Option<PathBuf>,
    /// When set, grain randomization uses this seed instead of an OS seeded one.
    pub rng_seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_source_frames: DEFAULT_MAX_SOURCE_FRAMES,
            message_queue_size: 64,
            message_drain_interval: 4,
            autosave_path: None,
            rng_seed: None,
        }
    }
}

impl EngineConfig {
    pub fn max_source_frames(mut self, frames: usize) -> Self {
        self.max_source_frames = frames;
        self
    }

    pub fn message_queue_size(mut self, size: usize) -> Self {
        self.message_queue_size = size;
        self
    }

    pub fn message_drain_interval(mut self, blocks: u32) -> Self {
        self.message_drain_interval = blocks;
        self
    }

    pub fn autosave_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.autosave_path = Some(path.into());
        self
    }

    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Validate all parameters. Returns Error::ParameterError on errors.
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_source_frames == 0 || self.max_source_frames > MAX_SOURCE_FRAMES_LIMIT {
            return Err(Error::ParameterError(format!(
                "engine config 'max_source_frames' value is '{}'",
                self.max_source_frames
            )));
        }
        if self.message_queue_size == 0 {
            return Err(Error::ParameterError(
                "engine config 'message_queue_size' must be > 0".to_string(),
            ));
        }
        if self.message_drain_interval == 0 {
            return Err(Error::ParameterError(
                "engine config 'message_drain_interval' must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------

/// Per block parameters of the [`GrainEngine`].
///
/// Values are passed in as they come from the controls: they get clamped and mapped to engine
/// units when processing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineParameters {
    /// Bipolar play rate [-1, 1], see [`play_speed`](super::curves::play_speed).
    pub play_rate: f32,
    /// Pitch offset in semitones [-36, 36].
    pub pitch: f32,
    /// Selects one of the regions between the markers [0, 1].
    pub region_select: f32,
    /// Loop length, relative to the selected region [0, 1].
    pub loop_length: f32,
    /// Moves the loop from the region's start to its end [0, 1].
    pub loop_slide: f32,
    /// Grain start and panning randomization [0, 1].
    pub position_randomization: f32,
    /// Grain rate knob [0, 1].
    pub grain_rate: f32,
    /// Grain length knob [0, 1].
    pub grain_length: f32,
    /// Probability that a grain plays backwards [0, 1].
    pub reverse_probability: f32,
    /// Index of the audio source to play. Only source 0 exists: others are silent.
    pub source_index: usize,
    /// Per voice pitch spread [0, 1].
    pub pitch_spread: f32,
    pub play_mode: PlayMode,
    /// Scan position in the loop for the scan and scrub play modes [0, 1].
    pub scan_position: f32,
    /// Scrub position smoothing cutoff in Hz.
    pub scrub_smoothing: f32,
    /// Stereo separation of the scrub heads [0, 1].
    pub scrub_separation: f32,
}

impl Default for EngineParameters {
    fn default() -> Self {
        Self {
            play_rate: 0.5,
            pitch: 0.0,
            region_select: 0.0,
            loop_length: 1.0,
            loop_slide: 0.0,
            position_randomization: 0.0,
            grain_rate: 0.5,
            grain_length: 0.5,
            reverse_probability: 0.0,
            source_index: 0,
            pitch_spread: 0.0,
            play_mode: PlayMode::Rate,
            scan_position: 0.0,
            scrub_smoothing: 10.0,
            scrub_separation: 0.0,
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Messages to control the engine from other threads. They get applied in the audio thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineMessage {
    /// Add a marker at the current scan or scrub position.
    AddMarker,
    /// Add a marker at the given normalized position.
    AddMarkerAt(f32),
    /// Replace all markers with N equally sized regions.
    AddEquidistantMarkers(usize),
    ClearMarkers,
    /// Replace all markers with the first `count` positions.
    SetMarkers {
        positions: [f32; MAX_INNER_MARKERS],
        count: usize,
    },
    /// Silence the currently active loop.
    ClearRegionAudio,
    SetScrubInterpolation(ScrubInterpolation),
    SetVolumeCompensation(bool),
}

// -------------------------------------------------------------------------------------------------

/// Engine state which needs to be persisted by hosts to restore a session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineState {
    pub markers: Vec<f32>,
    pub scrub_interpolation: ScrubInterpolation,
    pub volume_compensation: bool,
    pub region_select: f32,
    pub file_path: Option<PathBuf>,
}

// -------------------------------------------------------------------------------------------------

/// Engine state as published by the audio thread after each processed block, for display.
///
/// All positions are normalized to the source's frame count.
pub struct EngineMonitor {
    grains_triggered: AtomicU64,
    grains_dropped: AtomicU64,
    active_voices: AtomicUsize,
    scan_position: AtomicF32,
    end_of_cycle: AtomicBool,
    scrub_stopped: AtomicBool,
    head_positions: [AtomicF32; 2],
    voice_positions: [AtomicF32; GRAIN_VOICE_COUNT],
    voice_gains: [AtomicF32; GRAIN_VOICE_COUNT],
    region: [AtomicF32; 2],
    region_select: AtomicF32,
    scrub_interpolation: AtomicU8,
    volume_compensation: AtomicBool,
    markers: SpinLock<Vec<f32>>,
}

impl EngineMonitor {
    fn new(markers: &MarkerSet) -> Self {
        let mut marker_snapshot = Vec::with_capacity(MAX_MARKERS);
        marker_snapshot.extend_from_slice(markers.markers());
        Self {
            grains_triggered: AtomicU64::new(0),
            grains_dropped: AtomicU64::new(0),
            active_voices: AtomicUsize::new(0),
            scan_position: AtomicF32::new(0.0),
            end_of_cycle: AtomicBool::new(false),
            scrub_stopped: AtomicBool::new(true),
            head_positions: Default::default(),
            voice_positions: Default::default(),
            voice_gains: Default::default(),
            region: [AtomicF32::new(0.0), AtomicF32::new(1.0)],
            region_select: AtomicF32::new(0.0),
            scrub_interpolation: AtomicU8::new(ScrubInterpolation::default() as u8),
            volume_compensation: AtomicBool::new(false),
            markers: SpinLock::new(marker_snapshot),
        }
    }

    /// Number of grains which got triggered so far.
    pub fn grains_triggered(&self) -> u64 {
        self.grains_triggered.load(Ordering::Relaxed)
    }
    /// Number of grains which got dropped because all voices were busy.
    pub fn grains_dropped(&self) -> u64 {
        self.grains_dropped.load(Ordering::Relaxed)
    }
    /// Number of currently playing grain voices.
    pub fn active_voices(&self) -> usize {
        self.active_voices.load(Ordering::Relaxed)
    }

    pub fn scan_position(&self) -> f32 {
        self.scan_position.load(Ordering::Relaxed)
    }

    /// Returns and resets the end of cycle pulse, which gets set when the scan position wrapped
    /// around in the loop.
    pub fn take_end_of_cycle(&self) -> bool {
        self.end_of_cycle.swap(false, Ordering::Relaxed)
    }

    /// True when the scrub heads stand still.
    pub fn is_scrub_stopped(&self) -> bool {
        self.scrub_stopped.load(Ordering::Relaxed)
    }
    pub fn scrub_head_positions(&self) -> [f32; 2] {
        [
            self.head_positions[0].load(Ordering::Relaxed),
            self.head_positions[1].load(Ordering::Relaxed),
        ]
    }

    /// Source positions of all grain voices.
    pub fn voice_positions(&self) -> [f32; GRAIN_VOICE_COUNT] {
        std::array::from_fn(|index| self.voice_positions[index].load(Ordering::Relaxed))
    }
    /// Envelope gains of all grain voices. 0 for idle voices.
    pub fn voice_gains(&self) -> [f32; GRAIN_VOICE_COUNT] {
        std::array::from_fn(|index| self.voice_gains[index].load(Ordering::Relaxed))
    }

    /// Bounds of the active loop.
    pub fn region(&self) -> (f32, f32) {
        (
            self.region[0].load(Ordering::Relaxed),
            self.region[1].load(Ordering::Relaxed),
        )
    }
    pub fn region_select(&self) -> f32 {
        self.region_select.load(Ordering::Relaxed)
    }

    pub fn scrub_interpolation(&self) -> ScrubInterpolation {
        ScrubInterpolation::from_repr(self.scrub_interpolation.load(Ordering::Relaxed))
            .unwrap_or_default()
    }

    pub fn volume_compensation(&self) -> bool {
        self.volume_compensation.load(Ordering::Relaxed)
    }

    /// Copy of the engine's current markers.
    pub fn markers(&self) -> Vec<f32> {
        self.markers.lock().clone()
    }
}

// -------------------------------------------------------------------------------------------------

/// Controls a [`GrainEngine`] from other threads.
///
/// Handles are `Send` and `Sync` and can be cloned freely. Marker and scrubber changes are sent
/// as [`EngineMessage`]s to the audio thread; buffer operations directly access the shared
/// [`SampleBuffer`].
#[derive(Clone)]
pub struct GrainEngineHandle {
    buffer: Arc<SampleBuffer>,
    message_queue: Arc<ArrayQueue<EngineMessage>>,
    monitor: Arc<EngineMonitor>,
}

impl GrainEngineHandle {
    pub fn buffer(&self) -> &Arc<SampleBuffer> {
        &self.buffer
    }

    pub fn monitor(&self) -> &EngineMonitor {
        &self.monitor
    }

    /// Add a marker at the current playback position.
    pub fn add_marker(&self) -> Result<(), Error> {
        self.send(EngineMessage::AddMarker)
    }

    /// Add a marker at the given normalized position [0, 1].
    pub fn add_marker_at(&self, position: f32) -> Result<(), Error> {
        self.send(EngineMessage::AddMarkerAt(position))
    }

    /// Replace all markers with `count` equally sized regions.
    pub fn add_equidistant_markers(&self, count: usize) -> Result<(), Error> {
        self.send(EngineMessage::AddEquidistantMarkers(count))
    }

    /// Remove all markers but the boundary ones.
    pub fn clear_markers(&self) -> Result<(), Error> {
        self.send(EngineMessage::ClearMarkers)
    }

    /// Silence the audio of the currently active loop.
    pub fn clear_region_audio(&self) -> Result<(), Error> {
        self.send(EngineMessage::ClearRegionAudio)
    }

    pub fn set_scrub_interpolation(&self, interpolation: ScrubInterpolation) -> Result<(), Error> {
        self.send(EngineMessage::SetScrubInterpolation(interpolation))
    }

    pub fn set_volume_compensation(&self, enabled: bool) -> Result<(), Error> {
        self.send(EngineMessage::SetVolumeCompensation(enabled))
    }

    /// Load an audio file into the engine's buffer.
    ///
    /// All markers get replaced with the file's loop points, if it has any. Errors are only
    /// returned when the file could not be imported: when the message queue is full, the
    /// previous markers are kept and a warning gets logged.
    pub fn import_file<P: AsRef<Path>>(&self, path: P) -> Result<SampleBufferImportInfo, Error> {
        let info = self.buffer.import_file(path)?;
        let loop_markers = info.loop_markers();
        let mut positions = [0.0; MAX_INNER_MARKERS];
        let count = loop_markers.len().min(MAX_INNER_MARKERS);
        positions[..count].copy_from_slice(&loop_markers[..count]);
        if let Err(err) = self.send(EngineMessage::SetMarkers { positions, count }) {
            log::warn!("Failed to replace markers with the imported file's loops: {err}");
        }
        Ok(info)
    }

    /// Write the buffer's content into a 32-bit float WAV file.
    #[cfg(feature = "wav-output")]
    pub fn export_wav<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        self.buffer.export_wav(path)
    }

    /// Normalize the whole buffer to the given peak level.
    pub fn normalize(&self, level: f32) {
        self.buffer.normalize(level, None);
    }

    /// Reverse the whole buffer.
    pub fn reverse(&self) {
        self.buffer.reverse(None);
    }

    /// Start recording into the buffer, replacing its content. Recorded samples get pushed
    /// with [`GrainEngine::record`].
    pub fn start_recording(&self, channel_count: usize, sample_rate: u32) {
        self.buffer.start_recording(channel_count, sample_rate);
    }

    pub fn stop_recording(&self) {
        self.buffer.stop_recording();
    }

    pub fn is_recording(&self) -> bool {
        self.buffer.is_recording()
    }

    /// Recording position, relative to the buffer's capacity.
    pub fn record_position(&self) -> f32 {
        self.buffer.record_position()
    }

    /// Min/max overview of the buffer's content for waveform displays.
    pub fn peaks(&self) -> Vec<Vec<WaveformPoint>> {
        self.buffer.peaks()
    }

    /// Current state for persistence. See [`GrainEngine::restore_state`].
    pub fn state(&self) -> EngineState {
        EngineState {
            markers: self.monitor.markers(),
            scrub_interpolation: self.monitor.scrub_interpolation(),
            volume_compensation: self.monitor.volume_compensation(),
            region_select: self.monitor.region_select(),
            file_path: self.buffer.file_path(),
        }
    }

    fn send(&self, message: EngineMessage) -> Result<(), Error> {
        self.message_queue.push(message).map_err(|message| {
            Error::SendError(format!("engine message queue is full, dropped {message:?}"))
        })
    }
}

// -------------------------------------------------------------------------------------------------

/// Granular sampler and buffer scrubber, playing a single [`SampleBuffer`].
///
/// The engine lives in the audio thread: [`process`](Self::process) gets called once per
/// block and neither blocks nor allocates. Use a [`GrainEngineHandle`] to control the engine
/// from other threads.
///
/// Markers split the buffer into regions. The region select parameter picks one of them, and
/// loop length and slide narrow it down to the loop which grains and scrub heads play.
pub struct GrainEngine {
    buffer: Arc<SampleBuffer>,
    message_queue: Arc<ArrayQueue<EngineMessage>>,
    monitor: Arc<EngineMonitor>,
    markers: MarkerSet,
    markers_changed: bool,
    mixer: GrainMixer<GRAIN_VOICE_COUNT>,
    scrubber: BufferScrubber,
    message_divider: ClockDivider,
}

impl GrainEngine {
    pub fn new(config: EngineConfig) -> Result<Self, Error> {
        config.validate()?;
        let buffer = Arc::new(
            SampleBuffer::new(config.max_source_frames).with_autosave_path(config.autosave_path),
        );
        let message_queue = Arc::new(ArrayQueue::new(config.message_queue_size));
        let markers = MarkerSet::new();
        let monitor = Arc::new(EngineMonitor::new(&markers));
        let mixer = match config.rng_seed {
            Some(seed) => GrainMixer::with_seed(seed),
            None => GrainMixer::new(),
        };
        log::debug!(
            "Created grain engine with {} voices and a {} frames buffer",
            GRAIN_VOICE_COUNT,
            config.max_source_frames
        );
        Ok(Self {
            buffer,
            message_queue,
            monitor,
            markers,
            markers_changed: false,
            mixer,
            scrubber: BufferScrubber::new(),
            message_divider: ClockDivider::new(config.message_drain_interval),
        })
    }

    /// Create a new handle to control the engine from other threads.
    pub fn handle(&self) -> GrainEngineHandle {
        GrainEngineHandle {
            buffer: Arc::clone(&self.buffer),
            message_queue: Arc::clone(&self.message_queue),
            monitor: Arc::clone(&self.monitor),
        }
    }

    pub fn buffer(&self) -> &Arc<SampleBuffer> {
        &self.buffer
    }

    pub fn monitor(&self) -> &EngineMonitor {
        &self.monitor
    }

    pub fn markers(&self) -> &MarkerSet {
        &self.markers
    }

    /// Restore a previously saved state. Loads the state's audio file, if any, before applying
    /// markers and scrubber settings.
    pub fn restore_state(&mut self, state: &EngineState) -> Result<(), Error> {
        if let Some(path) = &state.file_path {
            self.buffer.import_file(path)?;
        }
        self.markers.set_markers(&state.markers);
        self.markers_changed = true;
        self.scrubber.set_interpolation(state.scrub_interpolation);
        self.scrubber
            .set_volume_compensation(state.volume_compensation);
        self.monitor
            .region_select
            .store(state.region_select, Ordering::Relaxed);
        self.publish_settings();
        Ok(())
    }

    /// Push recorded interleaved samples into the buffer while a recording is running.
    /// Returns the number of recorded frames.
    pub fn record(&self, input: &[f32], gain: f32) -> usize {
        self.buffer.push_record_samples(input, gain)
    }

    /// Render the next block of interleaved audio into `output`, overwriting its content.
    pub fn process(
        &mut self,
        output: &mut [f32],
        channel_count: usize,
        sample_rate: u32,
        parameters: &EngineParameters,
    ) {
        Self::assert_no_alloc(|| {
            self.process_block(output, channel_count, sample_rate, parameters)
        });
    }

    fn process_block(
        &mut self,
        output: &mut [f32],
        channel_count: usize,
        sample_rate: u32,
        parameters: &EngineParameters,
    ) {
        debug_assert!(channel_count > 0 && output.len() % channel_count == 0);
        if self.message_divider.process() {
            self.process_messages(parameters);
        }
        clear_buffer(output);
        self.monitor
            .region_select
            .store(parameters.region_select, Ordering::Relaxed);

        if parameters.source_index != 0 {
            self.publish_state(0, (0, 0));
            return;
        }

        let mut data = self.buffer.lock();
        let frame_count = data.frame_count();
        let (min_frame, max_frame) = self.region_frames(frame_count, parameters);
        data.set_sub_section(min_frame, max_frame);

        self.mixer.set_play_mode(parameters.play_mode);
        self.mixer.set_speed(play_speed(parameters.play_rate));
        self.mixer.set_pitch(parameters.pitch);
        self.mixer.set_pitch_spread(parameters.pitch_spread);
        self.mixer.set_grain_rate(parameters.grain_rate);
        self.mixer.set_grain_length(parameters.grain_length);
        self.mixer
            .set_position_randomization(parameters.position_randomization);
        self.mixer
            .set_reverse_probability(parameters.reverse_probability);
        self.mixer.set_scan_position(parameters.scan_position);

        if parameters.play_mode == PlayMode::Scrub {
            let (min_frame, max_frame) = data.sub_section();
            self.scrubber.set_region(min_frame, max_frame);
            self.scrubber.set_next_position(parameters.scan_position);
            self.scrubber.set_separation(parameters.scrub_separation);
            for frame in output.chunks_exact_mut(channel_count) {
                self.scrubber.process_frame(
                    &*data,
                    frame,
                    sample_rate,
                    parameters.scrub_smoothing,
                );
            }
        }
        // in scrub mode, this only plays out already running grains
        self.mixer
            .process_audio(&*data, output, channel_count, sample_rate);
        let sub_section = data.sub_section();
        drop(data);

        self.publish_state(frame_count, sub_section);
    }

    /// Loop bounds in frames for the given parameters.
    fn region_frames(&self, frame_count: usize, parameters: &EngineParameters) -> (usize, usize) {
        let (start, end) = loop_window(
            self.markers.region(parameters.region_select),
            parameters.loop_length,
            parameters.loop_slide,
        );
        let to_frame = |position: f32| {
            ((position as f64 * frame_count as f64).round() as usize).min(frame_count)
        };
        (to_frame(start), to_frame(end))
    }

    /// Current playback position, relative to the buffer's frame count.
    fn playback_position(&self, mode: PlayMode, frame_count: usize) -> f32 {
        if frame_count == 0 {
            return 0.0;
        }
        let position = match mode {
            PlayMode::Scrub => {
                let [left, right] = self.scrubber.head_positions();
                (left + right) / 2.0
            }
            PlayMode::Rate | PlayMode::Scan => self.mixer.scan_position(),
        };
        (position / frame_count as f64) as f32
    }

    fn process_messages(&mut self, parameters: &EngineParameters) {
        while let Some(message) = self.message_queue.pop() {
            match message {
                EngineMessage::AddMarker => {
                    let position =
                        self.playback_position(parameters.play_mode, self.buffer.frame_count());
                    self.markers_changed |= self.markers.add(position);
                }
                EngineMessage::AddMarkerAt(position) => {
                    self.markers_changed |= self.markers.add(position);
                }
                EngineMessage::AddEquidistantMarkers(count) => {
                    self.markers.add_equidistant(count);
                    self.markers_changed = true;
                }
                EngineMessage::ClearMarkers => {
                    self.markers.clear();
                    self.markers_changed = true;
                }
                EngineMessage::SetMarkers { positions, count } => {
                    self.markers.set_markers(&positions[..count.min(MAX_INNER_MARKERS)]);
                    self.markers_changed = true;
                }
                EngineMessage::ClearRegionAudio => {
                    let region = self.region_frames(self.buffer.frame_count(), parameters);
                    self.buffer.clear_audio(Some(region));
                }
                EngineMessage::SetScrubInterpolation(interpolation) => {
                    self.scrubber.set_interpolation(interpolation);
                }
                EngineMessage::SetVolumeCompensation(enabled) => {
                    self.scrubber.set_volume_compensation(enabled);
                }
            }
        }
        self.publish_settings();
    }

    /// Publish settings and markers which only change via messages or state restores.
    fn publish_settings(&mut self) {
        let monitor = &self.monitor;
        monitor
            .scrub_interpolation
            .store(self.scrubber.interpolation() as u8, Ordering::Relaxed);
        monitor
            .volume_compensation
            .store(self.scrubber.volume_compensation(), Ordering::Relaxed);
        if self.markers_changed {
            // retry with the next message batch when a reader holds the lock
            if let Some(mut snapshot) = monitor.markers.try_lock() {
                snapshot.clear();
                snapshot.extend_from_slice(self.markers.markers());
                self.markers_changed = false;
            }
        }
    }

    /// Publish playback state of the last processed block.
    fn publish_state(&mut self, frame_count: usize, sub_section: (usize, usize)) {
        let monitor = &self.monitor;
        let scale = if frame_count > 0 {
            1.0 / frame_count as f64
        } else {
            0.0
        };
        monitor
            .grains_triggered
            .store(self.mixer.grains_triggered(), Ordering::Relaxed);
        monitor
            .grains_dropped
            .store(self.mixer.grains_dropped(), Ordering::Relaxed);
        monitor
            .active_voices
            .store(self.mixer.active_voice_count(), Ordering::Relaxed);
        monitor.scan_position.store(
            (self.mixer.scan_position() * scale) as f32,
            Ordering::Relaxed,
        );
        if self.mixer.take_end_of_cycle() {
            monitor.end_of_cycle.store(true, Ordering::Relaxed);
        }
        monitor
            .scrub_stopped
            .store(self.scrubber.is_stopped(), Ordering::Relaxed);
        for (position, head) in self.scrubber.head_positions().iter().zip(&monitor.head_positions) {
            head.store((position * scale) as f32, Ordering::Relaxed);
        }
        for (voice, (position, gain)) in self
            .mixer
            .voices()
            .iter()
            .zip(monitor.voice_positions.iter().zip(&monitor.voice_gains))
        {
            position.store((voice.source_position() * scale) as f32, Ordering::Relaxed);
            gain.store(voice.gain(), Ordering::Relaxed);
        }
        let (min_frame, max_frame) = sub_section;
        monitor.region[0].store((min_frame as f64 * scale) as f32, Ordering::Relaxed);
        monitor.region[1].store((max_frame as f64 * scale) as f32, Ordering::Relaxed);
    }

    /// Panics on allocations in debug builds with the `assert-allocs` feature.
    fn assert_no_alloc<T, F: FnOnce() -> T>(func: F) -> T {
        #[cfg(feature = "assert-allocs")]
        return assert_no_alloc::assert_no_alloc::<T, F>(func);
        #[cfg(not(feature = "assert-allocs"))]
        return func();
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: u32 = 44100;
    const BLOCK_FRAMES: usize = 512;

    fn engine() -> GrainEngine {
        crate::testing::init_logger();
        let config = EngineConfig::default()
            .max_source_frames(SAMPLE_RATE as usize * 2)
            .rng_seed(0x5eed);
        GrainEngine::new(config).unwrap()
    }

    /// One second mono sine sweep from 100 Hz to 2 kHz with an amplitude of 0.5.
    fn sine_sweep() -> Vec<f32> {
        let frames = SAMPLE_RATE as usize;
        let (start, end) = (100.0_f64, 2000.0_f64);
        let mut phase = 0.0_f64;
        (0..frames)
            .map(|frame| {
                let frequency = start + (end - start) * frame as f64 / frames as f64;
                phase += std::f64::consts::TAU * frequency / SAMPLE_RATE as f64;
                (phase.sin() * 0.5) as f32
            })
            .collect()
    }

    /// Run the engine for `frames` stereo frames and return the rendered output.
    fn render(engine: &mut GrainEngine, frames: usize, parameters: &EngineParameters) -> Vec<f32> {
        let mut output = vec![0.0; frames * 2];
        for block in output.chunks_mut(BLOCK_FRAMES * 2) {
            engine.process(block, 2, SAMPLE_RATE, parameters);
        }
        output
    }

    /// Write a 16-bit mono wave file with a `smpl` chunk holding the given forward loops.
    fn write_wav_with_loops(name: &str, frames: usize, loops: &[(u32, u32)]) -> PathBuf {
        fn chunk(id: &[u8; 4], data: &[u8]) -> Vec<u8> {
            let mut chunk = id.to_vec();
            chunk.extend_from_slice(&(data.len() as u32).to_le_bytes());
            chunk.extend_from_slice(data);
            chunk
        }
        let mut format = Vec::new();
        format.extend_from_slice(&1_u16.to_le_bytes()); // PCM
        format.extend_from_slice(&1_u16.to_le_bytes());
        format.extend_from_slice(&SAMPLE_RATE.to_le_bytes());
        format.extend_from_slice(&(SAMPLE_RATE * 2).to_le_bytes());
        format.extend_from_slice(&2_u16.to_le_bytes());
        format.extend_from_slice(&16_u16.to_le_bytes());
        let data = (0..frames)
            .flat_map(|frame| (((frame as f32 * 0.05).sin() * 8000.0) as i16).to_le_bytes())
            .collect::<Vec<u8>>();
        let mut sampler = vec![0_u8; 36];
        sampler[28..32].copy_from_slice(&(loops.len() as u32).to_le_bytes());
        for (start, end) in loops {
            let mut record = [0_u8; 24];
            record[8..12].copy_from_slice(&start.to_le_bytes());
            record[12..16].copy_from_slice(&end.to_le_bytes());
            sampler.extend_from_slice(&record);
        }
        let mut wave = b"WAVE".to_vec();
        wave.extend(chunk(b"fmt ", &format));
        wave.extend(chunk(b"data", &data));
        wave.extend(chunk(b"smpl", &sampler));

        let path = std::env::temp_dir().join(format!("grainbox-{}-{}", std::process::id(), name));
        std::fs::write(&path, chunk(b"RIFF", &wave)).unwrap();
        path
    }

    #[test]
    fn config() {
        assert!(EngineConfig::default().validate().is_ok());
        assert!(EngineConfig::default()
            .max_source_frames(0)
            .validate()
            .is_err());
        assert!(EngineConfig::default()
            .message_queue_size(0)
            .validate()
            .is_err());
        assert!(EngineConfig::default()
            .message_drain_interval(0)
            .validate()
            .is_err());
        assert!(matches!(
            GrainEngine::new(EngineConfig::default().max_source_frames(0)),
            Err(Error::ParameterError(_))
        ));
    }

    #[test]
    fn end_to_end() {
        let mut engine = engine();
        engine
            .buffer()
            .load_samples(&sine_sweep(), 1, SAMPLE_RATE)
            .unwrap();

        // 10 grains per second, 50 ms long grains
        let parameters = EngineParameters {
            grain_rate: 1.0 - (0.09_f32 / 0.49).sqrt(),
            grain_length: 0.0,
            ..EngineParameters::default()
        };
        let output = render(&mut engine, SAMPLE_RATE as usize * 2, &parameters);

        let triggered = engine.monitor().grains_triggered();
        assert!((19..=21).contains(&triggered), "{triggered} grains");
        assert_eq!(engine.monitor().grains_dropped(), 0);
        assert!(output.iter().all(|sample| sample.is_finite()));
        assert!(output.iter().all(|sample| sample.abs() <= 0.5 + 1e-3));

        // 50% duty cycle of hann windowed sines with amplitude 0.5: RMS is about 0.15
        let rms = (output.iter().map(|s| s * s).sum::<f32>() / output.len() as f32).sqrt();
        assert!(rms > 0.1 && rms < 0.2, "rms is {rms}");
    }

    #[test]
    fn region_selection() {
        let mut engine = engine();
        engine
            .buffer()
            .load_samples(&[0.25; 1000], 1, SAMPLE_RATE)
            .unwrap();
        let handle = engine.handle();
        handle.add_equidistant_markers(4).unwrap();

        let parameters = EngineParameters {
            region_select: 0.5,
            ..EngineParameters::default()
        };
        render(&mut engine, BLOCK_FRAMES, &parameters);
        assert_eq!(engine.markers().markers(), &[0.0, 0.25, 0.5, 0.75, 1.0]);
        assert_eq!(engine.buffer().sub_section(), (500, 750));
        assert_eq!(engine.monitor().region(), (0.5, 0.75));
        assert_eq!(engine.monitor().markers(), vec![0.0, 0.25, 0.5, 0.75, 1.0]);

        // loop length and slide narrow down the region
        let parameters = EngineParameters {
            region_select: 0.5,
            loop_length: 0.5,
            loop_slide: 1.0,
            ..EngineParameters::default()
        };
        render(&mut engine, BLOCK_FRAMES, &parameters);
        assert_eq!(engine.buffer().sub_section(), (625, 750));
    }

    #[test]
    fn marker_messages() {
        let mut engine = engine();
        engine
            .buffer()
            .load_samples(&[0.25; 1000], 1, SAMPLE_RATE)
            .unwrap();
        let handle = engine.handle();
        let parameters = EngineParameters {
            play_mode: PlayMode::Scan,
            scan_position: 0.5,
            ..EngineParameters::default()
        };
        render(&mut engine, BLOCK_FRAMES, &parameters);
        // scan position is at the center of the buffer now
        handle.add_marker().unwrap();
        handle.add_marker_at(0.1).unwrap();
        // messages get applied every 4th block
        render(&mut engine, BLOCK_FRAMES * 3, &parameters);
        assert_eq!(engine.markers().len(), 2);
        render(&mut engine, BLOCK_FRAMES, &parameters);
        assert_eq!(engine.markers().markers(), &[0.0, 0.1, 0.5, 1.0]);

        handle.clear_markers().unwrap();
        render(&mut engine, BLOCK_FRAMES * 4, &parameters);
        assert_eq!(engine.markers().markers(), &[0.0, 1.0]);
    }

    #[test]
    fn message_queue_overflow() {
        let engine = GrainEngine::new(EngineConfig::default().message_queue_size(2)).unwrap();
        let handle = engine.handle();
        assert!(handle.add_marker_at(0.1).is_ok());
        assert!(handle.add_marker_at(0.2).is_ok());
        assert!(matches!(
            handle.add_marker_at(0.3),
            Err(Error::SendError(_))
        ));
    }

    #[test]
    fn imported_loops_become_markers() {
        let mut engine = engine();
        let handle = engine.handle();
        handle.add_equidistant_markers(8).unwrap();
        let path = write_wav_with_loops("engine-loops.wav", 1000, &[(250, 750)]);
        let info = handle.import_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(info.frame_count, 1000);
        assert_eq!(info.loops.len(), 1);
        assert_eq!(info.loop_markers(), vec![0.25, 0.75]);

        render(&mut engine, BLOCK_FRAMES, &EngineParameters::default());
        assert_eq!(engine.markers().markers(), &[0.0, 0.25, 0.75, 1.0]);
        assert_eq!(engine.monitor().markers(), vec![0.0, 0.25, 0.75, 1.0]);
        assert_eq!(handle.state().file_path, Some(path));
    }

    #[test]
    fn import_with_full_message_queue() {
        crate::testing::init_logger();
        let mut engine = GrainEngine::new(
            EngineConfig::default()
                .max_source_frames(SAMPLE_RATE as usize)
                .message_queue_size(2),
        )
        .unwrap();
        let handle = engine.handle();
        handle.add_marker_at(0.1).unwrap();
        handle.add_marker_at(0.2).unwrap();

        // the import succeeds: only the loop markers get dropped
        let path = write_wav_with_loops("engine-full-queue.wav", 1000, &[(250, 750)]);
        let info = handle.import_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(info.frame_count, 1000);
        assert_eq!(engine.buffer().frame_count(), 1000);
        assert_eq!(engine.buffer().file_path(), Some(path));

        render(&mut engine, BLOCK_FRAMES, &EngineParameters::default());
        assert_eq!(engine.markers().markers(), &[0.0, 0.1, 0.2, 1.0]);
    }

    #[test]
    fn clear_region_audio() {
        let mut engine = engine();
        engine
            .buffer()
            .load_samples(&[0.5; 1000], 1, SAMPLE_RATE)
            .unwrap();
        let handle = engine.handle();
        handle.add_marker_at(0.5).unwrap();
        handle.clear_region_audio().unwrap();
        render(&mut engine, BLOCK_FRAMES, &EngineParameters::default());

        let data = engine.buffer().lock();
        assert!(data.samples()[..500].iter().all(|s| *s == 0.0));
        assert!(data.samples()[500..1000].iter().all(|s| *s == 0.5));
    }

    #[test]
    fn scrub_mode() {
        let mut engine = engine();
        engine
            .buffer()
            .load_samples(&sine_sweep(), 1, SAMPLE_RATE)
            .unwrap();
        let mut parameters = EngineParameters {
            play_mode: PlayMode::Scrub,
            scrub_smoothing: 20.0,
            ..EngineParameters::default()
        };

        // move the scrub position through the buffer
        let mut output = vec![0.0; BLOCK_FRAMES * 2];
        let mut energy = 0.0;
        for block in 0..100 {
            parameters.scan_position = block as f32 / 200.0;
            engine.process(&mut output, 2, SAMPLE_RATE, &parameters);
            energy += output.iter().map(|s| s * s).sum::<f32>();
        }
        assert!(energy > 0.0);
        assert!(!engine.monitor().is_scrub_stopped());
        assert_eq!(engine.monitor().grains_triggered(), 0);

        // hold the position: heads stop and fade out
        render(&mut engine, SAMPLE_RATE as usize, &parameters);
        engine.process(&mut output, 2, SAMPLE_RATE, &parameters);
        assert!(engine.monitor().is_scrub_stopped());
        assert!(output.iter().all(|s| *s == 0.0));
        let [left, right] = engine.monitor().scrub_head_positions();
        assert!((left - 0.495).abs() < 0.01 && left == right);
    }

    #[test]
    fn other_sources_are_silent() {
        let mut engine = engine();
        engine
            .buffer()
            .load_samples(&sine_sweep(), 1, SAMPLE_RATE)
            .unwrap();
        let parameters = EngineParameters {
            source_index: 1,
            ..EngineParameters::default()
        };
        let output = render(&mut engine, BLOCK_FRAMES * 4, &parameters);
        assert!(output.iter().all(|s| *s == 0.0));
        assert_eq!(engine.monitor().grains_triggered(), 0);
    }

    #[test]
    fn state() {
        let mut engine = engine();
        let handle = engine.handle();
        handle.add_marker_at(0.3).unwrap();
        handle
            .set_scrub_interpolation(ScrubInterpolation::Sinc)
            .unwrap();
        handle.set_volume_compensation(true).unwrap();
        let parameters = EngineParameters {
            region_select: 0.8,
            ..EngineParameters::default()
        };
        render(&mut engine, BLOCK_FRAMES, &parameters);

        let state = handle.state();
        assert_eq!(
            state,
            EngineState {
                markers: vec![0.0, 0.3, 1.0],
                scrub_interpolation: ScrubInterpolation::Sinc,
                volume_compensation: true,
                region_select: 0.8,
                file_path: None,
            }
        );

        let mut restored = GrainEngine::new(EngineConfig::default()).unwrap();
        restored.restore_state(&state).unwrap();
        assert_eq!(restored.markers().markers(), &[0.0, 0.3, 1.0]);
        assert_eq!(restored.handle().state(), state);
    }

    #[test]
    fn recording() {
        let engine = GrainEngine::new(EngineConfig::default().max_source_frames(1000)).unwrap();
        let handle = engine.handle();
        assert_eq!(engine.record(&[0.5; 100], 1.0), 0);
        handle.start_recording(1, SAMPLE_RATE);
        assert_eq!(engine.record(&[0.5; 600], 0.5), 600);
        assert_eq!(handle.record_position(), 0.6);
        // auto stops at the buffer's capacity
        assert_eq!(engine.record(&[0.5; 600], 0.5), 400);
        assert!(!handle.is_recording());
        assert_eq!(engine.buffer().frame_count(), 1000);
        assert_eq!(handle.peaks()[0][0].max, 0.25);
        handle.stop_recording();
    }
}
