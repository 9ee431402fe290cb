//! Preallocated, shared sample arena which gets filled by file imports or live recordings.

use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
};

use super::AudioSource;
use crate::{
    error::Error,
    granular::markers::MAX_INNER_MARKERS,
    utils::{
        buffer::{
            clear_buffer, peak_amplitude, remap_to_source_channels, reverse_frames, scale_buffer,
            MAX_SOURCE_CHANNELS,
        },
        decoder::{SampleFileDecoder, SampleFileSpec, SampleLoop},
        sync::{SpinLock, SpinLockGuard},
        wave::{append_multi_channel_peaks, WaveformPoint, PEAK_DOWNSAMPLE_FACTOR},
    },
};

// -------------------------------------------------------------------------------------------------

/// Number of frames which get copied within a single lock when reading out large ranges of the
/// buffer on control threads (peaks, exports). A multiple of [`PEAK_DOWNSAMPLE_FACTOR`].
const READ_CHUNK_FRAMES: usize = 256 * PEAK_DOWNSAMPLE_FACTOR;

/// Max supported sample rate of imported files or recordings.
const MAX_SAMPLE_RATE: u32 = 768_000;

// -------------------------------------------------------------------------------------------------

/// Infos about a successfully imported audio file.
#[derive(Debug, Clone)]
pub struct SampleBufferImportInfo {
    /// Number of frames which got imported. May be less than the file's frame count when the
    /// file did not fit into the buffer.
    pub frame_count: usize,
    /// Number of channels in the buffer (at most [`MAX_SOURCE_CHANNELS`]).
    pub channel_count: usize,
    /// Sample rate of the imported file.
    pub sample_rate: u32,
    /// Loop points from the file's RIFF `smpl` chunk, if any.
    pub loops: Vec<SampleLoop>,
}

impl SampleBufferImportInfo {
    /// Loop start and end points as relative positions in the buffer, ready to be used as markers.
    /// Points beyond the marker set's capacity get dropped.
    pub fn loop_markers(&self) -> Vec<f32> {
        if self.frame_count == 0 {
            return Vec::new();
        }
        self.loops
            .iter()
            .flat_map(|sample_loop| [sample_loop.start, sample_loop.end])
            .take(MAX_INNER_MARKERS)
            .map(|frame| (frame as f64 / self.frame_count as f64).clamp(0.0, 1.0) as f32)
            .collect()
    }
}

// -------------------------------------------------------------------------------------------------

/// Sample arena and its metadata, as accessed by the audio thread via [`SampleBuffer::lock`].
///
/// Frames are stored interleaved with a stride of the current channel count. The arena's memory
/// gets allocated once and never grows.
pub struct SampleData {
    samples: Box<[f32]>,
    capacity: usize,
    channel_count: usize,
    sample_rate: u32,
    frame_count: usize,
    sub_section: (usize, usize),
    recording: bool,
    record_cursor: usize,
    file_path: Option<PathBuf>,
}

impl SampleData {
    fn new(capacity: usize) -> Self {
        Self {
            samples: vec![0.0; capacity * MAX_SOURCE_CHANNELS].into_boxed_slice(),
            capacity,
            channel_count: 0,
            sample_rate: 44100,
            frame_count: 0,
            sub_section: (0, 0),
            recording: false,
            record_cursor: 0,
            file_path: None,
        }
    }

    /// Max number of frames the arena can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// True when there's no playable audio.
    pub fn is_empty(&self) -> bool {
        self.channel_count == 0 || self.frame_count == 0
    }

    /// Valid interleaved samples.
    pub fn samples(&self) -> &[f32] {
        &self.samples[..self.frame_count * self.channel_count]
    }

    /// True while a recording is running.
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Path of the last imported or exported file.
    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    /// Convert an optional frame range into a valid, non inverted frame range.
    fn frame_range(&self, range: Option<(usize, usize)>) -> (usize, usize) {
        let (start, end) = range.unwrap_or((0, self.frame_count));
        let end = end.min(self.frame_count);
        (start.min(end), end)
    }

    /// Mutable interleaved samples of the given frame range.
    fn range_mut(&mut self, range: (usize, usize)) -> &mut [f32] {
        let channel_count = self.channel_count;
        &mut self.samples[range.0 * channel_count..range.1 * channel_count]
    }

    /// Replace buffer content with the given interleaved samples. Samples which exceed the
    /// capacity get dropped.
    fn replace(&mut self, samples: &[f32], channel_count: usize, sample_rate: u32) -> usize {
        debug_assert!(channel_count > 0 && channel_count <= MAX_SOURCE_CHANNELS);
        let frame_count = (samples.len() / channel_count).min(self.capacity);
        let sample_count = frame_count * channel_count;
        self.samples[..sample_count].copy_from_slice(&samples[..sample_count]);
        self.channel_count = channel_count;
        self.sample_rate = sample_rate;
        self.frame_count = frame_count;
        self.sub_section = (0, frame_count);
        self.recording = false;
        self.record_cursor = 0;
        frame_count
    }

    /// Copy at most `frames` frames from `start_frame` on into the given vector.
    /// Returns the number of copied frames.
    fn copy_frames(&self, start_frame: usize, frames: usize, output: &mut Vec<f32>) -> usize {
        let start_frame = start_frame.min(self.frame_count);
        let end_frame = (start_frame + frames).min(self.frame_count);
        output.extend_from_slice(
            &self.samples[start_frame * self.channel_count..end_frame * self.channel_count],
        );
        end_frame - start_frame
    }
}

impl AudioSource for SampleData {
    #[inline]
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    fn frame_count(&self) -> usize {
        self.frame_count
    }

    #[inline]
    fn channel_count(&self) -> usize {
        self.channel_count
    }

    #[inline]
    fn sub_section(&self) -> (usize, usize) {
        self.sub_section
    }

    fn set_sub_section(&mut self, min_frame: usize, max_frame: usize) {
        let max_frame = max_frame.min(self.frame_count);
        self.sub_section = (min_frame.min(max_frame), max_frame);
    }

    #[inline]
    fn sample(&self, frame: usize, channel: usize) -> f32 {
        let index = frame * self.channel_count + channel;
        debug_assert!(index < self.frame_count * self.channel_count);
        self.samples[index]
    }
}

// -------------------------------------------------------------------------------------------------

/// Shared, fixed capacity sample buffer.
///
/// The buffer gets shared between a control thread (imports, edits, exports, peak overviews) and
/// the audio thread (playback and recording). All sample access goes through a [`SpinLock`]:
/// the audio thread locks it once per processing block, control threads only for short copies.
/// File decoding happens outside of the lock, so imports never stall playback.
///
/// Metadata (sample rate, frame and channel count) is mirrored into atomics, so it can be
/// queried without locking.
pub struct SampleBuffer {
    data: SpinLock<SampleData>,
    capacity: usize,
    sample_rate: AtomicU32,
    frame_count: AtomicUsize,
    channel_count: AtomicUsize,
    peaks: SpinLock<Vec<Vec<WaveformPoint>>>,
    peaks_dirty: AtomicBool,
    unsaved_recording: AtomicBool,
    autosave_path: Option<PathBuf>,
}

impl SampleBuffer {
    /// Create a new, empty buffer which can hold up to `capacity` frames of stereo audio.
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0, "Invalid buffer capacity");
        let data = SampleData::new(capacity);
        let sample_rate = AtomicU32::new(data.sample_rate);
        Self {
            data: SpinLock::new(data),
            capacity,
            sample_rate,
            frame_count: AtomicUsize::new(0),
            channel_count: AtomicUsize::new(0),
            peaks: SpinLock::new(Vec::new()),
            peaks_dirty: AtomicBool::new(true),
            unsaved_recording: AtomicBool::new(false),
            autosave_path: None,
        }
    }

    /// Path an unsaved recording gets written to when the buffer gets dropped.
    pub fn with_autosave_path<P: Into<PathBuf>>(mut self, path: Option<P>) -> Self {
        self.autosave_path = path.map(Into::into);
        self
    }

    /// Lock the sample data for reading or writing. Blocks (spins) while another thread holds
    /// the lock, which is only ever the case for short copies.
    #[inline]
    pub fn lock(&self) -> SpinLockGuard<'_, SampleData> {
        self.data.lock()
    }

    /// Try locking the sample data without waiting.
    #[inline]
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, SampleData>> {
        self.data.try_lock()
    }

    /// Max number of frames the buffer can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
    /// Sample rate of the buffer's content.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Relaxed)
    }
    /// Number of valid frames in the buffer.
    pub fn frame_count(&self) -> usize {
        self.frame_count.load(Ordering::Relaxed)
    }
    /// Number of channels in the buffer. 0 when empty.
    pub fn channel_count(&self) -> usize {
        self.channel_count.load(Ordering::Relaxed)
    }

    /// Path of the last imported or exported file.
    pub fn file_path(&self) -> Option<PathBuf> {
        self.lock().file_path.clone()
    }

    /// Active read window of the buffer, as set by the engine.
    pub fn sub_section(&self) -> (usize, usize) {
        self.lock().sub_section()
    }

    /// Set a new active read window. Bounds get clamped to the buffer's frame count.
    pub fn set_sub_section(&self, min_frame: usize, max_frame: usize) {
        self.lock().set_sub_section(min_frame, max_frame);
    }

    /// Decode the given audio file and replace the buffer's content with it.
    ///
    /// Files with more than [`MAX_SOURCE_CHANNELS`] channels get downmixed by dropping the
    /// additional channels. Files longer than the buffer's capacity get truncated.
    /// On errors, the buffer's content is left unchanged.
    pub fn import_file<P: AsRef<Path>>(&self, path: P) -> Result<SampleBufferImportInfo, Error> {
        let path = path.as_ref();
        let mut decoder = SampleFileDecoder::open(path)?;
        let SampleFileSpec {
            channel_count: file_channel_count,
            sample_rate,
        } = decoder.spec();
        if sample_rate > MAX_SAMPLE_RATE {
            return Err(Error::ParameterError(format!(
                "unsupported sample rate: {sample_rate}"
            )));
        }

        // decode outside of the lock, stopping as soon as we've got enough frames
        let mut samples = Vec::new();
        let mut channel_count = file_channel_count.min(MAX_SOURCE_CHANNELS);
        while let Some(packet) = decoder.next_packet() {
            channel_count = remap_to_source_channels(packet, file_channel_count, &mut samples);
            if samples.len() >= self.capacity * channel_count {
                log::warn!(
                    "File '{}' exceeds the buffer's capacity of {} frames and gets truncated",
                    path.display(),
                    self.capacity
                );
                break;
            }
        }
        if samples.is_empty() {
            return Err(Error::AudioDecodingError(Box::new(
                symphonia::core::errors::Error::DecodeError("file contains no audio frames"),
            )));
        }

        let frame_count = {
            let mut data = self.lock();
            let frame_count = data.replace(&samples, channel_count, sample_rate);
            data.file_path = Some(path.to_path_buf());
            self.update_metadata(&data);
            frame_count
        };
        self.unsaved_recording.store(false, Ordering::Relaxed);
        self.mark_peaks_dirty();

        log::info!(
            "Imported '{}': {} frames, {} channels @ {} Hz",
            path.display(),
            frame_count,
            channel_count,
            sample_rate
        );
        Ok(SampleBufferImportInfo {
            frame_count,
            channel_count,
            sample_rate,
            loops: decoder.loops().to_vec(),
        })
    }

    /// Replace the buffer's content with the given interleaved samples.
    ///
    /// Returns the number of frames which got copied, which may be less than the given number
    /// of frames when the samples exceed the buffer's capacity.
    pub fn load_samples(
        &self,
        samples: &[f32],
        channel_count: usize,
        sample_rate: u32,
    ) -> Result<usize, Error> {
        if channel_count == 0 || samples.len() % channel_count != 0 {
            return Err(Error::ParameterError(format!(
                "invalid channel count {channel_count} for {} samples",
                samples.len()
            )));
        }
        if sample_rate == 0 || sample_rate > MAX_SAMPLE_RATE {
            return Err(Error::ParameterError(format!(
                "unsupported sample rate: {sample_rate}"
            )));
        }
        if samples.is_empty() {
            return Err(Error::ParameterError("empty sample buffer".to_string()));
        }
        let mut remapped = Vec::new();
        let channel_count = remap_to_source_channels(samples, channel_count, &mut remapped);
        let frame_count = {
            let mut data = self.lock();
            let frame_count = data.replace(&remapped, channel_count, sample_rate);
            data.file_path = None;
            self.update_metadata(&data);
            frame_count
        };
        self.unsaved_recording.store(false, Ordering::Relaxed);
        self.mark_peaks_dirty();
        Ok(frame_count)
    }

    /// Write the buffer's content as 32-bit float WAV file.
    #[cfg(feature = "wav-output")]
    pub fn export_wav<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let path = path.as_ref();
        let (channel_count, sample_rate, frame_count) = {
            let data = self.lock();
            (data.channel_count, data.sample_rate, data.frame_count)
        };
        if channel_count == 0 {
            return Err(Error::ParameterError(
                "can't export an empty buffer".to_string(),
            ));
        }
        let spec = hound::WavSpec {
            channels: channel_count as u16,
            sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec)?;
        let mut chunk = Vec::with_capacity(READ_CHUNK_FRAMES * channel_count);
        let mut frame = 0;
        while frame < frame_count {
            chunk.clear();
            let copied = {
                let data = self.lock();
                if data.channel_count != channel_count {
                    return Err(Error::ParameterError(
                        "buffer got replaced while exporting".to_string(),
                    ));
                }
                data.copy_frames(frame, READ_CHUNK_FRAMES, &mut chunk)
            };
            if copied == 0 {
                break;
            }
            for sample in &chunk {
                writer.write_sample(*sample)?;
            }
            frame += copied;
        }
        writer.finalize()?;

        self.lock().file_path = Some(path.to_path_buf());
        self.unsaved_recording.store(false, Ordering::Relaxed);
        log::info!("Exported {} frames to '{}'", frame, path.display());
        Ok(())
    }

    /// Scale the given frame range (or the whole buffer when `None`), so that its peak
    /// amplitude becomes `level`. Silent ranges are left untouched.
    pub fn normalize(&self, level: f32, range: Option<(usize, usize)>) {
        let level = level.clamp(0.0, 1.0);
        {
            let mut data = self.lock();
            let range = data.frame_range(range);
            let samples = data.range_mut(range);
            let peak = peak_amplitude(samples);
            if peak <= f32::EPSILON {
                return;
            }
            scale_buffer(samples, level / peak);
        }
        self.mark_peaks_dirty();
    }

    /// Reverse the given frame range (or the whole buffer when `None`).
    pub fn reverse(&self, range: Option<(usize, usize)>) {
        {
            let mut data = self.lock();
            if data.is_empty() {
                return;
            }
            let channel_count = data.channel_count;
            let range = data.frame_range(range);
            reverse_frames(data.range_mut(range), channel_count);
        }
        self.mark_peaks_dirty();
    }

    /// Silence the given frame range (or the whole buffer when `None`).
    pub fn clear_audio(&self, range: Option<(usize, usize)>) {
        {
            let mut data = self.lock();
            let range = data.frame_range(range);
            clear_buffer(data.range_mut(range));
        }
        self.mark_peaks_dirty();
    }

    /// Drop all audio content. The buffer's channel count becomes 0.
    pub fn clear(&self) {
        {
            let mut data = self.lock();
            data.channel_count = 0;
            data.frame_count = 0;
            data.sub_section = (0, 0);
            data.recording = false;
            data.record_cursor = 0;
            data.file_path = None;
            self.update_metadata(&data);
        }
        self.unsaved_recording.store(false, Ordering::Relaxed);
        self.mark_peaks_dirty();
    }

    /// Start a new recording, replacing the buffer's current content.
    pub fn start_recording(&self, channel_count: usize, sample_rate: u32) {
        let channel_count = channel_count.clamp(1, MAX_SOURCE_CHANNELS);
        let sample_rate = sample_rate.clamp(1, MAX_SAMPLE_RATE);
        {
            let mut data = self.lock();
            data.channel_count = channel_count;
            data.sample_rate = sample_rate;
            data.frame_count = 0;
            data.sub_section = (0, 0);
            data.record_cursor = 0;
            data.recording = true;
            data.file_path = None;
            self.update_metadata(&data);
        }
        self.mark_peaks_dirty();
        log::debug!("Started recording: {channel_count} channels @ {sample_rate} Hz");
    }

    /// Append interleaved samples with the recording's channel layout to the buffer, applying
    /// the given gain. Does nothing when no recording is running.
    ///
    /// Recording stops automatically when the buffer's capacity is reached. Returns the number
    /// of frames that got written.
    pub fn push_record_samples(&self, samples: &[f32], gain: f32) -> usize {
        let written = {
            let mut data = self.lock();
            if !data.recording {
                return 0;
            }
            let channel_count = data.channel_count;
            let cursor = data.record_cursor;
            let frames = (samples.len() / channel_count).min(data.capacity - cursor);
            let target = data.range_mut((cursor, cursor + frames));
            for (o, i) in target.iter_mut().zip(samples) {
                *o = *i * gain;
            }
            data.record_cursor += frames;
            data.frame_count = data.record_cursor;
            data.sub_section = (0, data.frame_count);
            if data.record_cursor >= data.capacity {
                data.recording = false;
                log::info!("Record buffer is full: stopped recording");
            }
            self.update_metadata(&data);
            frames
        };
        if written > 0 {
            self.unsaved_recording.store(true, Ordering::Relaxed);
            self.peaks_dirty.store(true, Ordering::Relaxed);
        }
        written
    }

    /// Stop a running recording. The recorded frames stay in the buffer.
    pub fn stop_recording(&self) {
        let mut data = self.lock();
        if data.recording {
            data.recording = false;
            log::debug!("Stopped recording after {} frames", data.record_cursor);
        }
    }

    /// True while a recording is running.
    pub fn is_recording(&self) -> bool {
        self.lock().recording
    }

    /// Recording write position, relative to the buffer's capacity.
    pub fn record_position(&self) -> f32 {
        (self.lock().record_cursor as f64 / self.capacity as f64) as f32
    }

    /// True when the buffer holds a recording that did not get exported yet.
    pub fn has_unsaved_recording(&self) -> bool {
        self.unsaved_recording.load(Ordering::Relaxed)
    }

    /// Min/max overview of the buffer's content, one point per [`PEAK_DOWNSAMPLE_FACTOR`]
    /// frames and channel. Gets calculated lazily and cached until the buffer changes.
    pub fn peaks(&self) -> Vec<Vec<WaveformPoint>> {
        if self.peaks_dirty.swap(false, Ordering::Relaxed) {
            match self.calculate_peaks() {
                Some(peaks) => *self.peaks.lock() = peaks,
                None => self.peaks_dirty.store(true, Ordering::Relaxed),
            }
        }
        self.peaks.lock().clone()
    }

    /// Calculate peaks in chunks, locking the buffer only while copying a chunk.
    /// Returns `None` when the buffer got replaced while calculating.
    fn calculate_peaks(&self) -> Option<Vec<Vec<WaveformPoint>>> {
        let (channel_count, sample_rate) = {
            let data = self.lock();
            (data.channel_count, data.sample_rate)
        };
        let mut peaks = vec![Vec::new(); channel_count];
        if channel_count == 0 {
            return Some(peaks);
        }
        let mut chunk = Vec::with_capacity(READ_CHUNK_FRAMES * channel_count);
        let mut frame = 0;
        loop {
            chunk.clear();
            let copied = {
                let data = self.lock();
                if data.channel_count != channel_count || data.sample_rate != sample_rate {
                    return None;
                }
                data.copy_frames(frame, READ_CHUNK_FRAMES, &mut chunk)
            };
            if copied == 0 {
                break;
            }
            append_multi_channel_peaks(
                &chunk,
                channel_count,
                sample_rate,
                frame,
                PEAK_DOWNSAMPLE_FACTOR,
                &mut peaks,
            );
            frame += copied;
        }
        Some(peaks)
    }

    fn mark_peaks_dirty(&self) {
        self.peaks_dirty.store(true, Ordering::Relaxed);
    }

    fn update_metadata(&self, data: &SampleData) {
        self.sample_rate.store(data.sample_rate, Ordering::Relaxed);
        self.frame_count.store(data.frame_count, Ordering::Relaxed);
        self.channel_count
            .store(data.channel_count, Ordering::Relaxed);
    }
}

impl Drop for SampleBuffer {
    fn drop(&mut self) {
        if !self.unsaved_recording.load(Ordering::Relaxed) {
            return;
        }
        match &self.autosave_path {
            #[cfg(feature = "wav-output")]
            Some(path) => {
                if let Err(err) = self.export_wav(path) {
                    log::error!("Failed to save recording to '{}': {err}", path.display());
                }
            }
            #[cfg(not(feature = "wav-output"))]
            Some(path) => {
                log::warn!(
                    "Can't save recording to '{}': wav output is disabled",
                    path.display()
                );
            }
            None => log::warn!("Dropping an unsaved recording"),
        }
    }
}

// -------------------------------------------------------------------------------------------------
