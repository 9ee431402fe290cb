//! Helper functions to generate waveform peak overviews for display purposes.

use std::time::Duration;

// -------------------------------------------------------------------------------------------------

/// Number of sample frames which get condensed into a single [`WaveformPoint`] by
/// [`SampleBuffer::peaks`](crate::SampleBuffer::peaks).
pub const PEAK_DOWNSAMPLE_FACTOR: usize = 256;

// -------------------------------------------------------------------------------------------------

/// A single point in a waveform view plot, which represents a condensed view of the audio data at
/// the specified time as min/max values.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct WaveformPoint {
    /// Start time this point refers to in the original sample buffer.
    pub time: Duration,
    /// The minimum of all values which are represented by this time slice.
    pub min: f32,
    /// The maximum of all values which are represented by this time slice.
    pub max: f32,
}

// -------------------------------------------------------------------------------------------------

/// Append per channel min/max points for the given interleaved buffer, condensing
/// `frames_per_point` frames into one point. The last point may cover less frames.
///
/// `first_frame` is the position of the buffer's first frame in the whole source, so overviews
/// can be generated in chunks. Chunks other than the last one must contain a multiple of
/// `frames_per_point` frames then.
pub fn append_multi_channel_peaks(
    buffer: &[f32],
    channel_count: usize,
    samples_per_sec: u32,
    first_frame: usize,
    frames_per_point: usize,
    waveform: &mut [Vec<WaveformPoint>],
) {
    debug_assert!(channel_count > 0 && waveform.len() >= channel_count);
    debug_assert!(frames_per_point > 0 && samples_per_sec > 0);

    let samples_per_point = frames_per_point * channel_count;
    for (point_index, slice) in buffer.chunks(samples_per_point).enumerate() {
        let frame_index = first_frame + point_index * frames_per_point;
        let time = Duration::from_secs_f64(frame_index as f64 / samples_per_sec as f64);
        for (channel_index, channel_waveform) in
            waveform.iter_mut().enumerate().take(channel_count)
        {
            let (min, max) = slice
                .iter()
                .skip(channel_index)
                .step_by(channel_count)
                .fold((f32::MAX, f32::MIN), |(min, max), value| {
                    (min.min(*value), max.max(*value))
                });
            channel_waveform.push(WaveformPoint { time, min, max });
        }
    }
}

// -------------------------------------------------------------------------------------------------
