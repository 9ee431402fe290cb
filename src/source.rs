//! Boundary safe sample access for grains and scrubbers.

pub mod buffer;

use crate::utils::{
    buffer::{clear_buffer, mapped_channel},
    wrap_value_safe,
};

// -------------------------------------------------------------------------------------------------

/// Default fade length in frames which gets applied at both edges of a source's sub section.
pub const SOURCE_FADE_FRAMES: usize = 256;

// -------------------------------------------------------------------------------------------------

/// Read access to some audio material which grains and scrubbers get rendered from.
///
/// All reads are bounded by the source's *sub section*: a playable frame range within the
/// source which gets faded in and out at its edges, so readers never produce clicks when
/// crossing or wrapping around the section's boundaries.
///
/// Implementations must be cheap and non blocking: they get called from the audio thread.
pub trait AudioSource {
    /// Sample rate of the source material in Hz.
    fn sample_rate(&self) -> u32;
    /// Number of valid frames.
    fn frame_count(&self) -> usize;
    /// Number of channels. 0 when no audio got loaded or recorded yet.
    fn channel_count(&self) -> usize;

    /// Active read window as `(min_frame, max_frame)`, where max is exclusive.
    fn sub_section(&self) -> (usize, usize);
    /// Set a new active read window. Bounds get clamped to `[0, frame_count]`.
    fn set_sub_section(&mut self, min_frame: usize, max_frame: usize);

    /// Raw sample access. Caller must ensure that frame and channel are valid.
    fn sample(&self, frame: usize, channel: usize) -> f32;

    /// Read a single sample, applying the sub section's boundary fades.
    ///
    /// Returns exactly 0 for frames outside of `[0, frame_count)` or outside of the sub
    /// section. Within the sub section the sample gets ramped in over the first `fade_len`
    /// frames and ramped out over the last `fade_len` frames.
    fn sample_safe_and_fade(&self, frame: i64, channel: usize, fade_len: usize) -> f32 {
        let channel_count = self.channel_count();
        if frame < 0 || frame >= self.frame_count() as i64 || channel_count == 0 {
            return 0.0;
        }
        let gain = fade_gain(self.sub_section(), frame, fade_len);
        if gain == 0.0 {
            return 0.0;
        }
        self.sample(frame as usize, channel % channel_count) * gain
    }

    /// Fill `frames` interleaved frames with `channel_count` channels into `output`, reading
    /// from `start_frame` on.
    ///
    /// Source channels get mapped to the output channels via the fixed channel map. Read
    /// positions wrap around within the sub section, and the sub section's boundary fades
    /// are applied. Degenerated (empty) sub sections produce silence.
    fn put_into_buffer(
        &self,
        output: &mut [f32],
        frames: usize,
        channel_count: usize,
        start_frame: i64,
    ) {
        debug_assert!(channel_count > 0 && output.len() >= frames * channel_count);
        let output = &mut output[..frames * channel_count];
        let source_channel_count = self.channel_count();
        let (min_frame, max_frame) = self.sub_section();
        if source_channel_count == 0 || max_frame <= min_frame {
            clear_buffer(output);
            return;
        }
        let mut frame = wrap_value_safe(min_frame as f64, start_frame as f64, max_frame as f64)
            .floor() as i64;
        for output_frame in output.chunks_exact_mut(channel_count) {
            for (channel, sample) in output_frame.iter_mut().enumerate() {
                *sample = self.sample_safe_and_fade(
                    frame,
                    mapped_channel(source_channel_count, channel),
                    SOURCE_FADE_FRAMES,
                );
            }
            frame += 1;
            if frame >= max_frame as i64 {
                frame = min_frame as i64;
            }
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Linear fade in/out gain for the given frame in a `(min, max)` sub section.
///
/// 0 outside of the section, ramps over `fade_len` frames at both edges, else 1.
pub fn fade_gain(sub_section: (usize, usize), frame: i64, fade_len: usize) -> f32 {
    let (min_frame, max_frame) = (sub_section.0 as i64, sub_section.1 as i64);
    if frame < min_frame || frame >= max_frame {
        return 0.0;
    }
    if fade_len == 0 {
        return 1.0;
    }
    let fade_len = fade_len as f32;
    let gain_in = ((frame - min_frame) as f32 / fade_len).min(1.0);
    let gain_out = ((max_frame - 1 - frame) as f32 / fade_len).min(1.0);
    gain_in.min(gain_out)
}

// -------------------------------------------------------------------------------------------------
