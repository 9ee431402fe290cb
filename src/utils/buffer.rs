//! Interleaved sample buffer helpers.

// -------------------------------------------------------------------------------------------------

/// Max number of channels a [`SampleBuffer`](crate::SampleBuffer) stores.
pub const MAX_SOURCE_CHANNELS: usize = 2;
/// Max number of output channels grains and scrubber heads get rendered to.
pub const MAX_OUTPUT_CHANNELS: usize = 4;

/// Source channel index to read for each output channel, indexed by the source channel count
/// minus one: mono sources get duplicated, stereo sources pass through and repeat the L/R pair.
pub const CHANNEL_MAP: [[usize; MAX_OUTPUT_CHANNELS]; MAX_SOURCE_CHANNELS] =
    [[0, 0, 0, 0], [0, 1, 0, 1]];

/// Map an output channel index to the source channel that feeds it.
///
/// Sources with more than [`MAX_SOURCE_CHANNELS`] channels wrap around their own channel count.
#[inline]
pub fn mapped_channel(source_channel_count: usize, output_channel: usize) -> usize {
    debug_assert!(source_channel_count > 0);
    match source_channel_count {
        1..=MAX_SOURCE_CHANNELS => {
            CHANNEL_MAP[source_channel_count - 1][output_channel % MAX_OUTPUT_CHANNELS]
        }
        _ => output_channel % source_channel_count,
    }
}

// -------------------------------------------------------------------------------------------------

/// Fill the given buffer with zeros.
#[inline]
pub fn clear_buffer(buffer: &mut [f32]) {
    buffer.fill(0.0);
}

/// Multiply all samples in the given buffer with the given gain.
#[inline]
pub fn scale_buffer(buffer: &mut [f32], gain: f32) {
    for sample in buffer.iter_mut() {
        *sample *= gain;
    }
}

/// Get the max absolute sample value of the given buffer.
pub fn peak_amplitude(buffer: &[f32]) -> f32 {
    buffer.iter().fold(0.0_f32, |peak, sample| peak.max(sample.abs()))
}

/// Reverse the order of frames in the given interleaved buffer, keeping the channel order
/// within each frame.
pub fn reverse_frames(buffer: &mut [f32], channel_count: usize) {
    debug_assert!(channel_count > 0 && buffer.len() % channel_count == 0);
    match channel_count {
        1 => buffer.reverse(),
        _ => {
            let frame_count = buffer.len() / channel_count;
            for frame in 0..frame_count / 2 {
                let mirrored = frame_count - 1 - frame;
                for channel in 0..channel_count {
                    buffer.swap(
                        frame * channel_count + channel,
                        mirrored * channel_count + channel,
                    );
                }
            }
        }
    }
}

/// Convert an interleaved buffer with `input_channel_count` channels into an interleaved buffer
/// with at most [`MAX_SOURCE_CHANNELS`] channels. Additional channels are dropped.
///
/// Returns the channel count of the appended output.
pub fn remap_to_source_channels(
    input: &[f32],
    input_channel_count: usize,
    output: &mut Vec<f32>,
) -> usize {
    debug_assert!(input_channel_count > 0 && input.len() % input_channel_count == 0);
    let output_channel_count = input_channel_count.min(MAX_SOURCE_CHANNELS);
    if output_channel_count == input_channel_count {
        output.extend_from_slice(input);
    } else {
        for frame in input.chunks_exact(input_channel_count) {
            output.extend_from_slice(&frame[..output_channel_count]);
        }
    }
    output_channel_count
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_map() {
        assert_eq!(mapped_channel(1, 0), 0);
        assert_eq!(mapped_channel(1, 3), 0);
        assert_eq!(mapped_channel(2, 0), 0);
        assert_eq!(mapped_channel(2, 1), 1);
        assert_eq!(mapped_channel(2, 2), 0);
        assert_eq!(mapped_channel(2, 3), 1);
        assert_eq!(mapped_channel(3, 2), 2);
        assert_eq!(mapped_channel(3, 3), 0);
    }

    #[test]
    fn reverse() {
        let mut mono = vec![1.0, 2.0, 3.0];
        reverse_frames(&mut mono, 1);
        assert_eq!(mono, vec![3.0, 2.0, 1.0]);

        let mut stereo = vec![1.0, -1.0, 2.0, -2.0, 3.0, -3.0];
        reverse_frames(&mut stereo, 2);
        assert_eq!(stereo, vec![3.0, -3.0, 2.0, -2.0, 1.0, -1.0]);
    }

    #[test]
    fn remap() {
        let mut output = Vec::new();
        let quad = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        assert_eq!(remap_to_source_channels(&quad, 4, &mut output), 2);
        assert_eq!(output, vec![1.0, 2.0, 5.0, 6.0]);

        output.clear();
        assert_eq!(remap_to_source_channels(&[0.5, 0.25], 1, &mut output), 1);
        assert_eq!(output, vec![0.5, 0.25]);
    }

    #[test]
    fn peak() {
        assert_eq!(peak_amplitude(&[]), 0.0);
        assert_eq!(peak_amplitude(&[0.1, -0.7, 0.5]), 0.7);
    }
}
