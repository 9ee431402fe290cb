//! Audio file decoding into interleaved f32 packets, including WAV sampler loop points.

use std::{
    fs::File,
    io::{self, Read, Seek},
    path::Path,
};

use byteorder::{ByteOrder, LittleEndian};
use riff::{Chunk, ChunkId};

use symphonia::core::{
    audio::{SampleBuffer, SignalSpec},
    codecs::Decoder,
    errors::Error as SymphoniaError,
    formats::FormatReader,
    io::MediaSourceStream,
    probe::Hint,
};

use crate::error::Error;

// -------------------------------------------------------------------------------------------------

/// Max number of loops which get read from a `smpl` chunk.
const MAX_SAMPLE_LOOPS: usize = 64;

/// Size of the `smpl` chunk header and of a single loop record in bytes.
const SMPL_HEADER_SIZE: usize = 36;
const SMPL_LOOP_SIZE: usize = 24;

// -------------------------------------------------------------------------------------------------

/// Playback direction of a [`SampleLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleLoopMode {
    Forward,
    Alternating,
    Backward,
    Unknown,
}

impl SampleLoopMode {
    fn from_smpl_type(loop_type: u32) -> Self {
        match loop_type {
            0 => Self::Forward,
            1 => Self::Alternating,
            2 => Self::Backward,
            _ => Self::Unknown,
        }
    }
}

/// A loop from a WAV file's `smpl` chunk, in sample frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleLoop {
    pub mode: SampleLoopMode,
    pub start: u32,
    pub end: u32,
}

/// Channel layout and rate of a decoded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleFileSpec {
    pub channel_count: usize,
    pub sample_rate: u32,
}

// -------------------------------------------------------------------------------------------------

/// Decodes the default track of an audio file with symphonia, packet by packet.
pub struct SampleFileDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    spec: SampleFileSpec,
    packet: Option<SampleBuffer<f32>>,
    loops: Vec<SampleLoop>,
}

impl SampleFileDecoder {
    /// Open the given file and probe its format.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let mut file = File::open(path)?;
        let loops = read_smpl_loops(&mut file);
        file.rewind()?;

        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(extension);
        }
        let stream = MediaSourceStream::new(Box::new(file), Default::default());
        let format = symphonia::default::get_probe()
            .format(&hint, stream, &Default::default(), &Default::default())
            .map_err(|_| Error::MediaFileProbeError)?
            .format;

        let track = format.default_track().ok_or(Error::MediaFileProbeError)?;
        let spec = match (track.codec_params.sample_rate, track.codec_params.channels) {
            (Some(sample_rate), Some(channels)) if sample_rate > 0 && channels.count() > 0 => {
                SampleFileSpec {
                    channel_count: channels.count(),
                    sample_rate,
                }
            }
            _ => return Err(Error::MediaFileProbeError),
        };
        let track_id = track.id;
        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &Default::default())
            .map_err(|err| Error::AudioDecodingError(Box::new(err)))?;

        Ok(Self {
            format,
            decoder,
            track_id,
            spec,
            packet: None,
            loops,
        })
    }

    pub fn spec(&self) -> SampleFileSpec {
        self.spec
    }

    /// Loops from the file's `smpl` chunk. Empty for files without loops.
    pub fn loops(&self) -> &[SampleLoop] {
        &self.loops
    }

    /// Decode the next packet into interleaved samples.
    ///
    /// Corrupt packets get skipped. Returns `None` at the end of the stream or on
    /// unrecoverable errors.
    pub fn next_packet(&mut self) -> Option<&[f32]> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(err)) if err.kind() == io::ErrorKind::UnexpectedEof => {
                    return None;
                }
                Err(err) => {
                    log::error!("Failed to read audio packet: {err}");
                    return None;
                }
            };
            if packet.track_id() != self.track_id {
                continue;
            }
            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(err)) => {
                    log::warn!("Skipping corrupt audio packet: {err}");
                    continue;
                }
                Err(SymphoniaError::IoError(err)) => {
                    log::warn!("Skipping unreadable audio packet: {err}");
                    continue;
                }
                Err(err) => {
                    log::error!("Failed to decode audio packet: {err}");
                    return None;
                }
            };
            let frames = decoded.capacity();
            let signal_spec: SignalSpec = *decoded.spec();
            if self
                .packet
                .as_ref()
                .map_or(true, |buffer| buffer.capacity() < frames)
            {
                self.packet = Some(SampleBuffer::new(frames as u64, signal_spec));
            }
            let buffer = self.packet.as_mut()?;
            buffer.copy_interleaved_ref(decoded);
            return Some(buffer.samples());
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Read loops from a RIFF WAVE stream's `smpl` chunk. Returns no loops for other formats or
/// when the chunk is missing or malformed.
fn read_smpl_loops<R: Read + Seek>(reader: &mut R) -> Vec<SampleLoop> {
    const RIFF_ID: ChunkId = ChunkId { value: *b"RIFF" };
    const WAVE_ID: ChunkId = ChunkId { value: *b"WAVE" };
    const SMPL_ID: ChunkId = ChunkId { value: *b"smpl" };

    let Ok(riff) = Chunk::read(reader, 0) else {
        return Vec::new();
    };
    if riff.id() != RIFF_ID || !riff.read_type(reader).is_ok_and(|id| id == WAVE_ID) {
        return Vec::new();
    }
    let smpl = riff
        .iter(reader)
        .flatten()
        .find(|chunk| chunk.id() == SMPL_ID);
    match smpl.map(|chunk| chunk.read_contents(reader)) {
        Some(Ok(data)) => parse_smpl_chunk(&data),
        _ => Vec::new(),
    }
}

/// Parse the loop records of a `smpl` chunk's content. Truncated records get ignored.
fn parse_smpl_chunk(data: &[u8]) -> Vec<SampleLoop> {
    if data.len() < SMPL_HEADER_SIZE {
        return Vec::new();
    }
    let loop_count = LittleEndian::read_u32(&data[28..32]) as usize;
    data[SMPL_HEADER_SIZE..]
        .chunks_exact(SMPL_LOOP_SIZE)
        .take(loop_count.min(MAX_SAMPLE_LOOPS))
        .map(|record| SampleLoop {
            mode: SampleLoopMode::from_smpl_type(LittleEndian::read_u32(&record[4..8])),
            start: LittleEndian::read_u32(&record[8..12]),
            end: LittleEndian::read_u32(&record[12..16]),
        })
        .collect()
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn smpl_chunk(loops: &[(u32, u32, u32)], loop_count: u32) -> Vec<u8> {
        let mut data = vec![0; SMPL_HEADER_SIZE];
        LittleEndian::write_u32(&mut data[28..32], loop_count);
        for (loop_type, start, end) in loops {
            let mut record = [0; SMPL_LOOP_SIZE];
            LittleEndian::write_u32(&mut record[4..8], *loop_type);
            LittleEndian::write_u32(&mut record[8..12], *start);
            LittleEndian::write_u32(&mut record[12..16], *end);
            data.extend_from_slice(&record);
        }
        data
    }

    fn riff_wave(chunks: &[(&[u8; 4], Vec<u8>)]) -> Vec<u8> {
        let mut body = b"WAVE".to_vec();
        for (id, data) in chunks {
            body.extend_from_slice(*id);
            body.extend_from_slice(&(data.len() as u32).to_le_bytes());
            body.extend_from_slice(data);
        }
        let mut riff = b"RIFF".to_vec();
        riff.extend_from_slice(&(body.len() as u32).to_le_bytes());
        riff.extend_from_slice(&body);
        riff
    }

    #[test]
    fn smpl_loops() {
        let loops = parse_smpl_chunk(&smpl_chunk(&[(0, 100, 200), (1, 300, 400)], 2));
        assert_eq!(
            loops,
            vec![
                SampleLoop {
                    mode: SampleLoopMode::Forward,
                    start: 100,
                    end: 200
                },
                SampleLoop {
                    mode: SampleLoopMode::Alternating,
                    start: 300,
                    end: 400
                }
            ]
        );
        // loop count exceeds the present records
        assert_eq!(parse_smpl_chunk(&smpl_chunk(&[(7, 1, 2)], 3)).len(), 1);
        assert_eq!(
            parse_smpl_chunk(&smpl_chunk(&[(7, 1, 2)], 1))[0].mode,
            SampleLoopMode::Unknown
        );
        assert!(parse_smpl_chunk(&[0; 20]).is_empty());
    }

    #[test]
    fn riff_loops() {
        let wave = riff_wave(&[
            (b"fmt ", vec![0; 16]),
            (b"smpl", smpl_chunk(&[(0, 10, 20)], 1)),
        ]);
        let loops = read_smpl_loops(&mut Cursor::new(wave));
        assert_eq!(loops.len(), 1);
        assert_eq!((loops[0].start, loops[0].end), (10, 20));

        let no_loops = riff_wave(&[(b"fmt ", vec![0; 16])]);
        assert!(read_smpl_loops(&mut Cursor::new(no_loops)).is_empty());
        assert!(read_smpl_loops(&mut Cursor::new(b"not a riff file".to_vec())).is_empty());
    }

    #[test]
    fn missing_files() {
        assert!(matches!(
            SampleFileDecoder::open("this/file/does/not/exist.wav"),
            Err(Error::MediaFileNotFound)
        ));
    }
}
