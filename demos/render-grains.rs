//! Offline rendering of a grain cloud and a scrub pass into a WAV file.
//!
//! Renders a synthetic sine sweep (or the given audio file) through the grain engine, first in
//! rate mode and then in scrub mode, and writes the result as 32-bit float stereo WAV.

use std::path::PathBuf;

use arg::{parse_args, Args};

use grainbox::{EngineConfig, EngineParameters, Error, GrainEngine, PlayMode, ScrubInterpolation};

// -------------------------------------------------------------------------------------------------

#[cfg(all(debug_assertions, feature = "assert-allocs"))]
#[global_allocator]
static A: assert_no_alloc::AllocDisabler = assert_no_alloc::AllocDisabler;

// -------------------------------------------------------------------------------------------------

const DEFAULT_LOG_LEVEL: log::Level = if cfg!(debug_assertions) {
    log::Level::Debug
} else {
    log::Level::Warn
};

const SAMPLE_RATE: u32 = 44100;
const CHANNEL_COUNT: usize = 2;
const BLOCK_FRAMES: usize = 512;

// Grain parameters (tweak as needed!)
const GRAIN_RATE: f32 = 0.7; // 0 = 2 grains/s, 1 = 100 grains/s
const GRAIN_LENGTH: f32 = 0.6; // 0.5 = grain interval, 1 = 8 x grain interval
const PLAY_RATE: f32 = 0.25; // 0.5 = original speed
const PITCH_SPREAD: f32 = 0.1;
const POSITION_RANDOMIZATION: f32 = 0.3;
const REVERSE_PROBABILITY: f32 = 0.2;

// -------------------------------------------------------------------------------------------------

#[derive(Args, Debug, Default)]
struct Arguments {
    #[arg(short = "i", long = "input")]
    /// Audio file to render grains from. By default a synthetic sine sweep.
    input_path: Option<PathBuf>,
    #[arg(short = "o", long = "output")]
    /// Path of the rendered WAV file. By default \"grains.wav\".
    output_path: Option<PathBuf>,
    #[arg(short = "d", long = "duration")]
    /// Duration of each of the two passes in seconds. By default 4.
    duration: Option<f32>,
    #[arg(short = "l", long = "log-level")]
    /// Set logging level to \"debug\", \"info\", \"warn\" or \"error\".
    /// By default \"debug\" in dev builds and \"warn\" in release builds.
    log_level: Option<log::Level>,
}

// -------------------------------------------------------------------------------------------------

fn main() -> Result<(), Error> {
    let args = parse_args::<Arguments>();

    simple_logger::SimpleLogger::new()
        .with_level(args.log_level.unwrap_or(DEFAULT_LOG_LEVEL).to_level_filter())
        .with_module_level("symphonia_core", log::LevelFilter::Warn)
        .with_module_level("symphonia_format", log::LevelFilter::Warn)
        .init()
        .expect("Failed to set logger");

    let mut engine = GrainEngine::new(
        EngineConfig::default()
            .max_source_frames(60 * SAMPLE_RATE as usize)
            .message_drain_interval(1),
    )?;
    let handle = engine.handle();

    // load source
    if let Some(input_path) = &args.input_path {
        let info = handle.import_file(input_path)?;
        log::info!(
            "Loaded '{}': {} frames, {} channels @ {} Hz",
            input_path.display(),
            info.frame_count,
            info.channel_count,
            info.sample_rate
        );
    } else {
        handle.buffer().load_samples(&sine_sweep(4.0), 1, SAMPLE_RATE)?;
    }
    handle.add_equidistant_markers(2)?;
    handle.set_scrub_interpolation(ScrubInterpolation::Sinc)?;

    let duration = args.duration.unwrap_or(4.0).clamp(0.1, 60.0);
    let pass_frames = (duration * SAMPLE_RATE as f32) as usize;
    let mut output = Vec::with_capacity(pass_frames * CHANNEL_COUNT * 2);
    let mut block = vec![0.0; BLOCK_FRAMES * CHANNEL_COUNT];

    // grain cloud pass
    let mut parameters = EngineParameters {
        play_rate: PLAY_RATE,
        grain_rate: GRAIN_RATE,
        grain_length: GRAIN_LENGTH,
        pitch_spread: PITCH_SPREAD,
        position_randomization: POSITION_RANDOMIZATION,
        reverse_probability: REVERSE_PROBABILITY,
        ..EngineParameters::default()
    };
    let mut rendered = 0;
    while rendered < pass_frames {
        // sweep through the two regions
        parameters.region_select = rendered as f32 / pass_frames as f32;
        engine.process(&mut block, CHANNEL_COUNT, SAMPLE_RATE, &parameters);
        output.extend_from_slice(&block);
        rendered += BLOCK_FRAMES;
    }
    log::info!(
        "Grain pass: {} grains triggered, {} dropped",
        engine.monitor().grains_triggered(),
        engine.monitor().grains_dropped()
    );

    // scrub pass: scratch back and forth through the first region
    parameters.play_mode = PlayMode::Scrub;
    parameters.region_select = 0.0;
    parameters.scrub_separation = 0.05;
    let mut rendered = 0;
    while rendered < pass_frames {
        let time = rendered as f32 / SAMPLE_RATE as f32;
        parameters.scan_position = 0.5 + 0.4 * (time * std::f32::consts::TAU * 0.5).sin();
        engine.process(&mut block, CHANNEL_COUNT, SAMPLE_RATE, &parameters);
        output.extend_from_slice(&block);
        rendered += BLOCK_FRAMES;
    }

    // write output
    let output_path = args
        .output_path
        .unwrap_or_else(|| PathBuf::from("grains.wav"));
    let spec = hound::WavSpec {
        channels: CHANNEL_COUNT as u16,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(&output_path, spec)?;
    for sample in output {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    log::info!("Wrote '{}'", output_path.display());
    Ok(())
}

/// Mono sine sweep from 110 Hz to 880 Hz.
fn sine_sweep(seconds: f32) -> Vec<f32> {
    let frames = (seconds * SAMPLE_RATE as f32) as usize;
    let mut phase = 0.0_f64;
    (0..frames)
        .map(|frame| {
            let progress = frame as f64 / frames as f64;
            let frequency = 110.0 * 8.0_f64.powf(progress);
            phase += std::f64::consts::TAU * frequency / SAMPLE_RATE as f64;
            (phase.sin() * 0.5) as f32
        })
        .collect()
}
