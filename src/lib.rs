#![doc = include_str!("../README.md")]

// private mods (will be partly re-exported)
mod error;

// public, flat re-exports
pub use error::Error;

pub use granular::{
    engine::{
        EngineConfig, EngineMessage, EngineMonitor, EngineParameters, EngineState, GrainEngine,
        GrainEngineHandle, GRAIN_VOICE_COUNT,
    },
    markers::MarkerSet,
    mixer::{GrainMixer, PlayMode},
    scrubber::{BufferScrubber, ScrubInterpolation},
    voice::{GrainSettings, GrainVoice, GrainVoiceState},
};

pub use source::{
    buffer::{SampleBuffer, SampleBufferImportInfo, SampleData},
    AudioSource,
};

// public mods
pub mod granular;
pub mod source;
pub mod utils;
