//! Granular synthesis and buffer scrubbing building blocks.

pub mod curves;
pub mod engine;
pub mod markers;
pub mod mixer;
pub mod scrubber;
pub mod sinc;
pub mod voice;
pub mod window;
