//! Common, shared DSP tools for the grain engine.

pub mod divider;
pub mod filters;
