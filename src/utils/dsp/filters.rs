//! Simple filters to smooth control signals.

pub mod onepole;
