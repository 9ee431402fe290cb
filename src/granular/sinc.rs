//! Windowed sinc interpolation table for fractional sample reads.

use std::sync::LazyLock;

use assume::assume;

// -------------------------------------------------------------------------------------------------

/// Precomputed, Blackman windowed sinc kernels for `TAPS` point interpolation with `PHASES`
/// sub sample resolution. Kernels between two phases get linearly interpolated.
///
/// Reading a fractional position `n + mu` uses the samples `x[n - TAPS/2 + 1] ..= x[n + TAPS/2]`
/// and the *inverted* fraction `frac = 1 - mu`: the table's kernel for `frac` holds
/// `h(j - TAPS/2 + frac)` for tap `j`. `frac = 1` thus reads `x[n]` and `frac = 0` reads
/// `x[n + 1]` exactly.
pub struct SincTable<const TAPS: usize, const PHASES: usize> {
    kernels: Vec<[f32; TAPS]>,
}

impl<const TAPS: usize, const PHASES: usize> SincTable<TAPS, PHASES> {
    const _VERIFY_TAPS: () = assert!(
        TAPS >= 2 && TAPS % 2 == 0,
        "Sinc tap count must be an even number"
    );
    const _VERIFY_PHASES: () = assert!(PHASES > 0, "Need at least one sinc phase");

    /// Number of samples before the read position `n` which are part of the kernel.
    pub const TAPS_BEFORE: usize = TAPS / 2 - 1;

    pub fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let _ = (Self::_VERIFY_TAPS, Self::_VERIFY_PHASES);

        let half_width = (TAPS / 2) as f64;
        let kernels = (0..=PHASES)
            .map(|phase| {
                let frac = phase as f64 / PHASES as f64;
                let mut kernel = [0.0_f64; TAPS];
                for (j, coefficient) in kernel.iter_mut().enumerate() {
                    let t = j as f64 - half_width + frac;
                    *coefficient = Self::windowed_sinc(t, half_width);
                }
                // normalize to unity gain, so DC passes unchanged at all phases
                let sum = kernel.iter().sum::<f64>();
                let mut normalized = [0.0_f32; TAPS];
                for (n, k) in normalized.iter_mut().zip(kernel) {
                    *n = (k / sum) as f32;
                }
                normalized
            })
            .collect();
        Self { kernels }
    }

    fn windowed_sinc(t: f64, half_width: f64) -> f64 {
        use std::f64::consts::PI;
        if t.fract() == 0.0 {
            // exact zero crossings and center
            return if t == 0.0 { 1.0 } else { 0.0 };
        }
        if t.abs() >= half_width {
            return 0.0;
        }
        let sinc = (PI * t).sin() / (PI * t);
        let x = t / half_width; // -1..1
        let window = 0.42 + 0.5 * (PI * x).cos() + 0.08 * (2.0 * PI * x).cos();
        sinc * window
    }

    /// Interpolate `TAPS` samples with the given inverted fraction (`1 - mu`, see above).
    ///
    /// `samples[j * stride]` is the `j`-th tap, starting at `x[n - TAPS_BEFORE]`.
    #[inline]
    pub fn interpolate(&self, samples: &[f32], stride: usize, frac: f64) -> f32 {
        debug_assert!(stride > 0 && samples.len() > (TAPS - 1) * stride);
        let position = frac.clamp(0.0, 1.0) * PHASES as f64;
        let phase = (position as usize).min(PHASES - 1);
        let fraction = (position - phase as f64) as f32;

        assume!(unsafe: phase + 1 < self.kernels.len());
        let kernel_a = &self.kernels[phase];
        let kernel_b = &self.kernels[phase + 1];

        let mut sum = 0.0;
        for j in 0..TAPS {
            let coefficient = kernel_a[j] * (1.0 - fraction) + kernel_b[j] * fraction;
            sum += samples[j * stride] * coefficient;
        }
        sum
    }
}

impl<const TAPS: usize, const PHASES: usize> Default for SincTable<TAPS, PHASES> {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of taps of the shared sinc interpolator.
pub const SINC_TAPS: usize = 8;
/// Sub sample resolution of the shared sinc interpolator.
pub const SINC_PHASES: usize = 512;

/// Static, shared sinc interpolation table.
pub static SINC_TABLE: LazyLock<SincTable<SINC_TAPS, SINC_PHASES>> =
    LazyLock::new(SincTable::new);

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_positions() {
        let table = &*SINC_TABLE;
        let samples = [0.1, -0.2, 0.3, 0.4, -0.5, 0.6, 0.7, -0.8];
        // frac = 1 reads x[n], which is tap 3
        assert_eq!(table.interpolate(&samples, 1, 1.0), 0.4);
        // frac = 0 reads x[n + 1]
        assert_eq!(table.interpolate(&samples, 1, 0.0), -0.5);
    }

    #[test]
    fn unity_gain() {
        let table = &*SINC_TABLE;
        let samples = [1.0; SINC_TAPS];
        for phase in 0..=100 {
            let value = table.interpolate(&samples, 1, phase as f64 / 100.0);
            assert!((value - 1.0).abs() < 1e-5, "{value}");
        }
    }

    #[test]
    fn interpolates_ramps() {
        // a slow ramp must be reproduced closely at fractional positions
        let table = &*SINC_TABLE;
        let ramp = (0..SINC_TAPS).map(|v| v as f32 * 0.01).collect::<Vec<_>>();
        let mu = 0.25;
        let value = table.interpolate(&ramp, 1, 1.0 - mu);
        let expected = (SincTable::<SINC_TAPS, SINC_PHASES>::TAPS_BEFORE as f64 + mu) * 0.01;
        assert!((value as f64 - expected).abs() < 1e-3, "{value} vs {expected}");
    }

    #[test]
    fn strided_access() {
        let table = &*SINC_TABLE;
        // interleaved stereo: left is a ramp, right is constant
        let mut samples = vec![0.0; SINC_TAPS * 2];
        for j in 0..SINC_TAPS {
            samples[j * 2] = j as f32;
            samples[j * 2 + 1] = 0.5;
        }
        assert_eq!(table.interpolate(&samples, 2, 1.0), 3.0);
        assert_eq!(table.interpolate(&samples[1..], 2, 1.0), 0.5);
    }
}
