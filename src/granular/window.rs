//! Precomputed grain amplitude envelope.

use std::sync::LazyLock;

use assume::assume;

// -------------------------------------------------------------------------------------------------

/// Precomputed Hann window, used as grain envelope.
///
/// The table covers the closed phase range [0, 1], so both edges of the window are exactly 0.
pub struct GrainWindow<const N: usize> {
    lut: [f32; N],
}

impl<const N: usize> GrainWindow<N> {
    const _VERIFY_N: () = assert!(N >= 2, "Grain window needs at least two points");

    /// Precompute the window LUT
    pub fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let _ = Self::_VERIFY_N;

        let mut lut = [0.0; N];
        for (i, value) in lut.iter_mut().enumerate() {
            let phase = i as f64 / (N - 1) as f64; // [0.0, 1.0]
            *value = (0.5 * (1.0 - (std::f64::consts::TAU * phase).cos())) as f32;
        }
        // avoid rounding noise at the edges: grains must start and end in silence
        lut[0] = 0.0;
        lut[N - 1] = 0.0;
        Self { lut }
    }

    /// Evaluate the window at normalized phase [0.0, 1.0], using linear interpolation.
    #[inline]
    pub fn sample(&self, phase: f64) -> f32 {
        let phase = phase.clamp(0.0, 1.0);
        let index_float = phase * (N - 1) as f64;
        let index = index_float as usize;
        if index >= N - 1 {
            return self.lut[N - 1];
        }
        let fraction = (index_float - index as f64) as f32;
        assume!(unsafe: index + 1 < N);
        self.lut[index] * (1.0 - fraction) + self.lut[index + 1] * fraction
    }

    /// Window value for frame `index` of a grain with `length` frames.
    #[inline]
    pub fn sample_at(&self, index: usize, length: usize) -> f32 {
        if length < 2 {
            return 0.0;
        }
        self.sample(index as f64 / (length - 1) as f64)
    }
}

impl<const N: usize> Default for GrainWindow<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Static, shared grain window
pub static GRAIN_WINDOW: LazyLock<GrainWindow<4096>> = LazyLock::new(GrainWindow::new);

// -------------------------------------------------------------------------------------------------
