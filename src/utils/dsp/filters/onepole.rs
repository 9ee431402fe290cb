//! One-pole low-pass smoothing filter.

// -------------------------------------------------------------------------------------------------

/// One-pole low-pass filter, based on an exponential moving average.
/// `y(n) = y(n-1) + a * (x(n) - y(n-1))`
///
/// State is kept in f64 so it can smooth sample positions in long buffers without drifting.
#[derive(Debug, Clone)]
pub struct OnePoleFilter {
    y1: f64, // previous output
    a: f64,  // coefficient
}

impl OnePoleFilter {
    /// Create a new pass-through filter. Call `init` to set a cutoff.
    pub fn new() -> Self {
        Self { y1: 0.0, a: 1.0 }
    }

    /// Set the filter's cutoff frequency in Hz for the given sample rate.
    pub fn init(&mut self, sample_rate: u32, cutoff: f64) {
        debug_assert!(sample_rate > 0, "Invalid sample rate");
        let cutoff = cutoff.clamp(0.001, sample_rate as f64 * 0.5);
        self.a = 1.0 - (-std::f64::consts::TAU * cutoff / sample_rate as f64).exp();
    }

    /// Current coefficient.
    #[inline]
    pub fn coefficient(&self) -> f64 {
        self.a
    }

    /// Last output value.
    #[inline]
    pub fn current(&self) -> f64 {
        self.y1
    }

    /// Jump to the given value without smoothing.
    pub fn reset(&mut self, value: f64) {
        self.y1 = value;
    }

    /// Process a single sample.
    #[inline]
    pub fn process_sample(&mut self, sample: f64) -> f64 {
        self.y1 += self.a * (sample - self.y1);
        self.y1
    }
}

impl Default for OnePoleFilter {
    fn default() -> Self {
        Self::new()
    }
}

// -------------------------------------------------------------------------------------------------
