//! Clock divider to run tasks at a fraction of the processing rate.

// -------------------------------------------------------------------------------------------------

/// Counts process calls and fires once every `division` calls.
///
/// The very first call fires, so state which gets updated by the divider is valid right away.
#[derive(Debug, Clone)]
pub struct ClockDivider {
    division: u32,
    counter: u32,
}

impl ClockDivider {
    /// Create a new divider. A division of 0 is treated as 1 (fire on every call).
    pub fn new(division: u32) -> Self {
        Self {
            division: division.max(1),
            counter: 0,
        }
    }

    #[inline]
    pub fn division(&self) -> u32 {
        self.division
    }

    pub fn set_division(&mut self, division: u32) {
        self.division = division.max(1);
        self.counter %= self.division;
    }

    /// Restart counting, so the next call fires.
    pub fn reset(&mut self) {
        self.counter = 0;
    }

    /// Advance the divider. Returns true when the divided clock fires.
    #[inline]
    pub fn process(&mut self) -> bool {
        let fire = self.counter == 0;
        self.counter += 1;
        if self.counter >= self.division {
            self.counter = 0;
        }
        fire
    }
}

impl Default for ClockDivider {
    fn default() -> Self {
        Self::new(1)
    }
}

// -------------------------------------------------------------------------------------------------
