//! Normalized loop markers which split a source into selectable regions.

// -------------------------------------------------------------------------------------------------

/// Max number of markers a [`MarkerSet`] can hold, including the two boundary markers.
pub const MAX_MARKERS: usize = 64;

/// Max number of markers besides the two boundary markers.
pub const MAX_INNER_MARKERS: usize = MAX_MARKERS - 2;

// -------------------------------------------------------------------------------------------------

/// Ordered, de-duplicated set of normalized positions in range [0, 1].
///
/// The set always contains the boundary markers 0.0 and 1.0, so there's always at least one
/// region. Marker memory is allocated once: edits never allocate, which allows mutating the set
/// from within the audio thread.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerSet {
    markers: Vec<f32>,
}

impl Default for MarkerSet {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkerSet {
    /// Create a new set with the two boundary markers only.
    pub fn new() -> Self {
        let mut markers = Vec::with_capacity(MAX_MARKERS);
        markers.extend([0.0, 1.0]);
        Self { markers }
    }

    /// Access to the sorted marker positions.
    pub fn markers(&self) -> &[f32] {
        &self.markers
    }

    /// Number of markers, including the boundary markers.
    pub fn len(&self) -> usize {
        self.markers.len()
    }

    /// Number of selectable regions.
    pub fn region_count(&self) -> usize {
        self.markers.len() - 1
    }

    /// Insert a new marker at the given normalized position.
    ///
    /// Returns false when the position is invalid, already present or when the set is full.
    pub fn add(&mut self, position: f32) -> bool {
        if !position.is_finite() {
            return false;
        }
        let position = position.clamp(0.0, 1.0);
        match self.markers.binary_search_by(|marker| marker.total_cmp(&position)) {
            Ok(_) => false,
            Err(index) => {
                if self.markers.len() >= MAX_MARKERS {
                    log::warn!("Marker set is full: ignoring marker at {position}");
                    return false;
                }
                self.markers.insert(index, position);
                true
            }
        }
    }

    /// Remove all markers but the boundary markers.
    pub fn clear(&mut self) {
        self.markers.clear();
        self.markers.extend([0.0, 1.0]);
    }

    /// Replace all markers with `count` equally sized regions.
    pub fn add_equidistant(&mut self, count: usize) {
        self.clear();
        let count = count.clamp(1, MAX_MARKERS - 1);
        for index in 1..count {
            self.add(index as f32 / count as f32);
        }
    }

    /// Replace all markers with the given positions, e.g. from a restored state.
    ///
    /// Invalid or duplicate positions are skipped. Boundary markers are always present.
    /// Positions which no longer fit into the set get ignored.
    pub fn set_markers(&mut self, markers: &[f32]) {
        self.clear();
        for marker in markers {
            if self.markers.len() >= MAX_MARKERS {
                break;
            }
            self.add(*marker);
        }
    }

    /// Index of the region that got selected with the given normalized region select value.
    pub fn region_index(&self, region_select: f32) -> usize {
        let max_index = self.markers.len() - 2;
        let region_select = if region_select.is_finite() {
            region_select.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let index = ((self.markers.len() - 1) as f32 * region_select).round() as usize;
        index.min(max_index)
    }

    /// Normalized `(start, end)` bounds of the region that got selected with the given
    /// normalized region select value.
    pub fn region(&self, region_select: f32) -> (f32, f32) {
        let index = self.region_index(region_select);
        (self.markers[index], self.markers[index + 1])
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundaries() {
        let mut markers = MarkerSet::new();
        assert_eq!(markers.markers(), &[0.0, 1.0]);
        assert_eq!(markers.region(0.0), (0.0, 1.0));
        assert_eq!(markers.region(1.0), (0.0, 1.0));
        assert!(!markers.add(0.0));
        assert!(!markers.add(1.0));
        assert!(!markers.add(f32::NAN));
        assert!(!markers.add(2.0)); // clamped to 1
        assert_eq!(markers.len(), 2);
        markers.clear();
        assert_eq!(markers.markers(), &[0.0, 1.0]);
    }

    #[test]
    fn sorted_and_unique() {
        let mut markers = MarkerSet::new();
        assert!(markers.add(0.75));
        assert!(markers.add(0.25));
        assert!(!markers.add(0.25));
        assert!(markers.add(0.5));
        assert_eq!(markers.markers(), &[0.0, 0.25, 0.5, 0.75, 1.0]);
        assert_eq!(markers.region_count(), 4);

        markers.set_markers(&[0.9, 0.1, 0.1, f32::INFINITY, 0.0]);
        assert_eq!(markers.markers(), &[0.0, 0.1, 0.9, 1.0]);
    }

    #[test]
    fn region_selection() {
        let mut markers = MarkerSet::new();
        markers.set_markers(&[0.25, 0.5, 0.75]);
        assert_eq!(markers.region_index(0.5), 2);
        assert_eq!(markers.region(0.5), (0.5, 0.75));
        assert_eq!(markers.region(0.0), (0.0, 0.25));
        assert_eq!(markers.region(0.1), (0.0, 0.25));
        assert_eq!(markers.region(0.2), (0.25, 0.5));
        // last region gets selected at the end of the range
        assert_eq!(markers.region(1.0), (0.75, 1.0));
        assert_eq!(markers.region(f32::NAN), (0.0, 0.25));
    }

    #[test]
    fn equidistant() {
        let mut markers = MarkerSet::new();
        markers.add(0.3);
        markers.add_equidistant(4);
        assert_eq!(markers.markers(), &[0.0, 0.25, 0.5, 0.75, 1.0]);
        markers.add_equidistant(0);
        assert_eq!(markers.markers(), &[0.0, 1.0]);
        markers.add_equidistant(1000);
        assert_eq!(markers.len(), MAX_MARKERS);
    }

    #[test]
    fn capacity() {
        let mut markers = MarkerSet::new();
        for index in 1..MAX_MARKERS + 10 {
            markers.add(index as f32 / 1000.0);
        }
        assert_eq!(markers.len(), MAX_MARKERS);
        assert!(markers.markers().windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(markers.markers().last(), Some(&1.0));
    }

    #[test]
    fn set_markers_beyond_capacity() {
        let positions = (1..200).map(|index| index as f32 / 200.0).collect::<Vec<_>>();
        let mut markers = MarkerSet::new();
        markers.set_markers(&positions);
        assert_eq!(markers.len(), MAX_MARKERS);
        assert_eq!(&markers.markers()[1..MAX_MARKERS - 1], &positions[..MAX_INNER_MARKERS]);
        assert_eq!(markers.markers().last(), Some(&1.0));
    }
}
