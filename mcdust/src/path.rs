//! The ordered list of cell crossings traversed by a photon package.

use crate::vec3::Vec3;

/// A single cell crossing along a path.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PathSegment {
    /// Crossed cell; `None` for segments outside the grid.
    pub cell: Option<usize>,
    /// Length of the segment.
    pub ds: f64,
    /// Optical depth picked up over the segment; zero for exterior segments.
    pub dtau: f64,
    /// Cumulative path length at the end of the segment.
    pub s: f64,
    /// Cumulative optical depth at the end of the segment.
    pub tau: f64,
}

/// Ordered sequence of cell crossings starting at a position and heading
/// along a direction.
///
/// A path object is reused for many photon package life cycles; clearing it
/// keeps the segment allocation. Grids report an upper bound on their segment
/// count so the vector can be pre-sized once.
#[derive(Clone, Debug, Default)]
pub struct DustGridPath {
    position: Vec3,
    direction: Vec3,
    segments: Vec<PathSegment>,
}

impl DustGridPath {
    /// Creates an empty path at the origin.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty path with room for `capacity` segments.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            position: Vec3::ZERO,
            direction: Vec3::ZERO,
            segments: Vec::with_capacity(capacity),
        }
    }

    /// Drops all segments and restarts the path at the given position and
    /// direction, keeping the segment allocation.
    pub fn clear(&mut self, position: Vec3, direction: Vec3) {
        self.position = position;
        self.direction = direction;
        self.segments.clear();
    }

    /// Returns the starting position.
    #[must_use]
    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// Returns the propagation direction.
    #[must_use]
    pub fn direction(&self) -> Vec3 {
        self.direction
    }

    /// Appends a crossing of `cell` with length `ds`. Segments with a
    /// non-positive length are dropped.
    pub fn add_segment(&mut self, cell: Option<usize>, ds: f64) {
        if ds > 0.0 {
            let (s, tau) = self
                .segments
                .last()
                .map_or((0.0, 0.0), |segment| (segment.s, segment.tau));
            self.segments.push(PathSegment {
                cell,
                ds,
                dtau: 0.0,
                s: s + ds,
                tau,
            });
        }
    }

    /// Recomputes the per-segment and cumulative optical depths from an
    /// extinction coefficient per interior cell; exterior segments carry no
    /// optical depth.
    pub fn apply_extinction(&mut self, mut kappa_rho: impl FnMut(usize) -> f64) {
        let mut tau = 0.0;
        for segment in &mut self.segments {
            segment.dtau = segment.cell.map_or(0.0, |m| segment.ds * kappa_rho(m));
            tau += segment.dtau;
            segment.tau = tau;
        }
    }

    /// Returns the segments in traversal order.
    #[must_use]
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Returns the number of segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Returns true if the path has no segments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns the total traversed length.
    #[must_use]
    pub fn total_length(&self) -> f64 {
        self.segments.last().map_or(0.0, |segment| segment.s)
    }

    /// Returns the total optical depth of the path.
    #[must_use]
    pub fn total_tau(&self) -> f64 {
        self.segments.last().map_or(0.0, |segment| segment.tau)
    }

    /// Returns the path length at which the cumulative optical depth reaches
    /// `tau`, interpolating linearly within a segment (the density is
    /// constant inside a cell). Clamps to the total length when `tau` exceeds
    /// the optical depth of the path.
    #[must_use]
    pub fn path_length(&self, tau: f64) -> f64 {
        let mut s0 = 0.0;
        let mut tau0 = 0.0;
        for segment in &self.segments {
            if tau <= segment.tau && segment.dtau > 0.0 {
                return (tau - tau0) / segment.dtau * segment.ds + s0;
            }
            s0 = segment.s;
            tau0 = segment.tau;
        }
        self.total_length()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    fn sample_path() -> DustGridPath {
        let mut path = DustGridPath::with_capacity(8);
        path.clear(Vec3::ZERO, Vec3::new(0.0, 0.0, 1.0));
        path.add_segment(None, 2.0);
        path.add_segment(Some(0), 1.0);
        path.add_segment(Some(1), 3.0);
        path.add_segment(Some(2), 0.5);
        path
    }

    #[test]
    fn cumulative_quantities_are_non_decreasing() {
        let mut path = sample_path();
        path.apply_extinction(|m| [2.0, 0.5, 4.0][m]);

        let mut s_prev = 0.0;
        let mut tau_prev = 0.0;
        for segment in path.segments() {
            assert!(segment.ds > 0.0);
            assert!(segment.dtau >= 0.0);
            assert!(segment.s >= s_prev);
            assert!(segment.tau >= tau_prev);
            s_prev = segment.s;
            tau_prev = segment.tau;
        }
        assert_approx_eq!(f64, path.total_length(), 6.5, ulps = 2);
        assert_approx_eq!(f64, path.total_tau(), 2.0 + 1.5 + 2.0, ulps = 2);
    }

    #[test]
    fn exterior_segments_carry_no_optical_depth() {
        let mut path = sample_path();
        path.apply_extinction(|_| 1.0);
        assert_eq!(path.segments()[0].dtau, 0.0);
        assert_approx_eq!(f64, path.segments()[0].tau, 0.0, ulps = 2);
    }

    #[test]
    fn non_positive_segments_are_dropped() {
        let mut path = DustGridPath::new();
        path.add_segment(Some(0), 0.0);
        path.add_segment(Some(0), -1.0);
        assert!(path.is_empty());
        assert_eq!(path.total_length(), 0.0);
        assert_eq!(path.path_length(1.0), 0.0);
    }

    #[test]
    fn path_length_inverts_cumulative_tau() {
        let mut path = sample_path();
        path.apply_extinction(|m| [2.0, 0.5, 4.0][m]);
        // taus at segment ends: 0.0 (exterior), 2.0, 3.5, 5.5

        // half-way through the first interior segment
        assert_approx_eq!(f64, path.path_length(1.0), 2.5, ulps = 2);
        // exactly at a segment border
        assert_approx_eq!(f64, path.path_length(2.0), 3.0, ulps = 2);
        // inside the second interior segment
        assert_approx_eq!(f64, path.path_length(2.75), 4.5, ulps = 2);
        // beyond the total optical depth clamps to the path end
        assert_approx_eq!(f64, path.path_length(10.0), 6.5, ulps = 2);
    }

    #[test]
    fn clear_keeps_allocation() {
        let mut path = sample_path();
        let capacity = path.segments.capacity();
        path.clear(Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, 1.0, 0.0));
        assert!(path.is_empty());
        assert_eq!(path.segments.capacity(), capacity);
        assert_eq!(path.position(), Vec3::new(1.0, 0.0, 0.0));
    }
}
