//! Spatial distributions from which stellar emission positions are drawn.

use crate::error::{Error, Result};
use crate::random::RandomSource;
use crate::vec3::Vec3;
use enum_dispatch::enum_dispatch;
use std::f64::consts::PI;

/// Capability interface for emission geometries.
#[enum_dispatch]
pub trait Geometry {
    /// Returns the normalized density at `r`, in units of inverse volume.
    fn density(&self, r: Vec3) -> f64;

    /// Draws a random position from the distribution.
    fn random_position(&self, random: &mut RandomSource) -> Vec3;

    /// Returns the intrinsic dimension of the symmetry (1, 2 or 3).
    fn dimension(&self) -> usize;
}

/// The closed set of geometries known to the engine.
#[enum_dispatch(Geometry)]
#[derive(Clone, Debug)]
pub enum GeometryEnum {
    /// All emission from a single point.
    PointGeometry,
    /// A Plummer sphere.
    PlummerGeometry,
}

/// Point-like distribution: every sample lands on the same position.
#[derive(Clone, Copy, Debug, Default)]
pub struct PointGeometry {
    position: Vec3,
}

impl PointGeometry {
    /// Creates a point distribution at `position`.
    #[must_use]
    pub const fn new(position: Vec3) -> Self {
        Self { position }
    }
}

impl Geometry for PointGeometry {
    fn density(&self, _r: Vec3) -> f64 {
        // a delta distribution has no finite density anywhere
        0.0
    }

    fn random_position(&self, _random: &mut RandomSource) -> Vec3 {
        self.position
    }

    fn dimension(&self) -> usize {
        if self.position == Vec3::ZERO {
            1
        } else {
            3
        }
    }
}

/// The Plummer sphere with scale length `c`,
/// rho(r) = rho0 (1 + (r/c)^2)^(-5/2), normalized to unit total mass.
#[derive(Clone, Copy, Debug)]
pub struct PlummerGeometry {
    scale: f64,
    rho0: f64,
}

impl PlummerGeometry {
    /// Creates a Plummer sphere with the given scale length.
    ///
    /// # Errors
    ///
    /// Returns an error when the scale length is not positive.
    pub fn new(scale: f64) -> Result<Self> {
        if scale <= 0.0 {
            return Err(Error::InvalidConfiguration(
                "the scale length of a Plummer geometry should be positive".to_owned(),
            ));
        }
        Ok(Self {
            scale,
            rho0: 0.75 / (PI * scale.powi(3)),
        })
    }

    /// Returns the scale length.
    #[must_use]
    pub const fn scale(&self) -> f64 {
        self.scale
    }
}

impl Geometry for PlummerGeometry {
    fn density(&self, r: Vec3) -> f64 {
        let s = r.norm() / self.scale;
        self.rho0 * s.mul_add(s, 1.0).powf(-2.5)
    }

    fn random_position(&self, random: &mut RandomSource) -> Vec3 {
        // inverse of the cumulative mass profile M(r) = (1 + (c/r)^2)^(-3/2)
        let t = random.uniform().cbrt();
        let radius = self.scale * t / ((1.0 - t) * (1.0 + t)).sqrt();
        random.direction() * radius
    }

    fn dimension(&self) -> usize {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn point_returns_its_position() {
        let geometry = PointGeometry::new(Vec3::new(1.0, 2.0, 3.0));
        let mut random = RandomSource::new(1);
        assert_eq!(geometry.random_position(&mut random), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(geometry.dimension(), 3);
        assert_eq!(PointGeometry::default().dimension(), 1);
    }

    #[test]
    fn plummer_rejects_non_positive_scale() {
        assert!(PlummerGeometry::new(0.0).is_err());
        assert!(PlummerGeometry::new(-1.0).is_err());
    }

    #[test]
    fn plummer_density_profile() {
        let c = 2.0;
        let geometry = PlummerGeometry::new(c).unwrap();
        let rho0 = 0.75 / (PI * c.powi(3));
        assert_approx_eq!(f64, geometry.density(Vec3::ZERO), rho0, ulps = 4);
        assert_approx_eq!(
            f64,
            geometry.density(Vec3::new(c, 0.0, 0.0)),
            rho0 * 2.0_f64.powf(-2.5),
            ulps = 4
        );
    }

    #[test]
    fn plummer_median_radius_matches_mass_profile() {
        // the half-mass radius of a Plummer sphere is c / sqrt(2^(2/3) - 1)
        let c = 1.5;
        let geometry = PlummerGeometry::new(c).unwrap();
        let mut random = RandomSource::new(43);
        let mut radii: Vec<f64> = (0..50_000)
            .map(|_| geometry.random_position(&mut random).norm())
            .collect();
        radii.sort_unstable_by(f64::total_cmp);
        let median = radii[radii.len() / 2];
        let expected = c / (2.0_f64.powf(2.0 / 3.0) - 1.0).sqrt();
        assert_approx_eq!(f64, median, expected, epsilon = 0.03);
    }
}
