//! Minimal three-component Cartesian vector used for positions and directions.

use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Neg, Sub};

/// A position or direction in three-dimensional space. Directions are unit
/// vectors by construction; this is not enforced by the type.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Vec3 {
    /// First Cartesian component.
    pub x: f64,
    /// Second Cartesian component.
    pub y: f64,
    /// Third Cartesian component.
    pub z: f64,
}

impl Vec3 {
    /// The origin.
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);

    /// Constructor.
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Returns the unit vector with polar angle `theta` and azimuth `phi`.
    #[must_use]
    pub fn from_spherical(theta: f64, phi: f64) -> Self {
        let (sin_theta, cos_theta) = theta.sin_cos();
        let (sin_phi, cos_phi) = phi.sin_cos();
        Self::new(sin_theta * cos_phi, sin_theta * sin_phi, cos_theta)
    }

    /// Returns the scalar product with `rhs`.
    #[must_use]
    pub fn dot(self, rhs: Self) -> f64 {
        self.z.mul_add(rhs.z, self.x.mul_add(rhs.x, self.y * rhs.y))
    }

    /// Returns the vector product with `rhs`.
    #[must_use]
    pub fn cross(self, rhs: Self) -> Self {
        Self::new(
            self.y.mul_add(rhs.z, -(self.z * rhs.y)),
            self.z.mul_add(rhs.x, -(self.x * rhs.z)),
            self.x.mul_add(rhs.y, -(self.y * rhs.x)),
        )
    }

    /// Returns the squared Euclidean norm.
    #[must_use]
    pub fn norm_squared(self) -> f64 {
        self.dot(self)
    }

    /// Returns the Euclidean norm.
    #[must_use]
    pub fn norm(self) -> f64 {
        self.norm_squared().sqrt()
    }

    /// Returns this vector scaled to unit length. The vector must not be zero.
    #[must_use]
    pub fn normalized(self) -> Self {
        self * (1.0 / self.norm())
    }

    /// Returns two unit vectors that complete `self` to a right-handed
    /// orthonormal basis. `self` must be a unit vector.
    #[must_use]
    pub fn orthonormal_basis(self) -> (Self, Self) {
        // pick the seed axis least aligned with this vector
        let seed = if self.x.abs() > 0.9 {
            Self::new(0.0, 1.0, 0.0)
        } else {
            Self::new(1.0, 0.0, 0.0)
        };
        let e1 = self.cross(seed).normalized();
        let e2 = self.cross(e1);
        (e1, e2)
    }
}

impl Add for Vec3 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Vec3 {
    type Output = Self;

    fn mul(self, rhs: f64) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Neg for Vec3 {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}
