//! Seeded random number streams feeding the transport kernel.

use crate::vec3::Vec3;
use rand::Rng;
use rand_pcg::Pcg64;
use std::f64::consts::TAU;

/// Random source backing a single work unit of the kernel.
///
/// Every work unit draws from its own PCG stream, selected by the pair
/// (global seed, stream index). Streams are statistically independent, so
/// results do not depend on how work units are assigned to threads, and a
/// rerun with the same seed reproduces the same simulation.
#[derive(Clone, Debug)]
pub struct RandomSource {
    rng: Pcg64,
}

impl RandomSource {
    /// Creates the stream with index zero for `seed`.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::for_stream(seed, 0)
    }

    /// Creates the stream with the given index for `seed`.
    #[must_use]
    pub fn for_stream(seed: u64, stream: u64) -> Self {
        Self {
            rng: Pcg64::new(u128::from(seed), u128::from(stream)),
        }
    }

    /// Returns a uniform deviate from `[0, 1)`.
    pub fn uniform(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    /// Returns an optical depth drawn from the exponential distribution
    /// truncated at `tau_max`, via the inverse cumulative distribution. The
    /// `expm1`/`ln_1p` pair keeps full precision for small cutoffs.
    pub fn exponcutoff(&mut self, tau_max: f64) -> f64 {
        let u = self.uniform();
        -(u * (-tau_max).exp_m1()).ln_1p()
    }

    /// Returns an isotropically distributed unit vector.
    pub fn direction(&mut self) -> Vec3 {
        let cos_theta = self.uniform().mul_add(2.0, -1.0);
        let sin_theta = cos_theta.mul_add(-cos_theta, 1.0).max(0.0).sqrt();
        let (sin_phi, cos_phi) = (TAU * self.uniform()).sin_cos();
        Vec3::new(sin_theta * cos_phi, sin_theta * sin_phi, cos_theta)
    }
}
